//! Directory-level driver around the two core entry points: scans inputs,
//! decodes files, skips the ones that fail, and persists results.

use std::{
    fs,
    path::{Path, PathBuf},
};

use image::DynamicImage;
use log::{error, info, warn};
use parking_lot::Mutex;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::{
    application::StyleApplicator,
    config::StyleConfig,
    error::{Result, StyleError},
    extraction::{FingerprintExtractor, MeanAccumulator},
    fingerprint::{CameraFingerprint, FingerprintStore},
    metadata::exif::ExifExtractor,
    report::{ApplicationReport, ExtractionReport, SkippedFile, visualization::Visualizer},
};

pub const RAW_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "exr"];
pub const CLEAN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];
pub const STYLIZED_PREFIX: &str = "stylized_";

/// Files in `dir` with one of `extensions` (case-insensitive), sorted.
pub fn list_images<P: AsRef<Path>>(dir: P, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        })
        .collect::<Vec<_>>();

    paths.sort();
    Ok(paths)
}

pub fn decode<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    image::open(&path).map_err(|source| StyleError::Decode {
        path: path.as_ref().to_path_buf(),
        source,
    })
}

/// Records a recoverable failure, or hands a fatal one back.
fn skip_or_fail(skipped: &Mutex<Vec<SkippedFile>>, path: &Path, err: StyleError) -> Result<()> {
    if err.is_recoverable() {
        warn!("skipping {}: {}", path.display(), err);
        skipped.lock().push(SkippedFile {
            path: path.to_path_buf(),
            reason: err.to_string(),
        });
        Ok(())
    } else {
        Err(err)
    }
}

pub struct ExtractionOutcome {
    pub fingerprint: CameraFingerprint,
    pub report: ExtractionReport,
}

/// Extracts a fingerprint from `paths.raw_images_dir` and writes it to the
/// fingerprint directory.
pub fn run_extraction(config: &StyleConfig) -> Result<ExtractionOutcome> {
    let raw_dir = &config.paths.raw_images_dir;
    let mut paths = list_images(raw_dir, RAW_EXTENSIONS).inspect_err(|e| {
        error!("cannot read raw image directory {}: {}", raw_dir.display(), e);
    })?;
    let found_images = paths.len();

    if let Some(limit) = config.runtime.max_images.filter(|&limit| limit < paths.len()) {
        info!("limiting extraction to the first {limit} of {found_images} image(s)");
        paths.truncate(limit);
    }

    info!("found {} image(s) in {}", found_images, raw_dir.display());

    let extractor = FingerprintExtractor::new(config.analyzer.clone())?;
    let skipped = Mutex::new(Vec::new());

    let accumulate = |mut acc: MeanAccumulator, path: &PathBuf| -> Result<MeanAccumulator> {
        match decode(path) {
            Ok(image) => extractor.accumulate(&mut acc, &image)?,
            Err(e) => skip_or_fail(&skipped, path, e)?,
        }
        Ok(acc)
    };

    let accumulator = if config.runtime.parallel {
        paths
            .par_iter()
            .try_fold(|| extractor.accumulator(), accumulate)
            .try_reduce(
                || extractor.accumulator(),
                |mut left, right| {
                    left.merge(&right)?;
                    Ok(left)
                },
            )?
    } else {
        paths
            .iter()
            .try_fold(extractor.accumulator(), accumulate)?
    };

    let mut skipped = skipped.into_inner();
    skipped.sort_by(|a, b| a.path.cmp(&b.path));

    info!(
        "processed {}/{} image(s), {} skipped",
        accumulator.count(),
        paths.len(),
        skipped.len()
    );

    if accumulator.is_empty() {
        return Err(StyleError::InsufficientData {
            usable: 0,
            skipped: skipped.len(),
        });
    }

    let mut warnings = Vec::new();
    if accumulator.count() < config.analyzer.min_recommended_image_count {
        warnings.push(format!(
            "{} image(s) averaged, {} recommended",
            accumulator.count(),
            config.analyzer.min_recommended_image_count
        ));
    }

    let mut fingerprint = extractor.finish(&accumulator)?;
    fingerprint.metadata.skipped_image_count = skipped.len();

    let usable = paths
        .iter()
        .filter(|p| !skipped.iter().any(|s| &s.path == *p))
        .collect::<Vec<_>>();
    fingerprint.metadata.camera = ExifExtractor::survey(&usable);
    if let Some(camera) = &fingerprint.metadata.camera {
        if !camera.other_models.is_empty() {
            warnings.push(format!(
                "corpus contains other camera models: {}",
                camera.other_models.join(", ")
            ));
        }
    }

    let fingerprint_dir = config.paths.fingerprint_dir();
    let store = FingerprintStore::new(&fingerprint_dir);
    store.save(&fingerprint)?;
    if config.runtime.write_previews {
        Visualizer::new().save_previews(&fingerprint, &fingerprint_dir)?;
    }

    let report =
        ExtractionReport::new(&fingerprint, fingerprint_dir, found_images, skipped, warnings);
    Ok(ExtractionOutcome {
        fingerprint,
        report,
    })
}

/// Output path for a clean image: same name with a `stylized_` prefix.
pub fn stylized_path(stylized_dir: &Path, clean: &Path) -> PathBuf {
    let name = clean
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    stylized_dir.join(format!("{STYLIZED_PREFIX}{name}"))
}

/// Loads the persisted fingerprint once and stylizes every clean image.
pub fn run_application(config: &StyleConfig) -> Result<ApplicationReport> {
    let store = FingerprintStore::new(config.paths.fingerprint_dir());
    let fingerprint = store.load()?;
    apply_directory(&fingerprint, config)
}

/// Stylizes the clean image directory with an already loaded fingerprint.
pub fn apply_directory(
    fingerprint: &CameraFingerprint,
    config: &StyleConfig,
) -> Result<ApplicationReport> {
    let clean_dir = &config.paths.clean_images_dir;
    let stylized_dir = config.paths.stylized_dir();
    let mut report = ApplicationReport {
        fingerprint_dir: config.paths.fingerprint_dir(),
        stylized_dir: stylized_dir.clone(),
        ..ApplicationReport::default()
    };

    if !clean_dir.is_dir() {
        fs::create_dir_all(clean_dir)?;
        warn!(
            "clean image directory {} did not exist and was created; add images and rerun",
            clean_dir.display()
        );
        return Ok(report);
    }

    let paths = list_images(clean_dir, CLEAN_EXTENSIONS)?;
    report.found_images = paths.len();
    if paths.is_empty() {
        warn!("no clean images found in {}", clean_dir.display());
        return Ok(report);
    }

    fs::create_dir_all(&stylized_dir)?;
    info!("stylizing {} image(s)", paths.len());

    let applicator = StyleApplicator::new(fingerprint, config.applicator.clone())?;
    let skipped = Mutex::new(Vec::new());

    let stylize = |path: &PathBuf| -> Result<Option<PathBuf>> {
        let clean = match decode(path) {
            Ok(image) => image,
            Err(e) => {
                skip_or_fail(&skipped, path, e)?;
                return Ok(None);
            }
        };

        let stylized = applicator.apply_image(&clean)?;
        let out = stylized_path(&stylized_dir, path);
        stylized.save(&out)?;
        Ok(Some(out))
    };

    let written = if config.runtime.parallel {
        paths.par_iter().map(stylize).collect::<Result<Vec<_>>>()?
    } else {
        paths.iter().map(stylize).collect::<Result<Vec<_>>>()?
    };

    report.written = written.into_iter().flatten().collect();
    report.skipped = skipped.into_inner();
    report.skipped.sort_by(|a, b| a.path.cmp(&b.path));

    info!(
        "stylized {}/{} image(s) into {}",
        report.written.len(),
        report.found_images,
        stylized_dir.display()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.exr"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("d.png")).unwrap();

        let names = list_images(dir.path(), CLEAN_EXTENSIONS)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.jpg", "b.PNG"]);
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = list_images(dir.path().join("absent"), RAW_EXTENSIONS).unwrap_err();
        assert!(matches!(err, StyleError::Io(_)));
    }

    #[test]
    fn test_corrupt_file_is_recoverable_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"definitely not a png").unwrap();

        let err = decode(&path).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_stylized_path_prefixes_name() {
        assert_eq!(
            stylized_path(Path::new("out"), Path::new("clean/cat.jpg")),
            PathBuf::from("out/stylized_cat.jpg")
        );
    }
}
