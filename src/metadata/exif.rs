use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Camera identity recorded in the EXIF headers of the source corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraProvenance {
    pub make: Option<String>,
    pub model: Option<String>,
    /// Number of source images that carried make/model tags.
    pub tagged_images: usize,
    /// Other models seen in the corpus, which should not happen for a
    /// single-sensor fingerprint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_models: Vec<String>,
}

pub struct ExifExtractor;

impl ExifExtractor {
    /// Reads `(make, model)` from one file. `Ok(None)` when the file carries
    /// no EXIF block or neither tag.
    pub fn camera<P: AsRef<Path>>(path: P) -> Result<Option<(Option<String>, Option<String>)>> {
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        let exif = match exif::Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(_) => return Ok(None),
        };

        let make = Self::ascii_field(&exif, exif::Tag::Make);
        let model = Self::ascii_field(&exif, exif::Tag::Model);

        if make.is_none() && model.is_none() {
            Ok(None)
        } else {
            Ok(Some((make, model)))
        }
    }

    fn ascii_field(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
        exif.get_field(tag, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string().trim_matches('"').trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Tallies camera tags over the corpus and reports the dominant camera.
    pub fn survey<P: AsRef<Path>>(paths: &[P]) -> Option<CameraProvenance> {
        let mut tally: BTreeMap<(Option<String>, Option<String>), usize> = BTreeMap::new();

        for path in paths {
            match Self::camera(path) {
                Ok(Some(camera)) => *tally.entry(camera).or_default() += 1,
                Ok(None) => {}
                Err(e) => debug!("no EXIF for {}: {}", path.as_ref().display(), e),
            }
        }

        let tagged_images = tally.values().sum::<usize>();
        let ((make, model), _) = tally
            .iter()
            .max_by_key(|&(_, count)| *count)
            .map(|(camera, count)| (camera.clone(), *count))?;

        let other_models = tally
            .keys()
            .filter(|(_, m)| *m != model)
            .filter_map(|(_, m)| m.clone())
            .collect::<Vec<_>>();

        if !other_models.is_empty() {
            warn!(
                "corpus mixes camera models ({} besides {}); \
                 the fingerprint assumes a single sensor",
                other_models.join(", "),
                model.as_deref().unwrap_or("unknown")
            );
        }

        Some(CameraProvenance {
            make,
            model,
            tagged_images,
            other_models,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    #[test]
    fn test_png_without_exif_has_no_camera() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.png");
        GrayImage::from_pixel(2, 2, Luma([9])).save(&path).unwrap();

        assert_eq!(ExifExtractor::camera(&path).unwrap(), None);
        assert_eq!(ExifExtractor::survey(&[path]), None);
    }

    #[test]
    fn test_unreadable_path_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(ExifExtractor::camera(dir.path().join("absent.jpg")).is_err());
    }
}
