use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{DynamicImage, ImageFormat};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, StyleError},
    fingerprint::{CameraFingerprint, FingerprintMetadata},
    image_utils::{is_gray_rgb, raster_to_rgb32f, rgb32f_to_raster},
};

pub const VIGNETTING_FILE: &str = "vignetting_map.exr";
pub const NOISE_FILE: &str = "noise_map.exr";
pub const NORMALIZED_VIGNETTING_FILE: &str = "vignetting_map_normalized.exr";
pub const METADATA_FILE: &str = "fingerprint.json";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    width: usize,
    height: usize,
    channels: usize,
    #[serde(flatten)]
    metadata: FingerprintMetadata,
}

/// Directory holding a persisted fingerprint: two 32-bit float OpenEXR maps,
/// a normalized vignetting map for inspection and a JSON sidecar.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    dir: PathBuf,
}

impl FingerprintStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vignetting_path(&self) -> PathBuf {
        self.dir.join(VIGNETTING_FILE)
    }

    pub fn noise_path(&self) -> PathBuf {
        self.dir.join(NOISE_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn exists(&self) -> bool {
        self.vignetting_path().is_file() && self.noise_path().is_file()
    }

    /// Writes (or overwrites) every fingerprint file in the directory.
    ///
    /// Files are first written under a `.tmp` suffix and only renamed into
    /// place once all of them succeeded, so a failed save leaves the previous
    /// fingerprint intact.
    pub fn save(&self, fingerprint: &CameraFingerprint) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let mut staged = Vec::new();
        if let Err(e) = self.stage(fingerprint, &mut staged) {
            for (tmp, _) in &staged {
                let _ = fs::remove_file(tmp);
            }
            return Err(e);
        }

        for (tmp, path) in staged {
            fs::rename(&tmp, &path)?;
            info!("saved {}", path.display());
        }

        Ok(())
    }

    fn staging_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    }

    fn stage(
        &self,
        fingerprint: &CameraFingerprint,
        staged: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<()> {
        let maps = [
            (self.vignetting_path(), fingerprint.vignetting().clone()),
            (self.noise_path(), fingerprint.noise().clone()),
            (
                self.dir.join(NORMALIZED_VIGNETTING_FILE),
                fingerprint.normalized_vignetting(),
            ),
        ];

        for (path, raster) in maps {
            let tmp = Self::staging_path(&path);
            DynamicImage::ImageRgb32F(raster_to_rgb32f(&raster)?)
                .save_with_format(&tmp, ImageFormat::OpenExr)?;
            staged.push((tmp, path));
        }

        let sidecar = Sidecar {
            width: fingerprint.width(),
            height: fingerprint.height(),
            channels: fingerprint.channels(),
            metadata: fingerprint.metadata.clone(),
        };
        let path = self.metadata_path();
        let tmp = Self::staging_path(&path);
        fs::write(&tmp, serde_json::to_string_pretty(&sidecar)?)?;
        staged.push((tmp, path));

        Ok(())
    }

    pub fn load(&self) -> Result<CameraFingerprint> {
        if !self.exists() {
            return Err(StyleError::MissingFingerprint(self.dir.clone()));
        }

        let vignetting = image::open(self.vignetting_path())?.into_rgb32f();
        let noise = image::open(self.noise_path())?.into_rgb32f();

        let (channels, metadata) = if self.metadata_path().is_file() {
            let contents = fs::read_to_string(self.metadata_path())?;
            let sidecar: Sidecar = serde_json::from_str(&contents)?;
            if (sidecar.width, sidecar.height)
                != (vignetting.width() as usize, vignetting.height() as usize)
            {
                return Err(StyleError::IncompatibleFingerprint(format!(
                    "metadata describes {}x{} maps but {} is {}x{}",
                    sidecar.width,
                    sidecar.height,
                    VIGNETTING_FILE,
                    vignetting.width(),
                    vignetting.height()
                )));
            }
            (sidecar.channels, sidecar.metadata)
        } else {
            warn!(
                "{} missing in {}, inferring channel count from the maps",
                METADATA_FILE,
                self.dir.display()
            );
            let channels = if is_gray_rgb(&vignetting) && is_gray_rgb(&noise) {
                1
            } else {
                3
            };
            (channels, FingerprintMetadata::unknown())
        };

        if channels != 1 && channels != 3 {
            return Err(StyleError::IncompatibleFingerprint(format!(
                "unsupported channel count {channels} in {}",
                METADATA_FILE
            )));
        }

        let fingerprint = CameraFingerprint::new(
            rgb32f_to_raster(&vignetting, channels),
            rgb32f_to_raster(&noise, channels),
            metadata,
        )?;

        info!(
            "loaded {}x{} fingerprint ({} channel(s)) from {}",
            fingerprint.width(),
            fingerprint.height(),
            fingerprint.channels(),
            self.dir.display()
        );

        Ok(fingerprint)
    }
}
