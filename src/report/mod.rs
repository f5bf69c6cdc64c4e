pub mod visualization;

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    fingerprint::CameraFingerprint,
    image_utils::MapStatistics,
    metadata::exif::CameraProvenance,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub fingerprint_dir: PathBuf,
    pub found_images: usize,
    pub processed_images: usize,
    pub skipped: Vec<SkippedFile>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub vignetting: MapStatistics,
    pub noise: MapStatistics,
    pub camera: Option<CameraProvenance>,
    pub warnings: Vec<String>,
}

impl ExtractionReport {
    pub fn new(
        fingerprint: &CameraFingerprint,
        fingerprint_dir: PathBuf,
        found_images: usize,
        skipped: Vec<SkippedFile>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            fingerprint_dir,
            found_images,
            processed_images: fingerprint.metadata.source_image_count,
            skipped,
            width: fingerprint.width(),
            height: fingerprint.height(),
            channels: fingerprint.channels(),
            vignetting: fingerprint.vignetting_stats(),
            noise: fingerprint.noise_stats(),
            camera: fingerprint.metadata.camera.clone(),
            warnings,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationReport {
    pub fingerprint_dir: PathBuf,
    pub stylized_dir: PathBuf,
    pub found_images: usize,
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
}

/// Combined report of an `extract`, `apply` or `all` run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationReport>,
}

impl RunReport {
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
