pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

use ndarray::Axis;
use serde::{Deserialize, Serialize};

pub use store::FingerprintStore;

use crate::{
    error::{Result, StyleError},
    extraction::ExtractionParams,
    image_utils::{MapStatistics, Raster, channel_maxima, ensure_finite},
    metadata::exif::CameraProvenance,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintMetadata {
    pub source_image_count: usize,
    #[serde(default)]
    pub skipped_image_count: usize,
    #[serde(default)]
    pub params: Option<ExtractionParams>,
    #[serde(default)]
    pub camera: Option<CameraProvenance>,
    /// Seconds since the UNIX epoch.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub version: String,
}

impl FingerprintMetadata {
    pub fn new(source_image_count: usize, params: ExtractionParams) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            source_image_count,
            skipped_image_count: 0,
            params: Some(params),
            camera: None,
            created_at,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Placeholder for maps found on disk without a metadata sidecar.
    pub fn unknown() -> Self {
        Self {
            source_image_count: 0,
            skipped_image_count: 0,
            params: None,
            camera: None,
            created_at: 0,
            version: String::new(),
        }
    }
}

/// Per-sensor signature: a low-frequency vignetting map and a high-frequency
/// noise map of identical shape `(height, width, channels)`.
///
/// The vignetting map holds the blurred corpus mean in linear `[0, 1]`
/// intensity and is applied multiplicatively after division by its maximum.
/// The noise map is signed and applied additively.
#[derive(Debug, Clone)]
pub struct CameraFingerprint {
    vignetting: Raster,
    noise: Raster,
    pub metadata: FingerprintMetadata,
}

impl CameraFingerprint {
    pub fn new(vignetting: Raster, noise: Raster, metadata: FingerprintMetadata) -> Result<Self> {
        if vignetting.dim() != noise.dim() {
            return Err(StyleError::IncompatibleFingerprint(format!(
                "vignetting map {:?} and noise map {:?} differ in shape",
                vignetting.dim(),
                noise.dim()
            )));
        }

        let (height, width, channels) = vignetting.dim();
        if height == 0 || width == 0 {
            return Err(StyleError::IncompatibleFingerprint(
                "fingerprint maps are empty".into(),
            ));
        }
        if channels != 1 && channels != 3 {
            return Err(StyleError::IncompatibleFingerprint(format!(
                "fingerprint must have 1 or 3 channels, got {channels}"
            )));
        }

        ensure_finite(vignetting.iter().map(|&v| v as f64), "vignetting map")?;
        ensure_finite(noise.iter().map(|&v| v as f64), "noise map")?;

        Ok(Self {
            vignetting,
            noise,
            metadata,
        })
    }

    pub fn width(&self) -> usize {
        self.vignetting.dim().1
    }

    pub fn height(&self) -> usize {
        self.vignetting.dim().0
    }

    pub fn channels(&self) -> usize {
        self.vignetting.dim().2
    }

    pub fn vignetting(&self) -> &Raster {
        &self.vignetting
    }

    pub fn noise(&self) -> &Raster {
        &self.noise
    }

    pub fn vignetting_stats(&self) -> MapStatistics {
        MapStatistics::of(&self.vignetting)
    }

    pub fn noise_stats(&self) -> MapStatistics {
        MapStatistics::of(&self.noise)
    }

    /// Vignetting divided by its per-channel maximum.
    pub fn normalized_vignetting(&self) -> Raster {
        normalize_by_channel_max(&self.vignetting)
    }
}

/// Divides every channel plane by its maximum so the brightest point becomes
/// 1.0. Planes without a positive finite maximum become flat 1.0.
pub fn normalize_by_channel_max(raster: &Raster) -> Raster {
    let maxima = channel_maxima(raster);
    let mut normalized = raster.clone();

    for (mut plane, max) in normalized.axis_iter_mut(Axis(2)).zip(maxima) {
        if max.is_finite() && max > 0.0 {
            plane.mapv_inplace(|v| v / max);
        } else {
            plane.fill(1.0);
        }
    }

    normalized
}
