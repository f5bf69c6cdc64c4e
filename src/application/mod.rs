use std::{collections::HashMap, sync::Arc};

use image::DynamicImage;
use log::debug;
use ndarray::Zip;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, StyleError},
    fingerprint::{CameraFingerprint, normalize_by_channel_max},
    image_utils::{
        ChannelMode, Interpolation, Raster, StorageDepth, alpha_plane, clamp_unit,
        image_to_raster, raster_to_image, resize, with_alpha,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationParams {
    /// Multiplier on the noise map. 0 disables the noise contribution.
    #[serde(alias = "noise_alpha")]
    pub noise_intensity: f32,
    /// 0 leaves brightness untouched, 1 applies the measured falloff.
    pub vignetting_strength: f32,
    /// Policy used to bring the maps to the clean image's resolution.
    /// `None` reuses the policy the fingerprint was extracted with.
    pub interpolation: Option<Interpolation>,
}

impl Default for ApplicationParams {
    fn default() -> Self {
        Self {
            noise_intensity: 0.5,
            vignetting_strength: 1.0,
            interpolation: None,
        }
    }
}

impl ApplicationParams {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("noise intensity", self.noise_intensity),
            ("vignetting strength", self.vignetting_strength),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(StyleError::InvalidParameter(format!(
                    "{name} must be a finite value >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Maps resampled to one target resolution with the per-call strengths
/// already folded in.
struct PreparedMaps {
    gain: Raster,
    offset: Raster,
}

/// Imprints a fingerprint onto clean images.
///
/// `result = clamp(clean * gain + offset)` where
/// `gain = 1 + vignetting_strength * (vignetting / max(vignetting) - 1)` and
/// `offset = noise_intensity * noise`. The maps are resampled to the clean
/// image, never the other way round, and prepared maps are cached per target
/// resolution so a batch of equally sized images resamples once.
pub struct StyleApplicator<'a> {
    fingerprint: &'a CameraFingerprint,
    params: ApplicationParams,
    cache: Mutex<HashMap<(usize, usize), Arc<PreparedMaps>>>,
}

impl<'a> StyleApplicator<'a> {
    pub fn new(fingerprint: &'a CameraFingerprint, params: ApplicationParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            fingerprint,
            params,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn params(&self) -> &ApplicationParams {
        &self.params
    }

    pub fn interpolation(&self) -> Interpolation {
        self.params.interpolation.unwrap_or_else(|| {
            self.fingerprint
                .metadata
                .params
                .as_ref()
                .map(|p| p.interpolation)
                .unwrap_or_default()
        })
    }

    fn check_channels(&self, channels: usize) -> Result<()> {
        let fp_channels = self.fingerprint.channels();
        if fp_channels == channels || fp_channels == 1 {
            Ok(())
        } else {
            Err(StyleError::IncompatibleFingerprint(format!(
                "fingerprint has {fp_channels} channel(s) but the clean image has {channels}"
            )))
        }
    }

    fn prepared(&self, width: usize, height: usize) -> Result<Arc<PreparedMaps>> {
        if let Some(maps) = self.cache.lock().get(&(width, height)) {
            return Ok(Arc::clone(maps));
        }

        if (width, height) != (self.fingerprint.width(), self.fingerprint.height()) {
            debug!(
                "resampling fingerprint {}x{} -> {}x{}",
                self.fingerprint.width(),
                self.fingerprint.height(),
                width,
                height
            );
        }

        let policy = self.interpolation();
        let vignetting = resize(self.fingerprint.vignetting(), width, height, policy)?;
        let noise = resize(self.fingerprint.noise(), width, height, policy)?;

        let strength = self.params.vignetting_strength;
        let gain = normalize_by_channel_max(&vignetting).mapv(|f| 1.0 + strength * (f - 1.0));
        let offset = noise * self.params.noise_intensity;

        let maps = Arc::new(PreparedMaps { gain, offset });
        self.cache.lock().insert((width, height), Arc::clone(&maps));

        Ok(maps)
    }

    /// Stylizes a normalized raster. The result has the clean raster's shape.
    pub fn apply(&self, clean: &Raster) -> Result<Raster> {
        let (height, width, channels) = clean.dim();
        self.check_channels(channels)?;

        if width == 0 || height == 0 {
            return Err(StyleError::InvalidParameter(format!(
                "cannot stylize a {width}x{height} image"
            )));
        }

        let maps = self.prepared(width, height)?;
        let broadcast = self.fingerprint.channels() == 1;

        let mut result = Raster::zeros(clean.dim());
        Zip::indexed(&mut result).for_each(|(y, x, c), out| {
            let fc = if broadcast { 0 } else { c };
            let value = clean[[y, x, c]] * maps.gain[[y, x, fc]] + maps.offset[[y, x, fc]];
            *out = clamp_unit(value);
        });

        Ok(result)
    }

    /// Stylizes a decoded image, keeping its color type and storage depth.
    /// Only the luma or colour planes are stylized; alpha passes through.
    pub fn apply_image(&self, clean: &DynamicImage) -> Result<DynamicImage> {
        let raster = image_to_raster(clean, ChannelMode::native(clean));
        let stylized = self.apply(&raster)?;
        let stylized = match alpha_plane(clean) {
            Some(alpha) => with_alpha(&stylized, &alpha)?,
            None => stylized,
        };
        raster_to_image(&stylized, StorageDepth::of(clean))
    }
}

/// Applies `fingerprint` to a single normalized raster.
pub fn apply(
    clean: &Raster,
    fingerprint: &CameraFingerprint,
    params: &ApplicationParams,
) -> Result<Raster> {
    StyleApplicator::new(fingerprint, params.clone())?.apply(clean)
}
