pub mod accumulator;

use image::DynamicImage;
use log::{debug, info, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

pub use accumulator::MeanAccumulator;

use crate::{
    error::{Result, StyleError},
    fingerprint::{CameraFingerprint, FingerprintMetadata},
    image_utils::{
        ChannelMode, Interpolation, Raster, ensure_finite, gaussian_blur, gaussian_kernel,
        image_to_raster, resize,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    /// `(width, height)` every source image is resized to.
    #[serde(alias = "process_resolution")]
    pub working_resolution: (u32, u32),
    #[serde(alias = "gaussian_blur_kernel")]
    pub blur_kernel_size: usize,
    /// Non-positive values derive sigma from the kernel size.
    pub blur_sigma: f64,
    /// Gain applied to the high-frequency residual.
    pub noise_scale: f64,
    /// Advisory only; fewer images log a convergence warning.
    pub min_recommended_image_count: usize,
    pub channel_mode: ChannelMode,
    pub interpolation: Interpolation,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            working_resolution: (512, 512),
            blur_kernel_size: 99,
            blur_sigma: 0.0,
            noise_scale: 1.0,
            min_recommended_image_count: 30,
            channel_mode: ChannelMode::Grayscale,
            interpolation: Interpolation::Bilinear,
        }
    }
}

impl ExtractionParams {
    pub fn validate(&self) -> Result<()> {
        let (width, height) = self.working_resolution;
        if width == 0 || height == 0 {
            return Err(StyleError::InvalidParameter(format!(
                "working resolution must be non-zero, got {width}x{height}"
            )));
        }

        gaussian_kernel(self.blur_kernel_size, self.blur_sigma)?;

        if !self.blur_sigma.is_finite() {
            return Err(StyleError::InvalidParameter(
                "blur sigma must be finite".into(),
            ));
        }

        if !self.noise_scale.is_finite() || self.noise_scale < 0.0 {
            return Err(StyleError::InvalidParameter(format!(
                "noise scale must be a finite value >= 0, got {}",
                self.noise_scale
            )));
        }

        Ok(())
    }
}

/// Estimates a [`CameraFingerprint`] from raw frames of a single camera.
///
/// Frames are resized to the working resolution and averaged so that scene
/// content cancels out. The mean is then split by a Gaussian low-pass into a
/// vignetting map (the blurred mean) and a noise map (the mean minus the
/// blurred mean, times `noise_scale`).
pub struct FingerprintExtractor {
    params: ExtractionParams,
}

impl FingerprintExtractor {
    pub fn new(params: ExtractionParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ExtractionParams {
        &self.params
    }

    /// Empty accumulator shaped for this extractor's working resolution.
    pub fn accumulator(&self) -> MeanAccumulator {
        let (width, height) = self.params.working_resolution;
        MeanAccumulator::new(
            height as usize,
            width as usize,
            self.params.channel_mode.channels(),
        )
    }

    pub fn normalize(&self, image: &DynamicImage) -> Result<Raster> {
        if image.width() == 0 || image.height() == 0 {
            return Err(StyleError::InvalidParameter(format!(
                "cannot normalize a {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let (width, height) = self.params.working_resolution;
        let raster = image_to_raster(image, self.params.channel_mode);
        resize(
            &raster,
            width as usize,
            height as usize,
            self.params.interpolation,
        )
    }

    pub fn accumulate(
        &self,
        accumulator: &mut MeanAccumulator,
        image: &DynamicImage,
    ) -> Result<()> {
        let normalized = self.normalize(image)?;
        accumulator.push(&normalized)?;
        debug!("accumulated image #{}", accumulator.count());
        Ok(())
    }

    pub fn extract<'a, I>(&self, images: I) -> Result<CameraFingerprint>
    where
        I: IntoIterator<Item = &'a DynamicImage>,
    {
        let mut accumulator = self.accumulator();
        for image in images {
            self.accumulate(&mut accumulator, image)?;
        }
        self.finish(&accumulator)
    }

    /// Same result as [`extract`](Self::extract) up to floating-point
    /// ordering: partial means are built per worker and merged by weight.
    pub fn extract_parallel(&self, images: &[DynamicImage]) -> Result<CameraFingerprint> {
        let accumulator = images
            .par_iter()
            .try_fold(
                || self.accumulator(),
                |mut acc, image| {
                    self.accumulate(&mut acc, image)?;
                    Ok::<_, StyleError>(acc)
                },
            )
            .try_reduce(
                || self.accumulator(),
                |mut left, right| {
                    left.merge(&right)?;
                    Ok(left)
                },
            )?;

        self.finish(&accumulator)
    }

    /// Decomposes the current mean into vignetting and noise maps. Works on
    /// any partial accumulator holding at least one image.
    pub fn finish(&self, accumulator: &MeanAccumulator) -> Result<CameraFingerprint> {
        let mean = accumulator.mean().ok_or(StyleError::InsufficientData {
            usable: 0,
            skipped: 0,
        })?;
        let count = accumulator.count();

        if count < self.params.min_recommended_image_count {
            warn!(
                "only {} image(s) averaged, at least {} recommended for a converged fingerprint",
                count, self.params.min_recommended_image_count
            );
        }

        ensure_finite(mean.iter().copied(), "accumulate")?;

        info!(
            "separating low and high frequency bands (kernel {}, sigma {})",
            self.params.blur_kernel_size, self.params.blur_sigma
        );
        let blurred = gaussian_blur(mean, self.params.blur_kernel_size, self.params.blur_sigma)?;
        ensure_finite(blurred.iter().copied(), "blur")?;

        let residual = (mean - &blurred) * self.params.noise_scale;
        ensure_finite(residual.iter().copied(), "residual")?;

        let vignetting = blurred.mapv(|v| v as f32);
        let noise = residual.mapv(|v| v as f32);
        ensure_finite(vignetting.iter().map(|&v| v as f64), "blur")?;
        ensure_finite(noise.iter().map(|&v| v as f64), "residual")?;

        let metadata = FingerprintMetadata::new(count, self.params.clone());
        let fingerprint = CameraFingerprint::new(vignetting, noise, metadata)?;

        info!(
            "fingerprint extracted from {} image(s) at {}x{}",
            count,
            fingerprint.width(),
            fingerprint.height()
        );

        Ok(fingerprint)
    }
}

/// Extracts a fingerprint from already decoded frames.
pub fn extract<'a, I>(images: I, params: &ExtractionParams) -> Result<CameraFingerprint>
where
    I: IntoIterator<Item = &'a DynamicImage>,
{
    FingerprintExtractor::new(params.clone())?.extract(images)
}
