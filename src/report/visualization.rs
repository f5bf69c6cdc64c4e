use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use log::info;

use crate::{
    error::Result,
    fingerprint::CameraFingerprint,
    image_utils::{MapStatistics, Raster, luminance},
};

pub const VIGNETTING_PREVIEW_FILE: &str = "vignetting_preview.png";
pub const NOISE_PREVIEW_FILE: &str = "noise_preview.png";

#[derive(Debug, Clone, Copy)]
pub enum ColorScheme {
    HeatMap,
    Diverging,
    Grayscale,
}

#[derive(Debug, Clone)]
pub struct VisualizationConfig {
    pub vignetting_scheme: ColorScheme,
    pub noise_scheme: ColorScheme,
    /// Noise values beyond this many standard deviations saturate.
    pub noise_clip_sigma: f64,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            vignetting_scheme: ColorScheme::HeatMap,
            noise_scheme: ColorScheme::Diverging,
            noise_clip_sigma: 3.0,
        }
    }
}

/// 8-bit previews of fingerprint maps for quick inspection. The float maps
/// remain the source of truth.
pub struct Visualizer {
    config: VisualizationConfig,
}

impl Visualizer {
    pub fn new() -> Self {
        Self {
            config: VisualizationConfig::default(),
        }
    }

    pub fn with_config(config: VisualizationConfig) -> Self {
        Self { config }
    }

    /// Vignetting stretched from its minimum to its maximum.
    pub fn render_vignetting(&self, fingerprint: &CameraFingerprint) -> RgbImage {
        let stats = MapStatistics::of(fingerprint.vignetting());
        let range = stats.max - stats.min;

        self.render(fingerprint.vignetting(), self.config.vignetting_scheme, |v| {
            if range < 1e-12 {
                1.0
            } else {
                (v - stats.min) / range
            }
        })
    }

    /// Noise mapped symmetrically around zero, so zero sits mid-scale.
    pub fn render_noise(&self, fingerprint: &CameraFingerprint) -> RgbImage {
        let stats = MapStatistics::of(fingerprint.noise());
        let limit = (stats.std_dev * self.config.noise_clip_sigma).max(1e-12);

        self.render(fingerprint.noise(), self.config.noise_scheme, |v| {
            0.5 + 0.5 * (v / limit).clamp(-1.0, 1.0)
        })
    }

    pub fn save_previews<P: AsRef<Path>>(
        &self,
        fingerprint: &CameraFingerprint,
        dir: P,
    ) -> Result<Vec<PathBuf>> {
        let vignetting_path = dir.as_ref().join(VIGNETTING_PREVIEW_FILE);
        let noise_path = dir.as_ref().join(NOISE_PREVIEW_FILE);

        self.render_vignetting(fingerprint).save(&vignetting_path)?;
        self.render_noise(fingerprint).save(&noise_path)?;
        info!("saved map previews to {}", dir.as_ref().display());

        Ok(vec![vignetting_path, noise_path])
    }

    fn render<F>(&self, map: &Raster, scheme: ColorScheme, scale: F) -> RgbImage
    where
        F: Fn(f64) -> f64,
    {
        let (height, width, channels) = map.dim();

        RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let value = if channels == 3 {
                luminance(map[[y, x, 0]], map[[y, x, 1]], map[[y, x, 2]])
            } else {
                map[[y, x, 0]]
            };
            self.intensity_to_color(scale(value as f64) as f32, scheme)
        })
    }

    fn intensity_to_color(&self, intensity: f32, scheme: ColorScheme) -> Rgb<u8> {
        let intensity = intensity.clamp(0.0, 1.0);

        let (r, g, b) = match scheme {
            ColorScheme::HeatMap => {
                if intensity < 0.25 {
                    (0.0, intensity / 0.25, 1.0)
                } else if intensity < 0.5 {
                    (0.0, 1.0, 1.0 - (intensity - 0.25) / 0.25)
                } else if intensity < 0.75 {
                    ((intensity - 0.5) / 0.25, 1.0, 0.0)
                } else {
                    (1.0, 1.0 - (intensity - 0.75) / 0.25, 0.0)
                }
            }
            ColorScheme::Diverging => {
                if intensity < 0.5 {
                    let t = intensity / 0.5;
                    (t, t, 1.0)
                } else {
                    let t = (intensity - 0.5) / 0.5;
                    (1.0, 1.0 - t, 1.0 - t)
                }
            }
            ColorScheme::Grayscale => (intensity, intensity, intensity),
        };

        Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintMetadata;

    fn fingerprint() -> CameraFingerprint {
        let vignetting = Raster::from_shape_fn((4, 4, 1), |(y, x, _)| 0.2 + 0.05 * (x + y) as f32);
        let noise = Raster::from_shape_fn((4, 4, 1), |(y, x, _)| {
            if (x + y) % 2 == 0 { 0.01 } else { -0.01 }
        });
        CameraFingerprint::new(vignetting, noise, FingerprintMetadata::unknown()).unwrap()
    }

    #[test]
    fn test_vignetting_preview_spans_heatmap() {
        let preview = Visualizer::new().render_vignetting(&fingerprint());
        assert_eq!(preview.dimensions(), (4, 4));
        // darkest corner is blue, brightest is red
        assert_eq!(*preview.get_pixel(0, 0), Rgb([0, 0, 255]));
        assert_eq!(preview.get_pixel(3, 3)[0], 255);
    }

    #[test]
    fn test_noise_preview_is_symmetric() {
        let visualizer = Visualizer::with_config(VisualizationConfig {
            noise_scheme: ColorScheme::Grayscale,
            ..VisualizationConfig::default()
        });
        let preview = visualizer.render_noise(&fingerprint());
        let bright = preview.get_pixel(0, 0)[0] as i32;
        let dark = preview.get_pixel(1, 0)[0] as i32;
        assert!(bright > 128 && dark < 128);
        assert!((bright - 128 + dark - 127).abs() <= 2);
    }
}
