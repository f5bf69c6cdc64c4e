use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgb32FImage, Rgba};
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StyleError};

/// Linear intensity raster in `[0, 1]`, laid out as `(height, width, channels)`.
pub type Raster = Array3<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    #[default]
    Grayscale,
    Color,
}

impl ChannelMode {
    pub fn channels(self) -> usize {
        match self {
            ChannelMode::Grayscale => 1,
            ChannelMode::Color => 3,
        }
    }

    /// Luma sources stay single channel, anything with colour becomes RGB.
    pub fn native(image: &DynamicImage) -> Self {
        if image.color().has_color() {
            ChannelMode::Color
        } else {
            ChannelMode::Grayscale
        }
    }
}

/// Resampling policy shared by extraction and application.
///
/// All policies are separable and sample at pixel centres, so a resize never
/// shifts content by half a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    /// Box average over the covered source area; bilinear when upscaling.
    Area,
}

/// Sample storage of a decoded image, used to re-encode results in kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDepth {
    Eight,
    Sixteen,
    /// 32-bit float. The image crate only has RGB and RGBA float layouts, so
    /// luma rasters are replicated into the colour planes.
    Float,
}

impl StorageDepth {
    pub fn of(image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(_)
            | DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageRgb8(_)
            | DynamicImage::ImageRgba8(_) => StorageDepth::Eight,
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => StorageDepth::Float,
            _ => StorageDepth::Sixteen,
        }
    }
}

pub fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

pub fn image_to_raster(image: &DynamicImage, mode: ChannelMode) -> Raster {
    let rgb = image.to_rgb32f();
    let (width, height) = rgb.dimensions();
    let mut raster = Raster::zeros((height as usize, width as usize, mode.channels()));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        match mode {
            ChannelMode::Grayscale => {
                raster[[y, x, 0]] = luminance(pixel[0], pixel[1], pixel[2]);
            }
            ChannelMode::Color => {
                for c in 0..3 {
                    raster[[y, x, c]] = pixel[c];
                }
            }
        }
    }

    raster
}

/// Alpha plane of `image` in `[0, 1]`, or `None` when it has no alpha.
pub fn alpha_plane(image: &DynamicImage) -> Option<Array2<f32>> {
    if !image.color().has_alpha() {
        return None;
    }

    let rgba = image.to_rgba32f();
    let (width, height) = rgba.dimensions();
    Some(Array2::from_shape_fn(
        (height as usize, width as usize),
        |(y, x)| rgba.get_pixel(x as u32, y as u32)[3],
    ))
}

/// Appends `alpha` as the last channel of `raster`.
pub fn with_alpha(raster: &Raster, alpha: &Array2<f32>) -> Result<Raster> {
    let plane = alpha.view().insert_axis(Axis(2));
    ndarray::concatenate(Axis(2), &[raster.view(), plane]).map_err(|e| {
        StyleError::InvalidParameter(format!(
            "alpha plane {:?} does not fit raster {:?}: {e}",
            alpha.dim(),
            raster.dim()
        ))
    })
}

/// Encodes a raster with 1 (luma), 2 (luma + alpha), 3 (RGB) or 4 (RGBA)
/// channels at the requested storage depth.
pub fn raster_to_image(raster: &Raster, depth: StorageDepth) -> Result<DynamicImage> {
    let (height, width, channels) = raster.dim();
    let (w, h) = (width as u32, height as u32);
    let px = |x: u32, y: u32, c: usize| raster[[y as usize, x as usize, c]];
    // Colour plane `c` of a luma raster is its single plane.
    let colour = |x: u32, y: u32, c: usize| px(x, y, if channels < 3 { 0 } else { c });

    let image = match (channels, depth) {
        (1, StorageDepth::Eight) => DynamicImage::ImageLuma8(ImageBuffer::from_fn(w, h, |x, y| {
            Luma([to_u8(px(x, y, 0))])
        })),
        (1, StorageDepth::Sixteen) => {
            DynamicImage::ImageLuma16(ImageBuffer::from_fn(w, h, |x, y| {
                Luma([to_u16(px(x, y, 0))])
            }))
        }
        (2, StorageDepth::Eight) => {
            DynamicImage::ImageLumaA8(ImageBuffer::from_fn(w, h, |x, y| {
                LumaA([to_u8(px(x, y, 0)), to_u8(px(x, y, 1))])
            }))
        }
        (2, StorageDepth::Sixteen) => {
            DynamicImage::ImageLumaA16(ImageBuffer::from_fn(w, h, |x, y| {
                LumaA([to_u16(px(x, y, 0)), to_u16(px(x, y, 1))])
            }))
        }
        (3, StorageDepth::Eight) => DynamicImage::ImageRgb8(ImageBuffer::from_fn(w, h, |x, y| {
            Rgb([0, 1, 2].map(|c| to_u8(px(x, y, c))))
        })),
        (3, StorageDepth::Sixteen) => {
            DynamicImage::ImageRgb16(ImageBuffer::from_fn(w, h, |x, y| {
                Rgb([0, 1, 2].map(|c| to_u16(px(x, y, c))))
            }))
        }
        (4, StorageDepth::Eight) => {
            DynamicImage::ImageRgba8(ImageBuffer::from_fn(w, h, |x, y| {
                Rgba([0, 1, 2, 3].map(|c| to_u8(px(x, y, c))))
            }))
        }
        (4, StorageDepth::Sixteen) => {
            DynamicImage::ImageRgba16(ImageBuffer::from_fn(w, h, |x, y| {
                Rgba([0, 1, 2, 3].map(|c| to_u16(px(x, y, c))))
            }))
        }
        (1 | 3, StorageDepth::Float) => {
            DynamicImage::ImageRgb32F(ImageBuffer::from_fn(w, h, |x, y| {
                Rgb([0, 1, 2].map(|c| clamp_unit(colour(x, y, c))))
            }))
        }
        (2 | 4, StorageDepth::Float) => {
            DynamicImage::ImageRgba32F(ImageBuffer::from_fn(w, h, |x, y| {
                let [r, g, b] = [0, 1, 2].map(|c| clamp_unit(colour(x, y, c)));
                Rgba([r, g, b, clamp_unit(px(x, y, channels - 1))])
            }))
        }
        (n, _) => {
            return Err(StyleError::InvalidParameter(format!(
                "cannot encode a raster with {n} channel(s)"
            )));
        }
    };

    Ok(image)
}

fn to_u8(value: f32) -> u8 {
    (clamp_unit(value) * 255.0).round() as u8
}

fn to_u16(value: f32) -> u16 {
    (clamp_unit(value) * 65535.0).round() as u16
}

/// Float RGB image for EXR storage. Single-channel rasters are replicated
/// into all three planes.
pub fn raster_to_rgb32f(raster: &Raster) -> Result<Rgb32FImage> {
    let (height, width, channels) = raster.dim();
    if channels != 1 && channels != 3 {
        return Err(StyleError::InvalidParameter(format!(
            "cannot store a raster with {channels} channel(s)"
        )));
    }

    Ok(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if channels == 1 {
            let v = raster[[y, x, 0]];
            Rgb([v, v, v])
        } else {
            Rgb([raster[[y, x, 0]], raster[[y, x, 1]], raster[[y, x, 2]]])
        }
    }))
}

/// Inverse of [`raster_to_rgb32f`]. Values are taken as-is, without clamping.
pub fn rgb32f_to_raster(image: &Rgb32FImage, channels: usize) -> Raster {
    let (width, height) = image.dimensions();
    let mut raster = Raster::zeros((height as usize, width as usize, channels));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..channels {
            raster[[y as usize, x as usize, c]] = pixel[c];
        }
    }

    raster
}

/// True when every pixel has identical R, G and B values.
pub fn is_gray_rgb(image: &Rgb32FImage) -> bool {
    image
        .pixels()
        .all(|p| p[0].to_bits() == p[1].to_bits() && p[1].to_bits() == p[2].to_bits())
}

struct Tap {
    index: usize,
    weight: f64,
}

fn axis_taps(src: usize, dst: usize, policy: Interpolation) -> Vec<Vec<Tap>> {
    let scale = src as f64 / dst as f64;

    (0..dst)
        .map(|i| match policy {
            Interpolation::Nearest => {
                let index = (((i as f64 + 0.5) * scale) as usize).min(src - 1);
                vec![Tap { index, weight: 1.0 }]
            }
            Interpolation::Area if scale > 1.0 => {
                let start = i as f64 * scale;
                let end = start + scale;
                let last = (end.ceil() as usize).min(src);

                (start.floor() as usize..last)
                    .filter_map(|j| {
                        let overlap = end.min(j as f64 + 1.0) - start.max(j as f64);
                        (overlap > 0.0).then(|| Tap {
                            index: j,
                            weight: overlap / scale,
                        })
                    })
                    .collect()
            }
            _ => {
                let pos = ((i as f64 + 0.5) * scale - 0.5).clamp(0.0, (src - 1) as f64);
                let i0 = pos.floor() as usize;
                let i1 = (i0 + 1).min(src - 1);
                let frac = pos - i0 as f64;
                vec![
                    Tap {
                        index: i0,
                        weight: 1.0 - frac,
                    },
                    Tap {
                        index: i1,
                        weight: frac,
                    },
                ]
            }
        })
        .collect()
}

/// Resizes `raster` to `width` x `height`. Channel count is preserved and
/// values are never clamped, so signed noise survives resampling.
pub fn resize(
    raster: &Raster,
    width: usize,
    height: usize,
    policy: Interpolation,
) -> Result<Raster> {
    let (src_h, src_w, channels) = raster.dim();

    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return Err(StyleError::InvalidParameter(format!(
            "cannot resize {src_w}x{src_h} to {width}x{height}"
        )));
    }

    if (src_w, src_h) == (width, height) {
        return Ok(raster.clone());
    }

    let x_taps = axis_taps(src_w, width, policy);
    let y_taps = axis_taps(src_h, height, policy);

    let mut horizontal = Array3::<f64>::zeros((src_h, width, channels));
    for y in 0..src_h {
        for (x, taps) in x_taps.iter().enumerate() {
            for c in 0..channels {
                horizontal[[y, x, c]] = taps
                    .iter()
                    .map(|t| t.weight * raster[[y, t.index, c]] as f64)
                    .sum();
            }
        }
    }

    let mut result = Raster::zeros((height, width, channels));
    for (y, taps) in y_taps.iter().enumerate() {
        for x in 0..width {
            for c in 0..channels {
                let v: f64 = taps
                    .iter()
                    .map(|t| t.weight * horizontal[[t.index, x, c]])
                    .sum();
                result[[y, x, c]] = v as f32;
            }
        }
    }

    Ok(result)
}

/// Normalized 1-D Gaussian kernel. A non-positive `sigma` is derived from
/// the kernel size with the usual `0.3 * ((k - 1) / 2 - 1) + 0.8` rule.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Result<Vec<f64>> {
    if size == 0 || size % 2 == 0 {
        return Err(StyleError::InvalidParameter(format!(
            "Gaussian kernel size must be odd and positive, got {size}"
        )));
    }

    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };

    let half = (size / 2) as f64;
    let mut kernel = (0..size)
        .map(|i| {
            let d = i as f64 - half;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect::<Vec<_>>();

    let sum = kernel.iter().sum::<f64>();
    kernel.iter_mut().for_each(|k| *k /= sum);

    Ok(kernel)
}

/// Mirror index without repeating the edge sample (`dcb|abcd|cba`). Valid for
/// any offset, including kernels wider than the image.
fn reflect_101(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let i = index.rem_euclid(period);
    if i >= len as isize {
        (period - i) as usize
    } else {
        i as usize
    }
}

/// Separable Gaussian low-pass applied per channel.
pub fn gaussian_blur(input: &Array3<f64>, size: usize, sigma: f64) -> Result<Array3<f64>> {
    let kernel = gaussian_kernel(size, sigma)?;
    let half = (size / 2) as isize;
    let (height, width, channels) = input.dim();

    let mut horizontal = Array3::<f64>::zeros(input.dim());
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                horizontal[[y, x, c]] = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| {
                        let sx = reflect_101(x as isize + k as isize - half, width);
                        w * input[[y, sx, c]]
                    })
                    .sum();
            }
        }
    }

    let mut result = Array3::<f64>::zeros(input.dim());
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                result[[y, x, c]] = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| {
                        let sy = reflect_101(y as isize + k as isize - half, height);
                        w * horizontal[[sy, x, c]]
                    })
                    .sum();
            }
        }
    }

    Ok(result)
}

/// Clamp to the output domain. NaN maps to black.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn ensure_finite<I>(values: I, stage: &'static str) -> Result<()>
where
    I: IntoIterator<Item = f64>,
{
    let count = values.into_iter().filter(|v| !v.is_finite()).count();
    if count > 0 {
        return Err(StyleError::NumericInstability { stage, count });
    }
    Ok(())
}

/// Maximum of each channel plane.
pub fn channel_maxima(raster: &Raster) -> Vec<f32> {
    raster
        .axis_iter(Axis(2))
        .map(|plane| plane.iter().cloned().fold(f32::NEG_INFINITY, f32::max))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl MapStatistics {
    pub fn of(raster: &Raster) -> Self {
        let n = raster.len().max(1) as f64;
        let min = raster.iter().map(|&v| v as f64).fold(f64::INFINITY, f64::min);
        let max = raster
            .iter()
            .map(|&v| v as f64)
            .fold(f64::NEG_INFINITY, f64::max);
        let mean = raster.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = raster
            .iter()
            .map(|&v| {
                let diff = v as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;

        Self {
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ColorType, GrayImage, RgbaImage};

    fn row(values: &[f32]) -> Raster {
        Raster::from_shape_vec((1, values.len(), 1), values.to_vec()).unwrap()
    }

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(7, 1.5).unwrap();
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((kernel[0] - kernel[6]).abs() < 1e-15);
        assert!(kernel[3] > kernel[2]);
    }

    #[test]
    fn test_kernel_rejects_even_size() {
        assert!(matches!(
            gaussian_kernel(4, 1.0),
            Err(StyleError::InvalidParameter(_))
        ));
        assert!(gaussian_kernel(0, 1.0).is_err());
    }

    #[test]
    fn test_auto_sigma_matches_size_rule() {
        // k = 3 derives sigma = 0.8
        let auto = gaussian_kernel(3, 0.0).unwrap();
        let explicit = gaussian_kernel(3, 0.8).unwrap();
        for (a, b) in auto.iter().zip(&explicit) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_blur_preserves_flat_field_with_oversized_kernel() {
        let flat = Array3::<f64>::from_elem((4, 4, 1), 0.4);
        let blurred = gaussian_blur(&flat, 99, 0.0).unwrap();
        assert!(blurred.iter().all(|v| (v - 0.4).abs() < 1e-12));
    }

    #[test]
    fn test_blur_smooths_impulse() {
        let mut impulse = Array3::<f64>::zeros((9, 9, 1));
        impulse[[4, 4, 0]] = 1.0;
        let blurred = gaussian_blur(&impulse, 5, 1.0).unwrap();
        assert!(blurred[[4, 4, 0]] < 1.0);
        assert!(blurred[[4, 5, 0]] > 0.0);
        assert!((blurred.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reflect_101_indices() {
        assert_eq!(reflect_101(-1, 4), 1);
        assert_eq!(reflect_101(-2, 4), 2);
        assert_eq!(reflect_101(4, 4), 2);
        assert_eq!(reflect_101(10, 4), 2);
        assert_eq!(reflect_101(-7, 1), 0);
    }

    #[test]
    fn test_bilinear_upscale_is_center_aligned() {
        let up = resize(&row(&[0.0, 1.0]), 4, 1, Interpolation::Bilinear).unwrap();
        let values = up.iter().cloned().collect::<Vec<_>>();
        assert_eq!(values, vec![0.0, 0.25, 0.75, 1.0]);
    }

    #[test]
    fn test_area_downscale_averages_blocks() {
        let down = resize(&row(&[0.0, 1.0, 2.0, 3.0]), 2, 1, Interpolation::Area).unwrap();
        let values = down.iter().cloned().collect::<Vec<_>>();
        assert_eq!(values, vec![0.5, 2.5]);
    }

    #[test]
    fn test_nearest_picks_source_samples() {
        let down = resize(&row(&[0.1, 0.2, 0.3, 0.4]), 2, 1, Interpolation::Nearest).unwrap();
        let values = down.iter().cloned().collect::<Vec<_>>();
        assert_eq!(values, vec![0.2, 0.4]);
    }

    #[test]
    fn test_resize_keeps_signed_values_and_channels() {
        let noise = Raster::from_elem((3, 5, 3), -0.25);
        for policy in [Interpolation::Nearest, Interpolation::Bilinear, Interpolation::Area] {
            let resized = resize(&noise, 11, 2, policy).unwrap();
            assert_eq!(resized.dim(), (2, 11, 3));
            assert!(resized.iter().all(|v| (v + 0.25).abs() < 1e-6));
        }
    }

    #[test]
    fn test_resize_rejects_empty() {
        let empty = Raster::zeros((0, 4, 1));
        assert!(resize(&empty, 2, 2, Interpolation::Bilinear).is_err());
        assert!(resize(&row(&[1.0]), 0, 1, Interpolation::Bilinear).is_err());
    }

    #[test]
    fn test_gray_image_round_trip() {
        let gray = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 100) as u8]));
        let image = DynamicImage::ImageLuma8(gray.clone());
        assert_eq!(ChannelMode::native(&image), ChannelMode::Grayscale);

        let raster = image_to_raster(&image, ChannelMode::Grayscale);
        assert_eq!(raster.dim(), (2, 3, 1));

        let back = raster_to_image(&raster, StorageDepth::of(&image)).unwrap();
        assert_eq!(back.to_luma8(), gray);
    }

    #[test]
    fn test_sixteen_bit_input_is_normalized() {
        let img = ImageBuffer::from_pixel(2, 2, Luma([65535u16]));
        let image = DynamicImage::ImageLuma16(img);
        let raster = image_to_raster(&image, ChannelMode::Grayscale);
        assert!(raster.iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert_eq!(StorageDepth::of(&image), StorageDepth::Sixteen);
    }

    #[test]
    fn test_float_input_is_reencoded_as_float() {
        let rgb = Rgb32FImage::from_pixel(2, 3, Rgb([0.25, 0.5, 0.75]));
        let image = DynamicImage::ImageRgb32F(rgb.clone());
        assert_eq!(StorageDepth::of(&image), StorageDepth::Float);

        let raster = image_to_raster(&image, ChannelMode::native(&image));
        let back = raster_to_image(&raster, StorageDepth::of(&image)).unwrap();
        assert_eq!(back.color(), ColorType::Rgb32F);
        assert_eq!(back.into_rgb32f(), rgb);
    }

    #[test]
    fn test_alpha_plane_is_split_and_reattached() {
        let rgba = RgbaImage::from_fn(3, 2, |x, y| Rgba([10, 20, 30, (x * 50 + y * 100) as u8]));
        let image = DynamicImage::ImageRgba8(rgba.clone());

        let alpha = alpha_plane(&image).unwrap();
        assert_eq!(alpha.dim(), (2, 3));
        assert!(alpha_plane(&DynamicImage::ImageRgb8(image.to_rgb8())).is_none());

        let raster = with_alpha(&image_to_raster(&image, ChannelMode::Color), &alpha).unwrap();
        assert_eq!(raster.dim(), (2, 3, 4));

        let back = raster_to_image(&raster, StorageDepth::of(&image)).unwrap();
        assert_eq!(back.color(), ColorType::Rgba8);
        assert_eq!(back.to_rgba8(), rgba);
    }

    #[test]
    fn test_with_alpha_rejects_mismatched_plane() {
        let raster = Raster::zeros((2, 2, 1));
        assert!(with_alpha(&raster, &Array2::zeros((3, 2))).is_err());
    }

    #[test]
    fn test_rgb32f_round_trip_keeps_unclamped_values() {
        let raster = row(&[-0.5, 0.25, 3.0]);
        let stored = raster_to_rgb32f(&raster).unwrap();
        assert!(is_gray_rgb(&stored));
        assert_eq!(rgb32f_to_raster(&stored, 1), raster);
    }

    #[test]
    fn test_clamp_unit_handles_non_finite() {
        assert_eq!(clamp_unit(f32::NAN), 0.0);
        assert_eq!(clamp_unit(f32::INFINITY), 1.0);
        assert_eq!(clamp_unit(f32::NEG_INFINITY), 0.0);
        assert_eq!(clamp_unit(0.3), 0.3);
    }

    #[test]
    fn test_ensure_finite_counts_bad_values() {
        let err = ensure_finite([1.0, f64::NAN, f64::INFINITY], "blur").unwrap_err();
        assert!(matches!(
            err,
            StyleError::NumericInstability { stage: "blur", count: 2 }
        ));
    }

    #[test]
    fn test_map_statistics() {
        let stats = MapStatistics::of(&row(&[0.0, 1.0]));
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 1.0);
        assert!((stats.mean - 0.5).abs() < 1e-12);
        assert!((stats.std_dev - 0.5).abs() < 1e-12);
    }
}
