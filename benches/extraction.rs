use std::hint::black_box;

use camprint::{ApplicationParams, ExtractionParams, FingerprintExtractor, Raster, StyleApplicator};
use criterion::{Criterion, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

fn frames(count: u32) -> Vec<DynamicImage> {
    (0..count)
        .map(|seed| {
            DynamicImage::ImageLuma8(GrayImage::from_fn(640, 480, |x, y| {
                Luma([((x * 31 + y * 17 + seed * 101) % 251) as u8])
            }))
        })
        .collect()
}

fn params() -> ExtractionParams {
    ExtractionParams {
        working_resolution: (256, 256),
        blur_kernel_size: 31,
        ..ExtractionParams::default()
    }
}

fn bench_extraction(c: &mut Criterion) {
    let images = frames(8);
    let extractor = FingerprintExtractor::new(params()).unwrap();

    c.bench_function("extract_sequential_8x640x480", |b| {
        b.iter(|| extractor.extract(black_box(&images)).unwrap())
    });
    c.bench_function("extract_parallel_8x640x480", |b| {
        b.iter(|| extractor.extract_parallel(black_box(&images)).unwrap())
    });
}

fn bench_application(c: &mut Criterion) {
    let images = frames(4);
    let fingerprint = FingerprintExtractor::new(params())
        .unwrap()
        .extract(&images)
        .unwrap();
    let applicator = StyleApplicator::new(&fingerprint, ApplicationParams::default()).unwrap();
    let clean = Raster::from_elem((1080, 1920, 3), 0.5);

    c.bench_function("apply_1920x1080_rgb", |b| {
        b.iter(|| applicator.apply(black_box(&clean)).unwrap())
    });
}

criterion_group!(benches, bench_extraction, bench_application);
criterion_main!(benches);
