use criterion::{black_box, criterion_group, Criterion};
use digit_recognizer::{
    canvas::RawCanvasFrame,
    prepare::{batch_prepare, prepare, PrepareConfig},
};
use image::{Rgba, RgbaImage};

/// A 280x280 canvas with a thick diagonal stroke.
fn stroke_canvas(side: u32) -> RawCanvasFrame {
    RawCanvasFrame::from(RgbaImage::from_fn(side, side, |x, y| {
        if x.abs_diff(y) < side / 14 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    }))
}

fn bench_prepare(c: &mut Criterion) {
    let config = PrepareConfig::default();
    let aligned = stroke_canvas(280);
    let unaligned = stroke_canvas(300);
    let batch = vec![stroke_canvas(280); 16];

    let mut group = c.benchmark_group("Preprocessing");
    group.bench_function("Prepare 280x280", |b| {
        b.iter(|| prepare(black_box(&aligned), &config).unwrap())
    });
    group.bench_function("Prepare 300x300", |b| {
        b.iter(|| prepare(black_box(&unaligned), &config).unwrap())
    });
    group.bench_function("Batch of 16", |b| {
        b.iter(|| batch_prepare(black_box(&batch), &config).unwrap())
    });
    group.finish();
}

criterion_group!(preprocessing, bench_prepare,);
