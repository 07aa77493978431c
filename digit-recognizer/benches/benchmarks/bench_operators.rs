use criterion::{black_box, criterion_group, Criterion};
use digit_recognizer::{
    operators::*,
    providers::{NaiveProvider, ParNaiveProvider, Provider},
};
use lazy_static::lazy_static;
use ndarray::{Array1, ArrayD, IxDyn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::time::Duration;

lazy_static! {
    static ref THREAD_POOL_1: ThreadPool = ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .expect("Unable to create ThreadPool");
    static ref THREAD_POOL_4: ThreadPool = ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .expect("Unable to create ThreadPool");
}

fn ramp(shape: &[usize]) -> ArrayD<f32> {
    let len = shape.iter().product::<usize>();
    ArrayD::from_shape_vec(
        IxDyn(shape),
        (0..len).map(|i| (i % 17) as f32 / 17.0).collect(),
    )
    .unwrap()
}

/// The first convolution of a LeNet-like MNIST network: 32 5x5 filters, same padding.
fn conv_layer<P: Provider>(thread_pool: &ThreadPool) -> ArrayD<f32> {
    let x = ramp(&[1, 1, 28, 28]);
    let weights = ramp(&[32, 1, 5, 5]);
    let bias = Array1::<f32>::zeros(32);
    let attrs = ConvAttributes::new([1, 1], 1, Some([5, 5]), [2, 2, 2, 2], [1, 1]);
    P::conv(thread_pool, x, weights, Some(bias), attrs).unwrap()
}

fn pool_layer<P: Provider>(thread_pool: &ThreadPool) -> ArrayD<f32> {
    let x = ramp(&[1, 32, 28, 28]);
    let attrs = MaxPoolAttributes::new([2, 2], [0, 0, 0, 0], [2, 2]);
    P::max_pool(thread_pool, x, attrs).unwrap()
}

fn dense_layer<P: Provider>(thread_pool: &ThreadPool) -> ArrayD<f32> {
    let a = ramp(&[64, 1568]);
    let b = ramp(&[1568, 128]);
    let c = ramp(&[128]);
    let attrs = GemmAttributes::new(1.0, 1.0, false, false);
    P::gemm(thread_pool, a, b, Some(c), attrs).unwrap()
}

fn bench_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("Operators");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(20));
    group.bench_function("Conv naive", |b| {
        b.iter(|| conv_layer::<NaiveProvider>(black_box(&THREAD_POOL_1)))
    });
    group.bench_function("Conv parallel", |b| {
        b.iter(|| conv_layer::<ParNaiveProvider>(black_box(&THREAD_POOL_4)))
    });
    group.bench_function("MaxPool naive", |b| {
        b.iter(|| pool_layer::<NaiveProvider>(black_box(&THREAD_POOL_1)))
    });
    group.bench_function("MaxPool parallel", |b| {
        b.iter(|| pool_layer::<ParNaiveProvider>(black_box(&THREAD_POOL_4)))
    });
    group.bench_function("Gemm naive", |b| {
        b.iter(|| dense_layer::<NaiveProvider>(black_box(&THREAD_POOL_1)))
    });
    group.bench_function("Gemm parallel", |b| {
        b.iter(|| dense_layer::<ParNaiveProvider>(black_box(&THREAD_POOL_4)))
    });
    group.finish();
}

criterion_group!(operators, bench_operators,);
