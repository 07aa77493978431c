pub mod bench_operators;
pub mod bench_preprocessing;
