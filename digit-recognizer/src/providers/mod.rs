mod naive;
mod parallel;

pub use naive::*;
pub use parallel::*;

use ndarray::{Array1, ArrayD};
use rayon::ThreadPool;

use crate::operators::{
    ConvAttributes, FlattenAttributes, GemmAttributes, MaxPoolAttributes, OperationError,
    SoftmaxAttributes, TransposeAttributes,
};

pub type DefaultProvider = ParNaiveProvider;

/// A trait that has to be implemented by all the execution providers.
/// It contains the methods that are used to execute the ONNX operators.
/// Only the subset of the ONNX operators used by digit classifiers is supported.
///
/// All tensors are NCHW when they are 4-dimensional.
pub trait Provider {
    /// Returns the name of the execution provider.
    fn name(&self) -> &str;

    fn conv(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        weights: ArrayD<f32>,
        bias: Option<Array1<f32>>,
        attrs: ConvAttributes,
    ) -> Result<ArrayD<f32>, OperationError>;

    fn max_pool(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: MaxPoolAttributes,
    ) -> Result<ArrayD<f32>, OperationError>;

    fn gemm(
        thread_pool: &ThreadPool,
        a: ArrayD<f32>,
        b: ArrayD<f32>,
        c: Option<ArrayD<f32>>,
        attrs: GemmAttributes,
    ) -> Result<ArrayD<f32>, OperationError>;

    fn matmul(
        thread_pool: &ThreadPool,
        a: ArrayD<f32>,
        b: ArrayD<f32>,
    ) -> Result<ArrayD<f32>, OperationError>;

    fn relu(thread_pool: &ThreadPool, x: ArrayD<f32>) -> ArrayD<f32>;

    /// Element-wise addition with multidirectional (numpy style) broadcasting.
    fn add(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        y: ArrayD<f32>,
    ) -> Result<ArrayD<f32>, OperationError>;

    fn reshape(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        shape: ArrayD<i64>,
    ) -> Result<ArrayD<f32>, OperationError>;

    fn flatten(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: FlattenAttributes,
    ) -> Result<ArrayD<f32>, OperationError>;

    fn softmax(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: SoftmaxAttributes,
    ) -> Result<ArrayD<f32>, OperationError>;

    fn transpose(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: TransposeAttributes,
    ) -> Result<ArrayD<f32>, OperationError>;
}

/// Resolves a possibly negative axis against a tensor rank.
pub(crate) fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let axis = if axis < 0 { axis + rank as i64 } else { axis };
    (0..rank as i64).contains(&axis).then_some(axis as usize)
}

/// Computes the broadcast shape of two tensors following the numpy rules.
pub(crate) fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut shape = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(shape)
}
