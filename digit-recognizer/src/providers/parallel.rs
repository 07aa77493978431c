use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::operators::{
    ConvAttributes, FlattenAttributes, GemmAttributes, MaxPoolAttributes, SoftmaxAttributes,
    TransposeAttributes,
};

use super::naive::{add_bias, gemm_operands, pool_channel, pool_geometry, ConvPlan};
use super::{NaiveProvider, OperationError, Provider};

/// Naive provider that spreads the heavy operators over the thread pool.
/// Each (batch, channel) plane is computed by its own task, then the planes are stitched together.
pub struct ParNaiveProvider;

fn stitch_planes(
    shape: [usize; 4],
    planes: Vec<((usize, usize), Array2<f32>)>,
) -> ArrayD<f32> {
    let mut output = ArrayD::<f32>::zeros(IxDyn(&shape));
    for ((batch, channel), plane) in planes {
        output
            .index_axis_mut(Axis(0), batch)
            .index_axis_mut(Axis(0), channel)
            .assign(&plane);
    }
    output
}

impl Provider for ParNaiveProvider {
    fn name(&self) -> &str {
        "ParNaive"
    }

    fn conv(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        weights: ArrayD<f32>,
        bias: Option<Array1<f32>>,
        attrs: ConvAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        if thread_pool.current_num_threads() == 1 {
            return NaiveProvider::conv(thread_pool, x, weights, bias, attrs);
        }
        let plan = ConvPlan::new(&x, &weights, bias, &attrs)?;
        let g = plan.geometry;
        let out_shape = [plan.batch_size, plan.n_featmaps, g.out_height, g.out_width];

        let planes = thread_pool.install(|| {
            (0..plan.batch_size * plan.n_featmaps)
                .into_par_iter()
                .map(|i| {
                    let (batch, featmap) = (i / plan.n_featmaps, i % plan.n_featmaps);
                    (
                        (batch, featmap),
                        plan.feature_map(&x, &weights, batch, featmap),
                    )
                })
                .collect::<Vec<_>>()
        });
        Ok(stitch_planes(out_shape, planes))
    }

    fn max_pool(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: MaxPoolAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        if thread_pool.current_num_threads() == 1 {
            return NaiveProvider::max_pool(thread_pool, x, attrs);
        }
        let (batch_size, in_chans, g) = pool_geometry(&x, &attrs)?;
        let out_shape = [batch_size, in_chans, g.out_height, g.out_width];

        let planes = thread_pool.install(|| {
            (0..batch_size * in_chans)
                .into_par_iter()
                .map(|i| {
                    let (batch, channel) = (i / in_chans, i % in_chans);
                    ((batch, channel), pool_channel(&x, &g, batch, channel))
                })
                .collect::<Vec<_>>()
        });
        Ok(stitch_planes(out_shape, planes))
    }

    fn gemm(
        thread_pool: &ThreadPool,
        a: ArrayD<f32>,
        b: ArrayD<f32>,
        c: Option<ArrayD<f32>>,
        attrs: GemmAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        if thread_pool.current_num_threads() == 1 {
            return NaiveProvider::gemm(thread_pool, a, b, c, attrs);
        }
        let (act_a, act_b, c) = gemm_operands(a, b, c, &attrs)?;
        let n_rows = act_a.shape()[0];
        let n_cols = act_b.shape()[1];

        // each output row is an independent vector-matrix product
        let rows = thread_pool.install(|| {
            (0..n_rows)
                .into_par_iter()
                .flat_map_iter(|i| (attrs.alpha * act_a.row(i).dot(&act_b)).to_vec())
                .collect::<Vec<f32>>()
        });
        let product = Array2::from_shape_vec((n_rows, n_cols), rows).map_err(|e| {
            OperationError::WrongShape(format!("[{}, {}]", n_rows, n_cols), e.to_string())
        })?;
        add_bias(product, c, attrs.beta)
    }

    fn matmul(
        thread_pool: &ThreadPool,
        a: ArrayD<f32>,
        b: ArrayD<f32>,
    ) -> Result<ArrayD<f32>, OperationError> {
        Self::gemm(thread_pool, a, b, None, GemmAttributes::default())
    }

    fn relu(thread_pool: &ThreadPool, x: ArrayD<f32>) -> ArrayD<f32> {
        NaiveProvider::relu(thread_pool, x)
    }

    fn add(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        y: ArrayD<f32>,
    ) -> Result<ArrayD<f32>, OperationError> {
        NaiveProvider::add(thread_pool, x, y)
    }

    fn reshape(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        shape: ArrayD<i64>,
    ) -> Result<ArrayD<f32>, OperationError> {
        NaiveProvider::reshape(thread_pool, x, shape)
    }

    fn flatten(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: FlattenAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        NaiveProvider::flatten(thread_pool, x, attrs)
    }

    fn softmax(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: SoftmaxAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        NaiveProvider::softmax(thread_pool, x, attrs)
    }

    fn transpose(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: TransposeAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        NaiveProvider::transpose(thread_pool, x, attrs)
    }
}
