use ndarray::{Array1, Array2, ArrayD, Axis, Ix2, IxDyn};

use crate::operators::{
    ConvAttributes, FlattenAttributes, GemmAttributes, MaxPoolAttributes, SoftmaxAttributes,
    TransposeAttributes,
};

use super::{broadcast_shape, normalize_axis, OperationError, Provider};
use rayon::ThreadPool;

pub struct NaiveProvider;

/// Output size and resolved padding of a 2D window operator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WindowGeometry {
    pub height: usize,
    pub width: usize,
    pub out_height: usize,
    pub out_width: usize,
    // w = width, h = height; s = start
    pub pad_hs: usize,
    pub pad_ws: usize,
    pub kern_h: usize,
    pub kern_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilat_h: usize,
    pub dilat_w: usize,
}

impl WindowGeometry {
    pub(crate) fn new(
        operator: &str,
        input: [usize; 2],
        kernel: [usize; 2],
        pads: [usize; 4],
        strides: [usize; 2],
        dilations: [usize; 2],
    ) -> Result<Self, OperationError> {
        let [height, width] = input;
        let [kern_h, kern_w] = kernel;
        let [pad_hs, pad_ws, pad_he, pad_we] = pads;
        let [stride_h, stride_w] = strides;
        let [dilat_h, dilat_w] = dilations;
        if kern_h == 0 || kern_w == 0 || stride_h == 0 || stride_w == 0 || dilat_h == 0 || dilat_w == 0
        {
            return Err(OperationError::InvalidAttribute(
                operator.to_string(),
                String::from("kernel, strides and dilations must be positive"),
            ));
        }
        // actual kernel size takes into account the dilation
        let act_kern_h = dilat_h * (kern_h - 1) + 1;
        let act_kern_w = dilat_w * (kern_w - 1) + 1;
        let padded_h = height + pad_hs + pad_he;
        let padded_w = width + pad_ws + pad_we;
        if padded_h < act_kern_h || padded_w < act_kern_w {
            return Err(OperationError::WrongShape(
                format!("[*, *, >={}, >={}]", act_kern_h, act_kern_w),
                format!("[*, *, {}, {}]", padded_h, padded_w),
            ));
        }
        Ok(Self {
            height,
            width,
            out_height: 1 + (padded_h - act_kern_h) / stride_h,
            out_width: 1 + (padded_w - act_kern_w) / stride_w,
            pad_hs,
            pad_ws,
            kern_h,
            kern_w,
            stride_h,
            stride_w,
            dilat_h,
            dilat_w,
        })
    }

    /// Maps an output position and a kernel offset to an input position, if it is not padding.
    #[inline]
    pub(crate) fn input_position(
        &self,
        out_row: usize,
        out_col: usize,
        kern_row: usize,
        kern_col: usize,
    ) -> Option<(usize, usize)> {
        let row = (out_row * self.stride_h + kern_row * self.dilat_h) as i64 - self.pad_hs as i64;
        let col = (out_col * self.stride_w + kern_col * self.dilat_w) as i64 - self.pad_ws as i64;
        if row < 0 || col < 0 || row >= self.height as i64 || col >= self.width as i64 {
            return None;
        }
        Some((row as usize, col as usize))
    }
}

/// Validated operands of a convolution.
pub(crate) struct ConvPlan {
    pub batch_size: usize,
    pub n_featmaps: usize,
    pub input_group_size: usize,
    pub output_group_size: usize,
    pub bias: Array1<f32>,
    pub geometry: WindowGeometry,
}

impl ConvPlan {
    pub(crate) fn new(
        x: &ArrayD<f32>,
        weights: &ArrayD<f32>,
        bias: Option<Array1<f32>>,
        attrs: &ConvAttributes,
    ) -> Result<Self, OperationError> {
        // checks
        let [batch_size, in_chans, height, width] = *x.shape() else {
            return Err(OperationError::WrongDim(4, x.ndim()));
        };
        let [n_featmaps, kern_chans, kern_h, kern_w] = *weights.shape() else {
            return Err(OperationError::WrongDim(4, weights.ndim()));
        };
        if let Some(kernel_shape) = attrs.kernel_shape {
            if kernel_shape != [kern_h, kern_w] {
                return Err(OperationError::WrongShape(
                    format!("[*, *, {}, {}]", kernel_shape[0], kernel_shape[1]),
                    format!("[*, *, {}, {}]", kern_h, kern_w),
                ));
            }
        }
        let n_groups = attrs.group;
        if n_groups == 0 || in_chans % n_groups != 0 || n_featmaps % n_groups != 0 {
            return Err(OperationError::InvalidAttribute(
                String::from("Conv"),
                format!("group {} does not divide the channels", n_groups),
            ));
        }
        let input_group_size = in_chans / n_groups;
        if kern_chans != input_group_size {
            return Err(OperationError::WrongShape(
                format!("[*, {}, *, *]", input_group_size),
                format!("[*, {}, *, *]", kern_chans),
            ));
        }
        let bias = bias.unwrap_or_else(|| Array1::zeros(n_featmaps));
        if bias.len() != n_featmaps {
            return Err(OperationError::WrongShape(
                format!("[{}]", n_featmaps),
                format!("[{}]", bias.len()),
            ));
        }
        let pads = attrs.auto_pad.resolve(
            attrs.pads,
            [height, width],
            [kern_h, kern_w],
            attrs.strides,
            attrs.dilations,
        );
        let geometry = WindowGeometry::new(
            "Conv",
            [height, width],
            [kern_h, kern_w],
            pads,
            attrs.strides,
            attrs.dilations,
        )?;
        Ok(Self {
            batch_size,
            n_featmaps,
            input_group_size,
            output_group_size: n_featmaps / n_groups,
            bias,
            geometry,
        })
    }

    /// Computes a single output feature map of a batch element.
    pub(crate) fn feature_map(
        &self,
        x: &ArrayD<f32>,
        weights: &ArrayD<f32>,
        batch: usize,
        featmap: usize,
    ) -> Array2<f32> {
        let g = &self.geometry;
        // get the group index of the feature map and compute input channel group bounds
        let group = featmap / self.output_group_size;
        let group_s = group * self.input_group_size;
        let group_e = group_s + self.input_group_size;

        Array2::from_shape_fn((g.out_height, g.out_width), |(out_row, out_col)| {
            let mut accumulator = self.bias[featmap];
            for channel in group_s..group_e {
                let group_channel = channel - group_s;
                for kern_row in 0..g.kern_h {
                    for kern_col in 0..g.kern_w {
                        if let Some((row, col)) =
                            g.input_position(out_row, out_col, kern_row, kern_col)
                        {
                            accumulator += x[[batch, channel, row, col]]
                                * weights[[featmap, group_channel, kern_row, kern_col]];
                        }
                    }
                }
            }
            accumulator
        })
    }
}

pub(crate) fn pool_geometry(
    x: &ArrayD<f32>,
    attrs: &MaxPoolAttributes,
) -> Result<(usize, usize, WindowGeometry), OperationError> {
    let [batch_size, in_chans, height, width] = *x.shape() else {
        return Err(OperationError::WrongDim(4, x.ndim()));
    };
    let pads = attrs.auto_pad.resolve(
        attrs.pads,
        [height, width],
        attrs.kernel_shape,
        attrs.strides,
        [1, 1],
    );
    let geometry = WindowGeometry::new(
        "MaxPool",
        [height, width],
        attrs.kernel_shape,
        pads,
        attrs.strides,
        [1, 1],
    )?;
    Ok((batch_size, in_chans, geometry))
}

/// Max pooling of a single channel of a batch element.
pub(crate) fn pool_channel(
    x: &ArrayD<f32>,
    geometry: &WindowGeometry,
    batch: usize,
    channel: usize,
) -> Array2<f32> {
    let g = geometry;
    Array2::from_shape_fn((g.out_height, g.out_width), |(out_row, out_col)| {
        let mut result = f32::MIN;
        for kern_row in 0..g.kern_h {
            for kern_col in 0..g.kern_w {
                if let Some((row, col)) = g.input_position(out_row, out_col, kern_row, kern_col) {
                    result = result.max(x[[batch, channel, row, col]]);
                }
            }
        }
        result
    })
}

/// Brings the Gemm operands into their 2D form, applying the transpositions.
pub(crate) fn gemm_operands(
    a: ArrayD<f32>,
    b: ArrayD<f32>,
    c: Option<ArrayD<f32>>,
    attrs: &GemmAttributes,
) -> Result<(Array2<f32>, Array2<f32>, Option<ArrayD<f32>>), OperationError> {
    if a.ndim() != 2 {
        return Err(OperationError::WrongDim(2, a.ndim()));
    }
    if b.ndim() != 2 {
        return Err(OperationError::WrongDim(2, b.ndim()));
    }
    let to_matrix = |m: ArrayD<f32>, transpose: bool| {
        m.into_dimensionality::<Ix2>()
            .map(|m| if transpose { m.reversed_axes() } else { m })
            .map_err(|e| OperationError::WrongShape(String::from("[*, *]"), e.to_string()))
    };
    let act_a = to_matrix(a, attrs.trans_a)?;
    let act_b = to_matrix(b, attrs.trans_b)?;

    if act_a.shape()[1] != act_b.shape()[0] {
        return Err(OperationError::UnexpectedShape(
            format!("[{}, {}]", act_a.shape()[0], act_a.shape()[1]),
            format!("[{}, {}]", act_b.shape()[0], act_b.shape()[1]),
        ));
    }
    if let Some(c) = &c {
        let out = [act_a.shape()[0], act_b.shape()[1]];
        if broadcast_shape(c.shape(), &out).as_deref() != Some(&out[..]) {
            return Err(OperationError::UnexpectedShape(
                format!("{:?}", out),
                format!("{:?}", c.shape()),
            ));
        }
    }
    Ok((act_a, act_b, c))
}

pub(crate) fn add_bias(
    product: Array2<f32>,
    c: Option<ArrayD<f32>>,
    beta: f32,
) -> Result<ArrayD<f32>, OperationError> {
    let product = product.into_dyn();
    match c {
        None => Ok(product),
        Some(c) => {
            let c = c.broadcast(product.raw_dim()).ok_or_else(|| {
                OperationError::UnexpectedShape(
                    format!("{:?}", product.shape()),
                    format!("{:?}", c.shape()),
                )
            })?;
            Ok(product + &c.mapv(|v| beta * v))
        }
    }
}

impl Provider for NaiveProvider {
    fn name(&self) -> &str {
        "Naive"
    }

    fn conv(
        _thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        weights: ArrayD<f32>,
        bias: Option<Array1<f32>>,
        attrs: ConvAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        let plan = ConvPlan::new(&x, &weights, bias, &attrs)?;
        let g = plan.geometry;
        let out_shape = [plan.batch_size, plan.n_featmaps, g.out_height, g.out_width];

        // result tensor
        let mut output = ArrayD::<f32>::zeros(IxDyn(&out_shape));
        for batch in 0..plan.batch_size {
            for featmap in 0..plan.n_featmaps {
                let map = plan.feature_map(&x, &weights, batch, featmap);
                output
                    .index_axis_mut(Axis(0), batch)
                    .index_axis_mut(Axis(0), featmap)
                    .assign(&map);
            }
        }
        Ok(output)
    }

    fn max_pool(
        _thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: MaxPoolAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        let (batch_size, in_chans, g) = pool_geometry(&x, &attrs)?;
        let out_shape = [batch_size, in_chans, g.out_height, g.out_width];

        let mut output = ArrayD::<f32>::zeros(IxDyn(&out_shape));
        for batch in 0..batch_size {
            for channel in 0..in_chans {
                let pooled = pool_channel(&x, &g, batch, channel);
                output
                    .index_axis_mut(Axis(0), batch)
                    .index_axis_mut(Axis(0), channel)
                    .assign(&pooled);
            }
        }
        Ok(output)
    }

    fn gemm(
        _thread_pool: &ThreadPool,
        a: ArrayD<f32>,
        b: ArrayD<f32>,
        c: Option<ArrayD<f32>>,
        attrs: GemmAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        let (act_a, act_b, c) = gemm_operands(a, b, c, &attrs)?;
        add_bias(attrs.alpha * act_a.dot(&act_b), c, attrs.beta)
    }

    fn matmul(
        _thread_pool: &ThreadPool,
        a: ArrayD<f32>,
        b: ArrayD<f32>,
    ) -> Result<ArrayD<f32>, OperationError> {
        let (act_a, act_b, _) = gemm_operands(a, b, None, &GemmAttributes::default())?;
        Ok(act_a.dot(&act_b).into_dyn())
    }

    fn relu(_thread_pool: &ThreadPool, x: ArrayD<f32>) -> ArrayD<f32> {
        x.mapv(|v| v.max(0.0))
    }

    fn add(
        _thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        y: ArrayD<f32>,
    ) -> Result<ArrayD<f32>, OperationError> {
        if x.shape() == y.shape() {
            return Ok(x + y);
        }
        let incompatible = || {
            OperationError::UnexpectedShape(format!("{:?}", x.shape()), format!("{:?}", y.shape()))
        };
        let shape = broadcast_shape(x.shape(), y.shape()).ok_or_else(incompatible)?;
        let lhs = x.broadcast(IxDyn(&shape)).ok_or_else(incompatible)?;
        let rhs = y.broadcast(IxDyn(&shape)).ok_or_else(incompatible)?;
        Ok(&lhs + &rhs)
    }

    fn reshape(
        _thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        shape: ArrayD<i64>,
    ) -> Result<ArrayD<f32>, OperationError> {
        if shape.ndim() != 1 {
            return Err(OperationError::WrongDim(1, shape.ndim()));
        }
        let xshape = x.shape().to_vec();
        let mut new_shape = Vec::with_capacity(shape.len());
        let mut inferred = None;
        for (i, dim) in shape.iter().enumerate() {
            match *dim {
                0 => new_shape.push(*xshape.get(i).ok_or_else(|| {
                    OperationError::InvalidAttribute(
                        String::from("Reshape"),
                        format!("dimension {} cannot be copied from the input", i),
                    )
                })?),
                -1 if inferred.is_none() => {
                    inferred = Some(i);
                    new_shape.push(1);
                }
                d if d > 0 => new_shape.push(d as usize),
                d => {
                    return Err(OperationError::InvalidAttribute(
                        String::from("Reshape"),
                        format!("invalid dimension {}", d),
                    ))
                }
            }
        }
        let total = xshape.iter().product::<usize>();
        if let Some(i) = inferred {
            let known = new_shape.iter().product::<usize>();
            if known == 0 || total % known != 0 {
                return Err(OperationError::WrongShape(
                    format!("{:?}", shape.as_slice().unwrap_or_default()),
                    format!("{:?}", xshape),
                ));
            }
            new_shape[i] = total / known;
        }
        if new_shape.iter().product::<usize>() != total {
            return Err(OperationError::WrongShape(
                format!("{:?}", new_shape),
                format!("{:?}", xshape),
            ));
        }
        x.as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&new_shape))
            .map_err(|e| OperationError::WrongShape(format!("{:?}", new_shape), e.to_string()))
    }

    fn flatten(
        thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: FlattenAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        // the axis may be equal to the rank, in which case the second dimension is 1
        let rank = x.ndim();
        let axis = if attrs.axis < 0 {
            attrs.axis + rank as i64
        } else {
            attrs.axis
        };
        if !(0..=rank as i64).contains(&axis) {
            return Err(OperationError::InvalidAttribute(
                String::from("Flatten"),
                format!("axis {} for rank {}", attrs.axis, rank),
            ));
        }
        let axis = axis as usize;
        let outer = x.shape()[..axis].iter().product::<usize>() as i64;
        let inner = x.shape()[axis..].iter().product::<usize>() as i64;
        Self::reshape(thread_pool, x, ndarray::arr1(&[outer, inner]).into_dyn())
    }

    fn softmax(
        _thread_pool: &ThreadPool,
        mut x: ArrayD<f32>,
        attrs: SoftmaxAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        let axis = normalize_axis(attrs.axis, x.ndim()).ok_or_else(|| {
            OperationError::InvalidAttribute(
                String::from("Softmax"),
                format!("axis {} for rank {}", attrs.axis, x.ndim()),
            )
        })?;
        for mut lane in x.lanes_mut(Axis(axis)) {
            let max = lane.fold(f32::NEG_INFINITY, |acc, v| acc.max(*v));
            lane.mapv_inplace(|v| (v - max).exp());
            let sum = lane.sum();
            lane.mapv_inplace(|v| v / sum);
        }
        Ok(x)
    }

    fn transpose(
        _thread_pool: &ThreadPool,
        x: ArrayD<f32>,
        attrs: TransposeAttributes,
    ) -> Result<ArrayD<f32>, OperationError> {
        let rank = x.ndim();
        let perm = attrs
            .perm
            .unwrap_or_else(|| (0..rank).rev().collect::<Vec<_>>());
        let mut seen = vec![false; rank];
        let valid = perm.len() == rank
            && perm
                .iter()
                .all(|&p| p < rank && !std::mem::replace(&mut seen[p], true));
        if !valid {
            return Err(OperationError::InvalidAttribute(
                String::from("Transpose"),
                format!("{:?} is not a permutation of {} axes", perm, rank),
            ));
        }
        Ok(x.permuted_axes(IxDyn(&perm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use rayon::ThreadPoolBuilder;

    fn pool() -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(1).build().unwrap()
    }

    fn ramp(shape: &[usize]) -> ArrayD<f32> {
        let len = shape.iter().product::<usize>();
        ArrayD::from_shape_vec(IxDyn(shape), (0..len).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn conv_with_padding_sums_neighbourhood() {
        let x = ArrayD::<f32>::ones(IxDyn(&[1, 1, 4, 4]));
        let weights = ArrayD::<f32>::ones(IxDyn(&[1, 1, 3, 3]));
        let attrs = ConvAttributes::new([1, 1], 1, Some([3, 3]), [1, 1, 1, 1], [1, 1]);
        let y = NaiveProvider::conv(&pool(), x, weights, Some(arr1(&[0.5])), attrs).unwrap();
        assert_eq!(y.shape(), &[1, 1, 4, 4]);
        assert_eq!(y[[0, 0, 0, 0]], 4.5);
        assert_eq!(y[[0, 0, 0, 1]], 6.5);
        assert_eq!(y[[0, 0, 1, 1]], 9.5);
    }

    #[test]
    fn conv_rejects_mismatching_kernel_shape() {
        let x = ArrayD::<f32>::ones(IxDyn(&[1, 1, 4, 4]));
        let weights = ArrayD::<f32>::ones(IxDyn(&[1, 1, 3, 3]));
        let attrs = ConvAttributes::new([1, 1], 1, Some([5, 5]), [0, 0, 0, 0], [1, 1]);
        assert!(NaiveProvider::conv(&pool(), x, weights, None, attrs).is_err());
    }

    #[test]
    fn max_pool_picks_window_maximum() {
        let x = ramp(&[1, 1, 4, 4]);
        let attrs = MaxPoolAttributes::new([2, 2], [0, 0, 0, 0], [2, 2]);
        let y = NaiveProvider::max_pool(&pool(), x, attrs).unwrap();
        assert_eq!(
            y,
            arr2(&[[5.0f32, 7.0], [13.0, 15.0]])
                .into_shape((1, 1, 2, 2))
                .unwrap()
                .into_dyn()
        );
    }

    #[test]
    fn gemm_with_transposed_b_and_bias() {
        let a = arr2(&[[1.0, 2.0]]).into_dyn();
        let b = arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]).into_dyn();
        let c = arr1(&[1.0, 1.0, 1.0]).into_dyn();
        let attrs = GemmAttributes::new(1.0, 2.0, false, true);
        let y = NaiveProvider::gemm(&pool(), a, b, Some(c), attrs).unwrap();
        assert_eq!(y, arr2(&[[3.0f32, 4.0, 5.0]]).into_dyn());
    }

    #[test]
    fn add_broadcasts_bias() {
        let x = ArrayD::<f32>::zeros(IxDyn(&[1, 2, 2, 2]));
        let y = arr1(&[1.0, 2.0]).into_dyn();
        let z = NaiveProvider::add(&pool(), x, y).unwrap();
        assert_eq!(z.shape(), &[1, 2, 2, 2]);
        assert_eq!(z[[0, 1, 1, 0]], 1.0);
        assert_eq!(z[[0, 1, 1, 1]], 2.0);

        let bad = NaiveProvider::add(&pool(), ramp(&[2, 3]), ramp(&[2]));
        assert!(bad.is_err());
    }

    #[test]
    fn reshape_infers_and_copies_dimensions() {
        let x = ramp(&[2, 3, 4]);
        let y = NaiveProvider::reshape(&pool(), x.clone(), arr1(&[0, -1]).into_dyn()).unwrap();
        assert_eq!(y.shape(), &[2, 12]);

        let wrong = NaiveProvider::reshape(&pool(), x, arr1(&[5, -1]).into_dyn());
        assert!(wrong.is_err());
    }

    #[test]
    fn flatten_handles_negative_axis() {
        let x = ramp(&[1, 28, 28, 1]);
        let y = NaiveProvider::flatten(&pool(), x.clone(), FlattenAttributes { axis: 1 }).unwrap();
        assert_eq!(y.shape(), &[1, 784]);
        let y = NaiveProvider::flatten(&pool(), x.clone(), FlattenAttributes { axis: -1 }).unwrap();
        assert_eq!(y.shape(), &[784, 1]);
        let y = NaiveProvider::flatten(&pool(), x, FlattenAttributes { axis: 4 }).unwrap();
        assert_eq!(y.shape(), &[784, 1]);
    }

    #[test]
    fn softmax_normalizes_last_axis() {
        let x = arr2(&[[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]]).into_dyn();
        let y = NaiveProvider::softmax(&pool(), x, SoftmaxAttributes { axis: -1 }).unwrap();
        for row in y.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!((y[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn transpose_moves_channels_first() {
        let x = ramp(&[1, 2, 3, 4]);
        let perm = TransposeAttributes {
            perm: Some(vec![0, 3, 1, 2]),
        };
        let y = NaiveProvider::transpose(&pool(), x.clone(), perm).unwrap();
        assert_eq!(y.shape(), &[1, 4, 2, 3]);
        assert_eq!(y[[0, 3, 1, 2]], x[[0, 1, 2, 3]]);

        let invalid = TransposeAttributes {
            perm: Some(vec![0, 0, 1, 2]),
        };
        assert!(NaiveProvider::transpose(&pool(), x, invalid).is_err());
    }
}
