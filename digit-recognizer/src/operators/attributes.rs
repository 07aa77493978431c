/// How the spatial padding of a window operator is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoPad {
    /// Use the explicit `pads` attribute.
    #[default]
    NotSet,
    Valid,
    /// Extra padding goes at the end.
    SameUpper,
    /// Extra padding goes at the beginning.
    SameLower,
}

impl AutoPad {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NOTSET" | "" => Some(Self::NotSet),
            "VALID" => Some(Self::Valid),
            "SAME_UPPER" => Some(Self::SameUpper),
            "SAME_LOWER" => Some(Self::SameLower),
            _ => None,
        }
    }

    /// Computes `[pad_hs, pad_ws, pad_he, pad_we]` for an input of size `[height, width]`.
    pub fn resolve(
        &self,
        explicit: [usize; 4],
        input: [usize; 2],
        kernel: [usize; 2],
        strides: [usize; 2],
        dilations: [usize; 2],
    ) -> [usize; 4] {
        match self {
            AutoPad::NotSet => explicit,
            AutoPad::Valid => [0, 0, 0, 0],
            AutoPad::SameUpper | AutoPad::SameLower => {
                let mut begin = [0; 2];
                let mut end = [0; 2];
                for axis in 0..2 {
                    // degenerate sizes are rejected later by the window geometry
                    let stride = strides[axis].max(1);
                    let out = input[axis].div_ceil(stride);
                    let act_kernel = dilations[axis] * kernel[axis].saturating_sub(1) + 1;
                    let needed = (out.saturating_sub(1) * stride + act_kernel)
                        .saturating_sub(input[axis]);
                    let small = needed / 2;
                    let large = needed - small;
                    (begin[axis], end[axis]) = if *self == AutoPad::SameUpper {
                        (small, large)
                    } else {
                        (large, small)
                    };
                }
                [begin[0], begin[1], end[0], end[1]]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvAttributes {
    // assuming 4D tensors
    pub auto_pad: AutoPad,
    pub dilations: [usize; 2],
    pub group: usize,
    /// When absent it is inferred from the weights.
    pub kernel_shape: Option<[usize; 2]>,
    pub pads: [usize; 4],
    pub strides: [usize; 2],
}

impl ConvAttributes {
    pub fn new(
        dilations: [usize; 2],
        group: usize,
        kernel_shape: Option<[usize; 2]>,
        pads: [usize; 4],
        strides: [usize; 2],
    ) -> Self {
        Self {
            auto_pad: AutoPad::NotSet,
            dilations,
            group,
            kernel_shape,
            pads,
            strides,
        }
    }

    pub fn with_auto_pad(mut self, auto_pad: AutoPad) -> Self {
        self.auto_pad = auto_pad;
        self
    }
}

impl Default for ConvAttributes {
    fn default() -> Self {
        ConvAttributes {
            auto_pad: AutoPad::NotSet,
            dilations: [1, 1],
            group: 1,
            kernel_shape: None,
            pads: [0, 0, 0, 0],
            strides: [1, 1],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaxPoolAttributes {
    pub auto_pad: AutoPad,
    pub kernel_shape: [usize; 2],
    pub pads: [usize; 4],
    pub strides: [usize; 2],
}

impl MaxPoolAttributes {
    pub fn new(kernel_shape: [usize; 2], pads: [usize; 4], strides: [usize; 2]) -> Self {
        Self {
            auto_pad: AutoPad::NotSet,
            kernel_shape,
            pads,
            strides,
        }
    }

    pub fn with_auto_pad(mut self, auto_pad: AutoPad) -> Self {
        self.auto_pad = auto_pad;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GemmAttributes {
    pub alpha: f32,
    pub beta: f32,
    pub trans_a: bool,
    pub trans_b: bool,
}

impl GemmAttributes {
    pub fn new(alpha: f32, beta: f32, trans_a: bool, trans_b: bool) -> Self {
        Self {
            alpha,
            beta,
            trans_a,
            trans_b,
        }
    }
}

impl Default for GemmAttributes {
    fn default() -> Self {
        Self::new(1.0, 1.0, false, false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlattenAttributes {
    pub axis: i64,
}

impl Default for FlattenAttributes {
    fn default() -> Self {
        Self { axis: 1 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxAttributes {
    pub axis: i64,
}

impl Default for SoftmaxAttributes {
    fn default() -> Self {
        Self { axis: -1 }
    }
}

/// A missing permutation reverses the axes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransposeAttributes {
    pub perm: Option<Vec<usize>>,
}
