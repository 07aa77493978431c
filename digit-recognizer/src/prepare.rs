//! Conversion of a canvas snapshot into the normalized grid a digit classifier expects.
//!
//! The pipeline is:
//! 1. area-average the RGBA frame down to 28x28,
//! 2. composite every cell over the background colour of the [`Polarity`],
//! 3. reduce the four channels to one intensity ([`ChannelReduction`]),
//! 4. scale to [0, 1],
//! 5. flip the polarity if the ink is darker than the background.
//!
//! Every step is deterministic: the same frame always yields a bit-identical grid.

use image::{GrayImage, Luma};
use log::debug;
use ndarray::{Array4, ArrayD, Ix4};

use crate::{
    canvas::{RawCanvasFrame, CHANNELS},
    service::RecognitionError,
};

/// Side of the square grid fed to the model.
pub const GRID_SIDE: usize = 28;

/// How the RGBA channels of a pixel are reduced to a single intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelReduction {
    /// ITU-R BT.601 luma `0.299 R + 0.587 G + 0.114 B`.
    #[default]
    Luminance,
    /// Brightest of R, G and B.
    Max,
    /// Mean of R, G and B.
    Average,
    /// The alpha channel alone, for surfaces that only paint opacity.
    /// Opacity is ink whatever the polarity.
    Alpha,
}

impl ChannelReduction {
    /// Expects the colour channels already composited over the background.
    fn reduce(self, [r, g, b, a]: [f64; 4]) -> f64 {
        match self {
            ChannelReduction::Luminance => 0.299 * r + 0.587 * g + 0.114 * b,
            ChannelReduction::Max => r.max(g).max(b),
            ChannelReduction::Average => (r + g + b) / 3.0,
            ChannelReduction::Alpha => a,
        }
    }
}

/// Which of ink and background is bright on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// White ink on a black background, like the MNIST digits. Intensities are kept.
    #[default]
    InkIsBright,
    /// Black ink on a white background. Intensities are inverted.
    InkIsDark,
}

impl Polarity {
    /// Colour showing through transparent pixels: black under bright ink, white under dark ink.
    fn background(self) -> f64 {
        match self {
            Polarity::InkIsBright => 0.0,
            Polarity::InkIsDark => 255.0,
        }
    }
}

/// Blends the colour channels over an opaque `background`, keeping alpha as is.
fn composite([r, g, b, a]: [f64; 4], background: f64) -> [f64; 4] {
    let coverage = a / 255.0;
    let blend = |c: f64| c * coverage + background * (1.0 - coverage);
    [blend(r), blend(g), blend(b), a]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrepareConfig {
    pub reduction: ChannelReduction,
    pub polarity: Polarity,
}

/// A 28x28 single channel image with values in [0, 1], background 0 and ink 1.
///
/// It is stored with shape `[1, 28, 28, 1]`: a batch of one image, channels last.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedInputGrid {
    data: Array4<f32>,
}

impl NormalizedInputGrid {
    pub const SHAPE: [usize; 4] = [1, GRID_SIDE, GRID_SIDE, 1];

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn into_array(self) -> Array4<f32> {
        self.data
    }

    /// The value of the cell at row `y` and column `x`.
    pub fn cell(&self, x: usize, y: usize) -> f32 {
        self.data[[0, y, x, 0]]
    }

    /// Renders the grid as an 8-bit grayscale image, ink in white.
    pub fn to_luma_image(&self) -> GrayImage {
        GrayImage::from_fn(GRID_SIDE as u32, GRID_SIDE as u32, |x, y| {
            let value = self.cell(x as usize, y as usize);
            Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
        })
    }
}

impl TryFrom<ArrayD<f32>> for NormalizedInputGrid {
    type Error = RecognitionError;

    fn try_from(data: ArrayD<f32>) -> Result<Self, Self::Error> {
        if data.shape() != Self::SHAPE {
            return Err(RecognitionError::InvalidInputShape {
                expected: Self::SHAPE.to_vec(),
                actual: data.shape().to_vec(),
            });
        }
        let data = data
            .into_dimensionality::<Ix4>()
            .map_err(|e| RecognitionError::InferenceRuntime(e.to_string()))?;
        Ok(Self { data })
    }
}

/// For every destination cell along one axis, the source indices it covers
/// and the length of the overlap.
fn axis_weights(source_len: usize) -> Vec<Vec<(usize, f64)>> {
    let ratio = source_len as f64 / GRID_SIDE as f64;
    (0..GRID_SIDE)
        .map(|cell| {
            let start = cell as f64 * ratio;
            let end = (cell + 1) as f64 * ratio;
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(source_len);
            (first..last)
                .filter_map(|i| {
                    let overlap = end.min((i + 1) as f64) - start.max(i as f64);
                    (overlap > 0.0).then_some((i, overlap))
                })
                .collect()
        })
        .collect()
}

/// Area-averages the frame down to a 28x28 grid of RGBA values in [0, 255].
fn downsample(frame: &RawCanvasFrame) -> Vec<[f64; 4]> {
    let width = frame.width() as usize;
    let columns = axis_weights(width);
    let rows = axis_weights(frame.height() as usize);
    let pixels = frame.pixels();

    let mut cells = Vec::with_capacity(GRID_SIDE * GRID_SIDE);
    for row in &rows {
        for column in &columns {
            let mut sum = [0.0f64; 4];
            let mut area = 0.0;
            for &(y, wy) in row {
                for &(x, wx) in column {
                    let weight = wy * wx;
                    let offset = (y * width + x) * CHANNELS;
                    for (c, value) in sum.iter_mut().enumerate() {
                        *value += weight * pixels[offset + c] as f64;
                    }
                    area += weight;
                }
            }
            cells.push(sum.map(|v| if area > 0.0 { v / area } else { 0.0 }));
        }
    }
    cells
}

fn single_preprocessing(frame: &RawCanvasFrame, config: &PrepareConfig) -> Vec<f32> {
    downsample(frame)
        .into_iter()
        .map(|rgba| {
            let rgba = composite(rgba, config.polarity.background());
            let intensity = (config.reduction.reduce(rgba) / 255.0).clamp(0.0, 1.0);
            let normalized = match (config.reduction, config.polarity) {
                (ChannelReduction::Alpha, _) | (_, Polarity::InkIsBright) => intensity,
                (_, Polarity::InkIsDark) => 1.0 - intensity,
            };
            normalized as f32
        })
        .collect()
}

fn check_square(frame: &RawCanvasFrame) -> Result<(), RecognitionError> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    if width != height {
        return Err(RecognitionError::InvalidInputShape {
            expected: vec![height, height, CHANNELS],
            actual: vec![height, width, CHANNELS],
        });
    }
    Ok(())
}

/// Converts a square canvas snapshot into a [`NormalizedInputGrid`].
///
/// Fails with [`RecognitionError::InvalidInputShape`] when the frame is not square.
pub fn prepare(
    frame: &RawCanvasFrame,
    config: &PrepareConfig,
) -> Result<NormalizedInputGrid, RecognitionError> {
    check_square(frame)?;
    let data = Array4::from_shape_vec(
        NormalizedInputGrid::SHAPE,
        single_preprocessing(frame, config),
    )
    .map_err(|e| RecognitionError::InferenceRuntime(e.to_string()))?;
    debug!(
        "Prepared {}x{} frame ({:?}, {:?})",
        frame.width(),
        frame.height(),
        config.reduction,
        config.polarity
    );
    Ok(NormalizedInputGrid { data })
}

/// Converts several canvas snapshots into a single `[N, 28, 28, 1]` batch.
pub fn batch_prepare(
    frames: &[RawCanvasFrame],
    config: &PrepareConfig,
) -> Result<Array4<f32>, RecognitionError> {
    frames.iter().try_for_each(check_square)?;
    Array4::from_shape_vec(
        (frames.len(), GRID_SIDE, GRID_SIDE, 1),
        frames
            .iter()
            .flat_map(|frame| single_preprocessing(frame, config))
            .collect(),
    )
    .map_err(|e| RecognitionError::InferenceRuntime(e.to_string()))
}
