use std::{fmt, ops::Index};

use log::debug;
use ndarray::{ArrayD, IxDyn};

use crate::{
    model::Model,
    prepare::{NormalizedInputGrid, GRID_SIDE},
};

use super::RecognitionError;

/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;

/// The score of every digit class, index `i` holding the score of digit `i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScores([f32; NUM_CLASSES]);

impl ClassScores {
    pub fn new(scores: [f32; NUM_CLASSES]) -> Self {
        Self(scores)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Index of the highest score. Ties go to the lowest index and NaN never wins over a number.
    /// When every score is NaN the answer is 0.
    pub fn argmax(&self) -> usize {
        (0..NUM_CLASSES)
            .filter(|&i| !self.0[i].is_nan())
            .fold(None, |best: Option<usize>, i| match best {
                Some(b) if self.0[b] >= self.0[i] => Some(b),
                _ => Some(i),
            })
            .unwrap_or(0)
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }

    /// Normalizes raw logits into probabilities.
    pub fn softmax(&self) -> Self {
        let max = self.0.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps = self.0.map(|x| (x - max).exp());
        let total = exps.iter().sum::<f32>();
        Self(exps.map(|x| x / total))
    }
}

impl Index<usize> for ClassScores {
    type Output = f32;

    fn index(&self, digit: usize) -> &f32 {
        &self.0[digit]
    }
}

impl TryFrom<ArrayD<f32>> for ClassScores {
    type Error = RecognitionError;

    /// Accepts a `[1, 10]` or `[10]` output tensor.
    fn try_from(output: ArrayD<f32>) -> Result<Self, Self::Error> {
        let shape = output.shape();
        if !matches!(shape, [1, NUM_CLASSES] | [NUM_CLASSES]) {
            return Err(RecognitionError::InferenceRuntime(format!(
                "expected {} class scores, the model produced shape {:?}",
                NUM_CLASSES, shape
            )));
        }
        let mut scores = [0.0; NUM_CLASSES];
        scores
            .iter_mut()
            .zip(output.iter())
            .for_each(|(score, value)| *score = *value);
        Ok(Self(scores))
    }
}

/// How the raw model output is turned into class scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Postprocessing {
    /// The model already ends with a softmax.
    #[default]
    AsIs,
    /// The model emits logits, a softmax is applied to them.
    Softmax,
}

/// The recognized digit with its confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Index of the highest score.
    pub digit: usize,
    /// Score of `digit` as a percentage.
    pub confidence: f32,
    pub scores: ClassScores,
}

impl Prediction {
    /// All the digits ordered by descending score, ties broken by the lower digit.
    /// NaN scores come last.
    pub fn ranked(&self) -> Vec<(usize, f32)> {
        let mut ranked = self
            .scores
            .as_slice()
            .iter()
            .copied()
            .enumerate()
            .collect::<Vec<_>>();
        // stable sort, equal scores keep the digit order
        ranked.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
            (false, false) => b.1.total_cmp(&a.1),
            (nan_a, nan_b) => nan_a.cmp(&nan_b),
        });
        ranked
    }

    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut ranked = self.ranked();
        ranked.truncate(k);
        ranked
    }

    /// The confidence rounded to one decimal place, for display.
    pub fn confidence_display(&self) -> String {
        format!("{:.1}", self.confidence)
    }
}

impl From<ClassScores> for Prediction {
    fn from(scores: ClassScores) -> Self {
        let digit = scores.argmax();
        Self {
            digit,
            confidence: scores[digit] * 100.0,
            scores,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}%)", self.digit, self.confidence_display())
    }
}

/// Runs the model on the grid and interprets its output.
///
/// The grid is handed to the model in the model's own input shape. Any shape holding
/// the 784 pixels in row-major order is accepted, so both channel layouts work.
pub fn predict<M>(
    model: &M,
    grid: &NormalizedInputGrid,
    postprocessing: Postprocessing,
) -> Result<Prediction, RecognitionError>
where
    M: Model + ?Sized,
{
    let input_shape = model.input_shape();
    if input_shape.iter().product::<usize>() != GRID_SIDE * GRID_SIDE {
        return Err(RecognitionError::InvalidInputShape {
            expected: input_shape.to_vec(),
            actual: NormalizedInputGrid::SHAPE.to_vec(),
        });
    }
    let input = grid
        .as_array()
        .clone()
        .into_dyn()
        .into_shape(IxDyn(input_shape))
        .map_err(|_| RecognitionError::InvalidInputShape {
            expected: input_shape.to_vec(),
            actual: NormalizedInputGrid::SHAPE.to_vec(),
        })?;

    let scores = ClassScores::try_from(model.forward(input)?)?;
    let scores = match postprocessing {
        Postprocessing::AsIs => scores,
        Postprocessing::Softmax => scores.softmax(),
    };
    let prediction = Prediction::from(scores);
    debug!("Predicted {}", prediction);
    Ok(prediction)
}
