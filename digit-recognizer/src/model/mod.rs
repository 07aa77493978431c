//! Contains the model abstraction used by the recognizer and its ONNX implementation.
//!
//! A [`ModelProvider`] resolves the model once, at startup. The resulting [`Model`] is immutable
//! and can be shared by every following inference.
//!
//! The bundled implementation is [`OnnxModel`], acquired through an [`OnnxModelProvider`],
//! which executes the ONNX graph with the execution providers of this crate.

mod onnx;
mod provider;

pub use onnx::*;
pub use provider::*;

use ndarray::ArrayD;
use thiserror::Error;

use crate::{graph::GraphError, service::RecognitionError, tensor::ValueShape};

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Unable to read the model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("The model artifact is not a valid ONNX model: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("The model could not be translated into an executable graph: {0}")]
    Graph(#[from] GraphError),
    #[error("The model input {0} is not a single 28x28 grayscale image")]
    UnexpectedInputShape(ValueShape),
    #[error("The model output {0} is not a vector of 10 class scores")]
    UnexpectedOutputShape(ValueShape),
    #[error("Unable to create the thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Execution settings of a model.
#[derive(Clone, Debug)]
pub struct Config {
    pub num_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { num_threads: 1 }
    }
}

/// A digit classification model.
///
/// Implementations are read-only once built: `forward` takes `&self`
/// and the same instance serves every recognition request.
pub trait Model: Send + Sync {
    /// The shape of a single-sample input, in row-major order.
    fn input_shape(&self) -> &[usize];

    /// Runs the model on an input of shape [`Model::input_shape`]
    /// and returns the raw output tensor.
    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, RecognitionError>;
}

impl<M: Model + ?Sized> Model for std::sync::Arc<M> {
    fn input_shape(&self) -> &[usize] {
        (**self).input_shape()
    }

    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, RecognitionError> {
        (**self).forward(input)
    }
}

/// Resolves a ready-to-use model.
///
/// Acquisition may be slow (reading and translating the artifact), it is meant to run once.
/// It fails with [`RecognitionError::ModelLoad`] when the artifact is missing, corrupt,
/// or does not have the expected input and output shapes.
pub trait ModelProvider {
    type Model: Model;

    fn acquire(&self) -> Result<Self::Model, RecognitionError>;
}
