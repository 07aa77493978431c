///
/// # Operators
///
/// This module define the ONNX operators structures.
///
/// Currently it only defines the subset of operators used by digit classifiers:
/// convolutional and fully connected networks exported from the usual training frameworks.
///
mod attributes;

pub use attributes::*;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum OperationError {
    #[error("Expected a tensor of rank {0}, found rank {1}")]
    WrongDim(usize, usize),
    #[error("Expected shape {0}, found {1}")]
    WrongShape(String, String),
    #[error("Shapes {0} and {1} are not compatible")]
    UnexpectedShape(String, String),
    #[error("Operator {0} received an invalid tensor type for input {1}")]
    InvalidTensorType(String, String),
    #[error("Operator {operator} is missing input {input}")]
    MissingInput { operator: String, input: String },
    #[error("Invalid attribute value for operator {0}: {1}")]
    InvalidAttribute(String, String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Convolution(ConvAttributes),
    MaxPool(MaxPoolAttributes),
    ReLU,
    Add,
    MatMul,
    Gemm(GemmAttributes),
    Reshape,
    Flatten(FlattenAttributes),
    Softmax(SoftmaxAttributes),
    Transpose(TransposeAttributes),
    /// Dropout and Identity: inference passes the input through.
    Identity,
}

impl Operator {
    pub fn name(&self) -> String {
        match self {
            Operator::Convolution(_) => "Conv",
            Operator::MaxPool(_) => "MaxPool",
            Operator::ReLU => "Relu",
            Operator::Add => "Add",
            Operator::MatMul => "MatMul",
            Operator::Gemm(_) => "Gemm",
            Operator::Reshape => "Reshape",
            Operator::Flatten(_) => "Flatten",
            Operator::Softmax(_) => "Softmax",
            Operator::Transpose(_) => "Transpose",
            Operator::Identity => "Identity",
        }
        .to_string()
    }
}
