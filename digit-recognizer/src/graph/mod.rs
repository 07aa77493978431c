///
/// # Graph
///
/// This module defines the mapping between the ONNX standard and a Graph structure used to infer a ONNX model.
///
mod translator;
pub use translator::*;

use thiserror::Error;

use crate::tensor::TensorError;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("ConversionError: {0}")]
    ConversionError(String),

    #[error("Missing {operand} for Operator {operator} of type {operator_type}")]
    MissingOperand {
        operand: String,
        operator: String,
        operator_type: String,
    },

    #[error("Invalid attribute {attribute} for Operator {operator}: {reason}")]
    InvalidAttribute {
        attribute: String,
        operator: String,
        reason: String,
    },

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Input {input} not found for the child {child_name}")]
    ParentNotFound { child_name: String, input: String },

    #[error("Invalid initializer: {0}")]
    InvalidInitializer(#[from] TensorError),

    #[error("The model's graph is not a DAG")]
    Cycle,

    #[error("InputNodeParsingError")]
    InputNodeParsingError,

    #[error("OutputNodeParsingError")]
    OutputNodeParsingError,
}
