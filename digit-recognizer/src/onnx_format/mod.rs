///
/// # ONNX Format
///
/// This module contains the ONNX format related code.
///
/// The ONNX format is defined in the [ONNX specification](https://github.com/onnx/onnx/blob/main/docs/IR.md).
///
/// Only the messages and fields needed to execute a digit classifier are declared here,
/// with the same tags as the official `onnx.proto`. Unknown fields are skipped by the decoder,
/// so complete models exported by the usual converters decode without loss of the parts we use.
///
mod onnx_model;

pub use onnx_model::*;
