//! Handwritten digit recognition.
//!
//! A canvas snapshot ([`canvas::RawCanvasFrame`]) is turned into a normalized 28x28 grid
//! by [`prepare::prepare`], fed to a digit classifier ([`model::Model`]) and the output
//! is interpreted into a ranked [`service::Prediction`].
//!
//! The bundled classifier runs ONNX models on the CPU, with the operators
//! usually found in MNIST networks.

pub mod canvas;
pub mod graph;
pub mod model;
pub mod onnx_format;
pub mod operators;
pub mod prepare;
pub mod providers;
pub mod service;
pub mod tensor;
