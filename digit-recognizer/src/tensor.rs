//! # Tensor utilities
//!
//! This module contains utilities to deal with dynamic ONNX tensors.
//!
//! Constant tensors (initializers) are decoded into [`TensorData`], which holds the actual array.
//! Graph inputs and outputs only carry a shape, decoded into a list of [`GraphDimension`].
use ndarray::{ArrayD, IxDyn};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use thiserror::Error;

use crate::onnx_format::{
    tensor_shape_proto::dimension::Value as DimensionValue, type_proto::Value as TypeValue,
    TensorProto, ValueInfoProto,
};

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("Invalid tensor element data type: {0}")]
    InvalidDataType(i32),
    #[error("Unsupported tensor element data type: {0:?}")]
    UnsupportedDataType(TensorDataType),
    #[error("Tensor {name} has {actual} elements, its dims require {expected}")]
    InvalidLength {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Tensor {name} has invalid dims {dims:?}")]
    InvalidDimensions { name: String, dims: Vec<i64> },
    #[error("Value {0} has no tensor type")]
    MissingType(String),
}

/// Enum representing the different types of data that can be stored in a tensor
/// in ONNX.
/// This is a subset of the types defined in the ONNX protobuf specification.
/// The tags are the same as the ones defined in the protobuf specification.
#[derive(Debug, Clone, Copy, FromPrimitive, ToPrimitive, PartialEq, Eq)]
pub enum TensorDataType {
    /// 32-bit floating point, equivalent to Rust's `f32`
    Float = 1,
    /// Unsigned 8-bit int, equivalent to Rust's `u8`
    Uint8,
    /// Signed 8-bit int, equivalent to Rust's `i8`
    Int8,
    /// Unsigned 16-bit int, equivalent to Rust's `u16`
    Uint16,
    /// Signed 16-bit int, equivalent to Rust's `i16`
    Int16,
    /// Signed 32-bit int, equivalent to Rust's `i32`
    Int32,
    /// Signed 64-bit int, equivalent to Rust's `i64`
    Int64,
    /// String, equivalent to Rust's `String`
    String,
    /// Boolean
    Bool,
    /// 16-bit floating point
    Float16,
    /// 64-bit floating point, equivalent to Rust's `f64`
    Double,
    /// Unsigned 32-bit int, equivalent to Rust's `u32`
    Uint32,
    /// Unsigned 64-bit int, equivalent to Rust's `u64`
    Uint64,
}

/// The data of a constant tensor.
///
/// Digit classifiers only need float weights and int64 shapes,
/// every other element type is widened into one of these two at decode time.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float(ArrayD<f32>),
    Int64(ArrayD<i64>),
}

impl TensorData {
    pub fn shape(&self) -> &[usize] {
        match self {
            TensorData::Float(x) => x.shape(),
            TensorData::Int64(x) => x.shape(),
        }
    }

    pub fn dtype(&self) -> TensorDataType {
        match self {
            TensorData::Float(_) => TensorDataType::Float,
            TensorData::Int64(_) => TensorDataType::Int64,
        }
    }

    /// Returns the data as floats, converting integers if needed.
    pub fn into_float(self) -> ArrayD<f32> {
        match self {
            TensorData::Float(x) => x,
            TensorData::Int64(x) => x.mapv(|v| v as f32),
        }
    }
}

impl TryFrom<TensorProto> for TensorData {
    type Error = TensorError;

    fn try_from(proto: TensorProto) -> Result<Self, Self::Error> {
        let name = proto.name.clone().unwrap_or_default();
        let dimensions = proto
            .dims
            .iter()
            .map(|x| usize::try_from(*x))
            .collect::<Result<Vec<usize>, _>>()
            .map_err(|_| TensorError::InvalidDimensions {
                name: name.clone(),
                dims: proto.dims.clone(),
            })?;
        if element_count(&dimensions).is_none() {
            return Err(TensorError::InvalidDimensions {
                name,
                dims: proto.dims,
            });
        }
        let raw_type = proto.data_type.unwrap_or_default();
        let element_data_type: TensorDataType =
            FromPrimitive::from_i32(raw_type).ok_or(TensorError::InvalidDataType(raw_type))?;

        match element_data_type {
            TensorDataType::Float => {
                let data: Vec<f32> = match proto.raw_data {
                    Some(raw_data) => raw_data
                        .chunks_exact(4)
                        .map(|x| f32::from_le_bytes([x[0], x[1], x[2], x[3]]))
                        .collect(),
                    None => proto.float_data,
                };
                Ok(TensorData::Float(into_array(name, &dimensions, data)?))
            }
            TensorDataType::Double => {
                let data: Vec<f32> = match proto.raw_data {
                    Some(raw_data) => raw_data
                        .chunks_exact(8)
                        .map(|x| {
                            f64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
                                as f32
                        })
                        .collect(),
                    None => proto.double_data.iter().map(|x| *x as f32).collect(),
                };
                Ok(TensorData::Float(into_array(name, &dimensions, data)?))
            }
            TensorDataType::Int64 => {
                let data: Vec<i64> = match proto.raw_data {
                    Some(raw_data) => raw_data
                        .chunks_exact(8)
                        .map(|x| {
                            i64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
                        })
                        .collect(),
                    None => proto.int64_data,
                };
                Ok(TensorData::Int64(into_array(name, &dimensions, data)?))
            }
            TensorDataType::Int32 => {
                let data: Vec<i64> = match proto.raw_data {
                    Some(raw_data) => raw_data
                        .chunks_exact(4)
                        .map(|x| i32::from_le_bytes([x[0], x[1], x[2], x[3]]) as i64)
                        .collect(),
                    None => proto.int32_data.iter().map(|x| *x as i64).collect(),
                };
                Ok(TensorData::Int64(into_array(name, &dimensions, data)?))
            }
            other => Err(TensorError::UnsupportedDataType(other)),
        }
    }
}

/// Number of elements of a tensor with these dims, `None` on overflow.
fn element_count(dimensions: &[usize]) -> Option<usize> {
    dimensions
        .iter()
        .try_fold(1usize, |count, dim| count.checked_mul(*dim))
}

fn into_array<T>(name: String, dimensions: &[usize], data: Vec<T>) -> Result<ArrayD<T>, TensorError> {
    let expected = element_count(dimensions).unwrap_or(usize::MAX);
    let actual = data.len();
    ArrayD::from_shape_vec(IxDyn(dimensions), data).map_err(|_| TensorError::InvalidLength {
        name,
        expected,
        actual,
    })
}

/// A dimension of a graph input or output.
/// It is either a fixed value or a named parameter (for example the batch size `N`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphDimension {
    Value(usize),
    Parameter(String),
}

impl GraphDimension {
    /// Returns true if the dimension can take the given value.
    pub fn accepts(&self, value: usize) -> bool {
        match self {
            GraphDimension::Value(v) => *v == value,
            GraphDimension::Parameter(_) => true,
        }
    }
}

/// The declared shape of a graph input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueShape {
    pub name: String,
    pub dims: Vec<GraphDimension>,
}

impl ValueShape {
    /// Resolves the shape, replacing every parameter with `1`.
    pub fn resolve_single(&self) -> Vec<usize> {
        self.dims
            .iter()
            .map(|dim| match dim {
                GraphDimension::Value(v) => *v,
                GraphDimension::Parameter(_) => 1,
            })
            .collect()
    }

    /// Returns true if the declared shape admits the given concrete shape.
    pub fn admits(&self, shape: &[usize]) -> bool {
        self.dims.len() == shape.len()
            && self
                .dims
                .iter()
                .zip(shape.iter())
                .all(|(dim, value)| dim.accepts(*value))
    }
}

impl std::fmt::Display for ValueShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims = self
            .dims
            .iter()
            .map(|dim| match dim {
                GraphDimension::Value(v) => v.to_string(),
                GraphDimension::Parameter(p) => p.clone(),
            })
            .collect::<Vec<_>>();
        write!(f, "{}: [{}]", self.name, dims.join(", "))
    }
}

impl TryFrom<ValueInfoProto> for ValueShape {
    type Error = TensorError;

    fn try_from(value_info: ValueInfoProto) -> Result<Self, Self::Error> {
        let name = value_info.name.unwrap_or_default();
        let Some(TypeValue::TensorType(tensor_type)) =
            value_info.r#type.and_then(|type_proto| type_proto.value)
        else {
            return Err(TensorError::MissingType(name));
        };
        let dims = tensor_type
            .shape
            .map(|shape| shape.dim)
            .unwrap_or_default()
            .into_iter()
            .map(|dim| match dim.value {
                Some(DimensionValue::DimValue(v)) if v > 0 => GraphDimension::Value(v as usize),
                Some(DimensionValue::DimParam(p)) => GraphDimension::Parameter(p),
                // unknown or non-positive dimensions behave like an unnamed parameter
                _ => GraphDimension::Parameter(String::new()),
            })
            .collect();
        Ok(Self { name, dims })
    }
}
