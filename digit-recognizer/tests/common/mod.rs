#![allow(dead_code)]

use digit_recognizer::onnx_format::{
    tensor_shape_proto::{dimension::Value as DimensionValue, Dimension},
    type_proto::Tensor as TypeTensorProto,
    type_proto::Value as TypeValueProto,
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto,
};
use digit_recognizer::{canvas::RawCanvasFrame, tensor::TensorDataType};
use prost::Message;

pub const PIXELS: usize = 28 * 28;
pub const CLASSES: usize = 10;

/// A dimension of a graph input or output: a number or a named parameter.
pub enum Dim {
    Fixed(i64),
    Param(&'static str),
}

pub fn value_info(name: &str, dims: &[Dim]) -> ValueInfoProto {
    ValueInfoProto {
        name: Some(String::from(name)),
        r#type: Some(TypeProto {
            value: Some(TypeValueProto::TensorType(TypeTensorProto {
                elem_type: Some(TensorDataType::Float as i32),
                shape: Some(TensorShapeProto {
                    dim: dims
                        .iter()
                        .map(|d| Dimension {
                            value: Some(match d {
                                Dim::Fixed(v) => DimensionValue::DimValue(*v),
                                Dim::Param(p) => DimensionValue::DimParam(String::from(*p)),
                            }),
                            ..Default::default()
                        })
                        .collect(),
                }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn float_tensor(name: &str, dims: &[i64], data: Vec<f32>) -> TensorProto {
    TensorProto {
        name: Some(String::from(name)),
        dims: dims.to_vec(),
        data_type: Some(TensorDataType::Float as i32),
        raw_data: Some(data.iter().flat_map(|x| x.to_le_bytes()).collect()),
        ..Default::default()
    }
}

pub fn node(op_type: &str, inputs: &[&str], output: &str) -> NodeProto {
    NodeProto {
        input: inputs.iter().map(|s| String::from(*s)).collect(),
        output: vec![String::from(output)],
        name: Some(format!("{}_{}", op_type, output)),
        op_type: Some(String::from(op_type)),
        ..Default::default()
    }
}

pub fn ints(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: Some(String::from(name)),
        ints: values.to_vec(),
        ..Default::default()
    }
}

fn model(graph: GraphProto) -> ModelProto {
    ModelProto {
        ir_version: Some(8),
        opset_import: vec![OperatorSetIdProto {
            domain: Some(String::new()),
            version: Some(13),
        }],
        producer_name: Some(String::from("digit-recognizer-tests")),
        graph: Some(graph),
        ..Default::default()
    }
}

/// Flatten -> Gemm -> Softmax over a channels-last `[1, 28, 28, 1]` input.
///
/// `weights` is the row-major `[784, 10]` matrix of the dense layer.
pub fn dense_softmax_model(weights: Vec<f32>, bias: Vec<f32>) -> ModelProto {
    dense_softmax_model_with_io(
        weights,
        bias,
        &[Dim::Fixed(1), Dim::Fixed(28), Dim::Fixed(28), Dim::Fixed(1)],
        &[Dim::Fixed(1), Dim::Fixed(CLASSES as i64)],
    )
}

pub fn dense_softmax_model_with_io(
    weights: Vec<f32>,
    bias: Vec<f32>,
    input_dims: &[Dim],
    output_dims: &[Dim],
) -> ModelProto {
    model(GraphProto {
        name: Some(String::from("dense")),
        node: vec![
            node("Flatten", &["image"], "flat"),
            node("Gemm", &["flat", "W", "b"], "logits"),
            node("Softmax", &["logits"], "probabilities"),
        ],
        initializer: vec![
            float_tensor("W", &[PIXELS as i64, CLASSES as i64], weights),
            float_tensor("b", &[CLASSES as i64], bias),
        ],
        input: vec![value_info("image", input_dims)],
        output: vec![value_info("probabilities", output_dims)],
        ..Default::default()
    })
}

/// Dense weights where only the column of `digit` is non-zero.
pub fn favoring(digit: usize) -> Vec<f32> {
    (0..PIXELS)
        .flat_map(|_| (0..CLASSES).map(move |k| if k == digit { 0.01 } else { 0.0 }))
        .collect()
}

/// Conv -> Relu -> MaxPool -> Reshape -> Gemm -> Softmax over a channels-first
/// `[N, 1, 28, 28]` input, like the networks exported from PyTorch.
///
/// The two filters detect ink and background, the dense layer maps
/// the ink to digit 1 and the background to digit 0.
pub fn conv_model() -> ModelProto {
    let mut conv = node("Conv", &["image", "conv_w", "conv_b"], "features");
    conv.attribute = vec![
        ints("kernel_shape", &[3, 3]),
        ints("pads", &[1, 1, 1, 1]),
    ];
    let mut pool = node("MaxPool", &["activations"], "pooled");
    pool.attribute = vec![ints("kernel_shape", &[2, 2]), ints("strides", &[2, 2])];
    let mut fc = node("Gemm", &["flat", "fc_w", "fc_b"], "logits");
    fc.attribute = vec![AttributeProto {
        name: Some(String::from("transB")),
        i: Some(1),
        ..Default::default()
    }];

    let pooled = 2 * 14 * 14;
    // ink filter averages the neighbourhood, background filter inverts it
    let conv_w = [vec![1.0 / 9.0; 9], vec![-1.0 / 9.0; 9]].concat();
    let conv_b = vec![0.0, 1.0];
    // transB: the weights are [classes, features]
    let fc_w = (0..CLASSES)
        .flat_map(|k| {
            (0..pooled).map(move |f| match (k, f < pooled / 2) {
                (1, true) => 0.05,
                (0, false) => 0.05,
                _ => 0.0,
            })
        })
        .collect();

    model(GraphProto {
        name: Some(String::from("conv")),
        node: vec![
            conv,
            node("Relu", &["features"], "activations"),
            pool,
            node("Reshape", &["pooled", "flat_shape"], "flat"),
            fc,
            node("Softmax", &["logits"], "probabilities"),
        ],
        initializer: vec![
            float_tensor("conv_w", &[2, 1, 3, 3], conv_w),
            float_tensor("conv_b", &[2], conv_b),
            float_tensor("fc_w", &[CLASSES as i64, pooled as i64], fc_w),
            float_tensor("fc_b", &[CLASSES as i64], vec![0.0; CLASSES]),
            TensorProto {
                name: Some(String::from("flat_shape")),
                dims: vec![2],
                data_type: Some(TensorDataType::Int64 as i32),
                int64_data: vec![1, -1],
                ..Default::default()
            },
        ],
        input: vec![value_info(
            "image",
            &[Dim::Param("N"), Dim::Fixed(1), Dim::Fixed(28), Dim::Fixed(28)],
        )],
        output: vec![value_info(
            "probabilities",
            &[Dim::Param("N"), Dim::Fixed(CLASSES as i64)],
        )],
        ..Default::default()
    })
}

pub fn to_bytes(model: &ModelProto) -> Vec<u8> {
    model.encode_to_vec()
}

/// A black 280x280 canvas with a white square of `side` pixels at (`x`, `y`).
pub fn canvas_with_square(x: u32, y: u32, side: u32) -> RawCanvasFrame {
    let mut image = image::RgbaImage::from_pixel(280, 280, image::Rgba([0, 0, 0, 255]));
    for py in y..y + side {
        for px in x..x + side {
            image.put_pixel(px, py, image::Rgba([255, 255, 255, 255]));
        }
    }
    RawCanvasFrame::from(image)
}
