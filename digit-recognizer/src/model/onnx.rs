use std::collections::HashMap;

use log::{debug, info, trace};
use ndarray::{ArrayD, Ix1};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{
    graph::{to_exec_graph, ExecutableGraph, GraphNode},
    onnx_format::ModelProto,
    operators::{OperationError, Operator},
    prepare::GRID_SIDE,
    providers::{DefaultProvider, Provider},
    service::{RecognitionError, NUM_CLASSES},
    tensor::{TensorData, ValueShape},
};

use super::{Config, Model, ModelLoadError};

/// Memory layout of the image expected by a model.
///
/// With a single channel both layouts hold the pixels in the same row-major order,
/// only the position of the channel axis differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// `[N, 28, 28, 1]`, as exported by Keras.
    ChannelsLast,
    /// `[N, 1, 28, 28]`, as exported by PyTorch.
    ChannelsFirst,
}

/// A digit classifier executed from an ONNX graph.
pub struct OnnxModel {
    graph: ExecutableGraph,
    input_shape: Vec<usize>,
    layout: InputLayout,
    config: Config,
    thread_pool: ThreadPool,
}

impl OnnxModel {
    /// Translates the model and checks that it classifies a single 28x28 image into 10 classes.
    pub fn new(model: ModelProto, config: Config) -> Result<Self, ModelLoadError> {
        let graph = to_exec_graph(model)?;
        let layout = input_layout(&graph.input)
            .ok_or_else(|| ModelLoadError::UnexpectedInputShape(graph.input.clone()))?;
        if !is_class_scores(&graph.output) {
            return Err(ModelLoadError::UnexpectedOutputShape(graph.output.clone()));
        }

        let input_shape = graph.input.resolve_single();
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()?;
        info!(
            "Loaded model with input {} ({:?}) and output {}, running on {} thread(s)",
            graph.input,
            layout,
            graph.output,
            thread_pool.current_num_threads()
        );

        Ok(Self {
            graph,
            input_shape,
            layout,
            config,
            thread_pool,
        })
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn current_config(&self) -> Config {
        self.config.clone()
    }

    /// Runs the model on the input data, using the default execution provider.
    pub fn run(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, OperationError> {
        self.run_with_provider::<DefaultProvider>(input)
    }

    /// Runs the model on the input data, using the chosen execution provider.
    ///
    /// Intermediate tensors live in a table owned by this call
    /// and are released when it returns, on success and on failure alike.
    pub fn run_with_provider<P>(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, OperationError>
    where
        P: Provider,
    {
        if !self.graph.input.admits(input.shape()) {
            return Err(OperationError::WrongShape(
                self.graph.input.to_string(),
                format!("{:?}", input.shape()),
            ));
        }

        let mut values: HashMap<&str, TensorData> = HashMap::new();
        values.insert(self.graph.input.name.as_str(), TensorData::Float(input));

        for node in &self.graph.nodes {
            let inputs = node
                .inputs
                .iter()
                .map(|name| {
                    if name.is_empty() {
                        None
                    } else {
                        values
                            .get(name.as_str())
                            .or_else(|| self.graph.constants.get(name))
                    }
                })
                .collect::<Vec<_>>();

            let output = execute_operation::<P>(node, &inputs, &self.thread_pool)?;
            trace!("{} ({}) -> {:?}", node.name, node.operator.name(), output.shape());

            if let Some(output_name) = node.outputs.first() {
                values.insert(output_name.as_str(), TensorData::Float(output));
            }
        }

        let output_name = self.graph.output.name.as_str();
        let output = values
            .remove(output_name)
            .ok_or_else(|| OperationError::MissingInput {
                operator: String::from("Output"),
                input: output_name.to_string(),
            })?;
        debug!("Inference produced output {:?}", output.shape());
        Ok(output.into_float())
    }
}

impl Model for OnnxModel {
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn forward(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, RecognitionError> {
        if !self.graph.input.admits(input.shape()) {
            return Err(RecognitionError::InvalidInputShape {
                expected: self.input_shape.clone(),
                actual: input.shape().to_vec(),
            });
        }
        self.run(input)
            .map_err(|e| RecognitionError::InferenceRuntime(e.to_string()))
    }
}

fn input_layout(input: &ValueShape) -> Option<InputLayout> {
    match input.resolve_single().as_slice() {
        [1, GRID_SIDE, GRID_SIDE, 1] => Some(InputLayout::ChannelsLast),
        [1, 1, GRID_SIDE, GRID_SIDE] => Some(InputLayout::ChannelsFirst),
        _ => None,
    }
}

fn is_class_scores(output: &ValueShape) -> bool {
    matches!(
        output.resolve_single().as_slice(),
        [1, NUM_CLASSES] | [NUM_CLASSES]
    )
}

fn input_at<'a>(
    operator: &Operator,
    inputs: &[Option<&'a TensorData>],
    index: usize,
    name: &str,
) -> Result<&'a TensorData, OperationError> {
    inputs
        .get(index)
        .copied()
        .flatten()
        .ok_or_else(|| OperationError::MissingInput {
            operator: operator.name(),
            input: name.to_string(),
        })
}

fn float_input(
    operator: &Operator,
    inputs: &[Option<&TensorData>],
    index: usize,
    name: &str,
) -> Result<ArrayD<f32>, OperationError> {
    match input_at(operator, inputs, index, name)? {
        TensorData::Float(x) => Ok(x.clone()),
        TensorData::Int64(_) => Err(OperationError::InvalidTensorType(
            operator.name(),
            name.to_string(),
        )),
    }
}

fn optional_float_input(
    operator: &Operator,
    inputs: &[Option<&TensorData>],
    index: usize,
    name: &str,
) -> Result<Option<ArrayD<f32>>, OperationError> {
    match inputs.get(index).copied().flatten() {
        Some(_) => float_input(operator, inputs, index, name).map(Some),
        None => Ok(None),
    }
}

fn execute_operation<ChosenProvider>(
    node: &GraphNode,
    inputs: &[Option<&TensorData>],
    thread_pool: &ThreadPool,
) -> Result<ArrayD<f32>, OperationError>
where
    ChosenProvider: Provider,
{
    let operator = &node.operator;
    match operator {
        Operator::Convolution(attrs) => {
            let operand = float_input(operator, inputs, 0, "X")?;
            let weights = float_input(operator, inputs, 1, "W")?;
            let bias = optional_float_input(operator, inputs, 2, "B")?
                .map(|b| {
                    let ndim = b.ndim();
                    b.into_dimensionality::<Ix1>()
                        .map_err(|_| OperationError::WrongDim(1, ndim))
                })
                .transpose()?;
            ChosenProvider::conv(thread_pool, operand, weights, bias, attrs.clone())
        }
        Operator::MaxPool(attrs) => {
            let operand = float_input(operator, inputs, 0, "X")?;
            ChosenProvider::max_pool(thread_pool, operand, attrs.clone())
        }
        Operator::ReLU => {
            let operand = float_input(operator, inputs, 0, "X")?;
            Ok(ChosenProvider::relu(thread_pool, operand))
        }
        Operator::Add => {
            let lhs = float_input(operator, inputs, 0, "A")?;
            let rhs = float_input(operator, inputs, 1, "B")?;
            ChosenProvider::add(thread_pool, lhs, rhs)
        }
        Operator::MatMul => {
            let lhs = float_input(operator, inputs, 0, "A")?;
            let rhs = float_input(operator, inputs, 1, "B")?;
            ChosenProvider::matmul(thread_pool, lhs, rhs)
        }
        Operator::Gemm(attrs) => {
            let matrix_a = float_input(operator, inputs, 0, "A")?;
            let matrix_b = float_input(operator, inputs, 1, "B")?;
            let matrix_c = optional_float_input(operator, inputs, 2, "C")?;
            ChosenProvider::gemm(thread_pool, matrix_a, matrix_b, matrix_c, attrs.clone())
        }
        Operator::Reshape => {
            let operand = float_input(operator, inputs, 0, "data")?;
            let TensorData::Int64(shape) = input_at(operator, inputs, 1, "shape")? else {
                return Err(OperationError::InvalidTensorType(
                    operator.name(),
                    String::from("shape"),
                ));
            };
            ChosenProvider::reshape(thread_pool, operand, shape.clone())
        }
        Operator::Flatten(attrs) => {
            let operand = float_input(operator, inputs, 0, "input")?;
            ChosenProvider::flatten(thread_pool, operand, attrs.clone())
        }
        Operator::Softmax(attrs) => {
            let operand = float_input(operator, inputs, 0, "input")?;
            ChosenProvider::softmax(thread_pool, operand, attrs.clone())
        }
        Operator::Transpose(attrs) => {
            let operand = float_input(operator, inputs, 0, "data")?;
            ChosenProvider::transpose(thread_pool, operand, attrs.clone())
        }
        Operator::Identity => float_input(operator, inputs, 0, "input"),
    }
}
