use crate::onnx_format::{AttributeProto, ModelProto, NodeProto, ValueInfoProto};
use crate::operators::*;

use crate::tensor::{TensorData, ValueShape};

use log::debug;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::Graph;
use std::collections::HashMap;

use super::GraphError;

/// A node of the executable graph.
/// Inputs and outputs are tensor names; an empty input name marks an omitted optional input.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub name: String,
    pub operator: Operator,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// An ONNX model translated into an executable form.
///
/// Nodes are stored in execution order. Initializers and `Constant` nodes are decoded once
/// and kept in `constants`, so every inference only allocates its intermediate values.
#[derive(Debug, Clone)]
pub struct ExecutableGraph {
    pub input: ValueShape,
    pub output: ValueShape,
    pub nodes: Vec<GraphNode>,
    pub constants: HashMap<String, TensorData>,
}

/// This function creates an executable graph from a parsed ONNX model.
/// It returns an [`ExecutableGraph`] that can be run by an [`OnnxModel`](crate::model::OnnxModel).
/// It returns a [`GraphError`] if the conversion fails.
pub fn to_exec_graph(model_proto: ModelProto) -> Result<ExecutableGraph, GraphError> {
    let opset = model_proto
        .opset_import
        .iter()
        .find(|o| o.domain.as_deref().unwrap_or_default().is_empty())
        .and_then(|o| o.version)
        .unwrap_or(13);

    let graph_proto = model_proto.graph.ok_or_else(|| {
        GraphError::ConversionError("Unable to retrieve graph from parsed model".to_string())
    })?;

    let mut constants = HashMap::new();
    for initializer in graph_proto.initializer {
        let name = initializer.name.clone().unwrap_or_default();
        constants.insert(name, TensorData::try_from(initializer)?);
    }

    let input = parse_model_io_node(graph_proto.input, &constants)
        .ok_or(GraphError::InputNodeParsingError)?;
    let output = parse_model_io_node(graph_proto.output, &constants)
        .ok_or(GraphError::OutputNodeParsingError)?;

    let mut nodes = Vec::with_capacity(graph_proto.node.len());
    for (index, node) in graph_proto.node.into_iter().enumerate() {
        let op_type = node.op_type.clone().ok_or_else(|| {
            GraphError::ConversionError("Unable to convert op_type".to_string())
        })?;
        let node_name = node
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{}_{}", op_type, index));

        if op_type == "Constant" {
            let (output_name, value) = parse_constant(&node_name, node)?;
            constants.insert(output_name, value);
            continue;
        }

        let operator = translate_operator(&op_type, &node_name, &node.attribute, opset)?;
        nodes.push(GraphNode {
            name: node_name,
            operator,
            inputs: node.input,
            outputs: node.output,
        });
    }

    let nodes = sort_nodes(nodes, &input, &output, &constants)?;
    debug!(
        "Translated graph with {} nodes and {} constants (opset {})",
        nodes.len(),
        constants.len(),
        opset
    );

    Ok(ExecutableGraph {
        input,
        output,
        nodes,
        constants,
    })
}

/// Orders the nodes so that every node runs after the producers of its inputs.
fn sort_nodes(
    nodes: Vec<GraphNode>,
    input: &ValueShape,
    output: &ValueShape,
    constants: &HashMap<String, TensorData>,
) -> Result<Vec<GraphNode>, GraphError> {
    let mut dependencies: Graph<usize, ()> = Graph::new();
    let indices = (0..nodes.len())
        .map(|i| dependencies.add_node(i))
        .collect::<Vec<NodeIndex>>();

    let producers = nodes
        .iter()
        .enumerate()
        .flat_map(|(i, node)| node.outputs.iter().map(move |o| (o.as_str(), i)))
        .collect::<HashMap<&str, usize>>();

    if !producers.contains_key(output.name.as_str()) && output.name != input.name {
        return Err(GraphError::OutputNodeParsingError);
    }

    for (child, node) in nodes.iter().enumerate() {
        for parent_name in node.inputs.iter().filter(|i| !i.is_empty()) {
            match producers.get(parent_name.as_str()) {
                Some(&parent) => {
                    dependencies.add_edge(indices[parent], indices[child], ());
                }
                None if *parent_name == input.name || constants.contains_key(parent_name) => {}
                None => {
                    return Err(GraphError::ParentNotFound {
                        child_name: node.name.clone(),
                        input: parent_name.clone(),
                    })
                }
            }
        }
    }

    let order = toposort(&dependencies, None).map_err(|_| GraphError::Cycle)?;
    let mut slots = nodes.into_iter().map(Some).collect::<Vec<_>>();
    Ok(order
        .into_iter()
        .filter_map(|n| slots[dependencies[n]].take())
        .collect())
}

fn translate_operator(
    op_type: &str,
    node_name: &str,
    attributes: &[AttributeProto],
    opset: i64,
) -> Result<Operator, GraphError> {
    let attrs = NodeAttributes {
        node_name,
        op_type,
        attributes,
    };
    let operator = match op_type {
        "Conv" => {
            let conv = ConvAttributes::new(
                attrs.pair("dilations")?.unwrap_or([1, 1]),
                attrs.int("group")?.unwrap_or(1) as usize,
                attrs.pair("kernel_shape")?,
                attrs.quad("pads")?.unwrap_or([0, 0, 0, 0]),
                attrs.pair("strides")?.unwrap_or([1, 1]),
            );
            Operator::Convolution(conv.with_auto_pad(attrs.auto_pad()?))
        }
        "MaxPool" => {
            if attrs.int("ceil_mode")?.unwrap_or(0) != 0 {
                return Err(attrs.invalid("ceil_mode", "only floor rounding is supported"));
            }
            if attrs.pair("dilations")?.is_some_and(|d| d != [1, 1]) {
                return Err(attrs.invalid("dilations", "dilated pooling is not supported"));
            }
            let kernel_shape = attrs.pair("kernel_shape")?.ok_or_else(|| attrs.missing("kernel_shape"))?;
            let pool = MaxPoolAttributes::new(
                kernel_shape,
                attrs.quad("pads")?.unwrap_or([0, 0, 0, 0]),
                attrs.pair("strides")?.unwrap_or([1, 1]),
            );
            Operator::MaxPool(pool.with_auto_pad(attrs.auto_pad()?))
        }
        "Gemm" => Operator::Gemm(GemmAttributes::new(
            attrs.float("alpha").unwrap_or(1.0),
            attrs.float("beta").unwrap_or(1.0),
            attrs.int("transA")?.unwrap_or(0) != 0,
            attrs.int("transB")?.unwrap_or(0) != 0,
        )),
        "Flatten" => Operator::Flatten(FlattenAttributes {
            axis: attrs.int("axis")?.unwrap_or(1),
        }),
        "Softmax" => Operator::Softmax(SoftmaxAttributes {
            // the default axis moved from 1 to -1 with opset 13
            axis: attrs
                .int("axis")?
                .unwrap_or(if opset >= 13 { -1 } else { 1 }),
        }),
        "Transpose" => Operator::Transpose(TransposeAttributes {
            perm: attrs
                .ints("perm")
                .map(|p| p.iter().map(|v| *v as usize).collect()),
        }),
        "Relu" => Operator::ReLU,
        "Add" => Operator::Add,
        "MatMul" => Operator::MatMul,
        "Reshape" => Operator::Reshape,
        "Dropout" | "Identity" => Operator::Identity,
        op => return Err(GraphError::UnsupportedOperator(String::from(op))),
    };
    Ok(operator)
}

fn parse_constant(node_name: &str, node: NodeProto) -> Result<(String, TensorData), GraphError> {
    let output_name = node
        .output
        .first()
        .cloned()
        .ok_or_else(|| GraphError::ConversionError(format!("Constant {} has no output", node_name)))?;
    let value = node
        .attribute
        .into_iter()
        .find(|a| a.name.as_deref() == Some("value"))
        .and_then(|a| a.t)
        .ok_or_else(|| GraphError::MissingOperand {
            operand: String::from("value"),
            operator: node_name.to_string(),
            operator_type: String::from("Constant"),
        })?;
    Ok((output_name, TensorData::try_from(value)?))
}

/// Attributes of a node, looked up by name.
struct NodeAttributes<'a> {
    node_name: &'a str,
    op_type: &'a str,
    attributes: &'a [AttributeProto],
}

impl<'a> NodeAttributes<'a> {
    fn find(&self, name: &str) -> Option<&'a AttributeProto> {
        self.attributes
            .iter()
            .find(|a| a.name.as_deref() == Some(name))
    }

    fn missing(&self, operand: &str) -> GraphError {
        GraphError::MissingOperand {
            operand: operand.to_string(),
            operator: self.node_name.to_string(),
            operator_type: self.op_type.to_string(),
        }
    }

    fn invalid(&self, attribute: &str, reason: &str) -> GraphError {
        GraphError::InvalidAttribute {
            attribute: attribute.to_string(),
            operator: self.node_name.to_string(),
            reason: reason.to_string(),
        }
    }

    fn float(&self, name: &str) -> Option<f32> {
        self.find(name).and_then(|a| a.f)
    }

    fn int(&self, name: &str) -> Result<Option<i64>, GraphError> {
        match self.find(name) {
            None => Ok(None),
            Some(a) => a.i.map(Some).ok_or_else(|| self.missing(name)),
        }
    }

    fn ints(&self, name: &str) -> Option<&'a [i64]> {
        self.find(name).map(|a| a.ints.as_slice())
    }

    fn positive_ints<const N: usize>(&self, name: &str) -> Result<Option<[usize; N]>, GraphError> {
        let Some(values) = self.ints(name) else {
            return Ok(None);
        };
        if values.iter().any(|v| *v < 0) {
            return Err(self.invalid(name, "negative values are not allowed"));
        }
        let values = values.iter().map(|v| *v as usize).collect::<Vec<_>>();
        values
            .try_into()
            .map(Some)
            .map_err(|_| self.invalid(name, &format!("expected {} values for a 2D operator", N)))
    }

    fn pair(&self, name: &str) -> Result<Option<[usize; 2]>, GraphError> {
        self.positive_ints::<2>(name)
    }

    fn quad(&self, name: &str) -> Result<Option<[usize; 4]>, GraphError> {
        self.positive_ints::<4>(name)
    }

    fn auto_pad(&self) -> Result<AutoPad, GraphError> {
        let Some(value) = self.find("auto_pad").and_then(|a| a.s.as_deref()) else {
            return Ok(AutoPad::NotSet);
        };
        let value = String::from_utf8_lossy(value);
        AutoPad::parse(&value).ok_or_else(|| self.invalid("auto_pad", &value))
    }
}

/// Picks the graph input or output that is not an initializer.
/// Older exporters list the initializers among the graph inputs as well.
fn parse_model_io_node(
    io_value_infos: Vec<ValueInfoProto>,
    constants: &HashMap<String, TensorData>,
) -> Option<ValueShape> {
    io_value_infos
        .into_iter()
        .filter(|value_info| {
            !constants.contains_key(value_info.name.as_deref().unwrap_or_default())
        })
        .find_map(|value_info| ValueShape::try_from(value_info).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx_format::{GraphProto, OperatorSetIdProto};

    fn node(op_type: &str, inputs: &[&str], output: &str) -> NodeProto {
        NodeProto {
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.to_string()],
            op_type: Some(op_type.to_string()),
            ..Default::default()
        }
    }

    fn io(name: &str) -> ValueInfoProto {
        use crate::onnx_format::{type_proto, TypeProto};
        ValueInfoProto {
            name: Some(name.to_string()),
            r#type: Some(TypeProto {
                value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                    elem_type: Some(1),
                    ..Default::default()
                })),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn model(nodes: Vec<NodeProto>) -> ModelProto {
        ModelProto {
            graph: Some(GraphProto {
                node: nodes,
                input: vec![io("x")],
                output: vec![io("y")],
                ..Default::default()
            }),
            opset_import: vec![OperatorSetIdProto {
                version: Some(11),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn nodes_are_sorted_by_dependency() {
        // listed out of order on purpose
        let graph = to_exec_graph(model(vec![
            node("Softmax", &["h"], "y"),
            node("Relu", &["x"], "h"),
        ]))
        .unwrap();
        let order = graph
            .nodes
            .iter()
            .map(|n| n.operator.name())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["Relu", "Softmax"]);
        // opset 11 keeps the old softmax axis
        assert_eq!(
            graph.nodes[1].operator,
            Operator::Softmax(SoftmaxAttributes { axis: 1 })
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let result = to_exec_graph(model(vec![
            node("Add", &["x", "b"], "a"),
            node("Relu", &["a"], "b"),
            node("Relu", &["b"], "y"),
        ]));
        assert!(matches!(result, Err(GraphError::Cycle)));
    }

    #[test]
    fn unknown_inputs_are_rejected() {
        let result = to_exec_graph(model(vec![node("Add", &["x", "bias"], "y")]));
        assert!(matches!(
            result,
            Err(GraphError::ParentNotFound { input, .. }) if input == "bias"
        ));
    }

    #[test]
    fn unsupported_operators_are_rejected() {
        let result = to_exec_graph(model(vec![node("LSTM", &["x"], "y")]));
        assert!(matches!(result, Err(GraphError::UnsupportedOperator(op)) if op == "LSTM"));
    }

    #[test]
    fn maxpool_requires_kernel_shape() {
        let result = to_exec_graph(model(vec![node("MaxPool", &["x"], "y")]));
        assert!(matches!(
            result,
            Err(GraphError::MissingOperand { operand, .. }) if operand == "kernel_shape"
        ));
    }
}
