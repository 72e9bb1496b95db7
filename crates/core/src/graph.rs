//! ComfyUI node graph ("API format" workflow).
//!
//! A [`Workflow`] maps node ids to [`WorkflowNode`]s. Node inputs are either
//! literals or [`NodeLink`]s (`["<node id>", <output index>]`). Builders
//! assemble a graph node by node and call [`Workflow::validate`] so that a
//! dangling reference is caught here instead of by the server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ComfyError, ErrorKind};

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Reference to output slot `.1` of node `.0`.
///
/// Serializes as a two-element JSON array, which is how ComfyUI encodes
/// connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

impl NodeLink {
    pub fn new(node_id: impl Into<String>, output: u32) -> Self {
        Self(node_id.into(), output)
    }

    pub fn node_id(&self) -> &str {
        &self.0
    }

    pub fn output(&self) -> u32 {
        self.1
    }
}

/// A single node input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Link(NodeLink),
    Literal(Value),
}

impl InputValue {
    pub fn as_link(&self) -> Option<&NodeLink> {
        match self {
            Self::Link(link) => Some(link),
            Self::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(v) => Some(v),
            Self::Link(_) => None,
        }
    }
}

/// Display metadata shown in the ComfyUI editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub title: String,
}

/// One node of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// ComfyUI class type (e.g. `KSampler`, `CLIPTextEncode`).
    pub class_type: String,
    #[serde(rename = "_meta")]
    pub meta: NodeMeta,
    pub inputs: BTreeMap<String, InputValue>,
}

impl WorkflowNode {
    pub fn new(class_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            meta: NodeMeta {
                title: title.into(),
            },
            inputs: BTreeMap::new(),
        }
    }

    /// Set a literal input.
    pub fn input(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.inputs
            .insert(name.to_string(), InputValue::Literal(value.into()));
        self
    }

    /// Connect an input to output `output` of node `node_id`.
    pub fn link(mut self, name: &str, node_id: &str, output: u32) -> Self {
        self.inputs
            .insert(name.to_string(), InputValue::Link(NodeLink::new(node_id, output)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.inputs.get(name)
    }

    pub fn literal(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(InputValue::as_literal)
    }

    pub fn linked(&self, name: &str) -> Option<&NodeLink> {
        self.get(name).and_then(InputValue::as_link)
    }
}

/// A complete workflow graph, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    nodes: BTreeMap<String, WorkflowNode>,
}

/// Structural problems found while assembling or binding a graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// An input links to a node id that is not in the graph.
    #[error("Node {node_id} input '{input}' references missing node {target}")]
    DanglingReference {
        node_id: String,
        input: String,
        target: String,
    },

    /// A node links to itself.
    #[error("Node {node_id} input '{input}' references its own output")]
    SelfReference { node_id: String, input: String },

    /// A binding or output targets a node id that does not exist.
    #[error("Node {0} not found in workflow")]
    MissingNode(String),

    /// A declared parameter has no node/field binding.
    #[error("Parameter '{0}' has no binding")]
    MissingBinding(String),

    /// A declared parameter has no value.
    #[error("Parameter '{0}' has no value")]
    MissingValue(String),

    /// A binding or value was supplied for a parameter that was never declared.
    #[error("Parameter '{0}' is not declared")]
    UndeclaredParameter(String),

    /// A binding path is not of the form `<node>.inputs.<field>`.
    #[error("Invalid binding path '{0}'")]
    InvalidPath(String),
}

impl From<GraphError> for ComfyError {
    fn from(err: GraphError) -> Self {
        ComfyError::new(ErrorKind::UnknownError, format!("Invalid workflow graph: {err}"))
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a node.
    pub fn add(&mut self, node_id: &str, node: WorkflowNode) -> &mut Self {
        self.nodes.insert(node_id.to_string(), node);
        self
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Ids of every node with the given class type, in id order.
    pub fn nodes_of_class<'a>(&'a self, class_type: &'a str) -> impl Iterator<Item = &'a str> {
        self.iter()
            .filter(move |(_, n)| n.class_type == class_type)
            .map(|(id, _)| id)
    }

    /// The first node of a class type, if any.
    pub fn find_class(&self, class_type: &str) -> Option<(&str, &WorkflowNode)> {
        self.iter().find(|(_, n)| n.class_type == class_type)
    }

    /// Check referential closure: every link must point at another node
    /// present in this graph.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (node_id, node) in &self.nodes {
            for (input, value) in &node.inputs {
                let InputValue::Link(link) = value else {
                    continue;
                };
                if link.node_id() == node_id {
                    return Err(GraphError::SelfReference {
                        node_id: node_id.clone(),
                        input: input.clone(),
                    });
                }
                if !self.nodes.contains_key(link.node_id()) {
                    return Err(GraphError::DanglingReference {
                        node_id: node_id.clone(),
                        input: input.clone(),
                        target: link.node_id().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Serialize to the JSON object ComfyUI's `/prompt` endpoint expects.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
