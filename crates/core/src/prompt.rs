//! Logical parameter bindings on top of a [`Workflow`].
//!
//! A builder declares which parameters are externally settable (`prompt`,
//! `width`, `cfg`, ...), binds each one to exactly one
//! `<node id>.inputs.<field>` path, and supplies a value. [`PromptBuilder::build`]
//! injects the values and returns a [`PreparedWorkflow`] ready for
//! submission. Values can be replaced with [`PromptBuilder::set`] without
//! touching the graph structure.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::graph::{GraphError, InputValue, Workflow};

/// A parsed `<node id>.inputs.<field>` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPath {
    pub node_id: String,
    pub field: String,
}

impl InputPath {
    pub fn parse(path: &str) -> Result<Self, GraphError> {
        let mut parts = path.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(node_id), Some("inputs"), Some(field)) if !node_id.is_empty() && !field.is_empty() => {
                Ok(Self {
                    node_id: node_id.to_string(),
                    field: field.to_string(),
                })
            }
            _ => Err(GraphError::InvalidPath(path.to_string())),
        }
    }
}

impl std::fmt::Display for InputPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.inputs.{}", self.node_id, self.field)
    }
}

/// A graph with all parameter values injected, plus the node whose output
/// carries the result images.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWorkflow {
    pub workflow: Workflow,
    pub output_node: String,
}

/// Graph + declared parameters + bindings + values.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    workflow: Workflow,
    declared: Vec<String>,
    bindings: BTreeMap<String, String>,
    values: BTreeMap<String, Value>,
    output_node: String,
}

impl PromptBuilder {
    pub fn new(workflow: Workflow, inputs: &[&str], output_node: &str) -> Self {
        Self {
            workflow,
            declared: inputs.iter().map(|s| s.to_string()).collect(),
            bindings: BTreeMap::new(),
            values: BTreeMap::new(),
            output_node: output_node.to_string(),
        }
    }

    /// Bind `name` to a `<node>.inputs.<field>` path. Paths are checked in
    /// [`build`](Self::build).
    pub fn set_input_node(mut self, name: &str, path: &str) -> Self {
        self.bindings.insert(name.to_string(), path.to_string());
        self
    }

    /// Supply the value for `name`.
    pub fn input(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Replace the value for `name` in place.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn declared_inputs(&self) -> &[String] {
        &self.declared
    }

    pub fn binding(&self, name: &str) -> Option<InputPath> {
        self.bindings.get(name).and_then(|p| InputPath::parse(p).ok())
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn output_node(&self) -> &str {
        &self.output_node
    }

    /// Inject every declared value into its bound input and validate the
    /// resulting graph.
    pub fn build(&self) -> Result<PreparedWorkflow, GraphError> {
        for name in self.bindings.keys().chain(self.values.keys()) {
            if !self.declared.iter().any(|d| d == name) {
                return Err(GraphError::UndeclaredParameter(name.clone()));
            }
        }

        let mut workflow = self.workflow.clone();
        for name in &self.declared {
            let raw = self
                .bindings
                .get(name)
                .ok_or_else(|| GraphError::MissingBinding(name.clone()))?;
            let path = InputPath::parse(raw)?;
            let value = self
                .values
                .get(name)
                .ok_or_else(|| GraphError::MissingValue(name.clone()))?;
            let node = workflow
                .node_mut(&path.node_id)
                .ok_or_else(|| GraphError::MissingNode(path.node_id.clone()))?;
            node.inputs
                .insert(path.field.clone(), InputValue::Literal(value.clone()));
        }

        if !workflow.contains(&self.output_node) {
            return Err(GraphError::MissingNode(self.output_node.clone()));
        }
        workflow.validate()?;

        Ok(PreparedWorkflow {
            workflow,
            output_node: self.output_node.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::WorkflowNode;
    use assert_matches::assert_matches;

    fn sampler_graph() -> Workflow {
        let mut wf = Workflow::new();
        wf.add("1", WorkflowNode::new("CheckpointLoaderSimple", "Load").input("ckpt_name", "m"));
        wf.add(
            "2",
            WorkflowNode::new("KSampler", "Sampler").input("seed", 1).link("model", "1", 0),
        );
        wf.add("3", WorkflowNode::new("SaveImage", "Save").link("images", "2", 0));
        wf
    }

    #[test]
    fn parses_input_paths() {
        let path = InputPath::parse("12.inputs.seed").unwrap();
        assert_eq!(path.node_id, "12");
        assert_eq!(path.field, "seed");
        assert_eq!(path.to_string(), "12.inputs.seed");
        assert!(InputPath::parse("12.seed").is_err());
        assert!(InputPath::parse(".inputs.seed").is_err());
    }

    #[test]
    fn build_injects_bound_values() {
        let prepared = PromptBuilder::new(sampler_graph(), &["seed"], "3")
            .set_input_node("seed", "2.inputs.seed")
            .input("seed", 0)
            .build()
            .unwrap();
        let node = prepared.workflow.node("2").unwrap();
        assert_eq!(node.literal("seed"), Some(&Value::from(0)));
        assert_eq!(prepared.output_node, "3");
    }

    #[test]
    fn set_retargets_without_rebuilding_structure() {
        let mut builder = PromptBuilder::new(sampler_graph(), &["seed"], "3")
            .set_input_node("seed", "2.inputs.seed")
            .input("seed", 5);
        builder.set("seed", 99);
        let prepared = builder.build().unwrap();
        assert_eq!(
            prepared.workflow.node("2").unwrap().literal("seed"),
            Some(&Value::from(99))
        );
        assert_eq!(prepared.workflow.len(), 3);
    }

    #[test]
    fn declared_parameter_requires_binding_and_value() {
        let missing_binding = PromptBuilder::new(sampler_graph(), &["seed"], "3").input("seed", 1);
        assert_matches!(missing_binding.build(), Err(GraphError::MissingBinding(n)) if n == "seed");

        let missing_value = PromptBuilder::new(sampler_graph(), &["seed"], "3")
            .set_input_node("seed", "2.inputs.seed");
        assert_matches!(missing_value.build(), Err(GraphError::MissingValue(n)) if n == "seed");
    }

    #[test]
    fn undeclared_or_misrouted_parameters_fail() {
        let undeclared = PromptBuilder::new(sampler_graph(), &[], "3").input("cfg", 7);
        assert_matches!(undeclared.build(), Err(GraphError::UndeclaredParameter(_)));

        let bad_node = PromptBuilder::new(sampler_graph(), &["seed"], "3")
            .set_input_node("seed", "42.inputs.seed")
            .input("seed", 1);
        assert_matches!(bad_node.build(), Err(GraphError::MissingNode(n)) if n == "42");

        let bad_output = PromptBuilder::new(sampler_graph(), &[], "9");
        assert_matches!(bad_output.build(), Err(GraphError::MissingNode(n)) if n == "9");
    }
}
