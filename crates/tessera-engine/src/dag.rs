//! Query-plan DAG definitions.
//!
//! A node consumes tensors by name; producing `"<name>:<k>"` for its
//! k-th output. Inputs that contain no `:` are request inputs or
//! inline literals and never create an edge.

use serde::{Deserialize, Serialize};

/// One operator invocation in a query plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagNodeDef {
    pub name: String,
    pub op: String,
    pub inputs: Vec<String>,
    /// Disjunctive normal form filter: each clause is a comma-separated
    /// list of `field op value` triples.
    pub dnf: Vec<String>,
    /// `order_by ...` / `limit k` directives applied to the output.
    pub post_process: Vec<String>,
    pub udf_name: String,
    pub udf_str_params: Vec<String>,
    pub udf_num_params: Vec<String>,
    /// Declared output arity; `name:0` .. `name:output_num-1`.
    pub output_num: usize,
}

impl DagNodeDef {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            output_num: 1,
            ..Default::default()
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, output_num: usize) -> Self {
        self.output_num = output_num;
        self
    }

    /// Name of this node's k-th output tensor.
    pub fn output(&self, k: usize) -> String {
        output_name(&self.name, k)
    }
}

/// An executable plan: nodes in any order, edges implied by names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagDef {
    pub nodes: Vec<DagNodeDef>,
}

impl DagDef {
    pub fn new(nodes: Vec<DagNodeDef>) -> Self {
        Self { nodes }
    }
}

/// `"<name>:<k>"`.
pub fn output_name(name: &str, k: usize) -> String {
    format!("{}:{}", name, k)
}
