//! Per-request tensor namespace.

use std::collections::HashMap;

use crate::tensor::Tensor;

/// Maps tensor names to owned tensors for one request. An alias map
/// lets an operator expose an input under its own output name without
/// copying; lookups follow aliases transitively. Contexts are never
/// shared across requests.
#[derive(Debug, Default)]
pub struct OpKernelContext {
    tensors: HashMap<String, Tensor>,
    aliases: HashMap<String, String>,
}

impl OpKernelContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a name through the alias chain to a stored tensor.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        let mut current = name;
        let mut hops = 0;
        while let Some(next) = self.aliases.get(current) {
            current = next;
            hops += 1;
            if hops > self.aliases.len() {
                return None;
            }
        }
        self.tensors.get(current)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Make `name` resolve to whatever `target` resolves to.
    pub fn add_alias(&mut self, name: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(name.into(), target.into());
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}
