//! Kernel traits, kernel registry and the per-request environment.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::{EngineError, Result};
use tessera_graph::{GraphStore, IndexManager};

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::tensor::Tensor;
use crate::udf::UdfRegistry;

/// Shared read-only state a kernel may consult: the graph (absent on a
/// pure client), the value indexes, the UDF registry, and the graph
/// label set.
#[derive(Clone)]
pub struct KernelEnv {
    pub graph: Option<Arc<GraphStore>>,
    pub indexes: Arc<IndexManager>,
    pub udfs: Arc<UdfRegistry>,
    pub graph_labels: Arc<Vec<String>>,
}

impl KernelEnv {
    /// Shard-side environment: graph labels come from the store.
    pub fn for_shard(graph: Arc<GraphStore>, indexes: Arc<IndexManager>) -> Self {
        let graph_labels = Arc::new(graph.graph_labels());
        Self {
            graph: Some(graph),
            indexes,
            udfs: Arc::new(UdfRegistry::with_builtins()),
            graph_labels,
        }
    }

    /// Client-side environment: no local graph; labels are learned
    /// from the registry.
    pub fn for_client(graph_labels: Vec<String>) -> Self {
        Self {
            graph: None,
            indexes: Arc::new(IndexManager::new()),
            udfs: Arc::new(UdfRegistry::with_builtins()),
            graph_labels: Arc::new(graph_labels),
        }
    }

    pub fn graph(&self) -> Result<&GraphStore> {
        self.graph
            .as_deref()
            .ok_or_else(|| EngineError::internal("no graph store in this environment"))
    }
}

/// A synchronous kernel: reads inputs from and writes outputs to the
/// context. Kernels are stateless and re-entrant; recoverable input
/// problems are logged and answered with empty outputs.
pub trait OpKernel: Send + Sync {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()>;
}

/// An asynchronous kernel. It reads the context immutably (so the
/// executor can run several async kernels concurrently) and returns
/// its outputs for the executor to bind.
#[async_trait]
pub trait AsyncOpKernel: Send + Sync {
    async fn compute(
        &self,
        node: &DagNodeDef,
        env: &KernelEnv,
        ctx: &OpKernelContext,
    ) -> Result<Vec<(String, Tensor)>>;
}

/// Either kernel flavor, as stored in the registry.
#[derive(Clone)]
pub enum Kernel {
    Sync(Arc<dyn OpKernel>),
    Async(Arc<dyn AsyncOpKernel>),
}

/// Op name → kernel. Built once at startup; the planner additionally
/// registers its split and remote-dispatch kernels on the client.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, Kernel>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in graph and merge kernel.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::kernels::register_builtins(&mut registry);
        registry
    }

    pub fn register_sync(&mut self, op: impl Into<String>, kernel: Arc<dyn OpKernel>) {
        self.kernels.insert(op.into(), Kernel::Sync(kernel));
    }

    pub fn register_async(&mut self, op: impl Into<String>, kernel: Arc<dyn AsyncOpKernel>) {
        self.kernels.insert(op.into(), Kernel::Async(kernel));
    }

    pub fn get(&self, op: &str) -> Option<&Kernel> {
        self.kernels.get(op)
    }

    pub fn contains(&self, op: &str) -> bool {
        self.kernels.contains_key(op)
    }
}
