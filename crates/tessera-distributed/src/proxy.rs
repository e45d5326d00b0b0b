//! Client-side query proxy: plans a DAG, fans the per-shard sub-plans
//! out over the connection pool, and runs the merge kernels locally.
//!
//! `execute` blocks until every shard answered (the executor's async
//! round is the gather barrier). A failing shard fails the whole
//! request with its status; partial results are never merged.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::{EngineError, Result};
use tessera_engine::{
    execute, AsyncOpKernel, DagDef, DagNodeDef, KernelEnv, KernelRegistry, OpKernelContext,
    Tensor, WireTensor,
};
use tessera_graph::GraphMeta;
use tracing::{debug, warn};

use crate::planner::{Planner, ShardCall};
use crate::rpc::client::{GraphClientPool, RegistryHandle};
use crate::types::{ClusterView, DistributedError, ShardId, ShardWeights};

/// Fans queries out across the cluster described by a registry view.
pub struct QueryProxy {
    shard_num: usize,
    pool: GraphClientPool,
    planner: Planner,
    env: KernelEnv,
    base_registry: KernelRegistry,
    graph_meta: GraphMeta,
}

impl QueryProxy {
    /// Discover the cluster through the registry service and build a
    /// proxy over it.
    pub async fn connect(registry_addr: SocketAddr) -> Result<Self> {
        let registry = RegistryHandle::new(registry_addr);
        let client = registry
            .get()
            .await
            .map_err(|e| DistributedError::RegistryUnavailable(e.to_string()))
            .map_err(EngineError::from)?;
        let view = client
            .get_cluster(tarpc::context::current())
            .await
            .map_err(|e| DistributedError::RegistryUnavailable(e.to_string()))
            .map_err(EngineError::from)?
            .map_err(EngineError::from)?;
        Self::from_cluster(view).await
    }

    /// Build a proxy from an already-fetched cluster view.
    pub async fn from_cluster(view: ClusterView) -> Result<Self> {
        let shard_num = view.meta.num_shards.max(1) as usize;
        let pool = GraphClientPool::new();
        let mut labels: HashSet<String> = HashSet::new();
        for shard in &view.shards {
            match shard.address.parse::<SocketAddr>() {
                Ok(addr) => pool.register_shard(shard.id, addr).await,
                Err(e) => warn!("shard {} has unusable address {}: {}", shard.id, shard.address, e),
            }
            labels.extend(shard.meta.labels());
        }
        let graph_meta = if view.meta.graph_meta.is_empty() {
            GraphMeta::default()
        } else {
            GraphMeta::from_json(&view.meta.graph_meta)?
        };
        let weights = Arc::new(ShardWeights::from_cluster(&view));
        let planner = Planner::new(shard_num, weights);
        let mut labels: Vec<String> = labels.into_iter().collect();
        labels.sort();
        let env = KernelEnv::for_client(labels);
        let mut base_registry = KernelRegistry::with_builtins();
        planner.register_split_kernels(&mut base_registry);
        Ok(Self {
            shard_num,
            pool,
            planner,
            env,
            base_registry,
            graph_meta,
        })
    }

    pub fn shard_num(&self) -> usize {
        self.shard_num
    }

    pub fn graph_meta(&self) -> &GraphMeta {
        &self.graph_meta
    }

    pub fn pool(&self) -> &GraphClientPool {
        &self.pool
    }

    /// Execute a query DAG: rewrite it across the shards, dispatch,
    /// merge, and return the requested output tensors.
    pub async fn execute(
        &self,
        dag: &DagDef,
        inputs: Vec<(String, Tensor)>,
        outputs: &[String],
    ) -> Result<HashMap<String, Tensor>> {
        let mut ctx = OpKernelContext::new();
        for (name, tensor) in inputs {
            ctx.insert(name, tensor);
        }

        let plan = self.planner.plan(dag, &ctx)?;
        debug!(
            nodes = plan.dag.nodes.len(),
            calls = plan.calls.len(),
            "dispatching plan"
        );
        let mut registry = self.base_registry.clone();
        registry.register_async(
            "REMOTE_EXECUTE",
            Arc::new(RemoteExecuteOp {
                pool: self.pool.clone(),
                calls: Arc::new(plan.calls),
            }),
        );
        execute(&plan.dag, &registry, &self.env, &mut ctx).await?;

        // Bind merged outputs back under the caller's names.
        for (original, rewritten) in &plan.renames {
            ctx.add_alias(original.clone(), rewritten.clone());
        }
        let mut result = HashMap::with_capacity(outputs.len());
        for name in outputs {
            match ctx.get(name) {
                Some(tensor) => {
                    result.insert(name.clone(), tensor.clone());
                }
                None => {
                    return Err(EngineError::not_found(format!(
                        "output tensor '{}'",
                        name
                    )))
                }
            }
        }
        Ok(result)
    }
}

/// Async kernel dispatching one shard call; registered per request
/// with that request's shard-call table.
struct RemoteExecuteOp {
    pool: GraphClientPool,
    calls: Arc<HashMap<String, ShardCall>>,
}

impl RemoteExecuteOp {
    fn gather_inputs(call: &ShardCall, ctx: &OpKernelContext) -> Vec<WireTensor> {
        let mut seen = HashSet::new();
        let mut wires = Vec::new();
        for node in &call.dag.nodes {
            let names = node
                .inputs
                .iter()
                .chain(node.udf_str_params.iter())
                .chain(node.udf_num_params.iter());
            for name in names {
                if name.is_empty() || !seen.insert(name.clone()) {
                    continue;
                }
                if let Some(tensor) = ctx.get(name) {
                    wires.push(tensor.to_wire(name.clone()));
                }
            }
        }
        wires
    }
}

#[async_trait]
impl AsyncOpKernel for RemoteExecuteOp {
    async fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &OpKernelContext,
    ) -> Result<Vec<(String, Tensor)>> {
        let call = self.calls.get(&node.name).ok_or_else(|| {
            EngineError::internal(format!("no shard call for stub {}", node.name))
        })?;
        let shard = ShardId::new(call.shard);
        let client = self.pool.get_client(shard).await.map_err(|e| {
            let err = if e.kind() == std::io::ErrorKind::NotFound {
                DistributedError::ShardNotFound(shard)
            } else {
                DistributedError::Rpc(e.to_string())
            };
            EngineError::from(err)
        })?;
        let inputs = Self::gather_inputs(call, ctx);
        debug!(stub = %node.name, %shard, inputs = inputs.len(), "remote execute");
        let response = client
            .execute(
                tarpc::context::current(),
                call.dag.clone(),
                inputs,
                call.outputs.clone(),
            )
            .await
            .map_err(|e| {
                // Transport failure: drop the cached connection so the
                // next request reconnects.
                warn!("{} transport failure: {}", shard, e);
                let pool = self.pool.clone();
                tokio::spawn(async move { pool.invalidate_client(shard).await });
                EngineError::from(DistributedError::ShardOffline(shard))
            })?
            .map_err(EngineError::from)?;

        let mut outputs = Vec::with_capacity(response.len());
        for wire in &response {
            outputs.push((wire.name.clone(), Tensor::from_wire(wire)?));
        }
        Ok(outputs)
    }
}
