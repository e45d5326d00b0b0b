//! tarpc server implementations for the graph and registry services.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tarpc::context::Context;
use tarpc::server::{self, Channel};
use tessera_core::IdWeightPair;
use tessera_engine::{execute, DagDef, KernelEnv, KernelRegistry, OpKernelContext, WireTensor};
use tessera_graph::GraphStore;
use tokio::sync::RwLock;
use tokio_serde::formats::Bincode;
use tracing::{debug, info, instrument};

use crate::registry::ShardRegistry;
use crate::rpc::protocol::{
    GraphService, RegistryService, RpcError, RpcResult, WireEdgeId,
};
use crate::types::{ClusterMeta, ClusterView, ShardId, ShardMeta};

/// How many client channels one server drives concurrently.
const MAX_CONCURRENT_CHANNELS: usize = 16;

/// Serves one shard's graph over tarpc.
///
/// The graph is immutable after load, so handlers read it without any
/// locking; each request gets its own tensor context.
#[derive(Clone)]
pub struct GraphServer {
    env: KernelEnv,
    registry: Arc<KernelRegistry>,
}

impl GraphServer {
    pub fn new(env: KernelEnv) -> Self {
        Self {
            env,
            registry: Arc::new(KernelRegistry::with_builtins()),
        }
    }

    fn graph(&self) -> Result<&GraphStore, RpcError> {
        self.env.graph().map_err(RpcError::from)
    }

    /// Bind and serve until the listener closes.
    pub async fn start(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        info!("graph server listening on {}", addr);
        listener
            .filter_map(|r| futures::future::ready(r.ok()))
            .map(server::BaseChannel::with_defaults)
            .for_each_concurrent(MAX_CONCURRENT_CHANNELS, |channel| {
                let server = self.clone();
                async move {
                    channel
                        .execute(server.serve())
                        .for_each(|f| async { tokio::spawn(f); })
                        .await
                }
            })
            .await;
        Ok(())
    }
}

impl GraphService for GraphServer {
    async fn ping(self, _ctx: Context) -> String {
        "pong".to_string()
    }

    #[instrument(skip(self, _ctx, dag, inputs), fields(nodes = dag.nodes.len()))]
    async fn execute(
        self,
        _ctx: Context,
        dag: DagDef,
        inputs: Vec<WireTensor>,
        outputs: Vec<String>,
    ) -> RpcResult<Vec<WireTensor>> {
        debug!("executing {} nodes for {} outputs", dag.nodes.len(), outputs.len());
        let mut op_ctx = OpKernelContext::new();
        for wire in &inputs {
            let tensor = tessera_engine::Tensor::from_wire(wire).map_err(RpcError::from)?;
            op_ctx.insert(wire.name.clone(), tensor);
        }
        execute(&dag, &self.registry, &self.env, &mut op_ctx)
            .await
            .map_err(RpcError::from)?;
        let mut result = Vec::with_capacity(outputs.len());
        for name in &outputs {
            match op_ctx.get(name) {
                Some(tensor) => result.push(tensor.to_wire(name.clone())),
                None => {
                    return Err(RpcError::NotFound(format!("output tensor '{}'", name)))
                }
            }
        }
        Ok(result)
    }

    async fn sample_node(
        self,
        _ctx: Context,
        node_types: Vec<i32>,
        count: u32,
    ) -> RpcResult<Vec<u64>> {
        Ok(self
            .graph()?
            .sample_node_of_types(&node_types, count as usize))
    }

    async fn sample_edge(
        self,
        _ctx: Context,
        edge_types: Vec<i32>,
        count: u32,
    ) -> RpcResult<Vec<WireEdgeId>> {
        Ok(self
            .graph()?
            .sample_edge_of_types(&edge_types, count as usize)
            .into_iter()
            .map(|e| (e.src, e.dst, e.edge_type))
            .collect())
    }

    async fn get_node_type(self, _ctx: Context, node_ids: Vec<u64>) -> RpcResult<Vec<i32>> {
        Ok(self.graph()?.node_types(&node_ids))
    }

    async fn get_node_float32_feature(
        self,
        _ctx: Context,
        node_ids: Vec<u64>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<f32>>>> {
        Ok(self.graph()?.node_dense_features(&node_ids, &fids))
    }

    async fn get_node_uint64_feature(
        self,
        _ctx: Context,
        node_ids: Vec<u64>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<u64>>>> {
        Ok(self.graph()?.node_sparse_features(&node_ids, &fids))
    }

    async fn get_node_binary_feature(
        self,
        _ctx: Context,
        node_ids: Vec<u64>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<u8>>>> {
        Ok(self.graph()?.node_binary_features(&node_ids, &fids))
    }

    async fn get_edge_float32_feature(
        self,
        _ctx: Context,
        edge_ids: Vec<WireEdgeId>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<f32>>>> {
        let eids = to_edge_ids(&edge_ids);
        Ok(self.graph()?.edge_dense_features(&eids, &fids))
    }

    async fn get_edge_uint64_feature(
        self,
        _ctx: Context,
        edge_ids: Vec<WireEdgeId>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<u64>>>> {
        let eids = to_edge_ids(&edge_ids);
        Ok(self.graph()?.edge_sparse_features(&eids, &fids))
    }

    async fn get_edge_binary_feature(
        self,
        _ctx: Context,
        edge_ids: Vec<WireEdgeId>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<u8>>>> {
        let eids = to_edge_ids(&edge_ids);
        Ok(self.graph()?.edge_binary_features(&eids, &fids))
    }

    async fn get_full_neighbor(
        self,
        _ctx: Context,
        node_ids: Vec<u64>,
        edge_types: Vec<i32>,
    ) -> RpcResult<Vec<Vec<IdWeightPair>>> {
        Ok(self.graph()?.full_neighbors(&node_ids, &edge_types))
    }

    async fn get_sorted_neighbor(
        self,
        _ctx: Context,
        node_ids: Vec<u64>,
        edge_types: Vec<i32>,
    ) -> RpcResult<Vec<Vec<IdWeightPair>>> {
        Ok(self.graph()?.sorted_full_neighbors(&node_ids, &edge_types))
    }

    async fn get_top_k_neighbor(
        self,
        _ctx: Context,
        node_ids: Vec<u64>,
        edge_types: Vec<i32>,
        k: u32,
    ) -> RpcResult<Vec<Vec<IdWeightPair>>> {
        Ok(self
            .graph()?
            .top_k_neighbors(&node_ids, &edge_types, k as usize))
    }

    async fn sample_neighbor(
        self,
        _ctx: Context,
        node_ids: Vec<u64>,
        edge_types: Vec<i32>,
        count: u32,
    ) -> RpcResult<Vec<Vec<IdWeightPair>>> {
        Ok(self
            .graph()?
            .sample_neighbors(&node_ids, &edge_types, count as usize))
    }
}

fn to_edge_ids(wire: &[WireEdgeId]) -> Vec<tessera_core::EdgeId> {
    wire.iter()
        .map(|&(src, dst, t)| tessera_core::EdgeId::new(src, dst, t))
        .collect()
}

/// Serves the coordination store.
#[derive(Clone)]
pub struct RegistryServer {
    registry: Arc<RwLock<ShardRegistry>>,
}

impl RegistryServer {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(RwLock::new(ShardRegistry::new(base_path))),
        }
    }

    pub fn with_registry(registry: Arc<RwLock<ShardRegistry>>) -> Self {
        Self { registry }
    }

    pub async fn start(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        info!("registry server listening on {}", addr);
        listener
            .filter_map(|r| futures::future::ready(r.ok()))
            .map(server::BaseChannel::with_defaults)
            .for_each_concurrent(MAX_CONCURRENT_CHANNELS, |channel| {
                let server = self.clone();
                async move {
                    channel
                        .execute(server.serve())
                        .for_each(|f| async { tokio::spawn(f); })
                        .await
                }
            })
            .await;
        Ok(())
    }
}

impl RegistryService for RegistryServer {
    async fn set_cluster_meta(self, _ctx: Context, meta: ClusterMeta) -> RpcResult<()> {
        self.registry.write().await.set_cluster_meta(meta);
        Ok(())
    }

    #[instrument(skip(self, _ctx, meta))]
    async fn register_shard(
        self,
        _ctx: Context,
        shard: ShardId,
        address: String,
        meta: ShardMeta,
    ) -> RpcResult<()> {
        self.registry.write().await.register(shard, address, meta);
        Ok(())
    }

    #[instrument(skip(self, _ctx))]
    async fn deregister_shard(
        self,
        _ctx: Context,
        shard: ShardId,
        address: String,
    ) -> RpcResult<()> {
        self.registry.write().await.deregister(shard, &address);
        Ok(())
    }

    async fn get_cluster(self, _ctx: Context) -> RpcResult<ClusterView> {
        Ok(self.registry.read().await.cluster_view())
    }
}

/// The register-info documents as a typed pair for publication.
pub fn register_documents(store: &GraphStore) -> (ClusterMeta, ShardMeta) {
    let (cluster_doc, shard_doc) = store.register_info();
    let parse = |m: &HashMap<String, String>, key: &str| -> String {
        m.get(key).cloned().unwrap_or_default()
    };
    let cluster = ClusterMeta {
        num_shards: parse(&cluster_doc, "num_shards").parse().unwrap_or(1),
        num_partitions: parse(&cluster_doc, "num_partitions").parse().unwrap_or(0),
        graph_meta: parse(&cluster_doc, "graph_meta"),
    };
    (cluster, ShardMeta::from_document(&shard_doc))
}
