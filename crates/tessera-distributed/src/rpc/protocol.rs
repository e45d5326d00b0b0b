//! tarpc service trait definitions.
//!
//! Two services make up the wire protocol: `GraphService`, served by
//! every shard, and `RegistryService`, the coordination store that
//! shards register with and clients discover through.

use serde::{Deserialize, Serialize};
use tessera_core::{EngineError, IdWeightPair};
use tessera_engine::{DagDef, WireTensor};

use crate::types::{ClusterMeta, ClusterView, ShardId, ShardMeta};

/// Result type for RPC operations; the error is serializable.
pub type RpcResult<T> = Result<T, RpcError>;

/// Serializable mirror of the engine error taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcError {
    InvalidArgument(String),
    NotFound(String),
    OutOfRange(String),
    Internal(String),
    Unavailable(String),
}

impl From<EngineError> for RpcError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::InvalidArgument(m) => RpcError::InvalidArgument(m),
            EngineError::NotFound(m) => RpcError::NotFound(m),
            EngineError::OutOfRange(m) => RpcError::OutOfRange(m),
            EngineError::Internal(m) => RpcError::Internal(m),
            EngineError::Unavailable(m) => RpcError::Unavailable(m),
        }
    }
}

impl From<RpcError> for EngineError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::InvalidArgument(m) => EngineError::InvalidArgument(m),
            RpcError::NotFound(m) => EngineError::NotFound(m),
            RpcError::OutOfRange(m) => EngineError::OutOfRange(m),
            RpcError::Internal(m) => EngineError::Internal(m),
            RpcError::Unavailable(m) => EngineError::Unavailable(m),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::InvalidArgument(m) => write!(f, "invalid argument: {}", m),
            RpcError::NotFound(m) => write!(f, "not found: {}", m),
            RpcError::OutOfRange(m) => write!(f, "out of range: {}", m),
            RpcError::Internal(m) => write!(f, "internal error: {}", m),
            RpcError::Unavailable(m) => write!(f, "unavailable: {}", m),
        }
    }
}

impl std::error::Error for RpcError {}

/// A flat edge id triple on the wire.
pub type WireEdgeId = (u64, u64, i32);

/// Service served by every shard.
#[tarpc::service]
pub trait GraphService {
    /// Liveness probe.
    async fn ping() -> String;

    /// Canonical remote entry: run a DAG against this shard's graph
    /// and return the requested output tensors.
    async fn execute(
        dag: DagDef,
        inputs: Vec<WireTensor>,
        outputs: Vec<String>,
    ) -> RpcResult<Vec<WireTensor>>;

    /// Weighted node sample across the given types.
    async fn sample_node(node_types: Vec<i32>, count: u32) -> RpcResult<Vec<u64>>;

    /// Weighted edge sample across the given types.
    async fn sample_edge(edge_types: Vec<i32>, count: u32) -> RpcResult<Vec<WireEdgeId>>;

    /// Node types for a batch of ids; -1 for foreign ids.
    async fn get_node_type(node_ids: Vec<u64>) -> RpcResult<Vec<i32>>;

    /// Typed node feature getters: per id, per feature id, the values.
    async fn get_node_float32_feature(
        node_ids: Vec<u64>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<f32>>>>;
    async fn get_node_uint64_feature(
        node_ids: Vec<u64>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<u64>>>>;
    async fn get_node_binary_feature(
        node_ids: Vec<u64>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<u8>>>>;

    /// Typed edge feature getters.
    async fn get_edge_float32_feature(
        edge_ids: Vec<WireEdgeId>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<f32>>>>;
    async fn get_edge_uint64_feature(
        edge_ids: Vec<WireEdgeId>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<u64>>>>;
    async fn get_edge_binary_feature(
        edge_ids: Vec<WireEdgeId>,
        fids: Vec<i32>,
    ) -> RpcResult<Vec<Vec<Vec<u8>>>>;

    /// Neighbor queries; one row per root.
    async fn get_full_neighbor(
        node_ids: Vec<u64>,
        edge_types: Vec<i32>,
    ) -> RpcResult<Vec<Vec<IdWeightPair>>>;
    async fn get_sorted_neighbor(
        node_ids: Vec<u64>,
        edge_types: Vec<i32>,
    ) -> RpcResult<Vec<Vec<IdWeightPair>>>;
    async fn get_top_k_neighbor(
        node_ids: Vec<u64>,
        edge_types: Vec<i32>,
        k: u32,
    ) -> RpcResult<Vec<Vec<IdWeightPair>>>;
    async fn sample_neighbor(
        node_ids: Vec<u64>,
        edge_types: Vec<i32>,
        count: u32,
    ) -> RpcResult<Vec<Vec<IdWeightPair>>>;
}

/// The coordination-store service: cluster metadata plus per-shard
/// ephemeral entries under a configured base path.
#[tarpc::service]
pub trait RegistryService {
    /// Publish the cluster metadata document. Idempotent.
    async fn set_cluster_meta(meta: ClusterMeta) -> RpcResult<()>;

    /// Register one shard endpoint with its weight document.
    /// Idempotent; re-registration refreshes the entry.
    async fn register_shard(shard: ShardId, address: String, meta: ShardMeta) -> RpcResult<()>;

    /// Mark a shard endpoint offline. Idempotent.
    async fn deregister_shard(shard: ShardId, address: String) -> RpcResult<()>;

    /// Cluster metadata plus every online shard.
    async fn get_cluster() -> RpcResult<ClusterView>;
}
