//! Core types for shard coordination.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tessera_core::EngineError;
use thiserror::Error;

/// Unique identifier for a shard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ShardId(pub u32);

impl ShardId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Status of a shard in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardStatus {
    /// Registered and serving.
    Online,
    /// Deregistered or missed its liveness window.
    Offline,
}

/// Cluster-wide metadata stored under `<base_path>/meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMeta {
    pub num_shards: u32,
    pub num_partitions: i32,
    /// JSON-serialized graph metadata.
    pub graph_meta: String,
}

/// Per-shard ephemeral state stored under
/// `<base_path>/shard/<k>/<host:port>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardMeta {
    /// Comma-joined per-type node weight sums.
    pub node_sum_weight: String,
    /// Comma-joined per-type edge weight sums.
    pub edge_sum_weight: String,
    /// Comma-joined graph labels.
    pub graph_label: String,
}

impl ShardMeta {
    /// Build from the store's register-info document.
    pub fn from_document(doc: &HashMap<String, String>) -> Self {
        Self {
            node_sum_weight: doc.get("node_sum_weight").cloned().unwrap_or_default(),
            edge_sum_weight: doc.get("edge_sum_weight").cloned().unwrap_or_default(),
            graph_label: doc.get("graph_label").cloned().unwrap_or_default(),
        }
    }

    pub fn node_weights(&self) -> Vec<f32> {
        parse_f32_list(&self.node_sum_weight)
    }

    pub fn edge_weights(&self) -> Vec<f32> {
        parse_f32_list(&self.edge_sum_weight)
    }

    pub fn labels(&self) -> Vec<String> {
        if self.graph_label.is_empty() {
            return Vec::new();
        }
        self.graph_label.split(',').map(str::to_string).collect()
    }
}

fn parse_f32_list(s: &str) -> Vec<f32> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',').filter_map(|v| v.parse().ok()).collect()
}

/// A registered shard as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: ShardId,
    pub address: String,
    pub status: ShardStatus,
    pub meta: ShardMeta,
}

/// The registry's full answer: cluster metadata plus every shard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterView {
    pub meta: ClusterMeta,
    pub shards: Vec<ShardInfo>,
}

/// Per-shard, per-type weight sums used by the weighted split kernels.
/// `node[t]` has one column per shard plus a trailing total.
#[derive(Debug, Clone, Default)]
pub struct ShardWeights {
    pub node: Vec<Vec<f32>>,
    pub edge: Vec<Vec<f32>>,
}

impl ShardWeights {
    /// Assemble from the registered shards' weight documents.
    pub fn from_cluster(view: &ClusterView) -> Self {
        let shard_num = view.meta.num_shards as usize;
        let build = |per_shard: Vec<Vec<f32>>| -> Vec<Vec<f32>> {
            let type_num = per_shard.iter().map(|w| w.len()).max().unwrap_or(0);
            let mut table = vec![vec![0.0; shard_num + 1]; type_num];
            for (s, weights) in per_shard.iter().enumerate() {
                for (t, &w) in weights.iter().enumerate() {
                    if s < shard_num {
                        table[t][s] = w;
                        table[t][shard_num] += w;
                    }
                }
            }
            table
        };
        let mut node_per_shard = vec![Vec::new(); shard_num];
        let mut edge_per_shard = vec![Vec::new(); shard_num];
        for shard in &view.shards {
            let s = shard.id.0 as usize;
            if s < shard_num {
                node_per_shard[s] = shard.meta.node_weights();
                edge_per_shard[s] = shard.meta.edge_weights();
            }
        }
        Self {
            node: build(node_per_shard),
            edge: build(edge_per_shard),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.node
            .first()
            .map(|row| row.len().saturating_sub(1))
            .unwrap_or(0)
    }
}

/// Errors raised by the distributed layer.
#[derive(Error, Debug, Clone)]
pub enum DistributedError {
    #[error("shard {0} not found")]
    ShardNotFound(ShardId),

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("shard {0} is offline")]
    ShardOffline(ShardId),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<DistributedError> for EngineError {
    fn from(e: DistributedError) -> Self {
        match e {
            DistributedError::Engine(inner) => inner,
            DistributedError::ShardNotFound(id) => {
                EngineError::NotFound(format!("shard {}", id))
            }
            DistributedError::ShardOffline(id) => {
                EngineError::Unavailable(format!("shard {} is offline", id))
            }
            DistributedError::RegistryUnavailable(msg) => EngineError::Internal(msg),
            DistributedError::Rpc(msg) => EngineError::Unavailable(msg),
        }
    }
}
