//! Shard registry bookkeeping.
//!
//! Holds the two layers of the coordination store under one base path:
//! cluster-wide metadata and per-shard ephemeral entries keyed by
//! `shard/<k>/<host:port>`. Registration and deregistration are
//! idempotent; clients mark vanished shards offline for the next
//! request.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::types::{ClusterMeta, ClusterView, ShardId, ShardInfo, ShardMeta, ShardStatus};

/// In-memory coordination-store state served by the registry service.
#[derive(Debug, Default)]
pub struct ShardRegistry {
    base_path: String,
    meta: ClusterMeta,
    /// Keyed `(shard, address)`; re-registration replaces the entry.
    shards: HashMap<(ShardId, String), ShardEntry>,
}

#[derive(Debug, Clone)]
struct ShardEntry {
    meta: ShardMeta,
    status: ShardStatus,
}

impl ShardRegistry {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Store the cluster metadata document. The last writer wins;
    /// shards all publish the same values.
    pub fn set_cluster_meta(&mut self, meta: ClusterMeta) {
        self.meta = meta;
    }

    pub fn cluster_meta(&self) -> &ClusterMeta {
        &self.meta
    }

    /// Register one shard endpoint. Registering an existing endpoint
    /// refreshes its metadata and marks it online.
    pub fn register(&mut self, shard: ShardId, address: impl Into<String>, meta: ShardMeta) {
        let address = address.into();
        info!("register {}/{} under {}", shard, address, self.base_path);
        self.shards.insert(
            (shard, address),
            ShardEntry {
                meta,
                status: ShardStatus::Online,
            },
        );
    }

    /// Deregister a shard endpoint. Unknown endpoints are a no-op.
    pub fn deregister(&mut self, shard: ShardId, address: &str) {
        debug!("deregister {}/{}", shard, address);
        if let Some(entry) = self.shards.get_mut(&(shard, address.to_string())) {
            entry.status = ShardStatus::Offline;
        }
    }

    /// Every registered shard endpoint, online first, sorted by id.
    pub fn shards(&self) -> Vec<ShardInfo> {
        let mut infos: Vec<ShardInfo> = self
            .shards
            .iter()
            .map(|((id, address), entry)| ShardInfo {
                id: *id,
                address: address.clone(),
                status: entry.status,
                meta: entry.meta.clone(),
            })
            .collect();
        infos.sort_by_key(|info| (info.id, info.status != ShardStatus::Online));
        infos
    }

    /// Online endpoints only.
    pub fn online_shards(&self) -> Vec<ShardInfo> {
        self.shards()
            .into_iter()
            .filter(|s| s.status == ShardStatus::Online)
            .collect()
    }

    pub fn cluster_view(&self) -> ClusterView {
        ClusterView {
            meta: self.meta.clone(),
            shards: self.online_shards(),
        }
    }

    pub fn count(&self) -> usize {
        self.shards.len()
    }
}
