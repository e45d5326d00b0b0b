//! The in-memory graph store.
//!
//! Owns the node and edge maps, the uid reverse index and the global
//! weighted samplers. The store is mutated only while the builder loads
//! chunk files; afterwards every operation is a lock-free read.

use std::collections::{HashMap, HashSet};

use tessera_core::{
    BytesWriter, CompactWeightedCollection, EdgeId, FastWeightedCollection, IdWeightPair, NodeId,
    Uid,
};
use tracing::{error, info, warn};

use crate::edge::Edge;
use crate::meta::GraphMeta;
use crate::node::Node;

/// Reserved binary node feature holding the node's graph label.
pub const GRAPH_LABEL_FEATURE: &str = "binary_graph_label";

/// The compact graph owned by one shard.
#[derive(Debug, Default)]
pub struct GraphStore {
    node_map: HashMap<NodeId, Node>,
    edge_map: HashMap<EdgeId, Edge>,
    edge_id_map: HashMap<Uid, EdgeId>,
    node_weight_sums: Vec<f32>,
    edge_weight_sums: Vec<f32>,
    node_type_collection: FastWeightedCollection<i32>,
    edge_type_collection: FastWeightedCollection<i32>,
    node_samplers: Vec<FastWeightedCollection<NodeId>>,
    edge_samplers: Vec<FastWeightedCollection<EdgeId>>,
    node_sampler_ok: bool,
    edge_sampler_ok: bool,
    shard_index: i32,
    shard_number: i32,
    meta: GraphMeta,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            shard_number: 1,
            ..Default::default()
        }
    }

    pub fn set_shard(&mut self, shard_index: i32, shard_number: i32) {
        self.shard_index = shard_index;
        self.shard_number = shard_number;
    }

    pub fn shard_index(&self) -> i32 {
        self.shard_index
    }

    pub fn shard_number(&self) -> i32 {
        self.shard_number
    }

    pub fn set_meta(&mut self, meta: GraphMeta) {
        self.meta = meta;
    }

    pub fn meta(&self) -> &GraphMeta {
        &self.meta
    }

    pub fn add_node(&mut self, node: Node) {
        self.node_map.insert(node.id(), node);
    }

    pub fn add_nodes(&mut self, nodes: Vec<Node>) {
        self.node_map.reserve(nodes.len());
        for node in nodes {
            self.node_map.insert(node.id(), node);
        }
    }

    pub fn add_edge(&mut self, edge: Edge) {
        let eid = edge.id();
        self.edge_id_map.insert(eid.uid(), eid);
        self.edge_map.insert(eid, edge);
    }

    pub fn add_edges(&mut self, edges: Vec<Edge>) {
        self.edge_map.reserve(edges.len());
        self.edge_id_map.reserve(edges.len());
        for edge in edges {
            self.add_edge(edge);
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_map.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_map.len()
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.node_map.get(&id)
    }

    /// Edge lookup. Calling this on a shard whose `load_data_type`
    /// excluded edges is a configuration error.
    pub fn get_edge(&self, id: EdgeId) -> Option<&Edge> {
        debug_assert!(
            !self.edge_map.is_empty(),
            "edges must be loaded before get_edge"
        );
        if self.edge_map.is_empty() {
            error!("edge map is empty; edges were not loaded");
            return None;
        }
        self.edge_map.get(&id)
    }

    pub fn edge_id_to_uid(&self, eid: EdgeId) -> Uid {
        eid.uid()
    }

    pub fn uid_to_edge_id(&self, uid: Uid) -> Option<EdgeId> {
        self.edge_id_map.get(&uid).copied()
    }

    /// Build the per-type node samplers and the type-over-types
    /// collection. Weights within a type are normalized by the type's
    /// total so the per-type collections sample probabilities directly.
    pub fn build_node_sampler(&mut self) {
        info!("building global node sampler");
        let type_num = self.node_type_num();
        let mut ids: Vec<Vec<NodeId>> = vec![Vec::new(); type_num];
        let mut weights: Vec<Vec<f32>> = vec![Vec::new(); type_num];
        self.node_weight_sums = vec![0.0; type_num];
        for node in self.node_map.values() {
            let t = node.node_type();
            if t < 0 || t as usize >= type_num {
                warn!("node {} has out-of-range type {}", node.id(), t);
                continue;
            }
            ids[t as usize].push(node.id());
            weights[t as usize].push(node.weight());
            self.node_weight_sums[t as usize] += node.weight();
        }
        self.node_samplers = Vec::with_capacity(type_num);
        for t in 0..type_num {
            let sum = self.node_weight_sums[t];
            if sum > 0.0 {
                for w in weights[t].iter_mut() {
                    *w /= sum;
                }
            }
            let mut sampler = FastWeightedCollection::new();
            sampler.init(&ids[t], &weights[t]);
            self.node_samplers.push(sampler);
        }
        let type_ids: Vec<i32> = (0..type_num as i32).collect();
        self.node_type_collection
            .init(&type_ids, &self.node_weight_sums);
        self.node_sampler_ok = true;
    }

    pub fn build_edge_sampler(&mut self) {
        info!("building global edge sampler");
        let type_num = self.edge_type_num();
        let mut ids: Vec<Vec<EdgeId>> = vec![Vec::new(); type_num];
        let mut weights: Vec<Vec<f32>> = vec![Vec::new(); type_num];
        self.edge_weight_sums = vec![0.0; type_num];
        for edge in self.edge_map.values() {
            let t = edge.edge_type();
            if t < 0 || t as usize >= type_num {
                warn!("edge {} has out-of-range type {}", edge.id(), t);
                continue;
            }
            ids[t as usize].push(edge.id());
            weights[t as usize].push(edge.weight());
            self.edge_weight_sums[t as usize] += edge.weight();
        }
        self.edge_samplers = Vec::with_capacity(type_num);
        for t in 0..type_num {
            let sum = self.edge_weight_sums[t];
            if sum > 0.0 {
                for w in weights[t].iter_mut() {
                    *w /= sum;
                }
            }
            let mut sampler = FastWeightedCollection::new();
            sampler.init(&ids[t], &weights[t]);
            self.edge_samplers.push(sampler);
        }
        let type_ids: Vec<i32> = (0..type_num as i32).collect();
        self.edge_type_collection
            .init(&type_ids, &self.edge_weight_sums);
        self.edge_sampler_ok = true;
    }

    pub fn node_sampler_ok(&self) -> bool {
        self.node_sampler_ok
    }

    pub fn edge_sampler_ok(&self) -> bool {
        self.edge_sampler_ok
    }

    fn node_type_num(&self) -> usize {
        if !self.meta.node_types.is_empty() {
            return self.meta.node_types.len();
        }
        self.node_map
            .values()
            .map(|n| n.node_type() + 1)
            .max()
            .unwrap_or(0)
            .max(0) as usize
    }

    fn edge_type_num(&self) -> usize {
        if !self.meta.edge_types.is_empty() {
            return self.meta.edge_types.len();
        }
        self.edge_map
            .values()
            .map(|e| e.edge_type() + 1)
            .max()
            .unwrap_or(0)
            .max(0) as usize
    }

    /// Sample `count` node ids of one type; -1 samples a type per draw
    /// from the type-over-types collection.
    pub fn sample_node(&self, node_type: i32, count: usize) -> Vec<NodeId> {
        if !self.node_sampler_ok {
            error!("global node sampler is not initialized");
            return Vec::new();
        }
        let mut vec = Vec::with_capacity(count);
        if node_type == -1 {
            if self.node_type_collection.sum_weight() == 0.0 {
                return vec;
            }
            for _ in 0..count {
                if let Some((t, _)) = self.node_type_collection.sample() {
                    if let Some((id, _)) = self.node_samplers[t as usize].sample() {
                        vec.push(id);
                    }
                }
            }
        } else {
            let sampler = match self.node_samplers.get(node_type.max(0) as usize) {
                Some(s) if node_type >= 0 && s.sum_weight() > 0.0 => s,
                _ => return vec,
            };
            for _ in 0..count {
                if let Some((id, _)) = sampler.sample() {
                    vec.push(id);
                }
            }
        }
        vec
    }

    /// Sample across a set of node types, re-weighting by the per-type
    /// weight sums.
    pub fn sample_node_of_types(&self, node_types: &[i32], count: usize) -> Vec<NodeId> {
        if !self.node_sampler_ok {
            error!("global node sampler is not initialized");
            return Vec::new();
        }
        if node_types.len() == 1 {
            return self.sample_node(node_types[0], count);
        }
        let requested: HashSet<i32> = node_types.iter().copied().collect();
        if requested.contains(&-1) {
            return self.sample_node(-1, count);
        }
        let mut sub = Vec::with_capacity(node_types.len());
        for i in 0..self.node_type_collection.len() {
            if let Some(pair) = self.node_type_collection.get(i) {
                if requested.contains(&pair.0) {
                    sub.push(pair);
                }
            }
        }
        let sub_collection = CompactWeightedCollection::from_pairs(&sub);
        let mut vec = Vec::with_capacity(count);
        if sub_collection.sum_weight() > 0.0 {
            for _ in 0..count {
                if let Some((t, _)) = sub_collection.sample() {
                    if let Some((id, _)) = self.node_samplers[t as usize].sample() {
                        vec.push(id);
                    }
                }
            }
        }
        vec
    }

    pub fn sample_edge(&self, edge_type: i32, count: usize) -> Vec<EdgeId> {
        if !self.edge_sampler_ok {
            error!("global edge sampler is not initialized");
            return Vec::new();
        }
        let mut vec = Vec::with_capacity(count);
        if edge_type == -1 {
            if self.edge_type_collection.sum_weight() == 0.0 {
                return vec;
            }
            for _ in 0..count {
                if let Some((t, _)) = self.edge_type_collection.sample() {
                    if let Some((id, _)) = self.edge_samplers[t as usize].sample() {
                        vec.push(id);
                    }
                }
            }
        } else {
            let sampler = match self.edge_samplers.get(edge_type.max(0) as usize) {
                Some(s) if edge_type >= 0 && s.sum_weight() > 0.0 => s,
                _ => return vec,
            };
            for _ in 0..count {
                if let Some((id, _)) = sampler.sample() {
                    vec.push(id);
                }
            }
        }
        vec
    }

    pub fn sample_edge_of_types(&self, edge_types: &[i32], count: usize) -> Vec<EdgeId> {
        if !self.edge_sampler_ok {
            error!("global edge sampler is not initialized");
            return Vec::new();
        }
        if edge_types.len() == 1 {
            return self.sample_edge(edge_types[0], count);
        }
        let requested: HashSet<i32> = edge_types.iter().copied().collect();
        if requested.contains(&-1) {
            return self.sample_edge(-1, count);
        }
        let mut sub = Vec::with_capacity(edge_types.len());
        for i in 0..self.edge_type_collection.len() {
            if let Some(pair) = self.edge_type_collection.get(i) {
                if requested.contains(&pair.0) {
                    sub.push(pair);
                }
            }
        }
        let sub_collection = CompactWeightedCollection::from_pairs(&sub);
        let mut vec = Vec::with_capacity(count);
        if sub_collection.sum_weight() > 0.0 {
            for _ in 0..count {
                if let Some((t, _)) = sub_collection.sample() {
                    if let Some((id, _)) = self.edge_samplers[t as usize].sample() {
                        vec.push(id);
                    }
                }
            }
        }
        vec
    }

    /// Node types for a batch of ids; -1 for ids not on this shard.
    pub fn node_types(&self, ids: &[NodeId]) -> Vec<i32> {
        ids.iter()
            .map(|id| self.get_node(*id).map(|n| n.node_type()).unwrap_or(-1))
            .collect()
    }

    /// Per-root full neighbor lists; missing roots yield empty rows.
    pub fn full_neighbors(&self, ids: &[NodeId], edge_types: &[i32]) -> Vec<Vec<IdWeightPair>> {
        ids.iter()
            .map(|id| {
                self.get_node(*id)
                    .map(|n| n.full_neighbor(edge_types))
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn sorted_full_neighbors(
        &self,
        ids: &[NodeId],
        edge_types: &[i32],
    ) -> Vec<Vec<IdWeightPair>> {
        ids.iter()
            .map(|id| {
                self.get_node(*id)
                    .map(|n| n.sorted_full_neighbor(edge_types))
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn top_k_neighbors(
        &self,
        ids: &[NodeId],
        edge_types: &[i32],
        k: usize,
    ) -> Vec<Vec<IdWeightPair>> {
        ids.iter()
            .map(|id| {
                self.get_node(*id)
                    .map(|n| n.top_k_neighbor(edge_types, k))
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn sample_neighbors(
        &self,
        ids: &[NodeId],
        edge_types: &[i32],
        count: usize,
    ) -> Vec<Vec<IdWeightPair>> {
        ids.iter()
            .map(|id| {
                self.get_node(*id)
                    .map(|n| n.sample_neighbor(edge_types, count))
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Batch sparse features: per node, per feature id, the values.
    /// Missing nodes and unknown feature ids yield empty value lists.
    pub fn node_sparse_features(&self, ids: &[NodeId], fids: &[i32]) -> Vec<Vec<Vec<u64>>> {
        ids.iter()
            .map(|id| match self.get_node(*id) {
                Some(n) => fids
                    .iter()
                    .map(|&f| n.sparse_features().get(f).to_vec())
                    .collect(),
                None => vec![Vec::new(); fids.len()],
            })
            .collect()
    }

    pub fn node_dense_features(&self, ids: &[NodeId], fids: &[i32]) -> Vec<Vec<Vec<f32>>> {
        ids.iter()
            .map(|id| match self.get_node(*id) {
                Some(n) => fids
                    .iter()
                    .map(|&f| n.dense_features().get(f).to_vec())
                    .collect(),
                None => vec![Vec::new(); fids.len()],
            })
            .collect()
    }

    pub fn node_binary_features(&self, ids: &[NodeId], fids: &[i32]) -> Vec<Vec<Vec<u8>>> {
        ids.iter()
            .map(|id| match self.get_node(*id) {
                Some(n) => fids
                    .iter()
                    .map(|&f| n.binary_features().get(f).to_vec())
                    .collect(),
                None => vec![Vec::new(); fids.len()],
            })
            .collect()
    }

    pub fn edge_sparse_features(&self, ids: &[EdgeId], fids: &[i32]) -> Vec<Vec<Vec<u64>>> {
        ids.iter()
            .map(|id| match self.get_edge(*id) {
                Some(e) => fids
                    .iter()
                    .map(|&f| e.sparse_features().get(f).to_vec())
                    .collect(),
                None => vec![Vec::new(); fids.len()],
            })
            .collect()
    }

    pub fn edge_dense_features(&self, ids: &[EdgeId], fids: &[i32]) -> Vec<Vec<Vec<f32>>> {
        ids.iter()
            .map(|id| match self.get_edge(*id) {
                Some(e) => fids
                    .iter()
                    .map(|&f| e.dense_features().get(f).to_vec())
                    .collect(),
                None => vec![Vec::new(); fids.len()],
            })
            .collect()
    }

    pub fn edge_binary_features(&self, ids: &[EdgeId], fids: &[i32]) -> Vec<Vec<Vec<u8>>> {
        ids.iter()
            .map(|id| match self.get_edge(*id) {
                Some(e) => fids
                    .iter()
                    .map(|&f| e.binary_features().get(f).to_vec())
                    .collect(),
                None => vec![Vec::new(); fids.len()],
            })
            .collect()
    }

    /// Per-type node weight totals; empty until the sampler is built.
    pub fn node_weight_sums(&self) -> Vec<f32> {
        if !self.node_sampler_ok {
            warn!("global node sampler is not built");
            return Vec::new();
        }
        self.node_weight_sums.clone()
    }

    pub fn edge_weight_sums(&self) -> Vec<f32> {
        if !self.edge_sampler_ok {
            warn!("global edge sampler is not built");
            return Vec::new();
        }
        self.edge_weight_sums.clone()
    }

    /// Distinct graph labels over the reserved binary feature.
    pub fn graph_labels(&self) -> Vec<String> {
        let label_id = self.meta.node_feature_id(GRAPH_LABEL_FEATURE);
        if label_id == -1 {
            return Vec::new();
        }
        let mut set = HashSet::new();
        for node in self.node_map.values() {
            let label = node.binary_features().get_string(label_id);
            if !label.is_empty() {
                set.insert(label);
            }
        }
        let mut labels: Vec<String> = set.into_iter().collect();
        labels.sort();
        labels
    }

    /// The two registry documents: cluster-wide metadata and this
    /// shard's ephemeral state.
    pub fn register_info(&self) -> (HashMap<String, String>, HashMap<String, String>) {
        let mut cluster = HashMap::new();
        cluster.insert("num_shards".to_string(), self.shard_number.to_string());
        cluster.insert(
            "num_partitions".to_string(),
            self.meta.partition_count.to_string(),
        );
        cluster.insert("graph_meta".to_string(), self.meta.to_json());

        let mut shard = HashMap::new();
        shard.insert("node_sum_weight".to_string(), join_f32(&self.node_weight_sums()));
        shard.insert("edge_sum_weight".to_string(), join_f32(&self.edge_weight_sums()));
        shard.insert("graph_label".to_string(), self.graph_labels().join(","));
        (cluster, shard)
    }

    /// Dump every record to a writer, nodes then edges, each section
    /// length-prefixed by record count.
    pub fn dump(&self, writer: &mut BytesWriter) {
        writer.write_u32(self.node_map.len() as u32);
        for node in self.node_map.values() {
            let bytes = node.serialized_bytes();
            writer.write_u32(bytes.len() as u32);
            writer.write_bytes(&bytes);
        }
        writer.write_u32(self.edge_map.len() as u32);
        for edge in self.edge_map.values() {
            let bytes = edge.serialized_bytes();
            writer.write_u32(bytes.len() as u32);
            writer.write_bytes(&bytes);
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_map.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edge_map.values()
    }
}

fn join_f32(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_store;

    #[test]
    fn test_lookup() {
        let store = fixture_store();
        assert_eq!(store.node_count(), 6);
        assert_eq!(store.edge_count(), 12);
        assert_eq!(store.get_node(3).unwrap().weight(), 3.0);
        assert!(store.get_node(9).is_none());
        let edge = store.get_edge(EdgeId::new(1, 2, 0)).unwrap();
        assert_eq!(edge.weight(), 2.0);
        let edge = store.get_edge(EdgeId::new(6, 3, 1)).unwrap();
        assert_eq!(edge.weight(), 3.0);
    }

    #[test]
    fn test_uid_roundtrip() {
        let store = fixture_store();
        let eid = EdgeId::new(1, 2, 0);
        let uid = store.edge_id_to_uid(eid);
        assert_eq!(store.uid_to_edge_id(uid), Some(eid));
        assert_eq!(store.uid_to_edge_id(12345), None);
    }

    #[test]
    fn test_sample_node_distribution() {
        let store = fixture_store();
        let ids = store.sample_node(0, 100_000);
        assert_eq!(ids.len(), 100_000);
        let mut counts = [0u32; 7];
        for id in ids {
            counts[id as usize] += 1;
        }
        assert_eq!(counts[1] + counts[3] + counts[5], 0);
        let r42 = counts[4] as f64 / counts[2] as f64;
        let r62 = counts[6] as f64 / counts[2] as f64;
        assert!((1.9..2.1).contains(&r42), "ratio {}", r42);
        assert!((2.9..3.1).contains(&r62), "ratio {}", r62);
    }

    #[test]
    fn test_sample_node_all_types() {
        let store = fixture_store();
        let ids = store.sample_node(-1, 420_000);
        let mut counts = [0u32; 7];
        for id in ids {
            counts[id as usize] += 1;
        }
        for i in 2..7 {
            let ratio = counts[i] as f64 / counts[i - 1] as f64;
            let truth = i as f64 / (i - 1) as f64;
            assert!(
                ratio > truth * 0.95 && ratio < truth * 1.05,
                "i {} ratio {} truth {}",
                i,
                ratio,
                truth
            );
        }
    }

    #[test]
    fn test_sample_node_type_subset() {
        let store = fixture_store();
        let ids = store.sample_node_of_types(&[0, 1], 10_000);
        assert_eq!(ids.len(), 10_000);
        // Node 6 (weight 6) should dominate node 1 (weight 1) ~6:1.
        let mut counts = [0u32; 7];
        for id in ids {
            counts[id as usize] += 1;
        }
        assert!(counts[6] > counts[1]);
    }

    #[test]
    fn test_sample_invalid_type_is_empty() {
        let store = fixture_store();
        assert!(store.sample_node(5, 10).is_empty());
        assert!(store.sample_edge(9, 10).is_empty());
    }

    #[test]
    fn test_sample_edge_type_restricted() {
        let store = fixture_store();
        let eids = store.sample_edge(1, 10);
        assert_eq!(eids.len(), 10);
        assert!(eids.iter().all(|e| e.edge_type == 1));
    }

    #[test]
    fn test_node_types_batch() {
        let store = fixture_store();
        assert_eq!(store.node_types(&[1, 2, 42]), vec![1, 0, -1]);
    }

    #[test]
    fn test_full_neighbors_missing_root_empty() {
        let store = fixture_store();
        let rows = store.full_neighbors(&[1, 99], &[0, 1]);
        assert_eq!(rows[0].len(), 3);
        assert!(rows[1].is_empty());
    }

    #[test]
    fn test_weight_sums() {
        let store = fixture_store();
        // Type 0 nodes: 2+4+6, type 1 nodes: 1+3+5.
        assert_eq!(store.node_weight_sums(), vec![12.0, 9.0]);
    }

    #[test]
    fn test_register_info() {
        let store = fixture_store();
        let (cluster, shard) = store.register_info();
        assert_eq!(cluster.get("num_shards").unwrap(), "1");
        assert!(cluster.contains_key("graph_meta"));
        assert_eq!(shard.get("node_sum_weight").unwrap(), "12,9");
        assert!(shard.contains_key("graph_label"));
    }

    #[test]
    fn test_graph_labels() {
        let store = fixture_store();
        assert_eq!(store.graph_labels(), vec!["g0", "g1"]);
    }

    #[test]
    fn test_dump_roundtrip() {
        use crate::edge::Edge;
        use crate::node::Node;
        use tessera_core::BytesReader;

        let store = fixture_store();
        let mut writer = BytesWriter::new();
        store.dump(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = BytesReader::new(&bytes);
        let node_count = reader.read_u32().unwrap();
        assert_eq!(node_count as usize, store.node_count());
        for _ in 0..node_count {
            let len = reader.read_u32().unwrap() as usize;
            let record = reader.read_bytes(len).unwrap();
            let node = Node::deserialize(&record).unwrap();
            assert_eq!(node.weight(), node.id() as f32);
        }
        let edge_count = reader.read_u32().unwrap();
        assert_eq!(edge_count as usize, store.edge_count());
        for _ in 0..edge_count {
            let len = reader.read_u32().unwrap() as usize;
            let record = reader.read_bytes(len).unwrap();
            let edge = Edge::deserialize(&record).unwrap();
            assert!(store.get_edge(edge.id()).is_some());
        }
        assert_eq!(reader.remaining(), 0);
    }
}
