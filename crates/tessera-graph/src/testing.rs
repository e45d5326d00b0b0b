//! Shared six-node fixture graph used by tests across the workspace.
//!
//! Nodes 1..6 with weight = id; even ids are type 0, odd ids type 1.
//! Adjacency: 1→{2,3,4}, 2→{3,5}, 3→{4}, 4→{5}, 5→{2,6}, 6→{1,3,5};
//! edge weight = dst id. Node sparse_f1 is [10i+1, 10i+2], dense_f3 is
//! [i+0.1, i+0.2], binary_f5 is "<i>a". Edge sparse_f1 is
//! [100s+10d+1, 100s+10d+2].

use std::collections::HashMap;

use tessera_core::{BytesWriter, FeatureKind, NodeId};

use crate::edge::Edge;
use crate::index::{HashIndex, IndexKind, IndexManager};
use crate::meta::{FeatureInfo, GraphMeta};
use crate::node::Node;
use crate::store::GraphStore;

/// (dst, edge_type) adjacency of the fixture; edge weight is dst.
pub fn fixture_adjacency(src: NodeId) -> Vec<(NodeId, i32)> {
    match src {
        1 => vec![(2, 0), (3, 1), (4, 0)],
        2 => vec![(3, 1), (5, 1)],
        3 => vec![(4, 0)],
        4 => vec![(5, 1)],
        5 => vec![(2, 0), (6, 0)],
        6 => vec![(1, 1), (3, 1), (5, 1)],
        _ => Vec::new(),
    }
}

fn feature_info(kind: FeatureKind, id: i32, dim: i64) -> FeatureInfo {
    FeatureInfo { kind, id, dim }
}

pub fn fixture_meta() -> GraphMeta {
    let mut node_features = HashMap::new();
    node_features.insert("sparse_f1".into(), feature_info(FeatureKind::Sparse, 0, 2));
    node_features.insert("sparse_f2".into(), feature_info(FeatureKind::Sparse, 1, 2));
    node_features.insert("dense_f3".into(), feature_info(FeatureKind::Dense, 0, 2));
    node_features.insert("dense_f4".into(), feature_info(FeatureKind::Dense, 1, 3));
    node_features.insert("binary_f5".into(), feature_info(FeatureKind::Binary, 0, 0));
    node_features.insert("binary_f6".into(), feature_info(FeatureKind::Binary, 1, 0));
    node_features.insert(
        "binary_graph_label".into(),
        feature_info(FeatureKind::Binary, 2, 0),
    );
    let mut edge_features = HashMap::new();
    edge_features.insert("sparse_f1".into(), feature_info(FeatureKind::Sparse, 0, 2));
    edge_features.insert("dense_f3".into(), feature_info(FeatureKind::Dense, 0, 1));
    edge_features.insert("binary_f5".into(), feature_info(FeatureKind::Binary, 0, 0));
    let mut node_types = HashMap::new();
    node_types.insert("0".into(), 0);
    node_types.insert("1".into(), 1);
    let mut edge_types = HashMap::new();
    edge_types.insert("0".into(), 0);
    edge_types.insert("1".into(), 1);
    GraphMeta::new(
        "fixture",
        "1",
        6,
        12,
        2,
        node_features,
        edge_features,
        node_types,
        edge_types,
    )
}

pub fn fixture_node(id: NodeId) -> Node {
    let node_type = if id % 2 == 0 { 0 } else { 1 };
    let mut node = Node::new(id, node_type, id as f32);
    let mut groups: Vec<Vec<NodeId>> = vec![Vec::new(), Vec::new()];
    let mut weights: Vec<Vec<f32>> = vec![Vec::new(), Vec::new()];
    for (dst, t) in fixture_adjacency(id) {
        groups[t as usize].push(dst);
        weights[t as usize].push(dst as f32);
    }
    let label = if id % 2 == 0 { "g0" } else { "g1" };
    node.init(
        &groups,
        &weights,
        &[
            vec![10 * id + 1, 10 * id + 2],
            vec![10 * id + 2, 10 * id + 1],
        ],
        &[
            vec![id as f32 + 0.1, id as f32 + 0.2],
            vec![id as f32 + 0.3, id as f32 + 0.4, id as f32 + 0.5],
        ],
        &[
            format!("{}a", id).into_bytes(),
            format!("{}b", id).into_bytes(),
            label.as_bytes().to_vec(),
        ],
    )
    .unwrap();
    node
}

pub fn fixture_edge(src: NodeId, dst: NodeId, edge_type: i32) -> Edge {
    let mut edge = Edge::new(src, dst, edge_type, dst as f32);
    edge.init(
        &[vec![100 * src + 10 * dst + 1, 100 * src + 10 * dst + 2]],
        &[vec![src as f32 + dst as f32 / 10.0]],
        &[format!("{}{}a", src, dst).into_bytes()],
    );
    edge
}

/// The fixture store with both global samplers built.
pub fn fixture_store() -> GraphStore {
    let mut store = GraphStore::new();
    store.set_meta(fixture_meta());
    store.set_shard(0, 1);
    for id in 1..=6 {
        store.add_node(fixture_node(id));
        for (dst, t) in fixture_adjacency(id) {
            store.add_edge(fixture_edge(id, dst, t));
        }
    }
    store.build_node_sampler();
    store.build_edge_sampler();
    store
}

/// A shard-restricted fixture store: only nodes whose
/// `id % shard_number == shard_index` (with their outgoing edges).
pub fn fixture_shard_store(shard_index: i32, shard_number: i32) -> GraphStore {
    let mut store = GraphStore::new();
    store.set_meta(fixture_meta());
    store.set_shard(shard_index, shard_number);
    for id in 1..=6u64 {
        if id % shard_number as u64 != shard_index as u64 {
            continue;
        }
        store.add_node(fixture_node(id));
        for (dst, t) in fixture_adjacency(id) {
            store.add_edge(fixture_edge(id, dst, t));
        }
    }
    store.build_node_sampler();
    store.build_edge_sampler();
    store
}

/// Chunk-file bytes for one partition: nodes with
/// `id % partition_count == partition`, one block per node.
pub fn fixture_chunk_bytes(partition: u64, partition_count: u64) -> Vec<u8> {
    let mut out = BytesWriter::new();
    for id in 1..=6u64 {
        if id % partition_count != partition {
            continue;
        }
        let node_bytes = fixture_node(id).serialized_bytes();
        let edge_bytes: Vec<Vec<u8>> = fixture_adjacency(id)
            .into_iter()
            .map(|(dst, t)| fixture_edge(id, dst, t).serialized_bytes())
            .collect();
        let total_edge_bytes: usize = edge_bytes.iter().map(|b| b.len()).sum();
        let block_size = 4 + 4 + 4 * edge_bytes.len() + node_bytes.len() + total_edge_bytes;
        out.write_u32(block_size as u32);
        out.write_u32(node_bytes.len() as u32);
        out.write_bytes(&node_bytes);
        out.write_u32(edge_bytes.len() as u32);
        for bytes in &edge_bytes {
            out.write_u32(bytes.len() as u32);
        }
        for bytes in &edge_bytes {
            out.write_bytes(bytes);
        }
    }
    out.into_bytes()
}

/// Index manager with a `price` index over the nodes (price of node i
/// is i + 0.1, weighted by node weight) and a `graph_label` index.
pub fn fixture_index_manager() -> IndexManager {
    let mut manager = IndexManager::new();
    let mut price = HashIndex::new(IndexKind::Hash);
    let mut label = HashIndex::new(IndexKind::Hash);
    for id in 1..=6u64 {
        price.insert(format!("{}", id as f32 + 0.1), id, id as f32);
        let l = if id % 2 == 0 { "g0" } else { "g1" };
        label.insert(l.to_string(), id, id as f32);
    }
    manager.add_index("price", price);
    manager.add_index("graph_label", label);
    manager
}
