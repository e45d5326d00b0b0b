//! Packed node record: typed neighbor groups and feature blocks.
//!
//! Neighbor ids live in one contiguous array partitioned by edge type,
//! with a per-group prefix index and a single running prefix-sum weight
//! array spanning all groups. Sampling binary-searches the weight
//! prefix inside a group; sorted queries k-way merge the per-group
//! sorted runs.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tessera_core::{
    random_select, BytesReader, BytesWriter, CompactWeightedCollection, EngineError, IdWeightPair,
    NodeId, Result,
};
use tracing::error;

use crate::feature::FeatureBlock;

/// Neighbor storage grouped by edge type.
#[derive(Debug, Clone, Default)]
struct NeighborInfo {
    /// Weighted collection over edge-type groups; weight = group total.
    group_collection: CompactWeightedCollection<i32>,
    /// Running end offset of each group in `neighbors`.
    group_idx: Vec<i32>,
    /// Neighbor ids, sorted ascending within each group.
    neighbors: Vec<NodeId>,
    /// Running prefix sums of neighbor weights across all groups.
    weight_sums: Vec<f32>,
}

impl NeighborInfo {
    fn group_count(&self) -> usize {
        self.group_idx.len()
    }

    /// Half-open index range of an edge-type group.
    fn group_range(&self, edge_type: i32) -> Option<(usize, usize)> {
        if edge_type < 0 || edge_type as usize >= self.group_idx.len() {
            return None;
        }
        let t = edge_type as usize;
        let begin = if t == 0 { 0 } else { self.group_idx[t - 1] as usize };
        Some((begin, self.group_idx[t] as usize))
    }

    /// Weight of the neighbor at global index `j`.
    fn weight_at(&self, j: usize) -> f32 {
        let pre = if j == 0 { 0.0 } else { self.weight_sums[j - 1] };
        self.weight_sums[j] - pre
    }
}

/// An immutable node record.
#[derive(Debug, Clone, Default)]
pub struct Node {
    id: NodeId,
    node_type: i32,
    weight: f32,
    nbr: NeighborInfo,
    sparse: FeatureBlock<u64>,
    dense: FeatureBlock<f32>,
    binary: FeatureBlock<u8>,
}

impl Node {
    pub fn new(id: NodeId, node_type: i32, weight: f32) -> Self {
        Self {
            id,
            node_type,
            weight,
            ..Default::default()
        }
    }

    /// Populate neighbor groups and feature blocks. `neighbor_ids[t]` /
    /// `neighbor_weights[t]` hold the group of edge type `t`; unsorted
    /// groups are sorted by id here.
    pub fn init(
        &mut self,
        neighbor_ids: &[Vec<NodeId>],
        neighbor_weights: &[Vec<f32>],
        sparse: &[Vec<u64>],
        dense: &[Vec<f32>],
        binary: &[Vec<u8>],
    ) -> Result<()> {
        if neighbor_ids.len() != neighbor_weights.len() {
            return Err(EngineError::invalid_argument(
                "neighbor id and weight group counts differ",
            ));
        }
        let group_count = neighbor_ids.len();
        let mut group_ids = Vec::with_capacity(group_count);
        let mut group_weights = Vec::with_capacity(group_count);
        let mut group_idx = Vec::with_capacity(group_count);
        let mut neighbors = Vec::new();
        let mut weight_sums = Vec::new();
        let mut total = 0i32;
        let mut running = 0.0f32;
        for (t, (ids, weights)) in neighbor_ids.iter().zip(neighbor_weights).enumerate() {
            if ids.len() != weights.len() {
                return Err(EngineError::invalid_argument(format!(
                    "neighbor group {} id/weight length mismatch",
                    t
                )));
            }
            let mut pairs: Vec<(NodeId, f32)> =
                ids.iter().copied().zip(weights.iter().copied()).collect();
            if !pairs.windows(2).all(|w| w[0].0 < w[1].0) {
                pairs.sort_by_key(|p| p.0);
            }
            group_ids.push(t as i32);
            group_weights.push(weights.iter().sum::<f32>());
            total += pairs.len() as i32;
            group_idx.push(total);
            for (id, w) in pairs {
                neighbors.push(id);
                running += w;
                weight_sums.push(running);
            }
        }
        self.nbr.group_collection.init(&group_ids, &group_weights);
        self.nbr.group_idx = group_idx;
        self.nbr.neighbors = neighbors;
        self.nbr.weight_sums = weight_sums;
        self.sparse = FeatureBlock::from_lists(sparse);
        self.dense = FeatureBlock::from_lists(dense);
        self.binary = FeatureBlock::from_lists(binary);
        Ok(())
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node_type(&self) -> i32 {
        self.node_type
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn sparse_features(&self) -> &FeatureBlock<u64> {
        &self.sparse
    }

    pub fn dense_features(&self) -> &FeatureBlock<f32> {
        &self.dense
    }

    pub fn binary_features(&self) -> &FeatureBlock<u8> {
        &self.binary
    }

    /// Weighted sample of `count` neighbors restricted to `edge_types`,
    /// with replacement. Empty when no requested group has neighbors;
    /// an out-of-range edge type in a multi-type request is an error
    /// and also yields the empty result.
    pub fn sample_neighbor(&self, edge_types: &[i32], count: usize) -> Vec<IdWeightPair> {
        let group_count = self.nbr.group_count();
        let mut sub_collection = None;
        if edge_types.len() > 1 && edge_types.len() < group_count {
            let mut pairs = Vec::with_capacity(edge_types.len());
            for &t in edge_types {
                match self.nbr.group_collection.get(t.max(0) as usize) {
                    Some(pair) if t >= 0 => pairs.push(pair),
                    _ => {
                        error!("edge types vec error");
                        return Vec::new();
                    }
                }
            }
            sub_collection = Some(CompactWeightedCollection::from_pairs(&pairs));
        }

        let mut vec = Vec::with_capacity(count);
        for _ in 0..count {
            let edge_type = if edge_types.len() == 1 {
                let t = edge_types[0];
                match self.nbr.group_range(t) {
                    Some((begin, end)) if end > begin => t,
                    Some(_) => return Vec::new(),
                    None => return Vec::new(),
                }
            } else if let Some(sub) = &sub_collection {
                match sub.sample() {
                    Some((t, _)) => t,
                    None => return Vec::new(),
                }
            } else {
                match self.nbr.group_collection.sample() {
                    Some((t, _)) => t,
                    None => return Vec::new(),
                }
            };
            let (begin, end) = match self.nbr.group_range(edge_type) {
                Some(r) => r,
                None => return Vec::new(),
            };
            let mid = random_select(&self.nbr.weight_sums, begin, end - 1);
            vec.push(IdWeightPair::new(
                self.nbr.neighbors[mid],
                self.nbr.weight_at(mid),
                edge_type,
            ));
        }
        vec
    }

    /// All neighbors whose edge type is in `edge_types`, in group order.
    pub fn full_neighbor(&self, edge_types: &[i32]) -> Vec<IdWeightPair> {
        let mut vec = Vec::with_capacity(edge_types.len() * 2);
        for &t in edge_types {
            if let Some((begin, end)) = self.nbr.group_range(t) {
                for j in begin..end {
                    vec.push(IdWeightPair::new(
                        self.nbr.neighbors[j],
                        self.nbr.weight_at(j),
                        t,
                    ));
                }
            }
        }
        vec
    }

    /// Full neighbor set sorted ascending by id: a k-way merge over the
    /// per-group sorted runs with a min-heap.
    pub fn sorted_full_neighbor(&self, edge_types: &[i32]) -> Vec<IdWeightPair> {
        let mut vec = Vec::with_capacity(edge_types.len() * 2);
        if edge_types.is_empty() {
            return vec;
        }
        let mut ptr = vec![0usize; self.nbr.group_count()];
        let mut heap: BinaryHeap<Reverse<(NodeId, i32)>> = BinaryHeap::new();
        for &t in edge_types {
            if let Some((begin, end)) = self.nbr.group_range(t) {
                if end > begin {
                    heap.push(Reverse((self.nbr.neighbors[begin], t)));
                    ptr[t as usize] = begin;
                }
            }
        }
        while let Some(Reverse((_, t))) = heap.pop() {
            let j = ptr[t as usize];
            ptr[t as usize] += 1;
            vec.push(IdWeightPair::new(
                self.nbr.neighbors[j],
                self.nbr.weight_at(j),
                t,
            ));
            let next = ptr[t as usize];
            if next < self.nbr.group_idx[t as usize] as usize {
                heap.push(Reverse((self.nbr.neighbors[next], t)));
            }
        }
        vec
    }

    /// The `k` largest-weight neighbors across `edge_types`, descending
    /// by weight with ties broken toward the smaller id. Any
    /// out-of-range edge type fails the whole query with an empty
    /// result.
    pub fn top_k_neighbor(&self, edge_types: &[i32], k: usize) -> Vec<IdWeightPair> {
        if k == 0 || edge_types.is_empty() {
            return Vec::new();
        }
        let mut heap: BinaryHeap<Reverse<TopKEntry>> = BinaryHeap::with_capacity(k + 1);
        for &t in edge_types {
            let (begin, end) = match self.nbr.group_range(t) {
                Some(r) => r,
                None => return Vec::new(),
            };
            for j in begin..end {
                let entry = TopKEntry {
                    id: self.nbr.neighbors[j],
                    weight: self.nbr.weight_at(j),
                    edge_type: t,
                };
                if heap.len() < k {
                    heap.push(Reverse(entry));
                } else if heap.peek().map(|e| e.0 < entry).unwrap_or(false) {
                    heap.pop();
                    heap.push(Reverse(entry));
                }
            }
        }
        let mut vec = vec![IdWeightPair::new(0, 0.0, 0); heap.len()];
        while let Some(Reverse(entry)) = heap.pop() {
            vec[heap.len()] = IdWeightPair::new(entry.id, entry.weight, entry.edge_type);
        }
        vec
    }

    /// Parse the full record. See the chunk format: id, type, weight,
    /// neighbor groups (sizes, group weights, ids, weights), then the
    /// sparse, dense and binary feature blocks.
    pub fn deserialize(bytes: &[u8]) -> Result<Node> {
        let mut reader = BytesReader::new(bytes);
        let id = reader.read_u64()?;
        let node_type = reader.read_i32()?;
        let weight = reader.read_f32()?;
        let group_count = reader.read_i32()?.max(0) as usize;
        let group_sizes = reader.read_i32_list(group_count)?;
        let group_weights = reader.read_f32_list(group_count)?;

        let mut ids_by_group = Vec::with_capacity(group_count);
        for &size in &group_sizes {
            ids_by_group.push(reader.read_u64_list(size.max(0) as usize)?);
        }
        let mut weights_by_group = Vec::with_capacity(group_count);
        for &size in &group_sizes {
            weights_by_group.push(reader.read_f32_list(size.max(0) as usize)?);
        }

        let mut node = Node::new(id, node_type, weight);
        node.init(
            &ids_by_group,
            &weights_by_group,
            &Vec::new(),
            &Vec::new(),
            &Vec::new(),
        )?;
        // Group weights from the file take precedence over recomputed
        // sums so rounding in upstream producers round-trips.
        let group_ids: Vec<i32> = (0..group_count as i32).collect();
        node.nbr.group_collection.init(&group_ids, &group_weights);
        node.sparse = FeatureBlock::<u64>::deserialize(&mut reader)?;
        node.dense = FeatureBlock::<f32>::deserialize(&mut reader)?;
        node.binary = FeatureBlock::<u8>::deserialize(&mut reader)?;
        Ok(node)
    }

    /// Serialize to the chunk record layout; the exact inverse of
    /// [`Node::deserialize`].
    pub fn serialize(&self, writer: &mut BytesWriter) {
        writer.write_u64(self.id);
        writer.write_i32(self.node_type);
        writer.write_f32(self.weight);
        let group_count = self.nbr.group_count();
        writer.write_i32(group_count as i32);
        let mut pre = 0i32;
        for &end in &self.nbr.group_idx {
            writer.write_i32(end - pre);
            pre = end;
        }
        for t in 0..group_count {
            let w = self.nbr.group_collection.get(t).map(|p| p.1).unwrap_or(0.0);
            writer.write_f32(w);
        }
        for &id in &self.nbr.neighbors {
            writer.write_u64(id);
        }
        for j in 0..self.nbr.neighbors.len() {
            writer.write_f32(self.nbr.weight_at(j));
        }
        self.sparse.serialize(writer);
        self.dense.serialize(writer);
        self.binary.serialize(writer);
    }

    pub fn serialized_bytes(&self) -> Vec<u8> {
        let mut writer = BytesWriter::new();
        self.serialize(&mut writer);
        writer.into_bytes()
    }
}

/// Heap key for top-k: weakest entry first. Smaller weight is weaker;
/// among equal weights the larger id is weaker, so smaller ids survive.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TopKEntry {
    id: NodeId,
    weight: f32,
    edge_type: i32,
}

impl Eq for TopKEntry {}

impl Ord for TopKEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TopKEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Node 1 of the fixture graph: type-0 neighbors {2, 4}, type-1
    /// neighbor {3}, weight of each edge = dst id.
    fn node_one() -> Node {
        let mut node = Node::new(1, 1, 1.0);
        node.init(
            &[vec![2, 4], vec![3]],
            &[vec![2.0, 4.0], vec![3.0]],
            &[vec![11, 12], vec![12, 11]],
            &[vec![1.1, 1.2], vec![1.3, 1.4, 1.5]],
            &[b"1a".to_vec(), b"1b".to_vec()],
        )
        .unwrap();
        node
    }

    fn pairs(v: &[(u64, f32, i32)]) -> Vec<IdWeightPair> {
        v.iter()
            .map(|&(id, w, t)| IdWeightPair::new(id, w, t))
            .collect()
    }

    #[test]
    fn test_full_neighbor() {
        let node = node_one();
        assert_eq!(
            node.full_neighbor(&[0, 1]),
            pairs(&[(2, 2.0, 0), (4, 4.0, 0), (3, 3.0, 1)])
        );
        assert_eq!(node.full_neighbor(&[0]), pairs(&[(2, 2.0, 0), (4, 4.0, 0)]));
        // Out-of-range types are skipped.
        assert_eq!(node.full_neighbor(&[5]), Vec::new());
    }

    #[test]
    fn test_sorted_full_neighbor() {
        let node = node_one();
        assert_eq!(
            node.sorted_full_neighbor(&[0, 1]),
            pairs(&[(2, 2.0, 0), (3, 3.0, 1), (4, 4.0, 0)])
        );
        assert_eq!(node.sorted_full_neighbor(&[]), Vec::new());
    }

    #[test]
    fn test_sorted_equals_sort_of_full() {
        let node = node_one();
        let mut full = node.full_neighbor(&[0, 1]);
        full.sort_by_key(|p| p.id);
        assert_eq!(node.sorted_full_neighbor(&[0, 1]), full);
    }

    #[test]
    fn test_top_k_neighbor() {
        let node = node_one();
        assert_eq!(
            node.top_k_neighbor(&[0, 1], 2),
            pairs(&[(4, 4.0, 0), (3, 3.0, 1)])
        );
        assert_eq!(
            node.top_k_neighbor(&[0, 1], 5),
            pairs(&[(4, 4.0, 0), (3, 3.0, 1), (2, 2.0, 0)])
        );
        assert_eq!(node.top_k_neighbor(&[0, 1], 0), Vec::new());
        // Invalid edge type fails the whole query.
        assert_eq!(node.top_k_neighbor(&[0, 9], 2), Vec::new());
    }

    #[test]
    fn test_top_k_tie_prefers_smaller_id() {
        let mut node = Node::new(7, 0, 1.0);
        node.init(
            &[vec![10, 20, 30]],
            &[vec![1.0, 1.0, 1.0]],
            &[],
            &[],
            &[],
        )
        .unwrap();
        let top = node.top_k_neighbor(&[0], 2);
        let ids: Vec<u64> = top.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![10, 20]);
    }

    #[test]
    fn test_sample_neighbor_single_type() {
        let mut node = Node::new(3, 1, 3.0);
        node.init(&[vec![4]], &[vec![4.0]], &[], &[], &[]).unwrap();
        let samples = node.sample_neighbor(&[0], 1000);
        assert_eq!(samples.len(), 1000);
        assert!(samples.iter().all(|p| p.id == 4 && p.edge_type == 0));
    }

    #[test]
    fn test_sample_neighbor_distribution() {
        // Node 5: type-0 neighbors 2 (w=2) and 6 (w=6).
        let mut node = Node::new(5, 1, 5.0);
        node.init(&[vec![2, 6]], &[vec![2.0, 6.0]], &[], &[], &[])
            .unwrap();
        let samples = node.sample_neighbor(&[0], 100_000);
        let mut counts = [0u32; 8];
        for p in &samples {
            counts[p.id as usize] += 1;
        }
        let ratio = counts[6] as f64 / counts[2] as f64;
        assert!((2.8..3.2).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn test_sample_neighbor_empty_group() {
        let mut node = Node::new(9, 0, 1.0);
        node.init(&[vec![], vec![1]], &[vec![], vec![1.0]], &[], &[], &[])
            .unwrap();
        assert_eq!(node.sample_neighbor(&[0], 5), Vec::new());
        assert_eq!(node.sample_neighbor(&[3], 5), Vec::new());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let node = node_one();
        let bytes = node.serialized_bytes();
        let back = Node::deserialize(&bytes).unwrap();
        assert_eq!(back.id(), node.id());
        assert_eq!(back.node_type(), node.node_type());
        assert_eq!(back.weight(), node.weight());
        assert_eq!(back.full_neighbor(&[0, 1]), node.full_neighbor(&[0, 1]));
        assert_eq!(back.sparse_features().get(0), node.sparse_features().get(0));
        assert_eq!(back.dense_features().get(1), node.dense_features().get(1));
        assert_eq!(back.binary_features().get_string(0), "1a");
    }

    #[test]
    fn test_deserialize_sorts_unsorted_groups() {
        let mut node = Node::new(6, 0, 6.0);
        // Supply a deliberately unsorted group.
        node.init(&[vec![5, 1, 3]], &[vec![5.0, 1.0, 3.0]], &[], &[], &[])
            .unwrap();
        assert_eq!(
            node.full_neighbor(&[0]),
            pairs(&[(1, 1.0, 0), (3, 3.0, 0), (5, 5.0, 0)])
        );
    }
}
