//! Value indexes backing DNF filters.
//!
//! An index maps a stringified value to a weighted set of UIDs (node
//! ids, or hashed edge ids). Neighbor indexes are registered as
//! `HashRange` and key on `"<root_id>::<value>"`, which lets neighbor
//! kernels apply per-root filters.

use std::collections::{HashMap, HashSet};

use tessera_core::{CompactWeightedCollection, Uid};
use tracing::error;

/// How an index is keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Plain value keys.
    Hash,
    /// `"<root_id>::<value>"` keys; usable as a neighbor index.
    HashRange,
}

/// A weighted set of UIDs produced by an index lookup. Entries are
/// kept sorted by uid so set operations are linear merges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexResult {
    entries: Vec<(Uid, f32)>,
}

impl IndexResult {
    pub fn new(mut entries: Vec<(Uid, f32)>) -> Self {
        entries.sort_by_key(|e| e.0);
        entries.dedup_by_key(|e| e.0);
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<Uid> {
        self.entries.iter().map(|e| e.0).collect()
    }

    pub fn weights(&self) -> Vec<f32> {
        self.entries.iter().map(|e| e.1).collect()
    }

    pub fn id_set(&self) -> HashSet<Uid> {
        self.entries.iter().map(|e| e.0).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set intersection; weights come from `self`.
    pub fn intersect(&self, other: &IndexResult) -> IndexResult {
        let (mut i, mut j) = (0, 0);
        let mut entries = Vec::new();
        while i < self.entries.len() && j < other.entries.len() {
            match self.entries[i].0.cmp(&other.entries[j].0) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    entries.push(self.entries[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        IndexResult { entries }
    }

    /// Set union; on duplicates the entry from `self` wins.
    pub fn union(&self, other: &IndexResult) -> IndexResult {
        let (mut i, mut j) = (0, 0);
        let mut entries = Vec::new();
        while i < self.entries.len() || j < other.entries.len() {
            if i == self.entries.len() {
                entries.push(other.entries[j]);
                j += 1;
            } else if j == other.entries.len() {
                entries.push(self.entries[i]);
                i += 1;
            } else {
                match self.entries[i].0.cmp(&other.entries[j].0) {
                    std::cmp::Ordering::Less => {
                        entries.push(self.entries[i]);
                        i += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        entries.push(other.entries[j]);
                        j += 1;
                    }
                    std::cmp::Ordering::Equal => {
                        entries.push(self.entries[i]);
                        i += 1;
                        j += 1;
                    }
                }
            }
        }
        IndexResult { entries }
    }

    /// Weighted sample with replacement.
    pub fn sample(&self, count: usize) -> Vec<(Uid, f32)> {
        let collection = CompactWeightedCollection::from_pairs(&self.entries);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            match collection.sample() {
                Some(pair) => out.push(pair),
                None => break,
            }
        }
        out
    }
}

/// A hash index from stringified values to weighted UID postings.
#[derive(Debug, Clone)]
pub struct HashIndex {
    kind: IndexKind,
    postings: HashMap<String, Vec<(Uid, f32)>>,
}

impl HashIndex {
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            postings: HashMap::new(),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn insert(&mut self, value: String, uid: Uid, weight: f32) {
        self.postings.entry(value).or_default().push((uid, weight));
    }

    /// Evaluate `op value` over the index. Comparison ops parse both
    /// sides as numbers when possible and fall back to string order.
    pub fn search(&self, op: &str, value: &str) -> IndexResult {
        match op {
            "eq" => IndexResult::new(self.postings.get(value).cloned().unwrap_or_default()),
            "ne" => self.scan(|key| key != value),
            "gt" => self.scan(|key| compare_values(key, value) == std::cmp::Ordering::Greater),
            "ge" => self.scan(|key| compare_values(key, value) != std::cmp::Ordering::Less),
            "lt" => self.scan(|key| compare_values(key, value) == std::cmp::Ordering::Less),
            "le" => self.scan(|key| compare_values(key, value) != std::cmp::Ordering::Greater),
            _ => {
                error!("unsupported index op: {}", op);
                IndexResult::empty()
            }
        }
    }

    /// As [`search`], but with every key prefixed by `"<root>::"`, for
    /// per-root neighbor filtering.
    pub fn search_with_root(&self, root: u64, op: &str, value: &str) -> IndexResult {
        let prefix = format!("{}::", root);
        match op {
            "eq" => {
                let key = format!("{}{}", prefix, value);
                IndexResult::new(self.postings.get(&key).cloned().unwrap_or_default())
            }
            _ => self.scan(|key| {
                key.strip_prefix(&prefix)
                    .map(|suffix| match op {
                        "ne" => suffix != value,
                        "gt" => compare_values(suffix, value) == std::cmp::Ordering::Greater,
                        "ge" => compare_values(suffix, value) != std::cmp::Ordering::Less,
                        "lt" => compare_values(suffix, value) == std::cmp::Ordering::Less,
                        "le" => compare_values(suffix, value) != std::cmp::Ordering::Greater,
                        _ => false,
                    })
                    .unwrap_or(false)
            }),
        }
    }

    fn scan<F: Fn(&str) -> bool>(&self, keep: F) -> IndexResult {
        let mut entries = Vec::new();
        for (key, posting) in &self.postings {
            if keep(key) {
                entries.extend_from_slice(posting);
            }
        }
        IndexResult::new(entries)
    }
}

fn compare_values(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    }
}

/// One index as laid out in an `index.json` document.
#[derive(serde::Serialize, serde::Deserialize)]
struct IndexDoc {
    kind: String,
    entries: Vec<(String, Uid, f32)>,
}

/// Registry of the indexes available to DNF evaluation.
#[derive(Debug, Default)]
pub struct IndexManager {
    indexes: HashMap<String, HashIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load indexes from an `index.json` document: a map of index name
    /// to `{kind, entries: [[value, uid, weight]]}`.
    pub fn load_json(bytes: &[u8]) -> tessera_core::Result<Self> {
        let docs: HashMap<String, IndexDoc> = serde_json::from_slice(bytes)
            .map_err(|e| tessera_core::EngineError::internal(e.to_string()))?;
        let mut manager = Self::new();
        for (name, doc) in docs {
            let kind = match doc.kind.as_str() {
                "hash_index" => IndexKind::Hash,
                "hash_range_index" => IndexKind::HashRange,
                other => {
                    return Err(tessera_core::EngineError::internal(format!(
                        "unknown index kind: {}",
                        other
                    )))
                }
            };
            let mut index = HashIndex::new(kind);
            for (value, uid, weight) in doc.entries {
                index.insert(value, uid, weight);
            }
            manager.add_index(name, index);
        }
        Ok(manager)
    }

    pub fn add_index(&mut self, name: impl Into<String>, index: HashIndex) {
        self.indexes.insert(name.into(), index);
    }

    pub fn get(&self, name: &str) -> Option<&HashIndex> {
        self.indexes.get(name)
    }

    /// Whether a field is backed by a neighbor (`HashRange`) index.
    pub fn is_neighbor_index(&self, name: &str) -> bool {
        self.indexes
            .get(name)
            .map(|i| i.kind() == IndexKind::HashRange)
            .unwrap_or(false)
    }

    /// `name:kind` summary of every registered index.
    pub fn index_info(&self) -> Vec<String> {
        let mut info: Vec<String> = self
            .indexes
            .iter()
            .map(|(name, index)| {
                let kind = match index.kind() {
                    IndexKind::Hash => "hash_index",
                    IndexKind::HashRange => "hash_range_index",
                };
                format!("{}:{}", name, kind)
            })
            .collect();
        info.sort();
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_index() -> HashIndex {
        let mut index = HashIndex::new(IndexKind::Hash);
        for id in 1..=6u64 {
            index.insert(format!("{}", id as f32 + 0.1), id, id as f32);
        }
        index
    }

    #[test]
    fn test_eq() {
        let index = price_index();
        let result = index.search("eq", "3.1");
        assert_eq!(result.ids(), vec![3]);
        assert_eq!(result.weights(), vec![3.0]);
        assert!(index.search("eq", "99").is_empty());
    }

    #[test]
    fn test_gt_numeric() {
        let index = price_index();
        let result = index.search("gt", "2");
        assert_eq!(result.ids(), vec![2, 3, 4, 5, 6]);
        let result = index.search("gt", "4.5");
        assert_eq!(result.ids(), vec![5, 6]);
    }

    #[test]
    fn test_le_and_ne() {
        let index = price_index();
        assert_eq!(index.search("le", "2.1").ids(), vec![1, 2]);
        assert_eq!(index.search("ne", "1.1").len(), 5);
    }

    #[test]
    fn test_unknown_op_empty() {
        let index = price_index();
        assert!(index.search("between", "1").is_empty());
    }

    #[test]
    fn test_intersect_union() {
        let a = IndexResult::new(vec![(1, 1.0), (2, 2.0), (4, 4.0)]);
        let b = IndexResult::new(vec![(2, 2.0), (3, 3.0), (4, 4.0)]);
        assert_eq!(a.intersect(&b).ids(), vec![2, 4]);
        assert_eq!(a.union(&b).ids(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_sample_weighted() {
        let result = IndexResult::new(vec![(2, 2.0), (6, 6.0)]);
        let samples = result.sample(30_000);
        assert_eq!(samples.len(), 30_000);
        let c6 = samples.iter().filter(|s| s.0 == 6).count() as f64;
        let c2 = samples.iter().filter(|s| s.0 == 2).count() as f64;
        let ratio = c6 / c2;
        assert!((2.7..3.3).contains(&ratio), "ratio {}", ratio);
    }

    #[test]
    fn test_sample_empty() {
        assert!(IndexResult::empty().sample(10).is_empty());
    }

    #[test]
    fn test_neighbor_index_root_keys() {
        let mut index = HashIndex::new(IndexKind::HashRange);
        index.insert("6::hot".into(), 3, 3.0);
        index.insert("6::hot".into(), 5, 5.0);
        index.insert("2::hot".into(), 3, 3.0);
        let result = index.search_with_root(6, "eq", "hot");
        assert_eq!(result.ids(), vec![3, 5]);
        let result = index.search_with_root(4, "eq", "hot");
        assert!(result.is_empty());
    }

    #[test]
    fn test_load_json() {
        let doc = r#"{
            "price": {"kind": "hash_index", "entries": [["2.1", 2, 2.0], ["3.1", 3, 3.0]]},
            "nb_tag": {"kind": "hash_range_index", "entries": [["6::hot", 5, 5.0]]}
        }"#;
        let manager = IndexManager::load_json(doc.as_bytes()).unwrap();
        assert_eq!(manager.get("price").unwrap().search("eq", "2.1").ids(), vec![2]);
        assert!(manager.is_neighbor_index("nb_tag"));
        assert!(IndexManager::load_json(b"{\"x\": {\"kind\": \"btree\", \"entries\": []}}").is_err());
    }

    #[test]
    fn test_manager_kinds() {
        let mut manager = IndexManager::new();
        manager.add_index("price", HashIndex::new(IndexKind::Hash));
        manager.add_index("nb_tag", HashIndex::new(IndexKind::HashRange));
        assert!(!manager.is_neighbor_index("price"));
        assert!(manager.is_neighbor_index("nb_tag"));
        assert!(!manager.is_neighbor_index("missing"));
        assert_eq!(
            manager.index_info(),
            vec!["nb_tag:hash_range_index", "price:hash_index"]
        );
    }
}
