//! Graph metadata: schema, counts and type-name maps.
//!
//! The metadata travels in two forms: a binary file next to the chunk
//! files (`graph.meta`) and a JSON document published to the shard
//! registry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tessera_core::{BytesReader, BytesWriter, EngineError, FeatureKind, Result};

/// Schema entry for one named feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub kind: FeatureKind,
    /// Index of the feature inside its kind's block.
    pub id: i32,
    /// Declared value dimension; 0 when variable.
    pub dim: i64,
}

/// Immutable description of a loaded graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphMeta {
    pub name: String,
    pub version: String,
    pub node_count: u64,
    pub edge_count: u64,
    pub partition_count: i32,
    pub node_features: HashMap<String, FeatureInfo>,
    pub edge_features: HashMap<String, FeatureInfo>,
    pub node_types: HashMap<String, u32>,
    pub edge_types: HashMap<String, u32>,
}

impl GraphMeta {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        node_count: u64,
        edge_count: u64,
        partition_count: i32,
        node_features: HashMap<String, FeatureInfo>,
        edge_features: HashMap<String, FeatureInfo>,
        node_types: HashMap<String, u32>,
        edge_types: HashMap<String, u32>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            node_count,
            edge_count,
            partition_count,
            node_features,
            edge_features,
            node_types,
            edge_types,
        }
    }

    pub fn node_feature(&self, name: &str) -> Option<FeatureInfo> {
        self.node_features.get(name).copied()
    }

    pub fn edge_feature(&self, name: &str) -> Option<FeatureInfo> {
        self.edge_features.get(name).copied()
    }

    /// Feature id for a node feature name; -1 when unknown, matching
    /// the "invalid feature yields empty output" contract downstream.
    pub fn node_feature_id(&self, name: &str) -> i32 {
        self.node_features.get(name).map(|f| f.id).unwrap_or(-1)
    }

    pub fn edge_feature_id(&self, name: &str) -> i32 {
        self.edge_features.get(name).map(|f| f.id).unwrap_or(-1)
    }

    pub fn node_type_id(&self, name: &str) -> Option<u32> {
        self.node_types.get(name).copied()
    }

    pub fn edge_type_id(&self, name: &str) -> Option<u32> {
        self.edge_types.get(name).copied()
    }

    pub fn node_type_count(&self) -> usize {
        self.node_types.len()
    }

    pub fn edge_type_count(&self) -> usize {
        self.edge_types.len()
    }

    /// JSON document published under the registry's cluster metadata.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(s: &str) -> Result<GraphMeta> {
        serde_json::from_str(s).map_err(|e| EngineError::internal(e.to_string()))
    }

    /// Binary `graph.meta` layout: length-prefixed strings, counts,
    /// then each feature map and type map as (count, entries).
    pub fn serialize(&self, writer: &mut BytesWriter) {
        write_string(writer, &self.name);
        write_string(writer, &self.version);
        writer.write_u64(self.node_count);
        writer.write_u64(self.edge_count);
        writer.write_i32(self.partition_count);
        write_feature_map(writer, &self.node_features);
        write_feature_map(writer, &self.edge_features);
        write_type_map(writer, &self.node_types);
        write_type_map(writer, &self.edge_types);
    }

    pub fn deserialize(bytes: &[u8]) -> Result<GraphMeta> {
        let mut reader = BytesReader::new(bytes);
        let name = read_string(&mut reader)?;
        let version = read_string(&mut reader)?;
        let node_count = reader.read_u64()?;
        let edge_count = reader.read_u64()?;
        let partition_count = reader.read_i32()?;
        let node_features = read_feature_map(&mut reader)?;
        let edge_features = read_feature_map(&mut reader)?;
        let node_types = read_type_map(&mut reader)?;
        let edge_types = read_type_map(&mut reader)?;
        Ok(GraphMeta {
            name,
            version,
            node_count,
            edge_count,
            partition_count,
            node_features,
            edge_features,
            node_types,
            edge_types,
        })
    }
}

fn write_string(writer: &mut BytesWriter, s: &str) {
    writer.write_u32(s.len() as u32);
    writer.write_bytes(s.as_bytes());
}

fn read_string(reader: &mut BytesReader<'_>) -> Result<String> {
    let len = reader.read_u32()? as usize;
    reader.read_string(len)
}

fn write_feature_map(writer: &mut BytesWriter, map: &HashMap<String, FeatureInfo>) {
    writer.write_u32(map.len() as u32);
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (name, info) in entries {
        write_string(writer, name);
        writer.write_i32(info.kind.as_i32());
        writer.write_i32(info.id);
        writer.write_i64(info.dim);
    }
}

fn read_feature_map(reader: &mut BytesReader<'_>) -> Result<HashMap<String, FeatureInfo>> {
    let count = reader.read_u32()? as usize;
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let name = read_string(reader)?;
        let kind = FeatureKind::from_i32(reader.read_i32()?)
            .ok_or_else(|| EngineError::internal("unknown feature kind"))?;
        let id = reader.read_i32()?;
        let dim = reader.read_i64()?;
        map.insert(name, FeatureInfo { kind, id, dim });
    }
    Ok(map)
}

fn write_type_map(writer: &mut BytesWriter, map: &HashMap<String, u32>) {
    writer.write_u32(map.len() as u32);
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (name, id) in entries {
        write_string(writer, name);
        writer.write_u32(*id);
    }
}

fn read_type_map(reader: &mut BytesReader<'_>) -> Result<HashMap<String, u32>> {
    let count = reader.read_u32()? as usize;
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let name = read_string(reader)?;
        map.insert(name, reader.read_u32()?);
    }
    Ok(map)
}
