//! Packed edge record: identity, weight and feature blocks.

use tessera_core::{BytesReader, BytesWriter, EdgeId, NodeId, Result};

use crate::feature::FeatureBlock;

/// An immutable edge record.
#[derive(Debug, Clone, Default)]
pub struct Edge {
    id: EdgeId,
    weight: f32,
    sparse: FeatureBlock<u64>,
    dense: FeatureBlock<f32>,
    binary: FeatureBlock<u8>,
}

impl Edge {
    pub fn new(src: NodeId, dst: NodeId, edge_type: i32, weight: f32) -> Self {
        Self {
            id: EdgeId::new(src, dst, edge_type),
            weight,
            ..Default::default()
        }
    }

    pub fn init(&mut self, sparse: &[Vec<u64>], dense: &[Vec<f32>], binary: &[Vec<u8>]) {
        self.sparse = FeatureBlock::from_lists(sparse);
        self.dense = FeatureBlock::from_lists(dense);
        self.binary = FeatureBlock::from_lists(binary);
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn edge_type(&self) -> i32 {
        self.id.edge_type
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

    /// Parse `u64 src | u64 dst | i32 type | f32 weight | 3 feature
    /// blocks`.
    pub fn deserialize(bytes: &[u8]) -> Result<Edge> {
        let mut reader = BytesReader::new(bytes);
        let src = reader.read_u64()?;
        let dst = reader.read_u64()?;
        let edge_type = reader.read_i32()?;
        let weight = reader.read_f32()?;
        let mut edge = Edge::new(src, dst, edge_type, weight);
        edge.sparse = FeatureBlock::<u64>::deserialize(&mut reader)?;
        edge.dense = FeatureBlock::<f32>::deserialize(&mut reader)?;
        edge.binary = FeatureBlock::<u8>::deserialize(&mut reader)?;
        Ok(edge)
    }

    pub fn serialize(&self, writer: &mut BytesWriter) {
        writer.write_u64(self.id.src);
        writer.write_u64(self.id.dst);
        writer.write_i32(self.id.edge_type);
        writer.write_f32(self.weight);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_roundtrip() {
        let mut edge = Edge::new(4, 5, 1, 5.0);
        edge.init(
            &[vec![451, 452]],
            &[vec![4.5]],
            &[b"edge45".to_vec()],
        );
        let bytes = edge.serialized_bytes();
        let back = Edge::deserialize(&bytes).unwrap();
        assert_eq!(back.id(), EdgeId::new(4, 5, 1));
        assert_eq!(back.weight(), 5.0);
        assert_eq!(back.sparse_features().get(0), &[451, 452]);
        assert_eq!(back.dense_features().get(0), &[4.5]);
        assert_eq!(back.binary_features().get_string(0), "edge45");
    }

    #[test]
    fn test_missing_feature_is_empty() {
        let edge = Edge::new(1, 2, 0, 2.0);
        assert_eq!(edge.sparse_features().get(0), &[] as &[u64]);
        assert_eq!(edge.sparse_features().value_count(3), 0);
    }
}
