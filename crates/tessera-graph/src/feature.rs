//! Packed feature storage shared by node and edge records.

use tessera_core::{BytesReader, BytesWriter, Result};

/// A block of N variable-width features over one value type. `idx[i]`
/// is the running end offset of feature `i`'s values, so feature `i`
/// spans `idx[i-1]..idx[i]` of the values array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureBlock<T> {
    idx: Vec<i32>,
    values: Vec<T>,
}

impl<T: Clone> FeatureBlock<T> {
    pub fn new(idx: Vec<i32>, values: Vec<T>) -> Self {
        Self { idx, values }
    }

    /// Build from per-feature value lists.
    pub fn from_lists(lists: &[Vec<T>]) -> Self {
        let mut idx = Vec::with_capacity(lists.len());
        let mut values = Vec::new();
        let mut offset = 0i32;
        for list in lists {
            offset += list.len() as i32;
            idx.push(offset);
            values.extend_from_slice(list);
        }
        Self { idx, values }
    }

    /// Number of features in the block.
    pub fn feature_count(&self) -> usize {
        self.idx.len()
    }

    /// Values of feature `fid`; empty for out-of-range ids.
    pub fn get(&self, fid: i32) -> &[T] {
        if fid < 0 || fid as usize >= self.idx.len() {
            return &[];
        }
        let fid = fid as usize;
        let begin = if fid == 0 { 0 } else { self.idx[fid - 1] as usize };
        let end = self.idx[fid] as usize;
        &self.values[begin..end]
    }

    /// Value count of feature `fid`; 0 for out-of-range ids.
    pub fn value_count(&self, fid: i32) -> u32 {
        self.get(fid).len() as u32
    }
}

macro_rules! block_codec {
    ($ty:ty, $read_list:ident, $write:ident) => {
        impl FeatureBlock<$ty> {
            /// Parse `i32 n | n × i32 count | values` from the reader.
            /// Counts arrive as per-feature sizes and are folded into
            /// running offsets.
            pub fn deserialize(reader: &mut BytesReader<'_>) -> Result<Self> {
                let n = reader.read_i32()?.max(0) as usize;
                let mut idx = reader.read_i32_list(n)?;
                let mut total = 0i32;
                for v in idx.iter_mut() {
                    total += *v;
                    *v = total;
                }
                let values = reader.$read_list(total.max(0) as usize)?;
                Ok(Self { idx, values })
            }

            pub fn serialize(&self, writer: &mut BytesWriter) {
                writer.write_i32(self.idx.len() as i32);
                let mut pre = 0i32;
                for &end in &self.idx {
                    writer.write_i32(end - pre);
                    pre = end;
                }
                for &v in &self.values {
                    writer.$write(v);
                }
            }
        }
    };
}

block_codec!(u64, read_u64_list, write_u64);
block_codec!(f32, read_f32_list, write_f32);

impl FeatureBlock<u8> {
    pub fn deserialize(reader: &mut BytesReader<'_>) -> Result<Self> {
        let n = reader.read_i32()?.max(0) as usize;
        let mut idx = reader.read_i32_list(n)?;
        let mut total = 0i32;
        for v in idx.iter_mut() {
            total += *v;
            *v = total;
        }
        let values = reader.read_bytes(total.max(0) as usize)?;
        Ok(Self { idx, values })
    }

    pub fn serialize(&self, writer: &mut BytesWriter) {
        writer.write_i32(self.idx.len() as i32);
        let mut pre = 0i32;
        for &end in &self.idx {
            writer.write_i32(end - pre);
            pre = end;
        }
        writer.write_bytes(&self.values);
    }

    /// Feature values as an owned string, lossily for non-UTF8 bytes.
    pub fn get_string(&self, fid: i32) -> String {
        String::from_utf8_lossy(self.get(fid)).into_owned()
    }
}
