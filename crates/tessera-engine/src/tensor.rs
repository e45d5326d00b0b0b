//! Named, dtype-tagged, shape-tagged tensors and their wire form.

use serde::{Deserialize, Serialize};
use tessera_core::{BytesReader, BytesWriter, EngineError, Result};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
}

/// Typed tensor storage. POD variants own flat vectors; `String`
/// tensors own their strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
}

impl TensorData {
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::Int8(_) => DataType::Int8,
            TensorData::Int16(_) => DataType::Int16,
            TensorData::Int32(_) => DataType::Int32,
            TensorData::Int64(_) => DataType::Int64,
            TensorData::UInt32(_) => DataType::UInt32,
            TensorData::UInt64(_) => DataType::UInt64,
            TensorData::Float(_) => DataType::Float,
            TensorData::Double(_) => DataType::Double,
            TensorData::String(_) => DataType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Int8(v) => v.len(),
            TensorData::Int16(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::UInt32(v) => v.len(),
            TensorData::UInt64(v) => v.len(),
            TensorData::Float(v) => v.len(),
            TensorData::Double(v) => v.len(),
            TensorData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A shape-tagged buffer. The element count always equals the product
/// of the shape dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

macro_rules! tensor_ctor {
    ($ctor:ident, $as_ref:ident, $variant:ident, $ty:ty) => {
        pub fn $ctor(shape: Vec<usize>, values: Vec<$ty>) -> Tensor {
            Tensor::new(shape, TensorData::$variant(values))
        }

        pub fn $as_ref(&self) -> Option<&[$ty]> {
            match &self.data {
                TensorData::$variant(v) => Some(v),
                _ => None,
            }
        }
    };
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: TensorData) -> Tensor {
        debug_assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "tensor shape does not cover its data"
        );
        Tensor { shape, data }
    }

    tensor_ctor!(from_i8, as_i8, Int8, i8);
    tensor_ctor!(from_i16, as_i16, Int16, i16);
    tensor_ctor!(from_i32, as_i32, Int32, i32);
    tensor_ctor!(from_i64, as_i64, Int64, i64);
    tensor_ctor!(from_u32, as_u32, UInt32, u32);
    tensor_ctor!(from_u64, as_u64, UInt64, u64);
    tensor_ctor!(from_f32, as_f32, Float, f32);
    tensor_ctor!(from_f64, as_f64, Double, f64);
    tensor_ctor!(from_strings, as_strings, String, String);

    pub fn scalar_i32(v: i32) -> Tensor {
        Tensor::from_i32(vec![1], vec![v])
    }

    pub fn scalar_string(s: impl Into<String>) -> Tensor {
        Tensor::from_strings(vec![1], vec![s.into()])
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    /// First dimension, 0 for rank-0 tensors.
    pub fn dim0(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Encode for the RPC boundary. POD content is the little-endian
    /// byte run; string content is a sequence of `(u32 len, bytes)`
    /// records.
    pub fn to_wire(&self, name: impl Into<String>) -> WireTensor {
        let mut w = BytesWriter::new();
        match &self.data {
            TensorData::Int8(v) => v.iter().for_each(|x| w.write_bytes(&x.to_le_bytes())),
            TensorData::Int16(v) => v.iter().for_each(|x| w.write_bytes(&x.to_le_bytes())),
            TensorData::Int32(v) => v.iter().for_each(|x| w.write_i32(*x)),
            TensorData::Int64(v) => v.iter().for_each(|x| w.write_i64(*x)),
            TensorData::UInt32(v) => v.iter().for_each(|x| w.write_u32(*x)),
            TensorData::UInt64(v) => v.iter().for_each(|x| w.write_u64(*x)),
            TensorData::Float(v) => v.iter().for_each(|x| w.write_f32(*x)),
            TensorData::Double(v) => v.iter().for_each(|x| w.write_f64(*x)),
            TensorData::String(v) => v.iter().for_each(|s| {
                w.write_u32(s.len() as u32);
                w.write_bytes(s.as_bytes());
            }),
        }
        WireTensor {
            name: name.into(),
            dtype: self.dtype(),
            shape: self.shape.iter().map(|&d| d as i64).collect(),
            content: w.into_bytes(),
        }
    }

    pub fn from_wire(wire: &WireTensor) -> Result<Tensor> {
        let shape: Vec<usize> = wire.shape.iter().map(|&d| d.max(0) as usize).collect();
        let count: usize = shape.iter().product();
        let mut r = BytesReader::new(&wire.content);
        let data = match wire.dtype {
            DataType::Int8 => TensorData::Int8(
                r.read_bytes(count)?.into_iter().map(|b| b as i8).collect(),
            ),
            DataType::Int16 => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    let lo = r.read_bytes(2)?;
                    v.push(i16::from_le_bytes([lo[0], lo[1]]));
                }
                TensorData::Int16(v)
            }
            DataType::Int32 => TensorData::Int32(r.read_i32_list(count)?),
            DataType::Int64 => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(r.read_i64()?);
                }
                TensorData::Int64(v)
            }
            DataType::UInt32 => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(r.read_u32()?);
                }
                TensorData::UInt32(v)
            }
            DataType::UInt64 => TensorData::UInt64(r.read_u64_list(count)?),
            DataType::Float => TensorData::Float(r.read_f32_list(count)?),
            DataType::Double => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(r.read_f64()?);
                }
                TensorData::Double(v)
            }
            DataType::String => {
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    let len = r.read_u32()? as usize;
                    v.push(r.read_string(len)?);
                }
                TensorData::String(v)
            }
        };
        if data.len() != count {
            return Err(EngineError::internal("wire tensor shape/content mismatch"));
        }
        Ok(Tensor::new(shape, data))
    }
}

/// Serialized tensor crossing the RPC boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTensor {
    pub name: String,
    pub dtype: DataType,
    pub shape: Vec<i64>,
    pub content: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let t = Tensor::from_i32(vec![2, 2], vec![1, 2, 3, 4]);
        assert_eq!(t.dtype(), DataType::Int32);
        assert_eq!(t.num_elements(), 4);
        assert_eq!(t.dim0(), 2);
        assert_eq!(t.as_i32(), Some(&[1, 2, 3, 4][..]));
        assert_eq!(t.as_u64(), None);
    }

    #[test]
    fn test_wire_roundtrip_pod() {
        let t = Tensor::from_u64(vec![3], vec![1, u64::MAX, 42]);
        let wire = t.to_wire("ids");
        assert_eq!(wire.name, "ids");
        assert_eq!(wire.shape, vec![3]);
        let back = Tensor::from_wire(&wire).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_wire_roundtrip_float() {
        let t = Tensor::from_f32(vec![2, 2], vec![0.5, -1.5, 3.25, 0.0]);
        let back = Tensor::from_wire(&t.to_wire("w")).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_wire_roundtrip_string() {
        let t = Tensor::from_strings(vec![2], vec!["sparse_f1".into(), "".into()]);
        let wire = t.to_wire("fid");
        let back = Tensor::from_wire(&wire).unwrap();
        assert_eq!(back.as_strings().unwrap(), &["sparse_f1", ""]);
    }

    #[test]
    fn test_wire_truncated_content_fails() {
        let mut wire = Tensor::from_u64(vec![2], vec![1, 2]).to_wire("x");
        wire.content.truncate(3);
        assert!(Tensor::from_wire(&wire).is_err());
    }
}
