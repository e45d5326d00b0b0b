//! Little-endian cursor codec for graph records.
//!
//! Every on-disk and on-wire record in the chunk format is a flat
//! little-endian byte run; the reader fails closed on truncation so a
//! corrupt block can never produce a partial record.

use crate::error::{EngineError, Result};

/// Reads typed values from a byte slice, advancing an internal cursor.
pub struct BytesReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

macro_rules! read_scalar {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let end = self.pos + N;
            if end > self.bytes.len() {
                return Err(EngineError::internal("truncated record"));
            }
            let mut buf = [0u8; N];
            buf.copy_from_slice(&self.bytes[self.pos..end]);
            self.pos = end;
            Ok(<$ty>::from_le_bytes(buf))
        }
    };
}

macro_rules! read_list {
    ($name:ident, $scalar:ident, $ty:ty) => {
        pub fn $name(&mut self, num: usize) -> Result<Vec<$ty>> {
            let mut out = Vec::with_capacity(num);
            for _ in 0..num {
                out.push(self.$scalar()?);
            }
            Ok(out)
        }
    };
}

impl<'a> BytesReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    read_scalar!(read_i32, i32);
    read_scalar!(read_u32, u32);
    read_scalar!(read_i64, i64);
    read_scalar!(read_u64, u64);
    read_scalar!(read_f32, f32);
    read_scalar!(read_f64, f64);

    read_list!(read_i32_list, read_i32, i32);
    read_list!(read_u64_list, read_u64, u64);
    read_list!(read_f32_list, read_f32, f32);

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let end = self.pos + len;
        if end > self.bytes.len() {
            return Err(EngineError::internal("truncated record"));
        }
        let out = self.bytes[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }

    pub fn read_string(&mut self, len: usize) -> Result<String> {
        let raw = self.read_bytes(len)?;
        String::from_utf8(raw).map_err(|e| EngineError::internal(e.to_string()))
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes still unread.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Appends typed values to a growable buffer; the inverse of
/// [`BytesReader`].
#[derive(Default)]
pub struct BytesWriter {
    bytes: Vec<u8>,
}

macro_rules! write_scalar {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, v: $ty) {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
    };
}

impl BytesWriter {
    pub fn new() -> Self {
        Self::default()
    }

    write_scalar!(write_i32, i32);
    write_scalar!(write_u32, u32);
    write_scalar!(write_i64, i64);
    write_scalar!(write_u64, u64);
    write_scalar!(write_f32, f32);
    write_scalar!(write_f64, f64);

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.bytes.extend_from_slice(v);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}
