//! # Tessera Core
//!
//! Shared leaves of the Tessera graph engine: graph identifiers, the
//! little-endian record codec, the process-seeded thread-local RNG and
//! the two weighted-collection samplers everything else is built on.

pub mod bytes;
pub mod error;
pub mod random;
pub mod sampler;
pub mod types;

pub use bytes::{BytesReader, BytesWriter};
pub use error::{EngineError, Result};
pub use random::{random_select, set_process_seed, thread_index, thread_uniform};
pub use sampler::{CompactWeightedCollection, FastWeightedCollection};
pub use types::{
    EdgeId, FeatureKind, IdWeightPair, NodeId, Uid, DEFAULT_CHAR, DEFAULT_FLOAT, DEFAULT_INT32,
    DEFAULT_UINT64,
};
