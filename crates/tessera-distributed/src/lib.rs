//! # Tessera Distributed
//!
//! The distributed layer: a coordination-store registry for shard
//! discovery, the tarpc graph service with its connection-pooled
//! client, and the query planner that splits operator DAGs across
//! shards and merges their results.

pub mod planner;
pub mod proxy;
pub mod registry;
pub mod rpc;
pub mod types;

pub use planner::{Plan, Planner, ShardCall};
pub use proxy::QueryProxy;
pub use registry::ShardRegistry;
pub use rpc::client::{GraphClientPool, RegistryHandle};
pub use rpc::protocol::{GraphService, GraphServiceClient, RegistryService, RegistryServiceClient};
pub use rpc::server::{GraphServer, RegistryServer};
pub use types::*;
