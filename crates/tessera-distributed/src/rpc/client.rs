//! tarpc client utilities: connection helpers with retry and the
//! shard client pool used by the fan-out proxy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tarpc::client::Config;
use tokio::sync::RwLock;
use tokio_serde::formats::Bincode;
use tracing::{debug, info, warn};

use crate::rpc::protocol::{GraphServiceClient, RegistryServiceClient};
use crate::types::ShardId;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Configuration for client connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    /// Bound on in-flight requests per connection; the transport's
    /// back-pressure window.
    pub max_pending_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_pending_requests: 100,
        }
    }
}

/// Connect to a shard's graph service.
pub async fn connect_to_shard(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<GraphServiceClient, std::io::Error> {
    debug!("connecting to shard at {}", addr);
    let transport = tokio::time::timeout(
        config.connect_timeout,
        tarpc::serde_transport::tcp::connect(addr, Bincode::default),
    )
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout"))??;
    let mut tarpc_config = Config::default();
    tarpc_config.max_in_flight_requests = config.max_pending_requests;
    let client = GraphServiceClient::new(tarpc_config, transport).spawn();
    info!("connected to shard at {}", addr);
    Ok(client)
}

/// Connect with retry and backoff.
pub async fn connect_to_shard_with_retry(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<GraphServiceClient, std::io::Error> {
    let mut last_error = None;
    for attempt in 0..config.retry_attempts {
        if attempt > 0 {
            warn!("retry attempt {} connecting to shard at {}", attempt + 1, addr);
            tokio::time::sleep(config.retry_delay).await;
        }
        match connect_to_shard(addr, config).await {
            Ok(client) => return Ok(client),
            Err(e) => {
                warn!("failed to connect to shard at {}: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "connection failed")
    }))
}

/// Connect to the registry service.
pub async fn connect_to_registry(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<RegistryServiceClient, std::io::Error> {
    debug!("connecting to registry at {}", addr);
    let transport = tokio::time::timeout(
        config.connect_timeout,
        tarpc::serde_transport::tcp::connect(addr, Bincode::default),
    )
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout"))??;
    let client = RegistryServiceClient::new(Config::default(), transport).spawn();
    info!("connected to registry at {}", addr);
    Ok(client)
}

/// A pool of cached shard connections.
///
/// Addresses come from the registry; connections are created lazily on
/// first use and invalidated on failure so the next request
/// reconnects.
#[derive(Clone)]
pub struct GraphClientPool {
    addresses: Arc<RwLock<HashMap<ShardId, SocketAddr>>>,
    clients: Arc<RwLock<HashMap<ShardId, GraphServiceClient>>>,
    config: ClientConfig,
}

impl GraphClientPool {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            addresses: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Register a shard's address; connections are created lazily.
    pub async fn register_shard(&self, shard: ShardId, addr: SocketAddr) {
        self.addresses.write().await.insert(shard, addr);
        debug!("registered {} at {}", shard, addr);
    }

    /// Drop a shard's address and any cached connection.
    pub async fn unregister_shard(&self, shard: ShardId) {
        self.addresses.write().await.remove(&shard);
        self.clients.write().await.remove(&shard);
        debug!("unregistered {}", shard);
    }

    pub async fn has_shard(&self, shard: ShardId) -> bool {
        self.addresses.read().await.contains_key(&shard)
    }

    pub async fn shard_count(&self) -> usize {
        self.addresses.read().await.len()
    }

    /// A client for the shard, cached or freshly connected.
    pub async fn get_client(&self, shard: ShardId) -> Result<GraphServiceClient, std::io::Error> {
        if let Some(client) = self.clients.read().await.get(&shard) {
            return Ok(client.clone());
        }
        let addr = self
            .addresses
            .read()
            .await
            .get(&shard)
            .copied()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not registered", shard),
                )
            })?;
        let client = connect_to_shard_with_retry(addr, &self.config).await?;
        self.clients.write().await.insert(shard, client.clone());
        Ok(client)
    }

    /// Drop one cached connection, forcing a reconnect next time.
    pub async fn invalidate_client(&self, shard: ShardId) {
        self.clients.write().await.remove(&shard);
        debug!("invalidated cached client for {}", shard);
    }

    pub async fn cached_connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for GraphClientPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A registry client with lazy connection and reconnection.
#[derive(Clone)]
pub struct RegistryHandle {
    addr: SocketAddr,
    client: Arc<RwLock<Option<RegistryServiceClient>>>,
    config: ClientConfig,
}

impl RegistryHandle {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            client: Arc::new(RwLock::new(None)),
            config: ClientConfig::default(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn get(&self) -> Result<RegistryServiceClient, std::io::Error> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }
        let new_client = connect_to_registry(self.addr, &self.config).await?;
        *self.client.write().await = Some(new_client.clone());
        Ok(new_client)
    }

    /// Drop the cached connection.
    pub async fn invalidate(&self) {
        *self.client.write().await = None;
        debug!("invalidated registry client");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(
            config.connect_timeout.as_millis(),
            DEFAULT_CONNECT_TIMEOUT_MS as u128
        );
        assert_eq!(config.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(config.retry_delay.as_millis(), DEFAULT_RETRY_DELAY_MS as u128);
    }

    #[tokio::test]
    async fn test_pool_register_unregister() {
        let pool = GraphClientPool::new();
        let addr: SocketAddr = "127.0.0.1:9190".parse().unwrap();
        pool.register_shard(ShardId::new(0), addr).await;
        assert!(pool.has_shard(ShardId::new(0)).await);
        assert!(!pool.has_shard(ShardId::new(1)).await);
        assert_eq!(pool.shard_count().await, 1);
        pool.unregister_shard(ShardId::new(0)).await;
        assert_eq!(pool.shard_count().await, 0);
    }

    #[tokio::test]
    async fn test_pool_unknown_shard() {
        let pool = GraphClientPool::new();
        let err = pool.get_client(ShardId::new(7)).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_pool_invalidate_without_connection() {
        let pool = GraphClientPool::new();
        pool.register_shard(ShardId::new(0), "127.0.0.1:9190".parse().unwrap())
            .await;
        pool.invalidate_client(ShardId::new(0)).await;
        assert_eq!(pool.cached_connection_count().await, 0);
    }
}
