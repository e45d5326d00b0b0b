//! Tessera shard server.
//!
//! Loads this shard's graph partitions, starts the tarpc graph
//! service, registers with the coordination-store registry and
//! deregisters on shutdown. Exits non-zero on any initialization
//! failure.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tessera_distributed::rpc::client::{connect_to_registry, ClientConfig};
use tessera_distributed::rpc::server::{register_documents, GraphServer};
use tessera_distributed::types::ShardId;
use tessera_engine::KernelEnv;
use tessera_graph::{GraphBuilder, IndexManager, LoadDataType, SamplerType};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tessera-server", about = "Tessera graph shard server")]
struct Options {
    /// Port the graph service listens on.
    #[arg(long, default_value_t = 9190, env = "TESSERA_PORT")]
    port: u16,

    /// Directory holding the chunk files and graph.meta.
    #[arg(long, env = "TESSERA_DATA_PATH")]
    data_path: PathBuf,

    /// Which record kinds to load: none, node, edge or all.
    #[arg(long, default_value = "all", env = "TESSERA_LOAD_DATA_TYPE")]
    load_data_type: String,

    /// Which global samplers to build: none, node, edge or all.
    #[arg(long, default_value = "all", env = "TESSERA_GLOBAL_SAMPLER_TYPE")]
    global_sampler_type: String,

    /// Registry service address; skipped when absent.
    #[arg(long, env = "TESSERA_REGISTRY")]
    registry: Option<SocketAddr>,

    /// Host published to the registry.
    #[arg(long, default_value = "127.0.0.1", env = "TESSERA_ADVERTISE_HOST")]
    advertise_host: String,

    /// This shard's index within the cluster.
    #[arg(long, default_value_t = 0, env = "TESSERA_SHARD_INDEX")]
    shard_index: i32,

    /// Total number of shards.
    #[arg(long, default_value_t = 1, env = "TESSERA_SHARD_NUMBER")]
    shard_number: i32,

    /// Worker threads; defaults to twice the hardware concurrency.
    #[arg(long, env = "TESSERA_THREAD_NUM")]
    thread_num: Option<usize>,

    /// Process seed for the thread-local samplers.
    #[arg(long, env = "TESSERA_SEED")]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Some(seed) = options.seed {
        tessera_core::set_process_seed(seed);
    }

    let threads = options.thread_num.unwrap_or_else(|| {
        2 * std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(run(options))
}

async fn run(options: Options) -> anyhow::Result<()> {
    let load_data_type: LoadDataType = options
        .load_data_type
        .parse()
        .context("invalid --load-data-type")?;
    let sampler_type: SamplerType = options
        .global_sampler_type
        .parse()
        .context("invalid --global-sampler-type")?;

    let builder = GraphBuilder::new(
        options.shard_index,
        options.shard_number,
        sampler_type,
        load_data_type,
    );
    let store = builder
        .build(&options.data_path)
        .context("graph load failed")?;
    info!(
        nodes = store.node_count(),
        edges = store.edge_count(),
        shard = options.shard_index,
        "graph ready"
    );

    let indexes = load_indexes(&options.data_path);
    let store = Arc::new(store);
    let env = KernelEnv::for_shard(store.clone(), Arc::new(indexes));

    let addr: SocketAddr = format!("0.0.0.0:{}", options.port)
        .parse()
        .context("invalid port")?;
    let server = GraphServer::new(env);
    let serve = tokio::spawn(server.start(addr));

    let advertised = format!("{}:{}", options.advertise_host, options.port);
    let registration = match options.registry {
        Some(registry_addr) => {
            let client = connect_to_registry(registry_addr, &ClientConfig::default())
                .await
                .context("registry unreachable")?;
            let (cluster_meta, shard_meta) = register_documents(&store);
            client
                .set_cluster_meta(tarpc::context::current(), cluster_meta)
                .await
                .context("registry call failed")?
                .map_err(|e| anyhow::anyhow!("set_cluster_meta: {}", e))?;
            client
                .register_shard(
                    tarpc::context::current(),
                    ShardId::new(options.shard_index as u32),
                    advertised.clone(),
                    shard_meta,
                )
                .await
                .context("registry call failed")?
                .map_err(|e| anyhow::anyhow!("register_shard: {}", e))?;
            info!("registered {} as shard {}", advertised, options.shard_index);
            Some(client)
        }
        None => {
            warn!("no registry configured; serving unregistered");
            None
        }
    };

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutting down");
    if let Some(client) = registration {
        if let Err(e) = client
            .deregister_shard(
                tarpc::context::current(),
                ShardId::new(options.shard_index as u32),
                advertised,
            )
            .await
        {
            warn!("deregistration failed: {}", e);
        }
    }
    serve.abort();
    Ok(())
}

fn load_indexes(data_path: &std::path::Path) -> IndexManager {
    let index_path = data_path.join("index.json");
    match std::fs::read(&index_path) {
        Ok(bytes) => match IndexManager::load_json(&bytes) {
            Ok(manager) => {
                info!("loaded indexes from {}", index_path.display());
                manager
            }
            Err(e) => {
                warn!("failed to parse {}: {}", index_path.display(), e);
                IndexManager::new()
            }
        },
        Err(_) => IndexManager::new(),
    }
}
