//! Chunk-file graph builder.
//!
//! A shard loads every file named `<name>_<partition>.dat` whose
//! partition satisfies `partition % shard_number == shard_index`. Files
//! are parsed in parallel into thread-local record vectors and merged
//! into the store by a single reducer, after which the requested global
//! samplers are built.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tessera_core::{BytesReader, EngineError, Result};
use tracing::{info, warn};

use crate::edge::Edge;
use crate::meta::GraphMeta;
use crate::node::Node;
use crate::store::GraphStore;

/// Which record kinds to keep while loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDataType {
    None,
    Node,
    Edge,
    All,
}

impl LoadDataType {
    pub fn loads_nodes(&self) -> bool {
        matches!(self, LoadDataType::Node | LoadDataType::All)
    }

    pub fn loads_edges(&self) -> bool {
        matches!(self, LoadDataType::Edge | LoadDataType::All)
    }
}

impl FromStr for LoadDataType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(LoadDataType::None),
            "node" => Ok(LoadDataType::Node),
            "edge" => Ok(LoadDataType::Edge),
            "all" => Ok(LoadDataType::All),
            other => Err(EngineError::internal(format!(
                "invalid load data type: {}",
                other
            ))),
        }
    }
}

/// Which global samplers to build after loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerType {
    None,
    Node,
    Edge,
    All,
}

impl FromStr for SamplerType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(SamplerType::None),
            "node" => Ok(SamplerType::Node),
            "edge" => Ok(SamplerType::Edge),
            "all" => Ok(SamplerType::All),
            other => Err(EngineError::internal(format!(
                "invalid sampler type: {}",
                other
            ))),
        }
    }
}

/// Builds a [`GraphStore`] from a directory of chunk files.
pub struct GraphBuilder {
    shard_index: i32,
    shard_number: i32,
    sampler_type: SamplerType,
    load_data_type: LoadDataType,
}

impl GraphBuilder {
    pub fn new(
        shard_index: i32,
        shard_number: i32,
        sampler_type: SamplerType,
        load_data_type: LoadDataType,
    ) -> Self {
        Self {
            shard_index,
            shard_number,
            sampler_type,
            load_data_type,
        }
    }

    /// Load this shard's partitions from `data_path` into a new store.
    pub fn build(&self, data_path: &Path) -> Result<GraphStore> {
        if self.shard_number <= 0 || self.shard_index >= self.shard_number {
            return Err(EngineError::invalid_argument(format!(
                "shard_index {} out of range for shard_number {}",
                self.shard_index, self.shard_number
            )));
        }

        let (files, partition_count) = self.discover_files(data_path)?;
        if files.is_empty() {
            return Err(EngineError::internal(format!(
                "no chunk file for shard {} in {}",
                self.shard_index,
                data_path.display()
            )));
        }

        let mut store = GraphStore::new();
        store.set_shard(self.shard_index, self.shard_number);

        let mut meta = self.load_meta(data_path);
        if meta.partition_count <= 0 {
            meta.partition_count = partition_count;
        }
        store.set_meta(meta);

        self.load_files(&files, &mut store)?;
        info!(
            nodes = store.node_count(),
            edges = store.edge_count(),
            shard = self.shard_index,
            "graph loaded"
        );

        match self.sampler_type {
            SamplerType::None => {}
            SamplerType::Node => store.build_node_sampler(),
            SamplerType::Edge => store.build_edge_sampler(),
            SamplerType::All => {
                store.build_node_sampler();
                store.build_edge_sampler();
            }
        }
        Ok(store)
    }

    /// Chunk files owned by this shard plus the global partition count
    /// (max partition index over all chunk files, plus one).
    fn discover_files(&self, data_path: &Path) -> Result<(Vec<PathBuf>, i32)> {
        let mut files = Vec::new();
        let mut partition_count = 0i32;
        for entry in std::fs::read_dir(data_path)? {
            let path = entry?.path();
            let partition = match chunk_partition(&path) {
                Some(p) => p,
                None => continue,
            };
            partition_count = partition_count.max(partition + 1);
            if partition % self.shard_number == self.shard_index {
                files.push(path);
            }
        }
        files.sort();
        Ok((files, partition_count))
    }

    fn load_meta(&self, data_path: &Path) -> GraphMeta {
        let meta_path = data_path.join("graph.meta");
        match std::fs::read(&meta_path) {
            Ok(bytes) => match GraphMeta::deserialize(&bytes) {
                Ok(meta) => return meta,
                Err(e) => warn!("failed to parse {}: {}", meta_path.display(), e),
            },
            Err(_) => info!("no graph.meta under {}", data_path.display()),
        }
        GraphMeta::default()
    }

    /// Parse files on `available_parallelism` workers, then merge the
    /// thread-local vectors into the store.
    fn load_files(&self, files: &[PathBuf], store: &mut GraphStore) -> Result<()> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(files.len().max(1));
        let chunks: Vec<&[PathBuf]> = files.chunks(files.len().div_ceil(workers)).collect();

        let results: Vec<Result<(Vec<Node>, Vec<Edge>)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| scope.spawn(move || self.load_file_list(chunk)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(EngineError::internal("loader thread panicked")))
                })
                .collect()
        });

        for result in results {
            let (nodes, edges) = result?;
            store.add_nodes(nodes);
            store.add_edges(edges);
        }
        Ok(())
    }

    fn load_file_list(&self, files: &[PathBuf]) -> Result<(Vec<Node>, Vec<Edge>)> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for file in files {
            let bytes = std::fs::read(file)?;
            self.parse_chunk(&bytes, &mut nodes, &mut edges)
                .map_err(|e| {
                    EngineError::internal(format!("{}: {}", file.display(), e))
                })?;
            info!("loaded {}", file.display());
        }
        Ok((nodes, edges))
    }

    /// Parse one chunk file: a stream of length-prefixed blocks, each a
    /// node record plus its outgoing edges.
    pub fn parse_chunk(
        &self,
        bytes: &[u8],
        nodes: &mut Vec<Node>,
        edges: &mut Vec<Edge>,
    ) -> Result<()> {
        let mut reader = BytesReader::new(bytes);
        while reader.remaining() > 0 {
            let block_size = reader.read_u32()? as usize;
            let start = reader.position();

            let node_bytes = reader.read_u32()? as usize;
            let node_buf = reader.read_bytes(node_bytes)?;
            let edge_count = reader.read_u32()? as usize;
            let edge_sizes = {
                let mut sizes = Vec::with_capacity(edge_count);
                for _ in 0..edge_count {
                    sizes.push(reader.read_u32()? as usize);
                }
                sizes
            };
            let mut edge_bufs = Vec::with_capacity(edge_count);
            for size in &edge_sizes {
                edge_bufs.push(reader.read_bytes(*size)?);
            }

            let consumed = reader.position() - start;
            if consumed != block_size {
                return Err(EngineError::internal(format!(
                    "block checksum mismatch: declared {} bytes, consumed {}",
                    block_size, consumed
                )));
            }

            if self.load_data_type.loads_nodes() {
                nodes.push(Node::deserialize(&node_buf)?);
            }
            if self.load_data_type.loads_edges() {
                for buf in &edge_bufs {
                    edges.push(Edge::deserialize(buf)?);
                }
            }
        }
        Ok(())
    }
}

/// Partition index of a chunk file path, or `None` for non-chunk files.
/// Chunk files are named `<name>_<partition>.dat`.
fn chunk_partition(path: &Path) -> Option<i32> {
    if path.extension()?.to_str()? != "dat" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (_, partition) = stem.rsplit_once('_')?;
    partition.parse().ok()
}
