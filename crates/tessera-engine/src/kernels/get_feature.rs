//! `API_GET_P`: feature retrieval for nodes or edges, with optional
//! values-UDF transformation.
//!
//! Input 0 carries ids: a 1-D tensor selects node features, an `[n,3]`
//! tensor selects edge features. Every further input names one
//! feature. Feature `j` emits `:2j` = idx `[n,2]` and `:2j+1` = data,
//! typed by the schema (sparse → uint64, dense → float, binary → int8).

use std::collections::HashSet;

use tessera_core::{FeatureKind, Result};
use tessera_graph::GraphStore;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;
use crate::udf::NodesFeature;

pub struct GetFeatureOp;

impl OpKernel for GetFeatureOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() < 2 {
            error!("invalid arguments for GetFeature");
            return Ok(());
        }
        let graph = env.graph()?;

        let mut feature_names = Vec::with_capacity(node.inputs.len() - 1);
        for input in &node.inputs[1..] {
            feature_names.push(common::string_param(ctx, input));
        }

        let mut udf_names = Vec::with_capacity(node.udf_str_params.len());
        for param in &node.udf_str_params {
            let name = common::string_param(ctx, param);
            if !feature_names.contains(&name) {
                error!("udf {} parameter {} is not a requested feature", node.udf_name, name);
                return Ok(());
            }
            udf_names.push(name);
        }
        let udf_set: HashSet<&String> = udf_names.iter().collect();

        let mut udf_params = Vec::with_capacity(node.udf_num_params.len());
        for param in &node.udf_num_params {
            match ctx.get(param) {
                Some(t) => udf_params.push(t.clone()),
                None => {
                    error!("udf parameter tensor '{}' missing", param);
                    return Ok(());
                }
            }
        }

        let ids_tensor = common::get_tensor(ctx, node, 0)?;
        let rank = ids_tensor.shape().len();
        let features: Vec<NodesFeature> = if rank == 1 {
            let ids = common::node_ids(ctx, node, 0)?;
            feature_names
                .iter()
                .map(|name| node_feature(graph, &ids, name))
                .collect()
        } else if rank == 2 && ids_tensor.shape()[1] == 3 {
            let eids = common::edge_ids(ctx, node, 0)?;
            feature_names
                .iter()
                .map(|name| edge_feature(graph, &eids, name))
                .collect()
        } else {
            error!("invalid node_ids/edge_ids shape for GetFeature");
            return Ok(());
        };

        // Direct features first, then the UDF features as one batch.
        for (j, (name, feature)) in feature_names.iter().zip(&features).enumerate() {
            if !udf_set.contains(name) {
                emit_feature(ctx, node, j, feature);
            }
        }
        if !node.udf_name.is_empty() {
            let udf = match env.udfs.get(&node.udf_name) {
                Some(udf) => udf,
                None => {
                    error!("unknown udf: {}", node.udf_name);
                    return Ok(());
                }
            };
            let batch: Vec<NodesFeature> = feature_names
                .iter()
                .zip(&features)
                .filter(|(name, _)| udf_set.contains(name))
                .map(|(_, f)| f.clone())
                .collect();
            let processed = udf.process(&udf_names, &udf_params, batch)?;
            let mut processed_iter = processed.into_iter();
            for (j, name) in feature_names.iter().enumerate() {
                if udf_set.contains(name) {
                    if let Some(feature) = processed_iter.next() {
                        emit_feature(ctx, node, j, &feature);
                    }
                }
            }
        }
        Ok(())
    }
}

fn node_feature(graph: &GraphStore, ids: &[u64], name: &str) -> NodesFeature {
    match graph.meta().node_feature(name) {
        Some(info) => match info.kind {
            FeatureKind::Sparse => {
                NodesFeature::Sparse(flatten(graph.node_sparse_features(ids, &[info.id])))
            }
            FeatureKind::Dense => {
                NodesFeature::Dense(flatten(graph.node_dense_features(ids, &[info.id])))
            }
            FeatureKind::Binary => {
                NodesFeature::Binary(flatten(graph.node_binary_features(ids, &[info.id])))
            }
        },
        None => {
            error!("unknown node feature: {}", name);
            NodesFeature::Dense(vec![Vec::new(); ids.len()])
        }
    }
}

fn edge_feature(graph: &GraphStore, ids: &[tessera_core::EdgeId], name: &str) -> NodesFeature {
    match graph.meta().edge_feature(name) {
        Some(info) => match info.kind {
            FeatureKind::Sparse => {
                NodesFeature::Sparse(flatten(graph.edge_sparse_features(ids, &[info.id])))
            }
            FeatureKind::Dense => {
                NodesFeature::Dense(flatten(graph.edge_dense_features(ids, &[info.id])))
            }
            FeatureKind::Binary => {
                NodesFeature::Binary(flatten(graph.edge_binary_features(ids, &[info.id])))
            }
        },
        None => {
            error!("unknown edge feature: {}", name);
            NodesFeature::Dense(vec![Vec::new(); ids.len()])
        }
    }
}

/// Per-row single-feature lists out of the batch getters' per-row,
/// per-fid nesting.
fn flatten<T>(rows: Vec<Vec<Vec<T>>>) -> Vec<Vec<T>> {
    rows.into_iter()
        .map(|mut fids| fids.pop().unwrap_or_default())
        .collect()
}

fn emit_feature(ctx: &mut OpKernelContext, node: &DagNodeDef, j: usize, feature: &NodesFeature) {
    let rows = feature.row_count();
    let mut idx = Vec::with_capacity(rows * 2);
    let mut offset = 0i32;
    let mut push_idx = |len: usize| {
        idx.push(offset);
        offset += len as i32;
        idx.push(offset);
    };
    let data = match feature {
        NodesFeature::Sparse(values) => {
            let mut flat = Vec::new();
            for row in values {
                push_idx(row.len());
                flat.extend_from_slice(row);
            }
            Tensor::from_u64(vec![flat.len()], flat)
        }
        NodesFeature::Dense(values) => {
            let mut flat = Vec::new();
            for row in values {
                push_idx(row.len());
                flat.extend_from_slice(row);
            }
            Tensor::from_f32(vec![flat.len()], flat)
        }
        NodesFeature::Binary(values) => {
            let mut flat = Vec::new();
            for row in values {
                push_idx(row.len());
                flat.extend(row.iter().map(|&b| b as i8));
            }
            Tensor::from_i8(vec![flat.len()], flat)
        }
    };
    ctx.insert(node.output(2 * j), Tensor::from_i32(vec![rows, 2], idx));
    ctx.insert(node.output(2 * j + 1), data);
}
