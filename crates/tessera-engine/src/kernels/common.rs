//! Shared helpers for kernel input extraction, DNF evaluation and
//! neighbor-output assembly.

use std::collections::{HashMap, HashSet};

use tessera_core::{EdgeId, EngineError, IdWeightPair, NodeId, Result, Uid};
use tessera_graph::IndexResult;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::registry::KernelEnv;
use crate::tensor::{Tensor, TensorData};

/// The tensor bound to the node's idx-th input.
pub fn get_tensor<'a>(
    ctx: &'a OpKernelContext,
    node: &DagNodeDef,
    idx: usize,
) -> Result<&'a Tensor> {
    let name = node
        .inputs
        .get(idx)
        .ok_or_else(|| EngineError::invalid_argument(format!("argument {} not found", idx)))?;
    ctx.get(name)
        .ok_or_else(|| EngineError::invalid_argument(format!("missing input tensor '{}'", name)))
}

/// Node ids from a 1-D uint64 (or int64) input.
pub fn node_ids(ctx: &OpKernelContext, node: &DagNodeDef, idx: usize) -> Result<Vec<NodeId>> {
    let tensor = get_tensor(ctx, node, idx)?;
    match tensor.data() {
        TensorData::UInt64(v) => Ok(v.clone()),
        TensorData::Int64(v) => Ok(v.iter().map(|&x| x as u64).collect()),
        _ => Err(EngineError::invalid_argument(
            "node ids must be a uint64 tensor",
        )),
    }
}

/// Edge ids from an input shaped `[n, 3]` (rows of src, dst, type).
pub fn edge_ids(ctx: &OpKernelContext, node: &DagNodeDef, idx: usize) -> Result<Vec<EdgeId>> {
    let tensor = get_tensor(ctx, node, idx)?;
    let flat: Vec<u64> = match tensor.data() {
        TensorData::UInt64(v) => v.clone(),
        TensorData::Int64(v) => v.iter().map(|&x| x as u64).collect(),
        _ => {
            return Err(EngineError::invalid_argument(
                "edge ids must be a uint64 tensor",
            ))
        }
    };
    if flat.len() % 3 != 0 {
        return Err(EngineError::invalid_argument(format!(
            "invalid edge_ids shape, with {} elements",
            flat.len()
        )));
    }
    Ok(flat
        .chunks_exact(3)
        .map(|c| EdgeId::new(c[0], c[1], c[2] as i32))
        .collect())
}

pub fn i32_list(ctx: &OpKernelContext, node: &DagNodeDef, idx: usize) -> Result<Vec<i32>> {
    let tensor = get_tensor(ctx, node, idx)?;
    tensor
        .as_i32()
        .map(|s| s.to_vec())
        .ok_or_else(|| EngineError::invalid_argument("expected an int32 tensor"))
}

pub fn scalar_i32(ctx: &OpKernelContext, node: &DagNodeDef, idx: usize) -> Result<i32> {
    let values = i32_list(ctx, node, idx)?;
    values
        .first()
        .copied()
        .ok_or_else(|| EngineError::invalid_argument("expected a non-empty int32 tensor"))
}

/// Resolve a DNF value token or parameter name: a string tensor in the
/// context wins, otherwise the token itself is the value.
pub fn string_param(ctx: &OpKernelContext, token: &str) -> String {
    if let Some(tensor) = ctx.get(token) {
        if let Some(strings) = tensor.as_strings() {
            if let Some(first) = strings.first() {
                return first.clone();
            }
        }
    }
    token.to_string()
}

/// Parse an inline literal input (e.g. a default node id).
pub fn literal_i64(node: &DagNodeDef, idx: usize) -> i64 {
    node.inputs
        .get(idx)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Evaluate the node's DNF against the plain value indexes: triples
/// intersect within a clause, clauses union. `None` when the node has
/// no dnf or a field has no index.
pub fn query_index(
    node: &DagNodeDef,
    env: &KernelEnv,
    ctx: &OpKernelContext,
) -> Option<IndexResult> {
    let mut result: Option<IndexResult> = None;
    if node.dnf.is_empty() {
        return None;
    }
    for clause in &node.dnf {
        let mut clause_result: Option<IndexResult> = None;
        for token in clause.split(',') {
            let parts: Vec<&str> = token.split_whitespace().collect();
            if parts.len() != 3 {
                error!("DNF must be a triple: '{}'", token);
                return None;
            }
            let value = string_param(ctx, parts[2]);
            let index = match env.indexes.get(parts[0]) {
                Some(index) => index,
                None => {
                    error!("no index on field: {}", parts[0]);
                    return None;
                }
            };
            let term = index.search(parts[1], &value);
            clause_result = Some(match clause_result {
                Some(prev) => prev.intersect(&term),
                None => term,
            });
        }
        if let Some(clause_result) = clause_result {
            result = Some(match result {
                Some(prev) => prev.union(&clause_result),
                None => clause_result,
            });
        }
    }
    result
}

pub fn query_index_ids(node: &DagNodeDef, env: &KernelEnv, ctx: &OpKernelContext) -> HashSet<Uid> {
    query_index(node, env, ctx)
        .map(|r| r.id_set())
        .unwrap_or_default()
}

/// Whether the node's first DNF field is backed by a neighbor
/// (hash-range) index.
pub fn is_neighbor_index_dnf(node: &DagNodeDef, env: &KernelEnv) -> bool {
    let clause = match node.dnf.first() {
        Some(clause) => clause,
        None => return false,
    };
    let token = match clause.split(',').next() {
        Some(token) => token,
        None => return false,
    };
    let parts: Vec<&str> = token.split_whitespace().collect();
    parts.len() == 3 && env.indexes.is_neighbor_index(parts[0])
}

/// Per-root DNF evaluation against neighbor indexes: each triple's key
/// becomes `"<root>::<value>"`.
pub fn query_neighbor_index(
    node: &DagNodeDef,
    roots: &[NodeId],
    env: &KernelEnv,
    ctx: &OpKernelContext,
) -> Vec<Option<IndexResult>> {
    roots
        .iter()
        .map(|&root| {
            let mut result: Option<IndexResult> = None;
            for clause in &node.dnf {
                let mut clause_result: Option<IndexResult> = None;
                for token in clause.split(',') {
                    let parts: Vec<&str> = token.split_whitespace().collect();
                    if parts.len() != 3 {
                        error!("DNF must be a triple: '{}'", token);
                        return None;
                    }
                    let value = string_param(ctx, parts[2]);
                    let index = env.indexes.get(parts[0])?;
                    let term = index.search_with_root(root, parts[1], &value);
                    clause_result = Some(match clause_result {
                        Some(prev) => prev.intersect(&term),
                        None => term,
                    });
                }
                if let Some(clause_result) = clause_result {
                    result = Some(match result {
                        Some(prev) => prev.union(&clause_result),
                        None => clause_result,
                    });
                }
            }
            result
        })
        .collect()
}

pub fn query_neighbor_index_ids(
    node: &DagNodeDef,
    roots: &[NodeId],
    env: &KernelEnv,
    ctx: &OpKernelContext,
) -> Vec<HashSet<Uid>> {
    query_neighbor_index(node, roots, env, ctx)
        .into_iter()
        .map(|r| r.map(|r| r.id_set()).unwrap_or_default())
        .collect()
}

/// Per-root weighted samples from neighbor indexes, as uid →
/// multiplicity maps.
pub fn sample_neighbor_index_ids(
    node: &DagNodeDef,
    roots: &[NodeId],
    count: usize,
    env: &KernelEnv,
    ctx: &OpKernelContext,
) -> Vec<HashMap<Uid, i32>> {
    query_neighbor_index(node, roots, env, ctx)
        .into_iter()
        .map(|result| {
            let mut multiset = HashMap::new();
            if let Some(result) = result {
                for (uid, _) in result.sample(count) {
                    *multiset.entry(uid).or_insert(0) += 1;
                }
            }
            multiset
        })
        .collect()
}

/// Apply `order_by id|weight asc|desc` and `limit k` directives to
/// per-root rows. Unknown directives log and are skipped.
pub fn apply_post_process(rows: &mut [Vec<IdWeightPair>], post_process: &[String]) {
    for post in post_process {
        let parts: Vec<&str> = post.split_whitespace().collect();
        match parts.first().copied() {
            Some("order_by") => {
                if parts.len() < 2 || parts.len() > 3 {
                    error!("invalid post process: {}", post);
                    continue;
                }
                let descending = parts.len() == 3 && parts[2] == "desc";
                match parts[1] {
                    "id" => {
                        for row in rows.iter_mut() {
                            row.sort_by_key(|p| p.id);
                            if descending {
                                row.reverse();
                            }
                        }
                    }
                    "weight" => {
                        for row in rows.iter_mut() {
                            row.sort_by(|a, b| a.weight.total_cmp(&b.weight));
                            if descending {
                                row.reverse();
                            }
                        }
                    }
                    other => error!("invalid order_by field: {}", other),
                }
            }
            Some("limit") => {
                let k = match parts.get(1).and_then(|s| s.parse::<usize>().ok()) {
                    Some(k) if parts.len() == 2 => k,
                    _ => {
                        error!("invalid post process: {}", post);
                        continue;
                    }
                };
                for row in rows.iter_mut() {
                    row.truncate(k);
                }
            }
            _ => error!("invalid post process: {}", post),
        }
    }
}

/// Write per-root neighbor rows as the standard quadruple:
/// `:0` idx `[n,2]`, `:1` ids, `:2` weights, `:3` types.
pub fn fill_neighbor(ctx: &mut OpKernelContext, node: &DagNodeDef, rows: &[Vec<IdWeightPair>]) {
    let mut idx = Vec::with_capacity(rows.len() * 2);
    let mut offset = 0i32;
    for row in rows {
        idx.push(offset);
        offset += row.len() as i32;
        idx.push(offset);
    }
    let total = offset as usize;
    let mut ids = Vec::with_capacity(total);
    let mut weights = Vec::with_capacity(total);
    let mut types = Vec::with_capacity(total);
    for row in rows {
        for pair in row {
            ids.push(pair.id);
            weights.push(pair.weight);
            types.push(pair.edge_type);
        }
    }
    ctx.insert(node.output(0), Tensor::from_i32(vec![rows.len(), 2], idx));
    ctx.insert(node.output(1), Tensor::from_u64(vec![total], ids));
    ctx.insert(node.output(2), Tensor::from_f32(vec![total], weights));
    ctx.insert(node.output(3), Tensor::from_i32(vec![total], types));
}

/// Write per-root neighbor rows as edges: `:0` idx `[n,2]`, `:1` edge
/// ids `[m,3]`, `:2` weights.
pub fn fill_neighbor_edge(
    ctx: &mut OpKernelContext,
    node: &DagNodeDef,
    rows: &[Vec<IdWeightPair>],
    roots: &[NodeId],
) {
    let mut idx = Vec::with_capacity(rows.len() * 2);
    let mut offset = 0i32;
    for row in rows {
        idx.push(offset);
        offset += row.len() as i32;
        idx.push(offset);
    }
    let total = offset as usize;
    let mut eids = Vec::with_capacity(total * 3);
    let mut weights = Vec::with_capacity(total);
    for (row, &root) in rows.iter().zip(roots) {
        for pair in row {
            eids.push(root);
            eids.push(pair.id);
            eids.push(pair.edge_type as u64);
            weights.push(pair.weight);
        }
    }
    ctx.insert(node.output(0), Tensor::from_i32(vec![rows.len(), 2], idx));
    ctx.insert(node.output(1), Tensor::from_u64(vec![total, 3], eids));
    ctx.insert(node.output(2), Tensor::from_f32(vec![total], weights));
}
