//! `API_SAMPLE_NODE`: weighted global node sampling.

use std::collections::HashSet;

use tessera_core::{NodeId, Result};
use tessera_graph::GraphStore;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

/// Index sizes below this bound are filtered by full traversal;
/// larger ones use sample-and-reject.
const TRAVERSE_BOUND: usize = 1 << 15;
/// Rejection sampling gives up after this many fruitless rounds.
const MAX_SAMPLE_ROUNDS: usize = 50;

pub struct SampleNodeOp;

impl OpKernel for SampleNodeOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() != 2 {
            error!("invalid input arguments for SampleNode");
            return Ok(());
        }
        let node_types = common::i32_list(ctx, node, 0)?;
        let count = common::scalar_i32(ctx, node, 1)?.max(0) as usize;
        let graph = env.graph()?;

        let ids = if node_types.first() == Some(&-1) && !node.dnf.is_empty() {
            // Sampling over every type: draw straight from the index.
            sample_by_index(node, count, env, ctx)
        } else if node.dnf.is_empty() {
            graph.sample_node_of_types(&node_types, count)
        } else {
            sample_filtered(node, &node_types, count, graph, env, ctx)
        };

        if ids.len() != count {
            error!("expected sample count {}, got {}", count, ids.len());
            return Ok(());
        }
        ctx.insert(node.output(0), Tensor::from_u64(vec![count], ids));
        Ok(())
    }
}

fn sample_by_index(
    node: &DagNodeDef,
    count: usize,
    env: &KernelEnv,
    ctx: &OpKernelContext,
) -> Vec<NodeId> {
    match common::query_index(node, env, ctx) {
        Some(result) => result.sample(count).into_iter().map(|(id, _)| id).collect(),
        None => Vec::new(),
    }
}

/// DNF plus explicit types: intersect the index with the type set.
/// Small indexes are traversed and re-weighted into a fresh sampler;
/// large ones are rejection-sampled.
fn sample_filtered(
    node: &DagNodeDef,
    node_types: &[i32],
    count: usize,
    graph: &GraphStore,
    env: &KernelEnv,
    ctx: &OpKernelContext,
) -> Vec<NodeId> {
    let result = match common::query_index(node, env, ctx) {
        Some(result) => result,
        None => return Vec::new(),
    };
    let type_set: HashSet<i32> = node_types.iter().copied().collect();
    let mut ids = Vec::with_capacity(count);

    if result.len() < TRAVERSE_BOUND {
        let mut pairs = Vec::new();
        for (id, weight) in result.ids().into_iter().zip(result.weights()) {
            if let Some(n) = graph.get_node(id) {
                if type_set.contains(&n.node_type()) {
                    pairs.push((id, weight));
                }
            }
        }
        let sampler = tessera_core::CompactWeightedCollection::from_pairs(&pairs);
        while ids.len() < count {
            match sampler.sample() {
                Some((id, _)) => ids.push(id),
                None => break,
            }
        }
    } else {
        let mut fruitless = 0;
        while ids.len() < count && fruitless < MAX_SAMPLE_ROUNDS {
            let mut hit = false;
            for (id, _) in result.sample(count) {
                if let Some(n) = graph.get_node(id) {
                    if type_set.contains(&n.node_type()) {
                        ids.push(id);
                        hit = true;
                        if ids.len() == count {
                            break;
                        }
                    }
                }
            }
            fruitless = if hit { 0 } else { fruitless + 1 };
        }
    }
    ids
}
