//! `API_SPARSE_GEN_ADJ` / `API_SPARSE_GET_ADJ`: layer-restricted
//! adjacency views.

use std::collections::HashSet;

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

/// Pairs each root with its batch index: output `:0` is `[k, 2]` rows
/// of (root, batch), `:1` echoes the roots as `[k, 1]`.
pub struct SparseGenAdjOp;

impl OpKernel for SparseGenAdjOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        if node.inputs.len() < 2 {
            error!("arguments 'roots' and 'n' must be specified");
            return Ok(());
        }
        let roots = common::node_ids(ctx, node, 0)?;
        let n = common::scalar_i32(ctx, node, 1)?.max(1) as usize;
        let mut pairs = Vec::with_capacity(roots.len() * 2);
        for (i, &root) in roots.iter().enumerate() {
            pairs.push(root);
            pairs.push((i / n) as u64);
        }
        let k = roots.len();
        ctx.insert(node.output(0), Tensor::from_u64(vec![k, 2], pairs));
        ctx.insert(node.output(1), Tensor::from_u64(vec![k, 1], roots));
        Ok(())
    }
}

/// Per root, the outgoing neighbors that lie in the supplied layer
/// node set: `:0` idx `[n, 2]`, `:1` adjacent ids.
pub struct SparseGetAdjOp;

impl OpKernel for SparseGetAdjOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() < 3 {
            error!("arguments 'roots', 'l_nb', 'edge_types' must be specified");
            return Ok(());
        }
        let roots = common::node_ids(ctx, node, 0)?;
        let layer: HashSet<u64> = common::node_ids(ctx, node, 1)?.into_iter().collect();
        let edge_types = common::i32_list(ctx, node, 2)?;

        let rows = env.graph()?.full_neighbors(&roots, &edge_types);
        let mut idx = Vec::with_capacity(roots.len() * 2);
        let mut adj = Vec::new();
        let mut offset = 0i32;
        for row in &rows {
            idx.push(offset);
            for pair in row {
                if layer.contains(&pair.id) {
                    adj.push(pair.id);
                    offset += 1;
                }
            }
            idx.push(offset);
        }
        ctx.insert(node.output(0), Tensor::from_i32(vec![roots.len(), 2], idx));
        let len = adj.len();
        ctx.insert(node.output(1), Tensor::from_u64(vec![len], adj));
        Ok(())
    }
}
