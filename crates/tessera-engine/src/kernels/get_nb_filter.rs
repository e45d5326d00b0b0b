//! `API_GET_NB_FILTER`: restrict a neighbor quadruple to a node set.
//!
//! Used by the planner after cross-shard neighbor merges: input is the
//! standard (idx, ids, weights, types) quadruple plus the set of node
//! ids to keep; output is the same quadruple with the other entries
//! dropped and post processing re-applied.

use std::collections::HashSet;

use tessera_core::{IdWeightPair, Result};

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};

pub struct GetNbFilterOp;

impl OpKernel for GetNbFilterOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        let idx = common::i32_list(ctx, node, 0)?;
        let ids = common::node_ids(ctx, node, 1)?;
        let weights = common::get_tensor(ctx, node, 2)?
            .as_f32()
            .map(|s| s.to_vec())
            .unwrap_or_default();
        let types = common::i32_list(ctx, node, 3)?;
        let keep: HashSet<u64> = common::node_ids(ctx, node, 4)?.into_iter().collect();

        let root_num = idx.len() / 2;
        let mut rows: Vec<Vec<IdWeightPair>> = Vec::with_capacity(root_num);
        for i in 0..root_num {
            let begin = idx[2 * i] as usize;
            let end = idx[2 * i + 1] as usize;
            let mut row = Vec::with_capacity(end - begin);
            for j in begin..end {
                if keep.contains(&ids[j]) {
                    row.push(IdWeightPair::new(ids[j], weights[j], types[j]));
                }
            }
            rows.push(row);
        }
        common::apply_post_process(&mut rows, &node.post_process);
        common::fill_neighbor(ctx, node, &rows);
        Ok(())
    }
}
