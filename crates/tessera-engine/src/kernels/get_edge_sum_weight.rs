//! `API_GET_EDGE_SUM_WEIGHT`: per-root outgoing weight totals.

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct GetEdgeSumWeightOp;

impl OpKernel for GetEdgeSumWeightOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() < 2 {
            error!("arguments 'roots' and 'edge_types' must be specified");
            return Ok(());
        }
        let roots = common::node_ids(ctx, node, 0)?;
        let edge_types = common::i32_list(ctx, node, 1)?;
        let rows = env.graph()?.full_neighbors(&roots, &edge_types);
        let sums: Vec<f32> = rows
            .iter()
            .map(|row| row.iter().map(|p| p.weight).sum())
            .collect();
        let n = roots.len();
        ctx.insert(node.output(0), Tensor::from_u64(vec![n, 1], roots));
        ctx.insert(node.output(1), Tensor::from_f32(vec![n, 1], sums));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::shard_env;

    #[test]
    fn test_sum_weights() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("roots", Tensor::from_u64(vec![3], vec![1, 3, 99]));
        ctx.insert("etypes", Tensor::from_i32(vec![2], vec![0, 1]));
        let node = DagNodeDef::new("w", "API_GET_EDGE_SUM_WEIGHT")
            .with_inputs(vec!["roots".into(), "etypes".into()])
            .with_outputs(2);
        GetEdgeSumWeightOp
            .compute(&node, &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.get("w:0").unwrap().as_u64().unwrap(), &[1, 3, 99]);
        // Node 1 neighbors weigh 2+4+3; node 3 only 4; unknown 0.
        assert_eq!(ctx.get("w:1").unwrap().as_f32().unwrap(), &[9.0, 4.0, 0.0]);
    }
}
