//! `API_SAMPLE_EDGE`: weighted global edge sampling.

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct SampleEdgeOp;

impl OpKernel for SampleEdgeOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() != 2 {
            error!("invalid input arguments for SampleEdge");
            return Ok(());
        }
        let edge_types = common::i32_list(ctx, node, 0)?;
        let count = common::scalar_i32(ctx, node, 1)?.max(0) as usize;
        let eids = env.graph()?.sample_edge_of_types(&edge_types, count);
        if eids.len() != count {
            error!("expected sample count {}, got {}", count, eids.len());
            return Ok(());
        }
        let mut flat = Vec::with_capacity(count * 3);
        for eid in eids {
            flat.push(eid.src);
            flat.push(eid.dst);
            flat.push(eid.edge_type as u64);
        }
        ctx.insert(node.output(0), Tensor::from_u64(vec![count, 3], flat));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::shard_env;

    #[test]
    fn test_sample_edge_type_restricted() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("types", Tensor::from_i32(vec![1], vec![1]));
        ctx.insert("count", Tensor::scalar_i32(10));
        let node = DagNodeDef::new("eid", "API_SAMPLE_EDGE")
            .with_inputs(vec!["types".into(), "count".into()]);
        SampleEdgeOp.compute(&node, &shard_env(), &mut ctx).unwrap();
        let rows = ctx.get("eid:0").unwrap();
        assert_eq!(rows.shape(), &[10, 3]);
        let flat = rows.as_u64().unwrap();
        for row in flat.chunks_exact(3) {
            assert_eq!(row[2], 1);
        }
    }

    #[test]
    fn test_sample_edge_invalid_type() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("types", Tensor::from_i32(vec![1], vec![9]));
        ctx.insert("count", Tensor::scalar_i32(10));
        let node = DagNodeDef::new("eid", "API_SAMPLE_EDGE")
            .with_inputs(vec!["types".into(), "count".into()]);
        SampleEdgeOp.compute(&node, &shard_env(), &mut ctx).unwrap();
        assert!(ctx.get("eid:0").is_none());
    }
}
