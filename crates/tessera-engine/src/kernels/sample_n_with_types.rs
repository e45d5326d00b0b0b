//! `API_SAMPLE_N_WITH_TYPES`: per-type node sampling with segment idx.

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct SampleNWithTypesOp;

impl OpKernel for SampleNWithTypesOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() < 2 {
            error!("arguments 'types' and 'counts' must be specified");
            return Ok(());
        }
        let types = common::i32_list(ctx, node, 0)?;
        let counts = common::i32_list(ctx, node, 1)?;
        if types.len() != counts.len() {
            error!("types num != counts num");
            return Ok(());
        }
        let graph = env.graph()?;

        let mut idx = Vec::with_capacity(types.len() * 2);
        let mut data = Vec::new();
        let mut offset = 0i32;
        for (&t, &count) in types.iter().zip(&counts) {
            let ids = graph.sample_node(t, count.max(0) as usize);
            idx.push(offset);
            offset += ids.len() as i32;
            idx.push(offset);
            data.extend(ids);
        }
        ctx.insert(node.output(0), Tensor::from_i32(vec![types.len(), 2], idx));
        let len = data.len();
        ctx.insert(node.output(1), Tensor::from_u64(vec![len], data));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::shard_env;

    #[test]
    fn test_per_type_segments() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("types", Tensor::from_i32(vec![2], vec![0, 1]));
        ctx.insert("counts", Tensor::from_i32(vec![2], vec![4, 8]));
        let node = DagNodeDef::new("n", "API_SAMPLE_N_WITH_TYPES")
            .with_inputs(vec!["types".into(), "counts".into()])
            .with_outputs(2);
        SampleNWithTypesOp
            .compute(&node, &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.get("n:0").unwrap().as_i32().unwrap(), &[0, 4, 4, 12]);
        let ids = ctx.get("n:1").unwrap().as_u64().unwrap();
        assert!(ids[..4].iter().all(|id| [2, 4, 6].contains(id)));
        assert!(ids[4..].iter().all(|id| [1, 3, 5].contains(id)));
    }
}
