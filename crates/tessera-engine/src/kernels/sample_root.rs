//! `API_SAMPLE_ROOT`: multinomial root sampling by attached weights.

use tessera_core::{CompactWeightedCollection, Result};
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct SampleRootOp;

impl OpKernel for SampleRootOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        if node.inputs.len() < 3 {
            error!("arguments 'roots', 'weights', 'count' must be specified");
            return Ok(());
        }
        let roots = common::node_ids(ctx, node, 0)?;
        let weights = common::get_tensor(ctx, node, 1)?
            .as_f32()
            .map(|s| s.to_vec())
            .unwrap_or_default();
        let count = common::scalar_i32(ctx, node, 2)?.max(0) as usize;
        if roots.len() != weights.len() {
            error!("roots and weights must have equal length");
            return Ok(());
        }

        let mut sampler = CompactWeightedCollection::new();
        sampler.init(&roots, &weights);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            match sampler.sample() {
                Some((id, _)) => out.push(id),
                None => break,
            }
        }
        let len = out.len();
        ctx.insert(node.output(0), Tensor::from_u64(vec![len, 1], out));
        Ok(())
    }
}
