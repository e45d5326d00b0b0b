//! `API_SAMPLE_L`: one sampled neighbor per layer root.

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct SampleLayerOp;

impl OpKernel for SampleLayerOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() < 3 {
            error!("arguments 'layer_roots', 'edge_types', 'default_node' must be specified");
            return Ok(());
        }
        let roots = common::node_ids(ctx, node, 0)?;
        let edge_types = common::i32_list(ctx, node, 1)?;
        let default_node = common::literal_i64(node, 2) as u64;

        let rows = env.graph()?.sample_neighbors(&roots, &edge_types, 1);
        let n = roots.len();
        let mut ids = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(n);
        let mut types = Vec::with_capacity(n);
        for row in &rows {
            match row.first() {
                Some(pair) => {
                    ids.push(pair.id);
                    weights.push(pair.weight);
                    types.push(pair.edge_type);
                }
                None => {
                    ids.push(default_node);
                    weights.push(0.0);
                    types.push(0);
                }
            }
        }
        ctx.insert(node.output(0), Tensor::from_u64(vec![n, 1], ids));
        ctx.insert(node.output(1), Tensor::from_f32(vec![n, 1], weights));
        ctx.insert(node.output(2), Tensor::from_i32(vec![n, 1], types));
        Ok(())
    }
}
