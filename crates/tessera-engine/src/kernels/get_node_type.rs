//! `API_GET_NODE_T`: node types for a batch of ids.

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct GetNodeTypeOp;

impl OpKernel for GetNodeTypeOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.is_empty() {
            error!("node ids must be specified for GetNodeType");
            return Ok(());
        }
        let ids = common::node_ids(ctx, node, 0)?;
        let types = env.graph()?.node_types(&ids);
        let len = types.len();
        ctx.insert(node.output(0), Tensor::from_i32(vec![len, 1], types));
        Ok(())
    }
}
