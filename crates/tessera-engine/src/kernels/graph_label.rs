//! `API_SAMPLE_GRAPH_LABEL` / `API_GET_GRAPH_BY_LABEL`: queries over
//! the node-level graph-label values.

use tessera_core::{thread_index, Result};
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

/// Uniformly sample `count` labels from the environment's label set,
/// emitted comma-joined as an int8 tensor.
pub struct SampleGraphLabelOp;

impl OpKernel for SampleGraphLabelOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        let count = common::scalar_i32(ctx, node, 0)?.max(0) as usize;
        if env.graph_labels.is_empty() {
            error!("graph label set is empty");
            return Ok(());
        }
        let mut labels = Vec::with_capacity(count);
        for _ in 0..count {
            let idx = thread_index(env.graph_labels.len());
            labels.push(env.graph_labels[idx].clone());
        }
        let joined = labels.join(",");
        let bytes: Vec<i8> = joined.bytes().map(|b| b as i8).collect();
        let len = bytes.len();
        ctx.insert(node.output(0), Tensor::from_i8(vec![len], bytes));
        Ok(())
    }
}

/// Node ids per requested label, via the `graph_label` index:
/// `:0` idx `[l, 2]`, `:1` node ids.
pub struct GetGraphByLabelOp;

impl OpKernel for GetGraphByLabelOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        let labels_t = common::get_tensor(ctx, node, 0)?;
        let labels = match labels_t.as_strings() {
            Some(labels) => labels.to_vec(),
            None => {
                error!("graph labels must be a string tensor");
                return Ok(());
            }
        };
        let index = match env.indexes.get("graph_label") {
            Some(index) => index,
            None => {
                error!("no graph_label index");
                return Ok(());
            }
        };

        let mut idx = Vec::with_capacity(labels.len() * 2);
        let mut data = Vec::new();
        let mut offset = 0i32;
        for label in &labels {
            let ids = index.search("eq", label).ids();
            idx.push(offset);
            offset += ids.len() as i32;
            idx.push(offset);
            data.extend(ids);
        }
        ctx.insert(node.output(0), Tensor::from_i32(vec![labels.len(), 2], idx));
        let len = data.len();
        ctx.insert(node.output(1), Tensor::from_u64(vec![len], data));
        Ok(())
    }
}
