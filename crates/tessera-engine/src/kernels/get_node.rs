//! `API_GET_NODE`: id pass-through with DNF filtering and post
//! processing.

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct GetNodeOp;

impl OpKernel for GetNodeOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.is_empty() && node.dnf.is_empty() {
            error!("node ids or a filter must be specified for GetNode");
            return Ok(());
        }

        let mut ids = if node.inputs.is_empty() {
            Vec::new()
        } else {
            common::node_ids(ctx, node, 0)?
        };

        if !node.dnf.is_empty() {
            let keep = common::query_index_ids(node, env, ctx);
            if ids.is_empty() {
                ids = keep.into_iter().collect();
                ids.sort_unstable();
            } else {
                ids.retain(|id| keep.contains(id));
            }
        }

        for post in &node.post_process {
            let parts: Vec<&str> = post.split_whitespace().collect();
            match parts.first().copied() {
                Some("order_by") => {
                    if parts.len() < 2 || parts.len() > 3 || parts[1] != "id" {
                        error!("invalid post process: {}", post);
                        continue;
                    }
                    ids.sort_unstable();
                    if parts.len() == 3 && parts[2] == "desc" {
                        ids.reverse();
                    }
                }
                Some("limit") => match parts.get(1).and_then(|s| s.parse::<usize>().ok()) {
                    Some(k) => ids.truncate(k),
                    None => error!("invalid post process: {}", post),
                },
                _ => error!("invalid post process: {}", post),
            }
        }

        let len = ids.len();
        ctx.insert(node.output(0), Tensor::from_u64(vec![len], ids));
        Ok(())
    }
}
