//! `API_GET_EDGE`: edge-id pass-through with DNF filtering.

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct GetEdgeOp;

impl OpKernel for GetEdgeOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.is_empty() && node.dnf.is_empty() {
            error!("edge ids or a filter must be specified for GetEdge");
            return Ok(());
        }
        // Pure pass-through: alias the input under the output name.
        if !node.inputs.is_empty() && node.dnf.is_empty() && node.post_process.is_empty() {
            let input = node.inputs[0].clone();
            ctx.add_alias(node.output(0), input);
            return Ok(());
        }
        // Without a filter the edge rows pass straight through the
        // post processing; no store access is needed.
        if node.dnf.is_empty() {
            let mut eids = common::edge_ids(ctx, node, 0)?;
            apply_limit(&mut eids, &node.post_process);
            emit(ctx, node, &eids);
            return Ok(());
        }

        let graph = env.graph()?;
        let mut uids: Vec<u64> = if node.inputs.is_empty() {
            Vec::new()
        } else {
            common::edge_ids(ctx, node, 0)?
                .into_iter()
                .map(|eid| graph.edge_id_to_uid(eid))
                .collect()
        };

        let keep = common::query_index_ids(node, env, ctx);
        if uids.is_empty() {
            uids = keep.into_iter().collect();
            uids.sort_unstable();
        } else {
            uids.retain(|uid| keep.contains(uid));
        }

        let mut eids = Vec::with_capacity(uids.len());
        for uid in uids {
            match graph.uid_to_edge_id(uid) {
                Some(eid) => eids.push(eid),
                None => error!("no edge registered for uid {}", uid),
            }
        }
        apply_limit(&mut eids, &node.post_process);
        emit(ctx, node, &eids);
        Ok(())
    }
}

fn apply_limit(eids: &mut Vec<tessera_core::EdgeId>, post_process: &[String]) {
    for post in post_process {
        let parts: Vec<&str> = post.split_whitespace().collect();
        if parts.first().copied() == Some("limit") {
            match parts.get(1).and_then(|s| s.parse::<usize>().ok()) {
                Some(k) => eids.truncate(k),
                None => error!("invalid post process: {}", post),
            }
        } else {
            error!("invalid post process: {}", post);
        }
    }
}

fn emit(ctx: &mut OpKernelContext, node: &DagNodeDef, eids: &[tessera_core::EdgeId]) {
    let mut flat = Vec::with_capacity(eids.len() * 3);
    for eid in eids {
        flat.push(eid.src);
        flat.push(eid.dst);
        flat.push(eid.edge_type as u64);
    }
    ctx.insert(
        node.output(0),
        Tensor::from_u64(vec![eids.len(), 3], flat),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::shard_env;
    use crate::registry::KernelEnv;

    #[test]
    fn test_passthrough_aliases() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("eids", Tensor::from_u64(vec![1, 3], vec![1, 2, 0]));
        let node = DagNodeDef::new("e", "API_GET_EDGE").with_inputs(vec!["eids".into()]);
        GetEdgeOp.compute(&node, &shard_env(), &mut ctx).unwrap();
        assert_eq!(ctx.get("e:0").unwrap().as_u64().unwrap(), &[1, 2, 0]);
    }

    #[test]
    fn test_limit_without_graph() {
        // No graph in the environment: limit still applies.
        let mut ctx = OpKernelContext::new();
        ctx.insert(
            "eids",
            Tensor::from_u64(vec![2, 3], vec![1, 2, 0, 1, 3, 1]),
        );
        let mut node = DagNodeDef::new("e", "API_GET_EDGE").with_inputs(vec!["eids".into()]);
        node.post_process = vec!["limit 1".into()];
        GetEdgeOp
            .compute(&node, &KernelEnv::for_client(Vec::new()), &mut ctx)
            .unwrap();
        let out = ctx.get("e:0").unwrap();
        assert_eq!(out.shape(), &[1, 3]);
        assert_eq!(out.as_u64().unwrap(), &[1, 2, 0]);
    }

    #[test]
    fn test_dnf_filter() {
        // The fixture price index stores node ids, so an edge dnf acts
        // as an empty filter here; the result must be empty, not an
        // error.
        let mut ctx = OpKernelContext::new();
        ctx.insert("eids", Tensor::from_u64(vec![1, 3], vec![1, 2, 0]));
        let mut node = DagNodeDef::new("e", "API_GET_EDGE").with_inputs(vec!["eids".into()]);
        node.dnf = vec!["price eq nothing".into()];
        GetEdgeOp.compute(&node, &shard_env(), &mut ctx).unwrap();
        assert_eq!(ctx.get("e:0").unwrap().num_elements(), 0);
    }
}
