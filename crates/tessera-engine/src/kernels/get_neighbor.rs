//! `API_GET_NB_NODE` / `API_GET_NB_EDGE`: full neighbor expansion.

use tessera_core::Result;
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};

pub struct GetNeighborOp;

impl OpKernel for GetNeighborOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() < 2 {
            error!("arguments 'node_ids' and 'edge_types' must be specified");
            return Ok(());
        }
        let roots = common::node_ids(ctx, node, 0)?;
        let edge_types = common::i32_list(ctx, node, 1)?;
        let mut rows = env.graph()?.full_neighbors(&roots, &edge_types);

        if !node.dnf.is_empty() {
            if common::is_neighbor_index_dnf(node, env) {
                // Per-root filter from the neighbor index.
                let filters = common::query_neighbor_index_ids(node, &roots, env, ctx);
                for (row, filter) in rows.iter_mut().zip(&filters) {
                    row.retain(|pair| filter.contains(&pair.id));
                }
            } else {
                // One uniform filter over every row.
                let filter = common::query_index_ids(node, env, ctx);
                for row in rows.iter_mut() {
                    row.retain(|pair| filter.contains(&pair.id));
                }
            }
        }

        common::apply_post_process(&mut rows, &node.post_process);
        common::fill_neighbor(ctx, node, &rows);
        Ok(())
    }
}

/// Neighbor expansion emitting edges instead of node ids.
pub struct GetNeighborEdgeOp;

impl OpKernel for GetNeighborEdgeOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() < 2 {
            error!("arguments 'node_ids' and 'edge_types' must be specified");
            return Ok(());
        }
        let roots = common::node_ids(ctx, node, 0)?;
        let edge_types = common::i32_list(ctx, node, 1)?;
        let mut rows = env.graph()?.full_neighbors(&roots, &edge_types);
        common::apply_post_process(&mut rows, &node.post_process);
        common::fill_neighbor_edge(ctx, node, &rows, &roots);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::shard_env;
    use crate::tensor::Tensor;

    fn nb_node(dnf: Vec<String>, post: Vec<String>) -> DagNodeDef {
        let mut node = DagNodeDef::new("nb", "API_GET_NB_NODE")
            .with_inputs(vec!["ids".into(), "etypes".into()])
            .with_outputs(4);
        node.dnf = dnf;
        node.post_process = post;
        node
    }

    #[test]
    fn test_full_neighbor_rows() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("ids", Tensor::from_u64(vec![2], vec![1, 3]));
        ctx.insert("etypes", Tensor::from_i32(vec![2], vec![0, 1]));
        GetNeighborOp
            .compute(&nb_node(vec![], vec![]), &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.get("nb:0").unwrap().as_i32().unwrap(), &[0, 3, 3, 4]);
        assert_eq!(ctx.get("nb:1").unwrap().as_u64().unwrap(), &[2, 4, 3, 4]);
    }

    #[test]
    fn test_filter_order_limit() {
        // Spec scenario: v([2,5,6]).outV([0,1]).has(price gt 2)
        //   .order_by(id, asc).limit(2)
        let mut ctx = OpKernelContext::new();
        ctx.insert("ids", Tensor::from_u64(vec![3], vec![2, 5, 6]));
        ctx.insert("etypes", Tensor::from_i32(vec![2], vec![0, 1]));
        let node = nb_node(
            vec!["price gt 2".into()],
            vec!["order_by id asc".into(), "limit 2".into()],
        );
        GetNeighborOp.compute(&node, &shard_env(), &mut ctx).unwrap();
        let idx = ctx.get("nb:0").unwrap().as_i32().unwrap().to_vec();
        let ids = ctx.get("nb:1").unwrap().as_u64().unwrap().to_vec();
        let row = |i: usize| &ids[idx[2 * i] as usize..idx[2 * i + 1] as usize];
        assert_eq!(row(0), &[3, 5]);
        assert_eq!(row(1), &[2, 6]);
        assert_eq!(row(2), &[3, 5]);
    }

    #[test]
    fn test_neighbor_index_filters_per_root() {
        use crate::registry::KernelEnv;
        use std::sync::Arc;
        use tessera_graph::testing::{fixture_index_manager, fixture_store};
        use tessera_graph::{HashIndex, IndexKind};

        let mut manager = fixture_index_manager();
        let mut tag = HashIndex::new(IndexKind::HashRange);
        tag.insert("1::hot".into(), 2, 2.0);
        tag.insert("6::hot".into(), 3, 3.0);
        tag.insert("6::hot".into(), 5, 5.0);
        manager.add_index("nb_tag", tag);
        let env = KernelEnv::for_shard(Arc::new(fixture_store()), Arc::new(manager));

        let mut ctx = OpKernelContext::new();
        ctx.insert("ids", Tensor::from_u64(vec![2], vec![1, 6]));
        ctx.insert("etypes", Tensor::from_i32(vec![2], vec![0, 1]));
        let node = nb_node(vec!["nb_tag eq hot".into()], vec![]);
        GetNeighborOp.compute(&node, &env, &mut ctx).unwrap();
        let idx = ctx.get("nb:0").unwrap().as_i32().unwrap().to_vec();
        let ids = ctx.get("nb:1").unwrap().as_u64().unwrap().to_vec();
        // Root 1 keeps only its own tagged neighbor, root 6 keeps its
        // two; the same value never leaks across roots.
        assert_eq!(&ids[idx[0] as usize..idx[1] as usize], &[2]);
        assert_eq!(&ids[idx[2] as usize..idx[3] as usize], &[3, 5]);
    }

    #[test]
    fn test_missing_root_empty_row() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("ids", Tensor::from_u64(vec![2], vec![99, 3]));
        ctx.insert("etypes", Tensor::from_i32(vec![2], vec![0, 1]));
        GetNeighborOp
            .compute(&nb_node(vec![], vec![]), &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.get("nb:0").unwrap().as_i32().unwrap(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_neighbor_edges() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("ids", Tensor::from_u64(vec![1], vec![5]));
        ctx.insert("etypes", Tensor::from_i32(vec![1], vec![0]));
        let node = DagNodeDef::new("ne", "API_GET_NB_EDGE")
            .with_inputs(vec!["ids".into(), "etypes".into()])
            .with_outputs(3);
        GetNeighborEdgeOp
            .compute(&node, &shard_env(), &mut ctx)
            .unwrap();
        let eids = ctx.get("ne:1").unwrap();
        assert_eq!(eids.shape(), &[2, 3]);
        assert_eq!(eids.as_u64().unwrap(), &[5, 2, 0, 5, 6, 0]);
        assert_eq!(ctx.get("ne:2").unwrap().as_f32().unwrap(), &[2.0, 6.0]);
    }
}
