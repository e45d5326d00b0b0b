//! `API_SAMPLE_NB`: weighted neighbor sampling with default fill.

use tessera_core::{IdWeightPair, Result, DEFAULT_UINT64};
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};

pub struct SampleNeighborOp;

impl OpKernel for SampleNeighborOp {
    fn compute(&self, node: &DagNodeDef, env: &KernelEnv, ctx: &mut OpKernelContext) -> Result<()> {
        if node.inputs.len() < 4 {
            error!("arguments 'node_ids', 'edge_types', 'count', 'default_node' must be specified");
            return Ok(());
        }
        let roots = common::node_ids(ctx, node, 0)?;
        let edge_types = common::i32_list(ctx, node, 1)?;
        let count = common::scalar_i32(ctx, node, 2)?.max(0) as usize;

        let mut rows = if node.dnf.is_empty() {
            env.graph()?.sample_neighbors(&roots, &edge_types, count)
        } else {
            // Intersect full neighbors with the index's sampled
            // multiset, keeping multiplicities.
            let mut rows = env.graph()?.full_neighbors(&roots, &edge_types);
            let filters = common::sample_neighbor_index_ids(node, &roots, count, env, ctx);
            for (row, filter) in rows.iter_mut().zip(&filters) {
                let mut expanded = Vec::with_capacity(count);
                for pair in row.iter() {
                    if let Some(&times) = filter.get(&pair.id) {
                        for _ in 0..times {
                            expanded.push(*pair);
                        }
                    }
                }
                *row = expanded;
            }
            rows
        };

        common::apply_post_process(&mut rows, &node.post_process);

        let default_node = DEFAULT_UINT64;
        for row in rows.iter_mut() {
            if row.is_empty() {
                row.extend(
                    std::iter::repeat(IdWeightPair::new(default_node, 0.0, 0)).take(count),
                );
            }
        }
        common::fill_neighbor(ctx, node, &rows);
        Ok(())
    }
}
