//! `API_LOCAL_SAMPLE_L`: layerwise sampling over gathered neighbors.
//!
//! The input quadruple holds `n` neighbor rows per batch; duplicates of
//! the same (id, type) inside a batch merge by summing weights, the
//! optional weight function is applied, and each batch then draws `m`
//! samples with replacement. Batches with no neighbors emit `m`
//! default rows.

use std::collections::HashMap;

use tessera_core::{CompactWeightedCollection, Result};
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::Tensor;

pub struct LocalSampleLayerOp;

impl OpKernel for LocalSampleLayerOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        if node.inputs.len() < 8 {
            error!("LocalSampleLayer takes idx, ids, weights, types, n, m, weight_func, default");
            return Ok(());
        }
        let idx = common::i32_list(ctx, node, 0)?;
        let ids = common::node_ids(ctx, node, 1)?;
        let weights = common::get_tensor(ctx, node, 2)?
            .as_f32()
            .map(|s| s.to_vec())
            .unwrap_or_default();
        let types = common::i32_list(ctx, node, 3)?;
        let n = common::scalar_i32(ctx, node, 4)?.max(1) as usize;
        let m = common::scalar_i32(ctx, node, 5)?.max(0) as usize;
        let weight_func = node.inputs[6].as_str();
        let default_node = common::literal_i64(node, 7) as u64;

        let batch = idx.len() / (n * 2);
        // Row boundaries per batch: from the first offset of the
        // batch's first row to the last offset of its last row.
        let mut merged: Vec<HashMap<(u64, i32), f32>> = vec![HashMap::new(); batch];
        for (b, bucket) in merged.iter_mut().enumerate() {
            let begin = idx[b * n * 2] as usize;
            let end = if b + 1 < batch {
                idx[(b + 1) * n * 2] as usize
            } else {
                idx[idx.len() - 1] as usize
            };
            for j in begin..end {
                *bucket.entry((ids[j], types[j])).or_insert(0.0) += weights[j];
            }
        }

        match weight_func {
            "sqrt" => {
                for bucket in merged.iter_mut() {
                    for w in bucket.values_mut() {
                        *w = w.sqrt();
                    }
                }
            }
            "" | "id" => {}
            other => error!("weight function not supported: {}", other),
        }

        let mut out_ids = Vec::with_capacity(batch * m);
        let mut out_weights = Vec::with_capacity(batch * m);
        let mut out_types = Vec::with_capacity(batch * m);
        for bucket in &merged {
            let pairs: Vec<((u64, i32), f32)> =
                bucket.iter().map(|(&k, &w)| (k, w)).collect();
            let sampler = CompactWeightedCollection::from_pairs(&pairs);
            if sampler.is_empty() || sampler.sum_weight() == 0.0 {
                for _ in 0..m {
                    out_ids.push(default_node);
                    out_weights.push(0.0);
                    out_types.push(0);
                }
            } else {
                for _ in 0..m {
                    if let Some(((id, t), w)) = sampler.sample() {
                        out_ids.push(id);
                        out_weights.push(w);
                        out_types.push(t);
                    }
                }
            }
        }

        let rows = batch * m;
        ctx.insert(node.output(0), Tensor::from_u64(vec![rows, 1], out_ids));
        ctx.insert(node.output(1), Tensor::from_f32(vec![rows, 1], out_weights));
        ctx.insert(node.output(2), Tensor::from_i32(vec![rows, 1], out_types));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::shard_env;

    fn layer_node() -> DagNodeDef {
        DagNodeDef::new("layer", "API_LOCAL_SAMPLE_L")
            .with_inputs(vec![
                "idx".into(),
                "ids".into(),
                "w".into(),
                "t".into(),
                "n".into(),
                "m".into(),
                "sqrt".into(),
                "0".into(),
            ])
            .with_outputs(3)
    }

    #[test]
    fn test_layer_sampling() {
        let mut ctx = OpKernelContext::new();
        // One batch of n=3 rows over neighbors of roots 1, 2, 3.
        ctx.insert(
            "idx",
            Tensor::from_i32(vec![3, 2], vec![0, 3, 3, 5, 5, 6]),
        );
        ctx.insert("ids", Tensor::from_u64(vec![6], vec![2, 3, 4, 3, 5, 4]));
        ctx.insert(
            "w",
            Tensor::from_f32(vec![6], vec![2.0, 3.0, 4.0, 3.0, 5.0, 4.0]),
        );
        ctx.insert("t", Tensor::from_i32(vec![6], vec![0, 1, 0, 1, 1, 0]));
        ctx.insert("n", Tensor::scalar_i32(3));
        ctx.insert("m", Tensor::scalar_i32(10));
        LocalSampleLayerOp
            .compute(&layer_node(), &shard_env(), &mut ctx)
            .unwrap();
        let ids = ctx.get("layer:0").unwrap().as_u64().unwrap();
        assert_eq!(ids.len(), 10);
        assert!(ids.iter().all(|id| [2, 3, 4, 5].contains(id)));
        // Duplicate (4, 0) rows were merged, then sqrt-transformed.
        let weights = ctx.get("layer:1").unwrap().as_f32().unwrap();
        for (id, w) in ids.iter().zip(weights) {
            if *id == 4 {
                assert!((w - 8.0f32.sqrt()).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_empty_batch_default_fill() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("idx", Tensor::from_i32(vec![1, 2], vec![0, 0]));
        ctx.insert("ids", Tensor::from_u64(vec![0], vec![]));
        ctx.insert("w", Tensor::from_f32(vec![0], vec![]));
        ctx.insert("t", Tensor::from_i32(vec![0], vec![]));
        ctx.insert("n", Tensor::scalar_i32(1));
        ctx.insert("m", Tensor::scalar_i32(4));
        LocalSampleLayerOp
            .compute(&layer_node(), &shard_env(), &mut ctx)
            .unwrap();
        let ids = ctx.get("layer:0").unwrap().as_u64().unwrap();
        assert_eq!(ids, &[0, 0, 0, 0]);
    }
}
