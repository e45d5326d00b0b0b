//! `REGULAR_DATA_MERGE` / `GP_REGULAR_DATA_MERGE`: reassembly of
//! fixed-width per-row outputs.
//!
//! Inputs repeat (data, merge_idx) per shard; each shard's row `j`
//! belongs at global row `merge_idx[j]`. The output starts filled with
//! the dtype's sentinel; rows whose first element is the sentinel are
//! never propagated, so the last non-sentinel contribution wins.

use tessera_core::{
    EngineError, Result, DEFAULT_CHAR, DEFAULT_FLOAT, DEFAULT_INT32, DEFAULT_UINT64,
};
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::{Tensor, TensorData};

pub struct RegularDataMergeOp;

impl OpKernel for RegularDataMergeOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        if node.inputs.len() % 2 != 0 || node.inputs.is_empty() {
            error!("RegularDataMerge takes (data, merge_idx) per shard");
            return Ok(());
        }
        let shard_count = node.inputs.len() / 2;
        let mut datas = Vec::with_capacity(shard_count);
        let mut merges = Vec::with_capacity(shard_count);
        let mut total_rows = 0usize;
        for s in 0..shard_count {
            let data = common::get_tensor(ctx, node, 2 * s)?.clone();
            total_rows += data.dim0();
            datas.push(data);
            merges.push(common::i32_list(ctx, node, 2 * s + 1)?);
        }
        // Row width comes from the first shard's trailing dimensions.
        let width: usize = datas[0].shape().iter().skip(1).product::<usize>().max(1);
        let mut shape = datas[0].shape().to_vec();
        if shape.is_empty() {
            shape = vec![total_rows];
        } else {
            shape[0] = total_rows;
        }

        let merged = match datas[0].data() {
            TensorData::UInt64(_) => merge_regular(
                &datas,
                &merges,
                total_rows,
                width,
                DEFAULT_UINT64,
                |t| t.as_u64().unwrap_or(&[]),
                |v| *v == DEFAULT_UINT64,
                |data| Tensor::from_u64(shape.clone(), data),
            ),
            TensorData::Float(_) => merge_regular(
                &datas,
                &merges,
                total_rows,
                width,
                DEFAULT_FLOAT,
                |t| t.as_f32().unwrap_or(&[]),
                |v| v.is_nan(),
                |data| Tensor::from_f32(shape.clone(), data),
            ),
            TensorData::Int32(_) => merge_regular(
                &datas,
                &merges,
                total_rows,
                width,
                DEFAULT_INT32,
                |t| t.as_i32().unwrap_or(&[]),
                |v| *v == DEFAULT_INT32,
                |data| Tensor::from_i32(shape.clone(), data),
            ),
            TensorData::Int8(_) => merge_regular(
                &datas,
                &merges,
                total_rows,
                width,
                DEFAULT_CHAR as i8,
                |t| t.as_i8().unwrap_or(&[]),
                |v| *v == DEFAULT_CHAR as i8,
                |data| Tensor::from_i8(shape.clone(), data),
            ),
            _ => {
                return Err(EngineError::invalid_argument(
                    "unsupported data type for RegularDataMerge",
                ))
            }
        };
        ctx.insert(node.output(0), merged);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn merge_regular<T: Copy>(
    datas: &[Tensor],
    merges: &[Vec<i32>],
    total_rows: usize,
    width: usize,
    default: T,
    slice: impl Fn(&Tensor) -> &[T],
    is_default: impl Fn(&T) -> bool,
    build: impl Fn(Vec<T>) -> Tensor,
) -> Tensor {
    let mut out = vec![default; total_rows * width];
    for (data, merge) in datas.iter().zip(merges) {
        let values = slice(data);
        for (j, &target) in merge.iter().enumerate() {
            let src = j * width;
            if src + width > values.len() || target < 0 {
                continue;
            }
            if is_default(&values[src]) {
                continue;
            }
            let dst = target as usize * width;
            if dst + width <= out.len() {
                out[dst..dst + width].copy_from_slice(&values[src..src + width]);
            }
        }
    }
    build(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::shard_env;

    fn merge_node(shard_count: usize) -> DagNodeDef {
        let mut inputs = Vec::new();
        for s in 0..shard_count {
            inputs.push(format!("data{}", s));
            inputs.push(format!("merge{}", s));
        }
        DagNodeDef::new("m", "REGULAR_DATA_MERGE").with_inputs(inputs)
    }

    #[test]
    fn test_regular_merge_rows() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("data0", Tensor::from_u64(vec![2, 2], vec![10, 11, 30, 31]));
        ctx.insert("merge0", Tensor::from_i32(vec![2], vec![0, 2]));
        ctx.insert("data1", Tensor::from_u64(vec![2, 2], vec![20, 21, 40, 41]));
        ctx.insert("merge1", Tensor::from_i32(vec![2], vec![1, 3]));
        RegularDataMergeOp
            .compute(&merge_node(2), &shard_env(), &mut ctx)
            .unwrap();
        let out = ctx.get("m:0").unwrap();
        assert_eq!(out.shape(), &[4, 2]);
        assert_eq!(
            out.as_u64().unwrap(),
            &[10, 11, 20, 21, 30, 31, 40, 41]
        );
    }

    #[test]
    fn test_sentinel_rows_do_not_overwrite() {
        let d = DEFAULT_UINT64;
        let mut ctx = OpKernelContext::new();
        ctx.insert("data0", Tensor::from_u64(vec![2, 1], vec![7, d]));
        ctx.insert("merge0", Tensor::from_i32(vec![2], vec![0, 1]));
        ctx.insert("data1", Tensor::from_u64(vec![2, 1], vec![d, 9]));
        ctx.insert("merge1", Tensor::from_i32(vec![2], vec![0, 1]));
        RegularDataMergeOp
            .compute(&merge_node(2), &shard_env(), &mut ctx)
            .unwrap();
        // Shard 1's sentinel at row 0 must not clobber shard 0's 7.
        let out = ctx.get("m:0").unwrap().as_u64().unwrap().to_vec();
        assert_eq!(out[0], 7);
        assert_eq!(out[1], 9);
        // Rows 2..3 were never written and stay sentinel.
        assert_eq!(out[2], d);
        assert_eq!(out[3], d);
    }

    #[test]
    fn test_int32_sentinel() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("data0", Tensor::from_i32(vec![1, 1], vec![5]));
        ctx.insert("merge0", Tensor::from_i32(vec![1], vec![1]));
        ctx.insert("data1", Tensor::from_i32(vec![1, 1], vec![6]));
        ctx.insert("merge1", Tensor::from_i32(vec![1], vec![0]));
        RegularDataMergeOp
            .compute(&merge_node(2), &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.get("m:0").unwrap().as_i32().unwrap(), &[6, 5]);
    }
}
