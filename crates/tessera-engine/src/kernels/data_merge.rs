//! `DATA_MERGE` / `GP_DATA_MERGE` / `DATA_ROW_APPEND_MERGE`: reassembly
//! of variable-width sharded results.
//!
//! `DATA_MERGE` consumes one (data, idx, merge_idx) triple per shard;
//! each shard-local row `j` belongs at global row `merge_idx[j]`. When
//! several shards contribute to one global row, the non-sentinel
//! contributions concatenate in shard order; a row whose contributions
//! are all sentinel-headed keeps the first one. Outputs: `:0` merged
//! data, `:1` merged idx `[n,2]`. `GP_DATA_MERGE` additionally emits
//! one element-remap tensor per shard (shard data position → merged
//! data position) at `:1..=K`, with the merged idx following at `:K+1`.

use tessera_core::{EngineError, Result, DEFAULT_CHAR, DEFAULT_INT32, DEFAULT_UINT64};
use tracing::error;

use crate::context::OpKernelContext;
use crate::dag::DagNodeDef;
use crate::kernels::common;
use crate::registry::{KernelEnv, OpKernel};
use crate::tensor::{Tensor, TensorData};

pub struct DataMergeOp {
    emit_remaps: bool,
}

impl DataMergeOp {
    pub fn plain() -> Self {
        Self { emit_remaps: false }
    }

    pub fn gp() -> Self {
        Self { emit_remaps: true }
    }
}

impl OpKernel for DataMergeOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        if node.inputs.len() % 3 != 0 || node.inputs.is_empty() {
            error!("DataMerge takes (data, idx, merge_idx) per shard");
            return Ok(());
        }
        let shard_count = node.inputs.len() / 3;
        let mut datas = Vec::with_capacity(shard_count);
        let mut idxs = Vec::with_capacity(shard_count);
        let mut merges = Vec::with_capacity(shard_count);
        for s in 0..shard_count {
            datas.push(common::get_tensor(ctx, node, 3 * s)?.clone());
            idxs.push(common::i32_list(ctx, node, 3 * s + 1)?);
            merges.push(common::i32_list(ctx, node, 3 * s + 2)?);
        }

        // Rows may be fixed-width records (e.g. `[m, 3]` edge ids);
        // idx offsets count rows, data slices scale by the width.
        let width: usize = datas[0].shape().iter().skip(1).product::<usize>().max(1);
        let merged = match datas[0].data() {
            TensorData::UInt64(_) => merge_typed(
                &datas,
                &idxs,
                &merges,
                width,
                |t| t.as_u64().unwrap_or(&[]),
                |v| *v == DEFAULT_UINT64,
                Tensor::from_u64,
            ),
            TensorData::Float(_) => merge_typed(
                &datas,
                &idxs,
                &merges,
                width,
                |t| t.as_f32().unwrap_or(&[]),
                |v| v.is_nan(),
                Tensor::from_f32,
            ),
            TensorData::Int32(_) => merge_typed(
                &datas,
                &idxs,
                &merges,
                width,
                |t| t.as_i32().unwrap_or(&[]),
                |v| *v == DEFAULT_INT32,
                Tensor::from_i32,
            ),
            TensorData::Int8(_) => merge_typed(
                &datas,
                &idxs,
                &merges,
                width,
                |t| t.as_i8().unwrap_or(&[]),
                |v| *v == DEFAULT_CHAR as i8,
                Tensor::from_i8,
            ),
            TensorData::Int64(_) => merge_typed(
                &datas,
                &idxs,
                &merges,
                width,
                |t| t.as_i64().unwrap_or(&[]),
                |v| *v == i64::MIN,
                Tensor::from_i64,
            ),
            _ => {
                return Err(EngineError::invalid_argument(
                    "unsupported data type for DataMerge",
                ))
            }
        };

        let MergeOutput {
            data,
            idx,
            row_count,
            remaps,
        } = merged;
        ctx.insert(node.output(0), data);
        if self.emit_remaps {
            for (s, remap) in remaps.into_iter().enumerate() {
                let len = remap.len();
                ctx.insert(node.output(1 + s), Tensor::from_i32(vec![len], remap));
            }
            ctx.insert(
                node.output(1 + shard_count),
                Tensor::from_i32(vec![row_count, 2], idx),
            );
        } else {
            ctx.insert(node.output(1), Tensor::from_i32(vec![row_count, 2], idx));
        }
        Ok(())
    }
}

struct MergeOutput {
    data: Tensor,
    idx: Vec<i32>,
    row_count: usize,
    remaps: Vec<Vec<i32>>,
}

fn merge_typed<T: Copy>(
    datas: &[Tensor],
    idxs: &[Vec<i32>],
    merges: &[Vec<i32>],
    width: usize,
    slice: impl Fn(&Tensor) -> &[T],
    is_default: impl Fn(&T) -> bool,
    build: impl Fn(Vec<usize>, Vec<T>) -> Tensor,
) -> MergeOutput {
    let row_count = merges
        .iter()
        .flat_map(|m| m.iter())
        .map(|&r| r as usize + 1)
        .max()
        .unwrap_or(0);

    // contributions[r] = (shard, element begin, element end) in shard
    // order; idx values count rows, elements scale by the width.
    let mut contributions: Vec<Vec<(usize, usize, usize)>> = vec![Vec::new(); row_count];
    for (s, (idx, merge)) in idxs.iter().zip(merges).enumerate() {
        for (j, &target) in merge.iter().enumerate() {
            if j * 2 + 1 >= idx.len() || target < 0 {
                continue;
            }
            contributions[target as usize].push((
                s,
                idx[2 * j] as usize * width,
                idx[2 * j + 1] as usize * width,
            ));
        }
    }

    let mut out = Vec::new();
    let mut out_idx = Vec::with_capacity(row_count * 2);
    let mut remaps: Vec<Vec<i32>> = datas.iter().map(|d| vec![0; slice(d).len()]).collect();
    for row in &contributions {
        let row_start = out.len();
        let real: Vec<&(usize, usize, usize)> = row
            .iter()
            .filter(|(s, begin, end)| {
                end > begin && !is_default(&slice(&datas[*s])[*begin])
            })
            .collect();
        if real.is_empty() {
            // Everyone sent sentinels (or nothing): keep the first
            // contribution verbatim.
            if let Some(&(s, begin, end)) = row.first() {
                for (offset, value) in slice(&datas[s])[begin..end].iter().enumerate() {
                    remaps[s][begin + offset] = (row_start + offset) as i32;
                    out.push(*value);
                }
            }
        } else {
            for &&(s, begin, end) in &real {
                let cursor = out.len();
                for (offset, value) in slice(&datas[s])[begin..end].iter().enumerate() {
                    remaps[s][begin + offset] = (cursor + offset) as i32;
                    out.push(*value);
                }
            }
        }
        // Skipped sentinel rows still learn where their row landed.
        for &(s, begin, end) in row {
            if real.iter().any(|&&(rs, rb, _)| rs == s && rb == begin) {
                continue;
            }
            for offset in 0..end.saturating_sub(begin) {
                remaps[s][begin + offset] = (row_start + offset) as i32;
            }
        }
        out_idx.push((row_start / width) as i32);
        out_idx.push((out.len() / width) as i32);
    }

    let len = out.len();
    let shape = if width > 1 {
        vec![len / width, width]
    } else {
        vec![len]
    };
    MergeOutput {
        data: build(shape, out),
        idx: out_idx,
        row_count,
        remaps,
    }
}

/// Merge without merge indexes: row `i` of every shard is appended in
/// the merge node's input order, for `i` ascending. The input order of
/// the merge node is preserved verbatim; shards are never reordered
/// here. A shard with a flat data tensor (empty idx slot) counts as a
/// single row.
pub struct DataRowAppendMergeOp;

impl OpKernel for DataRowAppendMergeOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        if node.inputs.len() % 3 != 0 || node.inputs.is_empty() {
            error!("DataRowAppendMerge takes (data, idx, <empty>) per shard");
            return Ok(());
        }
        let shard_count = node.inputs.len() / 3;
        let mut datas = Vec::with_capacity(shard_count);
        let mut idxs: Vec<Option<Vec<i32>>> = Vec::with_capacity(shard_count);
        for s in 0..shard_count {
            datas.push(common::get_tensor(ctx, node, 3 * s)?.clone());
            let idx_name = &node.inputs[3 * s + 1];
            if idx_name.is_empty() {
                idxs.push(None);
            } else {
                idxs.push(Some(common::i32_list(ctx, node, 3 * s + 1)?));
            }
        }

        // Fixed-width records keep their trailing dimensions.
        let width: usize = datas[0].shape().iter().skip(1).product::<usize>().max(1);
        // Element boundaries per shard row; a flat tensor is one row.
        let rows_of = |s: usize| -> Vec<(usize, usize)> {
            match &idxs[s] {
                Some(idx) => idx
                    .chunks_exact(2)
                    .map(|c| (c[0] as usize * width, c[1] as usize * width))
                    .collect(),
                None => vec![(0, datas[s].num_elements())],
            }
        };
        let shard_rows: Vec<Vec<(usize, usize)>> = (0..shard_count).map(rows_of).collect();
        let max_rows = shard_rows.iter().map(|r| r.len()).max().unwrap_or(0);

        let merged = match datas[0].data() {
            TensorData::UInt64(_) => append_rows(
                &datas,
                &shard_rows,
                max_rows,
                width,
                |t| t.as_u64().unwrap_or(&[]),
                Tensor::from_u64,
            ),
            TensorData::Float(_) => append_rows(
                &datas,
                &shard_rows,
                max_rows,
                width,
                |t| t.as_f32().unwrap_or(&[]),
                Tensor::from_f32,
            ),
            TensorData::Int32(_) => append_rows(
                &datas,
                &shard_rows,
                max_rows,
                width,
                |t| t.as_i32().unwrap_or(&[]),
                Tensor::from_i32,
            ),
            TensorData::Int64(_) => append_rows(
                &datas,
                &shard_rows,
                max_rows,
                width,
                |t| t.as_i64().unwrap_or(&[]),
                Tensor::from_i64,
            ),
            TensorData::Int8(_) => append_rows(
                &datas,
                &shard_rows,
                max_rows,
                width,
                |t| t.as_i8().unwrap_or(&[]),
                Tensor::from_i8,
            ),
            _ => {
                return Err(EngineError::invalid_argument(
                    "unsupported data type for DataRowAppendMerge",
                ))
            }
        };
        let (data, idx) = merged;
        let rows = idx.len() / 2;
        ctx.insert(node.output(0), data);
        ctx.insert(node.output(1), Tensor::from_i32(vec![rows, 2], idx));
        Ok(())
    }
}

fn append_rows<T: Copy>(
    datas: &[Tensor],
    shard_rows: &[Vec<(usize, usize)>],
    max_rows: usize,
    width: usize,
    slice: impl Fn(&Tensor) -> &[T],
    build: impl Fn(Vec<usize>, Vec<T>) -> Tensor,
) -> (Tensor, Vec<i32>) {
    let mut out = Vec::new();
    let mut idx = Vec::new();
    for i in 0..max_rows {
        for (s, rows) in shard_rows.iter().enumerate() {
            if let Some(&(begin, end)) = rows.get(i) {
                idx.push((out.len() / width) as i32);
                out.extend_from_slice(&slice(&datas[s])[begin..end]);
                idx.push((out.len() / width) as i32);
            }
        }
    }
    let len = out.len();
    let shape = if width > 1 {
        vec![len / width, width]
    } else {
        vec![len]
    };
    (build(shape, out), idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::testing::shard_env;

    fn merge_node(op: &str, shard_count: usize, outputs: usize) -> DagNodeDef {
        let mut inputs = Vec::new();
        for s in 0..shard_count {
            inputs.push(format!("data{}", s));
            inputs.push(format!("idx{}", s));
            inputs.push(format!("merge{}", s));
        }
        DagNodeDef::new("m", op)
            .with_inputs(inputs)
            .with_outputs(outputs)
    }

    fn insert_shard(
        ctx: &mut OpKernelContext,
        s: usize,
        data: Vec<u64>,
        idx: Vec<i32>,
        merge: Vec<i32>,
    ) {
        let rows = idx.len() / 2;
        let len = data.len();
        ctx.insert(format!("data{}", s), Tensor::from_u64(vec![len], data));
        ctx.insert(format!("idx{}", s), Tensor::from_i32(vec![rows, 2], idx));
        let mlen = merge.len();
        ctx.insert(format!("merge{}", s), Tensor::from_i32(vec![mlen], merge));
    }

    #[test]
    fn test_data_merge_disjoint_rows() {
        let mut ctx = OpKernelContext::new();
        insert_shard(&mut ctx, 0, vec![1, 2, 6, 7, 8], vec![0, 2, 2, 5], vec![0, 2]);
        insert_shard(&mut ctx, 1, vec![3, 4, 5, 9, 10], vec![0, 3, 3, 5], vec![1, 3]);
        let node = merge_node("DATA_MERGE", 2, 2);
        DataMergeOp::plain()
            .compute(&node, &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(
            ctx.get("m:0").unwrap().as_u64().unwrap(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
        );
        assert_eq!(
            ctx.get("m:1").unwrap().as_i32().unwrap(),
            &[0, 2, 2, 5, 5, 8, 8, 10]
        );
    }

    #[test]
    fn test_gp_data_merge_overlapping_rows() {
        let mut ctx = OpKernelContext::new();
        insert_shard(
            &mut ctx,
            0,
            vec![1, 2, 6, 7, 8],
            vec![0, 2, 2, 2, 2, 5],
            vec![0, 1, 2],
        );
        insert_shard(
            &mut ctx,
            1,
            vec![3, 4, 5, 9, 10],
            vec![0, 3, 3, 3, 3, 5],
            vec![1, 2, 3],
        );
        let node = merge_node("GP_DATA_MERGE", 2, 4);
        DataMergeOp::gp()
            .compute(&node, &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(
            ctx.get("m:0").unwrap().as_u64().unwrap(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
        );
        assert_eq!(
            ctx.get("m:1").unwrap().as_i32().unwrap(),
            &[0, 1, 5, 6, 7]
        );
        assert_eq!(
            ctx.get("m:2").unwrap().as_i32().unwrap(),
            &[2, 3, 4, 8, 9]
        );
    }

    #[test]
    fn test_gp_data_merge_sentinel_rows_lose() {
        let d = DEFAULT_UINT64;
        let mut ctx = OpKernelContext::new();
        insert_shard(
            &mut ctx,
            0,
            vec![1, 2, d, d, d, 6, 7, 8],
            vec![0, 2, 2, 5, 5, 8],
            vec![0, 1, 2],
        );
        insert_shard(
            &mut ctx,
            1,
            vec![3, 4, 5, d, d, d, 9, 10],
            vec![0, 3, 3, 6, 6, 8],
            vec![1, 2, 3],
        );
        let node = merge_node("GP_DATA_MERGE", 2, 4);
        DataMergeOp::gp()
            .compute(&node, &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(
            ctx.get("m:0").unwrap().as_u64().unwrap(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
        );
        assert_eq!(
            ctx.get("m:1").unwrap().as_i32().unwrap(),
            &[0, 1, 2, 3, 4, 5, 6, 7]
        );
        assert_eq!(
            ctx.get("m:2").unwrap().as_i32().unwrap(),
            &[2, 3, 4, 5, 6, 7, 8, 9]
        );
    }

    #[test]
    fn test_row_append_merge_interleaves_rows() {
        let mut ctx = OpKernelContext::new();
        let node = {
            let mut n = merge_node("DATA_ROW_APPEND_MERGE", 2, 2);
            n.inputs[2] = String::new();
            n.inputs[5] = String::new();
            n
        };
        insert_shard(&mut ctx, 0, vec![1, 2, 6, 7, 8], vec![0, 2, 2, 5], vec![]);
        insert_shard(&mut ctx, 1, vec![3, 4, 5, 9, 10], vec![0, 3, 3, 5], vec![]);
        DataRowAppendMergeOp
            .compute(&node, &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(
            ctx.get("m:0").unwrap().as_u64().unwrap(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
        );
    }

    #[test]
    fn test_row_append_merge_flat_tensors() {
        let mut ctx = OpKernelContext::new();
        let mut node = merge_node("DATA_ROW_APPEND_MERGE", 2, 2);
        node.inputs[1] = String::new();
        node.inputs[2] = String::new();
        node.inputs[4] = String::new();
        node.inputs[5] = String::new();
        ctx.insert("data0", Tensor::from_u64(vec![2], vec![4, 6]));
        ctx.insert("data1", Tensor::from_u64(vec![3], vec![1, 3, 5]));
        DataRowAppendMergeOp
            .compute(&node, &shard_env(), &mut ctx)
            .unwrap();
        assert_eq!(
            ctx.get("m:0").unwrap().as_u64().unwrap(),
            &[4, 6, 1, 3, 5]
        );
    }
}
