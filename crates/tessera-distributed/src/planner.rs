//! Query planner: split/merge rewriting for cross-shard execution.
//!
//! Every remotely executable operator `R` in a query DAG is replaced
//! by a split node (partitioning its id-typed inputs per shard, or
//! splitting sample counts by the registered shard weights), one
//! remote stub per shard, and merge node(s) that reassemble the
//! sharded outputs. Downstream consumers are rewired onto the merge
//! outputs; operators with no split strategy stay in the client DAG.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tessera_core::{thread_index, EngineError, NodeId, Result};
use tessera_engine::kernels::common;
use tessera_engine::{
    output_name, DagDef, DagNodeDef, KernelEnv, KernelRegistry, OpKernel, OpKernelContext, Tensor,
};
use tracing::error;

use crate::types::ShardWeights;

/// One dispatched sub-plan: the DAG a shard runs plus the outputs the
/// client collects from it.
#[derive(Debug, Clone)]
pub struct ShardCall {
    pub shard: u32,
    pub dag: DagDef,
    pub outputs: Vec<String>,
}

/// A rewritten query: the client-side DAG (splits, remote stubs,
/// merges and untouched local operators), the per-stub shard calls,
/// and the renames from original output names to their merged
/// replacements.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub dag: DagDef,
    pub calls: HashMap<String, ShardCall>,
    pub renames: HashMap<String, String>,
}

/// Rewrites query DAGs for a cluster of `shard_num` shards.
pub struct Planner {
    shard_num: usize,
    weights: Arc<ShardWeights>,
}

/// Ops with a declared split strategy.
const REMOTE_OPS: &[&str] = &[
    "API_SAMPLE_NODE",
    "API_SAMPLE_EDGE",
    "API_SAMPLE_N_WITH_TYPES",
    "API_GET_NODE",
    "API_GET_EDGE",
    "API_GET_NODE_T",
    "API_GET_P",
    "API_GET_NB_NODE",
    "API_GET_NB_EDGE",
    "API_SAMPLE_NB",
    "API_GET_EDGE_SUM_WEIGHT",
    "API_SAMPLE_L",
    "API_SPARSE_GET_ADJ",
    "API_GET_GRAPH_BY_LABEL",
];

impl Planner {
    pub fn new(shard_num: usize, weights: Arc<ShardWeights>) -> Self {
        Self { shard_num, weights }
    }

    /// Register the planner's split kernels into a client registry.
    pub fn register_split_kernels(&self, registry: &mut KernelRegistry) {
        registry.register_sync(
            "ID_SPLIT",
            Arc::new(IdSplitOp {
                shard_num: self.shard_num,
            }),
        );
        registry.register_sync(
            "EDGE_SPLIT",
            Arc::new(EdgeSplitOp {
                shard_num: self.shard_num,
            }),
        );
        registry.register_sync(
            "SAMPLE_NODE_SPLIT",
            Arc::new(SampleSplitOp {
                shard_num: self.shard_num,
                weights: self.weights.clone(),
                edge: false,
            }),
        );
        registry.register_sync(
            "SAMPLE_EDGE_SPLIT",
            Arc::new(SampleSplitOp {
                shard_num: self.shard_num,
                weights: self.weights.clone(),
                edge: true,
            }),
        );
        registry.register_sync(
            "SAMPLE_N_WITH_TYPES_SPLIT",
            Arc::new(SampleNWithTypesSplitOp {
                shard_num: self.shard_num,
                weights: self.weights.clone(),
            }),
        );
    }

    /// Rewrite `dag` into the client plan. `ctx` holds the request
    /// inputs; their shapes disambiguate node-id from edge-id inputs.
    pub fn plan(&self, dag: &DagDef, ctx: &OpKernelContext) -> Result<Plan> {
        let mut plan = Plan::default();
        // Output names known to carry [n,3] edge-id rows.
        let mut edge_outputs: HashSet<String> = HashSet::new();

        for original in &dag.nodes {
            let mut node = original.clone();
            for input in node.inputs.iter_mut() {
                if let Some(new_name) = plan.renames.get(input) {
                    *input = new_name.clone();
                }
            }
            if self.shard_num <= 1 || !REMOTE_OPS.contains(&node.op.as_str()) {
                track_edge_outputs(&node, &mut edge_outputs);
                plan.dag.nodes.push(node);
                continue;
            }
            self.rewrite(&node, ctx, &mut plan, &mut edge_outputs)?;
        }
        Ok(plan)
    }

    fn rewrite(
        &self,
        node: &DagNodeDef,
        ctx: &OpKernelContext,
        plan: &mut Plan,
        edge_outputs: &mut HashSet<String>,
    ) -> Result<()> {
        let min_inputs = match node.op.as_str() {
            "API_GET_NODE" | "API_GET_EDGE" => 0,
            "API_GET_NODE_T" | "API_GET_GRAPH_BY_LABEL" => 1,
            "API_SAMPLE_L" | "API_SPARSE_GET_ADJ" => 3,
            "API_SAMPLE_NB" => 4,
            _ => 2,
        };
        if node.inputs.len() < min_inputs {
            return Err(EngineError::invalid_argument(format!(
                "op {} needs at least {} inputs",
                node.op, min_inputs
            )));
        }
        match node.op.as_str() {
            "API_SAMPLE_NODE" | "API_SAMPLE_EDGE" => {
                self.rewrite_sample(node, plan, edge_outputs)
            }
            "API_SAMPLE_N_WITH_TYPES" => self.rewrite_sample_n_with_types(node, plan),
            "API_GET_NODE" | "API_GET_EDGE" => {
                self.rewrite_get_ids(node, ctx, plan, edge_outputs)
            }
            "API_GET_NODE_T" => self.rewrite_regular(node, plan, &[0]),
            "API_GET_EDGE_SUM_WEIGHT" => self.rewrite_regular(node, plan, &[0, 1]),
            "API_SAMPLE_L" => self.rewrite_regular(node, plan, &[0, 1, 2]),
            "API_GET_P" => self.rewrite_get_feature(node, ctx, plan, edge_outputs),
            "API_GET_NB_NODE" | "API_SAMPLE_NB" => self.rewrite_neighbor(node, plan),
            "API_GET_NB_EDGE" => self.rewrite_neighbor_edge(node, plan, edge_outputs),
            "API_SPARSE_GET_ADJ" => self.rewrite_sparse_get_adj(node, plan),
            "API_GET_GRAPH_BY_LABEL" => self.rewrite_single_shard(node, plan),
            other => Err(EngineError::internal(format!(
                "no split strategy for op {}",
                other
            ))),
        }
    }

    /// Split node producing per-shard id subsets and merge indexes for
    /// the id-typed input at position 0.
    fn push_id_split(
        &self,
        node: &DagNodeDef,
        split_op: &str,
        plan: &mut Plan,
    ) -> String {
        let split_name = format!("{}_split", node.name);
        plan.dag.nodes.push(
            DagNodeDef::new(&split_name, split_op)
                .with_inputs(vec![node.inputs[0].clone()])
                .with_outputs(2 * self.shard_num),
        );
        split_name
    }

    /// Remote stub running `sub_node` on `shard`; its client-side
    /// twin carries the same inputs so scheduling and shipping align.
    fn push_stub(
        &self,
        plan: &mut Plan,
        shard: usize,
        sub_node: DagNodeDef,
    ) -> String {
        let stub_name = sub_node.name.clone();
        let outputs: Vec<String> = (0..sub_node.output_num)
            .map(|k| output_name(&stub_name, k))
            .collect();
        plan.dag.nodes.push(
            DagNodeDef::new(&stub_name, "REMOTE_EXECUTE")
                .with_inputs(sub_node.inputs.clone())
                .with_outputs(sub_node.output_num),
        );
        plan.calls.insert(
            stub_name.clone(),
            ShardCall {
                shard: shard as u32,
                dag: DagDef::new(vec![sub_node]),
                outputs,
            },
        );
        stub_name
    }

    /// `API_SAMPLE_NODE` / `API_SAMPLE_EDGE`: weighted count split,
    /// row-append merge.
    fn rewrite_sample(
        &self,
        node: &DagNodeDef,
        plan: &mut Plan,
        edge_outputs: &mut HashSet<String>,
    ) -> Result<()> {
        let edge = node.op == "API_SAMPLE_EDGE";
        let split_op = if edge {
            "SAMPLE_EDGE_SPLIT"
        } else {
            "SAMPLE_NODE_SPLIT"
        };
        let split_name = format!("{}_split", node.name);
        plan.dag.nodes.push(
            DagNodeDef::new(&split_name, split_op)
                .with_inputs(node.inputs.clone())
                .with_outputs(self.shard_num),
        );

        let mut merge_inputs = Vec::new();
        for s in 0..self.shard_num {
            let mut sub_node = DagNodeDef::new(format!("{}_s{}", node.name, s), &node.op)
                .with_inputs(vec![
                    node.inputs[0].clone(),
                    output_name(&split_name, s),
                ]);
            sub_node.dnf = node.dnf.clone();
            let stub = self.push_stub(plan, s, sub_node);
            merge_inputs.push(output_name(&stub, 0));
            merge_inputs.push(String::new());
            merge_inputs.push(String::new());
        }
        let merge_name = format!("{}_m", node.name);
        plan.dag.nodes.push(
            DagNodeDef::new(&merge_name, "DATA_ROW_APPEND_MERGE")
                .with_inputs(merge_inputs)
                .with_outputs(2),
        );
        let merged = output_name(&merge_name, 0);
        if edge {
            edge_outputs.insert(merged.clone());
        }
        plan.renames.insert(node.output(0), merged);
        Ok(())
    }

    /// `API_SAMPLE_N_WITH_TYPES`: weighted per-type count split; every
    /// shard contributes to every type row, so the data merge
    /// concatenates row segments in shard order.
    fn rewrite_sample_n_with_types(&self, node: &DagNodeDef, plan: &mut Plan) -> Result<()> {
        let split_name = format!("{}_split", node.name);
        plan.dag.nodes.push(
            DagNodeDef::new(&split_name, "SAMPLE_N_WITH_TYPES_SPLIT")
                .with_inputs(vec![node.inputs[1].clone(), node.inputs[0].clone()])
                .with_outputs(2 * self.shard_num),
        );
        let mut merge_inputs = Vec::new();
        for s in 0..self.shard_num {
            let sub_node = DagNodeDef::new(format!("{}_s{}", node.name, s), &node.op)
                .with_inputs(vec![
                    node.inputs[0].clone(),
                    output_name(&split_name, 2 * s),
                ])
                .with_outputs(2);
            let stub = self.push_stub(plan, s, sub_node);
            merge_inputs.push(output_name(&stub, 1));
            merge_inputs.push(output_name(&stub, 0));
            merge_inputs.push(output_name(&split_name, 2 * s + 1));
        }
        let merge_name = format!("{}_m", node.name);
        plan.dag.nodes.push(
            DagNodeDef::new(&merge_name, "DATA_MERGE")
                .with_inputs(merge_inputs)
                .with_outputs(2),
        );
        plan.renames
            .insert(node.output(0), output_name(&merge_name, 1));
        plan.renames
            .insert(node.output(1), output_name(&merge_name, 0));
        Ok(())
    }

    /// `API_GET_NODE` / `API_GET_EDGE`: id split, row-append merge,
    /// post processing re-applied locally after the merge.
    fn rewrite_get_ids(
        &self,
        node: &DagNodeDef,
        ctx: &OpKernelContext,
        plan: &mut Plan,
        edge_outputs: &mut HashSet<String>,
    ) -> Result<()> {
        let edge = node.op == "API_GET_EDGE";
        let has_ids = !node.inputs.is_empty();
        let split_name = if has_ids {
            Some(self.push_id_split(
                node,
                if edge || is_edge_input(&node.inputs[0], ctx, edge_outputs) {
                    "EDGE_SPLIT"
                } else {
                    "ID_SPLIT"
                },
                plan,
            ))
        } else {
            None
        };

        let mut merge_inputs = Vec::new();
        for s in 0..self.shard_num {
            let inputs = match &split_name {
                Some(split) => vec![output_name(split, 2 * s)],
                None => Vec::new(),
            };
            let mut sub_node =
                DagNodeDef::new(format!("{}_s{}", node.name, s), &node.op).with_inputs(inputs);
            sub_node.dnf = node.dnf.clone();
            let stub = self.push_stub(plan, s, sub_node);
            merge_inputs.push(output_name(&stub, 0));
            merge_inputs.push(String::new());
            merge_inputs.push(String::new());
        }
        let merge_name = format!("{}_m", node.name);
        plan.dag.nodes.push(
            DagNodeDef::new(&merge_name, "DATA_ROW_APPEND_MERGE")
                .with_inputs(merge_inputs)
                .with_outputs(2),
        );

        let mut merged = output_name(&merge_name, 0);
        if !node.post_process.is_empty() {
            let post_name = format!("{}_post", node.name);
            let mut post_node =
                DagNodeDef::new(&post_name, &node.op).with_inputs(vec![merged.clone()]);
            post_node.post_process = node.post_process.clone();
            plan.dag.nodes.push(post_node);
            merged = output_name(&post_name, 0);
        }
        if edge {
            edge_outputs.insert(merged.clone());
        }
        plan.renames.insert(node.output(0), merged);
        Ok(())
    }

    /// Fixed-width outputs: id split plus one regular merge per
    /// output.
    fn rewrite_regular(&self, node: &DagNodeDef, plan: &mut Plan, outputs: &[usize]) -> Result<()> {
        let split_name = self.push_id_split(node, "ID_SPLIT", plan);
        let mut merge_inputs: Vec<Vec<String>> = vec![Vec::new(); outputs.len()];
        for s in 0..self.shard_num {
            let mut inputs = node.inputs.clone();
            inputs[0] = output_name(&split_name, 2 * s);
            let sub_node = DagNodeDef::new(format!("{}_s{}", node.name, s), &node.op)
                .with_inputs(inputs)
                .with_outputs(outputs.len());
            let stub = self.push_stub(plan, s, sub_node);
            for (i, &k) in outputs.iter().enumerate() {
                merge_inputs[i].push(output_name(&stub, k));
                merge_inputs[i].push(output_name(&split_name, 2 * s + 1));
            }
        }
        for (i, &k) in outputs.iter().enumerate() {
            let merge_name = format!("{}_m{}", node.name, i);
            plan.dag.nodes.push(
                DagNodeDef::new(&merge_name, "REGULAR_DATA_MERGE")
                    .with_inputs(merge_inputs[i].clone()),
            );
            plan.renames
                .insert(node.output(k), output_name(&merge_name, 0));
        }
        Ok(())
    }

    /// `API_GET_P`: id or edge split by the ids input's shape, one
    /// data merge per requested feature.
    fn rewrite_get_feature(
        &self,
        node: &DagNodeDef,
        ctx: &OpKernelContext,
        plan: &mut Plan,
        edge_outputs: &mut HashSet<String>,
    ) -> Result<()> {
        let split_op = if is_edge_input(&node.inputs[0], ctx, edge_outputs) {
            "EDGE_SPLIT"
        } else {
            "ID_SPLIT"
        };
        let split_name = self.push_id_split(node, split_op, plan);
        let feature_count = node.inputs.len() - 1;

        let mut stubs = Vec::with_capacity(self.shard_num);
        for s in 0..self.shard_num {
            let mut inputs = node.inputs.clone();
            inputs[0] = output_name(&split_name, 2 * s);
            let mut sub_node = DagNodeDef::new(format!("{}_s{}", node.name, s), &node.op)
                .with_inputs(inputs)
                .with_outputs(2 * feature_count);
            sub_node.udf_name = node.udf_name.clone();
            sub_node.udf_str_params = node.udf_str_params.clone();
            sub_node.udf_num_params = node.udf_num_params.clone();
            stubs.push(self.push_stub(plan, s, sub_node));
        }

        for j in 0..feature_count {
            let mut merge_inputs = Vec::new();
            for (s, stub) in stubs.iter().enumerate() {
                merge_inputs.push(output_name(stub, 2 * j + 1));
                merge_inputs.push(output_name(stub, 2 * j));
                merge_inputs.push(output_name(&split_name, 2 * s + 1));
            }
            let merge_name = format!("{}_m{}", node.name, j);
            plan.dag.nodes.push(
                DagNodeDef::new(&merge_name, "DATA_MERGE")
                    .with_inputs(merge_inputs)
                    .with_outputs(2),
            );
            plan.renames
                .insert(node.output(2 * j), output_name(&merge_name, 1));
            plan.renames
                .insert(node.output(2 * j + 1), output_name(&merge_name, 0));
        }
        Ok(())
    }

    /// Neighbor quadruple ops: id split; ids, weights and types merge
    /// against the shared per-root idx.
    fn rewrite_neighbor(&self, node: &DagNodeDef, plan: &mut Plan) -> Result<()> {
        let split_name = self.push_id_split(node, "ID_SPLIT", plan);
        let mut stubs = Vec::with_capacity(self.shard_num);
        for s in 0..self.shard_num {
            let mut inputs = node.inputs.clone();
            inputs[0] = output_name(&split_name, 2 * s);
            let mut sub_node = DagNodeDef::new(format!("{}_s{}", node.name, s), &node.op)
                .with_inputs(inputs)
                .with_outputs(4);
            sub_node.dnf = node.dnf.clone();
            sub_node.post_process = node.post_process.clone();
            stubs.push(self.push_stub(plan, s, sub_node));
        }

        let merge_names = ["id", "w", "t"];
        for (i, suffix) in merge_names.iter().enumerate() {
            let mut merge_inputs = Vec::new();
            for (s, stub) in stubs.iter().enumerate() {
                merge_inputs.push(output_name(stub, i + 1));
                merge_inputs.push(output_name(stub, 0));
                merge_inputs.push(output_name(&split_name, 2 * s + 1));
            }
            let merge_name = format!("{}_m{}", node.name, suffix);
            plan.dag.nodes.push(
                DagNodeDef::new(&merge_name, "DATA_MERGE")
                    .with_inputs(merge_inputs)
                    .with_outputs(2),
            );
            plan.renames
                .insert(node.output(i + 1), output_name(&merge_name, 0));
            if i == 0 {
                plan.renames
                    .insert(node.output(0), output_name(&merge_name, 1));
            }
        }
        Ok(())
    }

    /// `API_GET_NB_EDGE`: like the quadruple, minus the type tensor.
    fn rewrite_neighbor_edge(
        &self,
        node: &DagNodeDef,
        plan: &mut Plan,
        edge_outputs: &mut HashSet<String>,
    ) -> Result<()> {
        let split_name = self.push_id_split(node, "ID_SPLIT", plan);
        let mut stubs = Vec::with_capacity(self.shard_num);
        for s in 0..self.shard_num {
            let mut inputs = node.inputs.clone();
            inputs[0] = output_name(&split_name, 2 * s);
            let mut sub_node = DagNodeDef::new(format!("{}_s{}", node.name, s), &node.op)
                .with_inputs(inputs)
                .with_outputs(3);
            sub_node.post_process = node.post_process.clone();
            stubs.push(self.push_stub(plan, s, sub_node));
        }
        for (i, suffix) in ["e", "w"].iter().enumerate() {
            let mut merge_inputs = Vec::new();
            for (s, stub) in stubs.iter().enumerate() {
                merge_inputs.push(output_name(stub, i + 1));
                merge_inputs.push(output_name(stub, 0));
                merge_inputs.push(output_name(&split_name, 2 * s + 1));
            }
            let merge_name = format!("{}_m{}", node.name, suffix);
            plan.dag.nodes.push(
                DagNodeDef::new(&merge_name, "DATA_MERGE")
                    .with_inputs(merge_inputs)
                    .with_outputs(2),
            );
            plan.renames
                .insert(node.output(i + 1), output_name(&merge_name, 0));
            if i == 0 {
                plan.renames
                    .insert(node.output(0), output_name(&merge_name, 1));
                edge_outputs.insert(output_name(&merge_name, 0));
            }
        }
        Ok(())
    }

    /// `API_SPARSE_GET_ADJ`: roots split, adjacency (idx, ids) merge.
    fn rewrite_sparse_get_adj(&self, node: &DagNodeDef, plan: &mut Plan) -> Result<()> {
        let split_name = self.push_id_split(node, "ID_SPLIT", plan);
        let mut merge_inputs = Vec::new();
        for s in 0..self.shard_num {
            let mut inputs = node.inputs.clone();
            inputs[0] = output_name(&split_name, 2 * s);
            let sub_node = DagNodeDef::new(format!("{}_s{}", node.name, s), &node.op)
                .with_inputs(inputs)
                .with_outputs(2);
            let stub = self.push_stub(plan, s, sub_node);
            merge_inputs.push(output_name(&stub, 1));
            merge_inputs.push(output_name(&stub, 0));
            merge_inputs.push(output_name(&split_name, 2 * s + 1));
        }
        let merge_name = format!("{}_m", node.name);
        plan.dag.nodes.push(
            DagNodeDef::new(&merge_name, "DATA_MERGE")
                .with_inputs(merge_inputs)
                .with_outputs(2),
        );
        plan.renames
            .insert(node.output(0), output_name(&merge_name, 1));
        plan.renames
            .insert(node.output(1), output_name(&merge_name, 0));
        Ok(())
    }

    /// Index-only ops answer identically on every shard because value
    /// indexes are replicated; route them to one shard and take its
    /// outputs verbatim.
    fn rewrite_single_shard(&self, node: &DagNodeDef, plan: &mut Plan) -> Result<()> {
        let sub_node = DagNodeDef::new(format!("{}_s0", node.name), &node.op)
            .with_inputs(node.inputs.clone())
            .with_outputs(node.output_num);
        let stub = self.push_stub(plan, 0, sub_node);
        for k in 0..node.output_num {
            plan.renames.insert(node.output(k), output_name(&stub, k));
        }
        Ok(())
    }
}

fn track_edge_outputs(node: &DagNodeDef, edge_outputs: &mut HashSet<String>) {
    match node.op.as_str() {
        "API_SAMPLE_EDGE" | "API_GET_EDGE" => {
            edge_outputs.insert(node.output(0));
        }
        "API_GET_NB_EDGE" => {
            edge_outputs.insert(node.output(1));
        }
        _ => {}
    }
}

/// Whether a tensor name carries `[n, 3]` edge-id rows: either a
/// request input with that shape or the output of an edge-producing
/// operator.
fn is_edge_input(name: &str, ctx: &OpKernelContext, edge_outputs: &HashSet<String>) -> bool {
    if edge_outputs.contains(name) {
        return true;
    }
    ctx.get(name)
        .map(|t| t.shape().len() == 2 && t.shape()[1] == 3)
        .unwrap_or(false)
}

/// `ID_SPLIT`: partition node ids by `id % shard_number`, emitting per
/// shard the id subset (`:2s`) and the original-row merge index
/// (`:2s+1`).
struct IdSplitOp {
    shard_num: usize,
}

impl OpKernel for IdSplitOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        let ids = common::node_ids(ctx, node, 0)?;
        let mut parts: Vec<Vec<NodeId>> = vec![Vec::new(); self.shard_num];
        let mut merge: Vec<Vec<i32>> = vec![Vec::new(); self.shard_num];
        for (row, &id) in ids.iter().enumerate() {
            let owner = (id % self.shard_num as u64) as usize;
            parts[owner].push(id);
            merge[owner].push(row as i32);
        }
        for s in 0..self.shard_num {
            let part = std::mem::take(&mut parts[s]);
            let idx = std::mem::take(&mut merge[s]);
            let len = part.len();
            ctx.insert(node.output(2 * s), Tensor::from_u64(vec![len], part));
            ctx.insert(node.output(2 * s + 1), Tensor::from_i32(vec![len], idx));
        }
        Ok(())
    }
}

/// `EDGE_SPLIT`: partition `[n, 3]` edge ids by `src % shard_number`.
struct EdgeSplitOp {
    shard_num: usize,
}

impl OpKernel for EdgeSplitOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        let eids = common::edge_ids(ctx, node, 0)?;
        let mut parts: Vec<Vec<u64>> = vec![Vec::new(); self.shard_num];
        let mut merge: Vec<Vec<i32>> = vec![Vec::new(); self.shard_num];
        for (row, eid) in eids.iter().enumerate() {
            let owner = (eid.src % self.shard_num as u64) as usize;
            parts[owner].extend([eid.src, eid.dst, eid.edge_type as u64]);
            merge[owner].push(row as i32);
        }
        for s in 0..self.shard_num {
            let part = std::mem::take(&mut parts[s]);
            let idx = std::mem::take(&mut merge[s]);
            let rows = part.len() / 3;
            ctx.insert(node.output(2 * s), Tensor::from_u64(vec![rows, 3], part));
            ctx.insert(node.output(2 * s + 1), Tensor::from_i32(vec![rows], idx));
        }
        Ok(())
    }
}

/// Weighted count split shared by the plain samplers: shard `s`
/// receives `floor(count * w_s / total)` draws, with the remainder
/// assigned by uniform picks among shards of non-zero weight.
struct SampleSplitOp {
    shard_num: usize,
    weights: Arc<ShardWeights>,
    edge: bool,
}

impl OpKernel for SampleSplitOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        let types = common::i32_list(ctx, node, 0)?;
        let count = common::scalar_i32(ctx, node, 1)?.max(0);
        let table = if self.edge {
            &self.weights.edge
        } else {
            &self.weights.node
        };

        let mut shard_weight = vec![0.0f32; self.shard_num];
        for row in table.iter().enumerate().filter_map(|(t, row)| {
            if types.first() == Some(&-1) || types.contains(&(t as i32)) {
                Some(row)
            } else {
                None
            }
        }) {
            for (s, w) in shard_weight.iter_mut().enumerate() {
                *w += row.get(s).copied().unwrap_or(0.0);
            }
        }
        let total: f32 = shard_weight.iter().sum();
        if total <= 0.0 {
            return Err(EngineError::OutOfRange(format!(
                "sum weight of types {:?} is zero",
                types
            )));
        }

        let counts = split_counts(count, &shard_weight, total);
        for (s, c) in counts.into_iter().enumerate() {
            ctx.insert(node.output(s), Tensor::scalar_i32(c));
        }
        Ok(())
    }
}

/// `SAMPLE_N_WITH_TYPES_SPLIT`: per-type weighted count split. Inputs
/// are (counts, types); outputs per shard are the shard's count vector
/// (`:2s`) and the identity merge index over types (`:2s+1`).
struct SampleNWithTypesSplitOp {
    shard_num: usize,
    weights: Arc<ShardWeights>,
}

impl OpKernel for SampleNWithTypesSplitOp {
    fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &mut OpKernelContext,
    ) -> Result<()> {
        let counts = common::i32_list(ctx, node, 0)?;
        let types = common::i32_list(ctx, node, 1)?;
        if counts.len() != types.len() {
            error!("types num != counts num");
            return Err(EngineError::invalid_argument("types num != counts num"));
        }

        let mut split: Vec<Vec<i32>> = vec![vec![0; types.len()]; self.shard_num];
        for (i, (&t, &count)) in types.iter().zip(&counts).enumerate() {
            let row = self
                .weights
                .node
                .get(t.max(0) as usize)
                .filter(|_| t >= 0)
                .ok_or_else(|| {
                    EngineError::OutOfRange(format!("node type {} has no weight", t))
                })?;
            let total = row[self.shard_num];
            if total <= 0.0 {
                return Err(EngineError::OutOfRange(format!(
                    "node type {} sum weight is zero",
                    t
                )));
            }
            let per_shard = split_counts(count.max(0), &row[..self.shard_num], total);
            for (s, c) in per_shard.into_iter().enumerate() {
                split[s][i] = c;
            }
        }

        let identity: Vec<i32> = (0..types.len() as i32).collect();
        for (s, shard_counts) in split.into_iter().enumerate() {
            let len = shard_counts.len();
            ctx.insert(
                node.output(2 * s),
                Tensor::from_i32(vec![len], shard_counts),
            );
            ctx.insert(
                node.output(2 * s + 1),
                Tensor::from_i32(vec![len], identity.clone()),
            );
        }
        Ok(())
    }
}

fn split_counts(count: i32, shard_weight: &[f32], total: f32) -> Vec<i32> {
    let mut counts = Vec::with_capacity(shard_weight.len());
    let mut remainder = count;
    let mut non_zero = Vec::new();
    for (s, &w) in shard_weight.iter().enumerate() {
        let c = ((count as f32) * w / total).floor() as i32;
        counts.push(c);
        remainder -= c;
        if w > 0.0 {
            non_zero.push(s);
        }
    }
    while remainder > 0 {
        let pick = non_zero[thread_index(non_zero.len())];
        counts[pick] += 1;
        remainder -= 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_shard_weights() -> Arc<ShardWeights> {
        // The fixture split by id parity: shard 0 holds {2,4,6}
        // (type 0), shard 1 holds {1,3,5} (type 1).
        Arc::new(ShardWeights {
            node: vec![vec![12.0, 0.0, 12.0], vec![0.0, 9.0, 9.0]],
            edge: vec![vec![8.0, 2.0, 10.0], vec![4.0, 16.0, 20.0]],
        })
    }

    fn client_env() -> KernelEnv {
        KernelEnv::for_client(Vec::new())
    }

    #[test]
    fn test_id_split() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("ids", Tensor::from_u64(vec![4], vec![1, 2, 5, 6]));
        let node = DagNodeDef::new("split", "ID_SPLIT")
            .with_inputs(vec!["ids".into()])
            .with_outputs(4);
        IdSplitOp { shard_num: 2 }
            .compute(&node, &client_env(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.get("split:0").unwrap().as_u64().unwrap(), &[2, 6]);
        assert_eq!(ctx.get("split:1").unwrap().as_i32().unwrap(), &[1, 3]);
        assert_eq!(ctx.get("split:2").unwrap().as_u64().unwrap(), &[1, 5]);
        assert_eq!(ctx.get("split:3").unwrap().as_i32().unwrap(), &[0, 2]);
    }

    #[test]
    fn test_edge_split_by_src() {
        let mut ctx = OpKernelContext::new();
        ctx.insert(
            "eids",
            Tensor::from_u64(vec![2, 3], vec![1, 2, 0, 2, 3, 1]),
        );
        let node = DagNodeDef::new("split", "EDGE_SPLIT")
            .with_inputs(vec!["eids".into()])
            .with_outputs(4);
        EdgeSplitOp { shard_num: 2 }
            .compute(&node, &client_env(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.get("split:0").unwrap().as_u64().unwrap(), &[2, 3, 1]);
        assert_eq!(ctx.get("split:2").unwrap().as_u64().unwrap(), &[1, 2, 0]);
    }

    #[test]
    fn test_sample_split_counts_sum() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("types", Tensor::from_i32(vec![1], vec![-1]));
        ctx.insert("count", Tensor::scalar_i32(100));
        let node = DagNodeDef::new("split", "SAMPLE_NODE_SPLIT")
            .with_inputs(vec!["types".into(), "count".into()])
            .with_outputs(2);
        SampleSplitOp {
            shard_num: 2,
            weights: two_shard_weights(),
            edge: false,
        }
        .compute(&node, &client_env(), &mut ctx)
        .unwrap();
        let c0 = ctx.get("split:0").unwrap().as_i32().unwrap()[0];
        let c1 = ctx.get("split:1").unwrap().as_i32().unwrap()[0];
        assert_eq!(c0 + c1, 100);
        // Weight 12 vs 9 across shards.
        assert!(c0 > c1);
    }

    #[test]
    fn test_sample_split_zero_weight_fails() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("types", Tensor::from_i32(vec![1], vec![5]));
        ctx.insert("count", Tensor::scalar_i32(10));
        let node = DagNodeDef::new("split", "SAMPLE_NODE_SPLIT")
            .with_inputs(vec!["types".into(), "count".into()])
            .with_outputs(2);
        let err = SampleSplitOp {
            shard_num: 2,
            weights: two_shard_weights(),
            edge: false,
        }
        .compute(&node, &client_env(), &mut ctx)
        .unwrap_err();
        assert!(matches!(err, EngineError::OutOfRange(_)));
    }

    #[test]
    fn test_sample_n_with_types_split() {
        let mut ctx = OpKernelContext::new();
        ctx.insert("counts", Tensor::from_i32(vec![2], vec![4, 8]));
        ctx.insert("types", Tensor::from_i32(vec![2], vec![0, 1]));
        let node = DagNodeDef::new("split", "SAMPLE_N_WITH_TYPES_SPLIT")
            .with_inputs(vec!["counts".into(), "types".into()])
            .with_outputs(4);
        SampleNWithTypesSplitOp {
            shard_num: 2,
            weights: two_shard_weights(),
        }
        .compute(&node, &client_env(), &mut ctx)
        .unwrap();
        // Type 0 lives wholly on shard 0, type 1 wholly on shard 1.
        assert_eq!(ctx.get("split:0").unwrap().as_i32().unwrap(), &[4, 0]);
        assert_eq!(ctx.get("split:2").unwrap().as_i32().unwrap(), &[0, 8]);
        assert_eq!(ctx.get("split:1").unwrap().as_i32().unwrap(), &[0, 1]);
    }

    #[test]
    fn test_plan_single_shard_routing_for_label_query() {
        let planner = Planner::new(2, two_shard_weights());
        let dag = DagDef::new(vec![DagNodeDef::new("g", "API_GET_GRAPH_BY_LABEL")
            .with_inputs(vec!["labels".into()])
            .with_outputs(2)]);
        let ctx = OpKernelContext::new();
        let plan = planner.plan(&dag, &ctx).unwrap();
        assert_eq!(plan.dag.nodes.len(), 1);
        assert_eq!(plan.dag.nodes[0].op, "REMOTE_EXECUTE");
        assert_eq!(plan.calls.len(), 1);
        assert_eq!(plan.renames.get("g:0").unwrap(), "g_s0:0");
    }

    #[test]
    fn test_plan_structure_for_get_feature() {
        let planner = Planner::new(2, two_shard_weights());
        let dag = DagDef::new(vec![DagNodeDef::new("p", "API_GET_P")
            .with_inputs(vec!["ids".into(), "fid".into()])
            .with_outputs(2)]);
        let mut ctx = OpKernelContext::new();
        ctx.insert("ids", Tensor::from_u64(vec![3], vec![2, 5, 6]));
        ctx.insert("fid", Tensor::scalar_string("sparse_f1"));
        let plan = planner.plan(&dag, &ctx).unwrap();

        // Split node, two stubs, one merge per feature.
        let ops: Vec<&str> = plan.dag.nodes.iter().map(|n| n.op.as_str()).collect();
        assert_eq!(
            ops,
            vec!["ID_SPLIT", "REMOTE_EXECUTE", "REMOTE_EXECUTE", "DATA_MERGE"]
        );
        assert_eq!(plan.calls.len(), 2);
        assert_eq!(plan.renames.get("p:0").unwrap(), "p_m0:1");
        assert_eq!(plan.renames.get("p:1").unwrap(), "p_m0:0");
        // Shard calls run the original op against the split subset.
        let call = plan.calls.get("p_s0").unwrap();
        assert_eq!(call.dag.nodes[0].op, "API_GET_P");
        assert_eq!(call.dag.nodes[0].inputs[0], "p_split:0");
    }

    #[test]
    fn test_plan_rewires_downstream_consumers() {
        let planner = Planner::new(2, two_shard_weights());
        let dag = DagDef::new(vec![
            DagNodeDef::new("n", "API_GET_NODE").with_inputs(vec!["ids".into()]),
            DagNodeDef::new("t", "API_GET_NODE_T").with_inputs(vec!["n:0".into()]),
        ]);
        let mut ctx = OpKernelContext::new();
        ctx.insert("ids", Tensor::from_u64(vec![2], vec![1, 2]));
        let plan = planner.plan(&dag, &ctx).unwrap();
        // The consumer's split must read the merged output, not n:0.
        let t_split = plan
            .dag
            .nodes
            .iter()
            .find(|n| n.name == "t_split")
            .unwrap();
        assert_eq!(t_split.inputs[0], "n_m:0");
    }

    #[test]
    fn test_plan_single_shard_passthrough() {
        let planner = Planner::new(1, Arc::new(ShardWeights::default()));
        let dag = DagDef::new(vec![
            DagNodeDef::new("n", "API_GET_NODE").with_inputs(vec!["ids".into()])
        ]);
        let ctx = OpKernelContext::new();
        let plan = planner.plan(&dag, &ctx).unwrap();
        assert_eq!(plan.dag.nodes.len(), 1);
        assert!(plan.calls.is_empty());
        assert!(plan.renames.is_empty());
    }

    #[test]
    fn test_plan_edge_feature_uses_edge_split() {
        let planner = Planner::new(2, two_shard_weights());
        let dag = DagDef::new(vec![DagNodeDef::new("p", "API_GET_P")
            .with_inputs(vec!["eids".into(), "fid".into()])
            .with_outputs(2)]);
        let mut ctx = OpKernelContext::new();
        ctx.insert(
            "eids",
            Tensor::from_u64(vec![2, 3], vec![6, 1, 1, 5, 6, 0]),
        );
        ctx.insert("fid", Tensor::scalar_string("sparse_f1"));
        let plan = planner.plan(&dag, &ctx).unwrap();
        assert_eq!(plan.dag.nodes[0].op, "EDGE_SPLIT");
    }
}
