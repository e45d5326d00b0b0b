//! DAG executor.
//!
//! Runs a plan against a context. Ordering is inferred from tensor
//! names: a node is ready once every `"<producer>:<k>"` input it
//! consumes exists in the context (inputs without a `:` are request
//! inputs or literals and never block). Sync kernels run inline; all
//! ready async kernels of a round run concurrently and their outputs
//! are bound when the round's gather completes. The first kernel
//! failure aborts the request.

use futures::future::join_all;
use tessera_core::{EngineError, Result};
use tracing::{debug, error};

use crate::context::OpKernelContext;
use crate::dag::DagDef;
use crate::registry::{Kernel, KernelEnv, KernelRegistry};

/// Execute `dag` to completion against `ctx`.
pub async fn execute(
    dag: &DagDef,
    registry: &KernelRegistry,
    env: &KernelEnv,
    ctx: &mut OpKernelContext,
) -> Result<()> {
    let mut done = vec![false; dag.nodes.len()];
    let mut remaining = dag.nodes.len();

    while remaining > 0 {
        let ready: Vec<usize> = (0..dag.nodes.len())
            .filter(|&i| !done[i] && inputs_ready(dag, i, ctx))
            .collect();
        if ready.is_empty() {
            return Err(EngineError::internal(
                "query plan has a cycle or an unbound input",
            ));
        }

        let mut async_round = Vec::new();
        for i in ready {
            let node = &dag.nodes[i];
            let kernel = registry.get(&node.op).ok_or_else(|| {
                EngineError::invalid_argument(format!("unknown op: {}", node.op))
            })?;
            match kernel {
                Kernel::Sync(kernel) => {
                    debug!(node = %node.name, op = %node.op, "running kernel");
                    kernel.compute(node, env, ctx).map_err(|e| {
                        error!(node = %node.name, op = %node.op, "kernel failed: {}", e);
                        e
                    })?;
                    done[i] = true;
                    remaining -= 1;
                }
                Kernel::Async(kernel) => {
                    async_round.push((i, node, kernel.clone()));
                }
            }
        }

        if !async_round.is_empty() {
            // Gather barrier: every ready async kernel of this round
            // completes before their outputs become visible.
            let ctx_ref: &OpKernelContext = &*ctx;
            let futures: Vec<_> = async_round
                .iter()
                .map(|(_, node, kernel)| async move {
                    debug!(node = %node.name, op = %node.op, "running async kernel");
                    kernel.compute(node, env, ctx_ref).await
                })
                .collect();
            let results = join_all(futures).await;
            for ((i, node, _), result) in async_round.iter().zip(results) {
                let outputs = result.map_err(|e| {
                    error!(node = %node.name, op = %node.op, "async kernel failed: {}", e);
                    e
                })?;
                for (name, tensor) in outputs {
                    ctx.insert(name, tensor);
                }
                done[*i] = true;
                remaining -= 1;
            }
        }
    }
    Ok(())
}

/// Blocking wrapper for synchronous call sites and tests.
pub fn execute_blocking(
    dag: &DagDef,
    registry: &KernelRegistry,
    env: &KernelEnv,
    ctx: &mut OpKernelContext,
) -> Result<()> {
    futures::executor::block_on(execute(dag, registry, env, ctx))
}

fn inputs_ready(dag: &DagDef, i: usize, ctx: &OpKernelContext) -> bool {
    dag.nodes[i]
        .inputs
        .iter()
        .chain(dag.nodes[i].udf_str_params.iter())
        .chain(dag.nodes[i].udf_num_params.iter())
        .all(|input| !input.contains(':') || ctx.contains(input))
}
