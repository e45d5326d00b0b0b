//! End-to-end tests for the planner and result merger.
//!
//! Builds an in-process two-shard cluster over the six-node fixture
//! graph (shard 0 holds even ids, shard 1 odd ids), replaces the
//! remote dispatch with a kernel that runs each shard call against its
//! local engine, and checks the distributed answers against the
//! single-store ones.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tessera_distributed::planner::{Planner, ShardCall};
use tessera_distributed::types::{
    ClusterMeta, ClusterView, ShardId, ShardInfo, ShardMeta, ShardStatus, ShardWeights,
};
use tessera_engine::{
    execute, AsyncOpKernel, DagDef, DagNodeDef, KernelEnv, KernelRegistry, OpKernelContext, Tensor,
};
use tessera_graph::testing::{fixture_index_manager, fixture_shard_store, fixture_store};

/// Runs shard calls against in-process engines instead of the wire.
struct LocalExec {
    envs: Vec<KernelEnv>,
    registry: Arc<KernelRegistry>,
    calls: Arc<HashMap<String, ShardCall>>,
}

#[async_trait]
impl AsyncOpKernel for LocalExec {
    async fn compute(
        &self,
        node: &DagNodeDef,
        _env: &KernelEnv,
        ctx: &OpKernelContext,
    ) -> tessera_core::Result<Vec<(String, Tensor)>> {
        let call = self.calls.get(&node.name).expect("stub without call");
        let mut shard_ctx = OpKernelContext::new();
        for sub_node in &call.dag.nodes {
            for name in sub_node
                .inputs
                .iter()
                .chain(sub_node.udf_str_params.iter())
                .chain(sub_node.udf_num_params.iter())
            {
                if let Some(tensor) = ctx.get(name) {
                    shard_ctx.insert(name.clone(), tensor.clone());
                }
            }
        }
        execute(
            &call.dag,
            &self.registry,
            &self.envs[call.shard as usize],
            &mut shard_ctx,
        )
        .await?;
        Ok(call
            .outputs
            .iter()
            .filter_map(|name| shard_ctx.get(name).map(|t| (name.clone(), t.clone())))
            .collect())
    }
}

struct LocalCluster {
    planner: Planner,
    envs: Vec<KernelEnv>,
    client_env: KernelEnv,
    base_registry: KernelRegistry,
}

impl LocalCluster {
    fn new(shard_num: usize) -> Self {
        let mut envs = Vec::new();
        let mut shards = Vec::new();
        for s in 0..shard_num {
            let store = fixture_shard_store(s as i32, shard_num as i32);
            let (_, shard_doc) = store.register_info();
            shards.push(ShardInfo {
                id: ShardId::new(s as u32),
                address: format!("127.0.0.1:{}", 9190 + s),
                status: ShardStatus::Online,
                meta: ShardMeta::from_document(&shard_doc),
            });
            // Every shard carries the full value indexes, matching a
            // replicated index build.
            envs.push(KernelEnv::for_shard(
                Arc::new(store),
                Arc::new(fixture_index_manager()),
            ));
        }
        let view = ClusterView {
            meta: ClusterMeta {
                num_shards: shard_num as u32,
                num_partitions: shard_num as i32,
                graph_meta: String::new(),
            },
            shards,
        };
        let weights = Arc::new(ShardWeights::from_cluster(&view));
        let planner = Planner::new(shard_num, weights);
        let mut base_registry = KernelRegistry::with_builtins();
        planner.register_split_kernels(&mut base_registry);
        Self {
            planner,
            envs,
            client_env: KernelEnv::for_client(vec!["g0".into(), "g1".into()]),
            base_registry,
        }
    }

    async fn run(
        &self,
        dag: &DagDef,
        inputs: Vec<(String, Tensor)>,
        outputs: &[&str],
    ) -> HashMap<String, Tensor> {
        let mut ctx = OpKernelContext::new();
        for (name, tensor) in inputs {
            ctx.insert(name, tensor);
        }
        let plan = self.planner.plan(dag, &ctx).unwrap();
        let mut registry = self.base_registry.clone();
        registry.register_async(
            "REMOTE_EXECUTE",
            Arc::new(LocalExec {
                envs: self.envs.clone(),
                registry: Arc::new(KernelRegistry::with_builtins()),
                calls: Arc::new(plan.calls),
            }),
        );
        execute(&plan.dag, &registry, &self.client_env, &mut ctx)
            .await
            .unwrap();
        for (original, rewritten) in &plan.renames {
            ctx.add_alias(original.clone(), rewritten.clone());
        }
        outputs
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ctx.get(name)
                        .unwrap_or_else(|| panic!("missing output {}", name))
                        .clone(),
                )
            })
            .collect()
    }
}

#[tokio::test]
async fn test_sample_edge_type_restricted() {
    let cluster = LocalCluster::new(2);
    let dag = DagDef::new(vec![DagNodeDef::new("eid", "API_SAMPLE_EDGE")
        .with_inputs(vec!["edge_type".into(), "count".into()])]);
    let results = cluster
        .run(
            &dag,
            vec![
                ("edge_type".into(), Tensor::from_i32(vec![1], vec![1])),
                ("count".into(), Tensor::scalar_i32(10)),
            ],
            &["eid:0"],
        )
        .await;
    let rows = &results["eid:0"];
    assert_eq!(rows.num_elements(), 30);
    for row in rows.as_u64().unwrap().chunks_exact(3) {
        assert_eq!(row[2], 1);
    }
}

#[tokio::test]
async fn test_sample_node_global_distribution() {
    let cluster = LocalCluster::new(2);
    let dag = DagDef::new(vec![DagNodeDef::new("node_id", "API_SAMPLE_NODE")
        .with_inputs(vec!["node_type".into(), "count".into()])]);
    let results = cluster
        .run(
            &dag,
            vec![
                ("node_type".into(), Tensor::from_i32(vec![1], vec![0])),
                ("count".into(), Tensor::scalar_i32(100_000)),
            ],
            &["node_id:0"],
        )
        .await;
    let ids = results["node_id:0"].as_u64().unwrap();
    assert_eq!(ids.len(), 100_000);
    let mut counts = [0u32; 7];
    for &id in ids {
        counts[id as usize] += 1;
    }
    let r42 = counts[4] as f64 / counts[2] as f64;
    let r62 = counts[6] as f64 / counts[2] as f64;
    assert!((1.9..2.1).contains(&r42), "ratio {}", r42);
    assert!((2.9..3.1).contains(&r62), "ratio {}", r62);
}

#[tokio::test]
async fn test_neighbor_filter_order_limit() {
    let cluster = LocalCluster::new(2);
    let mut nb = DagNodeDef::new("nb", "API_GET_NB_NODE")
        .with_inputs(vec!["nodes".into(), "edge_types".into()])
        .with_outputs(4);
    nb.dnf = vec!["price gt 2".into()];
    nb.post_process = vec!["order_by id asc".into(), "limit 2".into()];
    let dag = DagDef::new(vec![nb]);
    let results = cluster
        .run(
            &dag,
            vec![
                ("nodes".into(), Tensor::from_u64(vec![3], vec![2, 5, 6])),
                ("edge_types".into(), Tensor::from_i32(vec![2], vec![0, 1])),
            ],
            &["nb:0", "nb:1", "nb:3"],
        )
        .await;
    let idx = results["nb:0"].as_i32().unwrap().to_vec();
    let ids = results["nb:1"].as_u64().unwrap().to_vec();
    let row = |i: usize| &ids[idx[2 * i] as usize..idx[2 * i + 1] as usize];
    assert_eq!(row(0), &[3, 5]);
    assert_eq!(row(1), &[2, 6]);
    assert_eq!(row(2), &[3, 5]);
}

#[tokio::test]
async fn test_edge_feature_values() {
    let cluster = LocalCluster::new(2);
    let dag = DagDef::new(vec![DagNodeDef::new("e_feature", "API_GET_P")
        .with_inputs(vec!["edges".into(), "fid".into()])
        .with_outputs(2)]);
    let results = cluster
        .run(
            &dag,
            vec![
                (
                    "edges".into(),
                    Tensor::from_u64(vec![3, 3], vec![6, 1, 1, 5, 6, 0, 4, 5, 1]),
                ),
                ("fid".into(), Tensor::scalar_string("sparse_f1")),
            ],
            &["e_feature:0", "e_feature:1"],
        )
        .await;
    assert_eq!(
        results["e_feature:1"].as_u64().unwrap(),
        &[611, 612, 561, 562, 451, 452]
    );
    assert_eq!(
        results["e_feature:0"].as_i32().unwrap(),
        &[0, 2, 2, 4, 4, 6]
    );
}

#[tokio::test]
async fn test_sample_n_with_types_segments() {
    let cluster = LocalCluster::new(2);
    let dag = DagDef::new(vec![DagNodeDef::new("n", "API_SAMPLE_N_WITH_TYPES")
        .with_inputs(vec!["types".into(), "counts".into()])
        .with_outputs(2)]);
    let results = cluster
        .run(
            &dag,
            vec![
                ("types".into(), Tensor::from_i32(vec![2], vec![0, 1])),
                ("counts".into(), Tensor::from_i32(vec![2], vec![4, 8])),
            ],
            &["n:0", "n:1"],
        )
        .await;
    assert_eq!(results["n:0"].as_i32().unwrap(), &[0, 4, 4, 12]);
    let ids = results["n:1"].as_u64().unwrap();
    assert!(ids[..4].iter().all(|id| [2, 4, 6].contains(id)));
    assert!(ids[4..].iter().all(|id| [1, 3, 5].contains(id)));
}

#[tokio::test]
async fn test_layerwise_sampling() {
    let cluster = LocalCluster::new(2);
    let nb = DagNodeDef::new("nb", "API_GET_NB_NODE")
        .with_inputs(vec!["nodes".into(), "edge_types".into()])
        .with_outputs(4);
    let layer = DagNodeDef::new("layer", "API_LOCAL_SAMPLE_L")
        .with_inputs(vec![
            "nb:0".into(),
            "nb:1".into(),
            "nb:2".into(),
            "nb:3".into(),
            "n".into(),
            "m".into(),
            "sqrt".into(),
            "0".into(),
        ])
        .with_outputs(3);
    let dag = DagDef::new(vec![nb, layer]);
    let results = cluster
        .run(
            &dag,
            vec![
                ("nodes".into(), Tensor::from_u64(vec![3], vec![1, 2, 3])),
                ("edge_types".into(), Tensor::from_i32(vec![2], vec![0, 1])),
                ("n".into(), Tensor::scalar_i32(3)),
                ("m".into(), Tensor::scalar_i32(10)),
            ],
            &["layer:0"],
        )
        .await;
    let ids = results["layer:0"].as_u64().unwrap();
    assert_eq!(ids.len(), 10);
    // The union of 1..3's neighbor sets.
    assert!(ids.iter().all(|id| [2, 3, 4, 5].contains(id)));
}

#[tokio::test]
async fn test_merge_law_node_types() {
    // Merge(shard_run(R, split(input))) == R(input) for GET_NODE_T.
    let cluster = LocalCluster::new(2);
    let ids: Vec<u64> = vec![1, 2, 3, 4, 5, 6];
    let dag = DagDef::new(vec![DagNodeDef::new("t", "API_GET_NODE_T")
        .with_inputs(vec!["ids".into()])]);
    let results = cluster
        .run(
            &dag,
            vec![("ids".into(), Tensor::from_u64(vec![6], ids.clone()))],
            &["t:0"],
        )
        .await;
    let local = fixture_store().node_types(&ids);
    assert_eq!(results["t:0"].as_i32().unwrap(), &local[..]);
}

#[tokio::test]
async fn test_merge_law_node_features() {
    let cluster = LocalCluster::new(2);
    let dag = DagDef::new(vec![DagNodeDef::new("p", "API_GET_P")
        .with_inputs(vec!["ids".into(), "fid".into()])
        .with_outputs(2)]);
    let results = cluster
        .run(
            &dag,
            vec![
                ("ids".into(), Tensor::from_u64(vec![4], vec![5, 2, 3, 6])),
                ("fid".into(), Tensor::scalar_string("sparse_f1")),
            ],
            &["p:0", "p:1"],
        )
        .await;
    // Row order matches the caller's id order after the merge.
    assert_eq!(
        results["p:1"].as_u64().unwrap(),
        &[51, 52, 21, 22, 31, 32, 61, 62]
    );
    assert_eq!(
        results["p:0"].as_i32().unwrap(),
        &[0, 2, 2, 4, 4, 6, 6, 8]
    );
}

#[tokio::test]
async fn test_foreign_id_yields_empty_row() {
    let cluster = LocalCluster::new(2);
    let dag = DagDef::new(vec![DagNodeDef::new("p", "API_GET_P")
        .with_inputs(vec!["ids".into(), "fid".into()])
        .with_outputs(2)]);
    let results = cluster
        .run(
            &dag,
            vec![
                ("ids".into(), Tensor::from_u64(vec![3], vec![2, 42, 3])),
                ("fid".into(), Tensor::scalar_string("sparse_f1")),
            ],
            &["p:0", "p:1"],
        )
        .await;
    assert_eq!(
        results["p:0"].as_i32().unwrap(),
        &[0, 2, 2, 2, 2, 4]
    );
    assert_eq!(results["p:1"].as_u64().unwrap(), &[21, 22, 31, 32]);
}

#[tokio::test]
async fn test_sample_neighbor_distributed() {
    let cluster = LocalCluster::new(2);
    let nb = DagNodeDef::new("nb", "API_SAMPLE_NB")
        .with_inputs(vec![
            "nodes".into(),
            "edge_types".into(),
            "count".into(),
            "0".into(),
        ])
        .with_outputs(4);
    let dag = DagDef::new(vec![nb]);
    let results = cluster
        .run(
            &dag,
            vec![
                ("nodes".into(), Tensor::from_u64(vec![3], vec![2, 4, 6])),
                ("edge_types".into(), Tensor::from_i32(vec![2], vec![0, 1])),
                ("count".into(), Tensor::scalar_i32(3)),
            ],
            &["nb:0", "nb:1"],
        )
        .await;
    let idx = results["nb:0"].as_i32().unwrap().to_vec();
    let ids = results["nb:1"].as_u64().unwrap().to_vec();
    let sets: [&[u64]; 3] = [&[3, 5], &[5], &[1, 3, 5]];
    for (i, set) in sets.iter().enumerate() {
        let row = &ids[idx[2 * i] as usize..idx[2 * i + 1] as usize];
        assert_eq!(row.len(), 3);
        assert!(row.iter().all(|id| set.contains(id)));
    }
}

#[tokio::test]
async fn test_get_node_ordered_limit_across_shards() {
    let cluster = LocalCluster::new(2);
    let mut get = DagNodeDef::new("n", "API_GET_NODE").with_inputs(vec!["ids".into()]);
    get.post_process = vec!["order_by id desc".into(), "limit 3".into()];
    let dag = DagDef::new(vec![get]);
    let results = cluster
        .run(
            &dag,
            vec![(
                "ids".into(),
                Tensor::from_u64(vec![6], vec![4, 1, 6, 3, 2, 5]),
            )],
            &["n:0"],
        )
        .await;
    // Post processing re-applies after the cross-shard merge.
    assert_eq!(results["n:0"].as_u64().unwrap(), &[6, 5, 4]);
}

#[tokio::test]
async fn test_graph_by_label_single_shard_routing() {
    // Value indexes are replicated, so the planner routes label
    // queries to one shard and takes its answer verbatim.
    let cluster = LocalCluster::new(2);
    let dag = DagDef::new(vec![DagNodeDef::new("g", "API_GET_GRAPH_BY_LABEL")
        .with_inputs(vec!["labels".into()])
        .with_outputs(2)]);
    let results = cluster
        .run(
            &dag,
            vec![(
                "labels".into(),
                Tensor::from_strings(vec![2], vec!["g0".into(), "g1".into()]),
            )],
            &["g:0", "g:1"],
        )
        .await;
    let idx = results["g:0"].as_i32().unwrap().to_vec();
    let ids = results["g:1"].as_u64().unwrap().to_vec();
    assert_eq!(idx, vec![0, 3, 3, 6]);
    assert_eq!(&ids[..3], &[2, 4, 6]);
    assert_eq!(&ids[3..], &[1, 3, 5]);
}
