//! RPC layer tests over tarpc's in-process channel transport.

use std::sync::Arc;

use futures::StreamExt;
use tarpc::client::Config;
use tarpc::context;
use tarpc::server::{BaseChannel, Channel};
use tessera_distributed::rpc::protocol::{GraphService, GraphServiceClient};
use tessera_distributed::rpc::server::GraphServer;
use tessera_engine::{DagDef, DagNodeDef, KernelEnv, Tensor};
use tessera_graph::testing::{fixture_index_manager, fixture_store};

fn spawn_graph_server() -> GraphServiceClient {
    let env = KernelEnv::for_shard(
        Arc::new(fixture_store()),
        Arc::new(fixture_index_manager()),
    );
    let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
    let server = BaseChannel::with_defaults(server_transport);
    tokio::spawn(
        server
            .execute(GraphServer::new(env).serve())
            .for_each(|f| async {
                tokio::spawn(f);
            }),
    );
    GraphServiceClient::new(Config::default(), client_transport).spawn()
}

#[tokio::test]
async fn test_ping() {
    let client = spawn_graph_server();
    let pong = client.ping(context::current()).await.unwrap();
    assert_eq!(pong, "pong");
}

#[tokio::test]
async fn test_execute_round_trip() {
    let client = spawn_graph_server();
    let dag = DagDef::new(vec![DagNodeDef::new("t", "API_GET_NODE_T")
        .with_inputs(vec!["ids".into()])]);
    let inputs = vec![Tensor::from_u64(vec![3], vec![1, 2, 9]).to_wire("ids")];
    let outputs = client
        .execute(context::current(), dag, inputs, vec!["t:0".into()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outputs.len(), 1);
    let tensor = Tensor::from_wire(&outputs[0]).unwrap();
    assert_eq!(tensor.as_i32().unwrap(), &[1, 0, -1]);
}

#[tokio::test]
async fn test_execute_missing_output_is_error() {
    let client = spawn_graph_server();
    let dag = DagDef::new(vec![DagNodeDef::new("t", "API_GET_NODE_T")
        .with_inputs(vec!["ids".into()])]);
    let inputs = vec![Tensor::from_u64(vec![1], vec![1]).to_wire("ids")];
    let result = client
        .execute(context::current(), dag, inputs, vec!["ghost:0".into()])
        .await
        .unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_legacy_sample_and_neighbors() {
    let client = spawn_graph_server();

    let edges = client
        .sample_edge(context::current(), vec![1], 10)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(edges.len(), 10);
    assert!(edges.iter().all(|e| e.2 == 1));

    let neighbors = client
        .get_sorted_neighbor(context::current(), vec![6], vec![0, 1])
        .await
        .unwrap()
        .unwrap();
    let ids: Vec<u64> = neighbors[0].iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 3, 5]);

    let top = client
        .get_top_k_neighbor(context::current(), vec![1], vec![0, 1], 2)
        .await
        .unwrap()
        .unwrap();
    let ids: Vec<u64> = top[0].iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![4, 3]);
}

#[tokio::test]
async fn test_legacy_feature_getters() {
    let client = spawn_graph_server();
    let values = client
        .get_node_uint64_feature(context::current(), vec![2, 42], vec![0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(values[0][0], vec![21, 22]);
    assert!(values[1][0].is_empty());

    let edge_values = client
        .get_edge_uint64_feature(context::current(), vec![(6, 1, 1)], vec![0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(edge_values[0][0], vec![611, 612]);
}
