//! Operator kernels.
//!
//! One module per kernel family, mirroring the op names they register
//! under. All kernels validate their inputs, allocate outputs under
//! `"<node>:<k>"` and answer recoverable problems with empty outputs.

pub mod common;

mod data_merge;
mod get_edge;
mod get_edge_sum_weight;
mod get_feature;
mod get_nb_filter;
mod get_neighbor;
mod get_node;
mod get_node_type;
mod graph_label;
mod local_sample_layer;
mod regular_data_merge;
mod sample_edge;
mod sample_layer;
mod sample_n_with_types;
mod sample_neighbor;
mod sample_node;
mod sample_root;
mod sparse_adj;

use std::sync::Arc;

use crate::registry::KernelRegistry;

/// Register every built-in kernel.
pub fn register_builtins(registry: &mut KernelRegistry) {
    registry.register_sync("API_SAMPLE_NODE", Arc::new(sample_node::SampleNodeOp));
    registry.register_sync("API_SAMPLE_EDGE", Arc::new(sample_edge::SampleEdgeOp));
    registry.register_sync("API_GET_NODE", Arc::new(get_node::GetNodeOp));
    registry.register_sync("API_GET_EDGE", Arc::new(get_edge::GetEdgeOp));
    registry.register_sync("API_GET_NODE_T", Arc::new(get_node_type::GetNodeTypeOp));
    registry.register_sync("API_GET_P", Arc::new(get_feature::GetFeatureOp));
    registry.register_sync("API_GET_NB_NODE", Arc::new(get_neighbor::GetNeighborOp));
    registry.register_sync(
        "API_GET_NB_EDGE",
        Arc::new(get_neighbor::GetNeighborEdgeOp),
    );
    registry.register_sync("API_GET_NB_FILTER", Arc::new(get_nb_filter::GetNbFilterOp));
    registry.register_sync("API_SAMPLE_NB", Arc::new(sample_neighbor::SampleNeighborOp));
    registry.register_sync(
        "API_SAMPLE_N_WITH_TYPES",
        Arc::new(sample_n_with_types::SampleNWithTypesOp),
    );
    registry.register_sync(
        "API_GET_EDGE_SUM_WEIGHT",
        Arc::new(get_edge_sum_weight::GetEdgeSumWeightOp),
    );
    registry.register_sync("API_SAMPLE_L", Arc::new(sample_layer::SampleLayerOp));
    registry.register_sync(
        "API_LOCAL_SAMPLE_L",
        Arc::new(local_sample_layer::LocalSampleLayerOp),
    );
    registry.register_sync("API_SAMPLE_ROOT", Arc::new(sample_root::SampleRootOp));
    registry.register_sync("API_SPARSE_GEN_ADJ", Arc::new(sparse_adj::SparseGenAdjOp));
    registry.register_sync("API_SPARSE_GET_ADJ", Arc::new(sparse_adj::SparseGetAdjOp));
    registry.register_sync(
        "API_SAMPLE_GRAPH_LABEL",
        Arc::new(graph_label::SampleGraphLabelOp),
    );
    registry.register_sync(
        "API_GET_GRAPH_BY_LABEL",
        Arc::new(graph_label::GetGraphByLabelOp),
    );
    registry.register_sync("DATA_MERGE", Arc::new(data_merge::DataMergeOp::plain()));
    registry.register_sync("GP_DATA_MERGE", Arc::new(data_merge::DataMergeOp::gp()));
    registry.register_sync(
        "DATA_ROW_APPEND_MERGE",
        Arc::new(data_merge::DataRowAppendMergeOp),
    );
    registry.register_sync(
        "REGULAR_DATA_MERGE",
        Arc::new(regular_data_merge::RegularDataMergeOp),
    );
    registry.register_sync(
        "GP_REGULAR_DATA_MERGE",
        Arc::new(regular_data_merge::RegularDataMergeOp),
    );
}
