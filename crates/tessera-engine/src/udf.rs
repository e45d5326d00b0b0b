//! Values-UDF registry.
//!
//! A values UDF transforms the features selected by `API_GET_P` before
//! they are written to the context. UDFs are registered by name at
//! startup and never mutated while serving.

use std::collections::HashMap;

use tessera_core::{EngineError, Result};

use crate::tensor::Tensor;

/// One feature over a batch of nodes or edges: per row, the feature's
/// values.
#[derive(Debug, Clone, PartialEq)]
pub enum NodesFeature {
    Sparse(Vec<Vec<u64>>),
    Dense(Vec<Vec<f32>>),
    Binary(Vec<Vec<u8>>),
}

impl NodesFeature {
    pub fn row_count(&self) -> usize {
        match self {
            NodesFeature::Sparse(rows) => rows.len(),
            NodesFeature::Dense(rows) => rows.len(),
            NodesFeature::Binary(rows) => rows.len(),
        }
    }
}

/// A transformation over selected feature values.
pub trait ValuesUdf: Send + Sync {
    /// Transform one batch of features. `udf_params` carries the
    /// numeric parameter tensors declared on the DAG node.
    fn process(
        &self,
        udf_fids: &[String],
        udf_params: &[Tensor],
        features: Vec<NodesFeature>,
    ) -> Result<Vec<NodesFeature>>;
}

/// Name → UDF registry, populated once at startup.
#[derive(Default)]
pub struct UdfRegistry {
    udfs: HashMap<String, Box<dyn ValuesUdf>>,
}

impl UdfRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in reducers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("udf_min", Box::new(MinUdf));
        registry.register("udf_max", Box::new(MaxUdf));
        registry.register("udf_mean", Box::new(MeanUdf));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, udf: Box<dyn ValuesUdf>) {
        self.udfs.insert(name.into(), udf);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ValuesUdf> {
        self.udfs.get(name).map(|b| b.as_ref())
    }
}

/// Reduce each dense feature row with `f`; empty rows stay empty.
fn reduce_dense<F: Fn(&[f32]) -> f32>(
    features: Vec<NodesFeature>,
    f: F,
) -> Result<Vec<NodesFeature>> {
    let mut out = Vec::with_capacity(features.len());
    for feature in features {
        let rows = match feature {
            NodesFeature::Dense(rows) => rows,
            _ => {
                return Err(EngineError::invalid_argument(
                    "values UDFs support dense features only",
                ))
            }
        };
        let reduced = rows
            .into_iter()
            .map(|row| if row.is_empty() { row } else { vec![f(&row)] })
            .collect();
        out.push(NodesFeature::Dense(reduced));
    }
    Ok(out)
}

struct MinUdf;

impl ValuesUdf for MinUdf {
    fn process(
        &self,
        _udf_fids: &[String],
        _udf_params: &[Tensor],
        features: Vec<NodesFeature>,
    ) -> Result<Vec<NodesFeature>> {
        reduce_dense(features, |row| {
            row.iter().copied().fold(f32::INFINITY, f32::min)
        })
    }
}

struct MaxUdf;

impl ValuesUdf for MaxUdf {
    fn process(
        &self,
        _udf_fids: &[String],
        _udf_params: &[Tensor],
        features: Vec<NodesFeature>,
    ) -> Result<Vec<NodesFeature>> {
        reduce_dense(features, |row| {
            row.iter().copied().fold(f32::NEG_INFINITY, f32::max)
        })
    }
}

struct MeanUdf;

impl ValuesUdf for MeanUdf {
    fn process(
        &self,
        _udf_fids: &[String],
        _udf_params: &[Tensor],
        features: Vec<NodesFeature>,
    ) -> Result<Vec<NodesFeature>> {
        reduce_dense(features, |row| {
            row.iter().map(|&v| v as f64).sum::<f64>() as f32 / row.len() as f32
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(rows: Vec<Vec<f32>>) -> Vec<NodesFeature> {
        vec![NodesFeature::Dense(rows)]
    }

    #[test]
    fn test_mean() {
        let registry = UdfRegistry::with_builtins();
        let udf = registry.get("udf_mean").unwrap();
        let out = udf
            .process(&[], &[], dense(vec![vec![1.0, 2.0, 3.0], vec![], vec![5.0]]))
            .unwrap();
        assert_eq!(
            out,
            dense(vec![vec![2.0], vec![], vec![5.0]])
        );
    }

    #[test]
    fn test_min_max() {
        let registry = UdfRegistry::with_builtins();
        let rows = vec![vec![3.0, 1.0, 2.0]];
        let min = registry
            .get("udf_min")
            .unwrap()
            .process(&[], &[], dense(rows.clone()))
            .unwrap();
        assert_eq!(min, dense(vec![vec![1.0]]));
        let max = registry
            .get("udf_max")
            .unwrap()
            .process(&[], &[], dense(rows))
            .unwrap();
        assert_eq!(max, dense(vec![vec![3.0]]));
    }

    #[test]
    fn test_non_dense_rejected() {
        let registry = UdfRegistry::with_builtins();
        let err = registry
            .get("udf_mean")
            .unwrap()
            .process(&[], &[], vec![NodesFeature::Sparse(vec![vec![1]])])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn test_unknown_udf() {
        let registry = UdfRegistry::with_builtins();
        assert!(registry.get("udf_median").is_none());
    }
}
