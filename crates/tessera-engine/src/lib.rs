//! # Tessera Engine
//!
//! The operator runtime: dtype-tagged tensors, the per-request operator
//! context, the kernel registry with every `API_*` and `*_MERGE`
//! kernel, the values-UDF registry, and the DAG executor that feeds
//! named tensors from kernel to kernel.

pub mod context;
pub mod dag;
pub mod executor;
pub mod kernels;
pub mod registry;
pub mod tensor;
pub mod udf;

pub use context::OpKernelContext;
pub use dag::{output_name, DagDef, DagNodeDef};
pub use executor::{execute, execute_blocking};
pub use registry::{AsyncOpKernel, Kernel, KernelEnv, KernelRegistry, OpKernel};
pub use tensor::{DataType, Tensor, TensorData, WireTensor};
pub use udf::{NodesFeature, UdfRegistry, ValuesUdf};
