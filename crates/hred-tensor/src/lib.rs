//! `hred-tensor` - Tensor compute engine for the HRED dialogue model.
//!
//! This crate provides:
//! - A `Tensor` type backed by CPU storage
//! - A `ComputeBackend` trait for pluggable kernels, with a reference `CpuBackend`
//! - A tape-based `Graph` that records operations and computes gradients
//! - A `ParamStore` of named, shareable model parameters
//! - Shape utilities and data type definitions (F32, F16)

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod param;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use graph::{Gradients, Graph, Var};
pub use param::{Init, ParamId, ParamStore};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
