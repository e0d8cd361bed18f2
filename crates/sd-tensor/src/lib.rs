//! `sd-tensor` - Tensor library with pluggable compute backends for sequence decoding.
//!
//! This crate provides:
//! - A `Tensor` type backed by CPU storage (`f32`, `f16` or `u32` elements)
//! - Row-level operations used to move between batch and batch x beam layouts
//! - A `ComputeBackend` trait for the numeric kernels decoding needs
//! - A reference `CpuBackend` implementation
//! - Shape utilities and data type definitions

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
