//! Numeric kernels shared by every layer.

pub mod blas;
pub mod gemm;

pub use blas::*;
pub use gemm::gemm;
