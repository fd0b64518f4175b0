//! `cmm-operators`: composable complex linear operators on top of `cmm-core`.
//!
//! Operator trees mix CSR, DIA, dense and ones-matrix leaves with adjoint,
//! product, Kronecker-identity, block-diagonal and stacking nodes. Trees are
//! evaluated with the CPU kernels. CSR and DIA leaves uploaded to a GPU device
//! implement [`GpuOperator`]. Both kinds can be solved with Conjugate Gradient.

pub mod algorithms;
pub mod gpu_operator;
pub mod operator;
pub mod profile;
pub mod util;

pub use cmm_core::{
    complex_scalar, CmmError, Complex32, CpuDevice, CsrMatrix, DenseMatrix, DenseView,
    DenseViewMut, DiaMatrix, GpuCsrMatrix, GpuDenseMatrix, GpuDevice, GpuDeviceOptions,
    GpuDiaMatrix, Matrix, Triplet,
};
pub use gpu_operator::GpuOperator;
pub use operator::{
    adjoint, memusage, Adjoint, BlockDiag, DenseOperator, DiaOperator, HStack, KronI, Memusage,
    OneMatrix, Operator, OperatorRef, Product, SpMatrix, VStack,
};
