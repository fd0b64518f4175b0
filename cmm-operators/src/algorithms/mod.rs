use cmm_core::{CmmError, Complex32, ComputeContext};
use std::future::Future;

pub mod cg;
pub mod gpu_cg;

pub use cg::ConjugateGradientMetadata;

pub struct SolveResult<M> {
    /// Solution vector.
    pub x: Vec<Complex32>,
    pub metadata: M,
}

/// A method for solving `A x = b` on a given execution device.
pub trait SolveAlgorithm<D: ComputeContext, A: ?Sized> {
    type Metadata: std::fmt::Debug;

    fn solve(
        &self,
        device: &D,
        a: &A,
        b: &[Complex32],
    ) -> impl Future<Output = Result<SolveResult<Self::Metadata>, CmmError>>;

    /// `shape` is the operator's `(rows, cols)`.
    fn validate_inputs(&self, shape: (usize, usize), b: &[Complex32]) -> Result<(), CmmError> {
        let (rows, cols) = shape;
        if rows != cols {
            return Err(CmmError::InvalidDimensions(format!(
                "Operator must be square (dims: {}x{})",
                rows, cols
            )));
        }
        if rows != b.len() {
            return Err(CmmError::InvalidDimensions(format!(
                "Operator rows ({}) must match RHS vector b length ({})",
                rows,
                b.len()
            )));
        }
        Ok(())
    }
}

/// Conjugate Gradient for Hermitian positive-definite operators.
#[derive(Debug, Clone)]
pub struct ConjugateGradient {
    /// Stop once `‖r‖ <= tolerance * ‖b‖`.
    pub tolerance: f32,
    pub max_iterations: usize,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 1000,
        }
    }
}

impl ConjugateGradient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(tolerance: f32, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }
}
