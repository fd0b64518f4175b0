//! Leaves whose products run entirely on a [`GpuDevice`].
//!
//! Operands stay in device memory between calls, so an iterative solver only
//! moves the right-hand side up and the solution down.

use cmm_core::{CmmError, Complex32, GpuCsrMatrix, GpuDenseMatrix, GpuDevice, GpuDiaMatrix, Matrix};
use std::future::Future;

use crate::profile::Profile;

/// `Y := alpha * op(A) * X + beta * Y` with `op` the identity or the adjoint.
pub trait GpuOperator {
    fn shape(&self) -> (usize, usize);

    fn eval(
        &self,
        device: &GpuDevice,
        alpha: Complex32,
        x: &GpuDenseMatrix,
        beta: Complex32,
        y: &mut GpuDenseMatrix,
        forward: bool,
    ) -> impl Future<Output = Result<(), CmmError>>;
}

impl GpuOperator for GpuCsrMatrix {
    fn shape(&self) -> (usize, usize) {
        self.dims()
    }

    /// The adjoint product needs the adjoint uploaded with the matrix.
    async fn eval(
        &self,
        device: &GpuDevice,
        alpha: Complex32,
        x: &GpuDenseMatrix,
        beta: Complex32,
        y: &mut GpuDenseMatrix,
        forward: bool,
    ) -> Result<(), CmmError> {
        let _profile = Profile::new("csrmm")
            .field("device", "gpu")
            .field("forward", forward);
        if forward {
            device.exw_csrmm(alpha, self, x, beta, y).await
        } else {
            device.csrmm(alpha, self, x, beta, y, true).await
        }
    }
}

impl GpuOperator for GpuDiaMatrix {
    fn shape(&self) -> (usize, usize) {
        self.dims()
    }

    async fn eval(
        &self,
        device: &GpuDevice,
        alpha: Complex32,
        x: &GpuDenseMatrix,
        beta: Complex32,
        y: &mut GpuDenseMatrix,
        forward: bool,
    ) -> Result<(), CmmError> {
        let _profile = Profile::new("diamm")
            .field("device", "gpu")
            .field("forward", forward);
        device.diamm(alpha, self, x, beta, y, !forward).await
    }
}
