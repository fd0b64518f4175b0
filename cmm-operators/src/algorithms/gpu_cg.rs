use cmm_core::{CmmError, Complex32, DenseMatrix, GpuDevice};
use log::{debug, info, warn};
use num_traits::{One, Zero};

use super::{ConjugateGradient, ConjugateGradientMetadata, SolveAlgorithm, SolveResult};
use crate::gpu_operator::GpuOperator;

/// The iterate, residual and search direction stay on the device. Only the
/// scalars of each step are read back.
impl<A: GpuOperator + ?Sized> SolveAlgorithm<GpuDevice, A> for ConjugateGradient {
    type Metadata = ConjugateGradientMetadata;

    async fn solve(
        &self,
        device: &GpuDevice,
        a: &A,
        b: &[Complex32],
    ) -> Result<SolveResult<Self::Metadata>, CmmError> {
        <Self as SolveAlgorithm<GpuDevice, A>>::validate_inputs(self, a.shape(), b)?;
        let n = b.len();

        let rhs = DenseMatrix::from_column_major(n, 1, n, b.to_vec())?;
        let mut r = device.create_dense_matrix("CG r", &rhs)?;
        let mut rs_old = device.norm2_squared(&r).await?;
        let b_norm = rs_old.sqrt();
        info!("GPU CG: initial residual norm {}", b_norm);
        if b_norm == 0.0 {
            info!("GPU CG: right-hand side is zero, returning the zero solution");
            return Ok(SolveResult {
                x: vec![Complex32::zero(); n],
                metadata: ConjugateGradientMetadata {
                    iterations: 0,
                    residual_norm: 0.0,
                },
            });
        }
        let threshold = self.tolerance * b_norm;

        let mut p = device.create_dense_matrix("CG p", &rhs)?;
        let mut x = device.create_zeroed_dense_matrix("CG x", n, 1)?;
        let mut ap = device.create_zeroed_dense_matrix("CG Ap", n, 1)?;

        for iteration in 1..=self.max_iterations {
            a.eval(device, Complex32::one(), &p, Complex32::zero(), &mut ap, true)
                .await?;

            let p_ap = device.dotc(&p, &ap).await?.re;
            if p_ap <= 0.0 || !p_ap.is_finite() {
                warn!("GPU CG: pᴴAp = {} at iteration {}", p_ap, iteration);
                return Err(CmmError::UnsupportedOperation(format!(
                    "Operator is not Hermitian positive definite (pᴴAp = {})",
                    p_ap
                )));
            }

            let step = Complex32::new(rs_old / p_ap, 0.0);
            device.axpy(step, &p, &mut x).await?;
            device.axpy(-step, &ap, &mut r).await?;

            let rs_new = device.norm2_squared(&r).await?;
            let residual_norm = rs_new.sqrt();
            debug!("GPU CG iteration {}: residual {}", iteration, residual_norm);
            if residual_norm <= threshold {
                info!(
                    "GPU CG converged after {} iterations (residual {})",
                    iteration, residual_norm
                );
                return Ok(SolveResult {
                    x: x.read_contents().await?,
                    metadata: ConjugateGradientMetadata {
                        iterations: iteration,
                        residual_norm,
                    },
                });
            }

            // p := r + beta * p
            let beta = Complex32::new(rs_new / rs_old, 0.0);
            device.axpby(Complex32::one(), &r, beta, &mut p).await?;
            rs_old = rs_new;
        }

        let residual = rs_old.sqrt();
        warn!(
            "GPU CG did not converge after {} iterations (residual {})",
            self.max_iterations, residual
        );
        Err(CmmError::NonConvergence {
            iterations: self.max_iterations,
            residual,
        })
    }
}
