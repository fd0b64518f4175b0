use cmm_core::{CmmError, Complex32, CpuDevice, DenseView, DenseViewMut};
use log::{debug, info, warn};
use num_traits::{One, Zero};

use super::{ConjugateGradient, SolveAlgorithm, SolveResult};
use crate::operator::Operator;

#[derive(Debug, Clone, Copy)]
pub struct ConjugateGradientMetadata {
    pub iterations: usize,
    pub residual_norm: f32,
}

impl<A: Operator + ?Sized> SolveAlgorithm<CpuDevice, A> for ConjugateGradient {
    type Metadata = ConjugateGradientMetadata;

    async fn solve(
        &self,
        device: &CpuDevice,
        a: &A,
        b: &[Complex32],
    ) -> Result<SolveResult<Self::Metadata>, CmmError> {
        <Self as SolveAlgorithm<CpuDevice, A>>::validate_inputs(self, a.shape(), b)?;
        let n = b.len();

        let mut x = vec![Complex32::zero(); n];
        let b_norm = device.norm2_squared(b).sqrt();
        if b_norm == 0.0 {
            info!("CG: right-hand side is zero, returning the zero solution");
            return Ok(SolveResult {
                x,
                metadata: ConjugateGradientMetadata {
                    iterations: 0,
                    residual_norm: 0.0,
                },
            });
        }
        let threshold = self.tolerance * b_norm;

        let mut r = b.to_vec();
        let mut p = r.clone();
        let mut ap = vec![Complex32::zero(); n];
        let mut rs_old = device.norm2_squared(&r);

        for iteration in 1..=self.max_iterations {
            a.eval(
                device,
                Complex32::one(),
                DenseView::packed(&p, n, 1)?,
                Complex32::zero(),
                DenseViewMut::packed(&mut ap, n, 1)?,
                true,
            )?;

            let p_ap = device.dotc(&p, &ap)?.re;
            if p_ap <= 0.0 || !p_ap.is_finite() {
                warn!("CG: pᴴAp = {} at iteration {}", p_ap, iteration);
                return Err(CmmError::UnsupportedOperation(format!(
                    "Operator '{}' is not Hermitian positive definite (pᴴAp = {})",
                    a.name(),
                    p_ap
                )));
            }

            let step = Complex32::new(rs_old / p_ap, 0.0);
            device.axpy(step, &p, &mut x)?;
            device.axpy(-step, &ap, &mut r)?;

            let rs_new = device.norm2_squared(&r);
            let residual_norm = rs_new.sqrt();
            debug!("CG iteration {}: residual {}", iteration, residual_norm);
            if residual_norm <= threshold {
                info!(
                    "CG converged after {} iterations (residual {})",
                    iteration, residual_norm
                );
                return Ok(SolveResult {
                    x,
                    metadata: ConjugateGradientMetadata {
                        iterations: iteration,
                        residual_norm,
                    },
                });
            }

            let beta = Complex32::new(rs_new / rs_old, 0.0);
            for (p_i, r_i) in p.iter_mut().zip(&r) {
                *p_i = r_i + beta * *p_i;
            }
            rs_old = rs_new;
        }

        let residual = rs_old.sqrt();
        warn!(
            "CG did not converge after {} iterations (residual {})",
            self.max_iterations, residual
        );
        Err(CmmError::NonConvergence {
            iterations: self.max_iterations,
            residual,
        })
    }
}
