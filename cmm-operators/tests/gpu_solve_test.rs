use cmm_operators::algorithms::{ConjugateGradient, SolveAlgorithm};
use cmm_operators::{
    CmmError, Complex32, CpuDevice, CsrMatrix, DenseMatrix, DiaMatrix, DiaOperator, GpuDevice,
    GpuDeviceOptions, GpuOperator, SpMatrix,
};
use pollster::block_on;

fn c(re: f32, im: f32) -> Complex32 {
    Complex32::new(re, im)
}

/// Tries the default adapter, then a software fallback adapter. With neither,
/// the test is reported as skipped, or fails when `CMM_REQUIRE_GPU` is set.
async fn gpu_or_skip(test: &str) -> Option<GpuDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    let hardware_err = match GpuDevice::new().await {
        Ok(device) => return Some(device),
        Err(e) => e,
    };
    let fallback = GpuDeviceOptions {
        force_fallback_adapter: true,
        ..Default::default()
    };
    match GpuDevice::with_options(fallback).await {
        Ok(device) => Some(device),
        Err(fallback_err) => {
            if std::env::var_os("CMM_REQUIRE_GPU").is_some() {
                panic!(
                    "{}: no GPU adapter ({}; fallback: {})",
                    test, hardware_err, fallback_err
                );
            }
            eprintln!(
                "SKIPPED {}: no GPU adapter ({}; fallback: {})",
                test, hardware_err, fallback_err
            );
            None
        }
    }
}

fn assert_close_vec(actual: &[Complex32], expected: &[Complex32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "Vector lengths differ");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).norm() <= tolerance,
            "Verification failed at index {}: expected {}, got {}",
            i,
            e,
            a
        );
    }
}

/// Diagonally dominant Hermitian pentadiagonal matrix.
fn hermitian_pentadiagonal(n: usize) -> DenseMatrix {
    DenseMatrix::from_fn(n, n, |r, col| {
        if r == col {
            c(6.0, 0.0)
        } else if col == r + 1 {
            c(-1.0, 0.5)
        } else if r == col + 1 {
            c(-1.0, -0.5)
        } else if col == r + 2 {
            c(-0.5, 0.25)
        } else if r == col + 2 {
            c(-0.5, -0.25)
        } else {
            c(0.0, 0.0)
        }
    })
}

fn rhs(n: usize) -> Vec<Complex32> {
    (0..n).map(|i| c(1.0 + i as f32 * 0.1, (i % 3) as f32 - 1.0)).collect()
}

#[test]
fn test_gpu_cg_dia_matches_cpu_solve() -> Result<(), CmmError> {
    block_on(async {
        let Some(gpu) = gpu_or_skip("test_gpu_cg_dia_matches_cpu_solve").await else {
            return Ok(());
        };
        let n = 40;
        let dia = DiaMatrix::from_dense(&hermitian_pentadiagonal(n))?;
        let b = rhs(n);
        let cg = ConjugateGradient::with_params(1e-5, 200);

        let expected = cg
            .solve(&CpuDevice::default(), &DiaOperator::new(dia.clone()), &b)
            .await?;
        let gpu_dia = gpu.create_dia_matrix(&dia)?;
        let result = cg.solve(&gpu, &gpu_dia, &b).await?;

        assert_close_vec(&result.x, &expected.x, 1e-3);
        let b_norm = b.iter().map(|v| v.norm_sqr()).sum::<f32>().sqrt();
        assert!(result.metadata.residual_norm <= 1.01e-5 * b_norm);
        assert!(result.metadata.iterations.abs_diff(expected.metadata.iterations) <= 2);
        Ok(())
    })
}

#[test]
fn test_gpu_cg_csr_matches_cpu_solve() -> Result<(), CmmError> {
    block_on(async {
        let Some(gpu) = gpu_or_skip("test_gpu_cg_csr_matches_cpu_solve").await else {
            return Ok(());
        };
        let n = 33;
        let csr = CsrMatrix::from_dense(&hermitian_pentadiagonal(n))?;
        let b = rhs(n);
        let cg = ConjugateGradient::with_params(1e-5, 200);

        let expected = cg
            .solve(&CpuDevice::default(), &SpMatrix::new(csr.clone()), &b)
            .await?;
        let gpu_csr = gpu.create_csr_matrix(&csr, false)?;
        let result = cg.solve(&gpu, &gpu_csr, &b).await?;

        assert_close_vec(&result.x, &expected.x, 1e-3);
        Ok(())
    })
}

#[test]
fn test_gpu_csr_operator_adjoint_uses_uploaded_adjoint() -> Result<(), CmmError> {
    block_on(async {
        let Some(gpu) = gpu_or_skip("test_gpu_csr_operator_adjoint_uses_uploaded_adjoint").await
        else {
            return Ok(());
        };
        let dense = DenseMatrix::from_rows(&[
            vec![c(1.0, 1.0), c(0.0, 0.0), c(2.0, 0.0)],
            vec![c(0.0, 0.0), c(0.0, -3.0), c(0.0, 0.0)],
        ])?;
        let csr = CsrMatrix::from_dense(&dense)?;
        let x = gpu.create_dense_matrix("x", &DenseMatrix::ones(2, 1))?;
        let mut y = gpu.create_zeroed_dense_matrix("y", 3, 1)?;

        let without = gpu.create_csr_matrix(&csr, false)?;
        let result = without.eval(&gpu, c(1.0, 0.0), &x, c(0.0, 0.0), &mut y, false).await;
        assert!(matches!(result, Err(CmmError::UnsupportedOperation(_))));

        let with = gpu.create_csr_matrix(&csr, true)?;
        assert_eq!(GpuOperator::shape(&with), (2, 3));
        with.eval(&gpu, c(1.0, 0.0), &x, c(0.0, 0.0), &mut y, false).await?;
        assert_close_vec(
            &y.read_contents().await?,
            &[c(1.0, -1.0), c(0.0, 3.0), c(2.0, 0.0)],
            1e-5,
        );
        Ok(())
    })
}

#[test]
fn test_gpu_cg_rejects_indefinite_operator() -> Result<(), CmmError> {
    block_on(async {
        let Some(gpu) = gpu_or_skip("test_gpu_cg_rejects_indefinite_operator").await else {
            return Ok(());
        };
        let negated = DenseMatrix::from_fn(8, 8, |r, col| if r == col { c(-2.0, 0.0) } else { c(0.0, 0.0) });
        let gpu_dia = gpu.create_dia_matrix(&DiaMatrix::from_dense(&negated)?)?;

        let result = ConjugateGradient::default().solve(&gpu, &gpu_dia, &rhs(8)).await;
        assert!(matches!(result, Err(CmmError::UnsupportedOperation(_))));
        Ok(())
    })
}

#[test]
fn test_gpu_cg_zero_rhs_and_bad_shapes() -> Result<(), CmmError> {
    block_on(async {
        let Some(gpu) = gpu_or_skip("test_gpu_cg_zero_rhs_and_bad_shapes").await else {
            return Ok(());
        };
        let gpu_dia = gpu.create_dia_matrix(&DiaMatrix::from_dense(&hermitian_pentadiagonal(6))?)?;
        let cg = ConjugateGradient::default();

        let result = cg.solve(&gpu, &gpu_dia, &[c(0.0, 0.0); 6]).await?;
        assert_eq!(result.metadata.iterations, 0);
        assert_eq!(result.x, vec![c(0.0, 0.0); 6]);

        let result = cg.solve(&gpu, &gpu_dia, &rhs(5)).await;
        assert!(matches!(result, Err(CmmError::InvalidDimensions(_))));

        let wide = gpu.create_csr_matrix(&CsrMatrix::from_dense(&DenseMatrix::ones(2, 3))?, false)?;
        let result = cg.solve(&gpu, &wide, &rhs(2)).await;
        assert!(matches!(result, Err(CmmError::InvalidDimensions(_))));
        Ok(())
    })
}

#[test]
fn test_gpu_cg_reports_non_convergence() -> Result<(), CmmError> {
    block_on(async {
        let Some(gpu) = gpu_or_skip("test_gpu_cg_reports_non_convergence").await else {
            return Ok(());
        };
        let gpu_dia = gpu.create_dia_matrix(&DiaMatrix::from_dense(&hermitian_pentadiagonal(30))?)?;

        let result = ConjugateGradient::with_params(1e-7, 1)
            .solve(&gpu, &gpu_dia, &rhs(30))
            .await;
        assert!(matches!(result, Err(CmmError::NonConvergence { iterations: 1, .. })));
        Ok(())
    })
}
