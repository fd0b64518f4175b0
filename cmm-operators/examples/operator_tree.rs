use cmm_operators::algorithms::{ConjugateGradient, SolveAlgorithm};
use cmm_operators::{
    adjoint, memusage, CmmError, Complex32, CpuDevice, CsrMatrix, DenseMatrix, DiaMatrix,
    DiaOperator, GpuDevice, KronI, Operator, OperatorRef, Product, SpMatrix, Triplet, VStack,
};
use std::sync::Arc;
use std::time::Instant;

/// Hermitian pentadiagonal matrix stored by diagonals.
fn create_pentadiagonal_matrix(n: usize) -> Result<DiaMatrix, CmmError> {
    let offsets = vec![-2, -1, 0, 1, 2];
    let mut data = Vec::with_capacity(offsets.len() * n);
    for &offset in &offsets {
        let value = match offset {
            0 => Complex32::new(4.0, 0.0),
            1 => Complex32::new(-1.0, 0.25),
            -1 => Complex32::new(-1.0, -0.25),
            _ => Complex32::new(-0.5, 0.0),
        };
        data.extend(std::iter::repeat(value).take(n));
    }
    DiaMatrix::from_diagonals(n, n, offsets, data)
}

/// Sparse sampling operator picking every `step`-th unknown.
fn create_sampling_matrix(n: usize, step: usize) -> Result<CsrMatrix, CmmError> {
    let triplets = (0..n)
        .step_by(step)
        .enumerate()
        .map(|(row, col)| Triplet::new(row, col, Complex32::new(1.0, 0.0)))
        .collect::<Vec<_>>();
    CsrMatrix::from_triplets(triplets.len(), n, triplets)
}

async fn compare_gpu(a: &DiaMatrix, x: &DenseMatrix) -> Result<(), CmmError> {
    let gpu = match GpuDevice::new().await {
        Ok(gpu) => gpu,
        Err(e) => {
            log::warn!("No GPU available, skipping kernel comparison: {}", e);
            return Ok(());
        }
    };
    let one = Complex32::new(1.0, 0.0);
    let zero = Complex32::new(0.0, 0.0);

    let gpu_a = gpu.create_dia_matrix(a)?;
    let gpu_x = gpu.create_dense_matrix("x", x)?;
    let mut gpu_y = gpu.create_zeroed_dense_matrix("y", a.rows(), x.cols())?;
    let start_time = Instant::now();
    gpu.diamm(one, &gpu_a, &gpu_x, zero, &mut gpu_y, false).await?;
    let gpu_result = gpu_y.to_dense_matrix().await?;
    log::info!("GPU diamm finished in {:?}", start_time.elapsed());

    let mut expected = DenseMatrix::zeros(a.rows(), x.cols());
    CpuDevice::default().diamm(one, a.view(), x.view(), zero, expected.view_mut(), false)?;
    log::info!(
        "GPU vs CPU max difference: {:e}",
        gpu_result.max_abs_diff(&expected)
    );

    // Solve one block with the operands kept on the GPU.
    let b = &x.data()[..a.rows()];
    let solver = ConjugateGradient::with_params(1e-4, a.rows());
    let start_time = Instant::now();
    let gpu_solve = solver.solve(&gpu, &gpu_a, b).await?;
    log::info!(
        "GPU Conjugate Gradient finished in {:?}: {} iterations, residual {:e}",
        start_time.elapsed(),
        gpu_solve.metadata.iterations,
        gpu_solve.metadata.residual_norm
    );
    let cpu_solve = solver
        .solve(&CpuDevice::default(), &DiaOperator::new(a.clone()), b)
        .await?;
    let max_diff = gpu_solve
        .x
        .iter()
        .zip(&cpu_solve.x)
        .map(|(g, c)| (g - c).norm())
        .fold(0.0f32, f32::max);
    log::info!("GPU vs CPU solution max difference: {:e}", max_diff);

    let stats = gpu.get_transfer_stats();
    log::info!(
        "Transfers: {} bytes to GPU, {} bytes from GPU",
        stats.bytes_to_gpu,
        stats.bytes_from_gpu
    );
    Ok(())
}

fn main() -> Result<(), CmmError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .filter_module("naga", log::LevelFilter::Off)
        .init();

    let n = 200;
    let blocks = 3;
    log::info!("Setting up {} pentadiagonal blocks of size {}...", blocks, n);

    let dia = create_pentadiagonal_matrix(n)?;
    let sampling = create_sampling_matrix(n * blocks, 7)?;

    let a: OperatorRef = Arc::new(DiaOperator::new(dia.clone()).named("penta"));
    let k: OperatorRef = Arc::new(KronI::new(blocks, a)?);
    let s: OperatorRef = Arc::new(SpMatrix::new(sampling).named("map").with_batch(4));
    let stacked: OperatorRef = Arc::new(VStack::new(vec![k, s])?.named("model"));
    let normal = Product::new(adjoint(&stacked), Arc::clone(&stacked))?;

    println!("{}", normal.dump());
    log::info!("Memory usage for one column: {}", memusage(&normal, 1));

    let b: Vec<Complex32> = (0..n * blocks)
        .map(|i| Complex32::new((i as f32 / n as f32).sin(), 0.0))
        .collect();
    let solver = ConjugateGradient::with_params(1e-4, n * blocks);

    let start_time = Instant::now();
    let result = pollster::block_on(solver.solve(&CpuDevice::default(), &normal, &b))?;
    log::info!(
        "Conjugate Gradient finished in {:?}: {} iterations, residual {:e}",
        start_time.elapsed(),
        result.metadata.iterations,
        result.metadata.residual_norm
    );
    log::info!("x[0..5] = {:?}", &result.x[..5]);

    let x = DenseMatrix::from_column_major(n, blocks, n, result.x)?;
    pollster::block_on(compare_gpu(&dia, &x))
}
