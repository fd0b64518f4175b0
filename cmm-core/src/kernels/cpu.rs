//! Reference CPU kernels.
//!
//! These trust their arguments: shapes are only checked with `debug_assert!`.
//! Callers go through [`crate::device::CpuDevice`] for validated entry points.
//! When `beta` is exactly zero the previous contents of `Y` are never read.

use crate::complex::{accumulate, Complex32};
use crate::device::ComputeContext;
use crate::dia_matrix::DiaView;
use crate::layout::{DenseView, DenseViewMut, Transpose};
use crate::sparse_matrix::CsrView;
use num_traits::Zero;

/// `Y := alpha * 1_{M x K} * X + beta * Y` where `X` is `K x N` and `Y` is `M x N`.
///
/// Every row of `Y` receives the column sums of `X`.
pub fn onemm(alpha: Complex32, x: DenseView<'_>, beta: Complex32, mut y: DenseViewMut<'_>) {
    debug_assert_eq!(x.cols(), y.cols());
    for j in 0..y.cols() {
        let sum: Complex32 = x.column(j).iter().sum();
        for y_ij in y.column_mut(j) {
            *y_ij = accumulate(alpha, sum, beta, || *y_ij);
        }
    }
}

/// Dense `Y := alpha * op(A) * X + beta * Y`.
pub fn gemm(
    alpha: Complex32,
    a: DenseView<'_>,
    op: Transpose,
    x: DenseView<'_>,
    beta: Complex32,
    mut y: DenseViewMut<'_>,
) {
    debug_assert_eq!(x.cols(), y.cols());
    for j in 0..y.cols() {
        let xj = x.column(j);
        let yj = y.column_mut(j);
        match op {
            Transpose::NoTrans => {
                debug_assert_eq!(a.cols(), xj.len());
                for (i, y_ij) in yj.iter_mut().enumerate() {
                    let acc = xj
                        .iter()
                        .enumerate()
                        .fold(Complex32::zero(), |acc, (l, x_lj)| acc + a.get(i, l) * x_lj);
                    *y_ij = accumulate(alpha, acc, beta, || *y_ij);
                }
            }
            Transpose::ConjTrans => {
                debug_assert_eq!(a.rows(), xj.len());
                for (i, y_ij) in yj.iter_mut().enumerate() {
                    let acc = a
                        .column(i)
                        .iter()
                        .zip(xj)
                        .fold(Complex32::zero(), |acc, (a_li, x_lj)| acc + a_li.conj() * x_lj);
                    *y_ij = accumulate(alpha, acc, beta, || *y_ij);
                }
            }
        }
    }
}

/// CSR `Y := alpha * A * X + beta * Y`, one exclusive writer per output row.
///
/// `A` is `M x K`, `X` is `K x N`, `Y` is `M x N`. Rows without entries still get `beta * Y`.
pub fn exw_csrmm<C: ComputeContext + ?Sized>(
    ctx: &C,
    alpha: Complex32,
    a: CsrView<'_>,
    x: DenseView<'_>,
    beta: Complex32,
    mut y: DenseViewMut<'_>,
) {
    debug_assert_eq!(a.cols(), x.rows());
    debug_assert_eq!(a.rows(), y.rows());
    log::trace!(
        "exw_csrmm {}x{} nnz={} n={} on {}",
        a.rows(),
        a.cols(),
        a.values().len(),
        y.cols(),
        ctx.label()
    );
    let values = a.values();
    let col_indices = a.col_indices();
    for j in 0..y.cols() {
        let xj = x.column(j);
        for (i, y_ij) in y.column_mut(j).iter_mut().enumerate() {
            let acc = a.row_range(i).fold(Complex32::zero(), |acc, p| {
                acc + values[p] * xj[col_indices[p] as usize]
            });
            *y_ij = accumulate(alpha, acc, beta, || *y_ij);
        }
    }
}

/// CSR multiply with an adjoint toggle.
///
/// With `adjoint`, computes `Y := alpha * Aᴴ * X + beta * Y` (`X` is `M x N`, `Y` is `K x N`)
/// by scattering each row of `A` into the output.
pub fn csrmm<C: ComputeContext + ?Sized>(
    ctx: &C,
    alpha: Complex32,
    a: CsrView<'_>,
    x: DenseView<'_>,
    beta: Complex32,
    mut y: DenseViewMut<'_>,
    adjoint: bool,
) {
    if !adjoint {
        return exw_csrmm(ctx, alpha, a, x, beta, y);
    }
    debug_assert_eq!(a.rows(), x.rows());
    debug_assert_eq!(a.cols(), y.rows());
    log::trace!(
        "csrmm (adjoint) {}x{} nnz={} n={} on {}",
        a.rows(),
        a.cols(),
        a.values().len(),
        y.cols(),
        ctx.label()
    );
    scale(beta, y.reborrow());
    let values = a.values();
    let col_indices = a.col_indices();
    for j in 0..y.cols() {
        let xj = x.column(j);
        let yj = y.column_mut(j);
        for (i, &x_ij) in xj.iter().enumerate() {
            let s = alpha * x_ij;
            for p in a.row_range(i) {
                yj[col_indices[p] as usize] += values[p].conj() * s;
            }
        }
    }
}

/// DIA `Y := alpha * op(A) * X + beta * Y`, `op` being identity or (with `adjoint`) `Aᴴ`.
///
/// Diagonal positions outside `[0, M) x [0, K)` are skipped and never read.
pub fn diamm(
    alpha: Complex32,
    a: DiaView<'_>,
    x: DenseView<'_>,
    beta: Complex32,
    y: DenseViewMut<'_>,
    adjoint: bool,
) {
    let (m, k) = (a.rows() as i64, a.cols() as i64);
    let stride = a.stride();
    let offsets = a.offsets();
    let data = a.data();
    if adjoint {
        debug_assert_eq!(x.rows() as i64, m);
        debug_assert_eq!(y.rows() as i64, k);
        // Output row `out` is column `out` of A; its entry on diagonal d sits at row `out - offset`.
        dia_apply(alpha, x, beta, y, |out, xj| {
            offsets
                .iter()
                .enumerate()
                .fold(Complex32::zero(), |acc, (d, &offset)| {
                    let row = out as i64 - offset as i64;
                    if (0..m).contains(&row) {
                        acc + data[d * stride + out].conj() * xj[row as usize]
                    } else {
                        acc
                    }
                })
        });
    } else {
        debug_assert_eq!(x.rows() as i64, k);
        debug_assert_eq!(y.rows() as i64, m);
        dia_apply(alpha, x, beta, y, |out, xj| {
            offsets
                .iter()
                .enumerate()
                .fold(Complex32::zero(), |acc, (d, &offset)| {
                    let col = out as i64 + offset as i64;
                    if (0..k).contains(&col) {
                        acc + data[d * stride + col as usize] * xj[col as usize]
                    } else {
                        acc
                    }
                })
        });
    }
}

fn dia_apply(
    alpha: Complex32,
    x: DenseView<'_>,
    beta: Complex32,
    mut y: DenseViewMut<'_>,
    gather: impl Fn(usize, &[Complex32]) -> Complex32,
) {
    for j in 0..y.cols() {
        let xj = x.column(j);
        for (out, y_oj) in y.column_mut(j).iter_mut().enumerate() {
            let acc = gather(out, xj);
            *y_oj = accumulate(alpha, acc, beta, || *y_oj);
        }
    }
}

/// Floor-clamps every value: `a[i] := a[i] if a[i] >= val else val` (NaN becomes `val`).
pub fn clamp_max(val: f32, a: &mut [f32]) {
    for v in a.iter_mut() {
        *v = if *v >= val { *v } else { val };
    }
}

/// `Y := alpha * Y`. A zero `alpha` clears `Y` without reading it.
pub fn scale(alpha: Complex32, mut y: DenseViewMut<'_>) {
    if alpha.is_zero() {
        y.fill(Complex32::zero());
        return;
    }
    for j in 0..y.cols() {
        for v in y.column_mut(j) {
            *v *= alpha;
        }
    }
}

/// `y += alpha * x`.
pub fn axpy(alpha: Complex32, x: &[Complex32], y: &mut [Complex32]) {
    debug_assert_eq!(x.len(), y.len());
    for (y_i, x_i) in y.iter_mut().zip(x) {
        *y_i += alpha * x_i;
    }
}

/// Conjugated dot product `xᴴ y`.
pub fn dotc(x: &[Complex32], y: &[Complex32]) -> Complex32 {
    debug_assert_eq!(x.len(), y.len());
    x.iter()
        .zip(y)
        .fold(Complex32::zero(), |acc, (x_i, y_i)| acc + x_i.conj() * y_i)
}

/// Squared Euclidean norm `‖x‖²`.
pub fn norm2_squared(x: &[Complex32]) -> f32 {
    x.iter().map(|v| v.norm_sqr()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense_matrix::DenseMatrix;
    use crate::device::CpuDevice;
    use crate::dia_matrix::DiaMatrix;
    use crate::sparse_matrix::{CsrMatrix, Triplet};
    use num_traits::One;

    const TOL: f32 = 1e-4;

    fn c(re: f32, im: f32) -> Complex32 {
        Complex32::new(re, im)
    }

    fn rand_c(rng: &mut fastrand::Rng) -> Complex32 {
        c(rng.f32() * 2.0 - 1.0, rng.f32() * 2.0 - 1.0)
    }

    fn rand_dense(rng: &mut fastrand::Rng, rows: usize, cols: usize, ld: usize) -> DenseMatrix {
        let mut m = DenseMatrix::with_leading_dimension(rows, cols, ld);
        for col in 0..cols {
            for r in 0..rows {
                m.set(r, col, rand_c(rng));
            }
        }
        m
    }

    /// Random CSR with an empty first row and a fully dense second row.
    fn rand_csr(rng: &mut fastrand::Rng, rows: usize, cols: usize, density: f32) -> CsrMatrix {
        let mut triplets = Vec::new();
        for r in 1..rows {
            for col in 0..cols {
                if r == 1 || rng.f32() < density {
                    triplets.push(Triplet::new(r, col, rand_c(rng)));
                }
            }
        }
        CsrMatrix::from_triplets(rows, cols, triplets).unwrap()
    }

    fn nan_matrix(rows: usize, cols: usize) -> DenseMatrix {
        DenseMatrix::from_fn(rows, cols, |_, _| c(f32::NAN, f32::NAN))
    }

    fn reference(
        alpha: Complex32,
        a: &DenseMatrix,
        op: Transpose,
        x: &DenseMatrix,
        beta: Complex32,
        y: &DenseMatrix,
    ) -> DenseMatrix {
        let mut out = y.clone();
        gemm(alpha, a.view(), op, x.view(), beta, out.view_mut());
        out
    }

    #[test]
    fn test_csr_two_by_two_scenario() {
        let a = CsrMatrix::from_csr(2, 2, vec![c(1.0, 0.0), c(1.0, 0.0)], vec![0, 1], vec![0, 1, 2])
            .unwrap();
        let x = DenseMatrix::from_column_major(2, 1, 2, vec![c(1.0, 0.0), c(1.0, 0.0)]).unwrap();
        let mut y = DenseMatrix::zeros(2, 1);
        exw_csrmm(
            &CpuDevice::default(),
            c(1.0, 0.0),
            a.view(),
            x.view(),
            c(0.0, 0.0),
            y.view_mut(),
        );
        assert_eq!(y.data(), &[c(1.0, 0.0), c(1.0, 0.0)]);
    }

    #[test]
    fn test_gemm_small_known_product() {
        // [1 i] * [1; 1] = [1 + i]
        let a = DenseMatrix::from_rows(&[vec![c(1.0, 0.0), c(0.0, 1.0)]]).unwrap();
        let x = DenseMatrix::ones(2, 1);
        let y = reference(Complex32::one(), &a, Transpose::NoTrans, &x, Complex32::zero(), &nan_matrix(1, 1));
        assert_eq!(y.get(0, 0), c(1.0, 1.0));

        // [1 i]ᴴ * [2] = [2; -2i]
        let x = DenseMatrix::from_rows(&[vec![c(2.0, 0.0)]]).unwrap();
        let y = reference(Complex32::one(), &a, Transpose::ConjTrans, &x, Complex32::zero(), &DenseMatrix::zeros(2, 1));
        assert_eq!(y.get(0, 0), c(2.0, 0.0));
        assert_eq!(y.get(1, 0), c(0.0, -2.0));
    }

    #[test]
    fn test_csr_matches_dense_gemm_on_random_patterns() {
        let mut rng = fastrand::Rng::with_seed(7);
        let ctx = CpuDevice::default();
        for &(m, k, n, density) in &[(6, 5, 3, 0.3), (9, 4, 1, 0.0), (5, 8, 4, 0.9)] {
            let a = rand_csr(&mut rng, m, k, density);
            let x = rand_dense(&mut rng, k, n, k + 2);
            let y0 = rand_dense(&mut rng, m, n, m + 1);
            for (alpha, beta) in [(c(1.0, 0.0), c(0.0, 0.0)), (c(0.5, -1.0), c(2.0, 0.25))] {
                let mut y = y0.clone();
                exw_csrmm(&ctx, alpha, a.view(), x.view(), beta, y.view_mut());
                let expected = reference(alpha, &a.to_dense(), Transpose::NoTrans, &x, beta, &y0);
                assert!(y.max_abs_diff(&expected) < TOL, "m={m} k={k} n={n}");
            }
        }
    }

    #[test]
    fn test_csr_empty_row_still_scales_by_beta() {
        let a = CsrMatrix::from_csr(2, 2, vec![c(1.0, 0.0)], vec![1], vec![0, 0, 1]).unwrap();
        let x = DenseMatrix::ones(2, 1);
        let mut y = DenseMatrix::from_fn(2, 1, |_, _| c(3.0, 0.0));
        exw_csrmm(&CpuDevice::default(), c(1.0, 0.0), a.view(), x.view(), c(0.0, 1.0), y.view_mut());
        assert_eq!(y.get(0, 0), c(0.0, 3.0));
        assert_eq!(y.get(1, 0), c(1.0, 3.0));
    }

    #[test]
    fn test_csr_adjoint_matches_conjugate_transpose() {
        let mut rng = fastrand::Rng::with_seed(11);
        let ctx = CpuDevice::default();
        let a = rand_csr(&mut rng, 7, 5, 0.4);
        let x = rand_dense(&mut rng, 7, 3, 7);
        let y0 = rand_dense(&mut rng, 5, 3, 6);
        let (alpha, beta) = (c(0.0, 1.0), c(-1.0, 0.5));
        let mut y = y0.clone();
        csrmm(&ctx, alpha, a.view(), x.view(), beta, y.view_mut(), true);
        let expected = reference(alpha, &a.to_dense(), Transpose::ConjTrans, &x, beta, &y0);
        assert!(y.max_abs_diff(&expected) < TOL);

        // The explicit conjugate transpose gives the same result through the forward path.
        let mut y_fwd = y0.clone();
        csrmm(&ctx, alpha, a.adjoint().view(), x.view(), beta, y_fwd.view_mut(), false);
        assert!(y.max_abs_diff(&y_fwd) < TOL);
    }

    #[test]
    fn test_beta_zero_ignores_poisoned_output() {
        let mut rng = fastrand::Rng::with_seed(3);
        let ctx = CpuDevice::default();
        let csr = rand_csr(&mut rng, 4, 3, 0.5);
        let dia = DiaMatrix::from_dense(&csr.to_dense()).unwrap();
        let x = rand_dense(&mut rng, 3, 2, 3);
        let x_adj = rand_dense(&mut rng, 4, 2, 4);
        let alpha = c(1.0, 0.0);
        let zero = Complex32::zero();

        let mut y = nan_matrix(4, 2);
        exw_csrmm(&ctx, alpha, csr.view(), x.view(), zero, y.view_mut());
        assert!(y.data().iter().all(|v| !v.is_nan()));

        let mut y = nan_matrix(3, 2);
        csrmm(&ctx, alpha, csr.view(), x_adj.view(), zero, y.view_mut(), true);
        assert!(y.data().iter().all(|v| !v.is_nan()));

        let mut y = nan_matrix(4, 2);
        diamm(alpha, dia.view(), x.view(), zero, y.view_mut(), false);
        assert!(y.data().iter().all(|v| !v.is_nan()));

        let mut y = nan_matrix(5, 2);
        onemm(alpha, x.view(), zero, y.view_mut());
        assert!(y.data().iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_onemm_equals_product_with_ones_matrix() {
        let mut rng = fastrand::Rng::with_seed(5);
        let x = rand_dense(&mut rng, 4, 3, 6);
        let ones = DenseMatrix::ones(5, 4);
        let y0 = rand_dense(&mut rng, 5, 3, 5);
        for (alpha, beta) in [(c(1.0, 0.0), c(0.0, 0.0)), (c(2.0, 1.0), c(0.5, 0.0))] {
            let mut y = y0.clone();
            onemm(alpha, x.view(), beta, y.view_mut());
            let expected = reference(alpha, &ones, Transpose::NoTrans, &x, beta, &y0);
            assert!(y.max_abs_diff(&expected) < TOL);
        }
    }

    #[test]
    fn test_onemm_with_identity_column() {
        let x = DenseMatrix::identity(3);
        let mut y = DenseMatrix::zeros(2, 3);
        onemm(c(1.0, 0.0), x.view(), c(0.0, 0.0), y.view_mut());
        assert!(y.data().iter().all(|v| *v == c(1.0, 0.0)));
    }

    #[test]
    fn test_diamm_matches_dense_forward_and_adjoint() {
        let mut rng = fastrand::Rng::with_seed(13);
        for &(m, k) in &[(5, 5), (4, 7), (7, 3)] {
            let stride = m.max(k);
            let offsets = vec![0, 2, -1, 2, -(m as i32) + 1];
            let data: Vec<Complex32> = (0..offsets.len() * stride).map(|_| rand_c(&mut rng)).collect();
            let a = DiaMatrix::from_diagonals(m, k, offsets, data).unwrap();
            let dense = a.to_dense();
            let (alpha, beta) = (c(0.5, 0.5), c(1.0, -1.0));

            let x = rand_dense(&mut rng, k, 2, k + 1);
            let y0 = rand_dense(&mut rng, m, 2, m);
            let mut y = y0.clone();
            diamm(alpha, a.view(), x.view(), beta, y.view_mut(), false);
            let expected = reference(alpha, &dense, Transpose::NoTrans, &x, beta, &y0);
            assert!(y.max_abs_diff(&expected) < TOL, "forward m={m} k={k}");

            let x = rand_dense(&mut rng, m, 2, m);
            let y0 = rand_dense(&mut rng, k, 2, k + 3);
            let mut y = y0.clone();
            diamm(alpha, a.view(), x.view(), beta, y.view_mut(), true);
            let expected = reference(alpha, &dense, Transpose::ConjTrans, &x, beta, &y0);
            assert!(y.max_abs_diff(&expected) < TOL, "adjoint m={m} k={k}");
        }
    }

    #[test]
    fn test_diamm_adjoint_inner_product_identity() {
        // <A x, y> == <x, Aᴴ y>
        let mut rng = fastrand::Rng::with_seed(17);
        let (m, k) = (6, 4);
        let offsets = vec![-2, 0, 1, 3];
        let data: Vec<Complex32> = (0..offsets.len() * m.max(k)).map(|_| rand_c(&mut rng)).collect();
        let a = DiaMatrix::from_diagonals(m, k, offsets, data).unwrap();
        let x = rand_dense(&mut rng, k, 1, k);
        let y = rand_dense(&mut rng, m, 1, m);

        let mut ax = DenseMatrix::zeros(m, 1);
        diamm(Complex32::one(), a.view(), x.view(), Complex32::zero(), ax.view_mut(), false);
        let mut ahy = DenseMatrix::zeros(k, 1);
        diamm(Complex32::one(), a.view(), y.view(), Complex32::zero(), ahy.view_mut(), true);

        let lhs = dotc(ax.data(), y.data());
        let rhs = dotc(x.data(), ahy.data());
        assert!((lhs - rhs).norm() < TOL);
    }

    #[test]
    fn test_diamm_out_of_range_offset_contributes_zero() {
        let (m, k) = (3, 4);
        let poisoned = vec![c(f32::NAN, f32::NAN); 2 * m.max(k)];
        let a = DiaMatrix::from_diagonals(m, k, vec![4, -3], poisoned).unwrap();
        let x = DenseMatrix::ones(k, 2);
        let mut y = DenseMatrix::from_fn(m, 2, |_, _| c(1.0, 0.0));
        diamm(c(1.0, 0.0), a.view(), x.view(), c(1.0, 0.0), y.view_mut(), false);
        assert!(y.data().iter().all(|v| *v == c(1.0, 0.0)));

        let x = DenseMatrix::ones(m, 2);
        let mut y = DenseMatrix::zeros(k, 2);
        diamm(c(1.0, 0.0), a.view(), x.view(), c(0.0, 0.0), y.view_mut(), true);
        assert!(y.data().iter().all(|v| *v == Complex32::zero()));
    }

    #[test]
    fn test_diamm_without_offsets_only_scales() {
        let a = DiaMatrix::new(2, 2);
        let x = DenseMatrix::ones(2, 1);
        let mut y = DenseMatrix::from_fn(2, 1, |r, _| c(r as f32 + 1.0, 0.0));
        diamm(c(1.0, 0.0), a.view(), x.view(), c(2.0, 0.0), y.view_mut(), false);
        assert_eq!(y.data(), &[c(2.0, 0.0), c(4.0, 0.0)]);
    }

    #[test]
    fn test_clamp_max_floor_semantics() {
        let mut a = vec![-1.0, 0.0, 2.5, f32::NAN, -0.0, 7.0];
        clamp_max(0.5, &mut a);
        assert_eq!(a, vec![0.5, 0.5, 2.5, 0.5, 0.5, 7.0]);
    }

    #[test]
    fn test_clamp_max_is_idempotent() {
        let mut rng = fastrand::Rng::with_seed(19);
        let original: Vec<f32> = (0..64).map(|_| rng.f32() * 4.0 - 2.0).collect();
        let mut once = original.clone();
        clamp_max(0.25, &mut once);
        let mut twice = once.clone();
        clamp_max(0.25, &mut twice);
        assert_eq!(once, twice);
        for (r, a) in once.iter().zip(&original) {
            assert!(*r >= 0.25);
            if *a >= 0.25 {
                assert_eq!(r, a);
            } else {
                assert_eq!(*r, 0.25);
            }
        }
    }

    #[test]
    fn test_clamp_max_on_interleaved_complex() {
        let mut z = vec![c(-1.0, 2.0), c(3.0, -4.0)];
        clamp_max(0.0, crate::complex::as_interleaved_mut(&mut z));
        assert_eq!(z, vec![c(0.0, 2.0), c(3.0, 0.0)]);
    }

    #[test]
    fn test_scale_and_blas1_helpers() {
        let mut y = DenseMatrix::from_fn(2, 2, |r, col| c(r as f32, col as f32));
        scale(c(0.0, 1.0), y.view_mut());
        assert_eq!(y.get(1, 1), c(-1.0, 1.0));
        let mut poisoned = nan_matrix(2, 2);
        scale(Complex32::zero(), poisoned.view_mut());
        assert!(poisoned.data().iter().all(|v| v.is_zero()));

        let x = vec![c(1.0, 1.0), c(0.0, 2.0)];
        let mut z = vec![c(1.0, 0.0), c(1.0, 0.0)];
        axpy(c(2.0, 0.0), &x, &mut z);
        assert_eq!(z, vec![c(3.0, 2.0), c(1.0, 4.0)]);
        assert_eq!(dotc(&x, &x), c(6.0, 0.0));
        assert_eq!(norm2_squared(&x), 6.0);
    }
}
