//! Multiply-accumulate kernels and the shape checks shared by every backend.
//!
//! `cpu` holds the unchecked reference kernels. The checks below run once at the
//! API boundary (`CpuDevice`, `GpuDevice`) so the kernels themselves stay branch-free.

pub mod cpu;

use crate::error::CmmError;

/// Shape check for `Y := alpha * op(A) * X + beta * Y`.
///
/// `a` is the stored shape of A; with `adjoint` the product uses `Aᴴ`.
pub(crate) fn check_product(
    kernel: &str,
    a: (usize, usize),
    adjoint: bool,
    x: (usize, usize),
    y: (usize, usize),
) -> Result<(), CmmError> {
    let (out_rows, in_rows) = if adjoint { (a.1, a.0) } else { a };
    if x.0 != in_rows {
        return Err(CmmError::InvalidDimensions(format!(
            "{}: operand has {} rows but the {}matrix has {} columns",
            kernel,
            x.0,
            if adjoint { "adjoint " } else { "" },
            in_rows
        )));
    }
    if y.0 != out_rows {
        return Err(CmmError::InvalidDimensions(format!(
            "{}: output has {} rows, expected {}",
            kernel, y.0, out_rows
        )));
    }
    if x.1 != y.1 {
        return Err(CmmError::InvalidDimensions(format!(
            "{}: operand has {} columns but output has {}",
            kernel, x.1, y.1
        )));
    }
    Ok(())
}

/// Shape check for `onemm`: `X` is `K x N`, `Y` is `M x N`, any `K` and `M`.
pub(crate) fn check_onemm(x: (usize, usize), y: (usize, usize)) -> Result<(), CmmError> {
    if x.1 != y.1 {
        return Err(CmmError::InvalidDimensions(format!(
            "onemm: operand has {} columns but output has {}",
            x.1, y.1
        )));
    }
    Ok(())
}
