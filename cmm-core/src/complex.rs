//! Complex scalar helpers shared by every kernel.

pub use num_complex::Complex32;
use num_traits::Zero;

/// Builds the `alpha`/`beta` coefficient of a kernel call from two
/// independently supplied components, narrowing each to single precision.
#[inline]
pub fn complex_scalar(re: f64, im: f64) -> Complex32 {
    Complex32::new(re as f32, im as f32)
}

/// `alpha * acc + beta * y`, without touching `y` when `beta` is exactly zero.
///
/// `y` is passed lazily so a poisoned (NaN) output never leaks into a
/// `beta == 0` result.
#[inline(always)]
pub(crate) fn accumulate(
    alpha: Complex32,
    acc: Complex32,
    beta: Complex32,
    y: impl FnOnce() -> Complex32,
) -> Complex32 {
    if beta.is_zero() {
        alpha * acc
    } else {
        alpha * acc + beta * y()
    }
}

/// Reinterprets a complex buffer as `2 * len` interleaved `(re, im)` floats.
pub fn as_interleaved(data: &[Complex32]) -> &[f32] {
    bytemuck::cast_slice(data)
}

/// Mutable counterpart of [`as_interleaved`].
pub fn as_interleaved_mut(data: &mut [Complex32]) -> &mut [f32] {
    bytemuck::cast_slice_mut(data)
}
