use crate::complex::Complex32;
use crate::context::GpuContext;
use crate::error::CmmError;
use crate::layout::{required_len, DenseView, DenseViewMut};
use crate::traits::Matrix;
use num_traits::{One, Zero};
use std::mem;
use std::sync::Arc;

/// Owned complex matrix stored column-major with a leading dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    ld: usize,
    data: Vec<Complex32>,
}

impl DenseMatrix {
    /// Packed matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::with_leading_dimension(rows, cols, rows)
    }

    /// Matrix of zeros whose columns are `ld` elements apart.
    pub fn with_leading_dimension(rows: usize, cols: usize, ld: usize) -> Self {
        let ld = ld.max(rows);
        Self {
            rows,
            cols,
            ld,
            data: vec![Complex32::zero(); ld * cols],
        }
    }

    pub fn ones(rows: usize, cols: usize) -> Self {
        Self::from_fn(rows, cols, |_, _| Complex32::one())
    }

    pub fn identity(n: usize) -> Self {
        Self::from_fn(n, n, |r, c| if r == c { Complex32::one() } else { Complex32::zero() })
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> Complex32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for c in 0..cols {
            for r in 0..rows {
                data.push(f(r, c));
            }
        }
        Self {
            rows,
            cols,
            ld: rows,
            data,
        }
    }

    /// Wraps column-major data; `data.len()` must be `ld * cols`.
    pub fn from_column_major(
        rows: usize,
        cols: usize,
        ld: usize,
        data: Vec<Complex32>,
    ) -> Result<Self, CmmError> {
        if ld < rows {
            return Err(CmmError::InvalidDimensions(format!(
                "Leading dimension ({}) must be at least the row count ({})",
                ld, rows
            )));
        }
        if data.len() != ld * cols {
            return Err(CmmError::InvalidDimensions(format!(
                "Data length ({}) does not match dimensions ({}x{}, ld {})",
                data.len(),
                rows,
                cols,
                ld
            )));
        }
        Ok(Self { rows, cols, ld, data })
    }

    /// Builds a packed matrix from row vectors (all rows must have equal length).
    pub fn from_rows(rows: &[Vec<Complex32>]) -> Result<Self, CmmError> {
        let cols = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != cols) {
            return Err(CmmError::InvalidDimensions(
                "Input rows must all have the same length".to_string(),
            ));
        }
        Ok(Self::from_fn(rows.len(), cols, |r, c| rows[r][c]))
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ld(&self) -> usize {
        self.ld
    }

    pub fn data(&self) -> &[Complex32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [Complex32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<Complex32> {
        self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Complex32 {
        self.data[row + col * self.ld]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: Complex32) {
        self.data[row + col * self.ld] = value;
    }

    pub fn view(&self) -> DenseView<'_> {
        DenseView::new_unchecked(&self.data, self.rows, self.cols, self.ld)
    }

    pub fn view_mut(&mut self) -> DenseViewMut<'_> {
        DenseViewMut::new_unchecked(&mut self.data, self.rows, self.cols, self.ld)
    }

    /// Conjugate transpose as a new packed matrix.
    pub fn adjoint(&self) -> DenseMatrix {
        DenseMatrix::from_fn(self.cols, self.rows, |r, c| self.get(c, r).conj())
    }

    /// Largest element-wise distance to `other`, used to compare kernel outputs.
    pub fn max_abs_diff(&self, other: &DenseMatrix) -> f32 {
        assert_eq!(self.dims(), other.dims(), "matrix shapes differ");
        let mut max = 0.0f32;
        for c in 0..self.cols {
            for r in 0..self.rows {
                max = max.max((self.get(r, c) - other.get(r, c)).norm());
            }
        }
        max
    }
}

impl Matrix for DenseMatrix {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nbytes(&self) -> usize {
        self.data.len() * mem::size_of::<Complex32>()
    }
}

/// Represents a column-major complex matrix stored on the GPU.
#[derive(Debug)]
pub struct GpuDenseMatrix {
    buffer: wgpu::Buffer,
    rows: usize,
    cols: usize,
    ld: usize,
    usage: wgpu::BufferUsages,
    label: String,
    pub(crate) context: Arc<GpuContext>,
}

impl GpuDenseMatrix {
    /// Internal constructor used by GpuDevice.
    pub(crate) fn new_internal(
        buffer: wgpu::Buffer,
        rows: usize,
        cols: usize,
        ld: usize,
        usage: wgpu::BufferUsages,
        label: String,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            buffer,
            rows,
            cols,
            ld,
            usage,
            label,
            context,
        }
    }

    /// Returns the underlying `wgpu::Buffer`.
    pub(crate) fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ld(&self) -> usize {
        self.ld
    }

    /// Number of complex elements held by the buffer (`ld * cols`).
    pub fn len(&self) -> usize {
        self.ld * self.cols
    }

    pub fn is_empty(&self) -> bool {
        required_len(self.rows, self.cols, self.ld) == 0
    }

    pub fn size_bytes(&self) -> u64 {
        (self.len() * mem::size_of::<Complex32>()) as u64
    }

    pub fn usage(&self) -> wgpu::BufferUsages {
        self.usage
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    pub fn as_entire_binding(&self) -> wgpu::BindingResource {
        self.buffer.as_entire_binding()
    }

    /// Reads the whole buffer (including leading-dimension padding) back to the CPU.
    pub async fn read_contents(&self) -> Result<Vec<Complex32>, CmmError> {
        self.context.read_buffer_to_cpu(self.inner(), self.len()).await
    }

    /// Reads the buffer back as a [`DenseMatrix`] with the same leading dimension.
    pub async fn to_dense_matrix(&self) -> Result<DenseMatrix, CmmError> {
        let data = self.read_contents().await?;
        DenseMatrix::from_column_major(self.rows, self.cols, self.ld, data)
    }

    /// Overwrites the buffer with `data` (`ld * cols` elements).
    pub async fn write_contents(&self, data: &[Complex32]) -> Result<(), CmmError> {
        if data.len() != self.len() {
            return Err(CmmError::InvalidDimensions(format!(
                "Data length ({}) does not match GpuDenseMatrix size ({})",
                data.len(),
                self.len()
            )));
        }
        self.context.write_buffer(self.inner(), data).await
    }
}

impl Matrix for GpuDenseMatrix {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nbytes(&self) -> usize {
        self.size_bytes() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f32, im: f32) -> Complex32 {
        Complex32::new(re, im)
    }

    #[test]
    fn test_from_rows_is_column_major() {
        let m = DenseMatrix::from_rows(&[
            vec![c(1.0, 0.0), c(2.0, 0.0)],
            vec![c(3.0, 0.0), c(4.0, 0.0)],
        ])
        .unwrap();
        assert_eq!(m.data(), &[c(1.0, 0.0), c(3.0, 0.0), c(2.0, 0.0), c(4.0, 0.0)]);
        assert_eq!(m.get(0, 1), c(2.0, 0.0));
    }

    #[test]
    fn test_from_rows_rejects_ragged_input() {
        let err = DenseMatrix::from_rows(&[vec![c(1.0, 0.0)], vec![]]);
        assert!(matches!(err, Err(CmmError::InvalidDimensions(_))));
    }

    #[test]
    fn test_leading_dimension_padding() {
        let mut m = DenseMatrix::with_leading_dimension(2, 3, 5);
        assert_eq!(m.data().len(), 15);
        m.set(1, 2, c(9.0, 0.0));
        assert_eq!(m.data()[11], c(9.0, 0.0));
        assert_eq!(m.view().get(1, 2), c(9.0, 0.0));
    }

    #[test]
    fn test_from_column_major_checks_length() {
        assert!(DenseMatrix::from_column_major(2, 2, 3, vec![c(0.0, 0.0); 6]).is_ok());
        assert!(DenseMatrix::from_column_major(2, 2, 3, vec![c(0.0, 0.0); 5]).is_err());
        assert!(DenseMatrix::from_column_major(3, 2, 2, vec![c(0.0, 0.0); 4]).is_err());
    }

    #[test]
    fn test_adjoint_conjugates() {
        let m = DenseMatrix::from_rows(&[vec![c(1.0, 2.0), c(3.0, -1.0)]]).unwrap();
        let h = m.adjoint();
        assert_eq!(h.dims(), (2, 1));
        assert_eq!(h.get(0, 0), c(1.0, -2.0));
        assert_eq!(h.get(1, 0), c(3.0, 1.0));
    }

    #[test]
    fn test_identity_and_ones() {
        let i = DenseMatrix::identity(3);
        assert_eq!(i.get(1, 1), Complex32::one());
        assert_eq!(i.get(0, 1), Complex32::zero());
        assert!(DenseMatrix::ones(2, 2).data().iter().all(|v| *v == Complex32::one()));
    }
}
