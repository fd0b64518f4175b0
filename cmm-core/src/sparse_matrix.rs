use crate::complex::Complex32;
use crate::context::GpuContext;
use crate::dense_matrix::DenseMatrix;
use crate::error::CmmError;
use crate::traits::Matrix;
use num_traits::Zero;
use std::mem;
use std::ops::Range;
use std::sync::Arc;

/// Represents a complex sparse matrix in Compressed Sparse Row (CSR) format on the CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    /// Number of rows.
    rows: usize,
    /// Number of columns.
    cols: usize,
    /// Non-zero values, row by row.
    pub(crate) values: Vec<Complex32>,
    /// Column index of each value.
    pub(crate) col_indices: Vec<u32>,
    /// `rows + 1` offsets into `values`; `row_ptr[rows]` is the number of non-zeros.
    pub(crate) row_ptr: Vec<u32>,
}

impl CsrMatrix {
    /// Creates a new empty CsrMatrix with given dimensions.
    pub fn new(rows: usize, cols: usize) -> Self {
        CsrMatrix {
            rows,
            cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptr: vec![0; rows + 1],
        }
    }

    /// Builds a matrix from coordinate entries. Entries sharing a position are kept
    /// side by side and therefore add up in every product.
    pub fn from_triplets(rows: usize, cols: usize, triplets: Vec<Triplet>) -> Result<Self, CmmError> {
        check_index_range(triplets.len(), cols)?;
        let mut coords = triplets;
        coords.sort_by_key(|t| (t.row, t.col));

        let mut row_ptr = vec![0u32; rows + 1];
        for t in &coords {
            if t.row >= rows {
                return Err(CmmError::InvalidFormat(format!(
                    "Row index {} out of bounds for {} rows",
                    t.row, rows
                )));
            }
            if t.col >= cols {
                return Err(CmmError::InvalidFormat(format!(
                    "Column index {} out of bounds for {} columns",
                    t.col, cols
                )));
            }
            row_ptr[t.row + 1] += 1;
        }
        for i in 1..=rows {
            row_ptr[i] += row_ptr[i - 1];
        }

        let values = coords.iter().map(|t| t.value).collect();
        let col_indices = coords.iter().map(|t| t.col as u32).collect();
        Self::from_csr(rows, cols, values, col_indices, row_ptr)
    }

    /// Creates a CsrMatrix from CSR components, checking every structural invariant.
    pub fn from_csr(
        rows: usize,
        cols: usize,
        values: Vec<Complex32>,
        col_indices: Vec<u32>,
        row_ptr: Vec<u32>,
    ) -> Result<Self, CmmError> {
        if row_ptr.len() != rows + 1 {
            return Err(CmmError::InvalidFormat(
                "row_ptr length must be rows + 1".to_string(),
            ));
        }
        if values.len() != col_indices.len() {
            return Err(CmmError::InvalidFormat(
                "values and col_indices must have the same length".to_string(),
            ));
        }
        check_index_range(values.len(), cols)?;
        if row_ptr[0] != 0 {
            return Err(CmmError::InvalidFormat(
                "First element of row_ptr must be zero".to_string(),
            ));
        }
        if row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(CmmError::InvalidFormat(
                "row_ptr must be non-decreasing".to_string(),
            ));
        }
        if row_ptr[rows] as usize != values.len() {
            return Err(CmmError::InvalidFormat(
                "Last element of row_ptr must equal the number of non-zero values".to_string(),
            ));
        }
        if col_indices.iter().any(|&c| c as usize >= cols) {
            return Err(CmmError::InvalidFormat(
                "Column index out of bounds".to_string(),
            ));
        }

        Ok(CsrMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        })
    }

    /// Collects the non-zero entries of a dense matrix.
    pub fn from_dense(dense: &DenseMatrix) -> Result<Self, CmmError> {
        let (rows, cols) = dense.dims();
        let mut triplets = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                let v = dense.get(r, c);
                if !v.is_zero() {
                    triplets.push(Triplet::new(r, c, v));
                }
            }
        }
        Self::from_triplets(rows, cols, triplets)
    }

    /// Returns the dimensions of the matrix (rows, cols).
    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns the number of non-zero elements.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[Complex32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [Complex32] {
        &mut self.values
    }

    pub fn col_indices(&self) -> &[u32] {
        &self.col_indices
    }

    pub fn row_ptr(&self) -> &[u32] {
        &self.row_ptr
    }

    /// Borrowed form consumed by the kernels.
    pub fn view(&self) -> CsrView<'_> {
        CsrView {
            rows: self.rows,
            cols: self.cols,
            values: &self.values,
            col_indices: &self.col_indices,
            row_ptr: &self.row_ptr,
        }
    }

    /// Gets the value at a specific row and column, summing repeated entries.
    /// This is inefficient for sparse matrices, primarily for testing/debugging.
    pub fn get(&self, row: usize, col: usize) -> Option<Complex32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let range = self.view().row_range(row);
        let mut found = None;
        for i in range {
            if self.col_indices[i] as usize == col {
                *found.get_or_insert(Complex32::zero()) += self.values[i];
            }
        }
        found
    }

    pub fn iter(&self) -> CsrIter<'_> {
        CsrIter {
            matrix: self,
            row: 0,
            pos: 0,
        }
    }

    /// Materializes the matrix as a packed dense matrix.
    pub fn to_dense(&self) -> DenseMatrix {
        let mut dense = DenseMatrix::zeros(self.rows, self.cols);
        for t in self.iter() {
            let v = dense.get(t.row, t.col) + t.value;
            dense.set(t.row, t.col, v);
        }
        dense
    }

    /// Conjugate transpose as a new `cols x rows` CSR matrix.
    pub fn adjoint(&self) -> CsrMatrix {
        let mut row_ptr = vec![0u32; self.cols + 1];
        for &c in &self.col_indices {
            row_ptr[c as usize + 1] += 1;
        }
        for i in 1..=self.cols {
            row_ptr[i] += row_ptr[i - 1];
        }
        let mut next = row_ptr.clone();
        let mut values = vec![Complex32::zero(); self.nnz()];
        let mut col_indices = vec![0u32; self.nnz()];
        for t in self.iter() {
            let slot = &mut next[t.col];
            values[*slot as usize] = t.value.conj();
            col_indices[*slot as usize] = t.row as u32;
            *slot += 1;
        }
        CsrMatrix {
            rows: self.cols,
            cols: self.rows,
            values,
            col_indices,
            row_ptr,
        }
    }
}

impl Matrix for CsrMatrix {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nbytes(&self) -> usize {
        self.values.len() * mem::size_of::<Complex32>()
            + (self.col_indices.len() + self.row_ptr.len()) * mem::size_of::<u32>()
    }
}

/// Borrowed CSR operand: three parallel buffers plus the logical shape.
#[derive(Debug, Clone, Copy)]
pub struct CsrView<'a> {
    rows: usize,
    cols: usize,
    values: &'a [Complex32],
    col_indices: &'a [u32],
    row_ptr: &'a [u32],
}

impl<'a> CsrView<'a> {
    /// Wraps caller buffers without validation; structural errors are caught in debug builds only.
    pub fn from_raw_parts(
        rows: usize,
        cols: usize,
        values: &'a [Complex32],
        col_indices: &'a [u32],
        row_ptr: &'a [u32],
    ) -> Self {
        debug_assert_eq!(row_ptr.len(), rows + 1);
        debug_assert_eq!(values.len(), col_indices.len());
        debug_assert!(row_ptr.last().is_some_and(|&nnz| nnz as usize <= values.len()));
        Self {
            rows,
            cols,
            values,
            col_indices,
            row_ptr,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn values(&self) -> &'a [Complex32] {
        self.values
    }

    pub fn col_indices(&self) -> &'a [u32] {
        self.col_indices
    }

    pub fn row_ptr(&self) -> &'a [u32] {
        self.row_ptr
    }

    /// Positions of row `row` inside `values` / `col_indices`.
    #[inline(always)]
    pub fn row_range(&self, row: usize) -> Range<usize> {
        self.row_ptr[row] as usize..self.row_ptr[row + 1] as usize
    }
}

/// A single `(row, col, value)` coordinate entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: Complex32,
}

impl Triplet {
    pub fn new(row: usize, col: usize, value: Complex32) -> Self {
        Triplet { row, col, value }
    }
}

/// Iterates the stored entries of a [`CsrMatrix`] in row order.
pub struct CsrIter<'a> {
    matrix: &'a CsrMatrix,
    row: usize,
    pos: usize,
}

impl Iterator for CsrIter<'_> {
    type Item = Triplet;

    fn next(&mut self) -> Option<Self::Item> {
        while self.row < self.matrix.rows {
            if self.pos < self.matrix.row_ptr[self.row + 1] as usize {
                let pos = self.pos;
                self.pos += 1;
                return Some(Triplet {
                    row: self.row,
                    col: self.matrix.col_indices[pos] as usize,
                    value: self.matrix.values[pos],
                });
            }
            self.row += 1;
        }
        None
    }
}

/// Column indices and row pointers are stored as `u32`.
fn check_index_range(nnz: usize, cols: usize) -> Result<(), CmmError> {
    if u32::try_from(nnz).is_err() || u32::try_from(cols).is_err() {
        return Err(CmmError::InvalidDimensions(
            "Matrix is too large for 32-bit indices".to_string(),
        ));
    }
    Ok(())
}

/// The three device buffers of one CSR operand.
#[derive(Debug)]
pub(crate) struct CsrBuffers {
    pub(crate) values: wgpu::Buffer,
    pub(crate) col_indices: wgpu::Buffer,
    pub(crate) row_pointers: wgpu::Buffer,
}

/// Represents a complex CSR matrix stored on the GPU.
///
/// The conjugate transpose can be uploaded alongside the forward structure so the
/// adjoint product runs with one writer per output row.
#[derive(Debug)]
pub struct GpuCsrMatrix {
    rows: usize,
    cols: usize,
    nnz: usize,
    forward: CsrBuffers,
    adjoint: Option<CsrBuffers>,
    pub(crate) context: Arc<GpuContext>,
}

impl Matrix for GpuCsrMatrix {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nbytes(&self) -> usize {
        let per_copy = self.nnz * (mem::size_of::<Complex32>() + mem::size_of::<u32>());
        let forward = per_copy + (self.rows + 1) * mem::size_of::<u32>();
        let adjoint = self
            .adjoint
            .as_ref()
            .map_or(0, |_| per_copy + (self.cols + 1) * mem::size_of::<u32>());
        forward + adjoint
    }
}

impl GpuCsrMatrix {
    /// Internal constructor used by GpuDevice.
    pub(crate) fn new_internal(
        rows: usize,
        cols: usize,
        nnz: usize,
        forward: CsrBuffers,
        adjoint: Option<CsrBuffers>,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            rows,
            cols,
            nnz,
            forward,
            adjoint,
            context,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// Whether the conjugate transpose was uploaded with the matrix.
    pub fn has_adjoint(&self) -> bool {
        self.adjoint.is_some()
    }

    pub(crate) fn forward_buffers(&self) -> &CsrBuffers {
        &self.forward
    }

    pub(crate) fn adjoint_buffers(&self) -> Option<&CsrBuffers> {
        self.adjoint.as_ref()
    }

    /// Downloads the forward structure.
    pub async fn read_contents(&self) -> Result<CsrMatrix, CmmError> {
        let buffers = &self.forward;
        let values = self.context.read_buffer_to_cpu(&buffers.values, self.nnz).await?;
        let col_indices = self
            .context
            .read_buffer_to_cpu(&buffers.col_indices, self.nnz)
            .await?;
        let row_ptr = self
            .context
            .read_buffer_to_cpu(&buffers.row_pointers, self.rows + 1)
            .await?;
        CsrMatrix::from_csr(self.rows, self.cols, values, col_indices, row_ptr)
    }

    /// Replaces the stored matrix with one of the same shape and number of
    /// non-zeros, refreshing the uploaded adjoint as well.
    pub async fn write_contents(&self, matrix: &CsrMatrix) -> Result<(), CmmError> {
        if matrix.dims() != (self.rows, self.cols) || matrix.nnz() != self.nnz {
            return Err(CmmError::InvalidDimensions(format!(
                "Cannot write a {:?} matrix with {} non-zeros into a {:?} GpuCsrMatrix with {}",
                matrix.dims(),
                matrix.nnz(),
                (self.rows, self.cols),
                self.nnz
            )));
        }
        write_csr(&self.context, &self.forward, matrix).await?;
        if let Some(adjoint) = &self.adjoint {
            write_csr(&self.context, adjoint, &matrix.adjoint()).await?;
        }
        Ok(())
    }
}

async fn write_csr(
    context: &GpuContext,
    buffers: &CsrBuffers,
    matrix: &CsrMatrix,
) -> Result<(), CmmError> {
    context.write_buffer(&buffers.values, matrix.values()).await?;
    context.write_buffer(&buffers.col_indices, matrix.col_indices()).await?;
    context.write_buffer(&buffers.row_pointers, matrix.row_ptr()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f32, im: f32) -> Complex32 {
        Complex32::new(re, im)
    }

    // [ 1, 0, 2i, 0 ]
    // [ 0, 3, 0,  4 ]
    // [ 0, 0, 5,  0 ]
    fn sample() -> CsrMatrix {
        CsrMatrix::from_csr(
            3,
            4,
            vec![c(1.0, 0.0), c(0.0, 2.0), c(3.0, 0.0), c(4.0, 0.0), c(5.0, 0.0)],
            vec![0, 2, 1, 3, 2],
            vec![0, 2, 4, 5],
        )
        .unwrap()
    }

    #[test]
    fn test_csr_matrix_new() {
        let matrix = CsrMatrix::new(3, 4);
        assert_eq!(matrix.dims(), (3, 4));
        assert_eq!(matrix.nnz(), 0);
        assert_eq!(matrix.row_ptr, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_csr_matrix_from_csr_valid() {
        let matrix = sample();
        assert_eq!(matrix.dims(), (3, 4));
        assert_eq!(matrix.nnz(), 5);
        assert_eq!(matrix.view().row_range(1), 2..4);
    }

    #[test]
    fn test_csr_matrix_from_csr_invalid_row_ptr_len() {
        let matrix = CsrMatrix::from_csr(3, 4, vec![c(1.0, 0.0)], vec![0], vec![0, 1]);
        match matrix.unwrap_err() {
            CmmError::InvalidFormat(msg) => assert!(msg.contains("row_ptr length")),
            e => panic!("Expected InvalidFormat error, got {e:?}"),
        }
    }

    #[test]
    fn test_csr_matrix_from_csr_invalid_last_row_ptr() {
        let matrix = CsrMatrix::from_csr(
            3,
            4,
            vec![c(1.0, 0.0), c(2.0, 0.0)],
            vec![0, 1],
            vec![0, 1, 1, 1],
        );
        match matrix.unwrap_err() {
            CmmError::InvalidFormat(msg) => assert!(msg.contains("Last element of row_ptr")),
            e => panic!("Expected InvalidFormat error, got {e:?}"),
        }
    }

    #[test]
    fn test_csr_matrix_from_csr_decreasing_row_ptr() {
        let matrix = CsrMatrix::from_csr(
            2,
            2,
            vec![c(1.0, 0.0), c(2.0, 0.0)],
            vec![0, 1],
            vec![0, 2, 1],
        );
        assert!(matches!(matrix, Err(CmmError::InvalidFormat(_))));
    }

    #[test]
    fn test_csr_matrix_from_csr_invalid_col_index() {
        let matrix = CsrMatrix::from_csr(
            2,
            3,
            vec![c(1.0, 0.0), c(2.0, 0.0)],
            vec![0, 3],
            vec![0, 1, 2],
        );
        match matrix.unwrap_err() {
            CmmError::InvalidFormat(msg) => assert!(msg.contains("Column index out of bounds")),
            e => panic!("Expected InvalidFormat error, got {e:?}"),
        }
    }

    #[test]
    fn test_csr_matrix_get() {
        let matrix = sample();
        assert_eq!(matrix.get(0, 0), Some(c(1.0, 0.0)));
        assert_eq!(matrix.get(0, 2), Some(c(0.0, 2.0)));
        assert_eq!(matrix.get(1, 3), Some(c(4.0, 0.0)));
        assert_eq!(matrix.get(0, 1), None);
        assert_eq!(matrix.get(2, 3), None);
        assert_eq!(matrix.get(3, 0), None);
        assert_eq!(matrix.get(0, 4), None);
    }

    #[test]
    fn test_from_triplets_sorts_and_keeps_duplicates() {
        let matrix = CsrMatrix::from_triplets(
            2,
            2,
            vec![
                Triplet::new(1, 0, c(3.0, 0.0)),
                Triplet::new(0, 1, c(1.0, 0.0)),
                Triplet::new(0, 1, c(0.0, 1.0)),
            ],
        )
        .unwrap();
        assert_eq!(matrix.row_ptr(), &[0, 2, 3]);
        assert_eq!(matrix.get(0, 1), Some(c(1.0, 1.0)));
        assert_eq!(matrix.to_dense().get(0, 1), c(1.0, 1.0));
    }

    #[test]
    fn test_from_triplets_rejects_out_of_bounds() {
        let err = CsrMatrix::from_triplets(2, 2, vec![Triplet::new(0, 2, c(1.0, 0.0))]);
        assert!(matches!(err, Err(CmmError::InvalidFormat(_))));
    }

    #[test]
    fn test_constructors_reject_columns_beyond_u32() {
        let cols = u32::MAX as usize + 1;
        let err = CsrMatrix::from_csr(1, cols, Vec::new(), Vec::new(), vec![0, 0]);
        assert!(matches!(err, Err(CmmError::InvalidDimensions(_))));
        let err = CsrMatrix::from_triplets(1, cols, Vec::new());
        assert!(matches!(err, Err(CmmError::InvalidDimensions(_))));
    }

    #[test]
    fn test_dense_round_trip() {
        let matrix = sample();
        let dense = matrix.to_dense();
        assert_eq!(dense.get(1, 1), c(3.0, 0.0));
        assert_eq!(dense.get(2, 0), c(0.0, 0.0));
        assert_eq!(CsrMatrix::from_dense(&dense).unwrap(), matrix);
    }

    #[test]
    fn test_iter_skips_empty_rows() {
        let matrix =
            CsrMatrix::from_csr(3, 2, vec![c(1.0, 0.0)], vec![1], vec![0, 0, 0, 1]).unwrap();
        let entries: Vec<Triplet> = matrix.iter().collect();
        assert_eq!(entries, vec![Triplet::new(2, 1, c(1.0, 0.0))]);
    }

    #[test]
    fn test_adjoint_is_conjugate_transpose() {
        let matrix = sample();
        let adjoint = matrix.adjoint();
        assert_eq!(adjoint.dims(), (4, 3));
        for r in 0..3 {
            for col in 0..4 {
                assert_eq!(
                    adjoint.get(col, r),
                    matrix.get(r, col).map(|v| v.conj())
                );
            }
        }
        assert_eq!(adjoint.adjoint(), matrix);
    }
}
