//! Column-major strided views over caller-owned complex buffers.
//!
//! A view is a slice (bounds), a shape and a leading dimension (stride).
//! Element `(r, c)` lives at `data[r + c * ld]`. Checked constructors are used
//! at the API boundary; kernels trust the view and only `debug_assert!`.

use crate::complex::Complex32;
use crate::error::CmmError;
use std::ops::Range;

/// Operation applied to a dense operand before multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transpose {
    #[default]
    NoTrans,
    /// Conjugate transpose (adjoint).
    ConjTrans,
}

impl Transpose {
    pub fn from_adjoint(adjoint: bool) -> Self {
        if adjoint {
            Transpose::ConjTrans
        } else {
            Transpose::NoTrans
        }
    }
}

/// Number of elements a `rows x cols` operand with leading dimension `ld` spans.
#[inline]
pub fn required_len(rows: usize, cols: usize, ld: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        (cols - 1) * ld + rows
    }
}

fn check_layout(len: usize, rows: usize, cols: usize, ld: usize) -> Result<(), CmmError> {
    if ld < rows {
        return Err(CmmError::InvalidDimensions(format!(
            "Leading dimension ({}) must be at least the row count ({})",
            ld, rows
        )));
    }
    let needed = required_len(rows, cols, ld);
    if len < needed {
        return Err(CmmError::InvalidDimensions(format!(
            "Buffer of {} elements is too small for a {}x{} operand with ld {} (needs {})",
            len, rows, cols, ld, needed
        )));
    }
    Ok(())
}

/// Slice range covered by the sub-block `rows x cols` of an operand.
fn block_range(ld: usize, rows: &Range<usize>, cols: &Range<usize>, len: usize) -> Range<usize> {
    let (nr, nc) = (rows.len(), cols.len());
    let start = (rows.start + cols.start * ld).min(len);
    start..start + required_len(nr, nc, ld)
}

/// Read-only view of a column-major complex operand.
#[derive(Debug, Clone, Copy)]
pub struct DenseView<'a> {
    data: &'a [Complex32],
    rows: usize,
    cols: usize,
    ld: usize,
}

impl<'a> DenseView<'a> {
    /// Creates a view after checking that `data` covers the described operand.
    pub fn new(data: &'a [Complex32], rows: usize, cols: usize, ld: usize) -> Result<Self, CmmError> {
        check_layout(data.len(), rows, cols, ld)?;
        Ok(Self { data, rows, cols, ld })
    }

    /// Creates a view without validation. Layout errors are caught in debug builds only.
    pub fn new_unchecked(data: &'a [Complex32], rows: usize, cols: usize, ld: usize) -> Self {
        debug_assert!(check_layout(data.len(), rows, cols, ld).is_ok());
        Self { data, rows, cols, ld }
    }

    /// Tightly packed view (`ld == rows`).
    pub fn packed(data: &'a [Complex32], rows: usize, cols: usize) -> Result<Self, CmmError> {
        Self::new(data, rows, cols, rows)
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

    pub fn ld(&self) -> usize {
        self.ld
    }

    pub fn data(&self) -> &'a [Complex32] {
        self.data
    }

    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> Complex32 {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row + col * self.ld]
    }

    /// Column `col` as a contiguous slice of `rows` elements.
    #[inline(always)]
    pub fn column(&self, col: usize) -> &'a [Complex32] {
        debug_assert!(col < self.cols);
        if self.rows == 0 {
            return &[];
        }
        let start = col * self.ld;
        &self.data[start..start + self.rows]
    }

    pub fn is_contiguous(&self) -> bool {
        self.ld == self.rows || self.cols <= 1
    }

    /// Sub-block covering `rows x cols` of this view.
    pub fn subview(&self, rows: Range<usize>, cols: Range<usize>) -> Result<DenseView<'a>, CmmError> {
        if rows.end > self.rows || cols.end > self.cols || rows.start > rows.end || cols.start > cols.end {
            return Err(CmmError::InvalidDimensions(format!(
                "Sub-view [{:?}, {:?}] is outside a {}x{} operand",
                rows, cols, self.rows, self.cols
            )));
        }
        let range = block_range(self.ld, &rows, &cols, self.data.len());
        Ok(DenseView {
            data: &self.data[range],
            rows: rows.len(),
            cols: cols.len(),
            ld: self.ld,
        })
    }

    /// Reinterprets a contiguous operand with a new shape of the same size.
    pub fn reshape(&self, rows: usize, cols: usize) -> Result<DenseView<'a>, CmmError> {
        check_reshape(self.is_contiguous(), self.rows * self.cols, rows, cols)?;
        Ok(DenseView {
            data: &self.data[..rows * cols],
            rows,
            cols,
            ld: rows,
        })
    }

    /// Copies the operand into a packed vector (column-major, `ld == rows`).
    pub fn to_packed_vec(&self) -> Vec<Complex32> {
        (0..self.cols)
            .flat_map(|c| self.column(c).iter().copied())
            .collect()
    }
}

fn check_reshape(contiguous: bool, size: usize, rows: usize, cols: usize) -> Result<(), CmmError> {
    if !contiguous {
        return Err(CmmError::UnsupportedOperation(
            "Cannot reshape a strided (non-contiguous) operand".to_string(),
        ));
    }
    if rows * cols != size {
        return Err(CmmError::InvalidDimensions(format!(
            "Cannot reshape {} elements into {}x{}",
            size, rows, cols
        )));
    }
    Ok(())
}

/// In-out view of a column-major complex operand.
#[derive(Debug)]
pub struct DenseViewMut<'a> {
    data: &'a mut [Complex32],
    rows: usize,
    cols: usize,
    ld: usize,
}

impl<'a> DenseViewMut<'a> {
    pub fn new(data: &'a mut [Complex32], rows: usize, cols: usize, ld: usize) -> Result<Self, CmmError> {
        check_layout(data.len(), rows, cols, ld)?;
        Ok(Self { data, rows, cols, ld })
    }

    pub fn new_unchecked(data: &'a mut [Complex32], rows: usize, cols: usize, ld: usize) -> Self {
        debug_assert!(check_layout(data.len(), rows, cols, ld).is_ok());
        Self { data, rows, cols, ld }
    }

    pub fn packed(data: &'a mut [Complex32], rows: usize, cols: usize) -> Result<Self, CmmError> {
        Self::new(data, rows, cols, rows)
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

    pub fn ld(&self) -> usize {
        self.ld
    }

    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> Complex32 {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row + col * self.ld]
    }

    #[inline(always)]
    pub fn get_mut(&mut self, row: usize, col: usize) -> &mut Complex32 {
        debug_assert!(row < self.rows && col < self.cols);
        &mut self.data[row + col * self.ld]
    }

    #[inline(always)]
    pub fn column_mut(&mut self, col: usize) -> &mut [Complex32] {
        debug_assert!(col < self.cols);
        if self.rows == 0 {
            return &mut [];
        }
        let start = col * self.ld;
        &mut self.data[start..start + self.rows]
    }

    pub fn is_contiguous(&self) -> bool {
        self.ld == self.rows || self.cols <= 1
    }

    /// Read-only view of the same operand.
    pub fn as_view(&self) -> DenseView<'_> {
        DenseView {
            data: &*self.data,
            rows: self.rows,
            cols: self.cols,
            ld: self.ld,
        }
    }

    /// Shorter-lived mutable view of the same operand.
    pub fn reborrow(&mut self) -> DenseViewMut<'_> {
        DenseViewMut {
            data: &mut *self.data,
            rows: self.rows,
            cols: self.cols,
            ld: self.ld,
        }
    }

    pub fn subview_mut(&mut self, rows: Range<usize>, cols: Range<usize>) -> Result<DenseViewMut<'_>, CmmError> {
        if rows.end > self.rows || cols.end > self.cols || rows.start > rows.end || cols.start > cols.end {
            return Err(CmmError::InvalidDimensions(format!(
                "Sub-view [{:?}, {:?}] is outside a {}x{} operand",
                rows, cols, self.rows, self.cols
            )));
        }
        let range = block_range(self.ld, &rows, &cols, self.data.len());
        Ok(DenseViewMut {
            data: &mut self.data[range],
            rows: rows.len(),
            cols: cols.len(),
            ld: self.ld,
        })
    }

    pub fn reshape_mut(&mut self, rows: usize, cols: usize) -> Result<DenseViewMut<'_>, CmmError> {
        check_reshape(self.is_contiguous(), self.rows * self.cols, rows, cols)?;
        Ok(DenseViewMut {
            data: &mut self.data[..rows * cols],
            rows,
            cols,
            ld: rows,
        })
    }

    /// Sets every element of the operand (padding between columns is untouched).
    pub fn fill(&mut self, value: Complex32) {
        for c in 0..self.cols {
            self.column_mut(c).fill(value);
        }
    }
}
