use crate::complex::Complex32;
use crate::context::GpuContext;
use crate::dense_matrix::DenseMatrix;
use crate::error::CmmError;
use crate::traits::Matrix;
use num_traits::Zero;
use std::mem;
use std::sync::Arc;

/// Offsets are `i32`, so every strip index must fit one.
fn check_stride(stride: usize) -> Result<(), CmmError> {
    if i32::try_from(stride).is_err() {
        return Err(CmmError::InvalidDimensions(
            "Matrix is too large for 32-bit diagonal offsets".to_string(),
        ));
    }
    Ok(())
}

/// Complex sparse matrix stored by diagonals (DIA format) on the CPU.
///
/// Diagonal `d` holds the entries with `col - row == offsets[d]`. Its strip is
/// `max(rows, cols)` elements long and indexed by column, so entry `(row, col)`
/// lives at `data[d * stride + col]`. Offsets may be unsorted and may repeat;
/// repeated offsets add up.
#[derive(Debug, Clone, PartialEq)]
pub struct DiaMatrix {
    rows: usize,
    cols: usize,
    pub(crate) offsets: Vec<i32>,
    pub(crate) data: Vec<Complex32>,
}

impl DiaMatrix {
    /// Matrix with no stored diagonals.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            offsets: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Creates a DiaMatrix from its offsets and `offsets.len() * max(rows, cols)` strip values.
    pub fn from_diagonals(
        rows: usize,
        cols: usize,
        offsets: Vec<i32>,
        data: Vec<Complex32>,
    ) -> Result<Self, CmmError> {
        let stride = rows.max(cols);
        check_stride(stride)?;
        if data.len() != offsets.len() * stride {
            return Err(CmmError::InvalidFormat(format!(
                "DIA data holds {} values, expected {} offsets x {} strip length",
                data.len(),
                offsets.len(),
                stride
            )));
        }
        Ok(Self {
            rows,
            cols,
            offsets,
            data,
        })
    }

    /// Collects every diagonal of `dense` that holds a non-zero value, in ascending offset order.
    pub fn from_dense(dense: &DenseMatrix) -> Result<Self, CmmError> {
        let (rows, cols) = dense.dims();
        let stride = rows.max(cols);
        check_stride(stride)?;
        let mut offsets = Vec::new();
        let mut data = Vec::new();
        for offset in -(rows as i64) + 1..cols as i64 {
            let mut strip = vec![Complex32::zero(); stride];
            let mut any = false;
            for (row, col) in diagonal_positions(rows, cols, offset) {
                let v = dense.get(row, col);
                if !v.is_zero() {
                    strip[col] = v;
                    any = true;
                }
            }
            if any {
                offsets.push(offset as i32);
                data.extend(strip);
            }
        }
        Self::from_diagonals(rows, cols, offsets, data)
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

    /// Length of one diagonal strip.
    pub fn stride(&self) -> usize {
        self.rows.max(self.cols)
    }

    pub fn n_offsets(&self) -> usize {
        self.offsets.len()
    }

    pub fn offsets(&self) -> &[i32] {
        &self.offsets
    }

    pub fn data(&self) -> &[Complex32] {
        &self.data
    }

    pub fn view(&self) -> DiaView<'_> {
        DiaView {
            rows: self.rows,
            cols: self.cols,
            offsets: &self.offsets,
            data: &self.data,
        }
    }

    /// Value at `(row, col)`, summing repeated offsets; `None` when no diagonal covers it.
    pub fn get(&self, row: usize, col: usize) -> Option<Complex32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let offset = col as i64 - row as i64;
        let stride = self.stride();
        let mut found = None;
        for (d, &o) in self.offsets.iter().enumerate() {
            if o as i64 == offset {
                *found.get_or_insert(Complex32::zero()) += self.data[d * stride + col];
            }
        }
        found
    }

    pub fn to_dense(&self) -> DenseMatrix {
        let mut dense = DenseMatrix::zeros(self.rows, self.cols);
        let stride = self.stride();
        for (d, &offset) in self.offsets.iter().enumerate() {
            for (row, col) in diagonal_positions(self.rows, self.cols, offset as i64) {
                let v = dense.get(row, col) + self.data[d * stride + col];
                dense.set(row, col, v);
            }
        }
        dense
    }
}

/// In-bounds `(row, col)` positions of the diagonal `col - row == offset`.
fn diagonal_positions(rows: usize, cols: usize, offset: i64) -> impl Iterator<Item = (usize, usize)> {
    let first_row = (-offset).max(0);
    let last_row = (rows as i64).min(cols as i64 - offset);
    (first_row..last_row.max(first_row)).map(move |r| (r as usize, (r + offset) as usize))
}

impl Matrix for DiaMatrix {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nbytes(&self) -> usize {
        self.data.len() * mem::size_of::<Complex32>() + self.offsets.len() * mem::size_of::<i32>()
    }
}

/// Borrowed DIA operand consumed by the kernels.
#[derive(Debug, Clone, Copy)]
pub struct DiaView<'a> {
    rows: usize,
    cols: usize,
    offsets: &'a [i32],
    data: &'a [Complex32],
}

impl<'a> DiaView<'a> {
    /// Wraps caller buffers without validation; errors are caught in debug builds only.
    pub fn from_raw_parts(rows: usize, cols: usize, offsets: &'a [i32], data: &'a [Complex32]) -> Self {
        debug_assert!(data.len() >= offsets.len() * rows.max(cols));
        Self {
            rows,
            cols,
            offsets,
            data,
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

    pub fn stride(&self) -> usize {
        self.rows.max(self.cols)
    }

    pub fn offsets(&self) -> &'a [i32] {
        self.offsets
    }

    pub fn data(&self) -> &'a [Complex32] {
        self.data
    }
}

/// Represents a DIA matrix stored on the GPU.
#[derive(Debug)]
pub struct GpuDiaMatrix {
    rows: usize,
    cols: usize,
    n_offsets: usize,
    offsets_buffer: wgpu::Buffer,
    data_buffer: wgpu::Buffer,
    pub(crate) context: Arc<GpuContext>,
}

impl GpuDiaMatrix {
    /// Internal constructor used by GpuDevice.
    pub(crate) fn new_internal(
        rows: usize,
        cols: usize,
        n_offsets: usize,
        offsets_buffer: wgpu::Buffer,
        data_buffer: wgpu::Buffer,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            rows,
            cols,
            n_offsets,
            offsets_buffer,
            data_buffer,
            context,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn n_offsets(&self) -> usize {
        self.n_offsets
    }

    pub(crate) fn offsets_buffer(&self) -> &wgpu::Buffer {
        &self.offsets_buffer
    }

    pub(crate) fn data_buffer(&self) -> &wgpu::Buffer {
        &self.data_buffer
    }

    pub async fn read_contents(&self) -> Result<DiaMatrix, CmmError> {
        let stride = self.rows.max(self.cols);
        let offsets = self
            .context
            .read_buffer_to_cpu(&self.offsets_buffer, self.n_offsets)
            .await?;
        let data = self
            .context
            .read_buffer_to_cpu(&self.data_buffer, self.n_offsets * stride)
            .await?;
        DiaMatrix::from_diagonals(self.rows, self.cols, offsets, data)
    }

    /// Overwrites offsets and strips; the shape and offset count must match.
    pub async fn write_contents(&self, matrix: &DiaMatrix) -> Result<(), CmmError> {
        if matrix.dims() != (self.rows, self.cols) || matrix.n_offsets() != self.n_offsets {
            return Err(CmmError::InvalidDimensions(format!(
                "Cannot write a {:?} matrix with {} offsets into a {:?} GpuDiaMatrix with {}",
                matrix.dims(),
                matrix.n_offsets(),
                (self.rows, self.cols),
                self.n_offsets
            )));
        }
        self.context
            .write_buffer(&self.offsets_buffer, matrix.offsets())
            .await?;
        self.context.write_buffer(&self.data_buffer, matrix.data()).await
    }
}

impl Matrix for GpuDiaMatrix {
    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn nbytes(&self) -> usize {
        self.n_offsets * (self.rows.max(self.cols) * mem::size_of::<Complex32>() + mem::size_of::<i32>())
    }
}
