use std::fmt::Debug;

/// Generic trait representing a matrix.
/// Implementations can be sparse, dense, CPU-based, GPU-based.
pub trait Matrix: Debug {
    /// Returns the dimensions of the matrix as (rows, columns).
    fn dims(&self) -> (usize, usize);

    /// Number of bytes held by the matrix storage (values and indices).
    fn nbytes(&self) -> usize;

    /// Returns the number of rows.
    fn rows(&self) -> usize {
        self.dims().0
    }

    /// Returns the number of columns.
    fn cols(&self) -> usize {
        self.dims().1
    }

    /// Checks if the matrix is square.
    fn is_square(&self) -> bool {
        let (rows, cols) = self.dims();
        rows == cols
    }
}
