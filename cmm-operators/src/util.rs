//! Random test matrices.

use cmm_core::{CmmError, Complex32, CsrMatrix, DenseMatrix, Triplet};

/// Entries with real and imaginary parts uniform in `[-0.5, 0.5)`.
pub fn rand_dense(rng: &mut fastrand::Rng, rows: usize, cols: usize) -> DenseMatrix {
    DenseMatrix::from_fn(rows, cols, |_, _| rand_complex(rng))
}

/// Each position is non-zero with probability `density`.
pub fn rand_csr(
    rng: &mut fastrand::Rng,
    rows: usize,
    cols: usize,
    density: f32,
) -> Result<CsrMatrix, CmmError> {
    let mut triplets = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if rng.f32() < density {
                triplets.push(Triplet::new(row, col, rand_complex(rng)));
            }
        }
    }
    CsrMatrix::from_triplets(rows, cols, triplets)
}

fn rand_complex(rng: &mut fastrand::Rng) -> Complex32 {
    Complex32::new(rng.f32() - 0.5, rng.f32() - 0.5)
}
