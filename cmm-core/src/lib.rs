//! # cmm-core
//!
//! Single-precision complex matrix-multiply kernels over column-major operands:
//! products with a ones matrix (`onemm`), CSR (`exw_csrmm`, `csrmm`) and DIA
//! (`diamm`) sparse matrices, plus the real floor clamp (`clamp_max`).
//!
//! Every kernel has a CPU reference in [`kernels::cpu`] and a wgpu compute
//! shader reached through [`GpuDevice`]. Both devices validate shapes and
//! return [`CmmError`]; the raw kernels only `debug_assert!`.

pub mod complex;
pub(crate) mod context;
pub mod dense_matrix;
pub mod device;
pub mod dia_matrix;
pub mod error;
pub mod kernels;
pub mod layout;
mod ops;
pub mod sparse_matrix;
pub mod traits;
pub mod vector;

pub use complex::{complex_scalar, Complex32};
pub use context::GpuDeviceOptions;
pub use dense_matrix::{DenseMatrix, GpuDenseMatrix};
pub use device::{ComputeContext, CpuDevice, GpuDevice, TransferStats};
pub use dia_matrix::{DiaMatrix, DiaView, GpuDiaMatrix};
pub use error::CmmError;
pub use layout::{DenseView, DenseViewMut, Transpose};
pub use sparse_matrix::{CsrMatrix, CsrView, GpuCsrMatrix, Triplet};
pub use traits::Matrix;
pub use vector::GpuRealBuffer;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn wasm_init() {
    static START: std::sync::Once = std::sync::Once::new();
    START.call_once(|| {
        wasm_logger::init(wasm_logger::Config::new(log::Level::Info));
        std::panic::set_hook(Box::new(console_error_panic_hook::hook));
        log::info!("cmm-core WASM module initialized.");
    });
}
