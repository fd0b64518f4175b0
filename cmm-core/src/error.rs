use thiserror::Error;

#[cfg(feature = "wasm")]
use wasm_bindgen::prelude::*;

#[derive(Error, Debug)]
pub enum CmmError {
    #[error("WGPU initialization failed: {0}")]
    WgpuInitError(String),

    #[error("WGPU error: {0}")]
    WgpuError(String),

    #[error("Shader compilation error: {0}")]
    ShaderError(String),

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    /// Index structure of a sparse matrix is inconsistent (row pointers, column indices, offsets).
    #[error("Invalid sparse format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Algorithm did not converge after {iterations} iterations (residual {residual})")]
    NonConvergence { iterations: usize, residual: f32 },

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "wasm")]
impl From<CmmError> for wasm_bindgen::JsValue {
    fn from(err: CmmError) -> Self {
        Self::from_str(&err.to_string())
    }
}
