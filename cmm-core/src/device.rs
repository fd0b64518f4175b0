use crate::complex::{as_interleaved_mut, Complex32};
use crate::context::{GpuContext, GpuDeviceOptions};
use crate::dense_matrix::{DenseMatrix, GpuDenseMatrix};
use crate::dia_matrix::{DiaMatrix, DiaView, GpuDiaMatrix};
use crate::error::CmmError;
use crate::kernels::{check_onemm, check_product, cpu};
use crate::layout::{DenseView, DenseViewMut, Transpose};
use crate::ops;
use crate::sparse_matrix::{CsrBuffers, CsrMatrix, CsrView, GpuCsrMatrix};
use crate::traits::Matrix;
use crate::vector::GpuRealBuffer;
use bytemuck::Pod;
use cfg_if::cfg_if;
#[cfg(feature = "wasm")]
use wasm_bindgen::prelude::*;
use std::{borrow::Cow, fmt::Debug, mem, sync::Arc};

/// Execution context handed to the kernels (CPU or GPU).
pub trait ComputeContext: Debug {
    /// Short name used in log output.
    fn label(&self) -> &'static str;
}

/// Represents a CPU execution device.
///
/// Every method validates shapes before running the reference kernel.
#[derive(Debug, Clone, Default)]
pub struct CpuDevice {}

impl ComputeContext for CpuDevice {
    fn label(&self) -> &'static str {
        "cpu"
    }
}

impl CpuDevice {
    /// `Y := alpha * 1_{M x K} * X + beta * Y`.
    pub fn onemm(
        &self,
        alpha: Complex32,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
    ) -> Result<(), CmmError> {
        check_onemm(x.dims(), y.dims())?;
        cpu::onemm(alpha, x, beta, y);
        Ok(())
    }

    /// Dense `Y := alpha * op(A) * X + beta * Y`.
    pub fn gemm(
        &self,
        alpha: Complex32,
        a: DenseView<'_>,
        op: Transpose,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
    ) -> Result<(), CmmError> {
        check_product("gemm", a.dims(), op == Transpose::ConjTrans, x.dims(), y.dims())?;
        cpu::gemm(alpha, a, op, x, beta, y);
        Ok(())
    }

    pub fn exw_csrmm(
        &self,
        alpha: Complex32,
        a: CsrView<'_>,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
    ) -> Result<(), CmmError> {
        check_product("exw_csrmm", a.dims(), false, x.dims(), y.dims())?;
        cpu::exw_csrmm(self, alpha, a, x, beta, y);
        Ok(())
    }

    pub fn csrmm(
        &self,
        alpha: Complex32,
        a: CsrView<'_>,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        adjoint: bool,
    ) -> Result<(), CmmError> {
        check_product("csrmm", a.dims(), adjoint, x.dims(), y.dims())?;
        cpu::csrmm(self, alpha, a, x, beta, y, adjoint);
        Ok(())
    }

    pub fn diamm(
        &self,
        alpha: Complex32,
        a: DiaView<'_>,
        x: DenseView<'_>,
        beta: Complex32,
        y: DenseViewMut<'_>,
        adjoint: bool,
    ) -> Result<(), CmmError> {
        check_product("diamm", a.dims(), adjoint, x.dims(), y.dims())?;
        cpu::diamm(alpha, a, x, beta, y, adjoint);
        Ok(())
    }

    pub fn clamp_max(&self, val: f32, a: &mut [f32]) {
        cpu::clamp_max(val, a);
    }

    /// Clamps the real and imaginary parts of every stored element (padding included).
    pub fn clamp_max_interleaved(&self, val: f32, a: &mut DenseMatrix) {
        cpu::clamp_max(val, as_interleaved_mut(a.data_mut()));
    }

    pub fn scale(&self, alpha: Complex32, y: DenseViewMut<'_>) {
        cpu::scale(alpha, y);
    }

    pub fn axpy(&self, alpha: Complex32, x: &[Complex32], y: &mut [Complex32]) -> Result<(), CmmError> {
        check_lengths("axpy", x.len(), y.len())?;
        cpu::axpy(alpha, x, y);
        Ok(())
    }

    pub fn dotc(&self, x: &[Complex32], y: &[Complex32]) -> Result<Complex32, CmmError> {
        check_lengths("dotc", x.len(), y.len())?;
        Ok(cpu::dotc(x, y))
    }

    pub fn norm2_squared(&self, x: &[Complex32]) -> f32 {
        cpu::norm2_squared(x)
    }
}

fn check_lengths(op: &str, x: usize, y: usize) -> Result<(), CmmError> {
    if x != y {
        return Err(CmmError::InvalidDimensions(format!(
            "Vector sizes for {} mismatch: {} != {}",
            op, x, y
        )));
    }
    Ok(())
}

fn check_same_dims(op: &str, x: (usize, usize), y: (usize, usize)) -> Result<(), CmmError> {
    if x != y {
        return Err(CmmError::InvalidDimensions(format!(
            "Operand shapes for {} mismatch: {:?} != {:?}",
            op, x, y
        )));
    }
    Ok(())
}

/// Bytes for a storage buffer. Zero-length bindings are invalid, so empty data
/// becomes a single zeroed element that the kernels never index.
fn storage_bytes<T: Pod>(data: &[T]) -> Cow<'_, [u8]> {
    if data.is_empty() {
        Cow::Owned(vec![0u8; mem::size_of::<T>()])
    } else {
        Cow::Borrowed(bytemuck::cast_slice(data))
    }
}

const MATRIX_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Represents a GPU execution device, holding the WGPU context.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "wasm", wasm_bindgen)]
pub struct GpuDevice {
    pub(crate) context: Arc<GpuContext>,
}

impl ComputeContext for GpuDevice {
    fn label(&self) -> &'static str {
        "gpu"
    }
}

#[cfg(feature = "wasm")]
#[wasm_bindgen]
impl GpuDevice {
    /// Creates a device with default adapter options from JavaScript.
    #[wasm_bindgen(js_name = create)]
    pub async fn create_js() -> Result<GpuDevice, JsValue> {
        Ok(Self::new().await?)
    }
}

impl GpuDevice {
    /// Creates a GpuDevice on a high-performance adapter.
    pub async fn new() -> Result<Self, CmmError> {
        Self::with_options(GpuDeviceOptions::default()).await
    }

    pub async fn with_options(options: GpuDeviceOptions) -> Result<Self, CmmError> {
        cfg_if! {
            if #[cfg(feature = "wasm")] {
                let context = GpuContext::new_wasm(options).await?;
            } else {
                let context = GpuContext::new(options).await?;
            }
        }
        log::info!("GpuDevice created successfully");
        Ok(Self {
            context: Arc::new(context),
        })
    }

    fn check_same_device(&self, other: &Arc<GpuContext>, what: &str) -> Result<(), CmmError> {
        if Arc::ptr_eq(&self.context, other) {
            Ok(())
        } else {
            Err(CmmError::UnsupportedOperation(format!(
                "{} was created on a different GpuDevice",
                what
            )))
        }
    }

    // --- Resource Creation ---

    /// Uploads a dense matrix, keeping its leading dimension.
    pub fn create_dense_matrix(
        &self,
        label: &str,
        matrix: &DenseMatrix,
    ) -> Result<GpuDenseMatrix, CmmError> {
        ops::gpu_index(matrix.data().len(), "dense matrix length")?;
        let buffer = self.context.create_gpu_buffer_with_data(
            label,
            &storage_bytes(matrix.data()),
            MATRIX_USAGE,
        );
        Ok(GpuDenseMatrix::new_internal(
            buffer,
            matrix.rows(),
            matrix.cols(),
            matrix.ld(),
            MATRIX_USAGE,
            String::from(label),
            Arc::clone(&self.context),
        ))
    }

    /// Allocates a packed `rows x cols` matrix. wgpu zero-initializes new buffers.
    pub fn create_zeroed_dense_matrix(
        &self,
        label: &str,
        rows: usize,
        cols: usize,
    ) -> Result<GpuDenseMatrix, CmmError> {
        let len = rows * cols;
        ops::gpu_index(len, "dense matrix length")?;
        let byte_size = (len.max(1) * mem::size_of::<Complex32>()) as u64;
        let buffer = self
            .context
            .create_empty_buffer(label, byte_size, MATRIX_USAGE);
        Ok(GpuDenseMatrix::new_internal(
            buffer,
            rows,
            cols,
            rows,
            MATRIX_USAGE,
            String::from(label),
            Arc::clone(&self.context),
        ))
    }

    fn upload_csr(&self, label: &str, matrix: &CsrMatrix) -> CsrBuffers {
        CsrBuffers {
            values: self.context.create_gpu_buffer_with_data(
                &format!("{} values", label),
                &storage_bytes(matrix.values()),
                MATRIX_USAGE,
            ),
            col_indices: self.context.create_gpu_buffer_with_data(
                &format!("{} col indices", label),
                &storage_bytes(matrix.col_indices()),
                MATRIX_USAGE,
            ),
            row_pointers: self.context.create_gpu_buffer_with_data(
                &format!("{} row pointers", label),
                &storage_bytes(matrix.row_ptr()),
                MATRIX_USAGE,
            ),
        }
    }

    /// Uploads a CSR matrix. With `with_adjoint` its conjugate transpose is uploaded
    /// too, which `csrmm(.., adjoint = true)` requires.
    pub fn create_csr_matrix(
        &self,
        matrix: &CsrMatrix,
        with_adjoint: bool,
    ) -> Result<GpuCsrMatrix, CmmError> {
        let forward = self.upload_csr("GPU CSR", matrix);
        let adjoint = with_adjoint.then(|| self.upload_csr("GPU CSR adjoint", &matrix.adjoint()));
        Ok(GpuCsrMatrix::new_internal(
            matrix.rows(),
            matrix.cols(),
            matrix.nnz(),
            forward,
            adjoint,
            Arc::clone(&self.context),
        ))
    }

    pub fn create_dia_matrix(&self, matrix: &DiaMatrix) -> Result<GpuDiaMatrix, CmmError> {
        ops::gpu_index(matrix.data().len(), "DIA data length")?;
        let offsets_buffer = self.context.create_gpu_buffer_with_data(
            "GPU DIA offsets",
            &storage_bytes(matrix.offsets()),
            MATRIX_USAGE,
        );
        let data_buffer = self.context.create_gpu_buffer_with_data(
            "GPU DIA data",
            &storage_bytes(matrix.data()),
            MATRIX_USAGE,
        );
        Ok(GpuDiaMatrix::new_internal(
            matrix.rows(),
            matrix.cols(),
            matrix.n_offsets(),
            offsets_buffer,
            data_buffer,
            Arc::clone(&self.context),
        ))
    }

    pub fn create_real_buffer(&self, label: &str, data: &[f32]) -> Result<GpuRealBuffer, CmmError> {
        ops::gpu_index(data.len(), "real buffer length")?;
        let buffer =
            self.context
                .create_gpu_buffer_with_data(label, &storage_bytes(data), MATRIX_USAGE);
        Ok(GpuRealBuffer::new_internal(
            buffer,
            data.len(),
            MATRIX_USAGE,
            String::from(label),
            Arc::clone(&self.context),
        ))
    }

    // --- Operations ---

    pub async fn onemm(
        &self,
        alpha: Complex32,
        x: &GpuDenseMatrix,
        beta: Complex32,
        y: &mut GpuDenseMatrix,
    ) -> Result<(), CmmError> {
        check_onemm(x.dims(), y.dims())?;
        self.check_same_device(&x.context, "onemm operand")?;
        self.check_same_device(&y.context, "onemm output")?;
        ops::internal_onemm(&self.context, alpha, x, beta, y).await
    }

    pub async fn exw_csrmm(
        &self,
        alpha: Complex32,
        a: &GpuCsrMatrix,
        x: &GpuDenseMatrix,
        beta: Complex32,
        y: &mut GpuDenseMatrix,
    ) -> Result<(), CmmError> {
        self.csrmm(alpha, a, x, beta, y, false).await
    }

    pub async fn csrmm(
        &self,
        alpha: Complex32,
        a: &GpuCsrMatrix,
        x: &GpuDenseMatrix,
        beta: Complex32,
        y: &mut GpuDenseMatrix,
        adjoint: bool,
    ) -> Result<(), CmmError> {
        check_product("csrmm", a.dims(), adjoint, x.dims(), y.dims())?;
        self.check_same_device(&a.context, "csrmm matrix")?;
        self.check_same_device(&x.context, "csrmm operand")?;
        self.check_same_device(&y.context, "csrmm output")?;
        ops::internal_csrmm(&self.context, alpha, a, x, beta, y, adjoint).await
    }

    pub async fn diamm(
        &self,
        alpha: Complex32,
        a: &GpuDiaMatrix,
        x: &GpuDenseMatrix,
        beta: Complex32,
        y: &mut GpuDenseMatrix,
        adjoint: bool,
    ) -> Result<(), CmmError> {
        check_product("diamm", a.dims(), adjoint, x.dims(), y.dims())?;
        self.check_same_device(&a.context, "diamm matrix")?;
        self.check_same_device(&x.context, "diamm operand")?;
        self.check_same_device(&y.context, "diamm output")?;
        ops::internal_diamm(&self.context, alpha, a, x, beta, y, adjoint).await
    }

    pub async fn clamp_max(&self, val: f32, a: &mut GpuRealBuffer) -> Result<(), CmmError> {
        self.check_same_device(&a.context, "clamp_max buffer")?;
        ops::internal_clamp_max_real(&self.context, val, a).await
    }

    /// Clamps the real and imaginary parts of a complex matrix (padding included).
    pub async fn clamp_max_interleaved(
        &self,
        val: f32,
        a: &mut GpuDenseMatrix,
    ) -> Result<(), CmmError> {
        self.check_same_device(&a.context, "clamp_max matrix")?;
        ops::internal_clamp_max_interleaved(&self.context, val, a).await
    }

    /// `Y := alpha * X + beta * Y`; `Y` is not read when `beta` is zero.
    pub async fn axpby(
        &self,
        alpha: Complex32,
        x: &GpuDenseMatrix,
        beta: Complex32,
        y: &mut GpuDenseMatrix,
    ) -> Result<(), CmmError> {
        check_same_dims("axpby", x.dims(), y.dims())?;
        self.check_same_device(&x.context, "axpby operand")?;
        self.check_same_device(&y.context, "axpby output")?;
        ops::internal_axpby(&self.context, alpha, x, beta, y).await
    }

    pub async fn axpy(
        &self,
        alpha: Complex32,
        x: &GpuDenseMatrix,
        y: &mut GpuDenseMatrix,
    ) -> Result<(), CmmError> {
        self.axpby(alpha, x, Complex32::new(1.0, 0.0), y).await
    }

    /// `xᴴ y` over all logical elements; padding is ignored.
    pub async fn dotc(&self, x: &GpuDenseMatrix, y: &GpuDenseMatrix) -> Result<Complex32, CmmError> {
        check_same_dims("dotc", x.dims(), y.dims())?;
        self.check_same_device(&x.context, "dotc first operand")?;
        self.check_same_device(&y.context, "dotc second operand")?;
        ops::internal_dotc(&self.context, x, y).await
    }

    pub async fn norm2_squared(&self, x: &GpuDenseMatrix) -> Result<f32, CmmError> {
        Ok(self.dotc(x, x).await?.re)
    }

    // --- Utility ---

    /// Returns the current GPU transfer statistics.
    pub fn get_transfer_stats(&self) -> TransferStats {
        let (bytes_to_gpu, bytes_from_gpu) = self.context.get_transfer_stats();
        TransferStats {
            bytes_to_gpu,
            bytes_from_gpu,
        }
    }

    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "wasm", wasm_bindgen)]
pub struct TransferStats {
    pub bytes_to_gpu: u64,
    pub bytes_from_gpu: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse_matrix::CsrMatrix;

    fn c(re: f32, im: f32) -> Complex32 {
        Complex32::new(re, im)
    }

    #[test]
    fn test_cpu_device_rejects_mismatched_shapes() {
        let dev = CpuDevice::default();
        let a = CsrMatrix::new(3, 4);
        let x = DenseMatrix::zeros(3, 2);
        let mut y = DenseMatrix::zeros(3, 2);
        let err = dev.exw_csrmm(c(1.0, 0.0), a.view(), x.view(), c(0.0, 0.0), y.view_mut());
        assert!(matches!(err, Err(CmmError::InvalidDimensions(_))));

        // The same operands fit the adjoint product once the output has K rows.
        let mut y_adj = DenseMatrix::zeros(4, 2);
        assert!(dev
            .csrmm(c(1.0, 0.0), a.view(), x.view(), c(0.0, 0.0), y_adj.view_mut(), true)
            .is_ok());
    }

    #[test]
    fn test_cpu_device_onemm_and_gemm_shapes() {
        let dev = CpuDevice::default();
        let x = DenseMatrix::ones(4, 2);
        let mut y = DenseMatrix::zeros(3, 2);
        dev.onemm(c(1.0, 0.0), x.view(), c(0.0, 0.0), y.view_mut()).unwrap();
        assert!(y.data().iter().all(|v| *v == c(4.0, 0.0)));

        let mut wrong = DenseMatrix::zeros(3, 3);
        assert!(dev.onemm(c(1.0, 0.0), x.view(), c(0.0, 0.0), wrong.view_mut()).is_err());

        let a = DenseMatrix::ones(4, 3);
        let mut z = DenseMatrix::zeros(3, 2);
        dev.gemm(c(1.0, 0.0), a.view(), Transpose::ConjTrans, x.view(), c(0.0, 0.0), z.view_mut())
            .unwrap();
        assert!(dev
            .gemm(c(1.0, 0.0), a.view(), Transpose::NoTrans, x.view(), c(0.0, 0.0), z.view_mut())
            .is_err());
    }

    #[test]
    fn test_cpu_device_clamp_interleaved_covers_padding() {
        let dev = CpuDevice::default();
        let mut m = DenseMatrix::from_column_major(
            1,
            2,
            2,
            vec![c(-1.0, 1.0), c(-9.0, -9.0), c(2.0, -3.0), c(-9.0, 4.0)],
        )
        .unwrap();
        dev.clamp_max_interleaved(0.0, &mut m);
        assert_eq!(
            m.data(),
            &[c(0.0, 1.0), c(0.0, 0.0), c(2.0, 0.0), c(0.0, 4.0)]
        );
    }

    #[test]
    fn test_cpu_device_blas1_length_checks() {
        let dev = CpuDevice::default();
        let x = vec![c(1.0, 0.0); 3];
        let mut y = vec![c(0.0, 0.0); 2];
        assert!(dev.axpy(c(1.0, 0.0), &x, &mut y).is_err());
        assert!(dev.dotc(&x, &y).is_err());
        assert_eq!(dev.dotc(&x, &x).unwrap(), c(3.0, 0.0));
        assert_eq!(dev.norm2_squared(&x), 3.0);
    }

    #[test]
    fn test_storage_bytes_pads_empty_slices() {
        let empty: [Complex32; 0] = [];
        assert_eq!(storage_bytes(&empty).len(), mem::size_of::<Complex32>());
        let one = [7u32];
        assert_eq!(storage_bytes(&one).as_ref(), bytemuck::bytes_of(&7u32));
    }
}
