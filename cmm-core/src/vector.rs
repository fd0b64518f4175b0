use crate::context::GpuContext;
use crate::error::CmmError;
use std::{mem, sync::Arc};

/// Real `f32` buffer on the GPU, the operand of `clamp_max`.
#[derive(Debug)]
pub struct GpuRealBuffer {
    buffer: wgpu::Buffer,
    len: usize,
    usage: wgpu::BufferUsages,
    label: String,
    pub(crate) context: Arc<GpuContext>,
}

impl GpuRealBuffer {
    /// Internal constructor used by GpuDevice.
    pub(crate) fn new_internal(
        buffer: wgpu::Buffer,
        len: usize,
        usage: wgpu::BufferUsages,
        label: String,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            buffer,
            len,
            usage,
            label,
            context,
        }
    }

    pub(crate) fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> u64 {
        (self.len * mem::size_of::<f32>()) as u64
    }

    pub fn usage(&self) -> wgpu::BufferUsages {
        self.usage
    }

    pub fn label(&self) -> &str {
        self.label.as_str()
    }

    pub async fn read_contents(&self) -> Result<Vec<f32>, CmmError> {
        self.context.read_buffer_to_cpu(self.inner(), self.len).await
    }

    pub async fn write_contents(&self, data: &[f32]) -> Result<(), CmmError> {
        if data.len() != self.len {
            return Err(CmmError::InvalidDimensions(format!(
                "Data length ({}) does not match GpuRealBuffer size ({})",
                data.len(),
                self.len
            )));
        }
        self.context.write_buffer(self.inner(), data).await
    }
}
