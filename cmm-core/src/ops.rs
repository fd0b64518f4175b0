// GPU dispatch for the kernels. Shape validation happens in `GpuDevice`;
// everything here assumes consistent operands.

use crate::{
    complex::Complex32, context::GpuContext, dense_matrix::GpuDenseMatrix, dia_matrix::GpuDiaMatrix,
    error::CmmError, sparse_matrix::GpuCsrMatrix, vector::GpuRealBuffer,
};
use bytemuck::{Pod, Zeroable};
use std::mem;

const WORKGROUP_SIZE: u32 = 64;

/// Upper bound on the partial sums a `dotc` reduction reads back.
const DOTC_MAX_WORKGROUPS: u32 = 256;

const MM_COMMON_WGSL: &str = include_str!("./shaders/mm_common.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MmParams {
    alpha: [f32; 2],
    beta: [f32; 2],
    m: u32,
    n: u32,
    k: u32,
    ldx: u32,
    ldy: u32,
    n_offsets: u32,
    adjoint: u32,
    _padding: u32,
}

impl MmParams {
    fn new(alpha: Complex32, beta: Complex32) -> Self {
        Self {
            alpha: [alpha.re, alpha.im],
            beta: [beta.re, beta.im],
            ..Self::zeroed()
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ClampParams {
    val: f32,
    len: u32,
    _padding: [u32; 2],
}

/// The compute shaders this crate ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kernel {
    OneMm,
    Csrmm,
    Diamm,
    ClampMax,
    Axpby,
    Dotc,
}

impl Kernel {
    pub(crate) const ALL: [Kernel; 6] = [
        Kernel::OneMm,
        Kernel::Csrmm,
        Kernel::Diamm,
        Kernel::ClampMax,
        Kernel::Axpby,
        Kernel::Dotc,
    ];

    fn label(self) -> &'static str {
        match self {
            Kernel::OneMm => "onemm",
            Kernel::Csrmm => "csrmm",
            Kernel::Diamm => "diamm",
            Kernel::ClampMax => "clamp_max",
            Kernel::Axpby => "axpby",
            Kernel::Dotc => "dotc",
        }
    }

    /// Number of read-only storage buffers bound between the uniform and the output.
    fn read_only_inputs(self) -> usize {
        match self {
            Kernel::OneMm => 1,
            Kernel::Csrmm => 4,
            Kernel::Diamm => 3,
            Kernel::ClampMax => 0,
            Kernel::Axpby => 1,
            Kernel::Dotc => 2,
        }
    }

    /// Complete WGSL source; the multiply kernels are prefixed with the shared complex helpers.
    pub(crate) fn shader_source(self) -> String {
        let body = match self {
            Kernel::OneMm => include_str!("./shaders/onemm.wgsl"),
            Kernel::Csrmm => include_str!("./shaders/csrmm.wgsl"),
            Kernel::Diamm => include_str!("./shaders/diamm.wgsl"),
            Kernel::Axpby => include_str!("./shaders/axpby.wgsl"),
            Kernel::Dotc => include_str!("./shaders/dotc.wgsl"),
            Kernel::ClampMax => return include_str!("./shaders/clamp_max.wgsl").to_string(),
        };
        format!("{}\n{}", MM_COMMON_WGSL, body)
    }
}

/// Converts a size to the `u32` the shaders index with.
pub(crate) fn gpu_index(value: usize, what: &str) -> Result<u32, CmmError> {
    u32::try_from(value).map_err(|_| {
        CmmError::InvalidDimensions(format!(
            "{} ({}) exceeds the 32-bit range addressable by the GPU kernels",
            what, value
        ))
    })
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Builds the pipeline for `kernel`, binds `params` at 0, `inputs` at 1.., `output` last,
/// and submits a grid-stride dispatch covering `invocations` threads.
async fn dispatch(
    context: &GpuContext,
    kernel: Kernel,
    params: &[u8],
    inputs: &[&wgpu::Buffer],
    output: &wgpu::Buffer,
    invocations: u32,
) -> Result<(), CmmError> {
    debug_assert_eq!(inputs.len(), kernel.read_only_inputs());
    let device = &context.device;
    let label = kernel.label();

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let shader_source = kernel.shader_source();
    let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(shader_source.into()),
    });

    let params_buffer = context.create_gpu_buffer_with_data(
        &format!("{} params", label),
        params,
        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    );

    let mut layout_entries = Vec::with_capacity(inputs.len() + 2);
    layout_entries.push(wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: wgpu::BufferSize::new(params.len() as u64),
        },
        count: None,
    });
    for binding in 1..=inputs.len() as u32 {
        layout_entries.push(storage_entry(binding, true));
    }
    let output_binding = inputs.len() as u32 + 1;
    layout_entries.push(storage_entry(output_binding, false));

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &layout_entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader_module,
        entry_point: Some("main"),
        cache: None,
        compilation_options: Default::default(),
    });

    let mut bind_entries = Vec::with_capacity(inputs.len() + 2);
    bind_entries.push(wgpu::BindGroupEntry {
        binding: 0,
        resource: params_buffer.as_entire_binding(),
    });
    for (binding, buffer) in (1u32..).zip(inputs) {
        bind_entries.push(wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
    }
    bind_entries.push(wgpu::BindGroupEntry {
        binding: output_binding,
        resource: output.as_entire_binding(),
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &bind_group_layout,
        entries: &bind_entries,
    });

    if let Some(error) = device.pop_error_scope().await {
        return Err(CmmError::ShaderError(format!("{}: {}", label, error)));
    }

    let workgroups = invocations
        .div_ceil(WORKGROUP_SIZE)
        .clamp(1, context.max_workgroups_per_dimension());
    log::debug!(
        "Dispatching {} with {} workgroups for {} invocations",
        label,
        workgroups,
        invocations
    );

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(label),
    });
    {
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(workgroups, 1, 1);
    }
    context.queue.submit(std::iter::once(encoder.finish()));
    Ok(())
}

pub(crate) async fn internal_onemm(
    context: &GpuContext,
    alpha: Complex32,
    x: &GpuDenseMatrix,
    beta: Complex32,
    y: &mut GpuDenseMatrix,
) -> Result<(), CmmError> {
    let params = MmParams {
        m: gpu_index(y.rows(), "onemm output rows")?,
        n: gpu_index(y.cols(), "onemm columns")?,
        k: gpu_index(x.rows(), "onemm operand rows")?,
        ldx: gpu_index(x.ld(), "onemm operand leading dimension")?,
        ldy: gpu_index(y.ld(), "onemm output leading dimension")?,
        ..MmParams::new(alpha, beta)
    };
    let invocations = gpu_index(y.rows() * y.cols(), "onemm output size")?;
    if invocations == 0 {
        return Ok(());
    }
    dispatch(
        context,
        Kernel::OneMm,
        bytemuck::bytes_of(&params),
        &[x.inner()],
        y.inner(),
        invocations,
    )
    .await
}

/// With `adjoint` the precomputed conjugate-transpose buffers run through the same
/// exclusive-write kernel, so no two invocations ever write one element.
pub(crate) async fn internal_csrmm(
    context: &GpuContext,
    alpha: Complex32,
    a: &GpuCsrMatrix,
    x: &GpuDenseMatrix,
    beta: Complex32,
    y: &mut GpuDenseMatrix,
    adjoint: bool,
) -> Result<(), CmmError> {
    let buffers = if adjoint {
        a.adjoint_buffers().ok_or_else(|| {
            CmmError::UnsupportedOperation(
                "csrmm: matrix was uploaded without its adjoint".to_string(),
            )
        })?
    } else {
        a.forward_buffers()
    };
    let params = MmParams {
        m: gpu_index(y.rows(), "csrmm output rows")?,
        n: gpu_index(y.cols(), "csrmm columns")?,
        k: gpu_index(x.rows(), "csrmm operand rows")?,
        ldx: gpu_index(x.ld(), "csrmm operand leading dimension")?,
        ldy: gpu_index(y.ld(), "csrmm output leading dimension")?,
        ..MmParams::new(alpha, beta)
    };
    let invocations = gpu_index(y.rows() * y.cols(), "csrmm output size")?;
    if invocations == 0 {
        return Ok(());
    }
    dispatch(
        context,
        Kernel::Csrmm,
        bytemuck::bytes_of(&params),
        &[
            &buffers.row_pointers,
            &buffers.col_indices,
            &buffers.values,
            x.inner(),
        ],
        y.inner(),
        invocations,
    )
    .await
}

pub(crate) async fn internal_diamm(
    context: &GpuContext,
    alpha: Complex32,
    a: &GpuDiaMatrix,
    x: &GpuDenseMatrix,
    beta: Complex32,
    y: &mut GpuDenseMatrix,
    adjoint: bool,
) -> Result<(), CmmError> {
    let params = MmParams {
        m: gpu_index(a.rows(), "diamm matrix rows")?,
        n: gpu_index(y.cols(), "diamm columns")?,
        k: gpu_index(a.cols(), "diamm matrix columns")?,
        ldx: gpu_index(x.ld(), "diamm operand leading dimension")?,
        ldy: gpu_index(y.ld(), "diamm output leading dimension")?,
        n_offsets: gpu_index(a.n_offsets(), "diamm offset count")?,
        adjoint: adjoint as u32,
        ..MmParams::new(alpha, beta)
    };
    let invocations = gpu_index(y.rows() * y.cols(), "diamm output size")?;
    if invocations == 0 {
        return Ok(());
    }
    dispatch(
        context,
        Kernel::Diamm,
        bytemuck::bytes_of(&params),
        &[a.offsets_buffer(), a.data_buffer(), x.inner()],
        y.inner(),
        invocations,
    )
    .await
}

pub(crate) async fn internal_axpby(
    context: &GpuContext,
    alpha: Complex32,
    x: &GpuDenseMatrix,
    beta: Complex32,
    y: &mut GpuDenseMatrix,
) -> Result<(), CmmError> {
    let params = MmParams {
        m: gpu_index(y.rows(), "axpby rows")?,
        n: gpu_index(y.cols(), "axpby columns")?,
        ldx: gpu_index(x.ld(), "axpby operand leading dimension")?,
        ldy: gpu_index(y.ld(), "axpby output leading dimension")?,
        ..MmParams::new(alpha, beta)
    };
    let invocations = gpu_index(y.rows() * y.cols(), "axpby size")?;
    if invocations == 0 {
        return Ok(());
    }
    dispatch(
        context,
        Kernel::Axpby,
        bytemuck::bytes_of(&params),
        &[x.inner()],
        y.inner(),
        invocations,
    )
    .await
}

/// `xᴴ y` over two equally shaped operands: one partial sum per workgroup on the
/// device, the final sum on the host.
pub(crate) async fn internal_dotc(
    context: &GpuContext,
    x: &GpuDenseMatrix,
    y: &GpuDenseMatrix,
) -> Result<Complex32, CmmError> {
    let params = MmParams {
        m: gpu_index(x.rows(), "dotc rows")?,
        n: gpu_index(x.cols(), "dotc columns")?,
        ldx: gpu_index(x.ld(), "dotc first operand leading dimension")?,
        ldy: gpu_index(y.ld(), "dotc second operand leading dimension")?,
        ..MmParams::new(Complex32::new(1.0, 0.0), Complex32::new(0.0, 0.0))
    };
    let total = gpu_index(x.rows() * x.cols(), "dotc size")?;
    if total == 0 {
        return Ok(Complex32::new(0.0, 0.0));
    }
    let workgroups = total
        .div_ceil(WORKGROUP_SIZE)
        .clamp(1, DOTC_MAX_WORKGROUPS.min(context.max_workgroups_per_dimension()));
    let partials = context.create_empty_buffer(
        "dotc partials",
        workgroups as u64 * mem::size_of::<Complex32>() as u64,
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    );
    dispatch(
        context,
        Kernel::Dotc,
        bytemuck::bytes_of(&params),
        &[x.inner(), y.inner()],
        &partials,
        workgroups * WORKGROUP_SIZE,
    )
    .await?;
    let sums: Vec<Complex32> = context
        .read_buffer_to_cpu(&partials, workgroups as usize)
        .await?;
    Ok(sums.iter().sum())
}

/// Clamps the first `len` floats of `buffer` from below.
pub(crate) async fn internal_clamp_max(
    context: &GpuContext,
    val: f32,
    buffer: &wgpu::Buffer,
    len: usize,
) -> Result<(), CmmError> {
    let len = gpu_index(len, "clamp_max length")?;
    if len == 0 {
        return Ok(());
    }
    let params = ClampParams {
        val,
        len,
        _padding: [0; 2],
    };
    dispatch(
        context,
        Kernel::ClampMax,
        bytemuck::bytes_of(&params),
        &[],
        buffer,
        len,
    )
    .await
}

pub(crate) async fn internal_clamp_max_real(
    context: &GpuContext,
    val: f32,
    a: &mut GpuRealBuffer,
) -> Result<(), CmmError> {
    internal_clamp_max(context, val, a.inner(), a.len()).await
}

/// Interleaved view of a complex matrix: `2 * ld * cols` floats, padding included.
pub(crate) async fn internal_clamp_max_interleaved(
    context: &GpuContext,
    val: f32,
    a: &mut GpuDenseMatrix,
) -> Result<(), CmmError> {
    let len = a.len() * mem::size_of::<Complex32>() / mem::size_of::<f32>();
    internal_clamp_max(context, val, a.inner(), len).await
}
