//! wgpu backend for the compute grid.
//!
//! Variables live in 4-channel float storage textures. Each kernel is a WGSL
//! compute shader following a fixed binding convention:
//! - `@binding(0)`: the kernel's uniform block
//! - `@binding(1)`: `texture_storage_2d<{{FORMAT}}, write>` output
//! - `@binding(2 + i)`: `texture_2d<f32>` input `i` (input 0 is the variable itself)
//!
//! `{{FORMAT}}` is replaced with the grid's storage format at compile time so
//! the same source serves full and half precision. Inputs are read with
//! `textureLoad` and clamped coordinates, matching the CPU backend.

use std::borrow::Cow;

use super::{GridBackend, GridError, GridExtent, Texel};
use crate::render::context::GpuContext;

/// Workgroup edge used by every grid kernel (`@workgroup_size(16, 16)`).
pub const WORKGROUP_SIZE: u32 = 16;

const FORMAT_PLACEHOLDER: &str = "{{FORMAT}}";
const TEXEL_BYTES: u32 = 16;

/// Storage precision of the grid textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridPrecision {
    /// `Rgba32Float`
    #[default]
    Full,
    /// `Rgba16Float`, the fallback when full precision is unavailable.
    Half,
}

impl GridPrecision {
    pub fn format(self) -> wgpu::TextureFormat {
        match self {
            GridPrecision::Full => wgpu::TextureFormat::Rgba32Float,
            GridPrecision::Half => wgpu::TextureFormat::Rgba16Float,
        }
    }

    fn wgsl_format(self) -> &'static str {
        match self {
            GridPrecision::Full => "rgba32float",
            GridPrecision::Half => "rgba16float",
        }
    }

    /// The next lower precision to retry with, if any.
    pub fn reduced(self) -> Option<Self> {
        match self {
            GridPrecision::Full => Some(GridPrecision::Half),
            GridPrecision::Half => None,
        }
    }
}

/// WGSL source of a grid kernel.
#[derive(Debug, Clone)]
pub struct WgslKernel {
    pub source: Cow<'static, str>,
    pub entry_point: Cow<'static, str>,
}

impl WgslKernel {
    pub fn new(source: impl Into<Cow<'static, str>>, entry_point: impl Into<Cow<'static, str>>) -> Self {
        Self {
            source: source.into(),
            entry_point: entry_point.into(),
        }
    }

    fn copy() -> Self {
        Self::new(include_str!("copy.wgsl"), "copy_texels")
    }
}

/// A grid texture on the GPU.
#[derive(Debug)]
pub struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    extent: GridExtent,
}

impl GpuTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Sampled view, bindable as `texture_2d<f32>` in render shaders.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn extent(&self) -> GridExtent {
        self.extent
    }
}

/// A compiled kernel with its layout and uniform buffer.
pub struct GpuProgram {
    label: String,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    inputs: usize,
}

/// Grid backend running kernels as wgpu compute passes.
///
/// Passes are recorded into one encoder and submitted on `flush()`, which
/// the grid calls once per step.
pub struct GpuBackend {
    context: GpuContext,
    precision: GridPrecision,
    encoder: Option<wgpu::CommandEncoder>,
    upload: Option<GpuProgram>,
    download: Option<GpuProgram>,
}

impl GpuBackend {
    /// Create a backend storing textures at `precision`.
    pub fn new(context: GpuContext, precision: GridPrecision) -> Self {
        Self {
            context,
            precision,
            encoder: None,
            upload: None,
            download: None,
        }
    }

    pub fn precision(&self) -> GridPrecision {
        self.precision
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Read a grid texture back to the CPU.
    ///
    /// Half-precision textures are first widened to `Rgba32Float` on the GPU.
    pub fn read_texels(&mut self, texture: &GpuTexture) -> Result<Vec<Texel>, GridError> {
        self.flush();
        let extent = texture.extent;

        let widened;
        let source = match self.precision {
            GridPrecision::Full => &texture.texture,
            GridPrecision::Half => {
                widened = self.float_texture("grid readback", extent, true);
                let widened_view = widened.create_view(&wgpu::TextureViewDescriptor::default());
                if self.download.is_none() {
                    let program = self.compile_for(
                        "grid download",
                        &WgslKernel::copy(),
                        1,
                        TEXEL_BYTES as usize,
                        GridPrecision::Full.wgsl_format(),
                    )?;
                    self.download = Some(program);
                }
                if let Some(program) = &self.download {
                    record_pass(
                        &self.context,
                        &mut self.encoder,
                        program,
                        &[&texture.view],
                        &widened_view,
                        extent,
                    );
                }
                self.flush();
                &widened
            }
        };

        let unpadded_bytes_per_row = extent.width * TEXEL_BYTES;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let staging_buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Grid Readback Buffer"),
            size: (padded_bytes_per_row * extent.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Grid Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(extent.height),
                },
            },
            extent_3d(extent),
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.context.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GridError::Readback(e.to_string()))?
            .map_err(|e| GridError::Readback(e.to_string()))?;

        let data = buffer_slice.get_mapped_range();
        let mut texels = Vec::with_capacity(extent.texel_count());
        for row in 0..extent.height {
            let start = (row * padded_bytes_per_row) as usize;
            let end = start + unpadded_bytes_per_row as usize;
            texels.extend(
                data[start..end]
                    .chunks_exact(TEXEL_BYTES as usize)
                    .map(bytemuck::pod_read_unaligned::<Texel>),
            );
        }
        drop(data);
        staging_buffer.unmap();

        Ok(texels)
    }

    fn float_texture(&self, label: &str, extent: GridExtent, storage: bool) -> wgpu::Texture {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if storage {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent_3d(extent),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage,
            view_formats: &[],
        })
    }

    fn write_float_texels(&self, texture: &wgpu::Texture, extent: GridExtent, texels: &[Texel]) {
        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(extent.width * TEXEL_BYTES),
                rows_per_image: Some(extent.height),
            },
            extent_3d(extent),
        );
    }

    /// Compile a kernel against an explicit storage format.
    fn compile_for(
        &self,
        label: &str,
        kernel: &WgslKernel,
        inputs: usize,
        params_size: usize,
        format: &str,
    ) -> Result<GpuProgram, GridError> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let source = kernel.source.replace(FORMAT_PLACEHOLDER, format);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: storage_format(format),
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
        ];
        for input in 0..inputs {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + input as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(kernel.entry_point.as_ref()),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        // Uniform blocks are padded to a 16-byte multiple.
        let buffer_size = params_size.max(1).div_ceil(16) * 16;
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: buffer_size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(GridError::KernelCompilation {
                label: label.to_string(),
                message: error.to_string(),
            });
        }

        Ok(GpuProgram {
            label: label.to_string(),
            pipeline,
            layout,
            params_buffer,
            inputs,
        })
    }
}

impl GridBackend for GpuBackend {
    type Texture = GpuTexture;
    type Kernel = WgslKernel;
    type Program = GpuProgram;

    fn check_format(&self) -> Result<(), GridError> {
        let format = self.precision.format();
        let features = self.context.adapter.get_texture_format_features(format);
        let required = wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING;
        if !features.allowed_usages.contains(required) {
            return Err(GridError::UnsupportedFormat {
                format,
                reason: format!("allowed usages are {:?}", features.allowed_usages),
            });
        }
        Ok(())
    }

    fn create_texture(
        &mut self,
        label: &str,
        extent: GridExtent,
        texels: &[Texel],
    ) -> Result<Self::Texture, GridError> {
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent_3d(extent),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.precision.format(),
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let grid_texture = GpuTexture {
            texture,
            view,
            extent,
        };
        self.write_texture(&grid_texture, texels)?;
        Ok(grid_texture)
    }

    fn compile(
        &mut self,
        label: &str,
        kernel: &Self::Kernel,
        inputs: usize,
        params_size: usize,
    ) -> Result<Self::Program, GridError> {
        self.compile_for(label, kernel, inputs, params_size, self.precision.wgsl_format())
    }

    fn dispatch(
        &mut self,
        program: &Self::Program,
        inputs: &[&Self::Texture],
        output: &Self::Texture,
        params: &[u8],
    ) {
        if !params.is_empty() {
            self.context.queue.write_buffer(&program.params_buffer, 0, params);
        }
        let views: Vec<&wgpu::TextureView> = inputs.iter().map(|t| &t.view).collect();
        record_pass(
            &self.context,
            &mut self.encoder,
            program,
            &views,
            &output.view,
            output.extent,
        );
    }

    fn write_texture(&mut self, texture: &Self::Texture, texels: &[Texel]) -> Result<(), GridError> {
        match self.precision {
            GridPrecision::Full => {
                self.write_float_texels(&texture.texture, texture.extent, texels);
            }
            GridPrecision::Half => {
                // Half-float bytes are produced on the GPU from an f32 staging copy.
                let staging = self.float_texture("grid upload", texture.extent, false);
                self.write_float_texels(&staging, texture.extent, texels);
                let staging_view = staging.create_view(&wgpu::TextureViewDescriptor::default());

                if self.upload.is_none() {
                    let program = self.compile_for(
                        "grid upload",
                        &WgslKernel::copy(),
                        1,
                        TEXEL_BYTES as usize,
                        self.precision.wgsl_format(),
                    )?;
                    self.upload = Some(program);
                }
                if let Some(program) = &self.upload {
                    record_pass(
                        &self.context,
                        &mut self.encoder,
                        program,
                        &[&staging_view],
                        &texture.view,
                        texture.extent,
                    );
                }
                self.flush();
            }
        }
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.context.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}

fn record_pass(
    context: &GpuContext,
    encoder: &mut Option<wgpu::CommandEncoder>,
    program: &GpuProgram,
    inputs: &[&wgpu::TextureView],
    output: &wgpu::TextureView,
    extent: GridExtent,
) {
    debug_assert_eq!(inputs.len(), program.inputs, "input count for '{}'", program.label);

    let mut entries = vec![
        wgpu::BindGroupEntry {
            binding: 0,
            resource: program.params_buffer.as_entire_binding(),
        },
        wgpu::BindGroupEntry {
            binding: 1,
            resource: wgpu::BindingResource::TextureView(output),
        },
    ];
    for (i, view) in inputs.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: 2 + i as u32,
            resource: wgpu::BindingResource::TextureView(view),
        });
    }
    let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(program.label.as_str()),
        layout: &program.layout,
        entries: &entries,
    });

    let encoder = encoder.get_or_insert_with(|| {
        context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Grid Compute Encoder"),
            })
    });

    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(program.label.as_str()),
        timestamp_writes: None,
    });
    compute_pass.set_pipeline(&program.pipeline);
    compute_pass.set_bind_group(0, &bind_group, &[]);
    compute_pass.dispatch_workgroups(
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
        1,
    );
}

fn storage_format(wgsl_format: &str) -> wgpu::TextureFormat {
    if wgsl_format == GridPrecision::Half.wgsl_format() {
        wgpu::TextureFormat::Rgba16Float
    } else {
        wgpu::TextureFormat::Rgba32Float
    }
}

fn extent_3d(extent: GridExtent) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: extent.width,
        height: extent.height,
        depth_or_array_layers: 1,
    }
}
