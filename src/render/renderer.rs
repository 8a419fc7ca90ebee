//! wgpu scene renderer
//!
//! Draws a `Scene` into one of three color targets:
//! - the HDR frame (`RenderTarget::Screen`), later blitted to the output
//! - the `main` and `back` capture buffers, sized `viewport × capture_scale`
//!
//! All targets are `Rgba16Float`. Tone mapping is applied in the fragment
//! shaders when enabled, so captures taken with tone mapping off stay linear.
//! Every draw is its own command buffer submission, so per-draw uniform
//! writes land in submission order.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::compute::gpu::GpuTexture;
use crate::physics::geometry::{MeshData, Vertex};
use crate::render::camera::Camera;
use crate::render::compositor::{capture_size, RenderError, SceneRenderer};
use crate::render::context::GpuContext;
use crate::render::scene::{CaptureSlot, CullSide, Material, RenderTarget, Scene, SceneMesh, ToneMapping};

/// Color format of the frame and capture targets.
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Depth format shared by every scene pass.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const COMMON_SHADER: &str = include_str!("shaders/common.wgsl");
const STANDARD_SHADER: &str = include_str!("shaders/standard.wgsl");
const WATER_SHADER: &str = include_str!("shaders/water.wgsl");
const TRANSMISSION_SHADER: &str = include_str!("shaders/transmission.wgsl");
const BLIT_SHADER: &str = include_str!("shaders/blit.wgsl");

/// Per-draw scene uniforms (`Globals` in the shaders).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GlobalsUniform {
    pub view_proj: [[f32; 4]; 4],
    /// xyz: camera position, w: elapsed seconds
    pub camera_pos: [f32; 4],
    /// xyz: light travel direction, w: intensity
    pub light_dir: [f32; 4],
    /// rgb: light color, w: 1 with ACES tone mapping
    pub light_color: [f32; 4],
    /// width, height, 1/width, 1/height
    pub viewport: [f32; 4],
}

impl GlobalsUniform {
    pub fn new(scene: &Scene, camera: &Camera, tone_mapping: ToneMapping, width: u32, height: u32) -> Self {
        let width = width.max(1) as f32;
        let height = height.max(1) as f32;
        let position = camera.position();
        let direction = scene.light.direction.normalize_or_zero();
        let [r, g, b] = scene.light.color;
        let aces = match tone_mapping {
            ToneMapping::AcesFilmic => 1.0,
            ToneMapping::None => 0.0,
        };
        Self {
            view_proj: camera.view_projection_matrix().to_cols_array_2d(),
            camera_pos: [position.x, position.y, position.z, scene.time],
            light_dir: [direction.x, direction.y, direction.z, scene.light.intensity],
            light_color: [r, g, b, aces],
            viewport: [width, height, 1.0 / width, 1.0 / height],
        }
    }
}

/// Per-mesh uniforms (`MeshParams` in the shaders).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshUniform {
    pub model: [[f32; 4]; 4],
    /// rgb: albedo or tint, w: roughness
    pub color: [f32; 4],
    /// ior, roughness, chromatic aberration, distortion
    pub optics: [f32; 4],
    /// temporal distortion, anisotropic blur, reflectivity, thickness
    pub optics2: [f32; 4],
    /// rgb: attenuation color, w: attenuation distance
    pub attenuation: [f32; 4],
    /// xy: local extent of the mesh in its XY plane
    pub surface: [f32; 4],
}

impl MeshUniform {
    pub fn new(mesh: &SceneMesh, extent_xy: [f32; 2]) -> Self {
        let mut uniform = Self {
            model: mesh.transform.to_cols_array_2d(),
            color: [1.0; 4],
            optics: [0.0; 4],
            optics2: [0.0; 4],
            attenuation: [1.0, 1.0, 1.0, 0.0],
            surface: [extent_xy[0], extent_xy[1], 0.0, 0.0],
        };
        match &mesh.material {
            Material::Standard { color, roughness } => {
                uniform.color = [color[0], color[1], color[2], *roughness];
            }
            Material::Water { color } => {
                uniform.color = [color[0], color[1], color[2], 0.1];
            }
            Material::Transmissive(material) => {
                let p = &material.params;
                uniform.color = [p.color[0], p.color[1], p.color[2], p.roughness];
                uniform.optics = [p.ior, p.roughness, p.chromatic_aberration, p.distortion];
                uniform.optics2 = [
                    p.temporal_distortion,
                    p.anisotropic_blur,
                    p.reflectivity,
                    material.state().thickness,
                ];
                uniform.attenuation = [
                    p.attenuation_color[0],
                    p.attenuation_color[1],
                    p.attenuation_color[2],
                    p.attenuation_distance,
                ];
            }
        }
        uniform
    }
}

/// Color or depth texture with its default view.
struct RenderTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl RenderTexture {
    fn new(
        device: &wgpu::Device,
        label: &str,
        (width, height): (u32, u32),
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
            width,
            height,
        }
    }

    fn color(device: &wgpu::Device, label: &str, size: (u32, u32)) -> Self {
        Self::new(
            device,
            label,
            size,
            HDR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        )
    }

    fn depth(device: &wgpu::Device, label: &str, size: (u32, u32)) -> Self {
        Self::new(device, label, size, DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT)
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// GPU buffers for one scene mesh.
struct MeshResources {
    source: Arc<MeshData>,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    extent_xy: [f32; 2],
}

/// Scene pipelines; the per-side arrays are indexed by `side_index`.
struct ScenePipelines {
    standard: wgpu::RenderPipeline,
    water: wgpu::RenderPipeline,
    discard: [wgpu::RenderPipeline; 3],
    transmission: [wgpu::RenderPipeline; 3],
}

fn side_index(side: CullSide) -> usize {
    match side {
        CullSide::Front => 0,
        CullSide::Back => 1,
        CullSide::Double => 2,
    }
}

fn slot_index(slot: CaptureSlot) -> usize {
    match slot {
        CaptureSlot::Main => 0,
        CaptureSlot::Back => 1,
    }
}

const SIDES: [CullSide; 3] = [CullSide::Front, CullSide::Back, CullSide::Double];

/// Local XY extent of a mesh (width, height of its bounding box).
fn extent_xy(mesh: &MeshData) -> [f32; 2] {
    let mut min = [f32::INFINITY; 2];
    let mut max = [f32::NEG_INFINITY; 2];
    for vertex in &mesh.vertices {
        for axis in 0..2 {
            min[axis] = min[axis].min(vertex.position[axis]);
            max[axis] = max[axis].max(vertex.position[axis]);
        }
    }
    if mesh.vertices.is_empty() {
        return [1.0, 1.0];
    }
    [max[0] - min[0], max[1] - min[1]]
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, visibility: wgpu::ShaderStages, filterable: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

/// Layouts the renderer creates bind groups against.
struct Layouts {
    globals: wgpu::BindGroupLayout,
    mesh: wgpu::BindGroupLayout,
    heightmap: wgpu::BindGroupLayout,
    capture: wgpu::BindGroupLayout,
    blit: wgpu::BindGroupLayout,
}

impl Layouts {
    fn new(device: &wgpu::Device) -> Self {
        let both = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let layout = |label: &str, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        };
        Self {
            globals: layout("scene_globals_layout", &[uniform_entry(0, both)]),
            mesh: layout("scene_mesh_layout", &[uniform_entry(0, both)]),
            heightmap: layout(
                "scene_heightmap_layout",
                &[texture_entry(0, wgpu::ShaderStages::VERTEX, false)],
            ),
            capture: layout(
                "scene_capture_layout",
                &[texture_entry(0, wgpu::ShaderStages::FRAGMENT, true), sampler_entry(1)],
            ),
            blit: layout(
                "blit_layout",
                &[texture_entry(0, wgpu::ShaderStages::FRAGMENT, true), sampler_entry(1)],
            ),
        }
    }
}

/// Fixed-function state that differs between scene pipelines.
struct PipelineSpec<'a> {
    label: &'a str,
    layout: &'a wgpu::PipelineLayout,
    module: &'a wgpu::ShaderModule,
    vertex: &'a str,
    fragment: &'a str,
    cull_mode: Option<wgpu::Face>,
    color_writes: wgpu::ColorWrites,
}

fn scene_pipeline(device: &wgpu::Device, spec: PipelineSpec<'_>) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(spec.label),
        layout: Some(spec.layout),
        vertex: wgpu::VertexState {
            module: spec.module,
            entry_point: Some(spec.vertex),
            buffers: &[Vertex::buffer_layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: spec.module,
            entry_point: Some(spec.fragment),
            targets: &[Some(wgpu::ColorTargetState {
                format: HDR_FORMAT,
                blend: None,
                write_mask: spec.color_writes,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: spec.cull_mode,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

impl ScenePipelines {
    fn new(device: &wgpu::Device, layouts: &Layouts) -> Self {
        let module = |label: &str, body: &str| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(format!("{COMMON_SHADER}\n{body}").into()),
            })
        };
        let standard_module = module("standard_shader", STANDARD_SHADER);
        let water_module = module("water_shader", WATER_SHADER);
        let transmission_module = module("transmission_shader", TRANSMISSION_SHADER);

        let pipeline_layout = |label: &str, groups: &[&wgpu::BindGroupLayout]| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: groups,
                push_constant_ranges: &[],
            })
        };
        let standard_layout = pipeline_layout("standard_layout", &[&layouts.globals, &layouts.mesh]);
        let water_layout = pipeline_layout(
            "water_layout",
            &[&layouts.globals, &layouts.mesh, &layouts.heightmap],
        );
        let transmission_layout = pipeline_layout(
            "transmission_layout",
            &[&layouts.globals, &layouts.mesh, &layouts.capture],
        );

        let standard = scene_pipeline(
            device,
            PipelineSpec {
                label: "standard_pipeline",
                layout: &standard_layout,
                module: &standard_module,
                vertex: "vs_main",
                fragment: "fs_standard",
                cull_mode: Some(wgpu::Face::Back),
                color_writes: wgpu::ColorWrites::ALL,
            },
        );
        let water = scene_pipeline(
            device,
            PipelineSpec {
                label: "water_pipeline",
                layout: &water_layout,
                module: &water_module,
                vertex: "vs_water",
                fragment: "fs_water",
                cull_mode: None,
                color_writes: wgpu::ColorWrites::ALL,
            },
        );
        let discard = SIDES.map(|side| {
            scene_pipeline(
                device,
                PipelineSpec {
                    label: "discard_pipeline",
                    layout: &standard_layout,
                    module: &standard_module,
                    vertex: "vs_main",
                    fragment: "fs_discard",
                    cull_mode: side.cull_mode(),
                    color_writes: wgpu::ColorWrites::empty(),
                },
            )
        });
        let transmission = SIDES.map(|side| {
            scene_pipeline(
                device,
                PipelineSpec {
                    label: "transmission_pipeline",
                    layout: &transmission_layout,
                    module: &transmission_module,
                    vertex: "vs_main",
                    fragment: "fs_transmission",
                    cull_mode: side.cull_mode(),
                    color_writes: wgpu::ColorWrites::ALL,
                },
            )
        });

        Self {
            standard,
            water,
            discard,
            transmission,
        }
    }
}

/// `SceneRenderer` backed by wgpu.
// put id:'gpu_scene_renderer', label:'Scene draw into bound target', input:'heightmap_texture.gpu', output:'hdr_frame.gpu'
pub struct WgpuSceneRenderer {
    context: GpuContext,
    tone_mapping: ToneMapping,
    target: RenderTarget,
    viewport: (u32, u32),
    capture_scale: f32,
    layouts: Layouts,
    pipelines: ScenePipelines,
    frame: RenderTexture,
    frame_depth: RenderTexture,
    captures: [RenderTexture; 2],
    capture_depth: RenderTexture,
    sampler: wgpu::Sampler,
    capture_bind_groups: [wgpu::BindGroup; 2],
    globals_buffer: wgpu::Buffer,
    globals_bind_group: wgpu::BindGroup,
    heightmap_bind_group: Option<wgpu::BindGroup>,
    meshes: Vec<Option<MeshResources>>,
    blit_module: wgpu::ShaderModule,
    blit_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    blit_bind_group: wgpu::BindGroup,
    draws: u64,
}

impl WgpuSceneRenderer {
    /// Create the renderer and its targets.
    ///
    /// # Arguments
    /// * `context` - Device and queue shared with the simulation
    /// * `width`, `height` - Viewport size in pixels
    /// * `capture_scale` - Capture buffer size relative to the viewport
    /// * `tone_mapping` - Initial output transform
    pub fn new(
        context: GpuContext,
        width: u32,
        height: u32,
        capture_scale: f32,
        tone_mapping: ToneMapping,
    ) -> Self {
        let device = context.device.clone();
        let layouts = Layouts::new(&device);
        let pipelines = ScenePipelines::new(&device, &layouts);

        let viewport = (width.max(1), height.max(1));
        let capture = capture_size(viewport.0, viewport.1, capture_scale);
        let frame = RenderTexture::color(&device, "hdr_frame", viewport);
        let frame_depth = RenderTexture::depth(&device, "hdr_frame_depth", viewport);
        let captures = [
            RenderTexture::color(&device, "capture_main", capture),
            RenderTexture::color(&device, "capture_back", capture),
        ];
        let capture_depth = RenderTexture::depth(&device, "capture_depth", capture);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("capture_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let capture_bind_groups = captures
            .each_ref()
            .map(|capture| texture_bind_group(&device, &layouts.capture, &capture.view, &sampler, "capture_bind_group"));
        let blit_bind_group = texture_bind_group(&device, &layouts.blit, &frame.view, &sampler, "blit_bind_group");

        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scene_globals"),
            size: std::mem::size_of::<GlobalsUniform>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let globals_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scene_globals_bind_group"),
            layout: &layouts.globals,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: globals_buffer.as_entire_binding(),
            }],
        });

        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit_shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });

        log::info!(
            "Scene renderer {}x{}, captures {}x{}",
            viewport.0,
            viewport.1,
            capture.0,
            capture.1
        );

        Self {
            context,
            tone_mapping,
            target: RenderTarget::Screen,
            viewport,
            capture_scale,
            layouts,
            pipelines,
            frame,
            frame_depth,
            captures,
            capture_depth,
            sampler,
            capture_bind_groups,
            globals_buffer,
            globals_bind_group,
            heightmap_bind_group: None,
            meshes: Vec::new(),
            blit_module,
            blit_pipelines: HashMap::new(),
            blit_bind_group,
            draws: 0,
        }
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Draw calls submitted so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Upload buffers for new meshes and drop those no longer in the scene.
    fn sync_meshes(&mut self, scene: &Scene) {
        let device = &self.context.device;
        self.meshes.resize_with(scene.len(), || None);

        for (id, mesh) in scene.meshes() {
            let slot = &mut self.meshes[id.index()];
            if slot.as_ref().is_some_and(|r| Arc::ptr_eq(&r.source, &mesh.mesh)) {
                continue;
            }

            let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} vertices", mesh.name)),
                contents: mesh.mesh.vertex_bytes(),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} indices", mesh.name)),
                contents: mesh.mesh.index_bytes(),
                usage: wgpu::BufferUsages::INDEX,
            });
            let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{} uniforms", mesh.name)),
                size: std::mem::size_of::<MeshUniform>() as wgpu::BufferAddress,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} bind group", mesh.name)),
                layout: &self.layouts.mesh,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                }],
            });

            *slot = Some(MeshResources {
                source: mesh.mesh.clone(),
                vertex_buffer,
                index_buffer,
                index_count: mesh.mesh.indices.len() as u32,
                uniform_buffer,
                bind_group,
                extent_xy: extent_xy(&mesh.mesh),
            });
        }
    }

    fn target_size(&self, target: RenderTarget) -> (u32, u32) {
        match target {
            RenderTarget::Screen => self.frame.size(),
            RenderTarget::Capture(slot) => self.captures[slot_index(slot)].size(),
        }
    }

    /// Copy the HDR frame into `view`, e.g. a surface texture.
    pub fn present(&mut self, view: &wgpu::TextureView, format: wgpu::TextureFormat) {
        let device = &self.context.device;
        let pipeline = self.blit_pipelines.entry(format).or_insert_with(|| {
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("blit_pipeline_layout"),
                bind_group_layouts: &[&self.layouts.blit],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("blit_pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &self.blit_module,
                    entry_point: Some("vs_blit"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.blit_module,
                    entry_point: Some("fs_blit"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("blit_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.blit_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));
    }
}

fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn draw_mesh(pass: &mut wgpu::RenderPass<'_>, resources: &MeshResources) {
    pass.set_bind_group(1, &resources.bind_group, &[]);
    pass.set_vertex_buffer(0, resources.vertex_buffer.slice(..));
    pass.set_index_buffer(resources.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
    pass.draw_indexed(0..resources.index_count, 0, 0..1);
}

impl SceneRenderer for WgpuSceneRenderer {
    type Heightmap = GpuTexture;

    fn tone_mapping(&self) -> ToneMapping {
        self.tone_mapping
    }

    fn set_tone_mapping(&mut self, mode: ToneMapping) {
        self.tone_mapping = mode;
    }

    fn render_target(&self) -> RenderTarget {
        self.target
    }

    fn set_render_target(&mut self, target: RenderTarget) {
        self.target = target;
    }

    fn draw(&mut self, scene: &Scene, camera: &Camera) -> Result<(), RenderError> {
        let target = self.target;
        self.sync_meshes(scene);

        let (width, height) = self.target_size(target);
        let queue = &self.context.queue;
        let globals = GlobalsUniform::new(scene, camera, self.tone_mapping, width, height);
        queue.write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(&globals));
        for (id, mesh) in scene.meshes() {
            if let Some(resources) = &self.meshes[id.index()] {
                let uniform = MeshUniform::new(mesh, resources.extent_xy);
                queue.write_buffer(&resources.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
            }
        }

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let (color_view, depth_view) = match target {
            RenderTarget::Screen => (&self.frame.view, &self.frame_depth.view),
            RenderTarget::Capture(slot) => (&self.captures[slot_index(slot)].view, &self.capture_depth.view),
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("scene_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(scene.background.clear_color()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_bind_group(0, &self.globals_bind_group, &[]);

            // Opaque meshes first so transmissive meshes occlude correctly
            for (id, mesh) in scene.meshes().filter(|(_, m)| m.visible) {
                let Some(resources) = &self.meshes[id.index()] else {
                    continue;
                };
                match &mesh.material {
                    Material::Standard { .. } => pass.set_pipeline(&self.pipelines.standard),
                    Material::Water { .. } => {
                        let Some(heightmap) = &self.heightmap_bind_group else {
                            continue;
                        };
                        pass.set_pipeline(&self.pipelines.water);
                        pass.set_bind_group(2, heightmap, &[]);
                    }
                    Material::Transmissive(_) => continue,
                }
                draw_mesh(&mut pass, resources);
            }

            for (id, mesh) in scene.meshes().filter(|(_, m)| m.visible) {
                let (Some(resources), Material::Transmissive(material)) =
                    (&self.meshes[id.index()], &mesh.material)
                else {
                    continue;
                };
                let state = material.state();
                let side = side_index(state.side);
                if state.draws_as_discard(target) {
                    pass.set_pipeline(&self.pipelines.discard[side]);
                } else {
                    pass.set_pipeline(&self.pipelines.transmission[side]);
                    pass.set_bind_group(2, &self.capture_bind_groups[slot_index(state.source)], &[]);
                }
                draw_mesh(&mut pass, resources);
            }
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(match target {
                RenderTarget::Screen => RenderError::Surface(error.to_string()),
                RenderTarget::Capture(_) => RenderError::TargetUnavailable(target),
            });
        }
        self.draws += 1;
        Ok(())
    }

    fn publish_heightmap(&mut self, heightmap: &GpuTexture) {
        self.heightmap_bind_group = Some(self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("heightmap_bind_group"),
            layout: &self.layouts.heightmap,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(heightmap.view()),
            }],
        }));
    }

    fn capture_extent(&self, slot: CaptureSlot) -> (u32, u32) {
        self.captures[slot_index(slot)].size()
    }

    fn resize(&mut self, width: u32, height: u32) {
        let device = &self.context.device;
        self.viewport = (width.max(1), height.max(1));
        let capture = capture_size(self.viewport.0, self.viewport.1, self.capture_scale);

        self.frame = RenderTexture::color(device, "hdr_frame", self.viewport);
        self.frame_depth = RenderTexture::depth(device, "hdr_frame_depth", self.viewport);
        self.captures = [
            RenderTexture::color(device, "capture_main", capture),
            RenderTexture::color(device, "capture_back", capture),
        ];
        self.capture_depth = RenderTexture::depth(device, "capture_depth", capture);

        let (layouts, sampler) = (&self.layouts, &self.sampler);
        self.capture_bind_groups = self
            .captures
            .each_ref()
            .map(|capture| texture_bind_group(device, &layouts.capture, &capture.view, sampler, "capture_bind_group"));
        self.blit_bind_group = texture_bind_group(device, &layouts.blit, &self.frame.view, sampler, "blit_bind_group");
    }
}
