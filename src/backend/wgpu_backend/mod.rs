//! wgpu backend implementation
//!
//! Headless [`GraphicsBackend`] on a wgpu device. The programs are entry points of one WGSL
//! module sharing a single bind group layout. Render pipelines are created on first use for
//! each combination of program, attachment formats and fixed-function state.

mod gpu_params;

use crate::backend::common::{check_attachments, pack_frame};
use crate::backend::params::ProgramParams;
use crate::backend::program::{BlendMode, ProgramKind};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{Mesh, MeshId};
use glam::Vec4;
use gpu_params::{GpuParams, TEXTURE_UNITS};
use std::collections::{HashMap, HashSet};
use wgpu::util::DeviceExt;

const SHADER_SOURCE: &str = include_str!("programs.wgsl");
const PARAMS_BINDING: u32 = TEXTURE_UNITS as u32;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

/// A texture together with the view every binding and attachment uses
struct GpuTexture {
    desc: TextureDescriptor,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Uploaded geometry of one mesh
struct MeshBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

/// Everything a render pipeline depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    kind: ProgramKind,
    colors: Vec<Option<TextureFormat>>,
    depth: bool,
    cull_back_faces: bool,
    depth_test: bool,
    depth_clamp: bool,
}

/// Attachments of the framebuffer draws currently go to
struct Targets<'a> {
    /// Indexed by color attachment
    colors: Vec<Option<&'a GpuTexture>>,
    depth: Option<&'a GpuTexture>,
    attached: Vec<u64>,
}

impl Targets<'_> {
    fn size(&self) -> (u32, u32) {
        self.colors
            .iter()
            .flatten()
            .chain(self.depth.iter())
            .next()
            .map(|texture| (texture.desc.width, texture.desc.height))
            .unwrap_or((1, 1))
    }

    fn color_formats(&self) -> Vec<Option<TextureFormat>> {
        self.colors
            .iter()
            .map(|texture| texture.map(|t| t.desc.format))
            .collect()
    }
}

/// wgpu backend implementation
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    depth_clamp_supported: bool,
    title: String,
    window: (u32, u32),
    default_target: GpuTexture,
    /// 1x1 texture bound to units a draw leaves empty
    placeholder: GpuTexture,
    shader: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    meshes: HashMap<MeshId, MeshBuffers>,
    textures: HashMap<u64, GpuTexture>,
    frame_buffers: HashMap<u64, Vec<(AttachmentPoint, TextureHandle)>>,
    programs: HashMap<u64, ProgramKind>,
    bound: Option<FrameBufferHandle>,
    capabilities: HashSet<Capability>,
    clear_color: Vec4,
    next_id: u64,
    draw_count: u64,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn convert_color(color: Vec4) -> wgpu::Color {
        wgpu::Color {
            r: color.x as f64,
            g: color.y as f64,
            b: color.z as f64,
            a: color.w as f64,
        }
    }

    fn blend_state(mode: BlendMode, index: usize) -> Option<wgpu::BlendState> {
        match (mode, index) {
            (BlendMode::Replace, _) => None,
            (BlendMode::AlphaBlend, _) => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
            (BlendMode::WeightedAccumulate, 0) => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
            // Revealage: the program writes alpha to every channel
            (BlendMode::WeightedAccumulate, _) => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::Zero,
                    dst_factor: wgpu::BlendFactor::OneMinusSrc,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::Zero,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
        }
    }

    fn fragment_entry(kind: ProgramKind) -> &'static str {
        match kind {
            ProgramKind::Solid => "fs_solid",
            ProgramKind::ShadowDepth => "fs_depth",
            ProgramKind::WeightedSum => "fs_weighted_sum",
            ProgramKind::Font => "fs_font",
            ProgramKind::Screen => "fs_screen",
            ProgramKind::Blur => "fs_blur",
            ProgramKind::Ssao => "fs_ssao",
            ProgramKind::Shadow => "fs_shadow",
            ProgramKind::Lighting => "fs_lighting",
            ProgramKind::TransparencyBlending => "fs_transparency_blending",
        }
    }

    fn decode_texel(format: TextureFormat, bytes: &[u8]) -> Vec4 {
        match format {
            TextureFormat::Rgba8Unorm => {
                Vec4::new(bytes[0] as f32, bytes[1] as f32, bytes[2] as f32, bytes[3] as f32) / 255.0
            }
            TextureFormat::R8Unorm => Vec4::new(bytes[0] as f32 / 255.0, 0.0, 0.0, 1.0),
            TextureFormat::R32Float | TextureFormat::Depth32Float => {
                let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                Vec4::new(value, 0.0, 0.0, 1.0)
            }
            TextureFormat::Rgba16Float => {
                let channel = |i: usize| half::f16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]).to_f32();
                Vec4::new(channel(0), channel(1), channel(2), channel(3))
            }
        }
    }
}

impl WgpuBackend {
    /// Create a backend without a window, rendering into an offscreen default framebuffer
    pub fn new_headless(width: u32, height: u32) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(width, height))
    }

    pub async fn new_async(width: u32, height: u32) -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let depth_clamp_supported = adapter.features().contains(wgpu::Features::DEPTH_CLIP_CONTROL);
        let required_features = if depth_clamp_supported {
            wgpu::Features::DEPTH_CLIP_CONTROL
        } else {
            log::warn!("WgpuBackend: depth clamping unavailable, geometry is clipped instead");
            wgpu::Features::empty()
        };

        // Five G-buffer targets exceed the default per-sample attachment budget
        let required_limits = wgpu::Limits {
            max_color_attachment_bytes_per_sample: adapter
                .limits()
                .max_color_attachment_bytes_per_sample,
            ..wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deferred Graph Device"),
                    required_features,
                    required_limits,
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("programs"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });

        let mut layout_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..TEXTURE_UNITS as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        layout_entries.push(wgpu::BindGroupLayoutEntry {
            binding: PARAMS_BINDING,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("program units"),
            entries: &layout_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("programs"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let default_target = Self::create_default_target(&device, width, height)?;
        let placeholder = Self::create_gpu_texture(
            &device,
            TextureDescriptor::new("placeholder", 1, 1, TextureFormat::Rgba8Unorm),
        );

        log::debug!("WgpuBackend: created {}x{} default framebuffer", width, height);
        Ok(Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            depth_clamp_supported,
            title: String::new(),
            window: (width, height),
            default_target,
            placeholder,
            shader,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            meshes: HashMap::new(),
            textures: HashMap::new(),
            frame_buffers: HashMap::new(),
            programs: HashMap::new(),
            bound: None,
            capabilities: HashSet::new(),
            clear_color: Vec4::ZERO,
            next_id: 1,
            draw_count: 0,
        })
    }

    /// Name of the adapter the device was created on
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn create_gpu_texture(device: &wgpu::Device, desc: TextureDescriptor) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            desc,
            texture,
            view,
        }
    }

    fn create_default_target(device: &wgpu::Device, width: u32, height: u32) -> BackendResult<GpuTexture> {
        let max = device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(BackendError::InitializationFailed(format!(
                "window size must be within 1..={}, got {}x{}",
                max, width, height
            )));
        }
        Ok(Self::create_gpu_texture(
            device,
            TextureDescriptor::new("default framebuffer", width, height, TextureFormat::Rgba8Unorm),
        ))
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture(&self, handle: TextureHandle) -> BackendResult<&GpuTexture> {
        self.textures.get(&handle.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: handle.0,
        })
    }

    fn targets(&self) -> BackendResult<Targets<'_>> {
        let Some(frame_buffer) = self.bound else {
            return Ok(Targets {
                colors: vec![Some(&self.default_target)],
                depth: None,
                attached: Vec::new(),
            });
        };

        let attachments = self
            .frame_buffers
            .get(&frame_buffer.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "framebuffer",
                id: frame_buffer.0,
            })?;

        let mut targets = Targets {
            colors: Vec::new(),
            depth: None,
            attached: Vec::new(),
        };
        for (point, handle) in attachments {
            let texture = self.texture(*handle)?;
            targets.attached.push(handle.0);
            match point.color_index() {
                Some(index) => {
                    if targets.colors.len() <= index {
                        targets.colors.resize(index + 1, None);
                    }
                    targets.colors[index] = Some(texture);
                }
                None => targets.depth = Some(texture),
            }
        }
        Ok(targets)
    }

    fn create_pipeline(&self, key: &PipelineKey) -> wgpu::RenderPipeline {
        let kind = key.kind;
        let outputs = kind.color_targets();
        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .enumerate()
            .map(|(index, format)| {
                format.map(|format| {
                    let written = index < outputs;
                    wgpu::ColorTargetState {
                        format: Self::convert_texture_format(format),
                        blend: if written { Self::blend_state(kind.blend(), index) } else { None },
                        write_mask: if written {
                            wgpu::ColorWrites::ALL
                        } else {
                            wgpu::ColorWrites::empty()
                        },
                    }
                })
            })
            .collect();

        let screen = kind.is_screen_pass();
        let vertex_layouts = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        }];
        let vertex_buffers: &[wgpu::VertexBufferLayout] = if screen { &[] } else { &vertex_layouts[..] };

        let depth_stencil = key.depth.then(|| wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth32Float,
            depth_write_enabled: !screen && kind.writes_depth(),
            depth_compare: if !screen && key.depth_test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: (!screen && key.cull_back_faces).then_some(wgpu::Face::Back),
            unclipped_depth: !screen && key.depth_clamp && self.depth_clamp_supported,
            ..Default::default()
        };

        let has_colors = key.colors.iter().any(Option::is_some);
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(kind.name()),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: if screen { "vs_screen" } else { "vs_mesh" },
                buffers: vertex_buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: has_colors.then(|| wgpu::FragmentState {
                module: &self.shader,
                entry_point: Self::fragment_entry(kind),
                targets: &color_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive,
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }

    /// Copy a texture into host memory as normalized values, rows top-down
    fn read_back(&self, texture: &GpuTexture) -> BackendResult<Vec<Vec4>> {
        let desc = &texture.desc;
        let bytes_per_pixel = desc.format.bytes_per_pixel();
        let unpadded = desc.width * bytes_per_pixel;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded * desc.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: if desc.format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let mut texels = Vec::with_capacity((desc.width * desc.height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded as usize) {
                for bytes in row[..unpadded as usize].chunks_exact(bytes_per_pixel as usize) {
                    texels.push(Self::decode_texel(desc.format, bytes));
                }
            }
        }
        buffer.unmap();
        Ok(texels)
    }

    /// Upload a mesh on its first draw. Returns false for meshes with nothing to draw.
    fn upload_mesh(&mut self, mesh: &Mesh) -> bool {
        if self.meshes.contains_key(&mesh.id()) {
            return true;
        }
        let vertex_count = mesh.vertices().len() as u32;
        if mesh.indices().iter().any(|index| *index >= vertex_count) {
            log::warn!("WgpuBackend: mesh '{}' has out-of-range indices", mesh.name());
            return false;
        }
        if mesh.indices().is_empty() {
            return false;
        }
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(mesh.name()),
            contents: bytemuck::cast_slice(mesh.vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(mesh.name()),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });
        log::trace!("WgpuBackend: uploaded mesh '{}'", mesh.name());
        self.meshes.insert(
            mesh.id(),
            MeshBuffers {
                vertices,
                indices,
                index_count: mesh.indices().len() as u32,
            },
        );
        true
    }

    /// Number of meshes with uploaded buffers
    pub fn cached_mesh_count(&self) -> usize {
        self.meshes.len()
    }

    fn check_sampled_textures(&self, call: &DrawCall<'_>, attached: &[u64]) -> BackendResult<()> {
        for (unit, handle) in call.textures {
            if *unit as usize >= TEXTURE_UNITS {
                return Err(BackendError::DrawFailed(format!(
                    "texture unit {} out of range",
                    unit
                )));
            }
            if !self.textures.contains_key(&handle.0) || attached.contains(&handle.0) {
                return Err(BackendError::DrawFailed(format!(
                    "texture {} on unit {} is destroyed or attached to the bound framebuffer",
                    handle.0, unit
                )));
            }
        }
        Ok(())
    }

    fn encode_draw(&self, kind: ProgramKind, key: &PipelineKey, call: &DrawCall<'_>) -> BackendResult<()> {
        let targets = self.targets()?;
        let pipeline = self
            .pipelines
            .get(key)
            .ok_or_else(|| BackendError::DrawFailed(format!("no pipeline for '{}'", kind)))?;

        let mut units = [Vec4::ZERO; TEXTURE_UNITS];
        let mut views = [&self.placeholder.view; TEXTURE_UNITS];
        for (unit, handle) in call.textures {
            let texture = self.texture(*handle)?;
            let desc = &texture.desc;
            units[*unit as usize] = Vec4::new(
                desc.width as f32,
                desc.height as f32,
                (desc.filter == FilterMode::Linear) as u32 as f32,
                (desc.wrap == WrapMode::Repeat) as u32 as f32,
            );
            views[*unit as usize] = &texture.view;
        }

        let params = GpuParams::new(
            kind,
            &ProgramParams::from_uniforms(call.uniforms),
            units,
            targets.size(),
        );
        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("program params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: PARAMS_BINDING,
            resource: params_buffer.as_entire_binding(),
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kind.name()),
            layout: &self.bind_group_layout,
            entries: &entries,
        });

        let mesh_buffers = match call.geometry {
            Geometry::Screen => None,
            Geometry::Mesh(mesh) => match self.meshes.get(&mesh.id()) {
                Some(buffers) => Some(buffers),
                None => return Ok(()),
            },
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = targets
            .colors
            .iter()
            .map(|texture| {
                texture.map(|texture| wgpu::RenderPassColorAttachment {
                    view: &texture.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = targets.depth.map(|texture| wgpu::RenderPassDepthStencilAttachment {
            view: &texture.view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(kind.name()) });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(kind.name()),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            match &mesh_buffers {
                Some(buffers) => {
                    pass.set_vertex_buffer(0, buffers.vertices.slice(..));
                    pass.set_index_buffer(buffers.indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..buffers.index_count, 0, 0..1);
                }
                None => pass.draw(0..3, 0..1),
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu Backend"
    }

    fn window_size(&self) -> (u32, u32) {
        self.window
    }

    fn set_window_size(&mut self, width: u32, height: u32) -> BackendResult<()> {
        self.default_target = Self::create_default_target(&self.device, width, height)?;
        self.window = (width, height);
        log::debug!("WgpuBackend: resized default framebuffer to {}x{}", width, height);
        Ok(())
    }

    fn window_title(&self) -> &str {
        &self.title
    }

    fn set_window_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        if enabled {
            self.capabilities.insert(capability);
        } else {
            self.capabilities.remove(&capability);
        }
    }

    fn is_capability_enabled(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} is {}x{}, sizes must be within 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }
        log::trace!(
            "WgpuBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let texture = Self::create_gpu_texture(&self.device, desc.clone());
        let id = self.allocate_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let gpu = self.texture(texture)?;
        let desc = &gpu.desc;
        if desc.format == TextureFormat::Rgba16Float {
            return Err(BackendError::InvalidTextureData(
                "uploads to half-float textures are not supported".into(),
            ));
        }
        let expected = desc.data_size();
        if data.len() != expected {
            return Err(BackendError::InvalidTextureData(format!(
                "expected {} bytes for {:?}, got {}",
                expected,
                desc.label,
                data.len()
            )));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &gpu.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| t.desc.clone())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<Vec4>> {
        self.read_back(self.texture(texture)?)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        log::trace!("WgpuBackend: destroying texture {}", texture.0);
        if let Some(gpu) = self.textures.remove(&texture.0) {
            gpu.texture.destroy();
        }
    }

    fn create_frame_buffer(
        &mut self,
        attachments: &[(AttachmentPoint, TextureHandle)],
    ) -> BackendResult<FrameBufferHandle> {
        check_attachments(attachments, |handle| self.texture_descriptor(handle))?;

        let id = self.allocate_id();
        self.frame_buffers.insert(id, attachments.to_vec());
        log::trace!("WgpuBackend: created framebuffer {} with {} attachments", id, attachments.len());
        Ok(FrameBufferHandle(id))
    }

    fn destroy_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) {
        if self.bound == Some(frame_buffer) {
            self.bound = None;
        }
        self.frame_buffers.remove(&frame_buffer.0);
    }

    fn bind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) -> BackendResult<()> {
        if !self.frame_buffers.contains_key(&frame_buffer.0) {
            return Err(BackendError::InvalidHandle {
                kind: "framebuffer",
                id: frame_buffer.0,
            });
        }
        self.bound = Some(frame_buffer);
        Ok(())
    }

    fn unbind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) -> BackendResult<()> {
        if self.bound == Some(frame_buffer) {
            self.bound = None;
        }
        Ok(())
    }

    fn create_program(&mut self, name: &str) -> BackendResult<ProgramHandle> {
        let kind =
            ProgramKind::from_name(name).ok_or_else(|| BackendError::UnknownProgram(name.into()))?;
        let id = self.allocate_id();
        self.programs.insert(id, kind);
        log::trace!("WgpuBackend: created program '{}' ({})", name, id);
        Ok(ProgramHandle(id))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
    }

    fn clear(&mut self, op: &ClearOp) -> BackendResult<()> {
        let targets = self.targets()?;
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = targets
            .colors
            .iter()
            .enumerate()
            .map(|(index, texture)| {
                texture.map(|texture| wgpu::RenderPassColorAttachment {
                    view: &texture.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match op.color_for(index, self.clear_color) {
                            Some(color) => wgpu::LoadOp::Clear(Self::convert_color(color)),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = targets.depth.map(|texture| wgpu::RenderPassDepthStencilAttachment {
            view: &texture.view,
            depth_ops: Some(wgpu::Operations {
                load: if op.depth {
                    wgpu::LoadOp::Clear(1.0)
                } else {
                    wgpu::LoadOp::Load
                },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("clear") });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> BackendResult<()> {
        let kind = *self
            .programs
            .get(&call.program.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "program",
                id: call.program.0,
            })?;

        match (call.geometry, kind.is_screen_pass()) {
            (Geometry::Screen, false) => {
                return Err(BackendError::DrawFailed(format!(
                    "program '{}' cannot draw a full-screen pass",
                    kind
                )))
            }
            (Geometry::Mesh(_), true) => {
                return Err(BackendError::DrawFailed(format!(
                    "program '{}' only draws full-screen passes",
                    kind
                )))
            }
            _ => {}
        }

        let key = {
            let targets = self.targets()?;
            self.check_sampled_textures(call, &targets.attached)?;
            PipelineKey {
                kind,
                colors: targets.color_formats(),
                depth: targets.depth.is_some(),
                cull_back_faces: self.is_capability_enabled(Capability::CullFace),
                depth_test: self.is_capability_enabled(Capability::DepthTest),
                depth_clamp: self.is_capability_enabled(Capability::DepthClamp),
            }
        };
        if !self.pipelines.contains_key(&key) {
            log::debug!("WgpuBackend: creating pipeline for '{}'", kind);
            let pipeline = self.create_pipeline(&key);
            self.pipelines.insert(key.clone(), pipeline);
        }

        if let Geometry::Mesh(mesh) = call.geometry {
            if !self.upload_mesh(mesh) {
                return Ok(());
            }
        }
        self.encode_draw(kind, &key, call)?;
        self.draw_count += 1;
        log::trace!("WgpuBackend: draw with '{}'", kind);
        Ok(())
    }

    fn read_current_frame(&mut self, area: Rectangle, format: ReadFormat) -> BackendResult<Vec<u8>> {
        let targets = self.targets()?;
        let source = targets
            .colors
            .first()
            .copied()
            .flatten()
            .ok_or_else(|| BackendError::ReadbackFailed("bound framebuffer has no color attachment".into()))?;
        let texels = self.read_back(source)?;
        pack_frame(&texels, source.desc.width, source.desc.height, area, format)
    }

    fn finish_frame(&mut self) -> BackendResult<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn frame_buffer_count(&self) -> usize {
        self.frame_buffers.len()
    }

    fn draw_count(&self) -> u64 {
        self.draw_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::UniformSet;

    fn backend() -> Option<WgpuBackend> {
        match WgpuBackend::new_headless(8, 8) {
            Ok(backend) => Some(backend),
            Err(e) => {
                eprintln!("No GPU adapter, skipping: {e}");
                None
            }
        }
    }

    #[test]
    fn test_mesh_buffers_uploaded_once_per_mesh() {
        let Some(mut backend) = backend() else {
            return;
        };
        let program = backend.create_program("font").unwrap();
        let uniforms = UniformSet::new();
        let quad = Mesh::quad();
        let draw = |backend: &mut WgpuBackend, mesh: &Mesh| {
            backend
                .draw(&DrawCall {
                    program,
                    geometry: Geometry::Mesh(mesh),
                    textures: &[],
                    uniforms: &uniforms,
                })
                .unwrap();
        };

        draw(&mut backend, &quad);
        draw(&mut backend, &quad);
        assert_eq!(backend.cached_mesh_count(), 1);

        // A clone is a distinct geometry identity
        draw(&mut backend, &quad.clone());
        assert_eq!(backend.cached_mesh_count(), 2);
        assert_eq!(backend.draw_count(), 3);
    }
}
