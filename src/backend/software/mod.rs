//! Software backend
//!
//! Executes the program set on the CPU. Used for headless rendering and as the reference
//! the GPU backends are checked against. Texture contents are kept as normalized floats and
//! quantized on store according to each texture's format.

mod raster;
mod shading;
mod texture;

use crate::backend::common::{check_attachments, pack_frame};
use crate::backend::params::ProgramParams;
use crate::backend::program::{BlendMode, ProgramKind};
use crate::backend::traits::*;
use crate::backend::types::*;
use glam::{Mat3, Vec2, Vec4};
use raster::{rasterize_triangle, ClipVertex, RasterState};
use shading::{Samplers, MAX_TEXTURE_UNITS};
use std::collections::{HashMap, HashSet};
use texture::SoftTexture;

const DEFAULT_TARGET: u64 = 0;

/// Textures a draw or clear writes into, detached from the texture table while in use
struct RenderTargets {
    colors: Vec<(usize, u64, SoftTexture)>,
    depth: Option<(u64, SoftTexture)>,
    width: u32,
    height: u32,
}

/// CPU reference backend
pub struct SoftwareBackend {
    title: String,
    window: (u32, u32),
    default_target: Option<SoftTexture>,
    textures: HashMap<u64, SoftTexture>,
    frame_buffers: HashMap<u64, Vec<(AttachmentPoint, TextureHandle)>>,
    programs: HashMap<u64, ProgramKind>,
    bound: Option<FrameBufferHandle>,
    capabilities: HashSet<Capability>,
    clear_color: Vec4,
    next_id: u64,
    draw_count: u64,
    max_texture_size: u32,
}

/// Largest texture side accepted unless overridden with
/// [`SoftwareBackend::with_max_texture_size`]
pub const DEFAULT_MAX_TEXTURE_SIZE: u32 = 8192;

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> BackendResult<Self> {
        let default_target = Self::create_default_target(width, height)?;
        log::debug!("SoftwareBackend: created {}x{} default framebuffer", width, height);
        Ok(Self {
            title: String::new(),
            window: (width, height),
            default_target: Some(default_target),
            textures: HashMap::new(),
            frame_buffers: HashMap::new(),
            programs: HashMap::new(),
            bound: None,
            capabilities: HashSet::new(),
            clear_color: Vec4::ZERO,
            next_id: 1,
            draw_count: 0,
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
        })
    }

    /// Reject textures with a side longer than `size`
    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    fn create_default_target(width: u32, height: u32) -> BackendResult<SoftTexture> {
        if width == 0 || height == 0 {
            return Err(BackendError::InitializationFailed(format!(
                "window size must be non-zero, got {}x{}",
                width, height
            )));
        }
        Ok(SoftTexture::new(TextureDescriptor::new(
            "default framebuffer",
            width,
            height,
            TextureFormat::Rgba8Unorm,
        )))
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Detach the bound framebuffer's textures (or the default target) for writing
    fn take_targets(&mut self) -> BackendResult<RenderTargets> {
        let Some(frame_buffer) = self.bound else {
            let target = self
                .default_target
                .take()
                .ok_or(BackendError::DeviceLost)?;
            return Ok(RenderTargets {
                width: target.width(),
                height: target.height(),
                colors: vec![(0, DEFAULT_TARGET, target)],
                depth: None,
            });
        };

        let attachments = self
            .frame_buffers
            .get(&frame_buffer.0)
            .cloned()
            .ok_or(BackendError::InvalidHandle {
                kind: "framebuffer",
                id: frame_buffer.0,
            })?;

        let mut targets = RenderTargets {
            colors: Vec::new(),
            depth: None,
            width: 0,
            height: 0,
        };
        for (point, handle) in attachments {
            let Some(texture) = self.textures.remove(&handle.0) else {
                self.restore_targets(targets);
                return Err(BackendError::InvalidHandle {
                    kind: "texture",
                    id: handle.0,
                });
            };
            targets.width = texture.width();
            targets.height = texture.height();
            match point.color_index() {
                Some(index) => targets.colors.push((index, handle.0, texture)),
                None => targets.depth = Some((handle.0, texture)),
            }
        }
        Ok(targets)
    }

    fn restore_targets(&mut self, targets: RenderTargets) {
        for (_, id, texture) in targets.colors {
            if id == DEFAULT_TARGET {
                self.default_target = Some(texture);
            } else {
                self.textures.insert(id, texture);
            }
        }
        if let Some((id, texture)) = targets.depth {
            self.textures.insert(id, texture);
        }
    }

    fn execute_draw(&self, kind: ProgramKind, call: &DrawCall<'_>, targets: &mut RenderTargets) -> BackendResult<()> {
        let mut units: [Option<&SoftTexture>; MAX_TEXTURE_UNITS] = [None; MAX_TEXTURE_UNITS];
        for (unit, handle) in call.textures {
            let slot = units.get_mut(*unit as usize).ok_or_else(|| {
                BackendError::DrawFailed(format!("texture unit {} out of range", unit))
            })?;
            let texture = self.textures.get(&handle.0).ok_or_else(|| {
                BackendError::DrawFailed(format!(
                    "texture {} on unit {} is destroyed or attached to the bound framebuffer",
                    handle.0, unit
                ))
            })?;
            *slot = Some(texture);
        }
        let samplers = Samplers::new(units);
        let params = ProgramParams::from_uniforms(call.uniforms);

        match call.geometry {
            Geometry::Screen => {
                if !kind.is_screen_pass() {
                    return Err(BackendError::DrawFailed(format!(
                        "program '{}' cannot draw a full-screen pass",
                        kind
                    )));
                }
                self.draw_screen(kind, &params, &samplers, targets);
            }
            Geometry::Mesh(mesh) => {
                if kind.is_screen_pass() {
                    return Err(BackendError::DrawFailed(format!(
                        "program '{}' only draws full-screen passes",
                        kind
                    )));
                }
                self.draw_mesh(kind, &params, &samplers, mesh, targets);
            }
        }
        Ok(())
    }

    fn draw_screen(
        &self,
        kind: ProgramKind,
        params: &ProgramParams,
        samplers: &Samplers<'_>,
        targets: &mut RenderTargets,
    ) {
        let (width, height) = (targets.width, targets.height);
        let Some((_, _, target)) = targets.colors.iter_mut().find(|(index, _, _)| *index == 0) else {
            return;
        };
        for y in 0..height {
            for x in 0..width {
                let uv = Vec2::new(
                    (x as f32 + 0.5) / width as f32,
                    (y as f32 + 0.5) / height as f32,
                );
                let color = shading::shade_screen(kind, params, samplers, uv);
                target.store((y * width + x) as usize, color);
            }
        }
    }

    fn draw_mesh(
        &self,
        kind: ProgramKind,
        params: &ProgramParams,
        samplers: &Samplers<'_>,
        mesh: &crate::resources::Mesh,
        targets: &mut RenderTargets,
    ) {
        let view_rotation = Mat3::from_mat4(params.view);
        let clip_vertices: Vec<ClipVertex> = mesh
            .vertices()
            .iter()
            .map(|vertex| {
                let world = params.model.transform_point3(vertex.position);
                let world_normal = params.normal_matrix * vertex.normal;
                ClipVertex {
                    clip: params.projection * params.view * world.extend(1.0),
                    world_position: world,
                    world_normal,
                    view_normal: view_rotation * world_normal,
                    uv: vertex.uv,
                }
            })
            .collect();

        let state = RasterState {
            width: targets.width,
            height: targets.height,
            cull_back_faces: self.is_capability_enabled(Capability::CullFace),
            depth_clamp: self.is_capability_enabled(Capability::DepthClamp),
        };
        let depth_test = self.is_capability_enabled(Capability::DepthTest);
        let writes_depth = kind.writes_depth();
        let blend = kind.blend();
        let outputs = kind.color_targets();
        let width = targets.width;

        for triangle in mesh.indices().chunks_exact(3) {
            let Some(corners) = triangle
                .iter()
                .map(|index| clip_vertices.get(*index as usize))
                .collect::<Option<Vec<_>>>()
            else {
                log::warn!("SoftwareBackend: mesh '{}' has out-of-range indices", mesh.name());
                return;
            };

            rasterize_triangle([corners[0], corners[1], corners[2]], state, |fragment| {
                let index = (fragment.y * width + fragment.x) as usize;
                if let Some((_, depth_buffer)) = targets.depth.as_mut() {
                    if depth_test && fragment.depth >= depth_buffer.texels[index].x {
                        return;
                    }
                    if writes_depth {
                        depth_buffer.store(index, Vec4::new(fragment.depth, 0.0, 0.0, 1.0));
                    }
                }

                let colors = shading::shade_surface(kind, params, samplers, &fragment);
                for (attachment, _, target) in targets.colors.iter_mut() {
                    if *attachment >= outputs {
                        continue;
                    }
                    let source = colors[*attachment];
                    let destination = target.texels[index];
                    let value = match (blend, *attachment) {
                        (BlendMode::Replace, _) => source,
                        (BlendMode::AlphaBlend, _) => {
                            let alpha = source.w;
                            (source.truncate() * alpha + destination.truncate() * (1.0 - alpha))
                                .extend(alpha + destination.w * (1.0 - alpha))
                        }
                        (BlendMode::WeightedAccumulate, 0) => destination + source,
                        (BlendMode::WeightedAccumulate, _) => destination * (1.0 - source.x),
                    };
                    target.store(index, value);
                }
            });
        }
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "Software Backend"
    }

    fn window_size(&self) -> (u32, u32) {
        self.window
    }

    fn set_window_size(&mut self, width: u32, height: u32) -> BackendResult<()> {
        self.default_target = Some(Self::create_default_target(width, height)?);
        self.window = (width, height);
        log::debug!("SoftwareBackend: resized default framebuffer to {}x{}", width, height);
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
        let max = self.max_texture_size;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} is {}x{}, sizes must be within 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }
        log::trace!(
            "SoftwareBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let id = self.allocate_id();
        self.textures.insert(id, SoftTexture::new(desc.clone()));
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        self.textures
            .get_mut(&texture.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            })?
            .load_bytes(data)
    }

    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| t.desc.clone())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<Vec4>> {
        self.textures
            .get(&texture.0)
            .map(|t| t.texels.clone())
            .ok_or(BackendError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            })
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        log::trace!("SoftwareBackend: destroying texture {}", texture.0);
        self.textures.remove(&texture.0);
    }

    fn create_frame_buffer(
        &mut self,
        attachments: &[(AttachmentPoint, TextureHandle)],
    ) -> BackendResult<FrameBufferHandle> {
        check_attachments(attachments, |handle| self.texture_descriptor(handle))?;

        let id = self.allocate_id();
        self.frame_buffers.insert(id, attachments.to_vec());
        log::trace!("SoftwareBackend: created framebuffer {} with {} attachments", id, attachments.len());
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
        log::trace!("SoftwareBackend: created program '{}' ({})", name, id);
        Ok(ProgramHandle(id))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
    }

    fn clear(&mut self, op: &ClearOp) -> BackendResult<()> {
        let mut targets = self.take_targets()?;
        for (index, _, texture) in targets.colors.iter_mut() {
            if let Some(color) = op.color_for(*index, self.clear_color) {
                texture.fill(color);
            }
        }
        if op.depth {
            if let Some((_, depth)) = targets.depth.as_mut() {
                depth.fill(Vec4::ONE);
            }
        }
        self.restore_targets(targets);
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
        log::trace!("SoftwareBackend: draw {} with {} texture units", kind.name(), call.textures.len());

        let mut targets = self.take_targets()?;
        let result = self.execute_draw(kind, call, &mut targets);
        self.restore_targets(targets);
        if result.is_ok() {
            self.draw_count += 1;
        }
        result
    }

    fn read_current_frame(&mut self, area: Rectangle, format: ReadFormat) -> BackendResult<Vec<u8>> {
        let source = match self.bound {
            Some(frame_buffer) => {
                let attachments = self.frame_buffers.get(&frame_buffer.0).ok_or(
                    BackendError::InvalidHandle {
                        kind: "framebuffer",
                        id: frame_buffer.0,
                    },
                )?;
                let (_, handle) = attachments
                    .iter()
                    .find(|(point, _)| *point == AttachmentPoint::Color0)
                    .ok_or_else(|| {
                        BackendError::ReadbackFailed("bound framebuffer has no color attachment".into())
                    })?;
                self.textures.get(&handle.0).ok_or(BackendError::InvalidHandle {
                    kind: "texture",
                    id: handle.0,
                })?
            }
            None => self.default_target.as_ref().ok_or(BackendError::DeviceLost)?,
        };

        pack_frame(&source.texels, source.width(), source.height(), area, format)
    }

    fn finish_frame(&mut self) -> BackendResult<()> {
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
    use crate::backend::program::uniforms;
    use crate::resources::{Mesh, Uniform, UniformSet};
    use glam::Mat4;

    fn rgba_texture(backend: &mut SoftwareBackend, size: u32) -> TextureHandle {
        backend
            .create_texture(&TextureDescriptor::new("color", size, size, TextureFormat::Rgba8Unorm))
            .unwrap()
    }

    #[test]
    fn test_clear_default_framebuffer_and_read_back() {
        let mut backend = SoftwareBackend::new(4, 2).unwrap();
        backend.set_clear_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
        backend.clear(&ClearOp::all()).unwrap();

        let pixels = backend
            .read_current_frame(Rectangle::new(0, 0, 4, 2), ReadFormat::Rgb)
            .unwrap();
        assert_eq!(pixels.len(), 4 * 2 * 3);
        assert!(pixels.chunks(3).all(|p| p == [255, 0, 0]));
    }

    #[test]
    fn test_frame_read_is_bottom_up() {
        let mut backend = SoftwareBackend::new(1, 2).unwrap();
        let target = backend.default_target.as_mut().unwrap();
        target.store(0, Vec4::ONE);
        target.store(1, Vec4::new(0.0, 0.0, 0.0, 1.0));

        let pixels = backend
            .read_current_frame(Rectangle::new(0, 0, 1, 2), ReadFormat::Rgb)
            .unwrap();
        assert_eq!(pixels, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_sampling_an_attached_texture_fails() {
        let mut backend = SoftwareBackend::new(4, 4).unwrap();
        let color = rgba_texture(&mut backend, 4);
        let fb = backend
            .create_frame_buffer(&[(AttachmentPoint::Color0, color)])
            .unwrap();
        let program = backend.create_program("screen").unwrap();
        backend.bind_frame_buffer(fb).unwrap();

        let uniforms = UniformSet::new();
        let result = backend.draw(&DrawCall {
            program,
            geometry: Geometry::Screen,
            textures: &[(0, color)],
            uniforms: &uniforms,
        });
        assert!(matches!(result, Err(BackendError::DrawFailed(_))));
        // The attachment is restored after the failed draw
        assert!(backend.texture_descriptor(color).is_some());
    }

    #[test]
    fn test_texture_over_size_limit_rejected() {
        let mut backend = SoftwareBackend::new(4, 4).unwrap().with_max_texture_size(16);
        let result = backend.create_texture(&TextureDescriptor::new(
            "large",
            32,
            8,
            TextureFormat::Rgba8Unorm,
        ));
        assert!(matches!(result, Err(BackendError::TextureCreationFailed(_))));
        assert_eq!(backend.texture_count(), 0);
        rgba_texture(&mut backend, 16);
        assert_eq!(backend.texture_count(), 1);
    }

    #[test]
    fn test_depth_attachment_requires_depth_format() {
        let mut backend = SoftwareBackend::new(4, 4).unwrap();
        let color = rgba_texture(&mut backend, 4);
        let result = backend.create_frame_buffer(&[(AttachmentPoint::Depth, color)]);
        assert!(matches!(result, Err(BackendError::FrameBufferCreationFailed(_))));
    }

    #[test]
    fn test_unknown_program_rejected() {
        let mut backend = SoftwareBackend::new(4, 4).unwrap();
        assert_eq!(
            backend.create_program("phong"),
            Err(BackendError::UnknownProgram("phong".into()))
        );
    }

    #[test]
    fn test_solid_quad_fills_gbuffer() {
        let mut backend = SoftwareBackend::new(8, 8).unwrap();
        backend.set_capability(Capability::DepthTest, true);
        backend.set_capability(Capability::CullFace, true);
        let colors = rgba_texture(&mut backend, 8);
        let depths = backend
            .create_texture(&TextureDescriptor::new("depth", 8, 8, TextureFormat::Depth32Float))
            .unwrap();
        let fb = backend
            .create_frame_buffer(&[(AttachmentPoint::Color0, colors), (AttachmentPoint::Depth, depths)])
            .unwrap();
        let program = backend.create_program("solid").unwrap();

        // A quad scaled to cover the view volume, one unit in front of the camera
        let model = Mat4::from_translation(glam::Vec3::new(-1.0, -1.0, -1.0))
            * Mat4::from_scale(glam::Vec3::new(2.0, 2.0, 1.0));
        let projection = Mat4::orthographic_rh(-1.0, 1.0, -1.0, 1.0, 0.0, 2.0);
        let uniforms = UniformSet::new()
            .with(uniforms::MODEL_MATRIX, Uniform::Mat4(model))
            .with(uniforms::PROJECTION_MATRIX, Uniform::Mat4(projection))
            .with(uniforms::MODEL_COLOR, Uniform::Vec4(Vec4::new(0.0, 1.0, 0.0, 1.0)));
        let quad = Mesh::quad();

        backend.bind_frame_buffer(fb).unwrap();
        backend.clear(&ClearOp::all()).unwrap();
        backend
            .draw(&DrawCall {
                program,
                geometry: Geometry::Mesh(&quad),
                textures: &[],
                uniforms: &uniforms,
            })
            .unwrap();
        backend.unbind_frame_buffer(fb).unwrap();

        let texels = backend.read_texture(colors).unwrap();
        assert!(texels.iter().all(|t| *t == Vec4::new(0.0, 1.0, 0.0, 1.0)));
        let depth = backend.read_texture(depths).unwrap();
        assert!(depth.iter().all(|d| (d.x - 0.5).abs() < 1e-5));
    }
}
