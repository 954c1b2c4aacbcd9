//! Directional light shadows
//!
//! The solid models are drawn depth-only from the light camera into a square shadow map.
//! A screen pass then projects every G-buffer pixel into light space and compares its depth
//! against a rotated Poisson-like disk of shadow map samples.

use crate::backend::{
    uniforms, AttachmentPoint, ClearColors, ClearOp, FilterMode, FrameBufferHandle, ProgramHandle,
    ProgramKind, TextureDescriptor, TextureFormat, TextureHandle, WrapMode, MAX_KERNEL_SIZE,
};
use crate::error::{LifecycleError, RenderError, RenderResult};
use crate::pipeline::OwnedResources;
use crate::render_graph::{
    FrameContext, GraphNode, GraphicsSession, NodeContext, NodeLifecycle, NodeState, Pipeline,
    PipelineBindings, PipelineBuilder, Slot,
};
use crate::resources::{Material, ModelList, Uniform, UniformSet};
use crate::scene::{Camera, Projection};
use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::sync::Arc;

const INPUTS: &[Slot] = &[Slot::texture("normals"), Slot::texture("depths")];
const OUTPUTS: &[Slot] = &[Slot::texture("shadows")];

const KERNEL_SEED: u64 = 0x5ad0;
const NOISE_SEED: u64 = 0x0b5e;

/// Points uniformly distributed in the unit disk
pub fn disk_kernel(size: usize, seed: u64) -> Vec<Vec2> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(size);
    while samples.len() < size {
        let point = Vec2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
        if point.length_squared() <= 1.0 {
            samples.push(point);
        }
    }
    samples
}

/// Random rotation angles in `[0, 1)` turns, one R8 texel each
fn angle_noise(size: u32, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..size * size).map(|_| rng.gen::<u8>()).collect()
}

struct ShadowTargets {
    shadows: TextureHandle,
    map_frame_buffer: FrameBufferHandle,
    shadows_frame_buffer: FrameBufferHandle,
    depth_program: ProgramHandle,
}

/// Renders a shadow map from the light camera and resolves it into a screen-space shadow
/// factor (1 lit, 0 shadowed)
pub struct ShadowMappingNode {
    lifecycle: NodeLifecycle,
    camera: Camera,
    light_direction: Vec3,
    models: ModelList,
    map_size: u32,
    kernel: Vec<Vec2>,
    noise_size: u32,
    bias: f32,
    radius: f32,
    resources: OwnedResources,
    targets: Option<ShadowTargets>,
    material: Option<Arc<Material>>,
    pipeline: Option<Pipeline>,
}

impl ShadowMappingNode {
    pub fn new(name: &str, models: ModelList) -> Self {
        Self {
            lifecycle: NodeLifecycle::new(name),
            camera: Camera::new(Projection::orthographic(-10.0, 10.0, -10.0, 10.0, 0.0, 20.0)),
            light_direction: Vec3::NEG_Y,
            models,
            map_size: 2048,
            kernel: disk_kernel(8, KERNEL_SEED),
            noise_size: 5,
            bias: 0.005,
            radius: 0.0004,
            resources: OwnedResources::default(),
            targets: None,
            material: None,
            pipeline: None,
        }
    }

    /// Camera the shadow map is rendered from
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn light_direction(&self) -> Vec3 {
        self.light_direction
    }

    pub fn set_light_direction(&mut self, direction: Vec3) {
        self.light_direction = direction.normalize_or_zero();
    }

    pub fn models(&self) -> &ModelList {
        &self.models
    }

    pub fn shadow_map_size(&self) -> u32 {
        self.map_size
    }

    pub fn kernel(&self) -> &[Vec2] {
        &self.kernel
    }

    pub fn noise_size(&self) -> u32 {
        self.noise_size
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_shadow_map_size(&mut self, size: u32) -> RenderResult<()> {
        self.ensure_uninitialized()?;
        if size == 0 {
            return Err(RenderError::InvalidConfiguration(
                "shadow map size must be positive".into(),
            ));
        }
        self.map_size = size;
        Ok(())
    }

    pub fn set_kernel_size(&mut self, size: usize) -> RenderResult<()> {
        if size == 0 || size > MAX_KERNEL_SIZE {
            return Err(RenderError::InvalidConfiguration(format!(
                "shadow kernel size must be between 1 and {}, got {}",
                MAX_KERNEL_SIZE, size
            )));
        }
        self.kernel = disk_kernel(size, KERNEL_SEED);
        self.refresh()
    }

    pub fn set_noise_size(&mut self, size: u32) -> RenderResult<()> {
        self.ensure_uninitialized()?;
        if size == 0 {
            return Err(RenderError::InvalidConfiguration(
                "shadow noise size must be positive".into(),
            ));
        }
        self.noise_size = size;
        Ok(())
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.bias = bias;
        if self.refresh().is_err() {
            log::warn!("Failed to rebuild pipeline of node '{}'", self.name());
        }
    }

    pub fn set_radius(&mut self, radius: f32) -> RenderResult<()> {
        if radius <= 0.0 {
            return Err(RenderError::InvalidConfiguration(format!(
                "shadow radius must be positive, got {}",
                radius
            )));
        }
        self.radius = radius;
        self.refresh()
    }

    fn ensure_uninitialized(&self) -> RenderResult<()> {
        if self.lifecycle.state() != NodeState::Uninitialized {
            return Err(LifecycleError::AlreadyCreated(self.name().to_string()).into());
        }
        Ok(())
    }

    fn apply_settings(&self, material: Material) -> Material {
        material
            .with_uniform(uniforms::KERNEL_SIZE, Uniform::Int(self.kernel.len() as i32))
            .with_uniform(uniforms::KERNEL, Uniform::Vec2Array(self.kernel.clone()))
            .with_uniform(uniforms::BIAS, Uniform::Float(self.bias))
            .with_uniform(uniforms::RADIUS, Uniform::Float(self.radius))
    }

    fn refresh(&mut self) -> RenderResult<()> {
        if let Some(material) = self.material.take() {
            self.material = Some(Arc::new(self.apply_settings(material.as_ref().clone())));
            self.pipeline = Some(self.build_pipeline()?);
        }
        Ok(())
    }

    fn build_pipeline(&self) -> RenderResult<Pipeline> {
        let (Some(targets), Some(material)) = (&self.targets, &self.material) else {
            return PipelineBuilder::new().build();
        };
        PipelineBuilder::new()
            .bind(targets.map_frame_buffer)
            .clear(ClearOp {
                colors: ClearColors::None,
                depth: true,
            })
            .use_camera()
            .render_models_with(targets.depth_program)
            .unbind(targets.map_frame_buffer)
            .bind(targets.shadows_frame_buffer)
            .render_screen(material.clone())
            .unbind(targets.shadows_frame_buffer)
            .build()
    }

    /// Per-frame light state merged over the material uniforms
    fn light_uniforms(&self) -> UniformSet {
        UniformSet::new()
            .with(uniforms::LIGHT_VIEW_MATRIX, Uniform::Mat4(self.camera.view_matrix()))
            .with(
                uniforms::LIGHT_PROJECTION_MATRIX,
                Uniform::Mat4(self.camera.projection_matrix()),
            )
            .with(uniforms::LIGHT_DIRECTION, Uniform::Vec3(self.light_direction))
    }
}

impl ShadowMappingNode {
    fn allocate(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let normals = ctx.input("normals")?;
        let depths = ctx.input("depths")?;
        let (width, height) = (ctx.params.width, ctx.params.height);

        let shadow_map = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new("shadow map", self.map_size, self.map_size, TextureFormat::Depth32Float),
        )?;
        let shadows = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new("shadows", width, height, TextureFormat::R8Unorm)
                .with_filter(FilterMode::Linear),
        )?;
        let noise = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new("shadow noise", self.noise_size, self.noise_size, TextureFormat::R8Unorm)
                .with_wrap(WrapMode::Repeat),
        )?;
        ctx.session
            .backend_mut()
            .write_texture(noise, &angle_noise(self.noise_size, NOISE_SEED))?;

        let map_frame_buffer = self
            .resources
            .frame_buffer(ctx.session, &[(AttachmentPoint::Depth, shadow_map)])?;
        let shadows_frame_buffer = self.resources.color_frame_buffer(ctx.session, shadows)?;
        let depth_program = ctx.session.program(ProgramKind::ShadowDepth.name())?;
        let program = ctx.session.program(ProgramKind::Shadow.name())?;

        let material = Material::new("shadow", program)
            .with_texture(0, normals)
            .with_texture(1, depths)
            .with_texture(2, shadow_map)
            .with_texture(3, noise)
            .with_uniform(
                uniforms::NOISE_SCALE,
                Uniform::Vec2(Vec2::new(width as f32, height as f32) / self.noise_size as f32),
            );
        self.material = Some(Arc::new(self.apply_settings(material)));
        self.targets = Some(ShadowTargets {
            shadows,
            map_frame_buffer,
            shadows_frame_buffer,
            depth_program,
        });
        self.pipeline = Some(self.build_pipeline()?);
        Ok(())
    }

    fn release(&mut self, session: &mut GraphicsSession) {
        self.pipeline = None;
        self.material = None;
        self.targets = None;
        self.resources.release(session);
    }
}

impl GraphNode for ShadowMappingNode {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    fn input_slots(&self) -> &'static [Slot] {
        INPUTS
    }

    fn output_slots(&self) -> &'static [Slot] {
        OUTPUTS
    }

    fn output(&self, slot: &str) -> Option<TextureHandle> {
        match slot {
            "shadows" => self.targets.as_ref().map(|targets| targets.shadows),
            _ => None,
        }
    }

    fn create(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        self.lifecycle.begin_create()?;
        if let Err(err) = self.allocate(ctx) {
            self.release(ctx.session);
            return Err(err);
        }
        self.lifecycle.mark_created();
        Ok(())
    }

    fn destroy(&mut self, session: &mut GraphicsSession) -> RenderResult<()> {
        self.lifecycle.check_created()?;
        self.release(session);
        self.lifecycle.mark_destroyed();
        Ok(())
    }

    fn render(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        self.lifecycle.check_created()?;
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        let light = self.light_uniforms();
        let models = self.models.read();
        pipeline.run(
            ctx,
            PipelineBindings {
                camera: Some(&self.camera),
                models: &models,
                uniforms: Some(&light),
            },
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(8)]
    #[case(32)]
    fn test_disk_kernel_inside_unit_disk(#[case] size: usize) {
        let kernel = disk_kernel(size, 11);
        assert_eq!(kernel.len(), size);
        assert!(kernel.iter().all(|p| p.length() <= 1.0));
    }

    #[test]
    fn test_setters_validate() {
        let mut node = ShadowMappingNode::new("shadows", ModelList::new());
        assert!(node.set_shadow_map_size(0).is_err());
        assert!(node.set_kernel_size(0).is_err());
        assert!(node.set_kernel_size(MAX_KERNEL_SIZE + 1).is_err());
        assert!(node.set_radius(-1.0).is_err());
        assert_eq!(node.shadow_map_size(), 2048);
        assert_eq!(node.kernel().len(), 8);

        node.set_bias(0.01);
        node.set_kernel_size(16).unwrap();
        assert_eq!(node.bias(), 0.01);
        assert_eq!(node.kernel().len(), 16);
    }

    #[test]
    fn test_light_uniforms_follow_camera() {
        let mut node = ShadowMappingNode::new("shadows", ModelList::new());
        node.camera_mut().set_position(Vec3::new(0.0, 10.0, 0.0));
        node.set_light_direction(Vec3::new(0.0, -2.0, 0.0));
        let values = node.light_uniforms();
        assert_eq!(
            values.mat4(uniforms::LIGHT_VIEW_MATRIX),
            Some(node.camera().view_matrix())
        );
        assert_eq!(values.vec3(uniforms::LIGHT_DIRECTION), Some(Vec3::NEG_Y));
    }
}
