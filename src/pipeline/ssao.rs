//! Screen-space ambient occlusion

use crate::backend::{
    uniforms, FilterMode, FrameBufferHandle, ProgramKind, TextureDescriptor, TextureFormat,
    TextureHandle, WrapMode, MAX_KERNEL_SIZE,
};
use crate::error::{LifecycleError, RenderError, RenderResult};
use crate::pipeline::blur::{BlurKernel, KernelGenerator, SeparableBlur};
use crate::pipeline::OwnedResources;
use crate::render_graph::{
    FrameContext, GraphNode, GraphicsSession, NodeContext, NodeLifecycle, NodeState, Pipeline,
    PipelineBindings, PipelineBuilder, Slot,
};
use crate::resources::{Material, Uniform};
use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::sync::Arc;

const INPUTS: &[Slot] = &[Slot::texture("normals"), Slot::texture("depths")];
const OUTPUTS: &[Slot] = &[Slot::texture("occlusions")];

const KERNEL_SEED: u64 = 0x55a0;
const NOISE_SEED: u64 = 0x0c1d;

/// Hemisphere samples oriented along +Z, denser near the origin
pub fn hemisphere_kernel(size: usize, threshold: f32, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..size)
        .map(|i| {
            let direction = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(0.0..1.0),
            )
            .try_normalize()
            .unwrap_or(Vec3::Z);
            let t = i as f32 / size as f32;
            let scale = threshold + (1.0 - threshold) * t * t;
            direction * scale * rng.gen::<f32>().max(threshold)
        })
        .collect()
}

/// Random rotation vectors in the XY plane, encoded into RGBA8 texels
fn rotation_noise(size: u32, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..size * size)
        .flat_map(|_| {
            let rotation = Vec2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            let encoded = (rotation * 0.5 + 0.5) * 255.0;
            [encoded.x.round() as u8, encoded.y.round() as u8, 0, 255]
        })
        .collect()
}

/// Occlusion estimate from the G-buffer normals and depths, denoised by a box blur the size
/// of the noise tile
pub struct SsaoNode {
    lifecycle: NodeLifecycle,
    kernel: Vec<Vec3>,
    threshold: f32,
    noise_size: u32,
    radius: f32,
    power: f32,
    blur: SeparableBlur,
    resources: OwnedResources,
    occlusions: Option<TextureHandle>,
    material: Option<Arc<Material>>,
    raw_frame_buffer: Option<FrameBufferHandle>,
    pipeline: Option<Pipeline>,
}

impl SsaoNode {
    pub fn new(name: &str) -> RenderResult<Self> {
        let noise_size = 5;
        let threshold = 0.15;
        Ok(Self {
            lifecycle: NodeLifecycle::new(name),
            kernel: hemisphere_kernel(8, threshold, KERNEL_SEED),
            threshold,
            noise_size,
            radius: 0.5,
            power: 2.0,
            blur: SeparableBlur::new(BlurKernel::new(noise_size as usize, KernelGenerator::Box)?),
            resources: OwnedResources::default(),
            occlusions: None,
            material: None,
            raw_frame_buffer: None,
            pipeline: None,
        })
    }

    pub fn kernel(&self) -> &[Vec3] {
        &self.kernel
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn noise_size(&self) -> u32 {
        self.noise_size
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn power(&self) -> f32 {
        self.power
    }

    /// Regenerate the sample kernel with `size` samples scaled between `threshold` and 1
    pub fn set_kernel_size(&mut self, size: usize, threshold: f32) -> RenderResult<()> {
        if size == 0 || size > MAX_KERNEL_SIZE {
            return Err(RenderError::InvalidConfiguration(format!(
                "SSAO kernel size must be between 1 and {}, got {}",
                MAX_KERNEL_SIZE, size
            )));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RenderError::InvalidConfiguration(format!(
                "SSAO threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        self.kernel = hemisphere_kernel(size, threshold, KERNEL_SEED);
        self.threshold = threshold;
        self.refresh()
    }

    /// Noise tile size and denoising blur size. Only valid before the node is created.
    pub fn set_noise_size(&mut self, size: u32) -> RenderResult<()> {
        if self.lifecycle.state() != NodeState::Uninitialized {
            return Err(LifecycleError::AlreadyCreated(self.name().to_string()).into());
        }
        let kernel = BlurKernel::new(size as usize, KernelGenerator::Box)?;
        self.noise_size = size;
        self.blur.set_kernel(kernel);
        Ok(())
    }

    pub fn set_radius(&mut self, radius: f32) -> RenderResult<()> {
        if radius <= 0.0 {
            return Err(RenderError::InvalidConfiguration(format!(
                "SSAO radius must be positive, got {}",
                radius
            )));
        }
        self.radius = radius;
        self.refresh()
    }

    pub fn set_power(&mut self, power: f32) -> RenderResult<()> {
        if power <= 0.0 {
            return Err(RenderError::InvalidConfiguration(format!(
                "SSAO power must be positive, got {}",
                power
            )));
        }
        self.power = power;
        self.refresh()
    }

    fn apply_settings(&self, material: Material) -> Material {
        material
            .with_uniform(uniforms::KERNEL_SIZE, Uniform::Int(self.kernel.len() as i32))
            .with_uniform(uniforms::KERNEL, Uniform::Vec3Array(self.kernel.clone()))
            .with_uniform(uniforms::RADIUS, Uniform::Float(self.radius))
            .with_uniform(uniforms::POWER, Uniform::Float(self.power))
    }

    /// Push changed settings into a created node's material
    fn refresh(&mut self) -> RenderResult<()> {
        if let Some(material) = self.material.take() {
            self.material = Some(Arc::new(self.apply_settings(material.as_ref().clone())));
            self.pipeline = Some(self.build_pipeline()?);
        }
        Ok(())
    }

    fn build_pipeline(&self) -> RenderResult<Pipeline> {
        let mut builder = PipelineBuilder::new();
        if let (Some(frame_buffer), Some(material)) = (self.raw_frame_buffer, &self.material) {
            builder = builder
                .bind(frame_buffer)
                .render_screen(material.clone())
                .unbind(frame_buffer);
        }
        self.blur.append_to(builder).build()
    }
}

impl SsaoNode {
    fn allocate(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let normals = ctx.input("normals")?;
        let depths = ctx.input("depths")?;
        let (width, height) = (ctx.params.width, ctx.params.height);

        let target = |label: &str| {
            TextureDescriptor::new(label, width, height, TextureFormat::R8Unorm)
                .with_filter(FilterMode::Linear)
        };
        let raw = self.resources.texture(ctx.session, &target("ssao raw occlusions"))?;
        let occlusions = self.resources.texture(ctx.session, &target("ssao occlusions"))?;

        let noise = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new("ssao noise", self.noise_size, self.noise_size, TextureFormat::Rgba8Unorm)
                .with_wrap(WrapMode::Repeat),
        )?;
        ctx.session
            .backend_mut()
            .write_texture(noise, &rotation_noise(self.noise_size, NOISE_SEED))?;

        self.raw_frame_buffer = Some(self.resources.color_frame_buffer(ctx.session, raw)?);
        let program = ctx.session.program(ProgramKind::Ssao.name())?;
        let material = Material::new("ssao", program)
            .with_texture(0, normals)
            .with_texture(1, depths)
            .with_texture(2, noise)
            .with_uniform(
                uniforms::NOISE_SCALE,
                Uniform::Vec2(Vec2::new(width as f32, height as f32) / self.noise_size as f32),
            );
        self.material = Some(Arc::new(self.apply_settings(material)));

        self.blur.create(&mut self.resources, ctx.session, raw, occlusions)?;
        self.occlusions = Some(occlusions);
        self.pipeline = Some(self.build_pipeline()?);
        Ok(())
    }

    fn release(&mut self, session: &mut GraphicsSession) {
        self.pipeline = None;
        self.material = None;
        self.raw_frame_buffer = None;
        self.occlusions = None;
        self.blur.reset();
        self.resources.release(session);
    }
}

impl GraphNode for SsaoNode {
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
            "occlusions" => self.occlusions,
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
        if let Some(pipeline) = &self.pipeline {
            pipeline.run(ctx, PipelineBindings::default())?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
