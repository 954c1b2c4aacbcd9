//! Separable blur
//!
//! Two full-screen passes, horizontal then vertical. The kernel is stored as a half kernel
//! with adjacent taps packed into one bilinear fetch: entry `k >= 1` covers offsets `2k-1`
//! and `2k` with their summed weight at their weighted mean offset.

use crate::backend::{uniforms, FrameBufferHandle, ProgramKind, TextureHandle};
use crate::error::{RenderError, RenderResult};
use crate::pipeline::OwnedResources;
use crate::render_graph::{
    FrameContext, GraphNode, GraphicsSession, NodeContext, NodeLifecycle, NodeState, Pipeline,
    PipelineBindings, PipelineBuilder, Slot,
};
use crate::resources::{Material, Uniform, UniformSet};
use glam::Vec2;
use std::any::Any;
use std::sync::Arc;

/// Weight function evaluated at each discrete kernel offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelGenerator {
    /// `exp(-(x / radius)^2)`
    #[default]
    Gaussian,
    /// Constant weight
    Box,
}

impl KernelGenerator {
    pub fn weight(&self, x: f32, radius: f32) -> f32 {
        match self {
            KernelGenerator::Gaussian => {
                let x = x / radius;
                (-(x * x)).exp()
            }
            KernelGenerator::Box => 1.0,
        }
    }
}

/// Normalized half kernel with packed offsets
#[derive(Debug, Clone, PartialEq)]
pub struct BlurKernel {
    size: usize,
    weights: Vec<f32>,
    offsets: Vec<f32>,
}

impl BlurKernel {
    /// Build a kernel of `size` taps. Even sizes are reduced by one; sizes that end up at
    /// one or below are rejected.
    pub fn new(size: usize, generator: KernelGenerator) -> RenderResult<Self> {
        let size = if size % 2 == 0 { size.saturating_sub(1) } else { size };
        if size <= 1 {
            return Err(RenderError::InvalidConfiguration(
                "blur kernel size must be at least 3".into(),
            ));
        }

        let radius = size as f32;
        let half = (size - 1) / 2 + 1;
        let mut weights = vec![0.0; half];
        let mut offsets = vec![0.0; half];

        weights[0] = generator.weight(0.0, radius);
        let mut sum = weights[0];
        for i in (1..size).step_by(2) {
            let first = generator.weight(i as f32, radius);
            let second = generator.weight((i + 1) as f32, radius);
            let pair = first + second;
            let index = (i + 1) / 2;
            weights[index] = pair;
            offsets[index] = (i as f32 * first + (i + 1) as f32 * second) / pair;
            sum += pair * 2.0;
        }
        for weight in &mut weights {
            *weight /= sum;
        }

        Ok(Self {
            size,
            weights,
            offsets,
        })
    }

    /// Full kernel width in taps, always odd
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of entries in the half kernel
    pub fn half_size(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn offsets(&self) -> &[f32] {
        &self.offsets
    }

    pub fn uniforms(&self) -> UniformSet {
        UniformSet::new()
            .with(uniforms::KERNEL_SIZE, Uniform::Int(self.half_size() as i32))
            .with(uniforms::KERNEL, Uniform::FloatArray(self.weights.clone()))
            .with(uniforms::OFFSETS, Uniform::FloatArray(self.offsets.clone()))
    }
}

struct BlurPasses {
    horizontal_frame_buffer: FrameBufferHandle,
    vertical_frame_buffer: FrameBufferHandle,
    horizontal: Arc<Material>,
    vertical: Arc<Material>,
}

/// The two blur passes from an input texture to an output texture, shared by the blur and
/// SSAO nodes
pub(crate) struct SeparableBlur {
    kernel: BlurKernel,
    passes: Option<BlurPasses>,
}

impl SeparableBlur {
    pub fn new(kernel: BlurKernel) -> Self {
        Self {
            kernel,
            passes: None,
        }
    }

    pub fn kernel(&self) -> &BlurKernel {
        &self.kernel
    }

    /// Replace the kernel, updating the pass materials if they exist
    pub fn set_kernel(&mut self, kernel: BlurKernel) {
        if let Some(passes) = &mut self.passes {
            let values = kernel.uniforms();
            passes.horizontal = Arc::new(passes.horizontal.as_ref().clone().with_uniforms(&values));
            passes.vertical = Arc::new(passes.vertical.as_ref().clone().with_uniforms(&values));
        }
        self.kernel = kernel;
    }

    /// Allocate the intermediate target and the pass materials
    pub fn create(
        &mut self,
        resources: &mut OwnedResources,
        session: &mut GraphicsSession,
        input: TextureHandle,
        output: TextureHandle,
    ) -> RenderResult<()> {
        let backend = session.backend();
        let (Some(input_desc), Some(output_desc)) =
            (backend.texture_descriptor(input), backend.texture_descriptor(output))
        else {
            return Err(RenderError::InvalidConfiguration(
                "blur input and output must be live textures".into(),
            ));
        };

        let mut intermediate_desc = output_desc;
        intermediate_desc.label = Some("blur intermediate".into());
        let intermediate = resources.texture(session, &intermediate_desc)?;
        let horizontal_frame_buffer = resources.color_frame_buffer(session, intermediate)?;
        let vertical_frame_buffer = resources.color_frame_buffer(session, output)?;

        let program = session.program(ProgramKind::Blur.name())?;
        let kernel = self.kernel.uniforms();
        let material = |name: &str, source: TextureHandle, width: u32, height: u32, direction: Vec2| {
            Arc::new(
                Material::new(name, program)
                    .with_texture(0, source)
                    .with_uniform(
                        uniforms::RESOLUTION,
                        Uniform::Vec2(Vec2::new(width as f32, height as f32)),
                    )
                    .with_uniform(uniforms::DIRECTION, Uniform::Vec2(direction))
                    .with_uniforms(&kernel),
            )
        };

        self.passes = Some(BlurPasses {
            horizontal_frame_buffer,
            vertical_frame_buffer,
            horizontal: material("blur horizontal", input, input_desc.width, input_desc.height, Vec2::X),
            vertical: material(
                "blur vertical",
                intermediate,
                intermediate_desc.width,
                intermediate_desc.height,
                Vec2::Y,
            ),
        });
        Ok(())
    }

    /// Append both passes to a pipeline
    pub fn append_to(&self, builder: PipelineBuilder) -> PipelineBuilder {
        match &self.passes {
            Some(passes) => builder
                .bind(passes.horizontal_frame_buffer)
                .render_screen(passes.horizontal.clone())
                .unbind(passes.horizontal_frame_buffer)
                .bind(passes.vertical_frame_buffer)
                .render_screen(passes.vertical.clone())
                .unbind(passes.vertical_frame_buffer),
            None => builder,
        }
    }

    /// Forget the pass resources. They are released with the owning node's resources.
    pub fn reset(&mut self) {
        self.passes = None;
    }
}

const COLORS: &[Slot] = &[Slot::texture("colors")];

/// Generic blur of the `colors` input
pub struct BlurNode {
    lifecycle: NodeLifecycle,
    generator: KernelGenerator,
    blur: SeparableBlur,
    resources: OwnedResources,
    colors: Option<TextureHandle>,
    pipeline: Option<Pipeline>,
}

impl BlurNode {
    pub const DEFAULT_KERNEL_SIZE: usize = 5;

    pub fn new(name: &str) -> RenderResult<Self> {
        let generator = KernelGenerator::default();
        Ok(Self {
            lifecycle: NodeLifecycle::new(name),
            generator,
            blur: SeparableBlur::new(BlurKernel::new(Self::DEFAULT_KERNEL_SIZE, generator)?),
            resources: OwnedResources::default(),
            colors: None,
            pipeline: None,
        })
    }

    pub fn kernel(&self) -> &BlurKernel {
        self.blur.kernel()
    }

    /// Rebuild the kernel with the current generator. On failure the kernel is unchanged.
    pub fn set_kernel_size(&mut self, size: usize) -> RenderResult<()> {
        let kernel = BlurKernel::new(size, self.generator)?;
        self.blur.set_kernel(kernel);
        if self.lifecycle.state() == NodeState::Created {
            self.pipeline = Some(self.build_pipeline()?);
        }
        Ok(())
    }

    /// Takes effect at the next [`BlurNode::set_kernel_size`]
    pub fn set_kernel_generator(&mut self, generator: KernelGenerator) {
        self.generator = generator;
    }

    pub fn kernel_generator(&self) -> KernelGenerator {
        self.generator
    }

    fn build_pipeline(&self) -> RenderResult<Pipeline> {
        self.blur.append_to(PipelineBuilder::new()).build()
    }
}

impl BlurNode {
    /// Allocate targets and build the pipeline. Partial allocations are released by the
    /// caller on error.
    fn allocate(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let input = ctx.input("colors")?;
        let mut desc = ctx
            .session
            .backend()
            .texture_descriptor(input)
            .filter(|desc| !desc.format.is_depth())
            .ok_or_else(|| RenderError::InvalidConfiguration("blur input must be a color texture".into()))?;
        desc.label = Some(format!("{} colors", self.name()));

        let colors = self.resources.texture(ctx.session, &desc)?;
        self.blur.create(&mut self.resources, ctx.session, input, colors)?;
        self.colors = Some(colors);
        self.pipeline = Some(self.build_pipeline()?);
        Ok(())
    }

    fn release(&mut self, session: &mut GraphicsSession) {
        self.pipeline = None;
        self.blur.reset();
        self.colors = None;
        self.resources.release(session);
    }
}

impl GraphNode for BlurNode {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    fn input_slots(&self) -> &'static [Slot] {
        COLORS
    }

    fn output_slots(&self) -> &'static [Slot] {
        COLORS
    }

    fn output(&self, slot: &str) -> Option<TextureHandle> {
        match slot {
            "colors" => self.colors,
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
