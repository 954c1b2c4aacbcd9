//! Deferred directional lighting

use crate::backend::{
    uniforms, FilterMode, FrameBufferHandle, ProgramKind, TextureDescriptor, TextureFormat,
    TextureHandle,
};
use crate::error::RenderResult;
use crate::pipeline::OwnedResources;
use crate::render_graph::{
    FrameContext, GraphNode, GraphicsSession, NodeContext, NodeLifecycle, NodeState, Pipeline,
    PipelineBindings, PipelineBuilder, Slot,
};
use crate::resources::{Material, Uniform, UniformSet};
use glam::Vec3;
use std::any::Any;
use std::sync::Arc;

const INPUTS: &[Slot] = &[
    Slot::texture("colors"),
    Slot::texture("normals"),
    Slot::texture("depths"),
    Slot::texture("materials"),
    Slot::texture("occlusions"),
    Slot::texture("shadows"),
    Slot::texture("velocities"),
];
const OUTPUTS: &[Slot] = &[Slot::texture("colors")];

/// Combines the G-buffer with the ambient occlusion and shadow terms under a single
/// directional light. Blurs each pixel along its G-buffer velocity when the frame blur
/// strength is positive.
pub struct LightingNode {
    lifecycle: NodeLifecycle,
    light_direction: Vec3,
    resources: OwnedResources,
    colors: Option<TextureHandle>,
    pipeline: Option<Pipeline>,
}

impl LightingNode {
    pub fn new(name: &str) -> Self {
        Self {
            lifecycle: NodeLifecycle::new(name),
            light_direction: Vec3::NEG_Y,
            resources: OwnedResources::default(),
            colors: None,
            pipeline: None,
        }
    }

    /// World-space direction the light travels in
    pub fn light_direction(&self) -> Vec3 {
        self.light_direction
    }

    pub fn set_light_direction(&mut self, direction: Vec3) {
        self.light_direction = direction.normalize_or_zero();
    }
}

fn lighting_pipeline(frame_buffer: FrameBufferHandle, material: Material) -> RenderResult<Pipeline> {
    PipelineBuilder::new()
        .bind(frame_buffer)
        .render_screen(Arc::new(material))
        .unbind(frame_buffer)
        .build()
}

impl LightingNode {
    fn allocate(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let mut material = Material::new("lighting", ctx.session.program(ProgramKind::Lighting.name())?);
        for (unit, slot) in INPUTS.iter().enumerate() {
            material = material.with_texture(unit as u32, ctx.input(slot.name)?);
        }

        let colors = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new(
                "lit colors",
                ctx.params.width,
                ctx.params.height,
                TextureFormat::Rgba8Unorm,
            )
            .with_filter(FilterMode::Linear),
        )?;
        let frame_buffer = self.resources.color_frame_buffer(ctx.session, colors)?;

        self.pipeline = Some(lighting_pipeline(frame_buffer, material)?);
        self.colors = Some(colors);
        Ok(())
    }

    fn release(&mut self, session: &mut GraphicsSession) {
        self.pipeline = None;
        self.colors = None;
        self.resources.release(session);
    }
}

impl GraphNode for LightingNode {
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
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        let light = UniformSet::new().with(uniforms::LIGHT_DIRECTION, Uniform::Vec3(self.light_direction));
        pipeline.run(
            ctx,
            PipelineBindings {
                uniforms: Some(&light),
                ..Default::default()
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
