//! Weighted blended order-independent transparency

use crate::backend::{
    uniforms, AttachmentPoint, ClearOp, FilterMode, FrameBufferHandle, ProgramKind,
    TextureDescriptor, TextureFormat, TextureHandle,
};
use crate::error::RenderResult;
use crate::pipeline::render_models::track_previous_matrix;
use crate::pipeline::OwnedResources;
use crate::render_graph::{
    FrameContext, GraphNode, GraphicsSession, NodeContext, NodeLifecycle, NodeState, Pipeline,
    PipelineBindings, PipelineBuilder, Slot,
};
use crate::resources::{Material, Model, ModelId, ModelList, Uniform, UniformSet};
use glam::{Vec3, Vec4};
use std::any::Any;
use std::sync::Arc;

const INPUTS: &[Slot] = &[Slot::texture("colors"), Slot::texture("depths")];
const OUTPUTS: &[Slot] = &[Slot::texture("colors")];

/// Accumulates transparent models into a weighted color sum and a revealage product, tested
/// against the opaque depth buffer, then composites them over the input colors
pub struct RenderTransparentModelsNode {
    lifecycle: NodeLifecycle,
    models: ModelList,
    light_direction: Vec3,
    resources: OwnedResources,
    colors: Option<TextureHandle>,
    pipeline: Option<Pipeline>,
}

impl RenderTransparentModelsNode {
    pub fn new(name: &str, models: ModelList) -> Self {
        Self {
            lifecycle: NodeLifecycle::new(name),
            models,
            light_direction: Vec3::NEG_Y,
            resources: OwnedResources::default(),
            colors: None,
            pipeline: None,
        }
    }

    pub fn models(&self) -> &ModelList {
        &self.models
    }

    pub fn add_model(&self, mut model: Model) {
        track_previous_matrix(&mut model);
        self.models.add(model);
    }

    pub fn remove_model(&self, id: ModelId) -> Option<Model> {
        self.models.remove(id)
    }

    pub fn clear_models(&self) {
        self.models.clear();
    }

    pub fn light_direction(&self) -> Vec3 {
        self.light_direction
    }

    pub fn set_light_direction(&mut self, direction: Vec3) {
        self.light_direction = direction.normalize_or_zero();
    }
}

fn transparency_pipeline(
    accumulate: FrameBufferHandle,
    composite: FrameBufferHandle,
    blending: Material,
) -> RenderResult<Pipeline> {
    PipelineBuilder::new()
        .bind(accumulate)
        .clear(ClearOp::colors(vec![Vec4::ZERO, Vec4::ONE]))
        .render_models()
        .unbind(accumulate)
        .bind(composite)
        .render_screen(Arc::new(blending))
        .unbind(composite)
        .build()
}

impl RenderTransparentModelsNode {
    fn allocate(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let backdrop = ctx.input("colors")?;
        let depths = ctx.input("depths")?;
        let (width, height) = (ctx.params.width, ctx.params.height);

        let accumulation = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new("transparency accumulation", width, height, TextureFormat::Rgba16Float),
        )?;
        let revealage = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new("transparency revealage", width, height, TextureFormat::R8Unorm),
        )?;
        let colors = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new("transparency colors", width, height, TextureFormat::Rgba8Unorm)
                .with_filter(FilterMode::Linear),
        )?;

        let accumulate = self.resources.frame_buffer(
            ctx.session,
            &[
                (AttachmentPoint::Color0, accumulation),
                (AttachmentPoint::Color1, revealage),
                (AttachmentPoint::Depth, depths),
            ],
        )?;
        let composite = self.resources.color_frame_buffer(ctx.session, colors)?;

        let program = ctx.session.program(ProgramKind::TransparencyBlending.name())?;
        let blending = Material::new("transparency blending", program)
            .with_texture(0, backdrop)
            .with_texture(1, accumulation)
            .with_texture(2, revealage);

        self.pipeline = Some(transparency_pipeline(accumulate, composite, blending)?);
        self.colors = Some(colors);
        Ok(())
    }

    fn release(&mut self, session: &mut GraphicsSession) {
        self.pipeline = None;
        self.colors = None;
        self.resources.release(session);
    }
}

impl GraphNode for RenderTransparentModelsNode {
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
        let models = self.models.read();
        pipeline.run(
            ctx,
            PipelineBindings {
                camera: None,
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
    use crate::backend::ClearColors;
    use crate::render_graph::PipelineStep;

    #[test]
    fn test_accumulation_cleared_to_zero_and_revealage_to_one() {
        let pipeline = transparency_pipeline(
            FrameBufferHandle(1),
            FrameBufferHandle(2),
            Material::new("blend", crate::backend::ProgramHandle(3)),
        )
        .unwrap();
        let clear = pipeline.steps().iter().find_map(|step| match step {
            PipelineStep::Clear(op) => Some(op.clone()),
            _ => None,
        });
        let clear = clear.unwrap();
        assert_eq!(
            clear.colors,
            ClearColors::PerAttachment(vec![Vec4::ZERO, Vec4::ONE])
        );
        assert!(!clear.depth);
    }

    #[test]
    fn test_models_shared_with_list() {
        let list = ModelList::new();
        let node = RenderTransparentModelsNode::new("transparency", list.clone());
        let model = Model::new(Arc::new(crate::resources::Mesh::quad()));
        let id = model.id();
        node.add_model(model);
        assert!(list.contains(id));
        assert!(node.remove_model(id).is_some());
        assert!(list.is_empty());
    }
}
