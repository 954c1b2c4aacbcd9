//! GUI overlay and presentation

use crate::backend::{FilterMode, ProgramKind, TextureDescriptor, TextureFormat, TextureHandle};
use crate::error::RenderResult;
use crate::pipeline::OwnedResources;
use crate::render_graph::{
    FrameContext, GraphNode, GraphicsSession, NodeContext, NodeLifecycle, NodeState, Pipeline,
    PipelineBindings, PipelineBuilder, Slot,
};
use crate::resources::{Material, Model, ModelId, ModelList};
use crate::scene::{Camera, Projection};
use std::any::Any;
use std::sync::Arc;

const COLORS: &[Slot] = &[Slot::texture("colors")];

/// Pixel-space camera: x right, y up, origin at the bottom-left corner of the window
pub fn gui_camera(width: u32, height: u32) -> Camera {
    Camera::new(Projection::orthographic(0.0, width as f32, 0.0, height as f32, -1.0, 1.0))
}

/// Draws the GUI models over the input colors and presents the result to the default
/// framebuffer. Always the last node of a graph.
pub struct RenderGuiNode {
    lifecycle: NodeLifecycle,
    camera: Camera,
    models: ModelList,
    resources: OwnedResources,
    colors: Option<TextureHandle>,
    pipeline: Option<Pipeline>,
}

impl RenderGuiNode {
    pub fn new(name: &str, models: ModelList) -> Self {
        Self {
            lifecycle: NodeLifecycle::new(name),
            camera: gui_camera(1, 1),
            models,
            resources: OwnedResources::default(),
            colors: None,
            pipeline: None,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn models(&self) -> &ModelList {
        &self.models
    }

    pub fn add_model(&self, model: Model) {
        self.models.add(model);
    }

    pub fn remove_model(&self, id: ModelId) -> Option<Model> {
        self.models.remove(id)
    }

    pub fn clear_models(&self) {
        self.models.clear();
    }
}

impl RenderGuiNode {
    fn allocate(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let input = ctx.input("colors")?;
        let (width, height) = (ctx.params.width, ctx.params.height);
        self.camera = gui_camera(width, height);

        let colors = self.resources.texture(
            ctx.session,
            &TextureDescriptor::new("gui colors", width, height, TextureFormat::Rgba8Unorm)
                .with_filter(FilterMode::Linear),
        )?;
        let frame_buffer = self.resources.color_frame_buffer(ctx.session, colors)?;
        let screen = ctx.session.program(ProgramKind::Screen.name())?;
        let copy_input = Arc::new(Material::new("gui background", screen).with_texture(0, input));
        let present = Arc::new(Material::new("present", screen).with_texture(0, colors));

        self.pipeline = Some(
            PipelineBuilder::new()
                .bind(frame_buffer)
                .render_screen(copy_input)
                .use_camera()
                .render_models()
                .unbind(frame_buffer)
                .render_screen(present)
                .build()?,
        );
        self.colors = Some(colors);
        Ok(())
    }

    fn release(&mut self, session: &mut GraphicsSession) {
        self.pipeline = None;
        self.colors = None;
        self.resources.release(session);
    }
}

impl GraphNode for RenderGuiNode {
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
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        let models = self.models.read();
        pipeline.run(
            ctx,
            PipelineBindings {
                camera: Some(&self.camera),
                models: &models,
                uniforms: None,
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
    use glam::Vec3;

    #[test]
    fn test_gui_camera_maps_pixels_to_clip_space() {
        let camera = gui_camera(200, 100);
        let clip = camera.view_projection_matrix();
        let bottom_left = clip.project_point3(Vec3::ZERO);
        let top_right = clip.project_point3(Vec3::new(200.0, 100.0, 0.0));
        assert!(bottom_left.truncate().abs_diff_eq(glam::Vec2::new(-1.0, -1.0), 1e-5));
        assert!(top_right.truncate().abs_diff_eq(glam::Vec2::new(1.0, 1.0), 1e-5));
    }
}
