//! Per-node execution plans
//!
//! A [`Pipeline`] is a fixed list of GPU commands built once when a node is created and
//! replayed every frame. Framebuffer binds are checked when the pipeline is built so every
//! bind is matched by an unbind before the run ends.

use crate::backend::{
    uniforms, ClearOp, DrawCall, FrameBufferHandle, Geometry, ProgramHandle,
};
use crate::error::{RenderError, RenderResult};
use crate::render_graph::context::FrameContext;
use crate::resources::{Material, Model, Uniform, UniformSet};
use crate::scene::Camera;
use std::sync::Arc;

/// One GPU command of a pipeline
#[derive(Debug, Clone)]
pub enum PipelineStep {
    /// Draw the following model lists from the node's camera instead of the frame camera
    UseCamera,
    BindFrameBuffer(FrameBufferHandle),
    Clear(ClearOp),
    /// Full-screen pass with a material
    RenderScreen(Arc<Material>),
    /// Draw the node's model list, optionally forcing every model onto one program
    RenderModels { program_override: Option<ProgramHandle> },
    UnbindFrameBuffer(FrameBufferHandle),
}

/// Builds a [`Pipeline`], validating framebuffer binds
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    steps: Vec<PipelineStep>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_camera(mut self) -> Self {
        self.steps.push(PipelineStep::UseCamera);
        self
    }

    pub fn bind(mut self, frame_buffer: FrameBufferHandle) -> Self {
        self.steps.push(PipelineStep::BindFrameBuffer(frame_buffer));
        self
    }

    pub fn clear(mut self, op: ClearOp) -> Self {
        self.steps.push(PipelineStep::Clear(op));
        self
    }

    pub fn render_screen(mut self, material: Arc<Material>) -> Self {
        self.steps.push(PipelineStep::RenderScreen(material));
        self
    }

    pub fn render_models(mut self) -> Self {
        self.steps.push(PipelineStep::RenderModels {
            program_override: None,
        });
        self
    }

    pub fn render_models_with(mut self, program: ProgramHandle) -> Self {
        self.steps.push(PipelineStep::RenderModels {
            program_override: Some(program),
        });
        self
    }

    pub fn unbind(mut self, frame_buffer: FrameBufferHandle) -> Self {
        self.steps.push(PipelineStep::UnbindFrameBuffer(frame_buffer));
        self
    }

    pub fn build(self) -> RenderResult<Pipeline> {
        let mut bound: Option<FrameBufferHandle> = None;
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                PipelineStep::BindFrameBuffer(frame_buffer) => {
                    if let Some(current) = bound {
                        return Err(RenderError::InvalidPipeline(format!(
                            "step {}: framebuffer {} bound while {} is still bound",
                            index,
                            frame_buffer.id(),
                            current.id()
                        )));
                    }
                    bound = Some(*frame_buffer);
                }
                PipelineStep::UnbindFrameBuffer(frame_buffer) => {
                    if bound != Some(*frame_buffer) {
                        return Err(RenderError::InvalidPipeline(format!(
                            "step {}: framebuffer {} unbound but not bound",
                            index,
                            frame_buffer.id()
                        )));
                    }
                    bound = None;
                }
                _ => {}
            }
        }
        if let Some(frame_buffer) = bound {
            return Err(RenderError::InvalidPipeline(format!(
                "framebuffer {} is never unbound",
                frame_buffer.id()
            )));
        }
        Ok(Pipeline { steps: self.steps })
    }
}

/// Runtime inputs of a pipeline run
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineBindings<'a> {
    /// Camera activated by [`PipelineStep::UseCamera`]
    pub camera: Option<&'a Camera>,
    pub models: &'a [Model],
    /// Per-frame values applied to every draw after the material's own uniforms
    pub uniforms: Option<&'a UniformSet>,
}

/// A validated, fixed sequence of GPU commands
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Execute every step against the session. A failing step leaves no framebuffer bound.
    pub fn run(&self, ctx: &mut FrameContext<'_>, bindings: PipelineBindings<'_>) -> RenderResult<()> {
        let mut bound = None;
        let result = self.run_steps(ctx, &bindings, &mut bound);
        if let (Err(err), Some(frame_buffer)) = (&result, bound) {
            log::warn!(
                "Pipeline step failed with framebuffer {} bound, unbinding: {}",
                frame_buffer.id(),
                err
            );
            if let Err(unbind) = ctx.session.backend_mut().unbind_frame_buffer(frame_buffer) {
                log::error!("Failed to unbind framebuffer {}: {}", frame_buffer.id(), unbind);
            }
        }
        result
    }

    fn run_steps(
        &self,
        ctx: &mut FrameContext<'_>,
        bindings: &PipelineBindings<'_>,
        bound: &mut Option<FrameBufferHandle>,
    ) -> RenderResult<()> {
        let screen_uniforms = Self::base_uniforms(ctx, None);
        let mut model_uniforms = screen_uniforms.clone();

        for step in &self.steps {
            match step {
                PipelineStep::UseCamera => {
                    if let Some(camera) = bindings.camera {
                        model_uniforms = Self::base_uniforms(ctx, Some(camera));
                    }
                }
                PipelineStep::BindFrameBuffer(frame_buffer) => {
                    ctx.session.backend_mut().bind_frame_buffer(*frame_buffer)?;
                    *bound = Some(*frame_buffer);
                }
                PipelineStep::Clear(op) => {
                    ctx.session.backend_mut().clear(op)?;
                }
                PipelineStep::RenderScreen(material) => {
                    let mut values = screen_uniforms.clone();
                    values.merge(material.uniforms());
                    if let Some(frame_values) = bindings.uniforms {
                        values.merge(frame_values);
                    }
                    let textures = material.texture_bindings();
                    ctx.session.backend_mut().draw(&DrawCall {
                        program: material.program(),
                        geometry: Geometry::Screen,
                        textures: &textures,
                        uniforms: &values,
                    })?;
                }
                PipelineStep::RenderModels { program_override } => {
                    Self::render_models(ctx, &model_uniforms, *program_override, bindings)?;
                }
                PipelineStep::UnbindFrameBuffer(frame_buffer) => {
                    ctx.session.backend_mut().unbind_frame_buffer(*frame_buffer)?;
                    *bound = None;
                }
            }
        }
        Ok(())
    }

    fn render_models(
        ctx: &mut FrameContext<'_>,
        base: &UniformSet,
        program_override: Option<ProgramHandle>,
        bindings: &PipelineBindings<'_>,
    ) -> RenderResult<()> {
        for model in bindings.models.iter().filter(|m| m.visible) {
            let material = model.material();
            let Some(program) = program_override.or(material.map(|m| m.program())) else {
                continue;
            };

            let mut values = base.clone();
            let mut textures = Vec::new();
            if let Some(material) = material {
                values.merge(material.uniforms());
                textures = material.texture_bindings();
            }
            if let Some(frame_values) = bindings.uniforms {
                values.merge(frame_values);
            }
            values.set(uniforms::MODEL_MATRIX, Uniform::Mat4(model.matrix()));
            values.merge(model.uniforms());

            ctx.session.backend_mut().draw(&DrawCall {
                program,
                geometry: Geometry::Mesh(model.mesh().as_ref()),
                textures: &textures,
                uniforms: &values,
            })?;
        }
        Ok(())
    }

    /// Camera, previous camera and graph parameters shared by every draw of a run
    fn base_uniforms(ctx: &FrameContext<'_>, camera: Option<&Camera>) -> UniformSet {
        let frame = ctx.frame;
        let (view, projection) = match camera {
            Some(camera) => (camera.view_matrix(), camera.projection_matrix()),
            None => (frame.view, frame.projection),
        };
        UniformSet::new()
            .with(uniforms::VIEW_MATRIX, Uniform::Mat4(view))
            .with(uniforms::INVERSE_VIEW_MATRIX, Uniform::Mat4(view.inverse()))
            .with(uniforms::PROJECTION_MATRIX, Uniform::Mat4(projection))
            .with(uniforms::PREVIOUS_VIEW_MATRIX, Uniform::Mat4(frame.previous_view))
            .with(
                uniforms::PREVIOUS_PROJECTION_MATRIX,
                Uniform::Mat4(frame.previous_projection),
            )
            .with(uniforms::BLUR_STRENGTH, Uniform::Float(frame.blur_strength))
            .with(uniforms::TAN_HALF_FOV, Uniform::Float(ctx.params.tan_half_fov()))
            .with(uniforms::ASPECT_RATIO, Uniform::Float(ctx.params.aspect_ratio()))
            .with(uniforms::Z_NEAR, Uniform::Float(ctx.params.near))
            .with(uniforms::Z_FAR, Uniform::Float(ctx.params.far))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        AttachmentPoint, ProgramKind, ReadFormat, Rectangle, SoftwareBackend, TextureDescriptor,
        TextureFormat,
    };
    use crate::render_graph::{FrameUniforms, GraphParams, GraphicsSession};
    use glam::Vec4;

    #[test]
    fn test_failed_step_unbinds_frame_buffer() {
        let mut session = GraphicsSession::new(Box::new(SoftwareBackend::new(4, 4).unwrap()));
        let backend = session.backend_mut();
        backend.set_clear_color(Vec4::new(0.2, 0.4, 0.6, 1.0));
        let color = backend
            .create_texture(&TextureDescriptor::new("color", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let frame_buffer = backend
            .create_frame_buffer(&[(AttachmentPoint::Color0, color)])
            .unwrap();

        // Mesh programs cannot draw full-screen passes
        let solid = session.program(ProgramKind::Solid.name()).unwrap();
        let pipeline = PipelineBuilder::new()
            .bind(frame_buffer)
            .clear(ClearOp::all())
            .render_screen(Arc::new(Material::new("broken", solid)))
            .unbind(frame_buffer)
            .build()
            .unwrap();

        let params = GraphParams::default();
        let frame = FrameUniforms::default();
        let mut ctx = FrameContext {
            session: &mut session,
            params: &params,
            frame: &frame,
        };
        let result = pipeline.run(&mut ctx, PipelineBindings::default());
        assert!(matches!(result, Err(RenderError::Backend(_))));

        // Reads go to the untouched default framebuffer again
        let pixels = session
            .backend_mut()
            .read_current_frame(Rectangle::new(0, 0, 1, 1), ReadFormat::Rgba)
            .unwrap();
        assert_eq!(pixels, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_matched_binds_accepted() {
        let a = FrameBufferHandle(1);
        let b = FrameBufferHandle(2);
        let pipeline = PipelineBuilder::new()
            .bind(a)
            .clear(ClearOp::all())
            .unbind(a)
            .bind(b)
            .unbind(b)
            .build()
            .unwrap();
        assert_eq!(pipeline.steps().len(), 5);
    }

    #[test]
    fn test_nested_bind_rejected() {
        let result = PipelineBuilder::new()
            .bind(FrameBufferHandle(1))
            .bind(FrameBufferHandle(2))
            .build();
        assert!(matches!(result, Err(RenderError::InvalidPipeline(_))));
    }

    #[test]
    fn test_dangling_bind_rejected() {
        let result = PipelineBuilder::new()
            .bind(FrameBufferHandle(1))
            .render_models()
            .build();
        assert!(matches!(result, Err(RenderError::InvalidPipeline(_))));
    }

    #[test]
    fn test_mismatched_unbind_rejected() {
        let result = PipelineBuilder::new()
            .bind(FrameBufferHandle(1))
            .unbind(FrameBufferHandle(2))
            .build();
        assert!(matches!(result, Err(RenderError::InvalidPipeline(_))));
    }
}
