//! Opaque geometry pass filling the G-buffer

use crate::backend::{
    uniforms, AttachmentPoint, ClearOp, FilterMode, TextureDescriptor, TextureFormat,
    TextureHandle, WrapMode,
};
use crate::error::RenderResult;
use crate::pipeline::OwnedResources;
use crate::render_graph::{
    FrameContext, GraphNode, GraphicsSession, NodeContext, NodeLifecycle, NodeState, Pipeline,
    PipelineBindings, PipelineBuilder, Slot,
};
use crate::resources::{Model, ModelId, ModelList, Uniform};
use crate::scene::{Camera, Projection};
use std::any::Any;

const OUTPUTS: &[Slot] = &[
    Slot::texture("colors"),
    Slot::texture("normals"),
    Slot::texture("depths"),
    Slot::texture("vertexNormals"),
    Slot::texture("materials"),
    Slot::texture("velocities"),
];

/// Record the model's current transform as its previous one
pub(crate) fn track_previous_matrix(model: &mut Model) {
    let matrix = model.matrix();
    model.set_uniform(uniforms::PREVIOUS_MODEL_MATRIX, Uniform::Mat4(matrix));
}

#[derive(Debug, Clone, Copy)]
struct GBuffer {
    colors: TextureHandle,
    normals: TextureHandle,
    depths: TextureHandle,
    vertex_normals: TextureHandle,
    materials: TextureHandle,
    velocities: TextureHandle,
}

/// Renders the opaque model list into color, view-space normal, depth, vertex normal,
/// material parameter and screen-space velocity targets.
///
/// Velocities compare each model's matrix against its `previousModelMatrix` and the frame's
/// camera against the previous frame's.
pub struct RenderModelsNode {
    lifecycle: NodeLifecycle,
    camera: Camera,
    models: ModelList,
    resources: OwnedResources,
    gbuffer: Option<GBuffer>,
    pipeline: Option<Pipeline>,
}

impl RenderModelsNode {
    pub fn new(name: &str, models: ModelList) -> Self {
        Self {
            lifecycle: NodeLifecycle::new(name),
            camera: Camera::default(),
            models,
            resources: OwnedResources::default(),
            gbuffer: None,
            pipeline: None,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    pub fn models(&self) -> &ModelList {
        &self.models
    }

    /// Add a model to the list drawn by the next render
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
}

impl RenderModelsNode {
    fn allocate(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let params = *ctx.params;
        let (width, height) = (params.width, params.height);
        self.camera.set_projection(Projection::perspective(
            params.field_of_view,
            params.aspect_ratio(),
            params.near,
            params.far,
        ));

        let color = |label: &str| {
            TextureDescriptor::new(label, width, height, TextureFormat::Rgba8Unorm)
                .with_wrap(WrapMode::ClampToEdge)
        };
        let gbuffer = GBuffer {
            colors: self
                .resources
                .texture(ctx.session, &color("gbuffer colors").with_filter(FilterMode::Linear))?,
            normals: self.resources.texture(ctx.session, &color("gbuffer normals"))?,
            depths: self.resources.texture(
                ctx.session,
                &TextureDescriptor::new("gbuffer depths", width, height, TextureFormat::Depth32Float),
            )?,
            vertex_normals: self.resources.texture(ctx.session, &color("gbuffer vertex normals"))?,
            materials: self.resources.texture(ctx.session, &color("gbuffer materials"))?,
            velocities: self.resources.texture(
                ctx.session,
                &TextureDescriptor::new("gbuffer velocities", width, height, TextureFormat::Rgba16Float)
                    .with_wrap(WrapMode::ClampToEdge),
            )?,
        };

        let frame_buffer = self.resources.frame_buffer(
            ctx.session,
            &[
                (AttachmentPoint::Color0, gbuffer.colors),
                (AttachmentPoint::Color1, gbuffer.normals),
                (AttachmentPoint::Color2, gbuffer.vertex_normals),
                (AttachmentPoint::Color3, gbuffer.materials),
                (AttachmentPoint::Color4, gbuffer.velocities),
                (AttachmentPoint::Depth, gbuffer.depths),
            ],
        )?;

        self.pipeline = Some(
            PipelineBuilder::new()
                .use_camera()
                .bind(frame_buffer)
                .clear(ClearOp::all())
                .render_models()
                .unbind(frame_buffer)
                .build()?,
        );
        self.gbuffer = Some(gbuffer);
        Ok(())
    }

    fn release(&mut self, session: &mut GraphicsSession) {
        self.pipeline = None;
        self.gbuffer = None;
        self.resources.release(session);
    }
}

impl GraphNode for RenderModelsNode {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> NodeState {
        self.lifecycle.state()
    }

    fn output_slots(&self) -> &'static [Slot] {
        OUTPUTS
    }

    fn output(&self, slot: &str) -> Option<TextureHandle> {
        let gbuffer = self.gbuffer?;
        match slot {
            "colors" => Some(gbuffer.colors),
            "normals" => Some(gbuffer.normals),
            "depths" => Some(gbuffer.depths),
            "vertexNormals" => Some(gbuffer.vertex_normals),
            "materials" => Some(gbuffer.materials),
            "velocities" => Some(gbuffer.velocities),
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
    use crate::resources::{Mesh, Transform};
    use glam::Vec3;
    use std::sync::Arc;

    #[test]
    fn test_added_model_tracks_previous_matrix() {
        let node = RenderModelsNode::new("models", ModelList::new());
        let model = Model::new(Arc::new(Mesh::cube()))
            .with_transform(Transform::from_position(Vec3::new(1.0, 2.0, 3.0)));
        let expected = model.matrix();
        let id = model.id();
        node.add_model(model);

        let models = node.models().read();
        let stored = models.iter().find(|m| m.id() == id).unwrap();
        assert_eq!(
            stored.uniforms().mat4(uniforms::PREVIOUS_MODEL_MATRIX),
            Some(expected)
        );
    }

    #[test]
    fn test_outputs_absent_until_created() {
        let node = RenderModelsNode::new("models", ModelList::new());
        assert_eq!(node.output("colors"), None);
        assert!(node.has_output("vertexNormals"));
        assert!(node.has_output("velocities"));
        assert!(!node.has_output("shadows"));
        assert!(!node.has_input("colors"));
    }
}
