//! Deferred rendering pipeline
//!
//! The concrete graph nodes and the function wiring them into the deferred pipeline:
//! 1. Models pass - opaque geometry into the G-buffer
//! 2. Shadow mapping and SSAO - screen-space occlusion terms from the G-buffer
//! 3. Lighting - combines the G-buffer with both occlusion terms, blurring along velocities
//! 4. Transparency - weighted blended transparent geometry over the lit image
//! 5. GUI - text overlay, presented to the default framebuffer

pub mod blur;
pub mod gui;
pub mod lighting;
pub mod render_models;
pub mod shadow_mapping;
pub mod ssao;
pub mod transparency;

pub use blur::{BlurKernel, BlurNode, KernelGenerator};
pub use gui::RenderGuiNode;
pub use lighting::LightingNode;
pub use render_models::RenderModelsNode;
pub use shadow_mapping::ShadowMappingNode;
pub use ssao::SsaoNode;
pub use transparency::RenderTransparentModelsNode;

use crate::backend::{AttachmentPoint, FrameBufferHandle, TextureDescriptor, TextureHandle};
use crate::error::RenderResult;
use crate::render_graph::{GraphParams, GraphicsSession, RenderGraph};
use crate::resources::ModelList;

/// Node names used by [`build_deferred_graph`]
pub mod names {
    pub const MODELS: &str = "models";
    pub const SHADOWS: &str = "shadows";
    pub const SSAO: &str = "ssao";
    pub const LIGHTING: &str = "lighting";
    pub const TRANSPARENCY: &str = "transparency";
    pub const GUI: &str = "gui";
}

/// Configuration for the Deferred pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredConfig {
    /// Square shadow map resolution
    pub shadow_map_size: u32,
    /// Percentage-closer filtering samples
    pub shadow_kernel_size: usize,
    pub shadow_noise_size: u32,
    pub shadow_bias: f32,
    /// Filtering radius in shadow map UV units
    pub shadow_radius: f32,
    /// Hemisphere samples
    pub ssao_kernel_size: usize,
    /// Minimum sample scale, samples are spread between it and 1
    pub ssao_threshold: f32,
    /// Noise tile size, also the size of the denoising blur
    pub ssao_noise_size: u32,
    pub ssao_radius: f32,
    pub ssao_power: f32,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        let blur_size = 5;
        Self {
            shadow_map_size: 2048,
            shadow_kernel_size: 8,
            shadow_noise_size: blur_size,
            shadow_bias: 0.005,
            shadow_radius: 0.0004,
            ssao_kernel_size: 8,
            ssao_threshold: 0.15,
            ssao_noise_size: blur_size,
            ssao_radius: 0.5,
            ssao_power: 2.0,
        }
    }
}

/// Model lists the deferred graph draws. They outlive any single graph.
#[derive(Debug, Clone, Default)]
pub struct DeferredModels {
    pub solid: ModelList,
    pub transparent: ModelList,
    pub gui: ModelList,
}

/// Build the Deferred render graph. Nodes are added and wired but not created; call
/// [`RenderGraph::rebuild`] to create them.
pub fn build_deferred_graph(
    params: GraphParams,
    config: &DeferredConfig,
    models: &DeferredModels,
) -> RenderResult<RenderGraph> {
    use names::*;

    let mut graph = RenderGraph::new(params);

    graph.add_node(RenderModelsNode::new(MODELS, models.solid.clone()))?;

    let mut shadows = ShadowMappingNode::new(SHADOWS, models.solid.clone());
    shadows.set_shadow_map_size(config.shadow_map_size)?;
    shadows.set_kernel_size(config.shadow_kernel_size)?;
    shadows.set_noise_size(config.shadow_noise_size)?;
    shadows.set_bias(config.shadow_bias);
    shadows.set_radius(config.shadow_radius)?;
    graph.add_node(shadows)?;
    graph.connect(SHADOWS, "normals", "vertexNormals", MODELS)?;
    graph.connect(SHADOWS, "depths", "depths", MODELS)?;

    let mut ssao = SsaoNode::new(SSAO)?;
    ssao.set_kernel_size(config.ssao_kernel_size, config.ssao_threshold)?;
    ssao.set_noise_size(config.ssao_noise_size)?;
    ssao.set_radius(config.ssao_radius)?;
    ssao.set_power(config.ssao_power)?;
    graph.add_node(ssao)?;
    graph.connect(SSAO, "normals", "normals", MODELS)?;
    graph.connect(SSAO, "depths", "depths", MODELS)?;

    graph.add_node(LightingNode::new(LIGHTING))?;
    graph.connect(LIGHTING, "colors", "colors", MODELS)?;
    graph.connect(LIGHTING, "normals", "normals", MODELS)?;
    graph.connect(LIGHTING, "depths", "depths", MODELS)?;
    graph.connect(LIGHTING, "materials", "materials", MODELS)?;
    graph.connect(LIGHTING, "occlusions", "occlusions", SSAO)?;
    graph.connect(LIGHTING, "shadows", "shadows", SHADOWS)?;
    graph.connect(LIGHTING, "velocities", "velocities", MODELS)?;

    graph.add_node(RenderTransparentModelsNode::new(TRANSPARENCY, models.transparent.clone()))?;
    graph.connect(TRANSPARENCY, "depths", "depths", MODELS)?;
    graph.connect(TRANSPARENCY, "colors", "colors", LIGHTING)?;

    graph.add_node(RenderGuiNode::new(GUI, models.gui.clone()))?;
    graph.connect(GUI, "colors", "colors", TRANSPARENCY)?;

    Ok(graph)
}

/// Textures and framebuffers a node allocated, released together
#[derive(Debug, Default)]
pub(crate) struct OwnedResources {
    textures: Vec<TextureHandle>,
    frame_buffers: Vec<FrameBufferHandle>,
}

impl OwnedResources {
    pub fn texture(
        &mut self,
        session: &mut GraphicsSession,
        desc: &TextureDescriptor,
    ) -> RenderResult<TextureHandle> {
        let texture = session.backend_mut().create_texture(desc)?;
        self.textures.push(texture);
        Ok(texture)
    }

    pub fn frame_buffer(
        &mut self,
        session: &mut GraphicsSession,
        attachments: &[(AttachmentPoint, TextureHandle)],
    ) -> RenderResult<FrameBufferHandle> {
        let frame_buffer = session.backend_mut().create_frame_buffer(attachments)?;
        self.frame_buffers.push(frame_buffer);
        Ok(frame_buffer)
    }

    /// Framebuffer with a single color attachment
    pub fn color_frame_buffer(
        &mut self,
        session: &mut GraphicsSession,
        texture: TextureHandle,
    ) -> RenderResult<FrameBufferHandle> {
        self.frame_buffer(session, &[(AttachmentPoint::Color0, texture)])
    }

    /// Destroy framebuffers, then textures
    pub fn release(&mut self, session: &mut GraphicsSession) {
        let backend = session.backend_mut();
        for frame_buffer in self.frame_buffers.drain(..) {
            backend.destroy_frame_buffer(frame_buffer);
        }
        for texture in self.textures.drain(..) {
            backend.destroy_texture(texture);
        }
    }
}
