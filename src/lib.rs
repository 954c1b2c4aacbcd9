//! Deferred Graph Engine - a render graph driving a deferred-shading pipeline
//!
//! The graph is built from nodes with named texture slots. Connections between slots define
//! the execution order, and every node records a fixed pipeline of GPU commands when it is
//! created.
//!
//! # Features
//! - G-buffer fill of opaque models (colors, normals, depths, vertex normals, materials,
//!   screen-space velocities)
//! - Directional light shadow mapping with rotated PCF
//! - Screen-space ambient occlusion with a separable denoising blur
//! - Deferred lighting with per-pixel motion blur
//! - Weighted blended order-independent transparency
//! - GUI text overlay, screenshots and a frame rate monitor
//!
//! Rendering goes through the [`backend::GraphicsBackend`] trait. [`backend::SoftwareBackend`]
//! implements it on the CPU; the `wgpu-backend` feature adds a headless GPU implementation.

pub mod backend;
pub mod error;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod resources;
pub mod scene;

pub use backend::{GraphicsBackend, SoftwareBackend};
pub use error::{GraphError, LifecycleError, RenderError, RenderResult};
pub use pipeline::{build_deferred_graph, DeferredConfig, DeferredModels};
pub use render_graph::{GraphNode, GraphParams, RenderGraph};
pub use renderer::Renderer;

use glam::Vec4;
use std::path::PathBuf;

/// Configuration for the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Window title, also shown by the FPS overlay banner
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Vertical field of view in degrees
    pub field_of_view: f32,
    pub near: f32,
    pub far: f32,
    pub cull_back_faces: bool,
    /// Tint of solid models
    pub solid_color: Vec4,
    /// Frame rate at which the motion blur strength is 1
    pub target_fps: u32,
    /// TTF font for the FPS overlay. No overlay without one.
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub deferred: DeferredConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Graph Engine".to_string(),
            width: 1200,
            height: 800,
            field_of_view: 60.0,
            near: 0.1,
            far: 1000.0,
            cull_back_faces: true,
            solid_color: Vec4::new(0.8, 0.8, 0.8, 1.0),
            target_fps: 60,
            font_path: None,
            font_size: 15.0,
            deferred: DeferredConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Reject values the graph cannot be built with
    pub fn validate(&self) -> RenderResult<()> {
        let invalid = |message: String| Err(RenderError::InvalidConfiguration(message));
        if self.width == 0 || self.height == 0 {
            return invalid(format!("window size must be positive, got {}x{}", self.width, self.height));
        }
        if !(self.field_of_view > 0.0 && self.field_of_view < 180.0) {
            return invalid(format!("field of view must be within (0, 180), got {}", self.field_of_view));
        }
        if !(self.near > 0.0 && self.far > self.near) {
            return invalid(format!(
                "planes must satisfy 0 < near < far, got {} and {}",
                self.near, self.far
            ));
        }
        if self.target_fps == 0 {
            return invalid("target frame rate must be positive".into());
        }
        Ok(())
    }
}
