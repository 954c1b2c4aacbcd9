//! Parameters handed to nodes while they are created and rendered

use crate::backend::TextureHandle;
use crate::error::{GraphError, RenderResult};
use crate::render_graph::session::GraphicsSession;
use glam::Mat4;
use std::collections::HashMap;

/// Graph-wide frame parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphParams {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in degrees
    pub field_of_view: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            field_of_view: 60.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl GraphParams {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn tan_half_fov(&self) -> f32 {
        (self.field_of_view.to_radians() * 0.5).tan()
    }
}

/// Camera state of the current and previous frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub previous_view: Mat4,
    pub previous_projection: Mat4,
    /// Motion blur scale, measured frame rate over target frame rate
    pub blur_strength: f32,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            previous_view: Mat4::IDENTITY,
            previous_projection: Mat4::IDENTITY,
            blur_strength: 0.0,
        }
    }
}

/// Handed to [`GraphNode::create`](crate::render_graph::GraphNode::create)
pub struct NodeContext<'a> {
    pub session: &'a mut GraphicsSession,
    pub params: &'a GraphParams,
    pub(crate) node: &'a str,
    pub(crate) inputs: &'a HashMap<&'static str, TextureHandle>,
}

impl<'a> NodeContext<'a> {
    /// Producer texture wired into an input slot
    pub fn input(&self, slot: &str) -> RenderResult<TextureHandle> {
        self.inputs.get(slot).copied().ok_or_else(|| {
            GraphError::UnconnectedInput {
                node: self.node.to_string(),
                slot: slot.to_string(),
            }
            .into()
        })
    }
}

/// Handed to [`GraphNode::render`](crate::render_graph::GraphNode::render)
pub struct FrameContext<'a> {
    pub session: &'a mut GraphicsSession,
    pub params: &'a GraphParams,
    pub frame: &'a FrameUniforms,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_projection_parameters() {
        let params = GraphParams {
            width: 800,
            height: 600,
            field_of_view: 90.0,
            ..Default::default()
        };
        assert!((params.aspect_ratio() - 4.0 / 3.0).abs() < 1e-6);
        assert!((params.tan_half_fov() - 1.0).abs() < 1e-6);
    }
}
