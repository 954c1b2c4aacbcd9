//! Common types shared between backends

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    R8Unorm,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    /// Number of channels a shader sees when sampling this format
    pub fn channels(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba16Float => 4,
            TextureFormat::R8Unorm | TextureFormat::R32Float | TextureFormat::Depth32Float => 1,
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm | TextureFormat::R32Float | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }

    /// Whether stored values are quantized to 8-bit unsigned normalized integers
    pub fn is_unorm8(&self) -> bool {
        matches!(self, TextureFormat::Rgba8Unorm | TextureFormat::R8Unorm)
    }
}

/// Texture filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Texture coordinate wrapping mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl TextureDescriptor {
    pub fn new(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            format,
            filter: FilterMode::Nearest,
            wrap: WrapMode::ClampToEdge,
        }
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }

    /// Byte size of a tightly packed upload for this texture
    pub fn data_size(&self) -> usize {
        (self.width * self.height * self.format.bytes_per_pixel()) as usize
    }
}

/// Where a texture is attached on a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentPoint {
    Color0,
    Color1,
    Color2,
    Color3,
    Color4,
    Depth,
}

impl AttachmentPoint {
    /// Index of the color output this attachment receives, `None` for depth
    pub fn color_index(&self) -> Option<usize> {
        match self {
            AttachmentPoint::Color0 => Some(0),
            AttachmentPoint::Color1 => Some(1),
            AttachmentPoint::Color2 => Some(2),
            AttachmentPoint::Color3 => Some(3),
            AttachmentPoint::Color4 => Some(4),
            AttachmentPoint::Depth => None,
        }
    }
}

/// Fixed-function state toggled on the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CullFace,
    DepthTest,
    DepthClamp,
}

/// Region of the current framebuffer, origin at the bottom-left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Pixel layout requested from a framebuffer read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFormat {
    Rgb,
    Rgba,
}

impl ReadFormat {
    pub fn components(&self) -> usize {
        match self {
            ReadFormat::Rgb => 3,
            ReadFormat::Rgba => 4,
        }
    }
}

/// Color values written by a clear
#[derive(Debug, Clone, PartialEq)]
pub enum ClearColors {
    /// Leave color attachments untouched
    None,
    /// Use the context clear color for every color attachment
    Context,
    /// One value per color attachment, in attachment order
    PerAttachment(Vec<Vec4>),
}

/// Clear operation applied to the currently bound framebuffer
#[derive(Debug, Clone, PartialEq)]
pub struct ClearOp {
    pub colors: ClearColors,
    pub depth: bool,
}

impl ClearOp {
    /// Clear colors with the context clear color and depth to 1.0
    pub fn all() -> Self {
        Self {
            colors: ClearColors::Context,
            depth: true,
        }
    }

    pub fn colors(colors: Vec<Vec4>) -> Self {
        Self {
            colors: ClearColors::PerAttachment(colors),
            depth: false,
        }
    }

    pub fn color_for(&self, index: usize, context: Vec4) -> Option<Vec4> {
        match &self.colors {
            ClearColors::None => None,
            ClearColors::Context => Some(context),
            ClearColors::PerAttachment(values) => values.get(index).copied(),
        }
    }
}

impl Default for ClearOp {
    fn default() -> Self {
        Self::all()
    }
}

/// Standard vertex with position, normal and UV
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
    }

    #[test]
    fn test_clear_op_colors() {
        let op = ClearOp::colors(vec![Vec4::ZERO, Vec4::ONE]);
        assert_eq!(op.color_for(1, Vec4::splat(0.5)), Some(Vec4::ONE));
        assert_eq!(op.color_for(2, Vec4::splat(0.5)), None);
        assert_eq!(
            ClearOp::all().color_for(3, Vec4::splat(0.5)),
            Some(Vec4::splat(0.5))
        );
    }
}
