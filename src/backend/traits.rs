//! Core backend abstraction traits
//!
//! The render graph only talks to the GPU through [`GraphicsBackend`]. Any implementation
//! of the trait can drive the pipeline.

use crate::backend::types::*;
use crate::resources::{Mesh, UniformSet};
use glam::Vec4;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FrameBufferCreationFailed(String),
    #[error("Unknown shader program: {0}")]
    UnknownProgram(String),
    #[error("Invalid {kind} handle: {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("Invalid texture data: {0}")]
    InvalidTextureData(String),
    #[error("Draw failed: {0}")]
    DrawFailed(String),
    #[error("Readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a framebuffer (a set of attached textures)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBufferHandle(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

impl TextureHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl FrameBufferHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl ProgramHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// What a draw call rasterizes
#[derive(Debug, Clone, Copy)]
pub enum Geometry<'a> {
    /// A triangle covering the whole target
    Screen,
    /// Indexed triangles
    Mesh(&'a Mesh),
}

/// A single draw into the currently bound framebuffer
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub program: ProgramHandle,
    pub geometry: Geometry<'a>,
    /// Texture units and the textures bound to them
    pub textures: &'a [(u32, TextureHandle)],
    pub uniforms: &'a UniformSet,
}

/// Main graphics backend trait
///
/// Rows returned by [`GraphicsBackend::read_current_frame`] are ordered bottom-up, matching
/// the usual graphics API convention; [`GraphicsBackend::read_texture`] returns rows top-down.
pub trait GraphicsBackend {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Size of the default framebuffer
    fn window_size(&self) -> (u32, u32);

    /// Resize the default framebuffer
    fn set_window_size(&mut self, width: u32, height: u32) -> BackendResult<()>;

    fn window_title(&self) -> &str;

    fn set_window_title(&mut self, title: &str);

    fn set_capability(&mut self, capability: Capability, enabled: bool);

    fn is_capability_enabled(&self, capability: Capability) -> bool;

    fn set_clear_color(&mut self, color: Vec4);

    fn clear_color(&self) -> Vec4;

    // Textures

    /// Create a texture with undefined contents
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload tightly packed texel data covering the whole texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    /// Descriptor of a live texture, `None` once destroyed
    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor>;

    /// Read a texture back as normalized RGBA values, rows top-down
    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<Vec4>>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    // Framebuffers

    fn create_frame_buffer(
        &mut self,
        attachments: &[(AttachmentPoint, TextureHandle)],
    ) -> BackendResult<FrameBufferHandle>;

    fn destroy_frame_buffer(&mut self, frame_buffer: FrameBufferHandle);

    /// Direct subsequent clears and draws into `frame_buffer`
    fn bind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) -> BackendResult<()>;

    /// Return to the default framebuffer
    fn unbind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) -> BackendResult<()>;

    // Programs

    /// Create one of the programs listed in [`crate::backend::ProgramKind`]
    fn create_program(&mut self, name: &str) -> BackendResult<ProgramHandle>;

    fn destroy_program(&mut self, program: ProgramHandle);

    // Commands

    fn clear(&mut self, op: &ClearOp) -> BackendResult<()>;

    fn draw(&mut self, call: &DrawCall<'_>) -> BackendResult<()>;

    /// Read the color of the bound framebuffer (or the default one) as 8-bit values
    fn read_current_frame(&mut self, area: Rectangle, format: ReadFormat) -> BackendResult<Vec<u8>>;

    /// Submit all recorded work for the frame
    fn finish_frame(&mut self) -> BackendResult<()>;

    // Diagnostics

    /// Number of live textures, for leak checks
    fn texture_count(&self) -> usize;

    /// Number of live framebuffers, for leak checks
    fn frame_buffer_count(&self) -> usize;

    /// Draw calls executed since creation
    fn draw_count(&self) -> u64;
}
