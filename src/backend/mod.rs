//! Backend abstraction layer
//!
//! Provides the graphics context trait the render graph drives, plus the backends that
//! implement it. The software backend is always available; the wgpu backend is behind the
//! `wgpu-backend` feature.

pub(crate) mod common;
pub(crate) mod params;
pub mod program;
pub mod software;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use program::{uniforms, BlendMode, ProgramKind, MAX_KERNEL_SIZE};
pub use software::SoftwareBackend;
pub use traits::*;
pub use types::*;
