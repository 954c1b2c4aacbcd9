//! Resource management
//!
//! Meshes, materials, models and the uniform values they carry, plus text rasterization
//! for GUI labels.

mod material;
mod mesh;
mod model;
mod text;
mod uniform;

pub use material::*;
pub use mesh::*;
pub use model::*;
pub use text::*;
pub use uniform::*;
