//! Cameras

mod camera;

pub use camera::*;
