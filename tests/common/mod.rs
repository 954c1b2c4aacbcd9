//! Shared helpers for the integration tests.

#![allow(dead_code)]

use deferred_graph_engine::backend::GraphicsBackend;
use deferred_graph_engine::render_graph::GraphicsSession;
use deferred_graph_engine::{DeferredConfig, RendererConfig, SoftwareBackend};
use glam::Vec4;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// A clear color every 8-bit target stores exactly
pub const CLEAR_COLOR: Vec4 = Vec4::new(0.2, 0.4, 0.6, 1.0);

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Backends the tests can run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// CPU reference backend, always available
    Software,
    /// Headless wgpu device, needs the `wgpu-backend` feature and an adapter
    Wgpu,
}

impl Backend {
    /// Create the backend, `None` when it is not available on this machine
    pub fn create(self, width: u32, height: u32) -> Option<Box<dyn GraphicsBackend>> {
        match self {
            Backend::Software => Some(Box::new(SoftwareBackend::new(width, height).ok()?)),
            #[cfg(feature = "wgpu-backend")]
            Backend::Wgpu => {
                use deferred_graph_engine::backend::wgpu_backend::WgpuBackend;
                match WgpuBackend::new_headless(width, height) {
                    Ok(backend) => Some(Box::new(backend)),
                    Err(e) => {
                        eprintln!("wgpu backend not available: {e}");
                        None
                    }
                }
            }
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::Wgpu => None,
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn software_session(width: u32, height: u32) -> GraphicsSession {
    init_logging();
    GraphicsSession::new(Box::new(
        SoftwareBackend::new(width, height).expect("software backend"),
    ))
}

/// Renderer configuration small enough for the CPU backend
pub fn small_config(width: u32, height: u32) -> RendererConfig {
    RendererConfig {
        title: "Integration".into(),
        width,
        height,
        deferred: DeferredConfig {
            shadow_map_size: 64,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Fresh directory under the system temp dir
pub fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!(
        "deferred-graph-engine-{name}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

// ============================================================================
// Pixel checks
// ============================================================================

/// Compare colors allowing one step of 8-bit quantization
pub fn assert_color_eq(actual: Vec4, expected: Vec4) {
    assert!(
        actual.abs_diff_eq(expected, 1.5 / 255.0),
        "expected {expected}, got {actual}"
    );
}

pub fn assert_all_pixels(pixels: &[Vec4], expected: Vec4) {
    assert!(!pixels.is_empty());
    for (index, pixel) in pixels.iter().enumerate() {
        assert!(
            pixel.abs_diff_eq(expected, 1.5 / 255.0),
            "pixel {index}: expected {expected}, got {pixel}"
        );
    }
}

pub fn to_rgb8(color: Vec4) -> [u8; 3] {
    let rgb = (color.truncate() * 255.0).round();
    [rgb.x as u8, rgb.y as u8, rgb.z as u8]
}
