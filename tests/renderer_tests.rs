//! Renderer integration tests on the software backend.

mod common;

use common::{small_config, temp_dir, to_rgb8, CLEAR_COLOR};
use deferred_graph_engine::pipeline::names;
use deferred_graph_engine::resources::{Mesh, Model, Transform};
use deferred_graph_engine::{RenderError, Renderer, SoftwareBackend};
use glam::{Vec3, Vec4};
use std::sync::Arc;

fn renderer(width: u32, height: u32) -> Renderer {
    common::init_logging();
    let mut renderer = Renderer::new(small_config(width, height));
    renderer
        .init(Box::new(SoftwareBackend::new(width, height).unwrap()))
        .unwrap();
    renderer
}

fn cube() -> Model {
    Model::new(Arc::new(Mesh::cube()))
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_init_builds_deferred_graph() {
    let renderer = renderer(32, 24);
    let graph = renderer.graph().unwrap();
    assert_eq!(
        graph.execution_order(),
        vec![
            names::MODELS,
            names::SHADOWS,
            names::SSAO,
            names::LIGHTING,
            names::TRANSPARENCY,
            names::GUI
        ]
    );
}

#[test]
fn test_init_twice_fails() {
    let mut renderer = renderer(16, 16);
    let result = renderer.init(Box::new(SoftwareBackend::new(16, 16).unwrap()));
    assert!(matches!(result, Err(RenderError::Lifecycle(_))));
}

#[test]
fn test_dispose_then_render_fails() {
    let mut renderer = renderer(16, 16);
    renderer.render().unwrap();
    renderer.dispose().unwrap();
    assert!(!renderer.is_initialized());
    assert!(matches!(renderer.render(), Err(RenderError::NotInitialized)));
}

#[test]
fn test_resize_rebuilds_graph_and_keeps_models() {
    let mut renderer = renderer(16, 12);
    let id = renderer.add_solid_model(cube());
    renderer.set_window_size(20, 10).unwrap();

    assert_eq!(renderer.session().unwrap().backend().window_size(), (20, 10));
    assert!(renderer.solid_models().contains(id));
    renderer.render().unwrap();

    assert!(renderer.set_window_size(0, 10).is_err());
}

#[test]
fn test_failed_graph_rebuild_releases_everything() {
    common::init_logging();
    let mut renderer = Renderer::new(small_config(32, 32));
    let backend = SoftwareBackend::new(32, 32).unwrap().with_max_texture_size(64);
    renderer.init(Box::new(backend)).unwrap();
    assert!(renderer.session().unwrap().backend().texture_count() > 0);

    assert!(matches!(
        renderer.set_window_size(96, 32),
        Err(RenderError::Backend(_))
    ));
    assert!(renderer.graph().is_none());
    let backend = renderer.session().unwrap().backend();
    assert_eq!(backend.texture_count(), 0);
    assert_eq!(backend.frame_buffer_count(), 0);

    renderer.set_window_size(32, 32).unwrap();
    renderer.render().unwrap();
}

// ============================================================================
// Models
// ============================================================================

#[test]
fn test_model_lives_in_one_list_with_matching_material() {
    let mut renderer = renderer(16, 16);
    let id = renderer.add_solid_model(cube());
    assert!(renderer.solid_models().contains(id));

    let model = renderer.remove_model(id).unwrap();
    let id = renderer.add_transparent_model(model);
    assert!(!renderer.solid_models().contains(id));
    assert!(renderer.transparent_models().contains(id));

    let models = renderer.transparent_models().read();
    let material = models[0].material().unwrap();
    assert_eq!(material.name(), "transparency");
}

#[test]
fn test_adding_to_other_list_moves_model() {
    let mut renderer = renderer(16, 16);
    let model = cube();
    let id = model.id();
    renderer.add_solid_model(model.clone());
    renderer.add_transparent_model(model);

    assert!(!renderer.solid_models().contains(id));
    assert_eq!(renderer.transparent_models().len(), 1);

    renderer.clear_models();
    assert!(renderer.transparent_models().is_empty());
}

#[test]
fn test_models_added_before_init_get_materials() {
    common::init_logging();
    let mut renderer = Renderer::new(small_config(16, 16));
    let id = renderer.add_solid_model(cube());
    assert!(renderer.solid_models().read()[0].material().is_none());

    renderer
        .init(Box::new(SoftwareBackend::new(16, 16).unwrap()))
        .unwrap();
    let models = renderer.solid_models().read();
    assert_eq!(models[0].id(), id);
    assert_eq!(models[0].material().unwrap().name(), "solid");
}

#[test]
fn test_lit_cube_covers_center_of_frame() {
    let mut renderer = renderer(32, 24);
    renderer.camera_mut().set_position(Vec3::new(0.0, 0.0, 5.0));
    renderer
        .update_light(Vec3::NEG_Z, Vec3::ZERO, Vec3::splat(10.0))
        .unwrap();
    renderer.add_solid_model(cube().with_transform(Transform::from_position(Vec3::ZERO)));
    renderer.render().unwrap();
    renderer.render().unwrap();

    let dir = temp_dir("lit-cube");
    let path = renderer.save_screenshot(&dir).unwrap();
    let image = image::open(&path).unwrap().to_rgb8();
    let center = image.get_pixel(16, 12).0;
    let corner = image.get_pixel(0, 0).0;
    assert!(center.iter().any(|&c| c > 0), "{center:?}");
    assert_eq!(corner, [0, 0, 0]);
    let _ = std::fs::remove_dir_all(dir);
}

// ============================================================================
// Light
// ============================================================================

#[test]
fn test_update_light_is_idempotent() {
    let mut renderer = renderer(16, 16);
    let direction = Vec3::new(-1.0, -2.0, -0.5);
    let position = Vec3::new(0.0, 10.0, 0.0);
    let size = Vec3::new(40.0, 20.0, 40.0);

    renderer.update_light(direction, position, size).unwrap();
    let first = renderer.light_camera().unwrap();
    renderer.update_light(direction, position, size).unwrap();
    let second = renderer.light_camera().unwrap();

    assert_eq!(first, second);
    assert!(first.forward().abs_diff_eq(direction.normalize(), 1e-5));
    assert_eq!(first.position, position);
}

#[test]
fn test_update_light_rejects_zero_direction() {
    let mut renderer = renderer(16, 16);
    let before = renderer.light();
    let result = renderer.update_light(Vec3::ZERO, Vec3::ZERO, Vec3::ONE);
    assert!(matches!(result, Err(RenderError::InvalidConfiguration(_))));
    assert_eq!(renderer.light(), before);
}

#[test]
fn test_light_survives_rebuild() {
    let mut renderer = renderer(16, 16);
    renderer
        .update_light(Vec3::new(1.0, -1.0, 0.0), Vec3::ZERO, Vec3::splat(10.0))
        .unwrap();
    let before = renderer.light_camera().unwrap();
    renderer.set_field_of_view(45.0).unwrap();
    assert_eq!(renderer.light_camera().unwrap(), before);
}

// ============================================================================
// Screenshots
// ============================================================================

#[test]
fn test_screenshot_of_clear_color() {
    let mut renderer = renderer(24, 16);
    renderer
        .session_mut()
        .unwrap()
        .backend_mut()
        .set_clear_color(CLEAR_COLOR);
    renderer.render().unwrap();

    let dir = temp_dir("screenshot");
    let path = renderer.save_screenshot(&dir).unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with(".png"));
    assert_eq!(name.len(), "yyyy-MM-dd_HH.mm.ss.png".len());

    let image = image::open(&path).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (24, 16));
    let expected = to_rgb8(CLEAR_COLOR);
    for pixel in image.pixels() {
        for channel in 0..3 {
            assert!(pixel.0[channel].abs_diff(expected[channel]) <= 1, "{pixel:?}");
        }
    }
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_screenshot_keeps_top_of_frame_at_top() {
    let mut renderer = renderer(32, 24);
    renderer.camera_mut().set_position(Vec3::new(0.0, 0.0, 5.0));
    renderer
        .update_light(Vec3::NEG_Z, Vec3::ZERO, Vec3::splat(10.0))
        .unwrap();
    renderer.add_solid_model(cube().with_transform(Transform::from_position(Vec3::new(0.0, 1.5, 0.0))));
    renderer.render().unwrap();

    let dir = temp_dir("screenshot-orientation");
    let path = renderer.save_screenshot(&dir).unwrap();
    let image = image::open(&path).unwrap().to_rgb8();
    let covered_rows: Vec<u32> = (0..image.height())
        .filter(|&y| (0..image.width()).any(|x| image.get_pixel(x, y).0 != [0, 0, 0]))
        .collect();
    assert!(!covered_rows.is_empty());
    assert!(covered_rows.iter().all(|&y| y < 12), "{covered_rows:?}");
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_screenshot_into_unwritable_path_returns_none() {
    let mut renderer = renderer(8, 8);
    renderer.render().unwrap();
    let dir = temp_dir("screenshot-file");
    let file = dir.join("not-a-directory");
    std::fs::write(&file, b"occupied").unwrap();

    assert!(renderer.save_screenshot(&file).is_none());
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn test_solid_color_retags_models() {
    let mut renderer = renderer(16, 16);
    renderer.add_solid_model(cube());
    let tint = Vec4::new(1.0, 0.0, 0.0, 1.0);
    renderer.set_solid_color(tint);

    let models = renderer.solid_models().read();
    let material = models[0].material().unwrap();
    assert_eq!(material.uniforms().vec4("modelColor"), Some(tint));
}
