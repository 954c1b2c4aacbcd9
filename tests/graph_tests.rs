//! Render graph integration tests.
//!
//! Graphs are built from the concrete pipeline nodes and run on real backends; results are
//! read back from the node output textures.

mod common;

use common::{assert_all_pixels, software_session, Backend, CLEAR_COLOR};
use deferred_graph_engine::backend::{uniforms, BackendError, ProgramKind, ReadFormat, Rectangle};
use deferred_graph_engine::pipeline::{names, BlurNode, RenderModelsNode, ShadowMappingNode, SsaoNode};
use deferred_graph_engine::render_graph::{
    FrameContext, FrameUniforms, GraphParams, GraphicsSession, NodeState, RenderGraph,
};
use deferred_graph_engine::resources::{Material, Mesh, Model, ModelList, Uniform};
use deferred_graph_engine::{
    build_deferred_graph, DeferredConfig, DeferredModels, GraphError, GraphNode, LifecycleError,
    RenderError, SoftwareBackend,
};
use glam::{Mat4, Vec3, Vec4};
use rstest::rstest;
use std::sync::Arc;

fn params(width: u32, height: u32) -> GraphParams {
    GraphParams {
        width,
        height,
        ..Default::default()
    }
}

/// Models node followed by a blur of its colors
fn blur_graph(width: u32, height: u32) -> RenderGraph {
    let mut graph = RenderGraph::new(params(width, height));
    graph
        .add_node(RenderModelsNode::new("models", ModelList::new()))
        .unwrap();
    graph.add_node(BlurNode::new("blur").unwrap()).unwrap();
    graph.connect("blur", "colors", "colors", "models").unwrap();
    graph
}

// ============================================================================
// Output Tests
// ============================================================================

#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_empty_models_node_outputs_clear_color(#[case] backend: Backend) {
    common::init_logging();
    let Some(backend) = backend.create(800, 600) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let mut session = GraphicsSession::new(backend);
    session.backend_mut().set_clear_color(CLEAR_COLOR);

    let mut graph = RenderGraph::new(params(800, 600));
    graph
        .add_node(RenderModelsNode::new("models", ModelList::new()))
        .unwrap();
    graph.rebuild(&mut session).unwrap();
    graph.render(&mut session, &FrameUniforms::default()).unwrap();

    let colors = graph.node("models").unwrap().output("colors").unwrap();
    let desc = session.backend().texture_descriptor(colors).unwrap();
    assert_eq!((desc.width, desc.height), (800, 600));
    let pixels = session.backend_mut().read_texture(colors).unwrap();
    assert_eq!(pixels.len(), 800 * 600);
    assert_all_pixels(&pixels, CLEAR_COLOR);

    graph.destroy(&mut session).unwrap();
}

#[rstest]
#[case(5)]
#[case(6)]
#[case(9)]
fn test_blur_of_uniform_color_is_unchanged(#[case] kernel_size: usize) {
    let mut session = software_session(24, 16);
    session.backend_mut().set_clear_color(CLEAR_COLOR);

    let mut graph = blur_graph(24, 16);
    graph
        .get_node_mut::<BlurNode>("blur")
        .unwrap()
        .set_kernel_size(kernel_size)
        .unwrap();
    graph.rebuild(&mut session).unwrap();
    graph.render(&mut session, &FrameUniforms::default()).unwrap();

    let blurred = graph.node("blur").unwrap().output("colors").unwrap();
    let pixels = session.backend_mut().read_texture(blurred).unwrap();
    assert_all_pixels(&pixels, CLEAR_COLOR);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_render_before_rebuild_fails() {
    let mut session = software_session(8, 8);
    let mut graph = blur_graph(8, 8);
    let result = graph.render(&mut session, &FrameUniforms::default());
    assert!(matches!(result, Err(RenderError::Graph(GraphError::NotBuilt))));
}

#[test]
fn test_rebuild_twice_without_destroy_fails() {
    let mut session = software_session(8, 8);
    let mut graph = blur_graph(8, 8);
    graph.rebuild(&mut session).unwrap();
    let result = graph.rebuild(&mut session);
    assert!(matches!(
        result,
        Err(RenderError::Lifecycle(LifecycleError::AlreadyCreated(_)))
    ));
}

#[rstest]
#[case::blur(Box::new(BlurNode::new("blur").unwrap()) as Box<dyn GraphNode>)]
#[case::ssao(Box::new(SsaoNode::new("ssao").unwrap()) as Box<dyn GraphNode>)]
fn test_node_used_before_create_is_rejected(#[case] mut node: Box<dyn GraphNode>) {
    let mut session = software_session(8, 8);
    let params = params(8, 8);
    let frame = FrameUniforms::default();

    let result = node.render(&mut FrameContext {
        session: &mut session,
        params: &params,
        frame: &frame,
    });
    assert!(matches!(
        result,
        Err(RenderError::Lifecycle(LifecycleError::NotCreated(_)))
    ));
    let result = node.destroy(&mut session);
    assert!(matches!(
        result,
        Err(RenderError::Lifecycle(LifecycleError::NotCreated(_)))
    ));

    assert_eq!(node.state(), NodeState::Uninitialized);
    let backend = session.backend();
    assert_eq!(backend.texture_count(), 0);
    assert_eq!(backend.frame_buffer_count(), 0);
    assert_eq!(backend.draw_count(), 0);
}

#[test]
fn test_failed_draw_leaves_default_framebuffer_bound() {
    let mut session = software_session(8, 8);
    session.backend_mut().set_clear_color(CLEAR_COLOR);
    let blur = session.program(ProgramKind::Blur.name()).unwrap();
    let models = ModelList::new();
    models.add(Model::new(Arc::new(Mesh::cube())).with_material(Arc::new(Material::new("blur", blur))));

    let mut graph = RenderGraph::new(params(8, 8));
    graph.add_node(RenderModelsNode::new("models", models)).unwrap();
    graph.rebuild(&mut session).unwrap();

    let result = graph.render(&mut session, &FrameUniforms::default());
    assert!(matches!(
        result,
        Err(RenderError::Backend(BackendError::DrawFailed(_)))
    ));

    // The G-buffer was cleared, the default framebuffer was not
    let pixels = session
        .backend_mut()
        .read_current_frame(Rectangle::new(0, 0, 1, 1), ReadFormat::Rgba)
        .unwrap();
    assert_eq!(pixels, vec![0, 0, 0, 0]);
}

#[test]
fn test_failed_rebuild_releases_partial_allocations() {
    common::init_logging();
    let backend = SoftwareBackend::new(16, 16).unwrap().with_max_texture_size(32);
    let mut session = GraphicsSession::new(Box::new(backend));

    let mut graph = RenderGraph::new(params(16, 16));
    graph
        .add_node(RenderModelsNode::new("models", ModelList::new()))
        .unwrap();
    // The shadow map and its target fit, the noise texture does not
    let mut shadows = ShadowMappingNode::new("shadows", ModelList::new());
    shadows.set_shadow_map_size(16).unwrap();
    shadows.set_noise_size(64).unwrap();
    graph.add_node(shadows).unwrap();
    graph.connect("shadows", "normals", "vertexNormals", "models").unwrap();
    graph.connect("shadows", "depths", "depths", "models").unwrap();

    let result = graph.rebuild(&mut session);
    assert!(matches!(
        result,
        Err(RenderError::Backend(BackendError::TextureCreationFailed(_)))
    ));
    assert_eq!(session.backend().texture_count(), 0);
    assert_eq!(session.backend().frame_buffer_count(), 0);
    assert!(graph.node("shadows").unwrap().output("shadows").is_none());
    assert!(!graph.is_built());
}

#[test]
fn test_destroy_releases_outputs() {
    let mut session = software_session(8, 8);
    let mut graph = blur_graph(8, 8);
    graph.rebuild(&mut session).unwrap();

    let outputs: Vec<_> = ["models", "blur"]
        .iter()
        .map(|name| graph.node(name).unwrap().output("colors").unwrap())
        .collect();
    graph.destroy(&mut session).unwrap();

    for texture in outputs {
        assert!(session.backend().texture_descriptor(texture).is_none());
    }
    assert!(graph.node("blur").unwrap().output("colors").is_none());

    // Destroyed nodes cannot be created again
    let result = graph.rebuild(&mut session);
    assert!(matches!(
        result,
        Err(RenderError::Lifecycle(LifecycleError::Destroyed(_)))
    ));
}

// ============================================================================
// Wiring Tests
// ============================================================================

#[test]
fn test_unconnected_input_rejected_before_creation() {
    let mut session = software_session(8, 8);
    let mut graph = RenderGraph::new(params(8, 8));
    graph
        .add_node(RenderModelsNode::new("models", ModelList::new()))
        .unwrap();
    graph.add_node(BlurNode::new("blur").unwrap()).unwrap();

    let result = graph.rebuild(&mut session);
    assert!(matches!(
        result,
        Err(RenderError::Graph(GraphError::UnconnectedInput { ref node, ref slot }))
            if node == "blur" && slot == "colors"
    ));
    assert!(graph.node("models").unwrap().output("colors").is_none());
}

#[test]
fn test_cycle_rejected() {
    let mut session = software_session(8, 8);
    let mut graph = RenderGraph::new(params(8, 8));
    graph.add_node(BlurNode::new("a").unwrap()).unwrap();
    graph.add_node(BlurNode::new("b").unwrap()).unwrap();
    graph.connect("a", "colors", "colors", "b").unwrap();
    graph.connect("b", "colors", "colors", "a").unwrap();

    let result = graph.rebuild(&mut session);
    assert!(matches!(
        result,
        Err(RenderError::Graph(GraphError::CyclicDependency))
    ));
}

#[test]
fn test_execution_order_ignores_registration_order() {
    let mut session = software_session(8, 8);
    let mut graph = RenderGraph::new(params(8, 8));
    graph.add_node(BlurNode::new("second blur").unwrap()).unwrap();
    graph.add_node(BlurNode::new("first blur").unwrap()).unwrap();
    graph
        .add_node(RenderModelsNode::new("models", ModelList::new()))
        .unwrap();
    graph.connect("first blur", "colors", "colors", "models").unwrap();
    graph
        .connect("second blur", "colors", "colors", "first blur")
        .unwrap();

    graph.rebuild(&mut session).unwrap();
    assert_eq!(
        graph.execution_order(),
        vec!["models", "first blur", "second blur"]
    );
    graph.destroy(&mut session).unwrap();
}

// ============================================================================
// Motion Blur Tests
// ============================================================================

fn lit_colors(graph: &mut RenderGraph, session: &mut GraphicsSession, frame: &FrameUniforms) -> Vec<Vec4> {
    graph.render(session, frame).unwrap();
    let colors = graph.node(names::LIGHTING).unwrap().output("colors").unwrap();
    session.backend_mut().read_texture(colors).unwrap()
}

#[test]
fn test_model_moved_since_previous_frame_blurs_lit_output() {
    let mut session = software_session(48, 48);
    session.backend_mut().set_clear_color(CLEAR_COLOR);
    let solid = session.program(ProgramKind::Solid.name()).unwrap();
    let material = Material::new("solid", solid)
        .with_lighting(0.8, 0.5, 0.2, 0.15)
        .with_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
    let models = DeferredModels::default();
    models
        .solid
        .add(Model::new(Arc::new(Mesh::cube())).with_material(Arc::new(material)));

    let config = DeferredConfig {
        shadow_map_size: 64,
        ..Default::default()
    };
    let mut graph = build_deferred_graph(params(48, 48), &config, &models).unwrap();
    graph.rebuild(&mut session).unwrap();
    let camera = {
        let node = graph.get_node_mut::<RenderModelsNode>(names::MODELS).unwrap();
        node.camera_mut().set_position(Vec3::new(0.0, 0.0, 5.0));
        *node.camera()
    };
    // Static camera
    let frame = |blur_strength: f32| FrameUniforms {
        view: camera.view_matrix(),
        projection: camera.projection_matrix(),
        previous_view: camera.view_matrix(),
        previous_projection: camera.projection_matrix(),
        blur_strength,
    };

    let sharp = lit_colors(&mut graph, &mut session, &frame(0.0));
    let unmoved = lit_colors(&mut graph, &mut session, &frame(1.0));
    assert_eq!(unmoved, sharp);

    models.solid.write()[0].set_uniform(
        uniforms::PREVIOUS_MODEL_MATRIX,
        Uniform::Mat4(Mat4::from_translation(Vec3::new(-0.5, 0.0, 0.0))),
    );
    let moved = lit_colors(&mut graph, &mut session, &frame(1.0));
    assert_ne!(moved, sharp);

    graph.destroy(&mut session).unwrap();
}
