use criterion::{black_box, criterion_group, criterion_main, Criterion};

use deferred_graph_engine::pipeline::{BlurNode, RenderModelsNode};
use deferred_graph_engine::render_graph::{FrameUniforms, GraphParams, GraphicsSession, RenderGraph};
use deferred_graph_engine::resources::{Mesh, Model, ModelList, Transform};
use deferred_graph_engine::{
    build_deferred_graph, DeferredConfig, DeferredModels, Renderer, RendererConfig, SoftwareBackend,
};
use glam::Vec3;
use std::sync::Arc;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn params() -> GraphParams {
    GraphParams {
        width: WIDTH,
        height: HEIGHT,
        ..Default::default()
    }
}

fn session() -> GraphicsSession {
    GraphicsSession::new(Box::new(SoftwareBackend::new(WIDTH, HEIGHT).unwrap()))
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

fn bench_blur_chain_rebuild(c: &mut Criterion) {
    init_logging();
    c.bench_function("render_graph_rebuild_8_blur_chain", |b| {
        b.iter(|| {
            let mut session = session();
            let mut graph = RenderGraph::new(params());
            graph
                .add_node(RenderModelsNode::new("models", ModelList::new()))
                .unwrap();
            let mut previous = "models".to_string();
            for i in 0..8 {
                let name = format!("blur_{i}");
                graph.add_node(BlurNode::new(&name).unwrap()).unwrap();
                graph.connect(&name, "colors", "colors", &previous).unwrap();
                previous = name;
            }
            graph.rebuild(&mut session).unwrap();
            graph.destroy(&mut session).unwrap();
            black_box(&graph);
        });
    });
}

fn bench_deferred_rebuild(c: &mut Criterion) {
    init_logging();
    let config = DeferredConfig {
        shadow_map_size: 128,
        ..Default::default()
    };
    c.bench_function("deferred_graph_rebuild", |b| {
        b.iter(|| {
            let mut session = session();
            let mut graph = build_deferred_graph(params(), &config, &DeferredModels::default()).unwrap();
            graph.rebuild(&mut session).unwrap();
            graph.destroy(&mut session).unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Frame rendering
// ---------------------------------------------------------------------------

fn bench_deferred_frame(c: &mut Criterion) {
    init_logging();
    let mut renderer = Renderer::new(RendererConfig {
        width: WIDTH,
        height: HEIGHT,
        deferred: DeferredConfig {
            shadow_map_size: 128,
            ..Default::default()
        },
        ..Default::default()
    });
    renderer
        .init(Box::new(SoftwareBackend::new(WIDTH, HEIGHT).unwrap()))
        .unwrap();
    renderer.camera_mut().set_position(Vec3::new(0.0, 0.0, 6.0));
    let cube = Arc::new(Mesh::cube());
    for i in 0..4 {
        let position = Vec3::new(i as f32 * 1.5 - 2.25, 0.0, 0.0);
        renderer.add_solid_model(Model::new(Arc::clone(&cube)).with_transform(Transform::from_position(position)));
    }

    c.bench_function("deferred_frame_64x48_4_cubes", |b| {
        b.iter(|| renderer.render().unwrap());
    });
}

fn bench_blur_frame(c: &mut Criterion) {
    init_logging();
    let mut session = session();
    let mut graph = RenderGraph::new(params());
    graph
        .add_node(RenderModelsNode::new("models", ModelList::new()))
        .unwrap();
    graph.add_node(BlurNode::new("blur").unwrap()).unwrap();
    graph.connect("blur", "colors", "colors", "models").unwrap();
    graph.rebuild(&mut session).unwrap();
    let frame = FrameUniforms::default();

    c.bench_function("blur_frame_64x48", |b| {
        b.iter(|| graph.render(&mut session, black_box(&frame)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_blur_chain_rebuild,
    bench_deferred_rebuild,
    bench_deferred_frame,
    bench_blur_frame,
);
criterion_main!(benches);
