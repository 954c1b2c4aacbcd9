//! Frame driver for the deferred graph
//!
//! [`Renderer`] owns the graphics session and the deferred render graph. It keeps the
//! frame-to-frame state the programs need (previous camera and model matrices, motion blur
//! strength), fits the light camera around the scene and saves screenshots.

mod fps;
mod light;
mod overlay;
mod screenshot;

pub use fps::FpsMonitor;
pub use light::{light_half_extents, light_rotation};
pub use screenshot::{flip_rows, timestamp_file_name};

use crate::backend::{Capability, GraphicsBackend, ProgramKind, ReadFormat, Rectangle};
use crate::error::{LifecycleError, RenderError, RenderResult};
use crate::pipeline::render_models::track_previous_matrix;
use crate::pipeline::{
    build_deferred_graph, names, DeferredModels, LightingNode, RenderModelsNode,
    RenderTransparentModelsNode, ShadowMappingNode,
};
use crate::render_graph::{FrameUniforms, GraphParams, GraphicsSession, RenderGraph};
use crate::resources::{Material, Model, ModelId, ModelList, TextRasterizer};
use crate::scene::{Camera, Projection};
use crate::RendererConfig;
use glam::{Mat4, Vec3, Vec4};
use overlay::FpsOverlay;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Directional light placement, kept across graph rebuilds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSettings {
    /// Normalized direction the light travels in
    pub direction: Vec3,
    /// Light camera position
    pub position: Vec3,
    /// Dimensions of the box, centered on the origin, the shadow map must cover
    pub size: Vec3,
}

impl Default for LightSettings {
    fn default() -> Self {
        Self {
            direction: Vec3::NEG_Y,
            position: Vec3::ZERO,
            size: Vec3::splat(20.0),
        }
    }
}

impl LightSettings {
    /// Orthographic light camera enclosing the box
    pub fn camera(&self) -> Camera {
        let rotation = light_rotation(self.direction);
        let extents = light_half_extents(rotation, self.size);
        let mut camera = Camera::new(Projection::orthographic(
            -extents.x, extents.x, -extents.y, extents.y, -extents.z, extents.z,
        ));
        camera.set_position(self.position);
        camera.set_rotation(rotation);
        camera
    }
}

struct Materials {
    solid: Arc<Material>,
    transparency: Arc<Material>,
}

/// Top-level renderer: initialization, per-frame driving and scene editing
pub struct Renderer {
    config: RendererConfig,
    session: Option<GraphicsSession>,
    graph: Option<RenderGraph>,
    camera: Camera,
    models: DeferredModels,
    materials: Option<Materials>,
    light: LightSettings,
    previous_camera: Option<(Mat4, Mat4)>,
    fps: FpsMonitor,
    overlay: Option<FpsOverlay>,
}

fn assign_material(models: &ModelList, material: &Arc<Material>) {
    for model in models.write().iter_mut() {
        model.set_material(Arc::clone(material));
    }
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        let mut renderer = Self {
            config,
            session: None,
            graph: None,
            camera: Camera::default(),
            models: DeferredModels::default(),
            materials: None,
            light: LightSettings::default(),
            previous_camera: None,
            fps: FpsMonitor::new(),
            overlay: None,
        };
        renderer.update_camera_projection();
        renderer
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Camera the scene is rendered from
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn graph(&self) -> Option<&RenderGraph> {
        self.graph.as_ref()
    }

    pub fn graph_mut(&mut self) -> Option<&mut RenderGraph> {
        self.graph.as_mut()
    }

    pub fn session(&self) -> Option<&GraphicsSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut GraphicsSession> {
        self.session.as_mut()
    }

    pub fn fps(&self) -> u32 {
        self.fps.fps()
    }

    pub fn light(&self) -> LightSettings {
        self.light
    }

    pub fn solid_models(&self) -> &ModelList {
        &self.models.solid
    }

    pub fn transparent_models(&self) -> &ModelList {
        &self.models.transparent
    }

    pub fn gui_models(&self) -> &ModelList {
        &self.models.gui
    }

    /// Camera the shadow map is rendered from, once initialized
    pub fn light_camera(&self) -> Option<Camera> {
        self.graph
            .as_ref()
            .and_then(|graph| graph.get_node::<ShadowMappingNode>(names::SHADOWS))
            .map(|node| *node.camera())
    }

    /// Take ownership of the backend, set up the context and build the graph
    pub fn init(&mut self, backend: Box<dyn GraphicsBackend>) -> RenderResult<()> {
        if self.session.is_some() {
            return Err(LifecycleError::AlreadyCreated("renderer".into()).into());
        }
        self.config.validate()?;

        let mut session = GraphicsSession::new(backend);
        let backend = session.backend_mut();
        backend.set_window_title(&self.config.title);
        backend.set_window_size(self.config.width, self.config.height)?;
        backend.set_clear_color(Vec4::ZERO);
        backend.set_capability(Capability::CullFace, self.config.cull_back_faces);
        backend.set_capability(Capability::DepthTest, true);
        backend.set_capability(Capability::DepthClamp, true);

        let materials = Materials {
            solid: Arc::new(self.solid_material(&mut session)?),
            transparency: Arc::new(self.transparency_material(&mut session)?),
        };
        assign_material(&self.models.solid, &materials.solid);
        assign_material(&self.models.transparent, &materials.transparency);
        self.materials = Some(materials);

        self.build_graph(&mut session)?;
        self.session = Some(session);
        self.previous_camera = None;
        self.fps.reset();
        log::info!(
            "Renderer initialized: {}x{} '{}'",
            self.config.width,
            self.config.height,
            self.config.title
        );
        Ok(())
    }

    /// Destroy the graph, the overlay and the programs, and drop the backend
    pub fn dispose(&mut self) -> RenderResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let result = self.teardown_graph(&mut session);
        session.dispose();
        self.materials = None;
        self.fps.reset();
        log::info!("Renderer disposed");
        result
    }

    fn solid_material(&self, session: &mut GraphicsSession) -> RenderResult<Material> {
        Ok(Material::new("solid", session.program(ProgramKind::Solid.name())?)
            .with_lighting(0.8, 0.5, 0.2, 0.15)
            .with_color(self.config.solid_color))
    }

    fn transparency_material(&self, session: &mut GraphicsSession) -> RenderResult<Material> {
        Ok(
            Material::new("transparency", session.program(ProgramKind::WeightedSum.name())?)
                .with_lighting(0.8, 1.0, 0.2, 0.8)
                .with_light_direction(self.light.direction),
        )
    }

    fn graph_params(&self) -> GraphParams {
        GraphParams {
            width: self.config.width,
            height: self.config.height,
            field_of_view: self.config.field_of_view,
            near: self.config.near,
            far: self.config.far,
        }
    }

    fn build_graph(&mut self, session: &mut GraphicsSession) -> RenderResult<()> {
        let mut graph = build_deferred_graph(self.graph_params(), &self.config.deferred, &self.models)?;
        graph.rebuild(session)?;
        self.graph = Some(graph);
        self.apply_light();
        self.overlay = self.create_overlay(session);
        Ok(())
    }

    fn teardown_graph(&mut self, session: &mut GraphicsSession) -> RenderResult<()> {
        if let Some(overlay) = self.overlay.take() {
            overlay.release(session);
        }
        match self.graph.take() {
            Some(mut graph) => graph.destroy(session),
            None => Ok(()),
        }
    }

    /// Full teardown and recreation, keeping the model lists
    fn recreate_graph(&mut self) -> RenderResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let result = self
            .teardown_graph(&mut session)
            .and_then(|_| self.build_graph(&mut session));
        self.session = Some(session);
        result
    }

    fn create_overlay(&self, session: &mut GraphicsSession) -> Option<FpsOverlay> {
        let path = self.config.font_path.as_ref()?;
        let rasterizer = match TextRasterizer::from_file(path, self.config.font_size) {
            Ok(rasterizer) => rasterizer,
            Err(e) => {
                log::warn!("FPS overlay disabled, failed to load font {}: {}", path.display(), e);
                return None;
            }
        };
        let window = (self.config.width, self.config.height);
        match FpsOverlay::new(session, rasterizer, self.models.gui.clone(), &self.config.title, window) {
            Ok(overlay) => Some(overlay),
            Err(e) => {
                log::warn!("FPS overlay disabled: {}", e);
                None
            }
        }
    }

    fn update_camera_projection(&mut self) {
        self.camera.set_projection(Projection::perspective(
            self.config.field_of_view,
            self.config.width as f32 / self.config.height.max(1) as f32,
            self.config.near,
            self.config.far,
        ));
    }

    /// Render one frame
    pub fn render(&mut self) -> RenderResult<()> {
        let (Some(session), Some(graph)) = (self.session.as_mut(), self.graph.as_mut()) else {
            return Err(RenderError::NotInitialized);
        };
        if !self.fps.is_started() {
            self.fps.start();
        }

        let view = self.camera.view_matrix();
        let projection = self.camera.projection_matrix();
        let (previous_view, previous_projection) = self.previous_camera.unwrap_or((view, projection));
        let frame = FrameUniforms {
            view,
            projection,
            previous_view,
            previous_projection,
            blur_strength: self.fps.fps() as f32 / self.config.target_fps as f32,
        };

        if let Some(node) = graph.get_node_mut::<RenderModelsNode>(names::MODELS) {
            node.set_camera(self.camera);
        }
        graph.render(session, &frame)?;

        for list in [&self.models.solid, &self.models.transparent] {
            for model in list.write().iter_mut().filter(|m| m.visible) {
                track_previous_matrix(model);
            }
        }
        self.previous_camera = Some((view, projection));
        session.backend_mut().finish_frame()?;

        self.fps.update();
        if let Some(overlay) = &mut self.overlay {
            overlay.update(session, self.fps.fps())?;
        }
        Ok(())
    }

    /// Point the light along `direction` and fit its camera around the `size` box
    pub fn update_light(&mut self, direction: Vec3, position: Vec3, size: Vec3) -> RenderResult<()> {
        let Some(direction) = direction.try_normalize() else {
            return Err(RenderError::InvalidConfiguration(
                "light direction must be a non-zero vector".into(),
            ));
        };
        if size.cmplt(Vec3::ZERO).any() || !size.is_finite() {
            return Err(RenderError::InvalidConfiguration(format!(
                "light bounds must be finite and non-negative, got {size}"
            )));
        }
        self.light = LightSettings {
            direction,
            position,
            size,
        };
        self.apply_light();

        if let Some(materials) = &mut self.materials {
            materials.transparency = Arc::new(
                materials
                    .transparency
                    .as_ref()
                    .clone()
                    .with_light_direction(direction),
            );
            assign_material(&self.models.transparent, &materials.transparency);
        }
        Ok(())
    }

    fn apply_light(&mut self) {
        let light = self.light;
        let Some(graph) = self.graph.as_mut() else {
            return;
        };
        if let Some(node) = graph.get_node_mut::<ShadowMappingNode>(names::SHADOWS) {
            node.set_light_direction(light.direction);
            *node.camera_mut() = light.camera();
        }
        if let Some(node) = graph.get_node_mut::<LightingNode>(names::LIGHTING) {
            node.set_light_direction(light.direction);
        }
        if let Some(node) = graph.get_node_mut::<RenderTransparentModelsNode>(names::TRANSPARENCY) {
            node.set_light_direction(light.direction);
        }
    }

    /// Draw `model` as opaque geometry. A model lives in one list at a time.
    pub fn add_solid_model(&mut self, mut model: Model) -> ModelId {
        let id = model.id();
        self.models.transparent.remove(id);
        if let Some(materials) = &self.materials {
            model.set_material(Arc::clone(&materials.solid));
        }
        track_previous_matrix(&mut model);
        self.models.solid.add(model);
        id
    }

    /// Draw `model` with weighted blended transparency
    pub fn add_transparent_model(&mut self, mut model: Model) -> ModelId {
        let id = model.id();
        self.models.solid.remove(id);
        if let Some(materials) = &self.materials {
            model.set_material(Arc::clone(&materials.transparency));
        }
        track_previous_matrix(&mut model);
        self.models.transparent.add(model);
        id
    }

    pub fn remove_model(&mut self, id: ModelId) -> Option<Model> {
        self.models
            .solid
            .remove(id)
            .or_else(|| self.models.transparent.remove(id))
    }

    /// Remove every solid and transparent model
    pub fn clear_models(&mut self) {
        self.models.solid.clear();
        self.models.transparent.clear();
    }

    pub fn set_window_size(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidConfiguration(format!(
                "window size must be positive, got {width}x{height}"
            )));
        }
        self.config.width = width;
        self.config.height = height;
        self.update_camera_projection();
        if let Some(session) = self.session.as_mut() {
            session.backend_mut().set_window_size(width, height)?;
        }
        self.recreate_graph()
    }

    /// Vertical field of view in degrees
    pub fn set_field_of_view(&mut self, degrees: f32) -> RenderResult<()> {
        if !(degrees > 0.0 && degrees < 180.0) {
            return Err(RenderError::InvalidConfiguration(format!(
                "field of view must be within (0, 180) degrees, got {degrees}"
            )));
        }
        self.config.field_of_view = degrees;
        self.update_camera_projection();
        self.recreate_graph()
    }

    pub fn set_planes(&mut self, near: f32, far: f32) -> RenderResult<()> {
        if !(near > 0.0 && far > near) {
            return Err(RenderError::InvalidConfiguration(format!(
                "planes must satisfy 0 < near < far, got {near} and {far}"
            )));
        }
        self.config.near = near;
        self.config.far = far;
        self.update_camera_projection();
        self.recreate_graph()
    }

    pub fn set_cull_back_faces(&mut self, cull: bool) {
        self.config.cull_back_faces = cull;
        if let Some(session) = self.session.as_mut() {
            session.backend_mut().set_capability(Capability::CullFace, cull);
        }
    }

    /// Tint applied to every solid model without its own `modelColor`
    pub fn set_solid_color(&mut self, color: Vec4) {
        self.config.solid_color = color;
        if let Some(materials) = &mut self.materials {
            materials.solid = Arc::new(materials.solid.as_ref().clone().with_color(color));
            assign_material(&self.models.solid, &materials.solid);
        }
    }

    /// Save the current frame as a PNG in `dir`. Failures are logged and yield `None`.
    pub fn save_screenshot(&mut self, dir: &Path) -> Option<PathBuf> {
        let Some(session) = self.session.as_mut() else {
            log::error!("Cannot save a screenshot before the renderer is initialized");
            return None;
        };
        let backend = session.backend_mut();
        let (width, height) = backend.window_size();
        let pixels = match backend.read_current_frame(Rectangle::new(0, 0, width, height), ReadFormat::Rgb) {
            Ok(pixels) => pixels,
            Err(e) => {
                log::error!("Failed to read the frame for a screenshot: {}", e);
                return None;
            }
        };
        let rows = flip_rows(&pixels, width, height, ReadFormat::Rgb.components());
        match screenshot::write_png(dir, SystemTime::now(), width, height, rows) {
            Ok(path) => {
                log::info!("Saved screenshot {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("Failed to save screenshot in {}: {}", dir.display(), e);
                None
            }
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            log::error!("Failed to dispose renderer: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_camera_for_straight_down() {
        let light = LightSettings {
            direction: Vec3::NEG_Y,
            position: Vec3::new(0.0, 5.0, 0.0),
            size: Vec3::new(10.0, 20.0, 30.0),
        };
        let camera = light.camera();
        let Projection::Orthographic {
            left,
            right,
            bottom,
            top,
            near,
            far,
        } = camera.projection
        else {
            panic!("light camera must be orthographic");
        };
        let bounds = [left, right, bottom, top, near, far];
        let expected = [-5.0, 5.0, -15.0, 15.0, -10.0, 10.0];
        for (value, expected) in bounds.iter().zip(expected) {
            assert!((value - expected).abs() < 1e-4, "{bounds:?}");
        }
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Y, 1e-5));
        assert_eq!(camera.position, Vec3::new(0.0, 5.0, 0.0));
    }

    #[test]
    fn test_render_requires_init() {
        let mut renderer = Renderer::new(RendererConfig::default());
        assert!(matches!(renderer.render(), Err(RenderError::NotInitialized)));
        assert!(renderer.save_screenshot(&std::env::temp_dir()).is_none());
    }
}
