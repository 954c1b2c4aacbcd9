//! Frame rate overlay drawn by the GUI node

use crate::backend::{FilterMode, ProgramHandle, ProgramKind, TextureDescriptor, TextureFormat, TextureHandle};
use crate::error::RenderResult;
use crate::render_graph::GraphicsSession;
use crate::resources::{Material, Mesh, Model, ModelId, ModelList, TextRasterizer, Transform};
use glam::Vec3;
use std::sync::Arc;

/// Horizontal margin as a fraction of the window width
const MARGIN: f32 = 0.005;

struct Label {
    id: ModelId,
    texture: TextureHandle,
    width: f32,
    height: f32,
}

/// Text models for the title banner and the current frame rate, top-left of the window
pub(crate) struct FpsOverlay {
    rasterizer: TextRasterizer,
    program: ProgramHandle,
    quad: Arc<Mesh>,
    models: ModelList,
    window: (u32, u32),
    banner: Label,
    fps: Label,
    shown: u32,
}

pub(crate) fn fps_text(fps: u32) -> String {
    format!("FPS: {fps}")
}

impl FpsOverlay {
    pub fn new(
        session: &mut GraphicsSession,
        rasterizer: TextRasterizer,
        models: ModelList,
        title: &str,
        window: (u32, u32),
    ) -> RenderResult<Self> {
        let program = session.program(ProgramKind::Font.name())?;
        let quad = Arc::new(Mesh::quad());
        let banner = Self::label(session, &rasterizer, program, &quad, &models, &format!("{title} - WIP"))?;
        let fps = Self::label(session, &rasterizer, program, &quad, &models, &fps_text(0))?;
        let overlay = Self {
            rasterizer,
            program,
            quad,
            models,
            window,
            banner,
            fps,
            shown: 0,
        };
        overlay.layout();
        Ok(overlay)
    }

    fn label(
        session: &mut GraphicsSession,
        rasterizer: &TextRasterizer,
        program: ProgramHandle,
        quad: &Arc<Mesh>,
        models: &ModelList,
        text: &str,
    ) -> RenderResult<Label> {
        let bitmap = rasterizer.rasterize(text);
        let backend = session.backend_mut();
        let texture = backend.create_texture(
            &TextureDescriptor::new(text, bitmap.width, bitmap.height, TextureFormat::Rgba8Unorm)
                .with_filter(FilterMode::Linear),
        )?;
        backend.write_texture(texture, &bitmap.rgba)?;

        let material = Arc::new(Material::new("font", program).with_texture(0, texture));
        let model = Model::new(Arc::clone(quad)).with_material(material);
        let id = model.id();
        models.add(model);
        Ok(Label {
            id,
            texture,
            width: bitmap.width as f32,
            height: bitmap.height as f32,
        })
    }

    /// Place the labels in pixel space, stacked from the top-left corner
    fn layout(&self) {
        let (width, height) = (self.window.0 as f32, self.window.1 as f32);
        let x = (width * MARGIN).round();
        let banner_y = height - x - self.banner.height;
        let fps_y = banner_y - self.fps.height;

        let mut models = self.models.write();
        for (label, y) in [(&self.banner, banner_y), (&self.fps, fps_y)] {
            if let Some(model) = models.iter_mut().find(|m| m.id() == label.id) {
                model.transform = Transform::from_position(Vec3::new(x, y, 0.0))
                    .with_scale(Vec3::new(label.width, label.height, 1.0));
            }
        }
    }

    pub fn shown_fps(&self) -> u32 {
        self.shown
    }

    /// Re-rasterize the frame rate label when the value changed
    pub fn update(&mut self, session: &mut GraphicsSession, fps: u32) -> RenderResult<()> {
        if fps == self.shown {
            return Ok(());
        }
        self.models.remove(self.fps.id);
        let previous = self.fps.texture;
        self.fps = Self::label(
            session,
            &self.rasterizer,
            self.program,
            &self.quad,
            &self.models,
            &fps_text(fps),
        )?;
        session.backend_mut().destroy_texture(previous);
        self.shown = fps;
        self.layout();
        Ok(())
    }

    /// Remove the labels from the GUI list and free their textures
    pub fn release(self, session: &mut GraphicsSession) {
        for label in [self.banner, self.fps] {
            self.models.remove(label.id);
            session.backend_mut().destroy_texture(label.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_text() {
        assert_eq!(fps_text(60), "FPS: 60");
    }
}
