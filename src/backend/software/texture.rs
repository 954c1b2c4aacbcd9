//! Texel storage and sampling

use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::{FilterMode, TextureDescriptor, TextureFormat, WrapMode};
use glam::{Vec2, Vec4};

/// Texture contents kept as normalized floats, row 0 at the top
#[derive(Debug, Clone)]
pub(crate) struct SoftTexture {
    pub desc: TextureDescriptor,
    pub texels: Vec<Vec4>,
}

impl SoftTexture {
    pub fn new(desc: TextureDescriptor) -> Self {
        let count = (desc.width * desc.height) as usize;
        let initial = if desc.format.is_depth() {
            Vec4::new(1.0, 0.0, 0.0, 1.0)
        } else {
            Vec4::ZERO
        };
        Self {
            desc,
            texels: vec![initial; count],
        }
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Convert a value to what the format can hold
    pub fn quantize(format: TextureFormat, value: Vec4) -> Vec4 {
        let value = match format.channels() {
            1 => Vec4::new(value.x, 0.0, 0.0, 1.0),
            _ => value,
        };
        if format.is_unorm8() {
            (value.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
        } else {
            value
        }
    }

    pub fn store(&mut self, index: usize, value: Vec4) {
        self.texels[index] = Self::quantize(self.desc.format, value);
    }

    pub fn fill(&mut self, value: Vec4) {
        let value = Self::quantize(self.desc.format, value);
        self.texels.fill(value);
    }

    pub fn load_bytes(&mut self, data: &[u8]) -> BackendResult<()> {
        let expected = self.desc.data_size();
        if data.len() != expected {
            return Err(BackendError::InvalidTextureData(format!(
                "expected {} bytes for {:?}, got {}",
                expected, self.desc.label, data.len()
            )));
        }

        let format = self.desc.format;
        let stride = format.bytes_per_pixel() as usize;
        for (texel, bytes) in self.texels.iter_mut().zip(data.chunks_exact(stride)) {
            *texel = match format {
                TextureFormat::Rgba8Unorm => Vec4::new(
                    bytes[0] as f32,
                    bytes[1] as f32,
                    bytes[2] as f32,
                    bytes[3] as f32,
                ) / 255.0,
                TextureFormat::R8Unorm => Vec4::new(bytes[0] as f32 / 255.0, 0.0, 0.0, 1.0),
                TextureFormat::R32Float | TextureFormat::Depth32Float => {
                    let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    Vec4::new(value, 0.0, 0.0, 1.0)
                }
                TextureFormat::Rgba16Float => {
                    return Err(BackendError::InvalidTextureData(
                        "uploads to half-float textures are not supported".into(),
                    ))
                }
            };
        }
        Ok(())
    }

    fn wrap(&self, coord: i32, size: u32) -> usize {
        let size = size as i32;
        match self.desc.wrap {
            WrapMode::ClampToEdge => coord.clamp(0, size - 1) as usize,
            WrapMode::Repeat => coord.rem_euclid(size) as usize,
        }
    }

    pub fn texel(&self, x: i32, y: i32) -> Vec4 {
        let x = self.wrap(x, self.desc.width);
        let y = self.wrap(y, self.desc.height);
        self.texels[y * self.desc.width as usize + x]
    }

    /// Sample at normalized coordinates, `(0, 0)` being the top-left corner
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let size = Vec2::new(self.desc.width as f32, self.desc.height as f32);
        match self.desc.filter {
            FilterMode::Nearest => {
                let p = (uv * size).floor();
                self.texel(p.x as i32, p.y as i32)
            }
            FilterMode::Linear => {
                let p = uv * size - 0.5;
                let base = p.floor();
                let t = p - base;
                let (x, y) = (base.x as i32, base.y as i32);
                let top = self.texel(x, y).lerp(self.texel(x + 1, y), t.x);
                let bottom = self.texel(x, y + 1).lerp(self.texel(x + 1, y + 1), t.x);
                top.lerp(bottom, t.y)
            }
        }
    }
}
