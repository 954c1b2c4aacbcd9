//! Text rasterization for GUI labels

use crate::error::{RenderError, RenderResult};
use fontdue::{Font, FontSettings};
use std::path::Path;

/// A rasterized line of text: white RGBA texels with glyph coverage in alpha, rows top-down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Rasterizes single lines of text with one font at a fixed pixel size
pub struct TextRasterizer {
    font: Font,
    size: f32,
}

impl TextRasterizer {
    pub fn from_file<P: AsRef<Path>>(path: P, size: f32) -> RenderResult<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes, size)
    }

    pub fn from_bytes(bytes: &[u8], size: f32) -> RenderResult<Self> {
        if size <= 0.0 {
            return Err(RenderError::InvalidConfiguration(format!(
                "font size must be positive, got {size}"
            )));
        }
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| RenderError::Font(e.to_string()))?;
        Ok(Self { font, size })
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn rasterize(&self, text: &str) -> TextBitmap {
        let (ascent, descent) = self
            .font
            .horizontal_line_metrics(self.size)
            .map(|m| (m.ascent, m.descent))
            .unwrap_or((self.size * 0.8, -self.size * 0.2));

        let glyphs: Vec<(fontdue::Metrics, Vec<u8>)> = text
            .chars()
            .map(|c| self.font.rasterize(c, self.size))
            .collect();

        let advance: f32 = glyphs.iter().map(|(m, _)| m.advance_width).sum();
        let width = (advance.ceil() as u32).max(1);
        let height = ((ascent - descent).ceil() as u32).max(1);
        let mut rgba = vec![0u8; (width * height * 4) as usize];
        for texel in rgba.chunks_exact_mut(4) {
            texel[..3].copy_from_slice(&[255, 255, 255]);
        }

        let baseline = ascent.round() as i32;
        let mut cursor = 0.0f32;
        for (metrics, coverage) in &glyphs {
            let left = cursor.round() as i32 + metrics.xmin;
            // ymin is the distance from the baseline to the bottom of the bitmap
            let top = baseline - (metrics.ymin + metrics.height as i32);
            for row in 0..metrics.height {
                for col in 0..metrics.width {
                    let x = left + col as i32;
                    let y = top + row as i32;
                    if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
                        continue;
                    }
                    let alpha = coverage[row * metrics.width + col];
                    let index = ((y as u32 * width + x as u32) * 4 + 3) as usize;
                    rgba[index] = rgba[index].max(alpha);
                }
            }
            cursor += metrics.advance_width;
        }

        TextBitmap {
            width,
            height,
            rgba,
        }
    }
}
