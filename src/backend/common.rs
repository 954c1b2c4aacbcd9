//! Checks and conversions shared by the backends

use crate::backend::traits::{BackendError, BackendResult, TextureHandle};
use crate::backend::types::{AttachmentPoint, ReadFormat, Rectangle, TextureDescriptor};
use glam::Vec4;
use std::collections::HashSet;

/// Validate a framebuffer attachment list against the live textures
pub(crate) fn check_attachments(
    attachments: &[(AttachmentPoint, TextureHandle)],
    descriptor: impl Fn(TextureHandle) -> Option<TextureDescriptor>,
) -> BackendResult<()> {
    if attachments.is_empty() {
        return Err(BackendError::FrameBufferCreationFailed(
            "a framebuffer needs at least one attachment".into(),
        ));
    }

    let mut size = None;
    let mut seen = HashSet::new();
    for (point, handle) in attachments {
        if !seen.insert(*point) {
            return Err(BackendError::FrameBufferCreationFailed(format!(
                "{:?} attached twice",
                point
            )));
        }
        let desc = descriptor(*handle).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: handle.0,
        })?;
        if desc.format.is_depth() != (*point == AttachmentPoint::Depth) {
            return Err(BackendError::FrameBufferCreationFailed(format!(
                "{:?} cannot be attached at {:?}",
                desc.format, point
            )));
        }
        let dimensions = (desc.width, desc.height);
        if *size.get_or_insert(dimensions) != dimensions {
            return Err(BackendError::FrameBufferCreationFailed(
                "attachments differ in size".into(),
            ));
        }
    }
    Ok(())
}

/// Pack a region of top-down texels into 8-bit rows ordered bottom-up
pub(crate) fn pack_frame(
    texels: &[Vec4],
    width: u32,
    height: u32,
    area: Rectangle,
    format: ReadFormat,
) -> BackendResult<Vec<u8>> {
    if area.width == 0
        || area.height == 0
        || area.x + area.width > width
        || area.y + area.height > height
    {
        return Err(BackendError::ReadbackFailed(format!(
            "{:?} is outside the {}x{} framebuffer",
            area, width, height
        )));
    }

    let components = format.components();
    let mut pixels = Vec::with_capacity((area.width * area.height) as usize * components);
    for row in 0..area.height {
        let y = height - 1 - (area.y + row);
        for x in area.x..area.x + area.width {
            let texel = texels[(y * width + x) as usize];
            let bytes = (texel.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
            pixels.extend_from_slice(
                &[bytes.x as u8, bytes.y as u8, bytes.z as u8, bytes.w as u8][..components],
            );
        }
    }
    Ok(pixels)
}
