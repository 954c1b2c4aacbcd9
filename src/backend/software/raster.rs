//! Triangle rasterization

use glam::{Vec2, Vec3, Vec4};

const MIN_W: f32 = 1e-6;

/// A vertex after the vertex stage
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClipVertex {
    pub clip: Vec4,
    pub world_position: Vec3,
    pub world_normal: Vec3,
    pub view_normal: Vec3,
    pub uv: Vec2,
}

/// Interpolated attributes at one covered pixel
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fragment {
    pub x: u32,
    pub y: u32,
    pub depth: f32,
    pub world_position: Vec3,
    pub world_normal: Vec3,
    pub view_normal: Vec3,
    pub uv: Vec2,
}

/// Rasterization state that comes from the context
#[derive(Debug, Clone, Copy)]
pub(crate) struct RasterState {
    pub width: u32,
    pub height: u32,
    pub cull_back_faces: bool,
    pub depth_clamp: bool,
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Emit a fragment for every pixel center covered by the triangle.
/// Triangles crossing the camera plane are dropped rather than clipped.
pub(crate) fn rasterize_triangle(
    vertices: [&ClipVertex; 3],
    state: RasterState,
    mut emit: impl FnMut(Fragment),
) {
    if vertices.iter().any(|v| v.clip.w <= MIN_W) {
        return;
    }

    let ndc = vertices.map(|v| v.clip.truncate() / v.clip.w);
    let facing = edge(ndc[0].truncate(), ndc[1].truncate(), ndc[2].truncate());
    if facing == 0.0 || (state.cull_back_faces && facing < 0.0) {
        return;
    }

    let size = Vec2::new(state.width as f32, state.height as f32);
    let screen = ndc.map(|p| Vec2::new((p.x * 0.5 + 0.5) * size.x, (0.5 - p.y * 0.5) * size.y));
    let area = edge(screen[0], screen[1], screen[2]);
    if area == 0.0 {
        return;
    }

    let min = screen[0].min(screen[1]).min(screen[2]).floor().max(Vec2::ZERO);
    let max = screen[0].max(screen[1]).max(screen[2]).ceil().min(size);
    if min.x >= max.x || min.y >= max.y {
        return;
    }

    let inverse_w = vertices.map(|v| 1.0 / v.clip.w);

    for y in min.y as u32..max.y as u32 {
        for x in min.x as u32..max.x as u32 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let b0 = edge(screen[1], screen[2], p) / area;
            let b1 = edge(screen[2], screen[0], p) / area;
            let b2 = edge(screen[0], screen[1], p) / area;
            if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                continue;
            }

            let mut depth = b0 * ndc[0].z + b1 * ndc[1].z + b2 * ndc[2].z;
            if state.depth_clamp {
                depth = depth.clamp(0.0, 1.0);
            } else if !(0.0..=1.0).contains(&depth) {
                continue;
            }

            let w0 = b0 * inverse_w[0];
            let w1 = b1 * inverse_w[1];
            let w2 = b2 * inverse_w[2];
            let norm = 1.0 / (w0 + w1 + w2);
            let (w0, w1, w2) = (w0 * norm, w1 * norm, w2 * norm);
            let [a, b, c] = vertices;

            emit(Fragment {
                x,
                y,
                depth,
                world_position: a.world_position * w0
                    + b.world_position * w1
                    + c.world_position * w2,
                world_normal: a.world_normal * w0 + b.world_normal * w1 + c.world_normal * w2,
                view_normal: a.view_normal * w0 + b.view_normal * w1 + c.view_normal * w2,
                uv: a.uv * w0 + b.uv * w1 + c.uv * w2,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32, y: f32) -> ClipVertex {
        ClipVertex {
            clip: Vec4::new(x, y, 0.5, 1.0),
            world_position: Vec3::ZERO,
            world_normal: Vec3::Z,
            view_normal: Vec3::Z,
            uv: Vec2::ZERO,
        }
    }

    fn coverage(vertices: [ClipVertex; 3], cull: bool) -> usize {
        let state = RasterState {
            width: 8,
            height: 8,
            cull_back_faces: cull,
            depth_clamp: false,
        };
        let mut count = 0;
        rasterize_triangle([&vertices[0], &vertices[1], &vertices[2]], state, |_| count += 1);
        count
    }

    #[test]
    fn test_half_screen_triangle() {
        let ccw = [vertex(-1.0, -1.0), vertex(1.0, -1.0), vertex(-1.0, 1.0)];
        let covered = coverage(ccw, true);
        // 8x8 target, the diagonal pixels are covered on both sides of the edge
        assert!((28..=36).contains(&covered), "covered {covered}");
    }

    #[test]
    fn test_back_faces_culled_only_when_enabled() {
        let cw = [vertex(-1.0, -1.0), vertex(-1.0, 1.0), vertex(1.0, -1.0)];
        assert_eq!(coverage(cw, true), 0);
        assert!(coverage(cw, false) > 0);
    }

    #[test]
    fn test_triangle_behind_camera_dropped() {
        let mut behind = [vertex(-1.0, -1.0), vertex(1.0, -1.0), vertex(-1.0, 1.0)];
        behind[1].clip.w = -1.0;
        assert_eq!(coverage(behind, false), 0);
    }
}
