//! Parameter block layout shared with `programs.wgsl`

use crate::backend::params::ProgramParams;
use crate::backend::program::{ProgramKind, MAX_KERNEL_SIZE};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

pub(super) const TEXTURE_UNITS: usize = 8;

/// Uniform block read by every program, 16-byte aligned members only
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(super) struct GpuParams {
    model: Mat4,
    previous_model: Mat4,
    normal_matrix: Mat4,
    view: Mat4,
    inverse_view: Mat4,
    projection: Mat4,
    previous_view: Mat4,
    previous_projection: Mat4,
    light_view_projection: Mat4,
    model_color: Vec4,
    material: Vec4,
    light_direction: Vec4,
    camera: Vec4,
    blur: Vec4,
    sampling: Vec4,
    misc: Vec4,
    target_size: Vec4,
    units: [Vec4; TEXTURE_UNITS],
    kernel: [Vec4; MAX_KERNEL_SIZE],
}

impl GpuParams {
    pub fn new(
        kind: ProgramKind,
        params: &ProgramParams,
        units: [Vec4; TEXTURE_UNITS],
        target: (u32, u32),
    ) -> Self {
        let mut kernel = [Vec4::ZERO; MAX_KERNEL_SIZE];
        let count = match kind {
            ProgramKind::Blur => {
                let count = params.kernel_size.min(params.weights.len());
                for (i, (slot, weight)) in kernel.iter_mut().zip(&params.weights).take(count).enumerate() {
                    let offset = params.offsets.get(i).copied().unwrap_or(i as f32);
                    *slot = Vec4::new(*weight, offset, 0.0, 0.0);
                }
                count
            }
            ProgramKind::Ssao => {
                let count = params.kernel_size.min(params.samples3.len());
                for (slot, sample) in kernel.iter_mut().zip(&params.samples3).take(count) {
                    *slot = sample.extend(0.0);
                }
                count
            }
            ProgramKind::Shadow => {
                let count = params.kernel_size.min(params.samples2.len());
                for (slot, sample) in kernel.iter_mut().zip(&params.samples2).take(count) {
                    *slot = Vec4::new(sample.x, sample.y, 0.0, 0.0);
                }
                count
            }
            _ => 0,
        };

        Self {
            model: params.model,
            previous_model: params.previous_model,
            normal_matrix: Mat4::from_mat3(params.normal_matrix),
            view: params.view,
            inverse_view: params.inverse_view,
            projection: params.projection,
            previous_view: params.previous_view,
            previous_projection: params.previous_projection,
            light_view_projection: params.light_view_projection,
            model_color: params.model_color,
            material: Vec4::new(params.diffuse, params.specular, params.ambient, params.shininess),
            light_direction: params.light_direction.extend(0.0),
            camera: Vec4::new(params.tan_half_fov, params.aspect_ratio, params.near, params.far),
            blur: Vec4::new(
                params.resolution.x,
                params.resolution.y,
                params.direction.x,
                params.direction.y,
            ),
            sampling: Vec4::new(params.noise_scale.x, params.noise_scale.y, params.radius, params.power),
            misc: Vec4::new(params.bias, params.blur_strength, count as f32, 0.0),
            target_size: Vec4::new(target.0 as f32, target.1 as f32, 0.0, 0.0),
            units,
            kernel,
        }
    }
}
