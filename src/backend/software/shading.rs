//! CPU implementations of the program set

use super::raster::Fragment;
use super::texture::SoftTexture;
use crate::backend::params::ProgramParams;
use crate::backend::program::ProgramKind;
use glam::{Vec2, Vec3, Vec3Swizzles, Vec4, Vec4Swizzles};

pub(crate) const MAX_TEXTURE_UNITS: usize = 8;
const MOTION_BLUR_SAMPLES: usize = 8;
const MAX_BLUR_VELOCITY: f32 = 0.05;
const SSAO_DEPTH_BIAS: f32 = 0.025;

/// Textures bound to the units of a draw
pub(crate) struct Samplers<'a> {
    units: [Option<&'a SoftTexture>; MAX_TEXTURE_UNITS],
}

impl<'a> Samplers<'a> {
    pub fn new(units: [Option<&'a SoftTexture>; MAX_TEXTURE_UNITS]) -> Self {
        Self { units }
    }

    /// Unbound units read as transparent black
    pub fn sample(&self, unit: usize, uv: Vec2) -> Vec4 {
        self.units
            .get(unit)
            .copied()
            .flatten()
            .map(|texture| texture.sample(uv))
            .unwrap_or(Vec4::ZERO)
    }
}

pub(crate) fn linearize_depth(depth: f32, near: f32, far: f32) -> f32 {
    near * far / (far - depth * (far - near))
}

pub(crate) fn ndc_to_uv(ndc: Vec2) -> Vec2 {
    Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5)
}

fn is_background(depth: f32) -> bool {
    depth >= 1.0
}

fn encode_normal(normal: Vec3) -> Vec4 {
    (normal.normalize_or_zero() * 0.5 + 0.5).extend(1.0)
}

fn decode_normal(color: Vec4) -> Vec3 {
    (color.xyz() * 2.0 - 1.0).normalize_or_zero()
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn specular_exponent(shininess: f32) -> f32 {
    1.0 + shininess * 127.0
}

/// View-space position of a pixel from its depth buffer value
pub(crate) fn view_position(uv: Vec2, depth: f32, params: &ProgramParams) -> Vec3 {
    let distance = linearize_depth(depth, params.near, params.far);
    let ndc = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    Vec3::new(
        ndc.x * params.tan_half_fov * params.aspect_ratio * distance,
        ndc.y * params.tan_half_fov * distance,
        -distance,
    )
}

/// Color of one pixel of a full-screen pass
pub(crate) fn shade_screen(
    kind: ProgramKind,
    params: &ProgramParams,
    samplers: &Samplers<'_>,
    uv: Vec2,
) -> Vec4 {
    match kind {
        ProgramKind::Screen => samplers.sample(0, uv),
        ProgramKind::Blur => blur(params, samplers, uv),
        ProgramKind::Ssao => ssao(params, samplers, uv),
        ProgramKind::Shadow => shadow(params, samplers, uv),
        ProgramKind::Lighting => lighting(params, samplers, uv),
        ProgramKind::TransparencyBlending => transparency_blending(samplers, uv),
        _ => Vec4::ZERO,
    }
}

/// Color outputs of one fragment of a mesh draw
pub(crate) fn shade_surface(
    kind: ProgramKind,
    params: &ProgramParams,
    samplers: &Samplers<'_>,
    fragment: &Fragment,
) -> [Vec4; 5] {
    match kind {
        ProgramKind::Solid => [
            params.model_color,
            encode_normal(fragment.view_normal),
            encode_normal(fragment.world_normal),
            Vec4::new(params.diffuse, params.specular, params.ambient, params.shininess),
            surface_velocity(params, fragment.world_position).extend(0.0).extend(1.0),
        ],
        ProgramKind::WeightedSum => weighted_sum(params, fragment),
        ProgramKind::Font => [
            params.model_color * samplers.sample(0, fragment.uv),
            Vec4::ZERO,
            Vec4::ZERO,
            Vec4::ZERO,
            Vec4::ZERO,
        ],
        _ => [Vec4::ZERO; 5],
    }
}

/// Screen-space motion of a surface point since the previous frame, in UV units
pub(crate) fn surface_velocity(params: &ProgramParams, world: Vec3) -> Vec2 {
    let current = params.projection * params.view * world.extend(1.0);
    let previous = params.previous_projection
        * params.previous_view
        * params.motion.transform_point3(world).extend(1.0);
    if current.w <= 0.0 || previous.w <= 0.0 {
        return Vec2::ZERO;
    }
    ndc_to_uv(current.xy() / current.w) - ndc_to_uv(previous.xy() / previous.w)
}

fn blur(params: &ProgramParams, samplers: &Samplers<'_>, uv: Vec2) -> Vec4 {
    let count = params.kernel_size.min(params.weights.len());
    if count == 0 {
        return samplers.sample(0, uv);
    }
    let step = params.direction / params.resolution;
    let mut color = samplers.sample(0, uv) * params.weights[0];
    for i in 1..count {
        let offset = step * params.offsets.get(i).copied().unwrap_or(i as f32);
        color += (samplers.sample(0, uv + offset) + samplers.sample(0, uv - offset)) * params.weights[i];
    }
    color
}

fn ssao(params: &ProgramParams, samplers: &Samplers<'_>, uv: Vec2) -> Vec4 {
    let depth = samplers.sample(1, uv).x;
    let count = params.kernel_size.min(params.samples3.len());
    if is_background(depth) || count == 0 {
        return Vec4::ONE;
    }

    let position = view_position(uv, depth, params);
    let normal = decode_normal(samplers.sample(0, uv));
    let noise = samplers.sample(2, uv * params.noise_scale).xy() * 2.0 - 1.0;
    let random = Vec3::new(noise.x, noise.y, 0.0);
    let tangent = (random - normal * random.dot(normal))
        .try_normalize()
        .unwrap_or_else(|| normal.any_orthonormal_vector());
    let bitangent = normal.cross(tangent);

    let mut occlusion = 0.0;
    for sample in &params.samples3[..count] {
        let offset = tangent * sample.x + bitangent * sample.y + normal * sample.z;
        let sample_position = position + offset * params.radius;
        let clip = params.projection * sample_position.extend(1.0);
        if clip.w <= 0.0 {
            continue;
        }
        let sample_uv = ndc_to_uv(clip.xy() / clip.w);
        let scene_depth = samplers.sample(1, sample_uv).x;
        if is_background(scene_depth) {
            continue;
        }
        let scene_z = -linearize_depth(scene_depth, params.near, params.far);
        let range = smoothstep(0.0, 1.0, params.radius / (position.z - scene_z).abs().max(1e-4));
        if scene_z >= sample_position.z + SSAO_DEPTH_BIAS {
            occlusion += range;
        }
    }

    let visibility = (1.0 - occlusion / count as f32).max(0.0).powf(params.power);
    Vec4::new(visibility, visibility, visibility, 1.0)
}

fn shadow(params: &ProgramParams, samplers: &Samplers<'_>, uv: Vec2) -> Vec4 {
    let depth = samplers.sample(1, uv).x;
    if is_background(depth) {
        return Vec4::ONE;
    }

    let world = params
        .inverse_view
        .transform_point3(view_position(uv, depth, params));
    let light_clip = params.light_view_projection * world.extend(1.0);
    let light_ndc = light_clip.xyz() / light_clip.w;
    let shadow_uv = ndc_to_uv(light_ndc.xy());
    if shadow_uv.cmplt(Vec2::ZERO).any() || shadow_uv.cmpgt(Vec2::ONE).any() || light_ndc.z > 1.0 {
        return Vec4::ONE;
    }

    // Surfaces facing away from the light are in their own shadow
    let normal = decode_normal(samplers.sample(0, uv));
    if normal.dot(-params.light_direction) <= 0.0 {
        return Vec4::new(0.0, 0.0, 0.0, 1.0);
    }

    let angle = samplers.sample(3, uv * params.noise_scale).x * std::f32::consts::TAU;
    let rotation = Vec2::from_angle(angle);
    let reference = light_ndc.z - params.bias;

    let count = params.kernel_size.min(params.samples2.len());
    let lit = if count == 0 {
        (reference <= samplers.sample(2, shadow_uv).x) as u32 as f32
    } else {
        let hits = params.samples2[..count]
            .iter()
            .filter(|sample| {
                let offset = rotation.rotate(**sample) * params.radius;
                reference <= samplers.sample(2, shadow_uv + offset).x
            })
            .count();
        hits as f32 / count as f32
    };
    Vec4::new(lit, lit, lit, 1.0)
}

fn lighting(params: &ProgramParams, samplers: &Samplers<'_>, uv: Vec2) -> Vec4 {
    let depth = samplers.sample(2, uv).x;
    let mut color = samplers.sample(0, uv);
    if is_background(depth) {
        return color;
    }

    let position = view_position(uv, depth, params);
    if params.blur_strength > 0.0 {
        let velocity = (samplers.sample(6, uv).xy() * params.blur_strength)
            .clamp_length_max(MAX_BLUR_VELOCITY);
        if velocity.length_squared() > 1e-12 {
            let mut sum = Vec4::ZERO;
            for i in 0..MOTION_BLUR_SAMPLES {
                let t = i as f32 / (MOTION_BLUR_SAMPLES - 1) as f32 - 0.5;
                sum += samplers.sample(0, uv + velocity * t);
            }
            color = sum / MOTION_BLUR_SAMPLES as f32;
        }
    }

    let normal = decode_normal(samplers.sample(1, uv));
    let material = samplers.sample(3, uv);
    let occlusion = samplers.sample(4, uv).x;
    let shadow = samplers.sample(5, uv).x;

    let light = params.view.transform_vector3(-params.light_direction).normalize_or_zero();
    let view_direction = (-position).normalize_or_zero();
    let n_dot_l = normal.dot(light).max(0.0);
    let specular = if n_dot_l > 0.0 {
        let half = (light + view_direction).normalize_or_zero();
        material.y * normal.dot(half).max(0.0).powf(specular_exponent(material.w))
    } else {
        0.0
    };

    let rgb = color.xyz() * (material.z * occlusion + material.x * n_dot_l * shadow)
        + Vec3::splat(specular * shadow);
    rgb.extend(color.w)
}

fn weighted_sum(params: &ProgramParams, fragment: &Fragment) -> [Vec4; 5] {
    let normal = fragment.world_normal.normalize_or_zero();
    let light = -params.light_direction;
    let camera = params.inverse_view.w_axis.xyz();
    let view_direction = (camera - fragment.world_position).normalize_or_zero();
    let n_dot_l = normal.dot(light).max(0.0);
    let specular = if n_dot_l > 0.0 {
        let half = (light + view_direction).normalize_or_zero();
        params.specular * normal.dot(half).max(0.0).powf(specular_exponent(params.shininess))
    } else {
        0.0
    };

    let color = params.model_color.xyz() * (params.ambient + params.diffuse * n_dot_l)
        + Vec3::splat(specular);
    let alpha = params.model_color.w;
    let weight = (alpha * (1.0 - fragment.depth).powi(3) * 3e3).clamp(1e-2, 3e3);

    [
        (color * alpha * weight).extend(alpha * weight),
        Vec4::splat(alpha),
        Vec4::ZERO,
        Vec4::ZERO,
        Vec4::ZERO,
    ]
}

fn transparency_blending(samplers: &Samplers<'_>, uv: Vec2) -> Vec4 {
    let backdrop = samplers.sample(0, uv);
    let revealage = samplers.sample(2, uv).x;
    if revealage >= 1.0 {
        return backdrop;
    }
    let accumulation = samplers.sample(1, uv);
    let average = accumulation.xyz() / accumulation.w.max(1e-5);
    (average * (1.0 - revealage) + backdrop.xyz() * revealage).extend(backdrop.w)
}
