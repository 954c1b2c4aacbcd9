//! Uniform sets decoded into the fixed parameter block the programs read

use crate::backend::program::{uniforms, MAX_KERNEL_SIZE};
use crate::resources::UniformSet;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Every value a program may read, with defaults for names a draw did not provide
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgramParams {
    pub model: Mat4,
    pub previous_model: Mat4,
    /// Moves a world position of the current frame to where it was in the previous frame
    pub motion: Mat4,
    pub normal_matrix: Mat3,
    pub view: Mat4,
    pub inverse_view: Mat4,
    pub projection: Mat4,
    pub previous_view: Mat4,
    pub previous_projection: Mat4,
    pub light_view_projection: Mat4,
    pub model_color: Vec4,
    pub diffuse: f32,
    pub specular: f32,
    pub ambient: f32,
    pub shininess: f32,
    pub light_direction: Vec3,
    pub tan_half_fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
    pub blur_strength: f32,
    pub kernel_size: usize,
    pub weights: Vec<f32>,
    pub offsets: Vec<f32>,
    pub samples2: Vec<Vec2>,
    pub samples3: Vec<Vec3>,
    pub resolution: Vec2,
    pub direction: Vec2,
    pub noise_scale: Vec2,
    pub radius: f32,
    pub power: f32,
    pub bias: f32,
}

impl ProgramParams {
    pub fn from_uniforms(set: &UniformSet) -> Self {
        let model = set.mat4(uniforms::MODEL_MATRIX).unwrap_or(Mat4::IDENTITY);
        let previous_model = set.mat4(uniforms::PREVIOUS_MODEL_MATRIX).unwrap_or(model);
        let view = set.mat4(uniforms::VIEW_MATRIX).unwrap_or(Mat4::IDENTITY);
        let inverse_view = set
            .mat4(uniforms::INVERSE_VIEW_MATRIX)
            .unwrap_or_else(|| view.inverse());
        let light_view = set.mat4(uniforms::LIGHT_VIEW_MATRIX).unwrap_or(Mat4::IDENTITY);
        let light_projection = set
            .mat4(uniforms::LIGHT_PROJECTION_MATRIX)
            .unwrap_or(Mat4::IDENTITY);

        let weights = set.floats(uniforms::KERNEL).map(<[f32]>::to_vec).unwrap_or_default();
        let offsets = set.floats(uniforms::OFFSETS).map(<[f32]>::to_vec).unwrap_or_default();
        let samples2 = set.vec2s(uniforms::KERNEL).map(<[Vec2]>::to_vec).unwrap_or_default();
        let samples3 = set.vec3s(uniforms::KERNEL).map(<[Vec3]>::to_vec).unwrap_or_default();
        let available = weights.len().max(samples2.len()).max(samples3.len());
        let kernel_size = set
            .int(uniforms::KERNEL_SIZE)
            .map(|size| size.max(0) as usize)
            .unwrap_or(available)
            .min(available)
            .min(MAX_KERNEL_SIZE);

        Self {
            model,
            previous_model,
            motion: previous_model * model.inverse(),
            normal_matrix: Mat3::from_mat4(model).inverse().transpose(),
            view,
            inverse_view,
            projection: set.mat4(uniforms::PROJECTION_MATRIX).unwrap_or(Mat4::IDENTITY),
            previous_view: set.mat4(uniforms::PREVIOUS_VIEW_MATRIX).unwrap_or(view),
            previous_projection: set
                .mat4(uniforms::PREVIOUS_PROJECTION_MATRIX)
                .or_else(|| set.mat4(uniforms::PROJECTION_MATRIX))
                .unwrap_or(Mat4::IDENTITY),
            light_view_projection: light_projection * light_view,
            model_color: set.vec4(uniforms::MODEL_COLOR).unwrap_or(Vec4::ONE),
            diffuse: set.float(uniforms::DIFFUSE_INTENSITY).unwrap_or(1.0),
            specular: set.float(uniforms::SPECULAR_INTENSITY).unwrap_or(0.0),
            ambient: set.float(uniforms::AMBIENT_INTENSITY).unwrap_or(0.0),
            shininess: set.float(uniforms::SHININESS).unwrap_or(0.0),
            light_direction: set
                .vec3(uniforms::LIGHT_DIRECTION)
                .unwrap_or(Vec3::NEG_Y)
                .normalize_or_zero(),
            tan_half_fov: set.float(uniforms::TAN_HALF_FOV).unwrap_or(1.0),
            aspect_ratio: set.float(uniforms::ASPECT_RATIO).unwrap_or(1.0),
            near: set.float(uniforms::Z_NEAR).unwrap_or(0.1),
            far: set.float(uniforms::Z_FAR).unwrap_or(1000.0),
            blur_strength: set.float(uniforms::BLUR_STRENGTH).unwrap_or(0.0),
            kernel_size,
            weights,
            offsets,
            samples2,
            samples3,
            resolution: set.vec2(uniforms::RESOLUTION).unwrap_or(Vec2::ONE),
            direction: set.vec2(uniforms::DIRECTION).unwrap_or(Vec2::X),
            noise_scale: set.vec2(uniforms::NOISE_SCALE).unwrap_or(Vec2::ONE),
            radius: set.float(uniforms::RADIUS).unwrap_or(1.0),
            power: set.float(uniforms::POWER).unwrap_or(1.0),
            bias: set.float(uniforms::BIAS).unwrap_or(0.0),
        }
    }
}
