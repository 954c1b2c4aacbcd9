//! Materials: a program plus the textures and uniforms it is drawn with

use crate::backend::{uniforms, ProgramHandle, TextureHandle};
use crate::resources::{Uniform, UniformSet};
use glam::{Vec3, Vec4};
use std::collections::BTreeMap;

/// Program, texture units and uniforms used to draw a model or a full-screen pass
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    name: String,
    program: ProgramHandle,
    textures: BTreeMap<u32, TextureHandle>,
    uniforms: UniformSet,
}

impl Material {
    pub fn new(name: &str, program: ProgramHandle) -> Self {
        Self {
            name: name.to_string(),
            program,
            textures: BTreeMap::new(),
            uniforms: UniformSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub fn with_texture(mut self, unit: u32, texture: TextureHandle) -> Self {
        self.textures.insert(unit, texture);
        self
    }

    pub fn with_uniform(mut self, name: &str, value: Uniform) -> Self {
        self.uniforms.set(name, value);
        self
    }

    pub fn with_uniforms(mut self, values: &UniformSet) -> Self {
        self.uniforms.merge(values);
        self
    }

    /// Diffuse, specular, ambient and shininess terms read by the lit programs
    pub fn with_lighting(self, diffuse: f32, specular: f32, ambient: f32, shininess: f32) -> Self {
        self.with_uniform(uniforms::DIFFUSE_INTENSITY, Uniform::Float(diffuse))
            .with_uniform(uniforms::SPECULAR_INTENSITY, Uniform::Float(specular))
            .with_uniform(uniforms::AMBIENT_INTENSITY, Uniform::Float(ambient))
            .with_uniform(uniforms::SHININESS, Uniform::Float(shininess))
    }

    pub fn with_color(self, color: Vec4) -> Self {
        self.with_uniform(uniforms::MODEL_COLOR, Uniform::Vec4(color))
    }

    pub fn with_light_direction(self, direction: Vec3) -> Self {
        self.with_uniform(uniforms::LIGHT_DIRECTION, Uniform::Vec3(direction))
    }

    pub fn set_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.textures.insert(unit, texture);
    }

    pub fn set_uniform(&mut self, name: &str, value: Uniform) {
        self.uniforms.set(name, value);
    }

    pub fn texture(&self, unit: u32) -> Option<TextureHandle> {
        self.textures.get(&unit).copied()
    }

    /// Texture bindings ordered by unit
    pub fn texture_bindings(&self) -> Vec<(u32, TextureHandle)> {
        self.textures.iter().map(|(unit, texture)| (*unit, *texture)).collect()
    }

    pub fn uniforms(&self) -> &UniformSet {
        &self.uniforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lighting_terms() {
        let material = Material::new("solid", ProgramHandle(1)).with_lighting(0.8, 0.5, 0.2, 0.15);
        let values = material.uniforms();
        assert_eq!(values.float(uniforms::DIFFUSE_INTENSITY), Some(0.8));
        assert_eq!(values.float(uniforms::SPECULAR_INTENSITY), Some(0.5));
        assert_eq!(values.float(uniforms::AMBIENT_INTENSITY), Some(0.2));
        assert_eq!(values.float(uniforms::SHININESS), Some(0.15));
    }

    #[test]
    fn test_texture_bindings_sorted_by_unit() {
        let material = Material::new("lighting", ProgramHandle(1))
            .with_texture(5, TextureHandle(50))
            .with_texture(0, TextureHandle(10))
            .with_texture(2, TextureHandle(20));
        let units: Vec<u32> = material.texture_bindings().iter().map(|(u, _)| *u).collect();
        assert_eq!(units, vec![0, 2, 5]);
    }
}
