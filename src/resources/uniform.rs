//! Named uniform values

use glam::{Mat4, Vec2, Vec3, Vec4};
use std::collections::HashMap;

/// A uniform value as seen by a program
#[derive(Debug, Clone, PartialEq)]
pub enum Uniform {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    FloatArray(Vec<f32>),
    Vec2Array(Vec<Vec2>),
    Vec3Array(Vec<Vec3>),
}

/// A set of uniforms keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformSet {
    values: HashMap<String, Uniform>,
}

impl UniformSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: Uniform) {
        self.values.insert(name.to_string(), value);
    }

    pub fn with(mut self, name: &str, value: Uniform) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Uniform> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Uniform> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy every value of `other` into this set, replacing existing names
    pub fn merge(&mut self, other: &UniformSet) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Uniform)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.values.get(name)? {
            Uniform::Float(v) => Some(*v),
            Uniform::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        match self.values.get(name)? {
            Uniform::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.values.get(name)? {
            Uniform::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn vec2(&self, name: &str) -> Option<Vec2> {
        match self.values.get(name)? {
            Uniform::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn vec3(&self, name: &str) -> Option<Vec3> {
        match self.values.get(name)? {
            Uniform::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn vec4(&self, name: &str) -> Option<Vec4> {
        match self.values.get(name)? {
            Uniform::Vec4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn mat4(&self, name: &str) -> Option<Mat4> {
        match self.values.get(name)? {
            Uniform::Mat4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn floats(&self, name: &str) -> Option<&[f32]> {
        match self.values.get(name)? {
            Uniform::FloatArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn vec2s(&self, name: &str) -> Option<&[Vec2]> {
        match self.values.get(name)? {
            Uniform::Vec2Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn vec3s(&self, name: &str) -> Option<&[Vec3]> {
        match self.values.get(name)? {
            Uniform::Vec3Array(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overrides() {
        let mut base = UniformSet::new()
            .with("radius", Uniform::Float(0.5))
            .with("power", Uniform::Float(2.0));
        let overrides = UniformSet::new().with("radius", Uniform::Float(1.5));

        base.merge(&overrides);

        assert_eq!(base.float("radius"), Some(1.5));
        assert_eq!(base.float("power"), Some(2.0));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn test_typed_getters_reject_other_types() {
        let set = UniformSet::new().with("direction", Uniform::Vec2(Vec2::X));
        assert_eq!(set.vec2("direction"), Some(Vec2::X));
        assert_eq!(set.vec3("direction"), None);
        assert_eq!(set.float("missing"), None);
    }
}
