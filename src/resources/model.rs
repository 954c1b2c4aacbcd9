//! Models and shared model lists

use crate::resources::{Material, Mesh, Uniform, UniformSet};
use glam::{Mat4, Quat, Vec3};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a model across the lists it is moved between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(u64);

impl ModelId {
    fn next() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Placement of a model. The matrix scales, then rotates, then translates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A mesh placed in the world with a material and its own uniforms
#[derive(Debug, Clone)]
pub struct Model {
    id: ModelId,
    mesh: Arc<Mesh>,
    material: Option<Arc<Material>>,
    pub transform: Transform,
    uniforms: UniformSet,
    pub visible: bool,
}

impl Model {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self {
            id: ModelId::next(),
            mesh,
            material: None,
            transform: Transform::default(),
            uniforms: UniformSet::new(),
            visible: true,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_material(mut self, material: Arc<Material>) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_uniform(mut self, name: &str, value: Uniform) -> Self {
        self.uniforms.set(name, value);
        self
    }

    /// A new model drawing the same geometry and material, with its own identity,
    /// transform and uniforms
    pub fn instance(&self) -> Model {
        Model {
            id: ModelId::next(),
            mesh: Arc::clone(&self.mesh),
            material: self.material.clone(),
            transform: self.transform,
            uniforms: UniformSet::new(),
            visible: self.visible,
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn material(&self) -> Option<&Arc<Material>> {
        self.material.as_ref()
    }

    pub fn set_material(&mut self, material: Arc<Material>) {
        self.material = Some(material);
    }

    pub fn uniforms(&self) -> &UniformSet {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformSet {
        &mut self.uniforms
    }

    pub fn set_uniform(&mut self, name: &str, value: Uniform) {
        self.uniforms.set(name, value);
    }

    pub fn matrix(&self) -> Mat4 {
        self.transform.matrix()
    }
}

/// Model list shared between the nodes that draw it and the code that edits it
#[derive(Debug, Clone, Default)]
pub struct ModelList {
    models: Arc<RwLock<Vec<Model>>>,
}

impl ModelList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model, replacing any model with the same id
    pub fn add(&self, model: Model) {
        let mut models = self.models.write();
        match models.iter_mut().find(|m| m.id() == model.id()) {
            Some(existing) => *existing = model,
            None => models.push(model),
        }
    }

    pub fn remove(&self, id: ModelId) -> Option<Model> {
        let mut models = self.models.write();
        let index = models.iter().position(|m| m.id() == id)?;
        Some(models.remove(index))
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.models.read().iter().any(|m| m.id() == id)
    }

    pub fn clear(&self) {
        self.models.write().clear();
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Model>> {
        self.models.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Model>> {
        self.models.write()
    }

    /// Whether both handles refer to the same underlying list
    pub fn shares_with(&self, other: &ModelList) -> bool {
        Arc::ptr_eq(&self.models, &other.models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_shares_mesh_not_identity() {
        let model = Model::new(Arc::new(Mesh::cube()))
            .with_uniform("modelColor", Uniform::Float(1.0))
            .with_transform(Transform::from_position(Vec3::new(0.0, 22.0, -6.0)));
        let mut instance = model.instance();
        instance.transform.position = Vec3::new(0.0, 22.0, 6.0);

        assert!(Arc::ptr_eq(model.mesh(), instance.mesh()));
        assert_ne!(model.id(), instance.id());
        assert!(instance.uniforms().is_empty());
        assert_eq!(model.transform.position.z, -6.0);
    }

    #[test]
    fn test_model_matrix_scales_before_translating() {
        let model = Model::new(Arc::new(Mesh::quad()))
            .with_transform(Transform::from_position(Vec3::new(10.0, 0.0, 0.0)).with_scale(Vec3::splat(2.0)));
        let corner = model.matrix().transform_point3(Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(corner, Vec3::new(12.0, 2.0, 0.0));
        assert_eq!(Model::new(Arc::new(Mesh::quad())).matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_list_add_replaces_same_id() {
        let list = ModelList::new();
        let model = Model::new(Arc::new(Mesh::quad()));
        list.add(model.clone());
        list.add(model.clone());
        assert_eq!(list.len(), 1);

        let handle = list.clone();
        assert!(handle.shares_with(&list));
        assert!(handle.remove(model.id()).is_some());
        assert!(list.is_empty());
    }
}
