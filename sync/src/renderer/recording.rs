//! Recording renderer for tests and development.
//!
//! This implementation performs no rendering but keeps a faithful model
//! of the retained scene the engine has built: live submeshes, instance
//! sources, material bindings, lights, environment state. Every
//! mutating call is appended to an op log so tests can assert exact
//! call sets, and the total op count backs the idempotency property
//! ("a second sync with no changes issues zero calls").
//!
//! Protocol violations (removing a submesh that still has live
//! instances, instancing a submesh that does not exist) panic: they
//! indicate a bug in the synchronization engine, which is exactly what
//! a test renderer is there to catch.

use std::collections::{BTreeMap, BTreeSet};

use emberbridge_core::geometry::Geometry;
use emberbridge_core::key::EntityKey;
use emberbridge_core::math::Mat4;
use emberbridge_core::scene::{LightDescription, MaterialDescription, VolumeData};

use super::{BackgroundOverride, EnvironmentLight, MaterialHandle, SceneRenderer, SubmeshRef};

/// One recorded renderer-mutating call.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererOp {
    /// An owned submesh was created.
    CreateSubmesh {
        /// The submesh address.
        submesh: SubmeshRef,
        /// Face count of the uploaded geometry.
        faces: usize,
    },
    /// An owned submesh was removed.
    RemoveSubmesh(SubmeshRef),
    /// A lightweight instance was created.
    CreateInstance {
        /// The instance address.
        instance: SubmeshRef,
        /// The owned submesh it references.
        source: SubmeshRef,
    },
    /// A lightweight instance was removed.
    RemoveInstance(SubmeshRef),
    /// An owned submesh's transform changed.
    SetSubmeshTransform(SubmeshRef),
    /// An instance's transform changed.
    SetInstanceTransform(SubmeshRef),
    /// An owned submesh was shown.
    ShowSubmesh(SubmeshRef),
    /// An owned submesh was hidden.
    HideSubmesh(SubmeshRef),
    /// An instance was shown.
    ShowInstance(SubmeshRef),
    /// An instance was hidden.
    HideInstance(SubmeshRef),
    /// A volume payload was attached.
    AttachVolume(SubmeshRef),
    /// A volume payload was detached.
    DetachVolume(SubmeshRef),
    /// A material was created.
    CreateMaterial {
        /// The authoring material key.
        key: EntityKey,
        /// The minted handle.
        handle: MaterialHandle,
    },
    /// A material was destroyed.
    RemoveMaterial(MaterialHandle),
    /// A material was bound to an owned submesh.
    BindSubmeshMaterial {
        /// The submesh address.
        submesh: SubmeshRef,
        /// The bound handle.
        handle: MaterialHandle,
    },
    /// An owned submesh's binding was removed.
    UnbindSubmeshMaterial(SubmeshRef),
    /// A material was bound to an instance.
    BindInstanceMaterial {
        /// The instance address.
        instance: SubmeshRef,
        /// The bound handle.
        handle: MaterialHandle,
    },
    /// An instance's binding was removed.
    UnbindInstanceMaterial(SubmeshRef),
    /// A light was attached.
    AttachLight(EntityKey),
    /// A light was removed.
    RemoveLight(EntityKey),
    /// A light was shown.
    ShowLight(EntityKey),
    /// A light was hidden.
    HideLight(EntityKey),
    /// The environment light was attached or replaced.
    AttachEnvironmentLight,
    /// The environment light was detached.
    DetachEnvironmentLight,
    /// The environment intensity changed.
    SetEnvironmentIntensity(f32),
    /// The environment rotation changed.
    SetEnvironmentRotation([f32; 3]),
    /// The background override was set (`true`) or cleared (`false`).
    SetBackground(bool),
}

/// Renderer implementation that records every call.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    ops: Vec<RendererOp>,
    next_handle: u64,
    submeshes: BTreeSet<SubmeshRef>,
    instances: BTreeMap<SubmeshRef, SubmeshRef>,
    materials: BTreeSet<MaterialHandle>,
    submesh_bindings: BTreeMap<SubmeshRef, MaterialHandle>,
    instance_bindings: BTreeMap<SubmeshRef, MaterialHandle>,
    hidden_submeshes: BTreeSet<SubmeshRef>,
    hidden_instances: BTreeSet<SubmeshRef>,
    volumes: BTreeSet<SubmeshRef>,
    lights: BTreeSet<EntityKey>,
    hidden_lights: BTreeSet<EntityKey>,
    environment: Option<EnvironmentLight>,
    background: Option<BackgroundOverride>,
}

impl RecordingRenderer {
    /// Create an empty recording renderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded op, in call order.
    pub fn ops(&self) -> &[RendererOp] {
        &self.ops
    }

    /// Total number of mutating calls recorded so far.
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Drop the op log (live-state model is kept).
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Take the op log, leaving it empty.
    pub fn take_ops(&mut self) -> Vec<RendererOp> {
        std::mem::take(&mut self.ops)
    }

    /// Number of live owned submeshes.
    pub fn submesh_count(&self) -> usize {
        self.submeshes.len()
    }

    /// Number of live lightweight instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Number of live materials.
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Whether an owned submesh is live.
    pub fn has_submesh(&self, submesh: SubmeshRef) -> bool {
        self.submeshes.contains(&submesh)
    }

    /// Whether a lightweight instance is live.
    pub fn has_instance(&self, instance: SubmeshRef) -> bool {
        self.instances.contains_key(&instance)
    }

    /// The owned submesh an instance references.
    pub fn instance_source(&self, instance: SubmeshRef) -> Option<SubmeshRef> {
        self.instances.get(&instance).copied()
    }

    /// Current binding of an owned submesh.
    pub fn submesh_binding(&self, submesh: SubmeshRef) -> Option<MaterialHandle> {
        self.submesh_bindings.get(&submesh).copied()
    }

    /// Current binding of an instance.
    pub fn instance_binding(&self, instance: SubmeshRef) -> Option<MaterialHandle> {
        self.instance_bindings.get(&instance).copied()
    }

    /// Whether an owned submesh is currently hidden.
    pub fn submesh_hidden(&self, submesh: SubmeshRef) -> bool {
        self.hidden_submeshes.contains(&submesh)
    }

    /// Whether an instance is currently hidden.
    pub fn instance_hidden(&self, instance: SubmeshRef) -> bool {
        self.hidden_instances.contains(&instance)
    }

    /// Whether a volume payload is attached to a submesh.
    pub fn has_volume(&self, submesh: SubmeshRef) -> bool {
        self.volumes.contains(&submesh)
    }

    /// Whether a light is attached.
    pub fn has_light(&self, key: EntityKey) -> bool {
        self.lights.contains(&key)
    }

    /// Whether a light is currently hidden.
    pub fn light_hidden(&self, key: EntityKey) -> bool {
        self.hidden_lights.contains(&key)
    }

    /// The current environment light, if attached.
    pub fn environment(&self) -> Option<&EnvironmentLight> {
        self.environment.as_ref()
    }

    /// The current background override, if set.
    pub fn background(&self) -> Option<&BackgroundOverride> {
        self.background.as_ref()
    }
}

impl SceneRenderer for RecordingRenderer {
    fn create_submesh(&mut self, submesh: SubmeshRef, geometry: &Geometry, _transform: &Mat4) {
        log::trace!(
            "RecordingRenderer: creating submesh {submesh} ({} faces)",
            geometry.face_count()
        );
        assert!(
            self.submeshes.insert(submesh),
            "submesh {submesh} created twice"
        );
        self.ops.push(RendererOp::CreateSubmesh {
            submesh,
            faces: geometry.face_count(),
        });
    }

    fn remove_submesh(&mut self, submesh: SubmeshRef) {
        assert!(
            self.submeshes.remove(&submesh),
            "removing unknown submesh {submesh}"
        );
        assert!(
            !self.instances.values().any(|source| *source == submesh),
            "removing submesh {submesh} while instances reference it"
        );
        self.submesh_bindings.remove(&submesh);
        self.hidden_submeshes.remove(&submesh);
        self.volumes.remove(&submesh);
        self.ops.push(RendererOp::RemoveSubmesh(submesh));
    }

    fn create_instance(&mut self, instance: SubmeshRef, source: SubmeshRef, _transform: &Mat4) {
        log::trace!("RecordingRenderer: creating instance {instance} of {source}");
        assert!(
            self.submeshes.contains(&source),
            "instance {instance} references unknown submesh {source}"
        );
        assert!(
            self.instances.insert(instance, source).is_none(),
            "instance {instance} created twice"
        );
        self.ops.push(RendererOp::CreateInstance { instance, source });
    }

    fn remove_instance(&mut self, instance: SubmeshRef) {
        assert!(
            self.instances.remove(&instance).is_some(),
            "removing unknown instance {instance}"
        );
        self.instance_bindings.remove(&instance);
        self.hidden_instances.remove(&instance);
        self.ops.push(RendererOp::RemoveInstance(instance));
    }

    fn set_submesh_transform(&mut self, submesh: SubmeshRef, _transform: &Mat4) {
        assert!(self.submeshes.contains(&submesh));
        self.ops.push(RendererOp::SetSubmeshTransform(submesh));
    }

    fn set_instance_transform(&mut self, instance: SubmeshRef, _transform: &Mat4) {
        assert!(self.instances.contains_key(&instance));
        self.ops.push(RendererOp::SetInstanceTransform(instance));
    }

    fn show_submesh(&mut self, submesh: SubmeshRef) {
        self.hidden_submeshes.remove(&submesh);
        self.ops.push(RendererOp::ShowSubmesh(submesh));
    }

    fn hide_submesh(&mut self, submesh: SubmeshRef) {
        self.hidden_submeshes.insert(submesh);
        self.ops.push(RendererOp::HideSubmesh(submesh));
    }

    fn show_instance(&mut self, instance: SubmeshRef) {
        self.hidden_instances.remove(&instance);
        self.ops.push(RendererOp::ShowInstance(instance));
    }

    fn hide_instance(&mut self, instance: SubmeshRef) {
        self.hidden_instances.insert(instance);
        self.ops.push(RendererOp::HideInstance(instance));
    }

    fn attach_volume(&mut self, submesh: SubmeshRef, volume: &VolumeData) {
        log::trace!(
            "RecordingRenderer: attaching volume to {submesh} ({} voxels)",
            volume.voxel_count()
        );
        self.volumes.insert(submesh);
        self.ops.push(RendererOp::AttachVolume(submesh));
    }

    fn detach_volume(&mut self, submesh: SubmeshRef) {
        self.volumes.remove(&submesh);
        self.ops.push(RendererOp::DetachVolume(submesh));
    }

    fn create_material(
        &mut self,
        key: EntityKey,
        description: &MaterialDescription,
    ) -> MaterialHandle {
        log::trace!(
            "RecordingRenderer: creating material '{}' for {key}",
            description.name
        );
        let handle = MaterialHandle::new(self.next_handle);
        self.next_handle += 1;
        self.materials.insert(handle);
        self.ops.push(RendererOp::CreateMaterial { key, handle });
        handle
    }

    fn remove_material(&mut self, handle: MaterialHandle) {
        assert!(
            self.materials.remove(&handle),
            "removing unknown material {handle}"
        );
        self.submesh_bindings.retain(|_, bound| *bound != handle);
        self.instance_bindings.retain(|_, bound| *bound != handle);
        self.ops.push(RendererOp::RemoveMaterial(handle));
    }

    fn bind_submesh_material(&mut self, submesh: SubmeshRef, handle: MaterialHandle) {
        assert!(self.submeshes.contains(&submesh));
        assert!(self.materials.contains(&handle));
        self.submesh_bindings.insert(submesh, handle);
        self.ops
            .push(RendererOp::BindSubmeshMaterial { submesh, handle });
    }

    fn unbind_submesh_material(&mut self, submesh: SubmeshRef) {
        self.submesh_bindings.remove(&submesh);
        self.ops.push(RendererOp::UnbindSubmeshMaterial(submesh));
    }

    fn bind_instance_material(&mut self, instance: SubmeshRef, handle: MaterialHandle) {
        assert!(self.instances.contains_key(&instance));
        assert!(self.materials.contains(&handle));
        self.instance_bindings.insert(instance, handle);
        self.ops
            .push(RendererOp::BindInstanceMaterial { instance, handle });
    }

    fn unbind_instance_material(&mut self, instance: SubmeshRef) {
        self.instance_bindings.remove(&instance);
        self.ops.push(RendererOp::UnbindInstanceMaterial(instance));
    }

    fn attach_light(&mut self, key: EntityKey, light: &LightDescription) {
        log::trace!("RecordingRenderer: attaching light '{}' ({key})", light.name);
        self.lights.insert(key);
        self.ops.push(RendererOp::AttachLight(key));
    }

    fn remove_light(&mut self, key: EntityKey) {
        self.lights.remove(&key);
        self.hidden_lights.remove(&key);
        self.ops.push(RendererOp::RemoveLight(key));
    }

    fn show_light(&mut self, key: EntityKey) {
        self.hidden_lights.remove(&key);
        self.ops.push(RendererOp::ShowLight(key));
    }

    fn hide_light(&mut self, key: EntityKey) {
        self.hidden_lights.insert(key);
        self.ops.push(RendererOp::HideLight(key));
    }

    fn attach_environment_light(&mut self, light: &EnvironmentLight) {
        self.environment = Some(light.clone());
        self.ops.push(RendererOp::AttachEnvironmentLight);
    }

    fn detach_environment_light(&mut self) {
        self.environment = None;
        self.ops.push(RendererOp::DetachEnvironmentLight);
    }

    fn set_environment_intensity(&mut self, intensity: f32) {
        self.ops.push(RendererOp::SetEnvironmentIntensity(intensity));
    }

    fn set_environment_rotation(&mut self, rotation: [f32; 3]) {
        self.ops.push(RendererOp::SetEnvironmentRotation(rotation));
    }

    fn set_background(&mut self, background: Option<&BackgroundOverride>) {
        self.background = background.cloned();
        self.ops.push(RendererOp::SetBackground(background.is_some()));
    }
}
