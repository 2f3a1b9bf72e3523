//! Renderer interface abstraction.
//!
//! The retained-mode renderer is an external collaborator; this module
//! defines the narrow surface the synchronization engine drives:
//! - [`SceneRenderer`] - Trait over every renderer-mutating call
//! - [`SubmeshRef`] - Address of one renderer-side submesh or instance
//! - [`MaterialHandle`] - Opaque renderer-side material handle
//! - [`RecordingRenderer`] - Call-recording implementation for tests
//!   and development
//!
//! # Architecture
//!
//! Calls are synchronous from the engine's point of view. If the
//! embedding application renders concurrently on another thread, it
//! must serialize these calls against that thread itself; the engine
//! holds no locks.

pub mod recording;

pub use recording::{RecordingRenderer, RendererOp};

use std::fmt;

use emberbridge_core::geometry::Geometry;
use emberbridge_core::key::EntityKey;
use emberbridge_core::math::Mat4;
use emberbridge_core::scene::{LightDescription, MaterialDescription, VolumeData};

/// Opaque handle to a renderer-side material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterialHandle(u64);

impl MaterialHandle {
    /// Wrap a raw handle value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MaterialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mat#{}", self.0)
    }
}

/// Address of one renderer-side submesh: a placement plus a material
/// slot.
///
/// The same address shape is used for owned submeshes and for
/// lightweight instances; which one it names follows from which call
/// created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmeshRef {
    /// The placement the submesh belongs to.
    pub placement: EntityKey,
    /// Material-slot index.
    pub slot: u32,
}

impl SubmeshRef {
    /// Create a submesh address.
    pub fn new(placement: EntityKey, slot: u32) -> Self {
        Self { placement, slot }
    }
}

impl fmt::Display for SubmeshRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.placement, self.slot)
    }
}

/// Environment light source.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvironmentLight {
    /// Uniform color environment.
    Color([f32; 3]),
    /// Image-based environment, named by resource.
    Image(String),
}

/// Background override shown behind the scene.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundOverride {
    /// Solid color background.
    Color([f32; 3]),
    /// Image background, named by resource.
    Image(String),
}

/// Every renderer-mutating call the synchronization engine issues.
///
/// Implementations own the renderer-side scene; the engine only ever
/// addresses it through [`SubmeshRef`]s, [`EntityKey`]s, and
/// [`MaterialHandle`]s it minted here.
pub trait SceneRenderer {
    /// Create an owned submesh with the given geometry and transform.
    fn create_submesh(&mut self, submesh: SubmeshRef, geometry: &Geometry, transform: &Mat4);

    /// Remove an owned submesh.
    fn remove_submesh(&mut self, submesh: SubmeshRef);

    /// Create a lightweight instance referencing an owned submesh,
    /// contributing only a transform.
    fn create_instance(&mut self, instance: SubmeshRef, source: SubmeshRef, transform: &Mat4);

    /// Remove a lightweight instance.
    fn remove_instance(&mut self, instance: SubmeshRef);

    /// Update an owned submesh's transform.
    fn set_submesh_transform(&mut self, submesh: SubmeshRef, transform: &Mat4);

    /// Update a lightweight instance's transform.
    fn set_instance_transform(&mut self, instance: SubmeshRef, transform: &Mat4);

    /// Show an owned submesh.
    fn show_submesh(&mut self, submesh: SubmeshRef);

    /// Hide an owned submesh without removing it.
    fn hide_submesh(&mut self, submesh: SubmeshRef);

    /// Show a lightweight instance.
    fn show_instance(&mut self, instance: SubmeshRef);

    /// Hide a lightweight instance without removing it.
    fn hide_instance(&mut self, instance: SubmeshRef);

    /// Attach a volumetric payload to an owned submesh.
    fn attach_volume(&mut self, submesh: SubmeshRef, volume: &VolumeData);

    /// Detach a volumetric payload.
    fn detach_volume(&mut self, submesh: SubmeshRef);

    /// Create a renderer-side material and return its handle.
    fn create_material(&mut self, key: EntityKey, description: &MaterialDescription)
        -> MaterialHandle;

    /// Destroy a renderer-side material.
    fn remove_material(&mut self, handle: MaterialHandle);

    /// Bind a material to an owned submesh, replacing any previous
    /// binding.
    fn bind_submesh_material(&mut self, submesh: SubmeshRef, handle: MaterialHandle);

    /// Remove the material binding of an owned submesh.
    fn unbind_submesh_material(&mut self, submesh: SubmeshRef);

    /// Bind a material to a lightweight instance, replacing any
    /// previous binding.
    fn bind_instance_material(&mut self, instance: SubmeshRef, handle: MaterialHandle);

    /// Remove the material binding of a lightweight instance.
    fn unbind_instance_material(&mut self, instance: SubmeshRef);

    /// Attach a light to the renderer scene.
    fn attach_light(&mut self, key: EntityKey, light: &LightDescription);

    /// Remove a light from the renderer scene.
    fn remove_light(&mut self, key: EntityKey);

    /// Show a previously hidden light.
    fn show_light(&mut self, key: EntityKey);

    /// Hide a light without removing it.
    fn hide_light(&mut self, key: EntityKey);

    /// Attach (or replace) the environment light.
    fn attach_environment_light(&mut self, light: &EnvironmentLight);

    /// Detach the environment light.
    fn detach_environment_light(&mut self);

    /// Set the environment light intensity.
    fn set_environment_intensity(&mut self, intensity: f32);

    /// Set the environment rotation (Euler XYZ, radians).
    fn set_environment_rotation(&mut self, rotation: [f32; 3]);

    /// Set or clear the background override.
    fn set_background(&mut self, background: Option<&BackgroundOverride>);
}
