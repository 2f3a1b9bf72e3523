//! Material cache and binding index.
//!
//! Maps authoring material identity to a renderer-side
//! [`MaterialHandle`] and tracks, per submesh, which material is bound
//! to it. The reverse index (material → submeshes) is what makes
//! material-change propagation O(affected submeshes) instead of
//! O(all instances).
//!
//! The cache never decides *when* to bind; it only mints handles and
//! keeps the index consistent. Renderer bind/unbind calls for concrete
//! placements are issued by the engine, which knows which placement
//! currently owns each prototype.

use std::collections::{BTreeSet, HashMap};

use emberbridge_core::key::{EntityKey, SubmeshKey};
use emberbridge_core::scene::MaterialDescription;

use crate::renderer::{MaterialHandle, SceneRenderer};

/// Cache of renderer-side materials and submesh bindings.
#[derive(Debug, Default)]
pub struct MaterialCache {
    handles: HashMap<EntityKey, MaterialHandle>,
    bindings: HashMap<SubmeshKey, EntityKey>,
    users: HashMap<EntityKey, BTreeSet<SubmeshKey>>,
}

impl MaterialCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached handle for a material, if one was created.
    pub fn handle(&self, key: EntityKey) -> Option<MaterialHandle> {
        self.handles.get(&key).copied()
    }

    /// Number of live renderer-side materials.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// The material currently bound to a submesh, if any.
    pub fn binding(&self, submesh: SubmeshKey) -> Option<EntityKey> {
        self.bindings.get(&submesh).copied()
    }

    /// Snapshot of the submeshes currently using a material.
    ///
    /// Returned by value so callers can mutate the cache while walking
    /// the set.
    pub fn users(&self, key: EntityKey) -> BTreeSet<SubmeshKey> {
        self.users.get(&key).cloned().unwrap_or_default()
    }

    /// Create the renderer-side material once per key; idempotent.
    pub fn ensure<R: SceneRenderer + ?Sized>(
        &mut self,
        key: EntityKey,
        description: &MaterialDescription,
        renderer: &mut R,
    ) -> MaterialHandle {
        if let Some(handle) = self.handles.get(&key) {
            return *handle;
        }
        let handle = renderer.create_material(key, description);
        log::debug!("created material '{}' as {handle} for {key}", description.name);
        self.handles.insert(key, handle);
        handle
    }

    /// Tear down and recreate the renderer-side material for `key`.
    ///
    /// Used when the authoring material's node graph changed. The
    /// caller re-binds the new handle to every submesh in
    /// [`users`](Self::users); the index itself is left untouched.
    pub fn rebind<R: SceneRenderer + ?Sized>(
        &mut self,
        key: EntityKey,
        description: &MaterialDescription,
        renderer: &mut R,
    ) -> MaterialHandle {
        if let Some(old) = self.handles.remove(&key) {
            renderer.remove_material(old);
        }
        let handle = renderer.create_material(key, description);
        log::debug!("rebuilt material '{}' as {handle} for {key}", description.name);
        self.handles.insert(key, handle);
        handle
    }

    /// Record that `submesh` uses `key`, replacing any previous binding.
    pub fn assign(&mut self, key: EntityKey, submesh: SubmeshKey) {
        if let Some(previous) = self.bindings.insert(submesh, key) {
            if previous != key {
                if let Some(set) = self.users.get_mut(&previous) {
                    set.remove(&submesh);
                }
            }
        }
        self.users.entry(key).or_default().insert(submesh);
    }

    /// Clear the binding of `submesh`, returning the material that was
    /// bound.
    pub fn unassign(&mut self, submesh: SubmeshKey) -> Option<EntityKey> {
        let key = self.bindings.remove(&submesh)?;
        if let Some(set) = self.users.get_mut(&key) {
            set.remove(&submesh);
            if set.is_empty() {
                self.users.remove(&key);
            }
        }
        Some(key)
    }

    /// Destroy the renderer-side material for `key`, dropping every
    /// binding that pointed at it.
    ///
    /// Returns whether a handle existed.
    pub fn remove<R: SceneRenderer + ?Sized>(&mut self, key: EntityKey, renderer: &mut R) -> bool {
        let Some(handle) = self.handles.remove(&key) else {
            return false;
        };
        renderer.remove_material(handle);
        for submesh in self.users.remove(&key).unwrap_or_default() {
            self.bindings.remove(&submesh);
        }
        true
    }
}
