//! Prototype registry: deduplicated extracted geometry.
//!
//! A [`Prototype`] holds the extracted geometry for one mesh data block,
//! shared by every placement that references it. The registry is keyed
//! by the data block's [`EntityKey`]; extraction happens at most once
//! per key until the authoring scene reports the data as changed.
//!
//! Cache invalidation is driven by the delegate's dirty flag, not by
//! content hashing: a mesh edited and reverted to identical content
//! within one frame is still re-extracted.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use emberbridge_core::geometry::Geometry;
use emberbridge_core::key::EntityKey;
use emberbridge_core::scene::{ObjectInfo, SceneDelegate};

use crate::error::{ConsistencyViolation, SyncError};

/// Deduplicated source geometry for one mesh identity.
#[derive(Debug, Clone)]
pub struct Prototype {
    key: EntityKey,
    geometry: Arc<Geometry>,
    used_slots: BTreeSet<u32>,
}

impl Prototype {
    /// The source mesh data key.
    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// The extracted geometry.
    pub fn geometry(&self) -> &Arc<Geometry> {
        &self.geometry
    }

    /// Material-slot indices actually used by some face.
    pub fn used_slots(&self) -> &BTreeSet<u32> {
        &self.used_slots
    }

    /// The geometry partition for one material slot.
    pub fn submesh(&self, slot: u32) -> Geometry {
        self.geometry.submesh(slot)
    }
}

/// Registry of prototypes keyed by mesh data identity.
#[derive(Debug, Default)]
pub struct PrototypeRegistry {
    prototypes: HashMap<EntityKey, Prototype>,
}

impl PrototypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a prototype.
    pub fn get(&self, key: EntityKey) -> Option<&Prototype> {
        self.prototypes.get(&key)
    }

    /// Whether a prototype is registered for `key`.
    pub fn contains(&self, key: EntityKey) -> bool {
        self.prototypes.contains_key(&key)
    }

    /// Number of registered prototypes.
    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Get the prototype for an object's data block, extracting it if
    /// absent or reported stale by the authoring scene.
    ///
    /// Extraction failures surface as per-object-recoverable
    /// [`SyncError::Extraction`].
    pub fn get_or_create<S: SceneDelegate + ?Sized>(
        &mut self,
        scene: &S,
        object: &ObjectInfo,
    ) -> Result<&Prototype, SyncError> {
        let key = object.data_key;
        let stale = scene.geometry_changed(key);
        if !stale && self.prototypes.contains_key(&key) {
            log::trace!("prototype cache hit for {key}");
            return Ok(&self.prototypes[&key]);
        }

        let geometry = scene
            .extract_geometry(object.key)
            .and_then(|geometry| geometry.validate().map(|_| geometry))
            .map_err(|source| SyncError::Extraction {
                object: object.key,
                source,
            })?;
        log::debug!(
            "extracted '{}' for {key}: {} faces, {} slots",
            geometry.name,
            geometry.face_count(),
            geometry.used_slots().len()
        );
        Ok(self.register(key, geometry))
    }

    /// Register already-extracted geometry under a data key, replacing
    /// any previous prototype for it.
    pub fn register(&mut self, key: EntityKey, geometry: Geometry) -> &Prototype {
        let prototype = Prototype {
            key,
            used_slots: geometry.used_slots(),
            geometry: Arc::new(geometry),
        };
        self.prototypes.insert(key, prototype);
        &self.prototypes[&key]
    }

    /// Drop a cached extraction so the next lookup re-extracts.
    ///
    /// Returns whether anything was dropped.
    pub fn invalidate(&mut self, key: EntityKey) -> bool {
        self.prototypes.remove(&key).is_some()
    }

    /// Remove a prototype; the caller guarantees zero remaining
    /// placements reference it.
    pub fn release(&mut self, key: EntityKey) -> Result<(), SyncError> {
        if self.prototypes.remove(&key).is_none() {
            return Err(ConsistencyViolation::UnknownPrototype(key).into());
        }
        log::debug!("released prototype {key}");
        Ok(())
    }
}
