//! Object/instance store and the promotion protocol.
//!
//! Every live placement of a prototype is an [`ObjectInstance`]. A
//! placement holds exactly one of two mutually exclusive renderer-side
//! representations at a time:
//! - [`Representation::PrototypeOwner`] - its submeshes *are* the
//!   renderer-visible geometry for the prototype
//! - [`Representation::InstanceOf`] - it references the owner's
//!   submeshes through lightweight instances, contributing only a
//!   transform
//!
//! plus the transitional [`Representation::Unrealized`] (registered, no
//! renderer geometry yet). The store performs the transitions and keeps
//! the duplicator bookkeeping; the engine decides when transitions
//! happen.
//!
//! Removing an owner while other placements remain demotes every
//! surviving placement to `Unrealized` and re-realizes them, so the
//! first survivor becomes the new owner and the remaining lightweight
//! instances are re-targeted at its submeshes. A prototype is released
//! only when its last placement goes away.

use std::collections::{BTreeSet, HashMap};

use emberbridge_core::key::{EntityKey, SubmeshKey};
use emberbridge_core::math::Mat4;
use emberbridge_core::scene::VolumeData;

use crate::error::{ConsistencyViolation, SyncError};
use crate::materials::MaterialCache;
use crate::prototypes::PrototypeRegistry;
use crate::renderer::{SceneRenderer, SubmeshRef};

/// Renderer-side representation state of one placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Registered, no renderer geometry.
    Unrealized,
    /// This placement's submeshes are the renderer geometry for its
    /// prototype.
    PrototypeOwner,
    /// This placement references another placement's submeshes.
    InstanceOf {
        /// The owning placement.
        owner: EntityKey,
    },
}

/// One placement of a prototype in the scene.
#[derive(Debug, Clone)]
pub struct ObjectInstance {
    object: EntityKey,
    prototype: EntityKey,
    transform: Mat4,
    volume: Option<VolumeData>,
    duplicator: Option<EntityKey>,
    representation: Representation,
    materials_assigned: BTreeSet<u32>,
    hidden: bool,
}

impl ObjectInstance {
    /// Create an unrealized placement.
    pub fn new(object: EntityKey, prototype: EntityKey, transform: Mat4) -> Self {
        Self {
            object,
            prototype,
            transform,
            volume: None,
            duplicator: None,
            representation: Representation::Unrealized,
            materials_assigned: BTreeSet::new(),
            hidden: false,
        }
    }

    /// Attach a volumetric payload.
    pub fn with_volume(mut self, volume: Option<VolumeData>) -> Self {
        self.volume = volume;
        self
    }

    /// Mark the placement as spawned by a duplicator.
    pub fn with_duplicator(mut self, duplicator: EntityKey) -> Self {
        self.duplicator = Some(duplicator);
        self
    }

    /// The authoring object this placement renders.
    pub fn object(&self) -> EntityKey {
        self.object
    }

    /// The prototype this placement references.
    pub fn prototype(&self) -> EntityKey {
        self.prototype
    }

    /// Current representation state.
    pub fn representation(&self) -> Representation {
        self.representation
    }

    /// Material-slot indices realized on the renderer side.
    pub fn materials_assigned(&self) -> &BTreeSet<u32> {
        &self.materials_assigned
    }

    /// The duplicator that spawned this placement, if any.
    pub fn duplicator(&self) -> Option<EntityKey> {
        self.duplicator
    }

    /// Whether the placement is currently hidden.
    pub fn hidden(&self) -> bool {
        self.hidden
    }

    /// Current world transform.
    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }
}

/// Store of every live placement plus prototype/duplicator bookkeeping.
#[derive(Debug, Default)]
pub struct InstanceStore {
    placements: HashMap<EntityKey, ObjectInstance>,
    owner_for_prototype: HashMap<EntityKey, EntityKey>,
    secondaries_for_prototype: HashMap<EntityKey, BTreeSet<EntityKey>>,
    placements_for_prototype: HashMap<EntityKey, BTreeSet<EntityKey>>,
    instances_for_duplicator: HashMap<EntityKey, BTreeSet<EntityKey>>,
    duplicator_for_instance: HashMap<EntityKey, EntityKey>,
    duplicators_for_prototype: HashMap<EntityKey, BTreeSet<EntityKey>>,
}

impl InstanceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a placement; it starts unrealized.
    pub fn insert(&mut self, key: EntityKey, instance: ObjectInstance) -> Result<(), SyncError> {
        if self.placements.contains_key(&key) {
            return Err(ConsistencyViolation::PlacementExists(key).into());
        }
        let prototype = instance.prototype;
        self.placements_for_prototype
            .entry(prototype)
            .or_default()
            .insert(key);
        if let Some(duplicator) = instance.duplicator {
            self.instances_for_duplicator
                .entry(duplicator)
                .or_default()
                .insert(key);
            self.duplicator_for_instance.insert(key, duplicator);
            self.duplicators_for_prototype
                .entry(prototype)
                .or_default()
                .insert(duplicator);
        }
        self.placements.insert(key, instance);
        Ok(())
    }

    /// Look up a placement.
    pub fn get(&self, key: EntityKey) -> Option<&ObjectInstance> {
        self.placements.get(&key)
    }

    /// Whether a placement is registered.
    pub fn contains(&self, key: EntityKey) -> bool {
        self.placements.contains_key(&key)
    }

    /// Number of registered placements.
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Representation state of a placement.
    pub fn representation(&self, key: EntityKey) -> Option<Representation> {
        self.placements.get(&key).map(|i| i.representation)
    }

    /// The placement currently owning a prototype's geometry.
    pub fn owner_of(&self, prototype: EntityKey) -> Option<EntityKey> {
        self.owner_for_prototype.get(&prototype).copied()
    }

    /// Placements referencing a prototype through lightweight
    /// instances, in key order.
    pub fn secondaries_of(&self, prototype: EntityKey) -> Vec<EntityKey> {
        self.secondaries_for_prototype
            .get(&prototype)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every placement of a prototype, in key order.
    pub fn placements_of(&self, prototype: EntityKey) -> Vec<EntityKey> {
        self.placements_for_prototype
            .get(&prototype)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Placements spawned by a duplicator, in key order.
    pub fn duplicator_instances(&self, duplicator: EntityKey) -> Vec<EntityKey> {
        self.instances_for_duplicator
            .get(&duplicator)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Duplicators currently referencing a prototype.
    pub fn duplicators_of_prototype(&self, prototype: EntityKey) -> Vec<EntityKey> {
        self.duplicators_for_prototype
            .get(&prototype)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Give a placement its renderer-side representation.
    ///
    /// Becomes the prototype owner when no owner exists, otherwise a
    /// lightweight instance of the current owner.
    pub fn realize<R: SceneRenderer + ?Sized>(
        &mut self,
        key: EntityKey,
        registry: &PrototypeRegistry,
        materials: &MaterialCache,
        renderer: &mut R,
    ) -> Result<(), SyncError> {
        let instance = self
            .placements
            .get(&key)
            .ok_or(ConsistencyViolation::UnknownPlacement(key))?;
        if instance.representation != Representation::Unrealized {
            return Err(ConsistencyViolation::AlreadyRealized(key).into());
        }
        match self.owner_for_prototype.get(&instance.prototype).copied() {
            None => self.realize_as_owner(key, registry, materials, renderer),
            Some(owner) => self.realize_as_instance(key, owner, materials, renderer),
        }
    }

    fn realize_as_owner<R: SceneRenderer + ?Sized>(
        &mut self,
        key: EntityKey,
        registry: &PrototypeRegistry,
        materials: &MaterialCache,
        renderer: &mut R,
    ) -> Result<(), SyncError> {
        let instance = &self.placements[&key];
        let prototype_key = instance.prototype;
        let transform = instance.transform;
        let hidden = instance.hidden;
        let prototype = registry
            .get(prototype_key)
            .ok_or(ConsistencyViolation::UnknownPrototype(prototype_key))?;
        let used: Vec<u32> = prototype.used_slots().iter().copied().collect();

        log::debug!("realizing {key} as owner of {prototype_key} ({} slots)", used.len());
        for &slot in &used {
            renderer.create_submesh(
                SubmeshRef::new(key, slot),
                &prototype.submesh(slot),
                &transform,
            );
        }
        if let Some(volume) = &instance.volume {
            if let Some(&slot) = used.first() {
                renderer.attach_volume(SubmeshRef::new(key, slot), volume);
            }
        }
        for &slot in &used {
            if let Some(material) = materials.binding(SubmeshKey::new(prototype_key, slot)) {
                if let Some(handle) = materials.handle(material) {
                    renderer.bind_submesh_material(SubmeshRef::new(key, slot), handle);
                }
            }
        }
        if hidden {
            for &slot in &used {
                renderer.hide_submesh(SubmeshRef::new(key, slot));
            }
        }

        let instance = self.placements.get_mut(&key).expect("looked up above");
        instance.materials_assigned = used.into_iter().collect();
        instance.representation = Representation::PrototypeOwner;
        self.owner_for_prototype.insert(prototype_key, key);
        Ok(())
    }

    fn realize_as_instance<R: SceneRenderer + ?Sized>(
        &mut self,
        key: EntityKey,
        owner: EntityKey,
        materials: &MaterialCache,
        renderer: &mut R,
    ) -> Result<(), SyncError> {
        let owner_instance = self
            .placements
            .get(&owner)
            .ok_or(ConsistencyViolation::UnknownPlacement(owner))?;
        let prototype_key = owner_instance.prototype;
        let slots: Vec<u32> = owner_instance.materials_assigned.iter().copied().collect();

        let instance = &self.placements[&key];
        let transform = instance.transform;
        let hidden = instance.hidden;

        log::debug!("realizing {key} as instance of {owner} ({} slots)", slots.len());
        for &slot in &slots {
            renderer.create_instance(
                SubmeshRef::new(key, slot),
                SubmeshRef::new(owner, slot),
                &transform,
            );
            if let Some(material) = materials.binding(SubmeshKey::new(prototype_key, slot)) {
                if let Some(handle) = materials.handle(material) {
                    renderer.bind_instance_material(SubmeshRef::new(key, slot), handle);
                }
            }
        }
        if hidden {
            for &slot in &slots {
                renderer.hide_instance(SubmeshRef::new(key, slot));
            }
        }

        let instance = self.placements.get_mut(&key).expect("looked up above");
        instance.materials_assigned = slots.into_iter().collect();
        instance.representation = Representation::InstanceOf { owner };
        self.secondaries_for_prototype
            .entry(prototype_key)
            .or_default()
            .insert(key);
        Ok(())
    }

    /// Take a placement's renderer-side representation away, leaving it
    /// registered but unrealized. No-op when already unrealized.
    ///
    /// An owner must only be unrealized after every lightweight
    /// instance referencing it is gone; [`demote_all`](Self::demote_all)
    /// takes care of the ordering.
    pub fn unrealize<R: SceneRenderer + ?Sized>(
        &mut self,
        key: EntityKey,
        materials: &MaterialCache,
        renderer: &mut R,
    ) -> Result<(), SyncError> {
        let instance = self
            .placements
            .get(&key)
            .ok_or(ConsistencyViolation::UnknownPlacement(key))?;
        let prototype_key = instance.prototype;
        let slots: Vec<u32> = instance.materials_assigned.iter().copied().collect();
        let has_volume = instance.volume.is_some();

        match instance.representation {
            Representation::Unrealized => return Ok(()),
            Representation::PrototypeOwner => {
                log::debug!("unrealizing owner {key} of {prototype_key}");
                if has_volume {
                    if let Some(&slot) = slots.first() {
                        renderer.detach_volume(SubmeshRef::new(key, slot));
                    }
                }
                for &slot in &slots {
                    let submesh = SubmeshRef::new(key, slot);
                    if materials
                        .binding(SubmeshKey::new(prototype_key, slot))
                        .is_some()
                    {
                        renderer.unbind_submesh_material(submesh);
                    }
                    renderer.remove_submesh(submesh);
                }
                self.owner_for_prototype.remove(&prototype_key);
            }
            Representation::InstanceOf { .. } => {
                log::debug!("unrealizing instance {key} of {prototype_key}");
                for &slot in &slots {
                    let instance_ref = SubmeshRef::new(key, slot);
                    if materials
                        .binding(SubmeshKey::new(prototype_key, slot))
                        .is_some()
                    {
                        renderer.unbind_instance_material(instance_ref);
                    }
                    renderer.remove_instance(instance_ref);
                }
                if let Some(set) = self.secondaries_for_prototype.get_mut(&prototype_key) {
                    set.remove(&key);
                    if set.is_empty() {
                        self.secondaries_for_prototype.remove(&prototype_key);
                    }
                }
            }
        }

        let instance = self.placements.get_mut(&key).expect("looked up above");
        instance.materials_assigned.clear();
        instance.representation = Representation::Unrealized;
        Ok(())
    }

    /// Demote every placement of a prototype to unrealized, lightweight
    /// instances first so the owner is never removed underneath them.
    ///
    /// Returns the placements in re-realization order: previous owner
    /// first, so re-realizing the list restores the previous owner.
    pub fn demote_all<R: SceneRenderer + ?Sized>(
        &mut self,
        prototype: EntityKey,
        materials: &MaterialCache,
        renderer: &mut R,
    ) -> Result<Vec<EntityKey>, SyncError> {
        let owner = self.owner_of(prototype);
        let secondaries = self.secondaries_of(prototype);

        for &key in &secondaries {
            self.unrealize(key, materials, renderer)?;
        }
        if let Some(owner) = owner {
            self.unrealize(owner, materials, renderer)?;
        }

        let mut order = Vec::new();
        order.extend(owner);
        order.extend(secondaries);
        for key in self.placements_of(prototype) {
            if !order.contains(&key) {
                order.push(key);
            }
        }
        Ok(order)
    }

    /// Update a placement's transform, pushing it to every realized
    /// submesh or instance. Unknown placements are ignored (the object
    /// may have been skipped earlier, e.g. failed extraction).
    pub fn set_transform<R: SceneRenderer + ?Sized>(
        &mut self,
        key: EntityKey,
        transform: Mat4,
        renderer: &mut R,
    ) {
        let Some(instance) = self.placements.get_mut(&key) else {
            log::trace!("transform update for unknown placement {key}, ignored");
            return;
        };
        instance.transform = transform;
        match instance.representation {
            Representation::Unrealized => {}
            Representation::PrototypeOwner => {
                for &slot in &instance.materials_assigned {
                    renderer.set_submesh_transform(SubmeshRef::new(key, slot), &transform);
                }
            }
            Representation::InstanceOf { .. } => {
                for &slot in &instance.materials_assigned {
                    renderer.set_instance_transform(SubmeshRef::new(key, slot), &transform);
                }
            }
        }
    }

    /// Hide a placement's renderer representation. No-op when unknown
    /// or already hidden.
    pub fn hide<R: SceneRenderer + ?Sized>(&mut self, key: EntityKey, renderer: &mut R) {
        let Some(instance) = self.placements.get_mut(&key) else {
            return;
        };
        if instance.hidden {
            return;
        }
        instance.hidden = true;
        match instance.representation {
            Representation::Unrealized => {}
            Representation::PrototypeOwner => {
                for &slot in &instance.materials_assigned {
                    renderer.hide_submesh(SubmeshRef::new(key, slot));
                }
            }
            Representation::InstanceOf { .. } => {
                for &slot in &instance.materials_assigned {
                    renderer.hide_instance(SubmeshRef::new(key, slot));
                }
            }
        }
    }

    /// Show a previously hidden placement. No-op when unknown or not
    /// hidden.
    pub fn show<R: SceneRenderer + ?Sized>(&mut self, key: EntityKey, renderer: &mut R) {
        let Some(instance) = self.placements.get_mut(&key) else {
            return;
        };
        if !instance.hidden {
            return;
        }
        instance.hidden = false;
        match instance.representation {
            Representation::Unrealized => {}
            Representation::PrototypeOwner => {
                for &slot in &instance.materials_assigned {
                    renderer.show_submesh(SubmeshRef::new(key, slot));
                }
            }
            Representation::InstanceOf { .. } => {
                for &slot in &instance.materials_assigned {
                    renderer.show_instance(SubmeshRef::new(key, slot));
                }
            }
        }
    }

    /// Remove a placement entirely, promoting a survivor when the owner
    /// goes away and releasing the prototype when the last placement is
    /// gone.
    ///
    /// Idempotent: removing an unknown key is a no-op. Returns whether
    /// the prototype was released.
    pub fn remove<R: SceneRenderer + ?Sized>(
        &mut self,
        key: EntityKey,
        registry: &mut PrototypeRegistry,
        materials: &MaterialCache,
        renderer: &mut R,
    ) -> Result<bool, SyncError> {
        let Some(instance) = self.placements.get(&key) else {
            return Ok(false);
        };
        let prototype = instance.prototype;
        let was_owner = instance.representation == Representation::PrototypeOwner;

        if was_owner {
            // Everything referencing our submeshes has to come down
            // before the submeshes themselves.
            let order = self.demote_all(prototype, materials, renderer)?;
            self.forget(key, prototype);
            for survivor in order.into_iter().filter(|k| *k != key) {
                self.realize(survivor, registry, materials, renderer)?;
            }
        } else {
            self.unrealize(key, materials, renderer)?;
            self.forget(key, prototype);
        }

        let orphaned = self
            .placements_for_prototype
            .get(&prototype)
            .is_none_or(|set| set.is_empty());
        if orphaned {
            self.placements_for_prototype.remove(&prototype);
            self.duplicators_for_prototype.remove(&prototype);
            if registry.contains(prototype) {
                registry.release(prototype)?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop a placement from every index without touching the renderer.
    fn forget(&mut self, key: EntityKey, prototype: EntityKey) {
        self.placements.remove(&key);
        if let Some(set) = self.placements_for_prototype.get_mut(&prototype) {
            set.remove(&key);
        }
        if let Some(duplicator) = self.duplicator_for_instance.remove(&key) {
            if let Some(set) = self.instances_for_duplicator.get_mut(&duplicator) {
                set.remove(&key);
                if set.is_empty() {
                    self.instances_for_duplicator.remove(&duplicator);
                }
            }
            // Keep duplicators_for_prototype tight: drop the duplicator
            // once none of the prototype's placements belong to it.
            let still_referenced = self
                .placements_for_prototype
                .get(&prototype)
                .is_some_and(|set| {
                    set.iter()
                        .any(|k| self.duplicator_for_instance.get(k) == Some(&duplicator))
                });
            if !still_referenced {
                if let Some(set) = self.duplicators_for_prototype.get_mut(&prototype) {
                    set.remove(&duplicator);
                    if set.is_empty() {
                        self.duplicators_for_prototype.remove(&prototype);
                    }
                }
            }
        }
    }
}
