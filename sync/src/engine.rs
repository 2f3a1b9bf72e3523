//! The synchronization engine.
//!
//! [`SyncEngine`] drives one frame's diff between the authoring scene
//! and the renderer scene:
//! 1. compute the visibility delta against the previous pass
//! 2. collect the submeshes of every changed material before any
//!    geometry work
//! 3. cascade-remove deleted objects and hide freshly invisible ones,
//!    duplicator-spawned placements first
//! 4. run the update-object pass (adds, transforms, geometry refreshes)
//! 5. expand duplicators flagged for refresh, diffing their placements
//! 6. apply the collected material propagation
//! 7. record the new visible set as the next baseline
//!
//! Per-object failures (failed extraction, unsupported kinds, dangling
//! references) are logged and skipped; the object is simply absent from
//! the rendered scene until fixed. Consistency violations abort the
//! pass and propagate - they mean the caches can no longer be trusted.
//!
//! All cache state is owned by the engine instance; two engines never
//! share anything, so independent sessions can run side by side.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use emberbridge_core::key::{EntityKey, SubmeshKey};
use emberbridge_core::scene::{
    ObjectInfo, ObjectKind, PlacementInfo, SceneDelegate, VisibilityMode,
};

use crate::environment::EnvironmentSync;
use crate::error::SyncError;
use crate::instances::{InstanceStore, ObjectInstance, Representation};
use crate::materials::MaterialCache;
use crate::prototypes::PrototypeRegistry;
use crate::renderer::{MaterialHandle, SceneRenderer, SubmeshRef};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Which visibility flag gates objects into the renderer scene.
    pub visibility: VisibilityMode,
}

/// Work collected while walking the object list, applied in later
/// steps of the same pass.
#[derive(Debug, Default)]
struct SyncFrame {
    /// Material → submeshes that should be bound to it.
    pending_binds: BTreeMap<EntityKey, BTreeSet<SubmeshKey>>,
    /// Submeshes whose slot lost its material.
    pending_unbinds: BTreeSet<SubmeshKey>,
    /// Duplicators whose placements need re-enumeration.
    duplicators_refresh: BTreeSet<EntityKey>,
    /// Prototype → one of its objects, for mesh data that changed and
    /// needs re-extraction. Keyed by prototype so several objects
    /// sharing the same data trigger one refresh.
    geometry_updates: BTreeMap<EntityKey, EntityKey>,
}

/// Synchronizes one authoring scene into one renderer scene.
pub struct SyncEngine<R: SceneRenderer> {
    renderer: R,
    config: SyncConfig,
    prototypes: PrototypeRegistry,
    materials: MaterialCache,
    instances: InstanceStore,
    environment: EnvironmentSync,
    visible: HashMap<EntityKey, ObjectKind>,
    scene_objects: HashSet<EntityKey>,
    lights: HashSet<EntityKey>,
}

impl<R: SceneRenderer> SyncEngine<R> {
    /// Create an engine around a renderer connection.
    pub fn new(renderer: R, config: SyncConfig) -> Self {
        Self {
            renderer,
            config,
            prototypes: PrototypeRegistry::new(),
            materials: MaterialCache::new(),
            instances: InstanceStore::new(),
            environment: EnvironmentSync::new(),
            visible: HashMap::new(),
            scene_objects: HashSet::new(),
            lights: HashSet::new(),
        }
    }

    /// The renderer connection.
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Mutable access to the renderer connection.
    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// The prototype registry.
    pub fn prototypes(&self) -> &PrototypeRegistry {
        &self.prototypes
    }

    /// The material cache.
    pub fn materials(&self) -> &MaterialCache {
        &self.materials
    }

    /// The object/instance store.
    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    /// Representation state of a placement, for inspection.
    pub fn representation(&self, key: EntityKey) -> Option<Representation> {
        self.instances.representation(key)
    }

    /// First-time full build of the renderer scene.
    ///
    /// Equivalent to [`sync`](Self::sync) on an empty engine; calling it
    /// with cached state is almost certainly a mistake and is logged.
    pub fn export<S: SceneDelegate>(&mut self, scene: &S) -> Result<(), SyncError> {
        if !self.instances.is_empty() || !self.scene_objects.is_empty() {
            log::warn!("export called on a non-empty engine; running as incremental sync");
        }
        log::info!("exporting scene");
        self.sync(scene)
    }

    /// One full diff-and-apply pass.
    pub fn sync<S: SceneDelegate>(&mut self, scene: &S) -> Result<(), SyncError> {
        log::debug!("sync pass starting");

        self.environment
            .sync(&scene.environment_settings(), &mut self.renderer);

        let objects = scene.objects();
        let live: HashSet<EntityKey> = objects.iter().map(|o| o.key).collect();
        let visible_now: HashMap<EntityKey, ObjectKind> = objects
            .iter()
            .filter(|o| o.visible(self.config.visibility))
            .map(|o| (o.key, o.kind))
            .collect();

        // Snapshot the deltas before mutating anything.
        let removed_from_scene: Vec<EntityKey> = self
            .scene_objects
            .iter()
            .filter(|k| !live.contains(*k))
            .copied()
            .collect();
        let became_invisible: Vec<(EntityKey, ObjectKind)> = self
            .visible
            .iter()
            .filter(|(k, _)| !visible_now.contains_key(*k) && live.contains(*k))
            .map(|(k, kind)| (*k, *kind))
            .collect();
        let became_visible: HashSet<EntityKey> = visible_now
            .keys()
            .filter(|k| !self.visible.contains_key(*k))
            .copied()
            .collect();
        log::debug!(
            "visibility delta: +{} -{} removed {}",
            became_visible.len(),
            became_invisible.len(),
            removed_from_scene.len()
        );

        // Step 2: collect every submesh using a changed material before
        // any geometry work, so propagation happens once per material.
        let changed_materials: BTreeSet<EntityKey> =
            scene.updated_materials().into_iter().collect();
        let mut material_targets: BTreeMap<EntityKey, BTreeSet<SubmeshKey>> = BTreeMap::new();
        for info in &objects {
            if info.kind != ObjectKind::Geometry {
                continue;
            }
            for (slot, material) in info.material_slots.iter().enumerate() {
                if let Some(material) = material {
                    if changed_materials.contains(material) {
                        material_targets
                            .entry(*material)
                            .or_default()
                            .insert(SubmeshKey::new(info.data_key, slot as u32));
                    }
                }
            }
        }

        // Step 3: removals and freshly invisible objects.
        for key in removed_from_scene {
            log::debug!("removing {key} from renderer scene");
            self.remove_object_internal(key)?;
        }
        for (key, kind) in became_invisible {
            self.remove_duplicator_instances(key)?;
            match kind {
                ObjectKind::Geometry => self.instances.hide(key, &mut self.renderer),
                ObjectKind::Light => {
                    if self.lights.contains(&key) {
                        self.renderer.hide_light(key);
                    }
                }
                _ => {}
            }
        }

        // Step 4: update pass over new/updated/re-shown objects.
        let mut frame = SyncFrame::default();
        for info in &objects {
            let key = info.key;
            if !visible_now.contains_key(&key) {
                continue;
            }
            let is_new = became_visible.contains(&key) || !self.scene_objects.contains(&key);
            if !is_new && !info.any_update() {
                continue;
            }
            if info.is_duplicator {
                frame.duplicators_refresh.insert(key);
            }
            if let Err(err) = self.sync_object(scene, info, &mut frame) {
                if err.is_fatal() {
                    return Err(err);
                }
                log::warn!("skipping object '{}' ({key}): {err}", info.name);
            }
        }

        // Re-show placements that came back into view.
        for key in &became_visible {
            match visible_now.get(key) {
                Some(ObjectKind::Geometry) => self.instances.show(*key, &mut self.renderer),
                Some(ObjectKind::Light) => {
                    if self.lights.contains(key) {
                        self.renderer.show_light(*key);
                    }
                }
                _ => {}
            }
        }

        // Step 4b: geometry refreshes, after the whole object walk so
        // every placement of the prototype is known.
        let geometry_updates = std::mem::take(&mut frame.geometry_updates);
        for (_, key) in geometry_updates {
            if let Err(err) = self.refresh_geometry(scene, key, &mut frame) {
                if err.is_fatal() {
                    return Err(err);
                }
                log::warn!("geometry refresh failed for {key}: {err}");
            }
        }

        // Step 5: duplicator expansion.
        let refresh = std::mem::take(&mut frame.duplicators_refresh);
        for duplicator in refresh {
            if let Err(err) = self.refresh_duplicator(scene, duplicator, &mut frame) {
                if err.is_fatal() {
                    return Err(err);
                }
                log::warn!("duplicator refresh failed for {duplicator}: {err}");
            }
        }

        // Step 6: material binding and propagation.
        let pending_unbinds = std::mem::take(&mut frame.pending_unbinds);
        for submesh in pending_unbinds {
            if self.materials.unassign(submesh).is_some() {
                self.unbind_submesh_everywhere(submesh);
            }
        }
        let pending_binds = std::mem::take(&mut frame.pending_binds);
        self.apply_pending_binds(scene, pending_binds, &changed_materials);
        for (material, targets) in &material_targets {
            self.apply_material_targets(scene, targets, Some(*material))?;
        }

        // Step 7: the new baseline.
        self.visible = visible_now;
        self.scene_objects = live;
        log::debug!(
            "sync pass complete: {} placements, {} prototypes, {} materials",
            self.instances.len(),
            self.prototypes.len(),
            self.materials.handle_count()
        );
        Ok(())
    }

    /// Targeted removal outside the full pass (e.g. from a UI
    /// callback). Cascades like a scene removal would.
    pub fn remove_object(&mut self, key: EntityKey) -> Result<(), SyncError> {
        self.remove_object_internal(key)
    }

    /// Targeted material update outside the full pass.
    ///
    /// Re-resolves the binding of every given submesh; `None` clears the
    /// bindings without creating a replacement.
    pub fn update_material<S: SceneDelegate>(
        &mut self,
        scene: &S,
        submeshes: &[SubmeshKey],
        material: Option<EntityKey>,
    ) -> Result<(), SyncError> {
        let targets: BTreeSet<SubmeshKey> = submeshes.iter().copied().collect();
        self.apply_material_targets(scene, &targets, material)
    }

    // ---- per-object update pass ----

    fn sync_object<S: SceneDelegate>(
        &mut self,
        scene: &S,
        info: &ObjectInfo,
        frame: &mut SyncFrame,
    ) -> Result<(), SyncError> {
        match info.kind {
            ObjectKind::Geometry => self.sync_geometry_object(scene, info, frame),
            ObjectKind::Light => self.sync_light_object(scene, info),
            ObjectKind::Empty => Ok(()),
            ObjectKind::Unsupported => Err(SyncError::UnsupportedKind {
                object: info.key,
                name: info.name.clone(),
            }),
        }
    }

    fn sync_geometry_object<S: SceneDelegate>(
        &mut self,
        scene: &S,
        info: &ObjectInfo,
        frame: &mut SyncFrame,
    ) -> Result<(), SyncError> {
        let key = info.key;

        // Any change to the object refreshes the duplicators currently
        // instancing its prototype.
        for duplicator in self.instances.duplicators_of_prototype(info.data_key) {
            frame.duplicators_refresh.insert(duplicator);
        }

        if !self.instances.contains(key) {
            self.add_placement(scene, info)?;
            self.collect_material_slots(info, frame);
        } else if info.updated_data {
            // Deferred: the refresh pass re-extracts once every
            // placement of the prototype is known.
            frame.geometry_updates.insert(info.data_key, key);
        } else {
            if info.updated || info.updated_transform {
                self.instances
                    .set_transform(key, info.transform, &mut self.renderer);
            }
            self.collect_material_slots(info, frame);
        }
        Ok(())
    }

    fn sync_light_object<S: SceneDelegate>(
        &mut self,
        scene: &S,
        info: &ObjectInfo,
    ) -> Result<(), SyncError> {
        let key = info.key;
        // Lights are cheap: re-create on any update.
        if self.lights.remove(&key) {
            self.renderer.remove_light(key);
        }
        if let Some(light) = scene.translate_light(key) {
            self.renderer.attach_light(key, &light);
            self.lights.insert(key);
        } else {
            log::debug!("light '{}' ({key}) not translatable, skipped", info.name);
        }
        Ok(())
    }

    fn add_placement<S: SceneDelegate>(
        &mut self,
        scene: &S,
        info: &ObjectInfo,
    ) -> Result<(), SyncError> {
        self.prototypes.get_or_create(scene, info)?;
        let volume = if info.has_volume {
            scene.volume(info.key)
        } else {
            None
        };
        let instance =
            ObjectInstance::new(info.key, info.data_key, info.transform).with_volume(volume);
        self.instances.insert(info.key, instance)?;
        self.instances.realize(
            info.key,
            &self.prototypes,
            &self.materials,
            &mut self.renderer,
        )
    }

    /// Queue bind/unbind work for every used slot of an object.
    fn collect_material_slots(&self, info: &ObjectInfo, frame: &mut SyncFrame) {
        let Some(prototype) = self.prototypes.get(info.data_key) else {
            return;
        };
        for &slot in prototype.used_slots() {
            let submesh = SubmeshKey::new(info.data_key, slot);
            match info.material_slots.get(slot as usize).copied().flatten() {
                Some(material) => {
                    frame
                        .pending_binds
                        .entry(material)
                        .or_default()
                        .insert(submesh);
                }
                None => {
                    frame.pending_unbinds.insert(submesh);
                }
            }
        }
    }

    // ---- geometry refresh ----

    /// Demote every placement of the object's prototype, re-extract,
    /// and re-realize, so stale geometry is never visible mid-update.
    fn refresh_geometry<S: SceneDelegate>(
        &mut self,
        scene: &S,
        key: EntityKey,
        frame: &mut SyncFrame,
    ) -> Result<(), SyncError> {
        let info = scene.object(key).ok_or(SyncError::MissingObject(key))?;
        let prototype_key = info.data_key;
        log::debug!("refreshing geometry of {prototype_key} (via '{}')", info.name);

        let order = self
            .instances
            .demote_all(prototype_key, &self.materials, &mut self.renderer)?;
        self.prototypes.invalidate(prototype_key);
        // The object's own placement may also have moved this frame.
        self.instances
            .set_transform(key, info.transform, &mut self.renderer);

        // A failed re-extraction leaves every placement unrealized: the
        // object drops out of the render until its mesh is fixed.
        self.prototypes.get_or_create(scene, &info)?;
        for placement in order {
            self.instances.realize(
                placement,
                &self.prototypes,
                &self.materials,
                &mut self.renderer,
            )?;
        }
        self.collect_material_slots(&info, frame);
        Ok(())
    }

    // ---- duplicators ----

    fn refresh_duplicator<S: SceneDelegate>(
        &mut self,
        scene: &S,
        duplicator: EntityKey,
        frame: &mut SyncFrame,
    ) -> Result<(), SyncError> {
        let placements = scene.placements(duplicator);
        let recorded: BTreeSet<EntityKey> = self
            .instances
            .duplicator_instances(duplicator)
            .into_iter()
            .collect();
        let mut current = BTreeSet::new();
        log::debug!(
            "refreshing duplicator {duplicator}: {} placements, {} recorded",
            placements.len(),
            recorded.len()
        );

        for placement in &placements {
            let key = EntityKey::instance(duplicator, placement.persistent_id);
            current.insert(key);
            if self.instances.contains(key) {
                self.instances
                    .set_transform(key, placement.transform, &mut self.renderer);
            } else if let Err(err) =
                self.add_dupli_placement(scene, duplicator, key, placement, frame)
            {
                if err.is_fatal() {
                    return Err(err);
                }
                log::warn!("skipping placement {key}: {err}");
            }
        }

        for stale in recorded.difference(&current) {
            log::debug!("removing stale placement {stale}");
            self.instances.remove(
                *stale,
                &mut self.prototypes,
                &self.materials,
                &mut self.renderer,
            )?;
        }
        Ok(())
    }

    fn add_dupli_placement<S: SceneDelegate>(
        &mut self,
        scene: &S,
        duplicator: EntityKey,
        key: EntityKey,
        placement: &PlacementInfo,
        frame: &mut SyncFrame,
    ) -> Result<(), SyncError> {
        let info = scene
            .object(placement.object)
            .ok_or(SyncError::MissingObject(placement.object))?;
        if info.kind != ObjectKind::Geometry {
            return Ok(());
        }
        self.prototypes.get_or_create(scene, &info)?;
        let volume = if info.has_volume {
            scene.volume(placement.object)
        } else {
            None
        };
        let instance = ObjectInstance::new(placement.object, info.data_key, placement.transform)
            .with_volume(volume)
            .with_duplicator(duplicator);
        self.instances.insert(key, instance)?;
        self.instances.realize(
            key,
            &self.prototypes,
            &self.materials,
            &mut self.renderer,
        )?;
        self.collect_material_slots(&info, frame);
        Ok(())
    }

    fn remove_duplicator_instances(&mut self, duplicator: EntityKey) -> Result<(), SyncError> {
        // Snapshot: removal mutates the per-duplicator set.
        let spawned = self.instances.duplicator_instances(duplicator);
        if spawned.is_empty() {
            return Ok(());
        }
        log::debug!(
            "removing {} placements spawned by {duplicator}",
            spawned.len()
        );
        for key in spawned {
            self.instances.remove(
                key,
                &mut self.prototypes,
                &self.materials,
                &mut self.renderer,
            )?;
        }
        Ok(())
    }

    // ---- removal ----

    fn remove_object_internal(&mut self, key: EntityKey) -> Result<(), SyncError> {
        if self.lights.remove(&key) {
            self.renderer.remove_light(key);
        }
        // Spawned placements come down before the duplicator itself.
        self.remove_duplicator_instances(key)?;
        self.instances.remove(
            key,
            &mut self.prototypes,
            &self.materials,
            &mut self.renderer,
        )?;
        self.visible.remove(&key);
        self.scene_objects.remove(&key);
        Ok(())
    }

    // ---- materials ----

    fn apply_pending_binds<S: SceneDelegate>(
        &mut self,
        scene: &S,
        binds: BTreeMap<EntityKey, BTreeSet<SubmeshKey>>,
        changed_materials: &BTreeSet<EntityKey>,
    ) {
        for (material, submeshes) in binds {
            if changed_materials.contains(&material) {
                // The propagation step rebinds this material wholesale;
                // only record the usage here.
                for submesh in submeshes {
                    self.materials.assign(material, submesh);
                }
                continue;
            }
            let Some(description) = scene.translate_material(material) else {
                log::debug!("material {material} not translatable; submeshes stay unbound");
                continue;
            };
            let handle = self.materials.ensure(material, &description, &mut self.renderer);
            for submesh in submeshes {
                if self.materials.binding(submesh) == Some(material) {
                    continue;
                }
                self.materials.assign(material, submesh);
                self.bind_submesh_everywhere(submesh, handle);
            }
        }
    }

    /// Re-resolve the binding of `targets` (plus every current user of
    /// `material`) across the owner and all lightweight instances.
    fn apply_material_targets<S: SceneDelegate>(
        &mut self,
        scene: &S,
        targets: &BTreeSet<SubmeshKey>,
        material: Option<EntityKey>,
    ) -> Result<(), SyncError> {
        let mut affected = targets.clone();
        if let Some(material) = material {
            affected.extend(self.materials.users(material));
        }

        for &submesh in &affected {
            if self.materials.unassign(submesh).is_some() {
                self.unbind_submesh_everywhere(submesh);
            }
        }

        let Some(material) = material else {
            return Ok(());
        };
        let Some(description) = scene.translate_material(material) else {
            // The graph no longer translates; drop the renderer-side
            // material and leave the submeshes unbound.
            self.materials.remove(material, &mut self.renderer);
            return Ok(());
        };
        let handle = self.materials.rebind(material, &description, &mut self.renderer);
        for &submesh in &affected {
            if self.instances.owner_of(submesh.prototype).is_some() {
                self.materials.assign(material, submesh);
                self.bind_submesh_everywhere(submesh, handle);
            }
        }
        Ok(())
    }

    /// Bind a handle to the owner submesh and every lightweight
    /// instance sharing it. O(affected placements of one prototype).
    fn bind_submesh_everywhere(&mut self, submesh: SubmeshKey, handle: MaterialHandle) {
        let Some(owner) = self.instances.owner_of(submesh.prototype) else {
            return;
        };
        let realized = self
            .instances
            .get(owner)
            .is_some_and(|i| i.materials_assigned().contains(&submesh.slot));
        if !realized {
            return;
        }
        self.renderer
            .bind_submesh_material(SubmeshRef::new(owner, submesh.slot), handle);
        for secondary in self.instances.secondaries_of(submesh.prototype) {
            self.renderer
                .bind_instance_material(SubmeshRef::new(secondary, submesh.slot), handle);
        }
    }

    /// Remove the renderer binding from the owner submesh and every
    /// lightweight instance sharing it.
    fn unbind_submesh_everywhere(&mut self, submesh: SubmeshKey) {
        let Some(owner) = self.instances.owner_of(submesh.prototype) else {
            return;
        };
        let realized = self
            .instances
            .get(owner)
            .is_some_and(|i| i.materials_assigned().contains(&submesh.slot));
        if !realized {
            return;
        }
        self.renderer
            .unbind_submesh_material(SubmeshRef::new(owner, submesh.slot));
        for secondary in self.instances.secondaries_of(submesh.prototype) {
            self.renderer
                .unbind_instance_material(SubmeshRef::new(secondary, submesh.slot));
        }
    }
}
