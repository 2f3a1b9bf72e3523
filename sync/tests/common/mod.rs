//! Shared test scaffolding: an in-memory authoring scene the tests
//! mutate between passes, plus geometry builders.
#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

use emberbridge_core::geometry::{ExtractionError, Geometry};
use emberbridge_core::key::{EntityKey, KeyAllocator};
use emberbridge_core::math::Mat4;
use emberbridge_core::scene::{
    LightDescription, LightKind, MaterialDescription, ObjectInfo, ObjectKind, PlacementInfo,
    SceneDelegate, VolumeData,
};
use emberbridge_core::settings::SettingsTree;

/// Mutable in-memory authoring scene.
#[derive(Default)]
pub struct TestScene {
    allocator: KeyAllocator,
    objects: BTreeMap<EntityKey, ObjectInfo>,
    geometries: BTreeMap<EntityKey, Geometry>,
    changed_geometry: BTreeSet<EntityKey>,
    updated_materials: BTreeSet<EntityKey>,
    materials: BTreeMap<EntityKey, MaterialDescription>,
    lights: BTreeMap<EntityKey, LightDescription>,
    volumes: BTreeMap<EntityKey, VolumeData>,
    placements: BTreeMap<EntityKey, Vec<PlacementInfo>>,
    environment: SettingsTree,
    extractions: Cell<usize>,
}

impl TestScene {
    pub fn new() -> Self {
        Self::default()
    }

    fn base_info(&mut self, name: &str, kind: ObjectKind) -> ObjectInfo {
        let key = EntityKey::object(self.allocator.allocate());
        let data_key = EntityKey::mesh(self.allocator.allocate());
        ObjectInfo {
            key,
            data_key,
            kind,
            name: name.into(),
            transform: Mat4::identity(),
            hidden_render: false,
            hidden_viewport: false,
            updated: false,
            updated_data: false,
            updated_transform: false,
            material_slots: Vec::new(),
            is_duplicator: false,
            has_volume: false,
        }
    }

    /// Add a mesh object with its own data block. Returns (object key,
    /// data key).
    pub fn add_mesh_object(&mut self, name: &str, geometry: Geometry) -> (EntityKey, EntityKey) {
        let info = self.base_info(name, ObjectKind::Geometry);
        let (key, data_key) = (info.key, info.data_key);
        self.geometries.insert(data_key, geometry);
        self.objects.insert(key, info);
        (key, data_key)
    }

    /// Add another object sharing an existing data block.
    pub fn add_shared_object(&mut self, name: &str, data_key: EntityKey) -> EntityKey {
        let mut info = self.base_info(name, ObjectKind::Geometry);
        info.data_key = data_key;
        let key = info.key;
        self.objects.insert(key, info);
        key
    }

    /// Add a light object.
    pub fn add_light(&mut self, name: &str, description: LightDescription) -> EntityKey {
        let info = self.base_info(name, ObjectKind::Light);
        let key = info.key;
        self.lights.insert(key, description);
        self.objects.insert(key, info);
        key
    }

    /// Add a duplicator (an empty that spawns placements).
    pub fn add_duplicator(&mut self, name: &str) -> EntityKey {
        let mut info = self.base_info(name, ObjectKind::Empty);
        info.is_duplicator = true;
        let key = info.key;
        self.objects.insert(key, info);
        key
    }

    /// Add an object of an unsupported kind.
    pub fn add_unsupported(&mut self, name: &str) -> EntityKey {
        let info = self.base_info(name, ObjectKind::Unsupported);
        let key = info.key;
        self.objects.insert(key, info);
        key
    }

    /// Register a material; returns its key.
    pub fn add_material(&mut self, name: &str, color: [f32; 4]) -> EntityKey {
        let key = EntityKey::material(self.allocator.allocate());
        self.materials
            .insert(key, MaterialDescription::colored(name, color));
        key
    }

    /// Assign a material to an object slot, growing the slot list.
    pub fn assign_material(&mut self, object: EntityKey, slot: u32, material: Option<EntityKey>) {
        let info = self.objects.get_mut(&object).expect("unknown object");
        if info.material_slots.len() <= slot as usize {
            info.material_slots.resize(slot as usize + 1, None);
        }
        info.material_slots[slot as usize] = material;
    }

    /// Replace a material's description and flag it changed.
    pub fn edit_material(&mut self, material: EntityKey, color: [f32; 4]) {
        let name = self.materials[&material].name.clone();
        self.materials
            .insert(material, MaterialDescription::colored(name, color));
        self.updated_materials.insert(material);
    }

    /// Attach a volumetric payload to an object.
    pub fn set_volume(&mut self, object: EntityKey, volume: VolumeData) {
        self.objects.get_mut(&object).expect("unknown object").has_volume = true;
        self.volumes.insert(object, volume);
    }

    /// Replace a data block's geometry and flag it dirty.
    pub fn set_geometry(&mut self, data_key: EntityKey, geometry: Geometry) {
        self.geometries.insert(data_key, geometry);
        self.changed_geometry.insert(data_key);
    }

    /// Set the placements a duplicator currently spawns.
    pub fn set_placements(&mut self, duplicator: EntityKey, spawns: Vec<(u64, EntityKey, Mat4)>) {
        self.placements.insert(
            duplicator,
            spawns
                .into_iter()
                .map(|(persistent_id, object, transform)| PlacementInfo {
                    persistent_id,
                    object,
                    transform,
                })
                .collect(),
        );
    }

    pub fn set_hidden_render(&mut self, object: EntityKey, hidden: bool) {
        self.objects.get_mut(&object).expect("unknown object").hidden_render = hidden;
    }

    pub fn set_environment(&mut self, environment: SettingsTree) {
        self.environment = environment;
    }

    /// Delete an object from the scene.
    pub fn remove_object(&mut self, object: EntityKey) {
        self.objects.remove(&object);
        self.lights.remove(&object);
        self.placements.remove(&object);
    }

    pub fn mark_updated(&mut self, object: EntityKey) {
        self.objects.get_mut(&object).expect("unknown object").updated = true;
    }

    pub fn mark_updated_data(&mut self, object: EntityKey) {
        let info = self.objects.get_mut(&object).expect("unknown object");
        info.updated_data = true;
        self.changed_geometry.insert(info.data_key);
    }

    /// Move an object and flag the transform update.
    pub fn move_object(&mut self, object: EntityKey, transform: Mat4) {
        let info = self.objects.get_mut(&object).expect("unknown object");
        info.transform = transform;
        info.updated_transform = true;
    }

    /// Clear per-frame flags, as the authoring application does after
    /// every depsgraph evaluation.
    pub fn end_frame(&mut self) {
        for info in self.objects.values_mut() {
            info.updated = false;
            info.updated_data = false;
            info.updated_transform = false;
        }
        self.changed_geometry.clear();
        self.updated_materials.clear();
    }

    /// How many times geometry extraction ran.
    pub fn extraction_count(&self) -> usize {
        self.extractions.get()
    }
}

impl SceneDelegate for TestScene {
    fn objects(&self) -> Vec<ObjectInfo> {
        self.objects.values().cloned().collect()
    }

    fn object(&self, key: EntityKey) -> Option<ObjectInfo> {
        self.objects.get(&key).cloned()
    }

    fn updated_materials(&self) -> Vec<EntityKey> {
        self.updated_materials.iter().copied().collect()
    }

    fn placements(&self, duplicator: EntityKey) -> Vec<PlacementInfo> {
        self.placements.get(&duplicator).cloned().unwrap_or_default()
    }

    fn extract_geometry(&self, object: EntityKey) -> Result<Geometry, ExtractionError> {
        self.extractions.set(self.extractions.get() + 1);
        let info = self
            .objects
            .get(&object)
            .ok_or_else(|| ExtractionError::MissingAttribute("object".into()))?;
        self.geometries
            .get(&info.data_key)
            .cloned()
            .ok_or_else(|| ExtractionError::MissingAttribute("mesh data".into()))
    }

    fn geometry_changed(&self, data_key: EntityKey) -> bool {
        self.changed_geometry.contains(&data_key)
    }

    fn translate_material(&self, material: EntityKey) -> Option<MaterialDescription> {
        self.materials.get(&material).cloned()
    }

    fn translate_light(&self, object: EntityKey) -> Option<LightDescription> {
        self.lights.get(&object).cloned()
    }

    fn volume(&self, object: EntityKey) -> Option<VolumeData> {
        self.volumes.get(&object).cloned()
    }

    fn environment_settings(&self) -> SettingsTree {
        self.environment.clone()
    }
}

/// Geometry with one triangle per entry of `slots`, all sharing three
/// positions.
pub fn tri_geometry(name: &str, slots: &[u32]) -> Geometry {
    let faces = slots.len();
    Geometry {
        name: name.into(),
        positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        normals: vec![[0.0, 0.0, 1.0]; faces * 3],
        uvs: vec![[0.0, 0.0]; faces * 3],
        corner_positions: (0..faces).flat_map(|_| [0u32, 1, 2]).collect(),
        face_sizes: vec![3; faces],
        face_slots: slots.to_vec(),
    }
}

/// A small smoke-like volume payload.
pub fn small_volume() -> VolumeData {
    VolumeData {
        dimensions: [2, 2, 2],
        voxels: vec![[0.8, 0.8, 0.8, 1.0]; 8],
    }
}

/// A point light description.
pub fn point_light(name: &str) -> LightDescription {
    LightDescription {
        name: name.into(),
        kind: LightKind::Point,
        color: [1.0, 1.0, 1.0],
        intensity: 100.0,
    }
}
