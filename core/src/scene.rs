//! Authoring-scene delegate interface.
//!
//! The synchronization engine never touches authoring data structures
//! directly; everything it consumes comes through [`SceneDelegate`],
//! implemented by the embedding application:
//! - object enumeration with per-frame update flags ([`ObjectInfo`])
//! - duplicator placement enumeration ([`PlacementInfo`])
//! - mesh extraction, material/light translation, volume payloads
//! - the environment settings snapshot
//!
//! Extraction and translation are collaborator responsibilities: the
//! delegate produces [`Geometry`] buffers and renderer-facing
//! descriptions, the engine decides when to ask for them.

use crate::geometry::{ExtractionError, Geometry};
use crate::key::EntityKey;
use crate::math::Mat4;
use crate::settings::SettingsTree;

/// Kind tag of an authoring object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    /// Renderable geometry (mesh, curve, surface, text, metaball).
    Geometry,
    /// A light.
    Light,
    /// An empty/helper object; silently ignored.
    Empty,
    /// Anything the engine does not know how to synchronize.
    Unsupported,
}

/// Which visibility flag gates an object into the synchronized set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityMode {
    /// Final-render visibility.
    #[default]
    Render,
    /// Viewport visibility.
    Viewport,
    /// Material-preview rule: viewport- and render-visible objects
    /// whose name starts with `preview`.
    Preview,
}

/// Snapshot of one authoring object for a single sync pass.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// The object's key.
    pub key: EntityKey,
    /// Key of the object's shared data block (mesh data for geometry,
    /// light data for lights).
    pub data_key: EntityKey,
    /// Kind tag.
    pub kind: ObjectKind,
    /// Object name, for diagnostics and preview filtering.
    pub name: String,
    /// World transform.
    pub transform: Mat4,
    /// Hidden in final renders.
    pub hidden_render: bool,
    /// Hidden in the viewport.
    pub hidden_viewport: bool,
    /// The object changed this frame (any property).
    pub updated: bool,
    /// The object's data block changed this frame.
    pub updated_data: bool,
    /// Only the transform changed this frame.
    pub updated_transform: bool,
    /// Material assigned to each slot, `None` for empty slots.
    pub material_slots: Vec<Option<EntityKey>>,
    /// Whether the object emits duplicated placements.
    pub is_duplicator: bool,
    /// Whether the object carries a volumetric payload.
    pub has_volume: bool,
}

impl ObjectInfo {
    /// Whether the object passes the visibility predicate for `mode`.
    pub fn visible(&self, mode: VisibilityMode) -> bool {
        match mode {
            VisibilityMode::Render => !self.hidden_render,
            VisibilityMode::Viewport => !self.hidden_viewport,
            VisibilityMode::Preview => {
                !self.hidden_render && !self.hidden_viewport && self.name.starts_with("preview")
            }
        }
    }

    /// Whether any per-frame update flag is set.
    pub fn any_update(&self) -> bool {
        self.updated || self.updated_data || self.updated_transform
    }
}

/// One placement emitted by a duplicator.
#[derive(Debug, Clone)]
pub struct PlacementInfo {
    /// Placement-local persistent identifier; stable across frames for
    /// the same logical placement.
    pub persistent_id: u64,
    /// Key of the object being placed.
    pub object: EntityKey,
    /// World transform of the placement.
    pub transform: Mat4,
}

/// Renderer-facing material description produced by graph translation.
///
/// Node-graph-to-shader translation happens in the delegate; the engine
/// only transports the result.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDescription {
    /// Material name, for diagnostics.
    pub name: String,
    /// Base color, linear RGBA.
    pub base_color: [f32; 4],
    /// Surface roughness.
    pub roughness: f32,
    /// Metalness.
    pub metallic: f32,
}

impl MaterialDescription {
    /// A plain colored material.
    pub fn colored(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            base_color,
            roughness: 0.5,
            metallic: 0.0,
        }
    }
}

/// Renderer-facing light description; photometric math stays in the
/// delegate.
#[derive(Debug, Clone, PartialEq)]
pub struct LightDescription {
    /// Light name, for diagnostics.
    pub name: String,
    /// Light kind.
    pub kind: LightKind,
    /// Linear RGB color.
    pub color: [f32; 3],
    /// Pre-computed intensity in renderer units.
    pub intensity: f32,
}

/// Kind of a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// Point light.
    Point,
    /// Directional sun light.
    Sun,
    /// Spot light.
    Spot,
    /// Area light.
    Area,
}

/// Volumetric payload attached to an object (e.g. a smoke domain).
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeData {
    /// Grid resolution.
    pub dimensions: [u32; 3],
    /// RGB + density per voxel, `x`-fastest.
    pub voxels: Vec<[f32; 4]>,
}

impl VolumeData {
    /// Number of voxels implied by the dimensions.
    pub fn voxel_count(&self) -> usize {
        self.dimensions.iter().map(|&d| d as usize).product()
    }
}

/// Read-only view of the authoring scene, implemented by the embedding
/// application.
///
/// All methods are snapshots: the engine may call them any number of
/// times within one pass and expects consistent answers for the frame.
pub trait SceneDelegate {
    /// Enumerate every live object with its per-frame flags.
    fn objects(&self) -> Vec<ObjectInfo>;

    /// Look up one object by key.
    fn object(&self, key: EntityKey) -> Option<ObjectInfo>;

    /// Materials whose definition changed this frame.
    fn updated_materials(&self) -> Vec<EntityKey> {
        Vec::new()
    }

    /// Enumerate the current placements of a duplicator.
    fn placements(&self, duplicator: EntityKey) -> Vec<PlacementInfo> {
        let _ = duplicator;
        Vec::new()
    }

    /// Extract geometry buffers for an object's mesh data.
    fn extract_geometry(&self, object: EntityKey) -> Result<Geometry, ExtractionError>;

    /// Whether a mesh data block changed since it was last extracted.
    ///
    /// This is the authoring scene's dirty flag, not a content hash: a
    /// mesh edited and reverted within one frame still reports changed.
    fn geometry_changed(&self, data_key: EntityKey) -> bool;

    /// Translate a material's node graph into a renderer description.
    ///
    /// `None` means the material cannot be translated and its submeshes
    /// stay unbound.
    fn translate_material(&self, material: EntityKey) -> Option<MaterialDescription> {
        let _ = material;
        None
    }

    /// Translate a light object into a renderer description.
    fn translate_light(&self, object: EntityKey) -> Option<LightDescription> {
        let _ = object;
        None
    }

    /// Volumetric payload of an object, if any.
    fn volume(&self, object: EntityKey) -> Option<VolumeData> {
        let _ = object;
        None
    }

    /// Snapshot of the environment settings as a settings tree.
    fn environment_settings(&self) -> SettingsTree {
        SettingsTree::new()
    }
}
