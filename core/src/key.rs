//! Identity keying for authoring-scene entities.
//!
//! This module provides:
//! - [`EntityId`] - Generation-checked surrogate identifier
//! - [`KeyAllocator`] - Issues and recycles [`EntityId`] slots
//! - [`EntityKey`] - Kind-tagged key for any supported entity, including
//!   duplicator-placement pairs
//! - [`SubmeshKey`] - Names one material-partitioned piece of a prototype
//!
//! Keys are the only names the synchronization caches ever use: the
//! authoring objects themselves mutate in place, so every cache lookup
//! goes through a key that stays stable for the entity's lifetime.
//!
//! # Identity
//!
//! Two ids are equal if they have the same `(index, generation)`. The
//! embedding application issues ids at object-creation time through a
//! [`KeyAllocator`]; when a slot is reused after a release, the new id
//! carries a bumped generation and compares unequal to the stale one.

use std::fmt;

/// A generation-checked surrogate identifier.
///
/// Issued by [`KeyAllocator`]. The generation detects slot reuse: a key
/// held across the deletion and re-creation of an entity never aliases
/// the new entity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    /// Create an id from raw parts.
    ///
    /// Normally ids come from a [`KeyAllocator`]; this is for embedders
    /// that already maintain their own stable identifiers.
    pub fn from_raw(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index of this id.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of this id.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Issues [`EntityId`]s and recycles released slots with a generation bump.
#[derive(Debug, Default)]
pub struct KeyAllocator {
    generations: Vec<u32>,
    free: Vec<u32>,
}

impl KeyAllocator {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id.
    ///
    /// Reuses a released slot if one is available; the returned id then
    /// carries a higher generation than any id previously issued for
    /// that slot.
    pub fn allocate(&mut self) -> EntityId {
        if let Some(index) = self.free.pop() {
            EntityId {
                index,
                generation: self.generations[index as usize],
            }
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(0);
            EntityId {
                index,
                generation: 0,
            }
        }
    }

    /// Release an id, making its slot available for reuse.
    ///
    /// Returns `false` if the id is stale (its slot was already released
    /// or reissued), in which case nothing changes.
    pub fn release(&mut self, id: EntityId) -> bool {
        let Some(generation) = self.generations.get_mut(id.index as usize) else {
            return false;
        };
        if *generation != id.generation {
            return false;
        }
        *generation += 1;
        self.free.push(id.index);
        true
    }

    /// Whether the id is the currently-live id for its slot.
    pub fn is_live(&self, id: EntityId) -> bool {
        self.generations.get(id.index as usize) == Some(&id.generation)
            && !self.free.contains(&id.index)
    }

    /// Number of ids issued so far (live and released).
    pub fn issued(&self) -> usize {
        self.generations.len()
    }
}

/// Kind tag for plain (non-placement) entity keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    /// A scene object (a placement slot in the authoring scene graph).
    Object,
    /// Mesh data shared by one or more objects.
    Mesh,
    /// A material definition.
    Material,
    /// A light definition.
    Light,
    /// An image resource.
    Image,
}

/// Stable, hashable key for an authoring-scene entity.
///
/// Covers plain entities (objects, meshes, materials, lights, images)
/// and duplicator-placement pairs. Equality and hash are by identity,
/// never by structural value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    /// A plain entity, tagged with its kind.
    Entity {
        /// What kind of entity this key names.
        kind: EntityKind,
        /// The entity's surrogate id.
        id: EntityId,
    },
    /// One placement emitted by a duplicator.
    ///
    /// Different placements of the same underlying object are told apart
    /// by the placement-local persistent id.
    Instance {
        /// Id of the duplicator object that emitted the placement.
        duplicator: EntityId,
        /// Placement-local persistent identifier.
        placement: u64,
    },
}

impl EntityKey {
    /// Key for a scene object.
    pub fn object(id: EntityId) -> Self {
        Self::Entity {
            kind: EntityKind::Object,
            id,
        }
    }

    /// Key for mesh data.
    pub fn mesh(id: EntityId) -> Self {
        Self::Entity {
            kind: EntityKind::Mesh,
            id,
        }
    }

    /// Key for a material.
    pub fn material(id: EntityId) -> Self {
        Self::Entity {
            kind: EntityKind::Material,
            id,
        }
    }

    /// Key for a light definition.
    pub fn light(id: EntityId) -> Self {
        Self::Entity {
            kind: EntityKind::Light,
            id,
        }
    }

    /// Key for an image resource.
    pub fn image(id: EntityId) -> Self {
        Self::Entity {
            kind: EntityKind::Image,
            id,
        }
    }

    /// Key for one placement emitted by a duplicator.
    ///
    /// `duplicator` must be an [`EntityKind::Object`] key; anything else
    /// is a programming error and panics.
    pub fn instance(duplicator: EntityKey, placement: u64) -> Self {
        match duplicator {
            Self::Entity {
                kind: EntityKind::Object,
                id,
            } => Self::Instance {
                duplicator: id,
                placement,
            },
            other => panic!("instance key requires an object key, got {other:?}"),
        }
    }

    /// Kind of a plain entity key, `None` for placement keys.
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            Self::Entity { kind, .. } => Some(*kind),
            Self::Instance { .. } => None,
        }
    }

    /// Whether this key names a duplicator placement.
    pub fn is_instance(&self) -> bool {
        matches!(self, Self::Instance { .. })
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity { kind, id } => write!(f, "{kind:?}({id})"),
            Self::Instance {
                duplicator,
                placement,
            } => write!(f, "Instance({duplicator}:{placement})"),
        }
    }
}

/// Key of one material-partitioned piece of a prototype's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmeshKey {
    /// The prototype (mesh data) key.
    pub prototype: EntityKey,
    /// Material-slot index within the prototype.
    pub slot: u32,
}

impl SubmeshKey {
    /// Create a submesh key.
    pub fn new(prototype: EntityKey, slot: u32) -> Self {
        Self { prototype, slot }
    }
}

impl fmt::Display for SubmeshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.prototype, self.slot)
    }
}
