//! CPU-side geometry extracted from the authoring scene.
//!
//! This module provides:
//! - [`Geometry`] - Extracted mesh buffers with per-face material slots
//! - [`VertexData`] - Interleaved POD vertex view for renderer upload
//! - [`ExtractionError`] - Extraction failures recovered per-object
//!
//! Positions are per-vertex; normals and UVs are face-corner varying
//! (one entry per corner), since authoring meshes carry split normals
//! and per-corner UVs. Topology is a flat corner list plus per-face
//! corner counts, with one material-slot index per face. Submesh
//! partitioning filters faces by slot and is a pure function on the
//! geometry.

use std::collections::BTreeSet;
use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Errors produced by mesh extraction or geometry validation.
///
/// These are recovered at the per-object granularity: the object is
/// skipped, a diagnostic is logged, and the sync pass continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The mesh has no renderable faces.
    NoFaces,
    /// A required attribute buffer is absent or mis-sized.
    MissingAttribute(String),
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFaces => write!(f, "mesh has no renderable faces"),
            Self::MissingAttribute(what) => write!(f, "missing attribute data: {what}"),
        }
    }
}

impl std::error::Error for ExtractionError {}

/// Interleaved vertex for renderer upload, one per face corner.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VertexData {
    /// Corner position.
    pub position: [f32; 3],
    /// Corner (split) normal.
    pub normal: [f32; 3],
    /// Corner UV.
    pub uv: [f32; 2],
}

/// Extracted mesh buffers with face topology and per-face material slots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Geometry {
    /// Source mesh name, for diagnostics.
    pub name: String,
    /// Per-vertex positions.
    pub positions: Vec<[f32; 3]>,
    /// Face-corner varying normals, one per entry of `corner_positions`.
    pub normals: Vec<[f32; 3]>,
    /// Face-corner varying UVs; empty means "no UV layer" and corners
    /// read as `(0, 0)`.
    pub uvs: Vec<[f32; 2]>,
    /// Position index for each face corner, faces laid out back to back.
    pub corner_positions: Vec<u32>,
    /// Corner count of each face.
    pub face_sizes: Vec<u32>,
    /// Material-slot index of each face.
    pub face_slots: Vec<u32>,
}

impl Geometry {
    /// Number of faces.
    pub fn face_count(&self) -> usize {
        self.face_sizes.len()
    }

    /// Number of face corners.
    pub fn corner_count(&self) -> usize {
        self.corner_positions.len()
    }

    /// Check internal consistency.
    ///
    /// Returns [`ExtractionError::NoFaces`] for an empty mesh and
    /// [`ExtractionError::MissingAttribute`] when buffer lengths
    /// disagree with the topology.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        if self.face_sizes.is_empty() {
            return Err(ExtractionError::NoFaces);
        }
        let corners: usize = self.face_sizes.iter().map(|&n| n as usize).sum();
        if corners != self.corner_positions.len() {
            return Err(ExtractionError::MissingAttribute(format!(
                "face corners ({corners}) do not match corner indices ({})",
                self.corner_positions.len()
            )));
        }
        if self.normals.len() != self.corner_positions.len() {
            return Err(ExtractionError::MissingAttribute(format!(
                "normals ({}) do not match corners ({})",
                self.normals.len(),
                self.corner_positions.len()
            )));
        }
        if !self.uvs.is_empty() && self.uvs.len() != self.corner_positions.len() {
            return Err(ExtractionError::MissingAttribute(format!(
                "uvs ({}) do not match corners ({})",
                self.uvs.len(),
                self.corner_positions.len()
            )));
        }
        if self.face_slots.len() != self.face_sizes.len() {
            return Err(ExtractionError::MissingAttribute(format!(
                "face slots ({}) do not match faces ({})",
                self.face_slots.len(),
                self.face_sizes.len()
            )));
        }
        if let Some(&max) = self.corner_positions.iter().max() {
            if max as usize >= self.positions.len() {
                return Err(ExtractionError::MissingAttribute(format!(
                    "corner index {max} out of range for {} positions",
                    self.positions.len()
                )));
            }
        }
        Ok(())
    }

    /// Material-slot indices actually used by some face.
    pub fn used_slots(&self) -> BTreeSet<u32> {
        self.face_slots.iter().copied().collect()
    }

    /// Whether any face uses `slot`.
    pub fn has_slot(&self, slot: u32) -> bool {
        self.face_slots.contains(&slot)
    }

    /// Partition out the faces assigned to `slot`.
    ///
    /// Positions are carried over whole; corner-varying normals and UVs
    /// are compacted to the kept corners. When the mesh uses only this
    /// one slot the geometry is returned as-is.
    pub fn submesh(&self, slot: u32) -> Geometry {
        if self.used_slots() == BTreeSet::from([slot]) {
            return self.clone();
        }

        let mut corner_positions = Vec::new();
        let mut normals = Vec::new();
        let mut uvs = Vec::new();
        let mut face_sizes = Vec::new();

        let mut offset = 0usize;
        for (face, &size) in self.face_sizes.iter().enumerate() {
            let size = size as usize;
            if self.face_slots[face] == slot {
                corner_positions.extend_from_slice(&self.corner_positions[offset..offset + size]);
                normals.extend_from_slice(&self.normals[offset..offset + size]);
                if !self.uvs.is_empty() {
                    uvs.extend_from_slice(&self.uvs[offset..offset + size]);
                }
                face_sizes.push(size as u32);
            }
            offset += size;
        }

        let face_slots = vec![slot; face_sizes.len()];
        Geometry {
            name: self.name.clone(),
            positions: self.positions.clone(),
            normals,
            uvs,
            corner_positions,
            face_sizes,
            face_slots,
        }
    }

    /// Interleave positions, normals, and UVs per corner for upload.
    pub fn interleaved(&self) -> Vec<VertexData> {
        self.corner_positions
            .iter()
            .enumerate()
            .map(|(corner, &position)| VertexData {
                position: self.positions[position as usize],
                normal: self.normals[corner],
                uv: if self.uvs.is_empty() {
                    [0.0, 0.0]
                } else {
                    self.uvs[corner]
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A quad on slot 0 and a triangle on slot 1, sharing 5 positions.
    fn two_slot_geometry() -> Geometry {
        Geometry {
            name: "quad_tri".into(),
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [2.0, 0.0, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 7],
            uvs: vec![[0.5, 0.5]; 7],
            corner_positions: vec![0, 1, 2, 3, 1, 4, 2],
            face_sizes: vec![4, 3],
            face_slots: vec![0, 1],
        }
    }

    #[test]
    fn validate_accepts_consistent_geometry() {
        assert_eq!(two_slot_geometry().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_empty_mesh() {
        let geometry = Geometry::default();
        assert_eq!(geometry.validate(), Err(ExtractionError::NoFaces));
    }

    #[test]
    fn validate_rejects_mismatched_normals() {
        let mut geometry = two_slot_geometry();
        geometry.normals.pop();
        assert!(matches!(
            geometry.validate(),
            Err(ExtractionError::MissingAttribute(_))
        ));
    }

    #[test]
    fn used_slots_lists_each_slot_once() {
        assert_eq!(two_slot_geometry().used_slots(), BTreeSet::from([0, 1]));
    }

    #[test]
    fn submesh_partitions_by_slot() {
        let geometry = two_slot_geometry();
        let quad = geometry.submesh(0);
        assert_eq!(quad.face_count(), 1);
        assert_eq!(quad.corner_positions, vec![0, 1, 2, 3]);
        assert_eq!(quad.normals.len(), 4);
        assert_eq!(quad.uvs.len(), 4);
        assert_eq!(quad.validate(), Ok(()));

        let tri = geometry.submesh(1);
        assert_eq!(tri.face_count(), 1);
        assert_eq!(tri.corner_positions, vec![1, 4, 2]);
        assert_eq!(tri.face_slots, vec![1]);
    }

    #[test]
    fn submesh_of_single_slot_mesh_is_identical() {
        let mut geometry = two_slot_geometry();
        geometry.face_slots = vec![2, 2];
        let sub = geometry.submesh(2);
        assert_eq!(sub, geometry);
    }

    #[test]
    fn interleaved_resolves_corner_attributes() {
        let geometry = two_slot_geometry();
        let vertices = geometry.interleaved();
        assert_eq!(vertices.len(), 7);
        assert_eq!(vertices[4].position, [1.0, 0.0, 0.0]);
        assert_eq!(vertices[4].normal, [0.0, 0.0, 1.0]);
        assert_eq!(vertices[4].uv, [0.5, 0.5]);
    }

    #[test]
    fn interleaved_defaults_missing_uvs() {
        let mut geometry = two_slot_geometry();
        geometry.uvs.clear();
        assert!(geometry.interleaved().iter().all(|v| v.uv == [0.0, 0.0]));
    }
}
