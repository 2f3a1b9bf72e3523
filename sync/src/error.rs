//! Synchronization error types.
//!
//! Two recovery policies exist, and the split matters:
//! - Per-object errors ([`SyncError::Extraction`] and friends) are
//!   caught at per-object granularity: the object is skipped, a
//!   diagnostic is logged, and the pass continues. The object is simply
//!   absent from the rendered scene until fixed.
//! - [`SyncError::Consistency`] means an internal cache invariant broke.
//!   That is a bug in the engine, not bad input; the pass aborts and the
//!   error propagates to the embedding application.

use std::fmt;

use emberbridge_core::geometry::ExtractionError;
use emberbridge_core::key::EntityKey;

/// An internal cache invariant was violated.
///
/// Fatal to the current pass: the caches can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyViolation {
    /// A prototype was released while placements still reference it.
    PrototypeStillReferenced {
        /// The prototype's key.
        prototype: EntityKey,
        /// How many placements still reference it.
        remaining: usize,
    },
    /// An operation named a prototype the registry does not hold.
    UnknownPrototype(EntityKey),
    /// An operation named a placement the store does not hold.
    UnknownPlacement(EntityKey),
    /// A placement was registered twice without an intervening removal.
    PlacementExists(EntityKey),
    /// A placement was realized while already holding a renderer
    /// representation.
    AlreadyRealized(EntityKey),
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrototypeStillReferenced {
                prototype,
                remaining,
            } => write!(
                f,
                "prototype {prototype} released with {remaining} live placements"
            ),
            Self::UnknownPrototype(key) => write!(f, "unknown prototype {key}"),
            Self::UnknownPlacement(key) => write!(f, "unknown placement {key}"),
            Self::PlacementExists(key) => write!(f, "placement {key} already registered"),
            Self::AlreadyRealized(key) => write!(f, "placement {key} already realized"),
        }
    }
}

impl std::error::Error for ConsistencyViolation {}

/// Errors raised during a synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Mesh extraction failed for an object.
    Extraction {
        /// The object whose extraction failed.
        object: EntityKey,
        /// The underlying extraction failure.
        source: ExtractionError,
    },
    /// A referenced object does not exist in the authoring scene.
    MissingObject(EntityKey),
    /// An object's kind has no synchronization path.
    UnsupportedKind {
        /// The object's key.
        object: EntityKey,
        /// The object's name, for diagnostics.
        name: String,
    },
    /// An internal invariant broke; aborts the pass.
    Consistency(ConsistencyViolation),
}

impl SyncError {
    /// Whether this error aborts the whole pass instead of skipping one
    /// object.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraction { object, source } => {
                write!(f, "extraction failed for {object}: {source}")
            }
            Self::MissingObject(key) => write!(f, "object {key} does not exist"),
            Self::UnsupportedKind { object, name } => {
                write!(f, "object {object} ('{name}') has an unsupported kind")
            }
            Self::Consistency(violation) => write!(f, "consistency violation: {violation}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Extraction { source, .. } => Some(source),
            Self::Consistency(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<ConsistencyViolation> for SyncError {
    fn from(violation: ConsistencyViolation) -> Self {
        Self::Consistency(violation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberbridge_core::key::EntityId;

    #[test]
    fn test_error_display() {
        let key = EntityKey::mesh(EntityId::from_raw(4, 1));
        let err = SyncError::Extraction {
            object: key,
            source: ExtractionError::NoFaces,
        };
        assert_eq!(
            err.to_string(),
            "extraction failed for Mesh(4v1): mesh has no renderable faces"
        );
        assert!(!err.is_fatal());

        let err = SyncError::from(ConsistencyViolation::UnknownPrototype(key));
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "consistency violation: unknown prototype Mesh(4v1)"
        );
    }
}
