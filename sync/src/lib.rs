//! # Emberbridge Sync
//!
//! Synchronizes a mutable, externally-owned authoring scene into a
//! retained-mode renderer scene, re-sending only the minimal set of
//! create/update/remove calls across repeated edits.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`SyncEngine`] - Per-frame diff-and-apply driver
//! - [`PrototypeRegistry`] - Geometry deduplication by mesh identity
//! - [`MaterialCache`] - Material handles plus the submesh reverse index
//! - [`InstanceStore`] - Placements and the owner/instance promotion
//!   protocol
//! - [`renderer`] - The renderer trait and a recording implementation
//!
//! ## Example
//!
//! ```ignore
//! use emberbridge_sync::{SyncConfig, SyncEngine};
//! use emberbridge_sync::renderer::RecordingRenderer;
//!
//! let mut engine = SyncEngine::new(RecordingRenderer::new(), SyncConfig::default());
//! engine.export(&scene)?;
//! // ... authoring edits happen ...
//! engine.sync(&scene)?;
//! ```

pub mod engine;
pub mod environment;
pub mod error;
pub mod instances;
pub mod materials;
pub mod prototypes;
pub mod renderer;

// Re-export main types for convenience
pub use engine::{SyncConfig, SyncEngine};
pub use environment::EnvironmentSync;
pub use error::{ConsistencyViolation, SyncError};
pub use instances::{InstanceStore, ObjectInstance, Representation};
pub use materials::MaterialCache;
pub use prototypes::{Prototype, PrototypeRegistry};
pub use renderer::{MaterialHandle, RecordingRenderer, SceneRenderer, SubmeshRef};

/// Sync library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the crate version; call once at embedding startup.
pub fn init() {
    log::info!("Emberbridge Sync v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
