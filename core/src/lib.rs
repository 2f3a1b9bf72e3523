//! # Emberbridge Core
//!
//! Core crate for the Emberbridge scene synchronization engine:
//! identity keying, CPU geometry, the authoring-scene delegate
//! interface, and the generic settings differ.

pub mod geometry;
pub mod key;
pub mod math;
pub mod scene;
pub mod settings;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the crate version; call once at embedding startup.
pub fn init() {
    log::info!("Emberbridge Core v{} initialized", VERSION);
}
