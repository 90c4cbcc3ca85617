//! Topology data model
//!
//! The declarative input (topology, declarations, principals, outputs), the
//! raw option bags the parser produces, and the closed per-kind
//! configurations built from them.

mod config;
mod settings;
mod topology;

// Re-exports
pub use config::*;
pub use settings::*;
pub use topology::*;
