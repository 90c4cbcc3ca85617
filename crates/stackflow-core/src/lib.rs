//! StackFlow core
//!
//! Topology model, KDL parser and the closed per-kind configuration schemas
//! the planner validates declarations against.

pub mod error;
pub mod loader;
pub mod model;
pub mod parser;

pub use error::{Result, TopologyError};
pub use loader::load_topology;
pub use model::*;
pub use parser::{parse_kdl_file, parse_kdl_string};
