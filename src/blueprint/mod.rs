//! Owns the in-memory blueprint document and drives its lifecycle: load
//! (from disk or from template composition), generate defaults, write back,
//! and install/teardown against the cluster.

pub mod handler;
pub mod model;

pub use handler::BlueprintHandler;
