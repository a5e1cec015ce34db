//! Persistence layer — the declarative record store and its backends.

pub mod libsql_backend;
pub mod manifest;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use manifest::{Manifest, load_manifests};
pub use memory::MemoryStore;
pub use traits::{ResourceStore, WatchStream};
