//! crates/storage-adapters/src/lib.rs
//!
//! Implementations of the storage ports. The in-memory store is always
//! built; SQLite and local attachment storage sit behind features.

pub mod memory;

#[cfg(feature = "db-sqlite")]
pub mod sqlite;

#[cfg(feature = "media-local")]
pub mod media_local;

pub use memory::MemoryDocumentStore;

#[cfg(feature = "db-sqlite")]
pub use sqlite::SqliteDocumentStore;

#[cfg(feature = "media-local")]
pub use media_local::LocalMediaStore;
