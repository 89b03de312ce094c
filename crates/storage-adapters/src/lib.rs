//! # storage-adapters
//!
//! Adapters for the storage ports in `domains`: the document store, object
//! storage for media, device-local key/value storage, and a settable clock.

pub mod clock;
pub mod kv;
pub mod media_local;
pub mod media_memory;
pub mod memory_store;

pub use clock::FixedClock;
pub use kv::{FileKeyValueStore, InMemoryKeyValueStore};
pub use media_local::LocalMediaStore;
pub use media_memory::InMemoryObjectStorage;
pub use memory_store::InMemoryDocumentStore;
