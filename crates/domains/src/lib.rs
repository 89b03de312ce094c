//! dadhub/crates/domains/src/lib.rs
//!
//! Domain models, the document model, error taxonomy and the port traits
//! every adapter implements. No I/O lives here.

pub mod document;
pub mod errors;
pub mod models;
pub mod ports;

// Re-exporting for easier access in other crates
pub use document::*;
pub use errors::*;
pub use models::*;
pub use ports::*;
