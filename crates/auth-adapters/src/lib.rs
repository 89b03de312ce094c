//! # auth-adapters
//!
//! Identity provider adapters for the `IdentityProvider` port.

pub mod memory;

pub use memory::{AuthSettings, InMemoryIdentityProvider, ProviderError};
