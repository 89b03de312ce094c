//! dadhub/crates/services/src/lib.rs
//!
//! Client-side state stores. Each store mirrors remote collections into
//! observable local state and applies optimistic mutations through the
//! ports in `domains`.

pub mod admin;
pub mod app;
pub mod backend;
pub mod chat;
mod credits;
pub mod discussions;
pub mod error;
pub mod friends;
pub mod gamification;
pub mod groups;
pub mod live;
pub mod observable;
pub mod optimistic;
pub mod preferences;
pub mod referrals;
pub mod reports;
pub mod session;

pub use app::DadHub;
pub use backend::{Backend, Rules};
pub use error::{Result, StoreError};
pub use live::{SubscriptionHandle, SubscriptionStatus};
pub use observable::Observable;
pub use session::{ProfileSetup, ProfileUpdate, SessionState, SessionStore};
