//! # StoreError
//!
//! Centralized error type for every store operation. Port failures convert
//! in with `?`; each variant maps to a user-facing string.

use domains::errors::{AuthError, StorageError, ValidationError, WriteError};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Write(#[from] WriteError),

    /// Rejected before any remote call
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("not signed in")]
    NotSignedIn,

    /// Profile setup for a principal whose identity already exists
    #[error("profile already exists for {0}")]
    ProfileAlreadyExists(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl StoreError {
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Auth(e) => e.user_message().to_string(),
            StoreError::Write(e) => e.user_message().to_string(),
            StoreError::Validation(e) => e.to_string(),
            StoreError::Storage(e) => e.user_message().to_string(),
            StoreError::NotSignedIn => "Please sign in first.".to_string(),
            StoreError::ProfileAlreadyExists(_) => "Your profile is already set up.".to_string(),
            StoreError::Forbidden(_) => "You can't do that.".to_string(),
            StoreError::NotFound(_) => "That item no longer exists.".to_string(),
        }
    }
}

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
