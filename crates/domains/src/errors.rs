//! # Error taxonomy
//!
//! Failures raised at the port boundaries. Each error knows the short,
//! user-facing string the UI shows for it.

use thiserror::Error;

/// Failures from the identity provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown account, wrong password, or a rejected OAuth token
    #[error("invalid credential")]
    InvalidCredential,

    /// Sign-up with an email that already has an account
    #[error("email already in use")]
    EmailInUse,

    /// Too many failed attempts in the lockout window
    #[error("too many sign-in attempts")]
    RateLimited,

    /// The OAuth popup was dismissed before completing
    #[error("sign-in popup closed by the user")]
    PopupClosed,

    /// The provider could not be reached
    #[error("network error: {0}")]
    Network(String),
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "Invalid email or password.",
            AuthError::EmailInUse => "An account with this email already exists.",
            AuthError::RateLimited => "Too many attempts. Please try again later.",
            AuthError::PopupClosed => "Sign-in was cancelled.",
            AuthError::Network(_) => "Network error. Check your connection and try again.",
        }
    }
}

/// Failures from the document store. Reads and listeners report through the
/// same type because the hosted backend uses one code space for both.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A create or batch precondition found an existing document
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A batch precondition on a field value no longer holds
    #[error("conflict: {0}")]
    Conflict(String),

    /// Quota or rate limit exceeded
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Backend unreachable or temporarily down
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A stored document does not match the expected shape
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl WriteError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WriteError::PermissionDenied(_) => "You don't have permission to do that.",
            WriteError::NotFound(_) => "That item no longer exists.",
            WriteError::AlreadyExists(_) => "That already exists.",
            WriteError::Conflict(_) => "Someone else changed this at the same time. Please try again.",
            WriteError::ResourceExhausted(_) => {
                "Too many requests. Please wait a moment and try again."
            }
            WriteError::Unavailable(_) => "Connection lost. Check your network and try again.",
            WriteError::InvalidData(_) => "Something went wrong. Please try again.",
        }
    }
}

/// Input rejected before any remote call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, "is required")
    }
}

/// Returns the trimmed value, or a `required` error when nothing is left.
pub fn require_text(field: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::required(field));
    }
    Ok(trimmed.to_string())
}

/// Failures from object storage (media uploads).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("storage I/O failure: {0}")]
    Io(String),
}

impl StorageError {
    pub fn user_message(&self) -> &'static str {
        match self {
            StorageError::UnsupportedType(_) => "Only image uploads are supported.",
            StorageError::TooLarge { .. } => "That file is too large.",
            StorageError::Io(_) => "Upload failed. Please try again.",
        }
    }
}
