//! # Core Traits (Ports)
//!
//! Any adapter must implement these traits to be wired into the stores.
//! They stand in for the hosted identity provider, document database,
//! object storage and the device's local persistent storage.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::document::{Document, DocumentData, Query, Update, WriteBatch};
use crate::errors::{AuthError, StorageError, WriteError};

/// A full materialized result set, in query order.
pub type Snapshot = Vec<Document>;

/// Receiving end of a standing query.
///
/// Dropping the listener releases it: the adapter's cancel hook runs and no
/// further snapshots are produced for it.
pub struct SnapshotListener {
    receiver: mpsc::UnboundedReceiver<Result<Snapshot, WriteError>>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl SnapshotListener {
    pub fn new(receiver: mpsc::UnboundedReceiver<Result<Snapshot, WriteError>>) -> Self {
        Self {
            receiver,
            on_drop: None,
        }
    }

    /// Registers the hook that tears the adapter side down.
    pub fn with_cancel(mut self, cancel: impl FnOnce() + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(cancel));
        self
    }

    /// Next snapshot, or `None` once the adapter has closed the stream.
    pub async fn next(&mut self) -> Option<Result<Snapshot, WriteError>> {
        self.receiver.recv().await
    }
}

impl Drop for SnapshotListener {
    fn drop(&mut self) {
        if let Some(cancel) = self.on_drop.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for SnapshotListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotListener").finish_non_exhaustive()
    }
}

/// Remote document database contract.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Allocates a fresh document id without writing anything.
    fn new_id(&self) -> String;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, WriteError>;
    async fn query(&self, query: &Query) -> Result<Vec<Document>, WriteError>;

    /// Inserts with a server-assigned id and returns it.
    async fn add(&self, collection: &str, data: DocumentData) -> Result<String, WriteError>;
    /// Inserts at `id`; fails with `AlreadyExists` if present.
    async fn create(&self, collection: &str, id: &str, data: DocumentData) -> Result<(), WriteError>;
    /// Creates or overwrites.
    async fn set(&self, collection: &str, id: &str, data: DocumentData) -> Result<(), WriteError>;
    /// Applies field operations; fails with `NotFound` if missing.
    async fn update(&self, collection: &str, id: &str, update: Update) -> Result<(), WriteError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), WriteError>;

    /// Applies every write or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), WriteError>;

    /// Opens a standing query. The current result set is delivered first,
    /// then a new full snapshot after every change to the collection.
    async fn listen(&self, query: Query) -> Result<SnapshotListener, WriteError>;
}

/// What the identity provider knows about a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Credentials {
    EmailPassword {
        email: String,
        password: SecretString,
    },
    /// Result of an OAuth popup; an empty token means the popup was closed.
    OAuth { provider: String, token: String },
}

impl Credentials {
    pub fn email_password(email: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::EmailPassword {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Hosted authentication contract.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Principal, AuthError>;
    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<Principal, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Media storage contract for image uploads.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Saves raw bytes and returns a retrievable URL.
    async fn upload(&self, data: Bytes, content_type: &mime::Mime) -> Result<String, StorageError>;
}

/// Device-local persistent key/value storage.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Source of "now" for calendar-day logic (streaks, daily spin).
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
