//! Shared fixtures for the end-to-end scenarios: one in-process backend that
//! any number of clients (`DadHub` instances) can connect to.

use std::sync::Arc;
use std::time::Duration;

use auth_adapters::{AuthSettings, InMemoryIdentityProvider};
use chrono::{TimeZone, Utc};
use domains::document::collections;
use domains::models::{Identity, Record};
use domains::ports::{Credentials, DocumentStore};
use secrecy::SecretString;
use services::{Backend, DadHub, ProfileSetup, Rules};
use storage_adapters::{FixedClock, InMemoryDocumentStore, InMemoryKeyValueStore, InMemoryObjectStorage};
use tokio::sync::watch;

pub const PASSWORD: &str = "correct-horse";
pub const ADMIN_EMAIL: &str = "admin@dadhub.com";

const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub documents: InMemoryDocumentStore,
    pub identity: Arc<InMemoryIdentityProvider>,
    pub objects: Arc<InMemoryObjectStorage>,
    pub clock: Arc<FixedClock>,
    pub rules: Rules,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let identity = InMemoryIdentityProvider::new(AuthSettings {
            memory_kib: 64,
            iterations: 1,
            ..AuthSettings::default()
        })
        .expect("argon2 test parameters are valid");
        Self {
            documents: InMemoryDocumentStore::new(),
            identity: Arc::new(identity),
            objects: Arc::new(InMemoryObjectStorage::new(1 << 20)),
            clock: Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap())),
            rules: Rules::default(),
        }
    }

    /// A fresh client with its own local storage.
    pub fn client(&self) -> DadHub {
        let backend = Backend {
            documents: Arc::new(self.documents.clone()),
            identity: self.identity.clone(),
            objects: self.objects.clone(),
            local: Arc::new(InMemoryKeyValueStore::new()),
            clock: self.clock.clone(),
        };
        DadHub::new(backend, self.rules.clone())
    }

    /// Signs up `email` on a new client and completes onboarding.
    pub async fn onboard(&self, email: &str, name: &str) -> DadHub {
        let app = self.client();
        self.onboard_on(&app, email, name).await;
        app
    }

    pub async fn onboard_on(&self, app: &DadHub, email: &str, name: &str) {
        app.session
            .sign_up(email, SecretString::from(PASSWORD.to_string()))
            .await
            .expect("sign up");
        app.finish_onboarding(ProfileSetup {
            display_name: name.to_string(),
            avatar: "🧔".to_string(),
            bio: None,
        })
        .await
        .expect("profile setup");
    }

    /// Reads a document straight from the backend, bypassing every mirror.
    pub async fn load<T: Record>(&self, collection: &str, id: &str) -> Option<T> {
        self.documents
            .get(collection, id)
            .await
            .expect("backend read")
            .map(|doc| doc.decode().expect("decodable document"))
    }

    pub async fn load_identity(&self, uid: &str) -> Identity {
        self.load(collections::USERS, uid).await.expect("identity exists")
    }

    /// A second client signed in as an existing account.
    pub async fn sign_in(&self, email: &str) -> DadHub {
        let app = self.client();
        app.session
            .sign_in(&Credentials::email_password(email, PASSWORD))
            .await
            .expect("sign in");
        app
    }
}

/// Waits until the observed value satisfies `pred`, panicking after a
/// timeout. Returns the matching value.
pub async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, mut pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let found = tokio::time::timeout(WAIT, async {
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            rx.changed().await.expect("observable dropped");
        }
    })
    .await;
    found.expect("condition not reached in time")
}

/// Lets spawned listener tasks run, for asserting that nothing happens.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
}
