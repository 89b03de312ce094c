//! # Session / identity store
//!
//! Single source of truth for who is signed in and their profile. Other
//! stores read the acting identity from here and are torn down when the
//! session ends.

use std::sync::Arc;

use domains::document::{collections, DocumentData, Update};
use domains::errors::{require_text, ValidationError, WriteError};
use domains::models::{Identity, RoleFlags, Stats};
use domains::ports::{Credentials, Principal};
use secrecy::SecretString;
use serde_json::Value;

use crate::backend::{Backend, Rules};
use crate::error::{Result, StoreError};
use crate::observable::Observable;
use crate::optimistic::{self, Compensation};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub principal: Option<Principal>,
    pub identity: Option<Identity>,
    /// Signed in, but no identity document exists yet
    pub needs_profile_setup: bool,
    pub loading: bool,
    /// User-facing message of the last failed auth or profile action
    pub error: Option<String>,
}

/// Fields chosen during onboarding.
#[derive(Debug, Clone, Default)]
pub struct ProfileSetup {
    pub display_name: String,
    pub avatar: String,
    pub bio: Option<String>,
}

/// Owner-editable profile fields. Role flags and stats cannot be expressed
/// here; they are written by the admin and gamification stores.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    /// `Some("")` clears the bio
    pub bio: Option<String>,
}

impl ProfileUpdate {
    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.avatar.is_none() && self.bio.is_none()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    backend: Backend,
    rules: Arc<Rules>,
    state: Observable<SessionState>,
}

impl SessionStore {
    pub fn new(backend: Backend, rules: Arc<Rules>) -> Self {
        Self {
            backend,
            rules,
            state: Observable::default(),
        }
    }

    pub fn observable(&self) -> Observable<SessionState> {
        self.state.clone()
    }

    pub fn current(&self) -> SessionState {
        self.state.get()
    }

    pub fn uid(&self) -> Option<String> {
        self.state.read(|s| s.principal.as_ref().map(|p| p.uid.clone()))
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.read(|s| s.identity.clone())
    }

    pub fn require_identity(&self) -> Result<Identity> {
        self.identity().ok_or(StoreError::NotSignedIn)
    }

    /// The signed-in identity, provided it is not banned.
    pub fn require_active(&self) -> Result<Identity> {
        let identity = self.require_identity()?;
        if identity.roles.is_banned {
            return Err(StoreError::Forbidden("account is banned".into()));
        }
        Ok(identity)
    }

    /// Local UX guard only; the backend enforces real authorization.
    pub fn is_admin(&self) -> bool {
        self.state
            .read(|s| s.identity.as_ref().is_some_and(|i| i.roles.is_admin && !i.roles.is_banned))
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Option<Identity>> {
        self.begin();
        let result = self.sign_in_inner(credentials).await;
        self.finish(result)
    }

    async fn sign_in_inner(&self, credentials: &Credentials) -> Result<Option<Identity>> {
        let principal = self.backend.identity.sign_in(credentials).await?;
        tracing::info!(uid = %principal.uid, "signed in");

        let users = collections::USERS;
        let identity = match self.backend.documents.get(users, &principal.uid).await? {
            Some(_) => {
                self.backend
                    .documents
                    .update(users, &principal.uid, Update::new().server_timestamp("lastLogin"))
                    .await?;
                self.load_identity(&principal.uid).await?
            }
            None => None,
        };

        self.state.update(|s| {
            s.needs_profile_setup = identity.is_none();
            s.identity = identity.clone();
            s.principal = Some(principal);
        });
        Ok(identity)
    }

    pub async fn sign_up(&self, email: &str, password: SecretString) -> Result<Principal> {
        self.begin();
        let result: Result<Principal> = async {
            let email = require_text("email", email)?;
            let principal = self.backend.identity.sign_up(&email, &password).await?;
            tracing::info!(uid = %principal.uid, "signed up");
            self.state.update(|s| {
                s.principal = Some(principal.clone());
                s.identity = None;
                s.needs_profile_setup = true;
            });
            Ok(principal)
        }
        .await;
        self.finish(result)
    }

    /// Creates the identity document for the signed-in principal.
    pub async fn complete_profile_setup(&self, profile: ProfileSetup) -> Result<Identity> {
        self.begin();
        let result = self.complete_profile_setup_inner(profile).await;
        self.finish(result)
    }

    async fn complete_profile_setup_inner(&self, profile: ProfileSetup) -> Result<Identity> {
        let principal = self
            .state
            .read(|s| s.principal.clone())
            .ok_or(StoreError::NotSignedIn)?;
        if self.identity().is_some() {
            return Err(StoreError::ProfileAlreadyExists(principal.uid));
        }
        let display_name = require_text("displayName", &profile.display_name)?;

        let is_admin = self.rules.is_reserved_admin(&principal.email);
        let stats = if is_admin {
            Stats {
                points: self.rules.admin_seed_points,
                xp: self.rules.admin_seed_points,
                level: self.rules.admin_seed_level,
                streak: 0,
            }
        } else {
            Stats::default()
        };

        let identity = Identity {
            id: principal.uid.clone(),
            email: principal.email.clone(),
            display_name,
            avatar: profile.avatar,
            bio: profile.bio.filter(|b| !b.trim().is_empty()),
            stats,
            roles: RoleFlags {
                is_admin,
                ..RoleFlags::default()
            },
            ..Identity::default()
        };
        let data = DocumentData::from_record(&identity)?
            .with_server_timestamp("createdAt")
            .with_server_timestamp("lastLogin");

        match self
            .backend
            .documents
            .create(collections::USERS, &principal.uid, data)
            .await
        {
            Err(WriteError::AlreadyExists(_)) => {
                return Err(StoreError::ProfileAlreadyExists(principal.uid));
            }
            other => other?,
        }

        let created = self
            .load_identity(&principal.uid)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("identity {}", principal.uid)))?;
        if is_admin {
            tracing::info!(uid = %principal.uid, "seeded admin identity");
        }
        self.state.update(|s| {
            s.identity = Some(created.clone());
            s.needs_profile_setup = false;
        });
        Ok(created)
    }

    /// Merges `changes` locally at once, then writes them remotely; the
    /// local merge is undone if the write fails.
    pub async fn update_profile(&self, changes: ProfileUpdate) -> Result<()> {
        let uid = self.require_identity()?.id;
        if changes.is_empty() {
            return Ok(());
        }

        let display_name = changes
            .display_name
            .as_deref()
            .map(|name| require_text("displayName", name))
            .transpose()?;
        if changes.avatar.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(ValidationError::required("avatar").into());
        }
        let avatar = changes.avatar.map(|a| a.trim().to_string());
        let bio = changes.bio.map(|b| {
            let b = b.trim();
            (!b.is_empty()).then(|| b.to_string())
        });

        let mut remote = Update::new();
        if let Some(name) = &display_name {
            remote = remote.set("displayName", name.as_str());
        }
        if let Some(avatar) = &avatar {
            remote = remote.set("avatar", avatar.as_str());
        }
        if let Some(bio) = &bio {
            remote = remote.set("bio", bio.clone().map_or(Value::Null, Value::String));
        }
        let remote = remote.server_timestamp("updatedAt");

        optimistic::apply(
            &self.state,
            "update_profile",
            |state: &mut SessionState| -> Option<Compensation<SessionState>> {
                let identity = state.identity.as_mut()?;
                let previous = (identity.display_name.clone(), identity.avatar.clone(), identity.bio.clone());
                if let Some(name) = display_name {
                    identity.display_name = name;
                }
                if let Some(avatar) = avatar {
                    identity.avatar = avatar;
                }
                if let Some(bio) = bio {
                    identity.bio = bio;
                }
                Some(Box::new(move |state: &mut SessionState| {
                    if let Some(identity) = state.identity.as_mut() {
                        (identity.display_name, identity.avatar, identity.bio) = previous;
                    }
                }))
            },
            self.backend.documents.update(collections::USERS, &uid, remote),
        )
        .await
    }

    /// Clears the session. Calling it while signed out does nothing.
    pub async fn sign_out(&self) {
        let Some(uid) = self.uid() else {
            return;
        };
        if let Err(e) = self.backend.identity.sign_out().await {
            tracing::warn!(uid = %uid, error = %e, "provider sign-out failed, clearing local session anyway");
        }
        self.state.replace(SessionState::default());
        tracing::info!(uid = %uid, "signed out");
    }

    /// Re-reads the identity document into the session.
    pub async fn refresh(&self) -> Result<Option<Identity>> {
        let uid = self.uid().ok_or(StoreError::NotSignedIn)?;
        let identity = self.load_identity(&uid).await?;
        self.state.update(|s| {
            s.needs_profile_setup = identity.is_none();
            s.identity = identity.clone();
        });
        Ok(identity)
    }

    /// Applies a local change to the signed-in identity, returning whether
    /// there was one to change.
    pub(crate) fn update_identity(&self, f: impl FnOnce(&mut Identity)) -> bool {
        self.state.update_if(|s| match s.identity.as_mut() {
            Some(identity) => {
                f(identity);
                true
            }
            None => false,
        })
    }

    pub(crate) fn state(&self) -> &Observable<SessionState> {
        &self.state
    }

    async fn load_identity(&self, uid: &str) -> Result<Option<Identity>> {
        let doc = self.backend.documents.get(collections::USERS, uid).await?;
        Ok(doc.map(|d| d.decode::<Identity>()).transpose()?)
    }

    fn begin(&self) {
        self.state.update(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        let error = result.as_ref().err().map(StoreError::user_message);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "session action failed");
        }
        self.state.update(|s| {
            s.loading = false;
            s.error = error;
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::document::Document;
    use domains::errors::AuthError;
    use domains::ports::{MockClock, MockDocumentStore, MockIdentityProvider, MockKeyValueStore, MockObjectStorage};
    use serde_json::json;

    fn principal(email: &str) -> Principal {
        Principal {
            uid: "u1".into(),
            email: email.into(),
            display_name: None,
        }
    }

    fn store(identity: MockIdentityProvider, documents: MockDocumentStore) -> SessionStore {
        let backend = Backend {
            documents: Arc::new(documents),
            identity: Arc::new(identity),
            objects: Arc::new(MockObjectStorage::new()),
            local: Arc::new(MockKeyValueStore::new()),
            clock: Arc::new(MockClock::new()),
        };
        SessionStore::new(backend, Arc::new(Rules::default()))
    }

    fn signed_in(email: &'static str) -> MockIdentityProvider {
        let mut identity = MockIdentityProvider::new();
        identity.expect_sign_in().returning(move |_| Ok(principal(email)));
        identity
    }

    #[tokio::test]
    async fn unknown_principal_is_flagged_for_profile_setup() {
        let mut documents = MockDocumentStore::new();
        documents.expect_get().returning(|_, _| Ok(None));
        let session = store(signed_in("dad@example.com"), documents);

        let identity = session
            .sign_in(&Credentials::email_password("dad@example.com", "hunter22"))
            .await
            .unwrap();
        assert!(identity.is_none());
        let state = session.current();
        assert!(state.needs_profile_setup);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn auth_failures_are_captured_as_user_messages() {
        let mut identity = MockIdentityProvider::new();
        identity.expect_sign_in().returning(|_| Err(AuthError::RateLimited));
        let session = store(identity, MockDocumentStore::new());

        let err = session
            .sign_in(&Credentials::email_password("a@b.c", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Auth(AuthError::RateLimited)));
        assert_eq!(session.current().error.as_deref(), Some(AuthError::RateLimited.user_message()));
    }

    #[tokio::test]
    async fn reserved_admin_email_seeds_elevated_stats() {
        let mut documents = MockDocumentStore::new();
        let mut seq = mockall::Sequence::new();
        documents
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        documents
            .expect_create()
            .withf(|collection, id, data| {
                collection == "users"
                    && id == "u1"
                    && data.fields["isAdmin"] == json!(true)
                    && data.fields["points"] == json!(1000)
                    && data.fields["level"] == json!(5)
                    && data.server_timestamps.contains(&"createdAt".to_string())
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        documents
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                let fields = json!({ "email": "admin@dadhub.com", "displayName": "Boss", "isAdmin": true, "points": 1000, "xp": 1000, "level": 5 });
                Ok(Some(Document::new("u1", fields.as_object().cloned().unwrap_or_default())))
            });

        let session = store(signed_in("admin@dadhub.com"), documents);
        session
            .sign_in(&Credentials::email_password("admin@dadhub.com", "pw"))
            .await
            .unwrap();
        let identity = session
            .complete_profile_setup(ProfileSetup {
                display_name: "Boss".into(),
                avatar: "🧔".into(),
                bio: None,
            })
            .await
            .unwrap();
        assert!(identity.roles.is_admin);
        assert!(session.is_admin());
        assert!(!session.current().needs_profile_setup);
    }

    #[tokio::test]
    async fn existing_document_maps_to_profile_already_exists() {
        let mut documents = MockDocumentStore::new();
        documents.expect_get().returning(|_, _| Ok(None));
        documents
            .expect_create()
            .returning(|_, id, _| Err(WriteError::AlreadyExists(id.to_string())));
        let session = store(signed_in("dad@example.com"), documents);
        session.sign_in(&Credentials::email_password("dad@example.com", "pw")).await.unwrap();

        let err = session
            .complete_profile_setup(ProfileSetup { display_name: "Dad".into(), ..ProfileSetup::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProfileAlreadyExists(uid) if uid == "u1"));
    }

    #[tokio::test]
    async fn blank_display_name_is_rejected_before_any_write() {
        let mut documents = MockDocumentStore::new();
        documents.expect_get().returning(|_, _| Ok(None));
        documents.expect_create().never();
        let session = store(signed_in("dad@example.com"), documents);
        session.sign_in(&Credentials::email_password("dad@example.com", "pw")).await.unwrap();

        let err = session
            .complete_profile_setup(ProfileSetup { display_name: "   ".into(), ..ProfileSetup::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn failed_profile_update_is_reverted() {
        let mut documents = MockDocumentStore::new();
        documents
            .expect_update()
            .returning(|_, _, _| Err(WriteError::Unavailable("offline".into())));
        let session = store(MockIdentityProvider::new(), documents);
        session.state.update(|s| {
            s.principal = Some(principal("dad@example.com"));
            s.identity = Some(Identity {
                id: "u1".into(),
                display_name: "Old".into(),
                ..Identity::default()
            });
        });

        let mut rx = session.observable().subscribe();
        let err = tokio_test::assert_err!(session.update_profile(ProfileUpdate::display_name("New")).await);
        assert!(matches!(err, StoreError::Write(WriteError::Unavailable(_))));
        assert!(rx.has_changed().unwrap());
        assert_eq!(session.require_identity().unwrap().display_name, "Old");
    }

    #[tokio::test]
    async fn sign_out_is_idempotent() {
        let mut identity = MockIdentityProvider::new();
        identity.expect_sign_out().times(1).returning(|| Ok(()));
        let session = store(identity, MockDocumentStore::new());
        session.state.update(|s| s.principal = Some(principal("dad@example.com")));

        session.sign_out().await;
        session.sign_out().await;
        assert_eq!(session.current(), SessionState::default());
    }

    #[test]
    fn banned_identity_is_not_active() {
        let session = store(MockIdentityProvider::new(), MockDocumentStore::new());
        session.state.update(|s| {
            s.identity = Some(Identity {
                roles: RoleFlags { is_banned: true, is_admin: true, ..RoleFlags::default() },
                ..Identity::default()
            })
        });
        assert!(matches!(session.require_active(), Err(StoreError::Forbidden(_))));
        assert!(!session.is_admin());
    }
}
