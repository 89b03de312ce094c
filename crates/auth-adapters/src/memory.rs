//! # In-memory identity provider
//!
//! Argon2-based implementation of `IdentityProvider`.
//! Handles email/password accounts, pre-registered OAuth tokens, failed
//! attempt lockout and an offline switch for exercising network errors.

use std::sync::atomic::{AtomicBool, Ordering};

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use domains::errors::AuthError;
use domains::ports::{Credentials, IdentityProvider, Principal};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
}

/// Tuning for hashing and lockout.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Consecutive failures before an email is locked out
    pub max_failed_attempts: u32,
    pub lockout: Duration,
    /// Argon2 memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout: Duration::minutes(15),
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
        }
    }
}

struct Account {
    principal: Principal,
    password_hash: String,
}

#[derive(Default)]
struct Attempts {
    failures: u32,
    locked_until: Option<DateTime<Utc>>,
}

pub struct InMemoryIdentityProvider {
    /// Keyed by normalized email
    accounts: DashMap<String, Account>,
    /// Keyed by "provider:token"
    oauth: DashMap<String, Principal>,
    attempts: DashMap<String, Attempts>,
    offline: AtomicBool,
    hasher: Argon2<'static>,
    settings: AuthSettings,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl InMemoryIdentityProvider {
    pub fn new(settings: AuthSettings) -> Result<Self, ProviderError> {
        let params = Params::new(settings.memory_kib, settings.iterations, 1, None)
            .map_err(|e| ProviderError::InvalidParams(e.to_string()))?;
        Ok(Self {
            accounts: DashMap::new(),
            oauth: DashMap::new(),
            attempts: DashMap::new(),
            offline: AtomicBool::new(false),
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            settings,
        })
    }

    /// While offline every call fails with `AuthError::Network`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes `token` a valid OAuth result for `provider`, returning the
    /// principal it signs in as.
    pub fn register_oauth(&self, provider: &str, token: &str, email: &str, display_name: Option<&str>) -> Principal {
        let principal = Principal {
            uid: Uuid::new_v4().simple().to_string(),
            email: normalize_email(email),
            display_name: display_name.map(str::to_string),
        };
        self.oauth.insert(format!("{provider}:{token}"), principal.clone());
        principal
    }

    fn check_online(&self) -> Result<(), AuthError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AuthError::Network("identity provider unreachable".into()));
        }
        Ok(())
    }

    fn check_lockout(&self, email: &str) -> Result<(), AuthError> {
        if let Some(attempts) = self.attempts.get(email) {
            if attempts.locked_until.is_some_and(|until| until > Utc::now()) {
                return Err(AuthError::RateLimited);
            }
        }
        Ok(())
    }

    fn record_failure(&self, email: &str) {
        let mut attempts = self.attempts.entry(email.to_string()).or_default();
        attempts.failures += 1;
        if attempts.failures >= self.settings.max_failed_attempts {
            tracing::warn!(email = %email, failures = attempts.failures, "locking sign-in after repeated failures");
            attempts.locked_until = Some(Utc::now() + self.settings.lockout);
            attempts.failures = 0;
        }
    }

    fn sign_in_with_password(&self, email: &str, password: &SecretString) -> Result<Principal, AuthError> {
        let email = normalize_email(email);
        self.check_lockout(&email)?;

        let verified = self.accounts.get(&email).and_then(|account| {
            let parsed = PasswordHash::new(&account.password_hash).ok()?;
            self.hasher
                .verify_password(password.expose_secret().as_bytes(), &parsed)
                .ok()
                .map(|_| account.principal.clone())
        });

        match verified {
            Some(principal) => {
                self.attempts.remove(&email);
                Ok(principal)
            }
            None => {
                self.record_failure(&email);
                Err(AuthError::InvalidCredential)
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        self.check_online()?;
        match credentials {
            Credentials::EmailPassword { email, password } => self.sign_in_with_password(email, password),
            Credentials::OAuth { provider, token } => {
                if token.is_empty() {
                    return Err(AuthError::PopupClosed);
                }
                self.oauth
                    .get(&format!("{provider}:{token}"))
                    .map(|p| p.value().clone())
                    .ok_or(AuthError::InvalidCredential)
            }
        }
    }

    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<Principal, AuthError> {
        self.check_online()?;
        let email = normalize_email(email);
        if !email.contains('@') || password.expose_secret().len() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidCredential);
        }
        if self.accounts.contains_key(&email) {
            return Err(AuthError::EmailInUse);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .hasher
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|e| AuthError::Network(format!("hashing failed: {e}")))?
            .to_string();

        let principal = Principal {
            uid: Uuid::new_v4().simple().to_string(),
            email: email.clone(),
            display_name: None,
        };
        self.accounts.insert(
            email,
            Account {
                principal: principal.clone(),
                password_hash,
            },
        );
        tracing::info!(uid = %principal.uid, "registered principal");
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.check_online()
    }
}
