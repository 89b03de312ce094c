//! # Referral store
//!
//! Every identity can own one `DAD`-prefixed code. Applying someone else's
//! code credits both sides once; the referee's `referrals/{uid}` document is
//! created as a batch precondition so a second referral is rejected.

use std::sync::Arc;

use domains::document::{collections, DocumentData, Update, WriteBatch};
use domains::errors::{ValidationError, WriteError};
use domains::models::{Referral, ReferralCode};
use rand::Rng;
use url::Url;

use crate::backend::{Backend, Rules};
use crate::credits::{self, Credit};
use crate::error::{Result, StoreError};
use crate::preferences::Preferences;
use crate::session::SessionStore;

pub const CODE_PREFIX: &str = "DAD";
const CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Fresh codes tried before giving up on collisions
const CODE_ATTEMPTS: usize = 5;

pub fn generate_code() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{CODE_PREFIX}{suffix}")
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Extracts the `ref` query parameter from an absolute or relative link.
pub fn referral_from_url(raw: &str) -> Result<Option<String>> {
    let invalid = |e: url::ParseError| ValidationError::new("url", e.to_string());
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost/")
            .and_then(|base| base.join(raw))
            .map_err(invalid)?,
        Err(e) => return Err(invalid(e).into()),
    };
    Ok(url
        .query_pairs()
        .find(|(key, _)| key == "ref")
        .map(|(_, value)| normalize_code(&value))
        .filter(|code| !code.is_empty()))
}

#[derive(Clone)]
pub struct ReferralStore {
    backend: Backend,
    session: SessionStore,
    rules: Arc<Rules>,
    preferences: Preferences,
}

impl ReferralStore {
    pub fn new(backend: Backend, session: SessionStore, rules: Arc<Rules>, preferences: Preferences) -> Self {
        Self {
            backend,
            session,
            rules,
            preferences,
        }
    }

    /// The caller's referral code, created on first request.
    pub async fn my_code(&self) -> Result<String> {
        let identity = self.session.require_active()?;
        if let Some(code) = identity.referral_code {
            return Ok(code);
        }

        for _ in 0..CODE_ATTEMPTS {
            let code = generate_code();
            let record = ReferralCode {
                owner_id: identity.id.clone(),
                ..ReferralCode::default()
            };
            let batch = WriteBatch::new()
                .create(
                    collections::REFERRAL_CODES,
                    code.clone(),
                    DocumentData::from_record(&record)?.with_server_timestamp("createdAt"),
                )
                .update(
                    collections::USERS,
                    identity.id.clone(),
                    Update::new().set("referralCode", code.as_str()),
                );
            match self.backend.documents.commit(batch).await {
                Ok(()) => {
                    tracing::info!(uid = %identity.id, code = %code, "referral code issued");
                    self.session.update_identity(|i| i.referral_code = Some(code.clone()));
                    return Ok(code);
                }
                Err(WriteError::AlreadyExists(_)) => {
                    tracing::debug!(code = %code, "referral code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(WriteError::ResourceExhausted("could not allocate a referral code".into()).into())
    }

    /// Applies `code` for the caller. Returns `false` without changing
    /// anything for unknown codes, one's own code, or an identity that was
    /// already referred.
    pub async fn apply_referral(&self, code: &str) -> Result<bool> {
        let referee = self.session.require_active()?;
        let code = normalize_code(code);
        if code.is_empty() || referee.referred_by.is_some() {
            return Ok(false);
        }

        let documents = &self.backend.documents;
        let Some(doc) = documents.get(collections::REFERRAL_CODES, &code).await? else {
            tracing::info!(code = %code, "unknown referral code");
            return Ok(false);
        };
        let owner = doc.decode::<ReferralCode>()?.owner_id;
        if owner == referee.id {
            return Ok(false);
        }
        let record = Referral {
            code: code.clone(),
            referrer_id: owner.clone(),
            ..Referral::default()
        };
        let payouts = [
            Credit::new(owner.clone(), self.rules.referrer_bonus),
            Credit::new(referee.id.clone(), self.rules.referee_bonus),
        ];
        let result = credits::commit_with_credits(&self.backend, &self.rules, &payouts, |batch, _| {
            Ok(batch
                .create(
                    collections::REFERRALS,
                    referee.id.clone(),
                    DocumentData::from_record(&record)?.with_server_timestamp("createdAt"),
                )
                .update(collections::REFERRAL_CODES, code.clone(), Update::new().increment("uses", 1))
                .update(collections::USERS, owner.clone(), Update::new().increment("referralCount", 1))
                .update(collections::USERS, referee.id.clone(), Update::new().set("referredBy", owner.as_str())))
        })
        .await;

        let stored = match result {
            Ok(stored) => stored,
            Err(StoreError::Write(WriteError::AlreadyExists(_))) => return Ok(false),
            Err(e) => return Err(e),
        };

        self.session.update_identity(|i| {
            i.referred_by = Some(owner.clone());
            if let Some(stats) = stored.get(1) {
                i.stats.points = stats.points;
                i.stats.xp = stats.xp;
                i.stats.level = stats.level;
            }
        });
        tracing::info!(referee = %referee.id, referrer = %owner, code = %code, "referral applied");
        Ok(true)
    }

    /// Remembers the `?ref=` code of a landing link until onboarding is
    /// done. An already pending code is kept.
    pub fn capture_from_url(&self, url: &str) -> Result<Option<String>> {
        if let Some(pending) = self.preferences.pending_referral() {
            return Ok(Some(pending));
        }
        let code = referral_from_url(url)?;
        if let Some(code) = &code {
            self.preferences.set_pending_referral(code)?;
            tracing::debug!(code = %code, "captured pending referral");
        }
        Ok(code)
    }

    /// Applies the pending code, if any. The code is dropped once it has
    /// been tried; it stays pending only when the attempt errored.
    pub async fn consume_pending(&self) -> Result<Option<bool>> {
        let Some(code) = self.preferences.pending_referral() else {
            return Ok(None);
        };
        let applied = self.apply_referral(&code).await?;
        self.preferences.clear_pending_referral()?;
        Ok(Some(applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_have_the_expected_shape() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_PREFIX.len() + CODE_LEN);
            assert!(code.starts_with(CODE_PREFIX));
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn ref_parameter_is_read_from_absolute_and_relative_links() {
        assert_eq!(
            referral_from_url("https://dadhub.app/signup?utm=x&ref=dadabc123").unwrap(),
            Some("DADABC123".to_string())
        );
        assert_eq!(referral_from_url("/?ref=DADZZZ999").unwrap(), Some("DADZZZ999".to_string()));
        assert_eq!(referral_from_url("https://dadhub.app/").unwrap(), None);
        assert_eq!(referral_from_url("https://dadhub.app/?ref=").unwrap(), None);
    }

    #[test]
    fn malformed_links_are_validation_errors() {
        assert!(matches!(referral_from_url("http://[::1"), Err(StoreError::Validation(_))));
    }
}
