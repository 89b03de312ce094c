//! # DadHub
//!
//! Composition root: builds every store over one `Backend` and ties their
//! lifecycles to the session.

use std::sync::Arc;

use domains::models::Identity;

use crate::admin::AdminStore;
use crate::backend::{Backend, Rules};
use crate::chat::ChatStore;
use crate::discussions::DiscussionStore;
use crate::error::Result;
use crate::friends::FriendStore;
use crate::gamification::GamificationStore;
use crate::groups::GroupStore;
use crate::preferences::Preferences;
use crate::referrals::ReferralStore;
use crate::reports::ReportStore;
use crate::session::{ProfileSetup, SessionStore};

#[derive(Clone)]
pub struct DadHub {
    pub session: SessionStore,
    pub discussions: DiscussionStore,
    pub chat: ChatStore,
    pub groups: GroupStore,
    pub friends: FriendStore,
    pub admin: AdminStore,
    pub reports: ReportStore,
    pub referrals: ReferralStore,
    pub gamification: GamificationStore,
    pub preferences: Preferences,
}

impl DadHub {
    pub fn new(backend: Backend, rules: Rules) -> Self {
        let rules = Arc::new(rules);
        let session = SessionStore::new(backend.clone(), Arc::clone(&rules));
        let preferences = Preferences::new(Arc::clone(&backend.local));

        Self {
            discussions: DiscussionStore::new(backend.clone(), session.clone(), Arc::clone(&rules)),
            chat: ChatStore::new(backend.clone(), session.clone()),
            groups: GroupStore::new(backend.clone(), session.clone(), Arc::clone(&rules)),
            friends: FriendStore::new(backend.clone(), session.clone(), Arc::clone(&rules)),
            admin: AdminStore::new(backend.clone(), session.clone()),
            reports: ReportStore::new(backend.clone(), session.clone()),
            referrals: ReferralStore::new(backend.clone(), session.clone(), Arc::clone(&rules), preferences.clone()),
            gamification: GamificationStore::new(backend, session.clone(), rules),
            preferences,
            session,
        }
    }

    /// Completes profile setup, then applies a referral captured before
    /// sign-up. A failed referral does not undo the profile.
    pub async fn finish_onboarding(&self, profile: ProfileSetup) -> Result<Identity> {
        let identity = self.session.complete_profile_setup(profile).await?;
        match self.referrals.consume_pending().await {
            Ok(Some(true)) => return Ok(self.session.require_identity()?),
            Ok(Some(false)) => tracing::info!(uid = %identity.id, "pending referral was not applicable"),
            Ok(None) => {}
            Err(e) => tracing::warn!(uid = %identity.id, error = %e, "pending referral could not be applied"),
        }
        Ok(identity)
    }

    /// Releases every subscription and mirror, then ends the session.
    pub async fn sign_out(&self) {
        self.discussions.stop().await;
        self.chat.stop().await;
        self.groups.stop().await;
        self.friends.stop().await;
        self.admin.clear();
        self.gamification.leaderboard_mirror().replace(Vec::new());
        self.session.sign_out().await;
    }
}
