//! # Backend bundle
//!
//! The ports every store is built from, plus the tunable rules of the
//! application. Stores receive these explicitly instead of reaching for
//! ambient state.

use std::sync::Arc;

use domains::ports::{Clock, DocumentStore, IdentityProvider, KeyValueStore, ObjectStorage};

#[derive(Clone)]
pub struct Backend {
    pub documents: Arc<dyn DocumentStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub objects: Arc<dyn ObjectStorage>,
    pub local: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

/// Gameplay and seeding constants.
#[derive(Debug, Clone, PartialEq)]
pub struct Rules {
    /// Emails that receive the admin role on profile setup
    pub admin_emails: Vec<String>,
    pub admin_seed_points: i64,
    pub admin_seed_level: u32,
    pub xp_per_level: i64,
    pub check_in_points: i64,
    pub spin_prizes: Vec<i64>,
    pub referrer_bonus: i64,
    pub referee_bonus: i64,
    /// Items mirrored per live feed
    pub page_size: usize,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            admin_emails: vec!["admin@dadhub.com".to_string()],
            admin_seed_points: 1000,
            admin_seed_level: 5,
            xp_per_level: 250,
            check_in_points: 10,
            spin_prizes: vec![5, 10, 25, 50, 100],
            referrer_bonus: 100,
            referee_bonus: 50,
            page_size: 50,
        }
    }
}

impl Rules {
    pub fn is_reserved_admin(&self, email: &str) -> bool {
        let email = email.trim();
        self.admin_emails.iter().any(|admin| admin.eq_ignore_ascii_case(email))
    }

    pub fn level_for(&self, xp: i64) -> u32 {
        let per_level = self.xp_per_level.max(1);
        let level = 1 + xp.max(0) / per_level;
        u32::try_from(level).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_emails_match_case_insensitively() {
        let rules = Rules::default();
        assert!(rules.is_reserved_admin(" Admin@DadHub.com"));
        assert!(!rules.is_reserved_admin("dad@dadhub.com"));
    }

    #[test]
    fn levels_follow_xp() {
        let rules = Rules::default();
        assert_eq!(rules.level_for(0), 1);
        assert_eq!(rules.level_for(249), 1);
        assert_eq!(rules.level_for(250), 2);
        assert_eq!(rules.level_for(1000), 5);
        assert_eq!(rules.level_for(-10), 1);
    }
}
