//! # Preferences
//!
//! Small flags and values kept in the device's local storage.

use std::sync::Arc;

use domains::ports::KeyValueStore;

use crate::error::Result;

pub const PENDING_REFERRAL: &str = "pendingReferral";
pub const PWA_INSTALL_DISMISSED: &str = "pwaInstallDismissed";

pub fn hint_key(name: &str) -> String {
    format!("hint:{name}:dismissed")
}

#[derive(Clone)]
pub struct Preferences {
    local: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(local: Arc<dyn KeyValueStore>) -> Self {
        Self { local }
    }

    /// Referral code captured from a link, waiting for onboarding to finish.
    pub fn pending_referral(&self) -> Option<String> {
        self.local.get(PENDING_REFERRAL).filter(|code| !code.is_empty())
    }

    pub fn set_pending_referral(&self, code: &str) -> Result<()> {
        Ok(self.local.set(PENDING_REFERRAL, code)?)
    }

    pub fn clear_pending_referral(&self) -> Result<()> {
        Ok(self.local.remove(PENDING_REFERRAL)?)
    }

    pub fn is_hint_dismissed(&self, name: &str) -> bool {
        self.local.get(&hint_key(name)).as_deref() == Some("true")
    }

    pub fn dismiss_hint(&self, name: &str) -> Result<()> {
        Ok(self.local.set(&hint_key(name), "true")?)
    }

    pub fn is_install_prompt_dismissed(&self) -> bool {
        self.local.get(PWA_INSTALL_DISMISSED).as_deref() == Some("true")
    }

    pub fn dismiss_install_prompt(&self) -> Result<()> {
        Ok(self.local.set(PWA_INSTALL_DISMISSED, "true")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::errors::StorageError;
    use domains::ports::MockKeyValueStore;

    #[test]
    fn hints_use_namespaced_keys() {
        let mut local = MockKeyValueStore::new();
        local
            .expect_set()
            .withf(|key, value| key == "hint:groups:dismissed" && value == "true")
            .times(1)
            .returning(|_, _| Ok(()));
        local
            .expect_get()
            .withf(|key| key == "hint:groups:dismissed")
            .returning(|_| Some("true".to_string()));

        let prefs = Preferences::new(Arc::new(local));
        prefs.dismiss_hint("groups").unwrap();
        assert!(prefs.is_hint_dismissed("groups"));
    }

    #[test]
    fn storage_failures_surface() {
        let mut local = MockKeyValueStore::new();
        local
            .expect_set()
            .returning(|_, _| Err(StorageError::Io("disk full".into())));
        let prefs = Preferences::new(Arc::new(local));
        assert!(prefs.dismiss_install_prompt().is_err());
    }

    #[test]
    fn empty_pending_referral_counts_as_none() {
        let mut local = MockKeyValueStore::new();
        local.expect_get().returning(|_| Some(String::new()));
        let prefs = Preferences::new(Arc::new(local));
        assert_eq!(prefs.pending_referral(), None);
    }
}
