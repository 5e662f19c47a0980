//! Short-lived credential capture.
//!
//! At most one credential is held, and only for the active correlation key.
//! Capturing for a different key replaces the old entry outright so a token
//! can never leak from one report into another.

use factsheet_core_types::CorrelationKey;
use tracing::debug;

#[derive(Default)]
pub struct CredentialCache {
    active: Option<(CorrelationKey, String)>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the latest credential seen for `key`.
    pub fn capture(&mut self, key: &CorrelationKey, credential: &str) {
        if let Some((current, _)) = &self.active {
            if current != key {
                debug!(target: "report_tap", old = %current, new = %key, "credential replaced for new report");
            }
        }
        self.active = Some((key.clone(), credential.to_string()));
    }

    pub fn get(&self, key: &CorrelationKey) -> Option<&str> {
        match &self.active {
            Some((current, credential)) if current == key => Some(credential.as_str()),
            _ => None,
        }
    }

    /// Drops the credential for `key`, e.g. after a request using it failed.
    pub fn invalidate(&mut self, key: &CorrelationKey) -> bool {
        if matches!(&self.active, Some((current, _)) if current == key) {
            self.active = None;
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_is_scoped_to_its_key() {
        let mut cache = CredentialCache::new();
        let a = CorrelationKey::from("a");
        let b = CorrelationKey::from("b");

        cache.capture(&a, "token-a");
        assert_eq!(cache.get(&a), Some("token-a"));
        assert_eq!(cache.get(&b), None);

        cache.capture(&b, "token-b");
        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.get(&b), Some("token-b"));
    }

    #[test]
    fn invalidate_only_drops_matching_key() {
        let mut cache = CredentialCache::new();
        let a = CorrelationKey::from("a");
        cache.capture(&a, "token");
        assert!(!cache.invalidate(&CorrelationKey::from("other")));
        assert!(cache.invalidate(&a));
        assert!(cache.is_empty());
    }
}
