use std::collections::HashSet;

use parley_core::identity::{IdentityResolver, normalize_name};
use tracing::debug;

/// The server-authoritative set of online identities.
///
/// Names are trimmed and deduplicated case-insensitively; the first spelling
/// seen is kept for display, and arrival order is preserved.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    online: Vec<String>,
    keys: HashSet<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole roster with a server snapshot.
    ///
    /// Returns `true` if the online set changed.
    pub fn replace_roster<I, S>(&mut self, names: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = PresenceTracker::new();
        for name in names {
            next.insert(name.as_ref());
        }

        let changed = next.keys != self.keys;
        *self = next;
        debug!(online = self.online.len(), changed, "roster replaced");
        changed
    }

    /// Mark `name` online. Returns `true` if it was not already online.
    pub fn add(&mut self, name: &str) -> bool {
        self.insert(name)
    }

    /// Mark `name` offline. Returns `true` if it was online.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = normalize_name(name);
        if !self.keys.remove(&key) {
            return false;
        }
        self.online.retain(|online| normalize_name(online) != key);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains(&normalize_name(name))
    }

    /// Online names in arrival order.
    pub fn online(&self) -> &[String] {
        &self.online
    }

    /// Online names with the local user filtered out.
    pub fn online_except_self(&self, identity: &IdentityResolver) -> Vec<String> {
        self.online
            .iter()
            .filter(|name| !identity.is_self(name))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    fn insert(&mut self, name: &str) -> bool {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return false;
        }

        if !self.keys.insert(normalize_name(trimmed)) {
            return false;
        }
        self.online.push(trimmed.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_roster_trims_and_dedups() {
        let mut tracker = PresenceTracker::new();
        let changed = tracker.replace_roster([" Sara ", "sara", "Ahmed", "", "  "]);

        assert!(changed);
        assert_eq!(tracker.online(), &["Sara".to_string(), "Ahmed".to_string()]);
    }

    #[test]
    fn replacing_with_identical_roster_is_idempotent() {
        let mut tracker = PresenceTracker::new();
        tracker.replace_roster(["Ahmed", "Sara", "Mona"]);
        let before = tracker.online().to_vec();

        let changed = tracker.replace_roster(["Ahmed", "Sara", "Mona"]);

        assert!(!changed);
        assert_eq!(tracker.online(), before.as_slice());
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn replace_roster_drops_users_missing_from_snapshot() {
        let mut tracker = PresenceTracker::new();
        tracker.replace_roster(["Ahmed", "Sara"]);
        tracker.replace_roster(["Sara"]);

        assert!(!tracker.contains("Ahmed"));
        assert!(tracker.contains("SARA"));
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let mut tracker = PresenceTracker::new();

        assert!(tracker.add("Sara"));
        assert!(!tracker.add(" sara "));
        assert_eq!(tracker.len(), 1);

        assert!(tracker.remove("SARA"));
        assert!(!tracker.remove("Sara"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn online_except_self_filters_local_user() {
        let mut tracker = PresenceTracker::new();
        tracker.replace_roster(["Ahmed", "Sara"]);
        let identity = IdentityResolver::new(Some("Ahmed"), None);

        assert_eq!(tracker.online_except_self(&identity), vec!["Sara".to_string()]);
    }
}
