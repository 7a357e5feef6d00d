//! Sticky placement memory
//!
//! Soft state: losing it only costs cache locality, so it lives in
//! process memory and is never persisted.

use crate::worker::TeamId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Resource identity plus the team asking for it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AffinityKey {
    pub resource: String,
    pub team: Option<TeamId>,
}

impl AffinityKey {
    pub fn new(resource: impl Into<String>, team: Option<TeamId>) -> Self {
        Self {
            resource: resource.into(),
            team,
        }
    }
}

/// Keyed store of the last worker chosen per (resource, team)
#[derive(Debug, Default)]
pub struct AffinityStore {
    entries: Mutex<HashMap<AffinityKey, String>>,
}

impl AffinityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last worker remembered for `key`
    pub fn get(&self, key: &AffinityKey) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Remember `worker` for `key`, replacing any previous choice
    pub fn remember(&self, key: AffinityKey, worker: &str) {
        self.entries.lock().insert(key, worker.to_string());
    }

    /// Drop the entry for `key`
    pub fn forget(&self, key: &AffinityKey) {
        self.entries.lock().remove(key);
    }

    /// Drop every entry pointing at `worker`; returns how many were removed
    pub fn forget_worker(&self, worker: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, name| name != worker);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_and_forget() {
        let store = AffinityStore::new();
        let key = AffinityKey::new("pipeline/some-resource", Some(TeamId::new("main")));

        assert_eq!(store.get(&key), None);
        store.remember(key.clone(), "w1");
        assert_eq!(store.get(&key).as_deref(), Some("w1"));

        store.remember(key.clone(), "w2");
        assert_eq!(store.get(&key).as_deref(), Some("w2"));

        store.forget(&key);
        assert!(store.is_empty());
    }

    #[test]
    fn keys_are_team_scoped() {
        let store = AffinityStore::new();
        let main = AffinityKey::new("r", Some(TeamId::new("main")));
        let other = AffinityKey::new("r", Some(TeamId::new("other")));

        store.remember(main.clone(), "team-worker");
        assert_eq!(store.get(&other), None);
    }

    #[test]
    fn forget_worker_expires_all_its_entries() {
        let store = AffinityStore::new();
        store.remember(AffinityKey::new("a", None), "w1");
        store.remember(AffinityKey::new("b", None), "w1");
        store.remember(AffinityKey::new("c", None), "w2");

        assert_eq!(store.forget_worker("w1"), 2);
        assert_eq!(store.len(), 1);
    }
}
