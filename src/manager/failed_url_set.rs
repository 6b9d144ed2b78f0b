//! Process-wide memoization of URLs that have failed with a non-transient error.

use dashmap::DashSet;

use crate::key::CacheKey;

/// URLs whose most recent fetch failed with an error that
/// [`crate::error::Error::enters_failed_url_set`] classifies as non-transient.
/// Consulted by [`super::Manager::load`] before issuing a new fetch, unless
/// the caller sets [`super::ManagerOptions::retry_failed`]. Cleared entirely
/// on process restart (it holds no persistent state) and per-entry on a
/// subsequent successful fetch.
#[derive(Default)]
pub struct FailedUrlSet {
    keys: DashSet<String>,
}

impl FailedUrlSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.keys.contains(key.as_str())
    }

    pub fn insert(&self, key: &CacheKey) {
        self.keys.insert(key.as_str().to_owned());
    }

    pub fn remove(&self, key: &CacheKey) {
        self.keys.remove(key.as_str());
    }

    pub fn clear(&self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_remove_round_trips() {
        let set = FailedUrlSet::new();
        let key = CacheKey::new("https://example.com/a.png");
        assert!(!set.contains(&key));
        set.insert(&key);
        assert!(set.contains(&key));
        set.remove(&key);
        assert!(!set.contains(&key));
    }
}
