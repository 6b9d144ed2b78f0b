//! Cache keys and the pluggable URL -> key derivation hook.

use std::fmt;

use sha2::{Digest, Sha256};

/// An opaque cache key. Keys are derived from URLs via a [`KeyFilter`]; the
/// default filter just uses the URL's string form. Keys are arbitrary-length
/// strings to both layers of the cache; the disk layer hashes them down to a
/// filesystem-safe filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A 32-hex-digit digest suitable for use as a disk filename.
    pub fn digest_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let full = hasher.finalize();
        hex::encode(&full[..16])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(url: &str) -> Self {
        Self(url.to_owned())
    }
}

impl From<String> for CacheKey {
    fn from(url: String) -> Self {
        Self(url)
    }
}

/// Derives a [`CacheKey`] from a URL. The default implementation is the
/// identity function over the URL string; hosts can plug in a different
/// filter (e.g. to strip query-string cache-busting parameters) by providing
/// their own closure to [`crate::manager::Manager::with_key_filter`].
pub type KeyFilter = dyn Fn(&str) -> CacheKey + Send + Sync;

pub fn default_key_filter(url: &str) -> CacheKey {
    CacheKey::new(url)
}
