//! TTL cache for tag search results.
//!
//! [`TtlCache`] memoizes search results per key to bound the call volume
//! against a rate-limited inventory API. Each entry records its own
//! creation time and expires independently.
//!
//! # Semantics
//!
//! - **Disabled when unset**: a cache built without a TTL stores nothing and
//!   answers every `get` with `None`. It never means "cache forever".
//! - **Lazy expiry**: `get` removes an entry whose age exceeds the TTL.
//!   [`invalidate_expired`](TtlCache::invalidate_expired) sweeps eagerly.
//! - **Corrupt entries**: an entry without a creation time (as can happen
//!   with entries restored from elsewhere) is never trusted; `get` evicts it.
//!
//! All operations take one lock for their whole read-modify-write, so
//! concurrent lookups cannot observe a torn entry. Keys may embed secrets
//! and are never logged.
//!
//! ```
//! use std::time::Duration;
//! use autosign_inventory::TtlCache;
//!
//! let cache = TtlCache::new(Some(Duration::from_secs(30)));
//! cache.put("nd:auth", vec!["prod".to_string()]);
//! assert_eq!(cache.get("nd:auth"), Some(vec!["prod".to_string()]));
//!
//! let disabled = TtlCache::disabled();
//! disabled.put("nd:auth", vec!["prod".to_string()]);
//! assert_eq!(disabled.get("nd:auth"), None);
//! ```

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One cached search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached values, in the order they were stored.
    pub values: Vec<String>,
    /// When the entry was written. `None` marks a corrupt entry.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Creates an entry stamped with `created_at`.
    #[must_use]
    pub fn new(values: Vec<String>, created_at: DateTime<Utc>) -> Self {
        Self { values, created_at: Some(created_at) }
    }

    /// Returns `true` when the entry is older than `ttl` at `now`.
    ///
    /// Entries stamped in the future (clock skew) count as fresh.
    #[must_use]
    pub fn is_expired_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.created_at {
            Some(created_at) => age(created_at, now) > ttl,
            None => true,
        }
    }
}

/// Age of a timestamp at `now`, clamped at zero.
pub(crate) fn age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(created_at).to_std().unwrap_or(Duration::ZERO)
}

/// Per-key cache with a shared time-to-live.
#[derive(Debug, Default)]
pub struct TtlCache {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    /// Creates a cache. `None` disables caching.
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    /// Creates a cache that never stores anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Returns the configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Returns whether caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// Returns the cached values for `key`, if present and fresh.
    pub fn get(&self, key: &str) -> Option<Vec<String>> {
        self.get_at(key, Utc::now())
    }

    /// Stores `values` under `key`. Does nothing when caching is disabled.
    pub fn put(&self, key: impl Into<String>, values: Vec<String>) {
        self.put_at(key, values, Utc::now());
    }

    /// Inserts a raw entry without stamping it.
    ///
    /// Used to rehydrate entries persisted elsewhere; a restored entry is
    /// still subject to the usual expiry and corruption checks on `get`.
    pub fn restore(&self, key: impl Into<String>, entry: CacheEntry) {
        if self.ttl.is_some() {
            self.entries.lock().insert(key.into(), entry);
        }
    }

    /// Removes the entry for `key`.
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Removes every expired or corrupt entry and returns how many went.
    pub fn invalidate_expired(&self) -> usize {
        self.invalidate_expired_at(Utc::now())
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Returns the number of stored entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Vec<String>> {
        let ttl = self.ttl?;
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;

        if entry.created_at.is_none() {
            tracing::debug!("evicting cache entry without timestamp");
            entries.remove(key);
            return None;
        }

        if entry.is_expired_at(ttl, now) {
            tracing::debug!(ttl_secs = ttl.as_secs(), "cache entry expired");
            entries.remove(key);
            return None;
        }

        tracing::trace!("cache hit");
        Some(entry.values.clone())
    }

    fn put_at(&self, key: impl Into<String>, values: Vec<String>, now: DateTime<Utc>) {
        if self.ttl.is_none() {
            return;
        }
        self.entries.lock().insert(key.into(), CacheEntry::new(values, now));
    }

    fn invalidate_expired_at(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(ttl, now));
        before - entries.len()
    }
}
