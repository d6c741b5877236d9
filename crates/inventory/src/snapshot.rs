//! Layered TTL cache with optional JSON persistence.
//!
//! A [`SnapshotCache`] holds named sections of flat `key → value` facts.
//! Two clocks govern expiry:
//!
//! - the snapshot as a whole expires after [`SnapshotPolicy::snapshot_ttl`]
//!   (hours-scale), at which point every section is dropped at once;
//! - individual volatile sections may carry a shorter TTL (seconds-scale)
//!   and expire on their own while the rest of the snapshot stays warm.
//!
//! The cache can be persisted to a JSON file and reloaded by a later
//! process. A file that cannot be parsed, or that lacks the snapshot
//! timestamp, is discarded rather than trusted.

use std::{
    collections::{BTreeMap, HashMap},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    cache::age,
    error::{InventoryError, InventoryResult},
};

/// Default lifetime of a whole snapshot.
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Default lifetime of the volatile `tags` section.
pub const DEFAULT_TAGS_TTL: Duration = Duration::from_secs(60);

/// Where fact snapshots are persisted unless configured otherwise.
pub const DEFAULT_SNAPSHOT_PATH: &str = "/var/tmp/autosign-facts.json";

/// Flat facts stored in one section.
pub type Facts = BTreeMap<String, String>;

/// Expiry policy for a [`SnapshotCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPolicy {
    snapshot_ttl: Duration,
    section_ttls: HashMap<String, Duration>,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_TTL).with_section_ttl("tags", DEFAULT_TAGS_TTL)
    }
}

impl SnapshotPolicy {
    /// Creates a policy with no volatile sections.
    #[must_use]
    pub fn new(snapshot_ttl: Duration) -> Self {
        Self { snapshot_ttl, section_ttls: HashMap::new() }
    }

    /// Gives `section` its own, independent TTL.
    #[must_use]
    pub fn with_section_ttl(mut self, section: impl Into<String>, ttl: Duration) -> Self {
        self.section_ttls.insert(section.into(), ttl);
        self
    }

    /// Returns the whole-snapshot TTL.
    #[must_use]
    pub fn snapshot_ttl(&self) -> Duration {
        self.snapshot_ttl
    }

    /// Returns the TTL of `section`, if it is volatile.
    #[must_use]
    pub fn section_ttl(&self, section: &str) -> Option<Duration> {
        self.section_ttls.get(section).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Section {
    fetched_at: DateTime<Utc>,
    facts: Facts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    sections: BTreeMap<String, Section>,
}

#[derive(Debug, Default)]
struct State {
    snapshot: Snapshot,
    dirty: bool,
}

/// Named fact sections under a layered expiry policy.
#[derive(Debug)]
pub struct SnapshotCache {
    policy: SnapshotPolicy,
    path: Option<PathBuf>,
    state: Mutex<State>,
}

impl SnapshotCache {
    /// Creates an empty, memory-only cache.
    #[must_use]
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self { policy, path: None, state: Mutex::new(State::default()) }
    }

    /// Creates a cache backed by `path`, loading whatever it holds.
    ///
    /// A missing file yields an empty cache. A corrupt file, or one without
    /// a snapshot timestamp, is discarded with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Internal`] when the file exists but cannot
    /// be read.
    pub fn load(policy: SnapshotPolicy, path: impl Into<PathBuf>) -> InventoryResult<Self> {
        let path = path.into();
        let snapshot = match std::fs::read(&path) {
            Ok(bytes) => parse_snapshot(&path, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no persisted snapshot");
                Snapshot::default()
            },
            Err(e) => {
                return Err(InventoryError::internal_with_source(
                    format!("failed to read snapshot file {}", path.display()),
                    e,
                ));
            },
        };

        Ok(Self {
            policy,
            path: Some(path),
            state: Mutex::new(State { snapshot, dirty: false }),
        })
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    /// Returns the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the facts of `section` if they are still fresh.
    pub fn section(&self, section: &str) -> Option<Facts> {
        self.section_at(section, Utc::now())
    }

    /// Stores `facts` as the content of `section`.
    pub fn store(&self, section: impl Into<String>, facts: Facts) {
        self.store_at(section, facts, Utc::now());
    }

    /// Returns `true` when the cache holds changes not yet persisted.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Drops every section.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.snapshot = Snapshot::default();
        state.dirty = true;
    }

    /// Writes the cache to its backing file if it changed since loading.
    ///
    /// Writes go to a sibling temporary file first and are renamed into
    /// place. Memory-only caches and clean caches are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Serialization`] if encoding fails, or
    /// [`InventoryError::Internal`] if the file cannot be written.
    pub fn persist(&self) -> InventoryResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = {
            let state = self.state.lock();
            if !state.dirty {
                return Ok(());
            }
            serde_json::to_vec_pretty(&state.snapshot).map_err(|e| {
                InventoryError::serialization_with_source("failed to encode snapshot", e)
            })?
        };

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| {
            InventoryError::internal_with_source(format!("failed to write {}", tmp.display()), e)
        })?;
        std::fs::rename(&tmp, path).map_err(|e| {
            InventoryError::internal_with_source(format!("failed to replace {}", path.display()), e)
        })?;

        self.state.lock().dirty = false;
        tracing::debug!(path = %path.display(), "persisted fact snapshot");
        Ok(())
    }

    fn section_at(&self, section: &str, now: DateTime<Utc>) -> Option<Facts> {
        let mut state = self.state.lock();
        self.expire(&mut state, now);

        let entry = state.snapshot.sections.get(section)?;
        if let Some(ttl) = self.policy.section_ttl(section)
            && age(entry.fetched_at, now) > ttl
        {
            tracing::debug!(section, "volatile section expired");
            state.snapshot.sections.remove(section);
            state.dirty = true;
            return None;
        }

        state.snapshot.sections.get(section).map(|entry| entry.facts.clone())
    }

    fn store_at(&self, section: impl Into<String>, facts: Facts, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        self.expire(&mut state, now);

        if state.snapshot.created_at.is_none() {
            state.snapshot.created_at = Some(now);
        }
        state.snapshot.sections.insert(section.into(), Section { fetched_at: now, facts });
        state.dirty = true;
    }

    fn expire(&self, state: &mut State, now: DateTime<Utc>) {
        let Some(created_at) = state.snapshot.created_at else {
            return;
        };
        let snapshot_age = age(created_at, now);
        if snapshot_age > self.policy.snapshot_ttl {
            tracing::debug!(age_secs = snapshot_age.as_secs(), "fact snapshot expired");
            state.snapshot = Snapshot::default();
            state.dirty = true;
        }
    }
}

fn parse_snapshot(path: &Path, bytes: &[u8]) -> Snapshot {
    match serde_json::from_slice::<Snapshot>(bytes) {
        Ok(snapshot) if snapshot.created_at.is_some() => {
            tracing::debug!(
                path = %path.display(),
                sections = snapshot.sections.len(),
                "loaded fact snapshot"
            );
            snapshot
        },
        Ok(_) => {
            tracing::warn!(path = %path.display(), "discarding snapshot without timestamp");
            Snapshot::default()
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "discarding unreadable snapshot");
            Snapshot::default()
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn facts(pairs: &[(&str, &str)]) -> Facts {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    fn policy() -> SnapshotPolicy {
        SnapshotPolicy::new(Duration::from_secs(3600))
            .with_section_ttl("tags", Duration::from_secs(60))
    }

    #[test]
    fn test_default_policy() {
        let policy = SnapshotPolicy::default();
        assert_eq!(policy.snapshot_ttl(), DEFAULT_SNAPSHOT_TTL);
        assert_eq!(policy.section_ttl("tags"), Some(DEFAULT_TAGS_TTL));
        assert_eq!(policy.section_ttl("instance"), None);
    }

    #[test]
    fn test_volatile_section_expires_alone() {
        let cache = SnapshotCache::new(policy());
        let start = Utc::now();
        cache.store_at("instance", facts(&[("rs_name", "web")]), start);
        cache.store_at("tags", facts(&[("rs_tag_nd_auth", "abc")]), start);

        let later = start + TimeDelta::seconds(61);
        assert_eq!(cache.section_at("tags", later), None);
        assert_eq!(cache.section_at("instance", later), Some(facts(&[("rs_name", "web")])));
    }

    #[test]
    fn test_refreshed_volatile_section_uses_its_own_clock() {
        let cache = SnapshotCache::new(policy());
        let start = Utc::now();
        cache.store_at("instance", facts(&[]), start);
        cache.store_at("tags", facts(&[("a", "1")]), start + TimeDelta::seconds(100));

        assert!(cache.section_at("tags", start + TimeDelta::seconds(150)).is_some());
    }

    #[test]
    fn test_whole_snapshot_expires() {
        let cache = SnapshotCache::new(policy());
        let start = Utc::now();
        cache.store_at("instance", facts(&[("rs_name", "web")]), start);
        cache.store_at("links", facts(&[("rs_link_self", "/x")]), start);

        let later = start + TimeDelta::seconds(3601);
        assert_eq!(cache.section_at("instance", later), None);
        assert_eq!(cache.section_at("links", later), None);

        // A store after expiry starts a new snapshot clock.
        cache.store_at("instance", facts(&[("rs_name", "db")]), later);
        assert!(cache.section_at("instance", later + TimeDelta::seconds(3000)).is_some());
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");

        let cache = SnapshotCache::load(policy(), &path).unwrap();
        assert!(!cache.is_dirty());
        cache.store("instance", facts(&[("rs_name", "web")]));
        assert!(cache.is_dirty());
        cache.persist().unwrap();
        assert!(!cache.is_dirty());

        let reloaded = SnapshotCache::load(policy(), &path).unwrap();
        assert_eq!(reloaded.section("instance"), Some(facts(&[("rs_name", "web")])));
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn test_file_without_timestamp_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        std::fs::write(
            &path,
            r#"{"sections":{"instance":{"fetched_at":"2024-01-01T00:00:00Z","facts":{"a":"b"}}}}"#,
        )
        .unwrap();

        let cache = SnapshotCache::load(policy(), &path).unwrap();
        assert_eq!(cache.section("instance"), None);
    }

    #[test]
    fn test_unparseable_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        std::fs::write(&path, b"not json").unwrap();

        let cache = SnapshotCache::load(policy(), &path).unwrap();
        assert_eq!(cache.section("instance"), None);
    }

    #[test]
    fn test_memory_only_persist_is_noop() {
        let cache = SnapshotCache::new(policy());
        cache.store("instance", facts(&[]));
        cache.persist().unwrap();
        assert!(cache.path().is_none());
    }
}
