//! Key/value lookup backed by inventory tags.
//!
//! [`TagLookup`] is the long-lived context a configuration-data lookup
//! service holds across calls: one shared [`InventoryClient`] (and so one
//! authenticated session per account) plus one [`TtlCache`]. A lookup key is
//! a tag expression; the answer is the list of values carried by matching
//! tags.
//!
//! ```
//! use std::sync::Arc;
//! use autosign_inventory::{
//!     InventoryClient, LookupConfig, MemoryInventory, ResolutionType, TagLookup, TaggedResource,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let account = MemoryInventory::with_resources("1", [TaggedResource::new(["hiera:role=web"])]);
//! let client = InventoryClient::new(vec![Arc::new(account)]);
//! let lookup = TagLookup::new(client, LookupConfig::new("hiera:"));
//!
//! let values = lookup
//!     .lookup(Some("hiera:role"), &Default::default(), None, ResolutionType::Priority)
//!     .await
//!     .unwrap();
//! assert_eq!(values, Some(vec!["web".to_string()]));
//! # });
//! ```

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{cache::TtlCache, error::InventoryResult, query::InventoryClient};

/// Variables in scope at the lookup site. Passed through, not interpreted.
pub type LookupScope = BTreeMap<String, String>;

/// How the caller intends to combine answers from several sources.
///
/// A tag lookup always answers with every value it found, so the resolution
/// type only appears in logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionType {
    /// First answer wins.
    #[default]
    Priority,
    /// Answers are concatenated.
    Array,
    /// Answers are merged as maps.
    Hash,
}

/// Settings for a [`TagLookup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupConfig {
    /// Keys not starting with this prefix are answered without a search.
    pub tag_prefix: String,
    /// Result lifetime. Unset disables caching.
    #[serde(default, with = "humantime_serde")]
    pub cache_timeout: Option<Duration>,
}

impl LookupConfig {
    /// Creates a config with caching disabled.
    #[must_use]
    pub fn new(tag_prefix: impl Into<String>) -> Self {
        Self { tag_prefix: tag_prefix.into(), cache_timeout: None }
    }

    /// Enables caching with the given lifetime.
    #[must_use]
    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = Some(timeout);
        self
    }
}

/// Shared lookup context.
#[derive(Debug)]
pub struct TagLookup {
    client: InventoryClient,
    cache: TtlCache,
    tag_prefix: String,
}

impl TagLookup {
    /// Creates a lookup context over `client`.
    #[must_use]
    pub fn new(client: InventoryClient, config: LookupConfig) -> Self {
        Self { client, cache: TtlCache::new(config.cache_timeout), tag_prefix: config.tag_prefix }
    }

    /// Returns the result cache.
    #[must_use]
    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Looks up the values tagged under `key`.
    ///
    /// Returns `Ok(None)` without touching the inventory when `key` is
    /// missing, empty, or outside the configured prefix. Otherwise returns
    /// the value part of every distinct matching tag; tags without a value
    /// contribute nothing.
    ///
    /// # Errors
    ///
    /// Propagates any inventory failure. Failures are not cached.
    #[tracing::instrument(
        skip(self, scope, order_override, resolution_type),
        fields(resolution = ?resolution_type)
    )]
    pub async fn lookup(
        &self,
        key: Option<&str>,
        scope: &LookupScope,
        order_override: Option<&str>,
        resolution_type: ResolutionType,
    ) -> InventoryResult<Option<Vec<String>>> {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        if !key.starts_with(&self.tag_prefix) {
            tracing::trace!(prefix = %self.tag_prefix, "key outside lookup prefix");
            return Ok(None);
        }

        tracing::debug!(scope_vars = scope.len(), order_override, "looking up key");
        let values = self.search(key).await?;
        tracing::debug!(count = values.len(), "lookup answered");
        Ok(Some(values))
    }

    async fn search(&self, key: &str) -> InventoryResult<Vec<String>> {
        if let Some(cached) = self.cache.get(key) {
            tracing::debug!("answered from cache");
            return Ok(cached);
        }

        let tags = self.client.get_tags_by_tag(key, true).await?;
        let values: Vec<String> = tags
            .iter()
            .filter_map(|tag| tag.split_once('=').map(|(_, value)| value.to_owned()))
            .collect();

        self.cache.put(key, values.clone());
        Ok(values)
    }
}
