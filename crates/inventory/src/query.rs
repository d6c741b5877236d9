//! Tag search fan-out across inventory accounts.
//!
//! [`InventoryClient`] owns one [`TagSearchBackend`] per configured account
//! and turns a tag search into one call per account, merging every returned
//! tag name into a single sorted list.
//!
//! # Merge Semantics
//!
//! ```text
//! search("nd:auth", "nd:auth=abc")
//!   → account 1 ─┐
//!   → account 2 ─┼─ await all → flatten (account order) → sort → [dedup]
//!   → account n ─┘
//! ```
//!
//! - Accounts are searched concurrently, bounded by `max_concurrency`.
//! - Each account call is bounded by `account_timeout`.
//! - Any account failure fails the whole search. A partial answer could
//!   hide a duplicate tag living in the failed account.
//! - The merged list is sorted, so the result does not depend on which
//!   account answered first. Deduplication is optional because callers
//!   that count matches need to see duplicates.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    backend::{TagQuery, TagSearchBackend, TaggedResource},
    error::{InventoryError, InventoryResult},
    tag::{TagExpression, search_prefix},
};

/// Default number of accounts searched at the same time.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default upper bound for one account search, retries included.
pub const DEFAULT_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fan-out settings for [`InventoryClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    /// Maximum number of accounts searched concurrently.
    #[serde(default = "default_max_concurrency")]
    max_concurrency: usize,

    /// Upper bound for one account search.
    #[serde(with = "humantime_serde", default = "default_account_timeout")]
    account_timeout: Duration,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_account_timeout() -> Duration {
    DEFAULT_ACCOUNT_TIMEOUT
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { max_concurrency: DEFAULT_MAX_CONCURRENCY, account_timeout: DEFAULT_ACCOUNT_TIMEOUT }
    }
}

impl QueryConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Config`] if `max_concurrency` is zero or
    /// `account_timeout` is zero.
    pub fn new(max_concurrency: usize, account_timeout: Duration) -> InventoryResult<Self> {
        if max_concurrency == 0 {
            return Err(InventoryError::config("max_concurrency must be at least 1"));
        }
        if account_timeout.is_zero() {
            return Err(InventoryError::config("account_timeout must be non-zero"));
        }
        Ok(Self { max_concurrency, account_timeout })
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Returns the per-account timeout.
    #[must_use]
    pub fn account_timeout(&self) -> Duration {
        self.account_timeout
    }
}

/// Searches every configured account and merges the results.
///
/// Cloning is cheap; clones share the same backends, and therefore the
/// same memoized credentials.
#[derive(Clone)]
pub struct InventoryClient {
    backends: Arc<[Arc<dyn TagSearchBackend>]>,
    config: QueryConfig,
}

impl std::fmt::Debug for InventoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryClient")
            .field("accounts", &self.accounts().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl InventoryClient {
    /// Creates a client over the given account backends with default settings.
    #[must_use]
    pub fn new(backends: Vec<Arc<dyn TagSearchBackend>>) -> Self {
        Self::with_config(backends, QueryConfig::default())
    }

    /// Creates a client with explicit fan-out settings.
    #[must_use]
    pub fn with_config(backends: Vec<Arc<dyn TagSearchBackend>>, config: QueryConfig) -> Self {
        Self { backends: backends.into(), config }
    }

    /// Returns the identifiers of the configured accounts, in order.
    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|backend| backend.account_id())
    }

    /// Searches for `tag` given as a tag expression.
    ///
    /// The namespace and predicate of `tag` build the search prefix and the
    /// tag itself is the match criterion.
    ///
    /// # Errors
    ///
    /// Propagates the first account failure.
    pub async fn get_tags_by_tag(&self, tag: &str, dedup: bool) -> InventoryResult<Vec<String>> {
        let expr = TagExpression::parse(tag);
        self.search_by_tag_prefix(expr.namespace(), expr.predicate(), tag, dedup).await
    }

    /// Searches every account for resources carrying `full_tag`.
    ///
    /// Returns every tag name (under the `namespace:predicate` prefix) of
    /// every matched resource across every account, sorted. With `dedup`
    /// the list is also made unique.
    ///
    /// # Errors
    ///
    /// Propagates the first account failure, including
    /// [`InventoryError::Timeout`] when an account exceeds its time bound.
    #[tracing::instrument(skip(self, full_tag), fields(accounts = self.backends.len()))]
    pub async fn search_by_tag_prefix(
        &self,
        namespace: &str,
        predicate: Option<&str>,
        full_tag: &str,
        dedup: bool,
    ) -> InventoryResult<Vec<String>> {
        let query = Arc::new(TagQuery::instances(search_prefix(namespace, predicate), full_tag));
        let per_account = self.fan_out(query).await?;

        let mut results: Vec<String> = per_account
            .into_iter()
            .flatten()
            .flat_map(|resource| resource.tags)
            .collect();
        results.sort();
        if dedup {
            results.dedup();
        }

        tracing::debug!(matches = results.len(), dedup, "merged tag search results");
        Ok(results)
    }

    /// Runs `query` against every account, returning results in account order.
    async fn fan_out(&self, query: Arc<TagQuery>) -> InventoryResult<Vec<Vec<TaggedResource>>> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency));
        let timeout = self.config.account_timeout;
        let mut set = JoinSet::new();

        for (index, backend) in self.backends.iter().enumerate() {
            let backend = Arc::clone(backend);
            let query = Arc::clone(&query);
            let permits = Arc::clone(&permits);

            set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| {
                        InventoryError::internal_with_source("fan-out semaphore closed", e)
                    })?;

                tracing::info!(
                    account = backend.account_id(),
                    prefix = %query.tag_prefix,
                    "searching account for instances with tag"
                );
                let resources = match tokio::time::timeout(timeout, backend.search(&query)).await {
                    Ok(result) => result?,
                    Err(_elapsed) => {
                        tracing::warn!(
                            account = backend.account_id(),
                            timeout_ms = timeout.as_millis() as u64,
                            "account search timed out"
                        );
                        return Err(InventoryError::timeout());
                    },
                };
                Ok::<_, InventoryError>((index, resources))
            });
        }

        let mut per_account: Vec<Vec<TaggedResource>> = vec![Vec::new(); self.backends.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok((index, resources))) => per_account[index] = resources,
                // Dropping the set aborts the searches still in flight.
                Ok(Err(err)) => return Err(err),
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                },
                Err(join_err) => {
                    return Err(InventoryError::internal_with_source(
                        "account search aborted",
                        join_err,
                    ));
                },
            }
        }

        Ok(per_account)
    }
}
