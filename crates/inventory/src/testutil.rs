//! Shared test utilities for inventory consumers.
//!
//! Feature-gated behind `testutil` so it never ships in production builds.
//!
//! ```toml
//! [dev-dependencies]
//! autosign-inventory = { path = "../inventory", features = ["testutil"] }
//! ```
//!
//! [`StaticBackend`] answers every search with a canned response regardless
//! of the query. That makes it possible to feed the query layer results a
//! real account would never produce (tags outside the searched value, for
//! instance), which exercises the exact-match and count checks downstream.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    backend::{TagQuery, TagSearchBackend, TaggedResource},
    error::{InventoryError, InventoryResult},
};

type ErrorFactory = Arc<dyn Fn() -> InventoryError + Send + Sync>;

/// A backend that returns the same resources for every query.
///
/// Cloning shares the recorded query log.
#[derive(Clone)]
pub struct StaticBackend {
    account_id: String,
    resources: Vec<TaggedResource>,
    error: Option<ErrorFactory>,
    delay: Option<Duration>,
    queries: Arc<Mutex<Vec<TagQuery>>>,
}

impl StaticBackend {
    /// Creates a backend that always returns `resources`.
    #[must_use]
    pub fn new(account_id: impl Into<String>, resources: Vec<TaggedResource>) -> Self {
        Self {
            account_id: account_id.into(),
            resources,
            error: None,
            delay: None,
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates a backend that fails every search with the produced error.
    #[must_use]
    pub fn failing(
        account_id: impl Into<String>,
        error: impl Fn() -> InventoryError + Send + Sync + 'static,
    ) -> Self {
        let mut backend = Self::new(account_id, Vec::new());
        backend.error = Some(Arc::new(error));
        backend
    }

    /// Delays every answer by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns every query received so far.
    #[must_use]
    pub fn queries(&self) -> Vec<TagQuery> {
        self.queries.lock().clone()
    }

    /// Returns how many searches were received.
    #[must_use]
    pub fn search_count(&self) -> usize {
        self.queries.lock().len()
    }
}

#[async_trait]
impl TagSearchBackend for StaticBackend {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn search(&self, query: &TagQuery) -> InventoryResult<Vec<TaggedResource>> {
        self.queries.lock().push(query.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.error {
            Some(make_error) => Err(make_error()),
            None => Ok(self.resources.clone()),
        }
    }
}

/// Shorthand for a single resource carrying `tags`.
#[must_use]
pub fn resource<const N: usize>(tags: [&str; N]) -> TaggedResource {
    TaggedResource::new(tags)
}
