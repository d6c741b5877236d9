//! In-memory inventory backend.
//!
//! [`MemoryInventory`] emulates the tag search semantics of a real account:
//! a resource matches when it carries any of the queried tags, and only the
//! matched resource's tags starting with the query prefix are returned.
//!
//! ```
//! use autosign_inventory::{MemoryInventory, TagQuery, TagSearchBackend, TaggedResource};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let inventory = MemoryInventory::new("1234");
//! inventory.add_resource(TaggedResource::new(["nd:auth=abc", "rs:state=up"]));
//!
//! let found = inventory.search(&TagQuery::instances("nd:auth", "nd:auth=abc")).await.unwrap();
//! assert_eq!(found[0].tags, vec!["nd:auth=abc".to_string()]);
//! # });
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    backend::{TagQuery, TagSearchBackend, TaggedResource},
    error::InventoryResult,
};

/// In-memory account holding a list of tagged resources.
///
/// Cheaply cloneable; clones share the same resource list and counters.
#[derive(Clone)]
pub struct MemoryInventory {
    account_id: String,
    resources: Arc<RwLock<Vec<TaggedResource>>>,
    searches: Arc<AtomicU64>,
}

impl MemoryInventory {
    /// Creates an empty account.
    #[must_use]
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            resources: Arc::new(RwLock::new(Vec::new())),
            searches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates an account pre-populated with resources.
    #[must_use]
    pub fn with_resources(
        account_id: impl Into<String>,
        resources: impl IntoIterator<Item = TaggedResource>,
    ) -> Self {
        let inventory = Self::new(account_id);
        inventory.resources.write().extend(resources);
        inventory
    }

    /// Adds a resource to the account.
    pub fn add_resource(&self, resource: TaggedResource) {
        self.resources.write().push(resource);
    }

    /// Removes every resource.
    pub fn clear(&self) {
        self.resources.write().clear();
    }

    /// Returns how many searches this account has served.
    #[must_use]
    pub fn search_count(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TagSearchBackend for MemoryInventory {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    #[tracing::instrument(
        skip(self, query),
        fields(account = %self.account_id, prefix = %query.tag_prefix)
    )]
    async fn search(&self, query: &TagQuery) -> InventoryResult<Vec<TaggedResource>> {
        self.searches.fetch_add(1, Ordering::Relaxed);

        let resources = self.resources.read();
        let matched = resources
            .iter()
            .filter(|resource| resource.tags.iter().any(|tag| query.tags.contains(tag)))
            .map(|resource| TaggedResource {
                href: resource.href.clone(),
                tags: resource
                    .tags
                    .iter()
                    .filter(|tag| tag.starts_with(&query.tag_prefix))
                    .cloned()
                    .collect(),
            })
            .collect();

        Ok(matched)
    }
}
