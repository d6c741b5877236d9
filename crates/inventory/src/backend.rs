//! Inventory backend trait definition.
//!
//! [`TagSearchBackend`] is the boundary between the query layer and one
//! authenticated inventory partition ("account"). The query layer fans a
//! single search out over many backends and merges what they return; a
//! backend only has to answer one tag search for one account.
//!
//! Implementations:
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | [`MemoryInventory`](crate::MemoryInventory) | Testing, development |
//! | `RightScaleBackend` (in `autosign-inventory-rightscale`) | Production |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InventoryResult;

/// Resource type searched by the authorization flow.
pub const INSTANCES: &str = "instances";

/// A tag search against one account.
///
/// `tags` is the actual match criterion: a resource matches when it carries
/// any of them. `tag_prefix` only narrows which of the matched resource's
/// tags come back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuery {
    /// Resource type to search, e.g. `instances`.
    pub resource_type: String,
    /// `namespace:predicate` filter applied to the returned tags.
    pub tag_prefix: String,
    /// Full tag strings to match.
    pub tags: Vec<String>,
}

impl TagQuery {
    /// Creates an instance search for `tag`, narrowed to `tag_prefix`.
    #[must_use]
    pub fn instances(tag_prefix: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            resource_type: INSTANCES.to_owned(),
            tag_prefix: tag_prefix.into(),
            tags: vec![tag.into()],
        }
    }
}

/// A resource returned by a tag search, reduced to its tag names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedResource {
    /// Link to the resource, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Tag names carried by the resource (after prefix filtering).
    pub tags: Vec<String>,
}

impl TaggedResource {
    /// Creates a resource carrying the given tags.
    #[must_use]
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { href: None, tags: tags.into_iter().map(Into::into).collect() }
    }

    /// Sets the resource link.
    #[must_use]
    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }
}

/// One authenticated partition of the inventory.
///
/// Backends are expected to be thread-safe and to authenticate lazily,
/// memoizing credentials so that repeated searches do not log in again.
#[async_trait]
pub trait TagSearchBackend: Send + Sync {
    /// Returns the opaque account identifier this backend searches.
    fn account_id(&self) -> &str;

    /// Searches the account for resources matching `query`.
    ///
    /// Returned resources keep the order the backend produced; the query
    /// layer is responsible for deterministic merging.
    #[must_use = "inventory searches may fail and errors must be handled"]
    async fn search(&self, query: &TagQuery) -> InventoryResult<Vec<TaggedResource>>;
}
