//! Instance metadata mirrored into flat facts.
//!
//! A [`FactCollector`] asks an [`InstanceSource`] for the running
//! instance's document, inputs, links and tags, flattens each into
//! `key → value` pairs and keeps them in a [`SnapshotCache`]. The instance
//! document, inputs and links change rarely and live as long as the
//! snapshot; tags can change at any time and use a short volatile TTL.
//!
//! Key naming:
//!
//! | Section    | Key                         | Value                          |
//! |------------|-----------------------------|--------------------------------|
//! | `instance` | `rs_<path-joined-by-->`     | string leaves of the document  |
//! | `inputs`   | `rs_input_<name>`           | input value after the first `:`|
//! | `links`    | `rs_link_<rel>`             | link href                      |
//! | `tags`     | `rs_tag_<namespace:pred>`   | tag value                      |
//!
//! Every key then goes through [`clean_key`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::InventoryResult,
    snapshot::{Facts, SnapshotCache},
};

/// Section holding the flattened instance document.
pub const INSTANCE_SECTION: &str = "instance";
/// Section holding instance inputs.
pub const INPUTS_SECTION: &str = "inputs";
/// Section holding instance links.
pub const LINKS_SECTION: &str = "links";
/// Volatile section holding instance tags.
pub const TAGS_SECTION: &str = "tags";

const FACT_PREFIX: &str = "rs_";

/// A named input of an instance, as `type:value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInput {
    /// Input name, cleaned into the `rs_input_<name>` fact key.
    pub name: String,
    /// Raw `type:value` string; the fact keeps the part after the first `:`.
    pub value: String,
}

/// A hyperlink from an instance to a related resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    /// Relation name, such as `self` or `cloud`.
    pub rel: String,
    /// Resource path the link points to.
    pub href: String,
}

/// What a source knows about the running instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceRecord {
    /// Resource path of the instance, used to fetch its tags.
    pub href: Option<String>,
    /// The raw instance document.
    pub document: Value,
    /// Inputs configured on the instance.
    pub inputs: Vec<InstanceInput>,
    /// Links to related resources.
    pub links: Vec<ResourceLink>,
}

/// Supplies metadata about the instance the process runs on.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    /// Fetches the instance record.
    async fn instance(&self) -> InventoryResult<InstanceRecord>;

    /// Fetches the tags attached to the resource at `href`.
    async fn tags(&self, href: &str) -> InventoryResult<Vec<String>>;
}

/// Collects instance facts through a layered cache.
pub struct FactCollector {
    source: Arc<dyn InstanceSource>,
    cache: SnapshotCache,
}

impl std::fmt::Debug for FactCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactCollector").field("cache", &self.cache).finish_non_exhaustive()
    }
}

impl FactCollector {
    #[must_use]
    pub fn new(source: Arc<dyn InstanceSource>, cache: SnapshotCache) -> Self {
        Self { source, cache }
    }

    /// Returns the underlying cache.
    #[must_use]
    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Returns every fact, refetching only the sections that expired.
    ///
    /// The instance record is fetched at most once per call.
    ///
    /// # Errors
    ///
    /// Propagates source failures. Sections fetched before the failure stay
    /// cached.
    #[tracing::instrument(skip(self))]
    pub async fn collect(&self) -> InventoryResult<Facts> {
        let mut fetched: Option<InstanceRecord> = None;
        let mut facts = Facts::new();

        for section in [INSTANCE_SECTION, INPUTS_SECTION, LINKS_SECTION] {
            let section_facts = match self.cache.section(section) {
                Some(cached) => cached,
                None => {
                    tracing::debug!(section, "refetching fact section");
                    let record = self.record(&mut fetched).await?;
                    let fresh = match section {
                        INSTANCE_SECTION => instance_facts(&record.document),
                        INPUTS_SECTION => input_facts(&record.inputs),
                        _ => link_facts(&record.links),
                    };
                    self.cache.store(section, fresh.clone());
                    fresh
                },
            };
            facts.extend(section_facts);
        }

        let tags = match self.cache.section(TAGS_SECTION) {
            Some(cached) => cached,
            None => {
                tracing::debug!("refetching instance tags");
                let record = self.record(&mut fetched).await?;
                let fresh = match &record.href {
                    Some(href) => tag_facts(&self.source.tags(href).await?),
                    None => Facts::new(),
                };
                self.cache.store(TAGS_SECTION, fresh.clone());
                fresh
            },
        };
        facts.extend(tags);

        tracing::debug!(facts = facts.len(), "collected instance facts");
        Ok(facts)
    }

    /// Writes the cache to disk if it changed.
    ///
    /// # Errors
    ///
    /// See [`SnapshotCache::persist`].
    pub fn persist(&self) -> InventoryResult<()> {
        self.cache.persist()
    }

    async fn record<'a>(
        &self,
        slot: &'a mut Option<InstanceRecord>,
    ) -> InventoryResult<&'a InstanceRecord> {
        let record = match slot.take() {
            Some(record) => record,
            None => self.source.instance().await?,
        };
        Ok(slot.insert(record))
    }
}

/// Replaces every character outside `[A-Za-z_]` with `_` and collapses
/// runs of `_`.
#[must_use]
pub fn clean_key(key: &str) -> String {
    let mut cleaned = String::with_capacity(key.len());
    for c in key.chars() {
        let c = if c.is_ascii_alphabetic() || c == '_' { c } else { '_' };
        if c == '_' && cleaned.ends_with('_') {
            continue;
        }
        cleaned.push(c);
    }
    cleaned
}

/// Flattens an instance document into facts.
///
/// Nested objects join their keys with `-` under the `rs_` prefix before
/// cleaning. String leaves are kept; arrays contribute their string
/// elements as `<key>_<index>`. Every other leaf is ignored.
#[must_use]
pub fn instance_facts(document: &Value) -> Facts {
    let mut facts = Facts::new();
    if let Value::Object(map) = document {
        for (key, value) in map {
            flatten_into(&mut facts, &format!("{FACT_PREFIX}{key}"), value);
        }
    }
    facts
}

fn flatten_into(facts: &mut Facts, path: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                flatten_into(facts, &format!("{path}-{key}"), value);
            }
        },
        Value::String(s) => {
            facts.insert(clean_key(path), s.clone());
        },
        Value::Array(items) => {
            let key = clean_key(path);
            for (index, item) in items.iter().enumerate() {
                if let Value::String(s) = item {
                    facts.insert(format!("{key}_{index}"), s.clone());
                }
            }
        },
        _ => {},
    }
}

/// Input facts. Inputs whose value lacks a `type:` part are skipped.
#[must_use]
pub fn input_facts(inputs: &[InstanceInput]) -> Facts {
    inputs
        .iter()
        .filter_map(|input| {
            let (_, value) = input.value.split_once(':')?;
            Some((clean_key(&format!("{FACT_PREFIX}input_{}", input.name)), value.to_owned()))
        })
        .collect()
}

/// Link facts.
#[must_use]
pub fn link_facts(links: &[ResourceLink]) -> Facts {
    links
        .iter()
        .map(|link| (clean_key(&format!("{FACT_PREFIX}link_{}", link.rel)), link.href.clone()))
        .collect()
}

/// Tag facts. Tags without a value are skipped.
#[must_use]
pub fn tag_facts(tags: &[String]) -> Facts {
    tags.iter()
        .filter_map(|tag| {
            let (name, value) = tag.split_once('=')?;
            Some((clean_key(&format!("{FACT_PREFIX}tag_{name}")), value.to_owned()))
        })
        .collect()
}
