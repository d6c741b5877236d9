//! Instance metadata from the RightScale API.
//!
//! A host launched through RightScale carries an API token of the form
//! `<account id>:<instance token>`. [`RightScaleInstanceSource`] logs in
//! with it and serves the host's own instance record and tags to a
//! [`FactCollector`](autosign_inventory::FactCollector).

use std::sync::Arc;

use async_trait::async_trait;
use autosign_inventory::{
    InstanceInput, InstanceRecord, InstanceSource, InventoryError, InventoryResult, ResourceLink,
};
use serde_json::Value;

use crate::{
    client::RightScaleBackend,
    config::AccountConfig,
    error::{Result, RightScaleError},
};

/// Splits an instance API token into `(account id, instance token)`.
///
/// # Errors
///
/// Returns [`RightScaleError::Config`] unless both parts are present and
/// non-empty.
pub fn parse_api_token(api_token: &str) -> Result<(&str, &str)> {
    match api_token.split_once(':') {
        Some((account, token)) if !account.is_empty() && !token.is_empty() => Ok((account, token)),
        _ => Err(RightScaleError::Config("instance API token must be '<account>:<token>'".into())),
    }
}

/// [`InstanceSource`] backed by an instance-token session.
#[derive(Debug, Clone)]
pub struct RightScaleInstanceSource {
    backend: Arc<RightScaleBackend>,
}

impl RightScaleInstanceSource {
    /// Wraps an existing backend. Its account should use an instance token.
    #[must_use]
    pub fn new(backend: Arc<RightScaleBackend>) -> Self {
        Self { backend }
    }

    /// Creates a source from an `<account>:<token>` API token.
    ///
    /// # Errors
    ///
    /// Returns [`RightScaleError::Config`] for a malformed token or URL.
    pub fn from_api_token(api_url: &str, api_token: &str) -> Result<Self> {
        let (account, token) = parse_api_token(api_token)?;
        let config =
            AccountConfig::builder()
                .account_id(account)
                .instance_token(token)
                .api_url(api_url)
                .build()?;
        Ok(Self::new(Arc::new(RightScaleBackend::new(config)?)))
    }
}

#[async_trait]
impl InstanceSource for RightScaleInstanceSource {
    #[tracing::instrument(skip(self), fields(account = %self.backend.config().account_id()))]
    async fn instance(&self) -> InventoryResult<InstanceRecord> {
        let document = self.backend.get_json("/api/sessions/instance", &[("view", "full")]).await?;
        record_from_document(document)
    }

    #[tracing::instrument(skip(self), fields(account = %self.backend.config().account_id()))]
    async fn tags(&self, href: &str) -> InventoryResult<Vec<String>> {
        let entries = self.backend.tags_by_resource(&[href.to_owned()]).await?;
        Ok(entries
            .into_iter()
            .next()
            .map(|entry| entry.tags.into_iter().map(|tag| tag.name).collect())
            .unwrap_or_default())
    }
}

fn record_from_document(document: Value) -> InventoryResult<InstanceRecord> {
    if !document.is_object() {
        return Err(InventoryError::serialization("instance document is not a JSON object"));
    }

    let inputs: Vec<InstanceInput> = match document.get("inputs") {
        Some(inputs) => serde_json::from_value(inputs.clone()).map_err(|e| {
            InventoryError::serialization_with_source("malformed instance inputs", e)
        })?,
        None => Vec::new(),
    };
    let links: Vec<ResourceLink> = match document.get("links") {
        Some(links) => serde_json::from_value(links.clone())
            .map_err(|e| InventoryError::serialization_with_source("malformed instance links", e))?,
        None => Vec::new(),
    };
    let href = links.iter().find(|link| link.rel == "self").map(|link| link.href.clone());

    Ok(InstanceRecord { href, document, inputs, links })
}
