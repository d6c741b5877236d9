//! RightScale implementation of [`TagSearchBackend`].
//!
//! One [`RightScaleBackend`] serves one account. It authenticates lazily on
//! the first request and keeps the session until the API rejects it, then
//! logs in again once. Concurrent requests share a single login. Every API
//! call carries an explicit timeout and goes through [`with_retry`].

use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use autosign_inventory::{InventoryResult, TagQuery, TagSearchBackend, TaggedResource};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    auth::{self, Session},
    config::AccountConfig,
    error::{Result, RightScaleError},
    retry::with_retry,
};

/// A tag name as the API reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagName {
    pub name: String,
}

/// A hyperlink attached to an API resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

/// One entry of a tag search response: a resource and its tags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceTags {
    #[serde(default)]
    pub tags: Vec<TagName>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl ResourceTags {
    /// Returns the href of the tagged resource.
    #[must_use]
    pub fn resource_href(&self) -> Option<&str> {
        self.links.iter().find(|link| link.rel == "resource").map(|link| link.href.as_str())
    }

    /// Returns the tag names.
    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|tag| tag.name.as_str())
    }
}

impl From<ResourceTags> for TaggedResource {
    fn from(entry: ResourceTags) -> Self {
        let href = entry.resource_href().map(str::to_owned);
        TaggedResource { href, tags: entry.tags.into_iter().map(|tag| tag.name).collect() }
    }
}

/// Tag search backend for one RightScale account.
pub struct RightScaleBackend {
    config: AccountConfig,
    http: Client,
    session: Mutex<Option<Arc<Session>>>,
}

impl fmt::Debug for RightScaleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RightScaleBackend")
            .field("account_id", &self.config.account_id)
            .field("api_url", &self.config.api_url.as_str())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl RightScaleBackend {
    /// Creates a backend. No request is made until the first search.
    ///
    /// # Errors
    ///
    /// Returns [`RightScaleError::Http`] if the HTTP client cannot be built.
    pub fn new(config: AccountConfig) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("autosign/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http, session: Mutex::new(None) })
    }

    /// Returns the account configuration.
    #[must_use]
    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// Returns `true` while a session from a successful login is held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.try_lock().is_ok_and(|slot| slot.is_some())
    }

    /// Searches for resources carrying any of the query's tags.
    ///
    /// # Errors
    ///
    /// Returns the authentication failure, or the last request failure once
    /// retries run out.
    pub async fn search_by_tag(&self, query: &TagQuery) -> Result<Vec<ResourceTags>> {
        let mut form: Vec<(&str, &str)> = Vec::with_capacity(query.tags.len() + 2);
        form.push(("resource_type", query.resource_type.as_str()));
        form.extend(query.tags.iter().map(|tag| ("tags[]", tag.as_str())));
        form.push(("include_tags_with_prefix", query.tag_prefix.as_str()));

        let form = form.as_slice();
        with_retry(&self.config.retry, "tag search", move || {
            self.post_resource_tags("/api/tags/by_tag", form)
        })
        .await
    }

    /// Returns the tags attached to each resource in `hrefs`.
    ///
    /// # Errors
    ///
    /// Same as [`search_by_tag`](Self::search_by_tag).
    pub async fn tags_by_resource(&self, hrefs: &[String]) -> Result<Vec<ResourceTags>> {
        let form: Vec<(&str, &str)> =
            hrefs.iter().map(|href| ("resource_hrefs[]", href.as_str())).collect();

        let form = form.as_slice();
        with_retry(&self.config.retry, "tags by resource", move || {
            self.post_resource_tags("/api/tags/by_resource", form)
        })
        .await
    }

    /// Fetches `path` as JSON.
    pub(crate) async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        with_retry(&self.config.retry, "get", move || self.get_json_once(path, query)).await
    }

    /// Returns the current session, logging in if there is none. The flag
    /// is `true` when the session was created by this call.
    async fn session(&self) -> Result<(Arc<Session>, bool)> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok((Arc::clone(session), false));
        }
        let session = Arc::new(auth::authenticate(&self.http, &self.config).await?);
        *slot = Some(Arc::clone(&session));
        Ok((session, true))
    }

    /// Runs `request` with the current session. A reused session that the
    /// API rejects is dropped and `request` runs once more after a new login.
    async fn with_session<T, F, Fut>(&self, request: F) -> Result<T>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (session, fresh) = self.session().await?;
        match request(Arc::clone(&session)).await {
            Err(err) if !fresh && err.is_rejected_session() => {
                tracing::info!(
                    account = %self.config.account_id,
                    "session rejected, logging in again"
                );
                {
                    let mut slot = self.session.lock().await;
                    if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &session)) {
                        *slot = None;
                    }
                }
                let (session, _) = self.session().await?;
                request(session).await
            },
            other => other,
        }
    }

    async fn post_resource_tags(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<Vec<ResourceTags>> {
        self.with_session(|session| self.post_resource_tags_as(session, path, form)).await
    }

    async fn post_resource_tags_as(
        &self,
        session: Arc<Session>,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<Vec<ResourceTags>> {
        let url = self.config.endpoint(path)?;

        let response = session
            .apply(self.http.post(url))
            .form(form)
            .timeout(self.config.search_timeout)
            .send()
            .await?;

        let response = self.check_status(response, "tag search")?;
        let entries: Vec<ResourceTags> = response.json().await?;
        tracing::debug!(path, resources = entries.len(), "tag request answered");
        Ok(entries)
    }

    async fn get_json_once(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.with_session(|session| self.get_json_as(session, path, query)).await
    }

    async fn get_json_as(
        &self,
        session: Arc<Session>,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value> {
        let url = self.config.endpoint(path)?;

        let response = session
            .apply(self.http.get(url))
            .query(query)
            .timeout(self.config.search_timeout)
            .send()
            .await?;

        let response = self.check_status(response, "get")?;
        Ok(response.json().await?)
    }

    fn check_status(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }
        tracing::warn!(
            account = %self.config.account_id,
            status = status.as_u16(),
            operation,
            "unexpected status"
        );
        Err(RightScaleError::Status {
            operation,
            account: self.config.account_id.clone(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl TagSearchBackend for RightScaleBackend {
    fn account_id(&self) -> &str {
        &self.config.account_id
    }

    #[tracing::instrument(
        skip(self, query),
        fields(account = %self.config.account_id, prefix = %query.tag_prefix)
    )]
    async fn search(&self, query: &TagQuery) -> InventoryResult<Vec<TaggedResource>> {
        let entries = self.search_by_tag(query).await?;
        Ok(entries.into_iter().map(TaggedResource::from).collect())
    }
}
