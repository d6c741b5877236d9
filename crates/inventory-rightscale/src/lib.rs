//! RightScale-backed implementation of
//! [`TagSearchBackend`](autosign_inventory::TagSearchBackend).
//!
//! Each [`RightScaleBackend`] talks to one RightScale account through the
//! 1.5 REST API. Accounts authenticate with a refresh token, an
//! email/password pair, or an instance token; see [`Credentials`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                autosign_inventory::InventoryClient          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   RightScaleBackend (per account)           │
//! │   lazy re-login on 401  │ retry + backoff │ request timeout │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   RightScale 1.5 API                        │
//! │   /api/oauth2 │ /api/session │ /api/tags/by_tag │ ...       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! // Requires network access to the RightScale API.
//! use std::sync::Arc;
//! use autosign_inventory::InventoryClient;
//! use autosign_inventory_rightscale::{AccountConfig, RightScaleBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AccountConfig::builder().account_id("1234").oath2_token("refresh").build()?;
//!     let client = InventoryClient::new(vec![Arc::new(RightScaleBackend::new(config)?)]);
//!
//!     let tags = client.get_tags_by_tag("nd:auth=abc", false).await?;
//!     println!("{tags:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Wire Calls
//!
//! | Operation         | Request                                                          |
//! | ----------------- | ---------------------------------------------------------------- |
//! | token exchange    | `POST /api/oauth2` `grant_type=refresh_token&refresh_token=...`  |
//! | password login    | `POST /api/session` `email=...&password=...&account_href=...`    |
//! | instance login    | `POST /api/session/instance` `instance_token=...&account_href=...`|
//! | tag search        | `POST /api/tags/by_tag` `resource_type&tags[]&include_tags_with_prefix` |
//! | tags of resource  | `POST /api/tags/by_resource` `resource_hrefs[]=...`              |
//! | own instance      | `GET /api/sessions/instance?view=full`                           |
//!
//! Every request carries `X-API-Version: 1.5`.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with config and response-body helpers.
//! - **`failpoints`**: Enables `fail` injection points in the retry loop.

#![deny(unsafe_code)]

mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod instance;
mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use client::{Link, ResourceTags, RightScaleBackend, TagName};
pub use config::{
    API_VERSION, AccountConfig, Credentials, DEFAULT_API_URL, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_SEARCH_TIMEOUT, RetryConfig, TOKEN_EXCHANGE_TIMEOUT,
};
pub use error::{Result, RightScaleError};
pub use instance::{RightScaleInstanceSource, parse_api_token};
