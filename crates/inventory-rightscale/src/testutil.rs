//! Shared test utilities for RightScale backend testing.
//!
//! Helpers build account configurations pointing at a local mock server
//! and the JSON bodies the API answers with. Feature-gated behind
//! `testutil` so they never ship in production builds.
//!
//! ```toml
//! [dev-dependencies]
//! autosign-inventory-rightscale = { path = "../inventory-rightscale", features = ["testutil"] }
//! ```

use std::time::Duration;

use serde_json::{Value, json};

use crate::{
    client::RightScaleBackend,
    config::{AccountConfig, RetryConfig},
};

/// Retry policy with millisecond backoff, for tests that exercise retries.
///
/// # Panics
///
/// Panics if the builder rejects the values (it does not).
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_retries(max_retries)
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(5))
        .build()
        .expect("valid retry config")
}

/// Account `1234` authenticating with refresh token `refresh-token` at `api_url`.
///
/// # Panics
///
/// Panics if `api_url` is not a valid URL.
pub fn token_account(api_url: &str) -> AccountConfig {
    AccountConfig::builder()
        .account_id("1234")
        .oath2_token("refresh-token")
        .api_url(api_url)
        .retry(RetryConfig::disabled())
        .build()
        .expect("valid account config")
}

/// Account `5678` authenticating with a password at `api_url`.
///
/// # Panics
///
/// Panics if `api_url` is not a valid URL.
pub fn password_account(api_url: &str) -> AccountConfig {
    AccountConfig::builder()
        .account_id("5678")
        .email("ops@example.com")
        .password("hunter2")
        .api_url(api_url)
        .retry(RetryConfig::disabled())
        .build()
        .expect("valid account config")
}

/// Creates a backend for `config`.
///
/// # Panics
///
/// Panics if the HTTP client cannot be built.
pub fn create_test_backend(config: AccountConfig) -> RightScaleBackend {
    RightScaleBackend::new(config).expect("http client should build")
}

/// A tag search response body: one entry per `(resource href, tags)`.
pub fn by_tag_body(entries: Vec<(&str, Vec<&str>)>) -> Value {
    Value::Array(
        entries
            .into_iter()
            .map(|(href, tags)| {
                json!({
                    "actions": [],
                    "links": [{"rel": "resource", "href": href}],
                    "tags": tags.iter().map(|name| json!({"name": name})).collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}

/// A successful token exchange response body.
pub fn token_body(access_token: &str) -> Value {
    json!({"access_token": access_token, "expires_in": 7200, "token_type": "bearer"})
}
