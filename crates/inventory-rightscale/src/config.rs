//! Configuration for a RightScale account.
//!
//! [`AccountConfig`] names the account, where its API lives, how it
//! authenticates, and how patient to be with it. Build it with
//! [`AccountConfig::builder`], which validates credentials up front so a
//! misconfigured account fails before any request is made.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, RightScaleError};

/// Default API endpoint.
pub const DEFAULT_API_URL: &str = "https://my.rightscale.com";

/// API version sent with every request.
pub const API_VERSION: &str = "1.5";

/// Timeout applied to refresh token exchange.
pub const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout applied to each search request.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How an account authenticates.
///
/// `Debug` never prints secret material.
#[derive(Clone)]
pub enum Credentials {
    /// Long-lived refresh token exchanged for short-lived access tokens.
    RefreshToken(Zeroizing<String>),
    /// User login with a session cookie.
    Password {
        /// Login email.
        email: String,
        /// Login password.
        password: Zeroizing<String>,
    },
    /// Token issued to a running instance.
    InstanceToken(Zeroizing<String>),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RefreshToken(_) => f.write_str("RefreshToken([REDACTED])"),
            Self::Password { email, .. } => {
                f.debug_struct("Password")
                    .field("email", email)
                    .field("password", &"[REDACTED]")
                    .finish()
            },
            Self::InstanceToken(_) => f.write_str("InstanceToken([REDACTED])"),
        }
    }
}

impl Credentials {
    /// Short name of the authentication method, safe to log.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RefreshToken(_) => "refresh_token",
            Self::Password { .. } => "password",
            Self::InstanceToken(_) => "instance_token",
        }
    }
}

/// Retry policy for transient API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    /// Upper bound on any single delay, before jitter.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(2)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[bon::bon]
impl RetryConfig {
    /// Creates a retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`RightScaleError::Config`] if `initial_backoff` is zero or
    /// exceeds `max_backoff`.
    #[builder]
    pub fn new(
        #[builder(default = default_max_retries())] max_retries: u32,
        #[builder(default = default_initial_backoff())] initial_backoff: Duration,
        #[builder(default = default_max_backoff())] max_backoff: Duration,
    ) -> Result<Self> {
        if initial_backoff.is_zero() {
            return Err(RightScaleError::Config("initial_backoff must be positive".into()));
        }
        if initial_backoff > max_backoff {
            return Err(RightScaleError::Config(
                "initial_backoff must not exceed max_backoff".into(),
            ));
        }
        Ok(Self { max_retries, initial_backoff, max_backoff })
    }

    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }
}

/// Configuration for one RightScale account.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub(crate) account_id: String,
    pub(crate) api_url: Url,
    pub(crate) credentials: Credentials,
    pub(crate) search_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) retry: RetryConfig,
}

#[bon::bon]
impl AccountConfig {
    /// Creates an account configuration, validating all fields.
    ///
    /// # Arguments
    ///
    /// * `account_id` - RightScale account number.
    /// * `oath2_token` - Refresh token. Takes precedence over a password.
    /// * `email`, `password` - Login pair, used when no refresh token is set.
    /// * `instance_token` - Instance credential, used when neither of the above is set.
    ///
    /// # Optional Fields
    ///
    /// * `api_url` - API endpoint (default: `https://my.rightscale.com`).
    /// * `search_timeout` - Per-request search timeout (default: 30 seconds).
    /// * `connect_timeout` - Connection timeout (default: 5 seconds).
    /// * `retry` - Retry policy (default: 2 retries with backoff).
    ///
    /// Empty strings count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`RightScaleError::Config`] for an empty account id or an
    /// unparseable URL, and [`RightScaleError::MissingCredentials`] when no
    /// complete credential is configured.
    #[builder]
    pub fn new(
        #[builder(into)] account_id: String,
        #[builder(into)] email: Option<String>,
        #[builder(into)] password: Option<String>,
        #[builder(into)] oath2_token: Option<String>,
        #[builder(into)] instance_token: Option<String>,
        #[builder(into, default = DEFAULT_API_URL.to_string())] api_url: String,
        #[builder(default = DEFAULT_SEARCH_TIMEOUT)] search_timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(default)] retry: RetryConfig,
    ) -> Result<Self> {
        if account_id.trim().is_empty() {
            return Err(RightScaleError::Config("account id cannot be empty".into()));
        }

        let api_url = Url::parse(&api_url)
            .map_err(|e| RightScaleError::Config(format!("invalid api_url '{api_url}': {e}")))?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(RightScaleError::Config(format!(
                "api_url must be http or https, got '{}'",
                api_url.scheme()
            )));
        }

        if search_timeout.is_zero() {
            return Err(RightScaleError::Config("search_timeout must be positive".into()));
        }

        let present = |value: Option<String>| value.filter(|v| !v.is_empty()).map(Zeroizing::new);
        let email = email.filter(|e| !e.is_empty());
        let credentials = match (present(oath2_token), email, present(password)) {
            (Some(token), _, _) => Credentials::RefreshToken(token),
            (None, Some(email), Some(password)) => Credentials::Password { email, password },
            (None, ..) => match present(instance_token) {
                Some(token) => Credentials::InstanceToken(token),
                None => return Err(RightScaleError::MissingCredentials { account: account_id }),
            },
        };

        Ok(Self { account_id, api_url, credentials, search_timeout, connect_timeout, retry })
    }

    /// Returns the account id.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Returns the API endpoint.
    #[must_use]
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Returns the credentials.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns the per-request search timeout.
    #[must_use]
    pub fn search_timeout(&self) -> Duration {
        self.search_timeout
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Path of the account resource, as the API expects in `account_href`.
    #[must_use]
    pub fn account_href(&self) -> String {
        format!("/api/accounts/{}", self.account_id)
    }

    /// Appends `path` to the API endpoint, keeping any path prefix the
    /// endpoint already has.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.api_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|e| RightScaleError::Config(format!("invalid endpoint path '{path}': {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_token_config() {
        let config =
            AccountConfig::builder().account_id("1234").oath2_token("refresh").build().unwrap();

        assert_eq!(config.account_id(), "1234");
        assert_eq!(config.api_url().as_str(), "https://my.rightscale.com/");
        assert_eq!(config.credentials().kind(), "refresh_token");
        assert_eq!(config.search_timeout(), DEFAULT_SEARCH_TIMEOUT);
        assert_eq!(config.account_href(), "/api/accounts/1234");
    }

    #[test]
    fn test_token_wins_over_password() {
        let config = AccountConfig::builder()
            .account_id("1234")
            .email("ops@example.com")
            .password("hunter2")
            .oath2_token("refresh")
            .build()
            .unwrap();

        assert_eq!(config.credentials().kind(), "refresh_token");
    }

    #[test]
    fn test_password_pair() {
        let config = AccountConfig::builder()
            .account_id("1234")
            .email("ops@example.com")
            .password("hunter2")
            .build()
            .unwrap();

        match config.credentials() {
            Credentials::Password { email, password } => {
                assert_eq!(email, "ops@example.com");
                assert_eq!(password.as_str(), "hunter2");
            },
            other => panic!("unexpected credentials: {other:?}"),
        }
    }

    #[test]
    fn test_instance_token_is_last_resort() {
        let config =
            AccountConfig::builder().account_id("1234").instance_token("itoken").build().unwrap();
        assert_eq!(config.credentials().kind(), "instance_token");
    }

    #[test]
    fn test_incomplete_password_pair_is_missing_credentials() {
        let err = AccountConfig::builder()
            .account_id("1234")
            .email("ops@example.com")
            .build()
            .unwrap_err();
        assert!(
            matches!(err, RightScaleError::MissingCredentials { ref account } if account == "1234")
        );

        let err = AccountConfig::builder()
            .account_id("1234")
            .email("ops@example.com")
            .password("")
            .oath2_token("")
            .build()
            .unwrap_err();
        assert!(matches!(err, RightScaleError::MissingCredentials { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_fields() {
        let err = AccountConfig::builder().account_id(" ").oath2_token("t").build().unwrap_err();
        assert!(matches!(err, RightScaleError::Config(_)));

        let err = AccountConfig::builder()
            .account_id("1")
            .oath2_token("t")
            .api_url("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, RightScaleError::Config(_)));

        let err = AccountConfig::builder()
            .account_id("1")
            .oath2_token("t")
            .api_url("ftp://example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, RightScaleError::Config(_)));

        let err = AccountConfig::builder()
            .account_id("1")
            .oath2_token("t")
            .search_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, RightScaleError::Config(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = AccountConfig::builder()
            .account_id("1234")
            .email("ops@example.com")
            .password("hunter2")
            .build()
            .unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));

        let token = AccountConfig::builder().account_id("1").oath2_token("s3cret").build().unwrap();
        assert!(!format!("{token:?}").contains("s3cret"));
    }

    #[rstest::rstest]
    #[case("http://127.0.0.1:8080", "http://127.0.0.1:8080/api/oauth2")]
    #[case("http://127.0.0.1:8080/", "http://127.0.0.1:8080/api/oauth2")]
    #[case("https://proxy.example.com/rs", "https://proxy.example.com/rs/api/oauth2")]
    #[case("https://proxy.example.com/rs/", "https://proxy.example.com/rs/api/oauth2")]
    fn test_endpoint_appends_to_api_url(#[case] api_url: &str, #[case] expected: &str) {
        let config = AccountConfig::builder()
            .account_id("1")
            .oath2_token("t")
            .api_url(api_url)
            .build()
            .unwrap();
        assert_eq!(config.endpoint("/api/oauth2").unwrap().as_str(), expected);
    }

    #[test]
    fn test_retry_config_validation() {
        let config = RetryConfig::builder().max_retries(5).build().unwrap();
        assert_eq!(config.max_retries, 5);

        let err = RetryConfig::builder().initial_backoff(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, RightScaleError::Config(_)));

        let err = RetryConfig::builder()
            .initial_backoff(Duration::from_secs(5))
            .max_backoff(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, RightScaleError::Config(_)));

        assert_eq!(RetryConfig::disabled().max_retries, 0);
    }

    #[test]
    fn test_retry_config_deserializes_humantime() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_retries":1,"initial_backoff":"50ms"}"#).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.initial_backoff, Duration::from_millis(50));
        assert_eq!(config.max_backoff, Duration::from_secs(2));
    }
}
