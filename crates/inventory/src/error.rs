//! Inventory error types and result alias.
//!
//! Every inventory backend maps its internal failures to [`InventoryError`],
//! so the query layer and its callers reason about one error vocabulary no
//! matter which partition produced the failure.
//!
//! # Error Types
//!
//! - [`InventoryError::Connection`] - Network failure or a retryable server response
//! - [`InventoryError::Timeout`] - A call exceeded its time bound
//! - [`InventoryError::MissingCredentials`] - An account has neither a password pair nor a token
//! - [`InventoryError::TokenExchangeFailed`] - The refresh-token exchange was refused
//! - [`InventoryError::Authentication`] - Any other login failure
//! - [`InventoryError::Serialization`] - A response body could not be decoded
//! - [`InventoryError::Config`] - Invalid client or cache configuration
//! - [`InventoryError::Internal`] - Everything else
//!
//! # Example
//!
//! ```
//! use autosign_inventory::{InventoryError, InventoryResult};
//!
//! fn login(account: &str) -> InventoryResult<()> {
//!     Err(InventoryError::missing_credentials(account))
//! }
//!
//! assert!(login("1234").is_err());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Errors that can occur while querying the inventory.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InventoryError {
    /// Network or connection-level failure.
    ///
    /// Also used for server responses that indicate a transient condition
    /// (throttling, 5xx). Callers may retry these.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The call exceeded its time bound.
    #[error("Operation timeout")]
    Timeout,

    /// The account has neither an email/password pair nor a refresh token.
    #[error("Account {account} missing either email, password or oath2_token")]
    MissingCredentials {
        /// The account identifier.
        account: String,
    },

    /// The refresh-token exchange did not return a usable access token.
    #[error("Failed to get access token for account {account}: {message}")]
    TokenExchangeFailed {
        /// The account identifier.
        account: String,
        /// HTTP status or decode failure description.
        message: String,
    },

    /// Any other authentication failure (session login refused, expired session).
    #[error("Authentication failed for account {account}: {message}")]
    Authentication {
        /// The account identifier.
        account: String,
        /// Description of the failure.
        message: String,
    },

    /// A response body could not be decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for backend specific failures.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl InventoryError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `MissingCredentials` error for the given account.
    #[must_use]
    pub fn missing_credentials(account: impl Into<String>) -> Self {
        Self::MissingCredentials { account: account.into() }
    }

    /// Creates a new `TokenExchangeFailed` error.
    #[must_use]
    pub fn token_exchange_failed(account: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TokenExchangeFailed { account: account.into(), message: message.into() }
    }

    /// Creates a new `Authentication` error.
    #[must_use]
    pub fn authentication(account: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication { account: account.into(), message: message.into() }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` for failures that may succeed on retry.
    ///
    /// Only connection failures and timeouts qualify. Authentication and
    /// credential failures are definitive answers from the server.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        let err = InventoryError::missing_credentials("1234");
        assert_eq!(err.to_string(), "Account 1234 missing either email, password or oath2_token");

        let err = InventoryError::token_exchange_failed("5678", "HTTP 401");
        assert_eq!(err.to_string(), "Failed to get access token for account 5678: HTTP 401");

        assert_eq!(InventoryError::timeout().to_string(), "Operation timeout");
    }

    #[test]
    fn test_transient_classification() {
        assert!(InventoryError::connection("refused").is_transient());
        assert!(InventoryError::timeout().is_transient());
        assert!(!InventoryError::missing_credentials("1").is_transient());
        assert!(!InventoryError::token_exchange_failed("1", "HTTP 403").is_transient());
        assert!(!InventoryError::serialization("bad json").is_transient());
    }

    #[test]
    fn test_source_chain_preserved() {
        let inner = InventoryError::timeout();
        let err = InventoryError::connection_with_source("search failed", inner);

        let source = err.source().expect("source exists");
        assert_eq!(source.to_string(), "Operation timeout");
    }
}
