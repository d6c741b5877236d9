//! Error types for the RightScale backend.
//!
//! [`RightScaleError`] covers HTTP transport failures and API-level
//! refusals, and maps onto the generic
//! [`InventoryError`](autosign_inventory::InventoryError) at the backend
//! boundary.

use autosign_inventory::InventoryError;
use thiserror::Error;

/// Result type alias for RightScale operations.
pub type Result<T> = std::result::Result<T, RightScaleError>;

/// Errors specific to the RightScale backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RightScaleError {
    /// Transport-level failure from the HTTP client.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an unexpected status.
    #[error("{operation} for account {account} returned HTTP {status}")]
    Status {
        /// Which API call failed.
        operation: &'static str,
        /// The account the call was made for.
        account: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The refresh token could not be exchanged for an access token.
    #[error("Failed to get access token for account {account}: {message}")]
    TokenExchange {
        /// The account whose token was rejected.
        account: String,
        /// What went wrong.
        message: String,
    },

    /// The API rejected the account's credentials.
    #[error("Authentication failed for account {account}: {message}")]
    Authentication {
        /// The account that failed to log in.
        account: String,
        /// What went wrong.
        message: String,
    },

    /// The account has no usable credentials.
    #[error("Account {account} missing either email, password or oath2_token")]
    MissingCredentials {
        /// The misconfigured account.
        account: String,
    },

    /// A response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RightScaleError {
    /// Returns `true` for failures that may succeed on retry.
    ///
    /// Timeouts, connection failures, throttling (429) and server errors
    /// (5xx) qualify. Everything else is a definitive answer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` when the API refused the request's credentials.
    #[must_use]
    pub fn is_rejected_session(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}

impl From<RightScaleError> for InventoryError {
    fn from(err: RightScaleError) -> Self {
        match err {
            RightScaleError::Http(source) => http_error_to_inventory_error(source),
            RightScaleError::Status { operation, account, status } => match status {
                401 | 403 => InventoryError::authentication(
                    account,
                    format!("{operation} returned HTTP {status}"),
                ),
                429 | 500.. => InventoryError::connection(format!(
                    "{operation} for account {account} returned HTTP {status}"
                )),
                _ => InventoryError::internal(format!(
                    "{operation} for account {account} returned HTTP {status}"
                )),
            },
            RightScaleError::TokenExchange { account, message } => {
                InventoryError::token_exchange_failed(account, message)
            },
            RightScaleError::Authentication { account, message } => {
                InventoryError::authentication(account, message)
            },
            RightScaleError::MissingCredentials { account } => {
                InventoryError::missing_credentials(account)
            },
            RightScaleError::Decode(message) => InventoryError::serialization(message),
            RightScaleError::Config(message) => InventoryError::config(message),
        }
    }
}

fn http_error_to_inventory_error(err: reqwest::Error) -> InventoryError {
    if err.is_timeout() {
        tracing::warn!(url = ?err.url().map(|u| u.path()), "RightScale request timed out");
        InventoryError::timeout()
    } else if err.is_connect() || err.is_request() {
        InventoryError::connection_with_source("RightScale request failed", err)
    } else if err.is_decode() {
        InventoryError::serialization_with_source("failed to decode RightScale response", err)
    } else {
        InventoryError::internal_with_source("RightScale client error", err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn status(status: u16) -> RightScaleError {
        RightScaleError::Status { operation: "tag search", account: "1234".into(), status }
    }

    #[rstest]
    #[case(429, true)]
    #[case(500, true)]
    #[case(503, true)]
    #[case(400, false)]
    #[case(401, false)]
    #[case(404, false)]
    fn test_status_transience(#[case] code: u16, #[case] transient: bool) {
        assert_eq!(status(code).is_transient(), transient);
    }

    #[rstest]
    #[case(401, true)]
    #[case(403, true)]
    #[case(404, false)]
    #[case(503, false)]
    fn test_rejected_session(#[case] code: u16, #[case] rejected: bool) {
        assert_eq!(status(code).is_rejected_session(), rejected);
    }

    #[test]
    fn test_unauthorized_status_maps_to_authentication() {
        let err: InventoryError = status(401).into();
        assert!(
            matches!(err, InventoryError::Authentication { ref account, .. } if account == "1234")
        );
    }

    #[test]
    fn test_server_error_maps_to_connection() {
        let err: InventoryError = status(502).into();
        assert!(matches!(err, InventoryError::Connection { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_error_maps_to_internal() {
        let err: InventoryError = status(422).into();
        assert!(matches!(err, InventoryError::Internal { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_token_exchange_mapping_keeps_message() {
        let err: InventoryError = RightScaleError::TokenExchange {
            account: "1234".into(),
            message: "HTTP 400".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Failed to get access token for account 1234: HTTP 400");
    }

    #[test]
    fn test_missing_credentials_mapping() {
        let err: InventoryError =
            RightScaleError::MissingCredentials { account: "1234".into() }.into();
        assert!(matches!(err, InventoryError::MissingCredentials { .. }));
        assert_eq!(err.to_string(), "Account 1234 missing either email, password or oath2_token");
    }

    #[test]
    fn test_decode_and_config_mapping() {
        let err: InventoryError = RightScaleError::Decode("bad json".into()).into();
        assert!(matches!(err, InventoryError::Serialization { .. }));

        let err: InventoryError = RightScaleError::Config("bad url".into()).into();
        assert!(matches!(err, InventoryError::Config(_)));
    }
}
