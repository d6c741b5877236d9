//! Autosign error types.
//!
//! Every failure on the way to a signing decision is an [`AutosignError`].
//! The engine turns each of them into a denial whose reason is the error's
//! `Display` text, so no variant renders secret material.

use std::time::Duration;

use autosign_inventory::InventoryError;
use autosign_inventory_rightscale::RightScaleError;
use thiserror::Error;

/// Errors raised while deciding whether to sign a request.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AutosignError {
    /// The request bytes are not a certificate signing request.
    #[error("Malformed certificate request: {0}")]
    MalformedRequest(String),

    /// The request does not carry exactly two attributes.
    #[error("The CSR is missing attributes: expected 2, found {found}")]
    MissingAttributes {
        /// Number of attributes present.
        found: usize,
    },

    /// The extension request attribute does not have the expected shape.
    #[error("Invalid extension request structure: {0}")]
    InvalidExtensionStructure(String),

    /// No extension carries the preshared key.
    #[error("No preshared key in extension request")]
    MissingPresharedKey,

    /// The request's challenge password differs from the configured one.
    #[error("invalid challenge_password")]
    ChallengePasswordMismatch,

    /// The inventory returned no matching tag, or more than one.
    #[error("Expected exactly one matching tag, found {count}")]
    NoOrAmbiguousMatch {
        /// Number of tags returned.
        count: usize,
    },

    /// The single returned tag is not the expected one.
    ///
    /// Both fields hold tag names only, never values.
    #[error("Returned tag {returned} does not match expected tag {expected}")]
    TagMismatch {
        /// Configured `namespace:predicate`.
        expected: String,
        /// Name part of the returned tag.
        returned: String,
    },

    /// An account's refresh token could not be exchanged.
    #[error("Failed to get access token for account {account}: {message}")]
    TokenExchangeFailed {
        /// Account identifier.
        account: String,
        /// Failure description.
        message: String,
    },

    /// An account has neither a password pair nor a token.
    #[error("Account {account} has no usable credentials")]
    MissingCredentials {
        /// Account identifier.
        account: String,
    },

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// The inventory query failed.
    #[error("Inventory query failed: {0}")]
    Inventory(#[source] InventoryError),

    /// The decision was cancelled before it completed.
    #[error("Authorization cancelled")]
    Cancelled,

    /// The decision did not complete in time.
    #[error("Authorization timed out after {0:?}")]
    DecisionTimeout(Duration),
}

impl AutosignError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(message.into())
    }
}

impl From<InventoryError> for AutosignError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::TokenExchangeFailed { account, message } => {
                Self::TokenExchangeFailed { account, message }
            },
            InventoryError::MissingCredentials { account } => Self::MissingCredentials { account },
            other => Self::Inventory(other),
        }
    }
}

impl From<RightScaleError> for AutosignError {
    fn from(err: RightScaleError) -> Self {
        match err {
            RightScaleError::MissingCredentials { account } => Self::MissingCredentials { account },
            RightScaleError::TokenExchange { account, message } => {
                Self::TokenExchangeFailed { account, message }
            },
            RightScaleError::Config(message) => Self::ConfigurationInvalid(message),
            other => Self::Inventory(other.into()),
        }
    }
}

impl From<der::Error> for AutosignError {
    fn from(err: der::Error) -> Self {
        Self::MalformedRequest(err.to_string())
    }
}

/// Result type alias for autosign operations.
pub type Result<T> = std::result::Result<T, AutosignError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AutosignError::ChallengePasswordMismatch.to_string(),
            "invalid challenge_password"
        );
        assert_eq!(
            AutosignError::MissingAttributes { found: 3 }.to_string(),
            "The CSR is missing attributes: expected 2, found 3"
        );
        assert_eq!(
            AutosignError::NoOrAmbiguousMatch { count: 0 }.to_string(),
            "Expected exactly one matching tag, found 0"
        );
        assert_eq!(
            AutosignError::TagMismatch { expected: "nd:auth".into(), returned: "other:tag".into() }
                .to_string(),
            "Returned tag other:tag does not match expected tag nd:auth"
        );
    }

    #[test]
    fn test_inventory_auth_errors_keep_their_names() {
        let err: AutosignError = InventoryError::token_exchange_failed("1234", "HTTP 400").into();
        assert!(
            matches!(err, AutosignError::TokenExchangeFailed { ref account, .. } if account == "1234")
        );

        let err: AutosignError = InventoryError::missing_credentials("5678").into();
        assert!(
            matches!(err, AutosignError::MissingCredentials { ref account } if account == "5678")
        );
    }

    #[test]
    fn test_other_inventory_errors_preserve_source() {
        let err: AutosignError = InventoryError::timeout().into();
        assert!(matches!(err, AutosignError::Inventory(InventoryError::Timeout)));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_rightscale_config_errors() {
        let err: AutosignError = RightScaleError::Config("bad url".into()).into();
        assert!(matches!(err, AutosignError::ConfigurationInvalid(ref m) if m == "bad url"));

        let err: AutosignError = RightScaleError::MissingCredentials { account: "1".into() }.into();
        assert!(matches!(err, AutosignError::MissingCredentials { .. }));
    }
}
