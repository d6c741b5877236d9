//! The signing decision.
//!
//! [`Autosigner::authorize`] runs one request through a fixed sequence and
//! stops at the first failure:
//!
//! 1. decode the request and extract its secrets
//! 2. compare the challenge password with the configured one
//! 3. search every account for the expected tag `<tag>=<preshared key>`, keeping duplicates
//! 4. approve only if exactly one tag came back and it is the expected one
//!
//! Every failure, timeout or cancellation becomes a denial. Nothing but an
//! explicit match approves.

use std::time::Duration;

use autosign_inventory::{InventoryClient, TagExpression, TtlCache};
use fail::fail_point;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::{
    csr,
    error::{AutosignError, Result},
};

/// Default bound on a whole decision.
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    approved: bool,
    reason: String,
}

impl AuthorizationResult {
    /// An approval.
    #[must_use]
    pub fn approved(reason: impl Into<String>) -> Self {
        Self { approved: true, reason: reason.into() }
    }

    /// A denial.
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self { approved: false, reason: reason.into() }
    }

    /// Returns `true` if the request may be signed.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.approved
    }

    /// Returns the human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<Result<String>> for AuthorizationResult {
    fn from(outcome: Result<String>) -> Self {
        match outcome {
            Ok(reason) => Self::approved(reason),
            Err(err) => Self::denied(err.to_string()),
        }
    }
}

/// Decides whether certificate requests may be signed.
///
/// Holds the inventory client and a result cache, both shared by every
/// decision made through the same instance.
pub struct Autosigner {
    inventory: InventoryClient,
    challenge_password: Zeroizing<String>,
    tag: String,
    namespace: String,
    predicate: Option<String>,
    cache: TtlCache,
    decision_timeout: Duration,
}

impl std::fmt::Debug for Autosigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autosigner")
            .field("inventory", &self.inventory)
            .field("tag", &self.tag)
            .field("cache_ttl", &self.cache.ttl())
            .field("decision_timeout", &self.decision_timeout)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl Autosigner {
    /// Creates an autosigner.
    ///
    /// # Arguments
    ///
    /// * `inventory` - Client over every account to search.
    /// * `challenge_password` - Password every request must carry.
    /// * `tag` - `namespace:predicate` (or bare `namespace`) whose value must equal the request's
    ///   preshared key.
    ///
    /// # Optional Fields
    ///
    /// * `cache_ttl` - Lifetime of cached search results (default: caching disabled).
    /// * `decision_timeout` - Bound on one decision (default: 60 seconds).
    ///
    /// # Errors
    ///
    /// Returns [`AutosignError::ConfigurationInvalid`] for an empty password,
    /// an empty tag, a tag carrying a value, or a zero timeout.
    #[builder]
    pub fn new(
        inventory: InventoryClient,
        #[builder(into)] challenge_password: String,
        #[builder(into)] tag: String,
        cache_ttl: Option<Duration>,
        #[builder(default = DEFAULT_DECISION_TIMEOUT)] decision_timeout: Duration,
    ) -> Result<Self> {
        let challenge_password = Zeroizing::new(challenge_password);
        if challenge_password.is_empty() {
            return Err(AutosignError::config("challenge_password cannot be empty"));
        }
        if tag.is_empty() {
            return Err(AutosignError::config("tag cannot be empty"));
        }
        let (namespace, predicate, value) = TagExpression::parse(&tag).into_parts();
        if value.is_some() || namespace.is_empty() || (predicate.is_none() && tag.contains(':')) {
            return Err(AutosignError::config(format!(
                "tag '{tag}' must be 'namespace:predicate' without a value"
            )));
        }
        if decision_timeout.is_zero() {
            return Err(AutosignError::config("decision_timeout must be positive"));
        }

        Ok(Self {
            inventory,
            challenge_password,
            tag,
            namespace,
            predicate,
            cache: TtlCache::new(cache_ttl),
            decision_timeout,
        })
    }

    /// Returns the configured tag name.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the search result cache.
    #[must_use]
    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Decides whether `hostname` may have `csr` signed.
    ///
    /// Never fails: every error is a denial carrying the error as its
    /// reason.
    pub async fn authorize(&self, hostname: &str, csr: &[u8]) -> AuthorizationResult {
        self.authorize_with_cancel(hostname, csr, &CancellationToken::new()).await
    }

    /// Like [`authorize`](Self::authorize), but denies as soon as `cancel`
    /// fires.
    #[tracing::instrument(skip(self, csr, cancel), fields(csr_len = csr.len()))]
    pub async fn authorize_with_cancel(
        &self,
        hostname: &str,
        csr: &[u8],
        cancel: &CancellationToken,
    ) -> AuthorizationResult {
        tracing::info!("starting certificate signing decision");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AutosignError::Cancelled),
            timed = tokio::time::timeout(self.decision_timeout, self.evaluate(csr)) => {
                timed.unwrap_or(Err(AutosignError::DecisionTimeout(self.decision_timeout)))
            },
        };

        let result = AuthorizationResult::from(outcome);
        if result.is_approved() {
            tracing::info!(reason = result.reason(), "signing this request");
        } else {
            tracing::warn!(reason = result.reason(), "not signing this request");
        }
        result
    }

    /// Runs the decision steps, returning the approval reason.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the decision.
    pub async fn evaluate(&self, csr: &[u8]) -> Result<String> {
        let request = csr::decode(csr)?;
        tracing::debug!("decoded certificate request");

        if request.challenge_password() != self.challenge_password.as_str() {
            return Err(AutosignError::ChallengePasswordMismatch);
        }

        let expected = Zeroizing::new(format!("{}={}", self.tag, request.preshared_key()));
        let matches = self.matching_tags(&expected).await?;

        match matches.as_slice() {
            [only] if only.as_str() == expected.as_str() => {
                Ok(format!("exactly one instance carries tag {}", self.tag))
            },
            [only] => Err(AutosignError::TagMismatch {
                expected: self.tag.clone(),
                returned: tag_name(only).to_owned(),
            }),
            other => Err(AutosignError::NoOrAmbiguousMatch { count: other.len() }),
        }
    }

    /// Every tag under the configured prefix on resources carrying
    /// `expected`, duplicates kept. Served from the cache when fresh.
    async fn matching_tags(&self, expected: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.cache.get(expected) {
            tracing::debug!(matches = cached.len(), "using cached search result");
            return Ok(cached);
        }

        fail_point!("autosign-before-inventory-query", |_| {
            Err(AutosignError::Inventory(autosign_inventory::InventoryError::connection(
                "injected inventory failure",
            )))
        });

        let found = self
            .inventory
            .search_by_tag_prefix(&self.namespace, self.predicate.as_deref(), expected, false)
            .await?;
        tracing::debug!(matches = found.len(), "inventory search complete");

        self.cache.put(expected, found.clone());
        Ok(found)
    }
}

/// The `namespace:predicate` part of a tag.
fn tag_name(tag: &str) -> &str {
    tag.split_once('=').map_or(tag, |(name, _)| name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use autosign_inventory::{
        InventoryError, TagSearchBackend, TaggedResource, testutil::StaticBackend,
    };

    use super::*;
    use crate::testutil::{
        TEST_PASSWORD, TEST_TAG, canned_signer, csr_with, signer_over, test_signer,
    };

    #[tokio::test]
    async fn test_single_match_is_approved() {
        let (signer, backend) = test_signer(&["mytag=key"]);

        let result = signer.authorize("host.example.com", &csr_with(TEST_PASSWORD, "key")).await;

        assert!(result.is_approved(), "denied: {}", result.reason());
        assert!(result.reason().contains("mytag"));
        assert!(!result.reason().contains("key"));
        assert_eq!(backend.search_count(), 1);
    }

    #[tokio::test]
    async fn test_bare_tag_prefix_covers_expected_tag() {
        let (signer, backend) = canned_signer(&["mytag=key"]);

        signer.authorize("host", &csr_with(TEST_PASSWORD, "key")).await;

        let query = &backend.queries()[0];
        assert_eq!(query.tag_prefix, "mytag");
        assert_eq!(query.tags, vec!["mytag=key".to_string()]);
        assert!(query.tags[0].starts_with(&query.tag_prefix));
    }

    #[tokio::test]
    async fn test_bare_tag_ignores_other_tags_on_host() {
        let (signer, account) = test_signer(&[]);
        account.add_resource(TaggedResource::new(["mytag=key", "nd:auth=other", "rs:state=up"]));
        account.add_resource(TaggedResource::new(["mytag=someone-else"]));

        let result = signer.authorize("host", &csr_with(TEST_PASSWORD, "key")).await;

        assert!(result.is_approved(), "denied: {}", result.reason());
    }

    #[tokio::test]
    async fn test_wrong_password_skips_inventory() {
        let (signer, backend) = test_signer(&["mytag=key"]);

        let result = signer.authorize("host", &csr_with("bad_password", "key")).await;

        assert!(!result.is_approved());
        assert_eq!(result.reason(), "invalid challenge_password");
        assert_eq!(backend.search_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_tags_are_denied() {
        let (signer, _) = test_signer(&["mytag=key", "mytag=key"]);

        let result = signer.authorize("host", &csr_with(TEST_PASSWORD, "key")).await;

        assert!(!result.is_approved());
        assert_eq!(result.reason(), "Expected exactly one matching tag, found 2");
    }

    #[tokio::test]
    async fn test_no_match_is_denied() {
        let (signer, _) = test_signer(&[]);

        let result = signer.authorize("host", &csr_with(TEST_PASSWORD, "key")).await;

        assert!(!result.is_approved());
        assert_eq!(result.reason(), "Expected exactly one matching tag, found 0");
    }

    #[tokio::test]
    async fn test_mismatched_tag_is_denied() {
        let (signer, _) = canned_signer(&["othertag=key"]);

        let err = signer.evaluate(&csr_with(TEST_PASSWORD, "key")).await.unwrap_err();

        match err {
            AutosignError::TagMismatch { expected, returned } => {
                assert_eq!(expected, "mytag");
                assert_eq!(returned, "othertag");
            },
            other => panic!("expected TagMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_request_is_denied() {
        let (signer, backend) = test_signer(&["mytag=key"]);

        let result = signer.authorize("host", b"garbage").await;

        assert!(!result.is_approved());
        assert!(result.reason().starts_with("Malformed certificate request"));
        assert_eq!(backend.search_count(), 0);
    }

    #[tokio::test]
    async fn test_inventory_failure_is_denied() {
        let backend =
            Arc::new(StaticBackend::failing("1234", || InventoryError::connection("refused")));
        let signer = signer_over(backend as Arc<dyn TagSearchBackend>);

        let result = signer.authorize("host", &csr_with(TEST_PASSWORD, "key")).await;

        assert!(!result.is_approved());
        assert!(result.reason().starts_with("Inventory query failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_inventory_times_out() {
        let backend = Arc::new(
            StaticBackend::new("1234", vec![TaggedResource::new(["mytag=key"])])
                .with_delay(Duration::from_secs(600)),
        );
        let signer = Autosigner::builder()
            .inventory(autosign_inventory::InventoryClient::new(vec![
                backend as Arc<dyn TagSearchBackend>
            ]))
            .challenge_password(TEST_PASSWORD)
            .tag(TEST_TAG)
            .decision_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let result = signer.authorize("host", &csr_with(TEST_PASSWORD, "key")).await;

        assert!(!result.is_approved());
    }

    #[tokio::test]
    async fn test_cancelled_decision_is_denied() {
        let (signer, _) = test_signer(&["mytag=key"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            signer.authorize_with_cancel("host", &csr_with(TEST_PASSWORD, "key"), &cancel).await;

        assert!(!result.is_approved());
        assert_eq!(result.reason(), "Authorization cancelled");
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_requests() {
        let backend = Arc::new(StaticBackend::new(
            "1234",
            vec![TaggedResource::new(["mytag=key"])],
        ));
        let signer = Autosigner::builder()
            .inventory(autosign_inventory::InventoryClient::new(vec![
                Arc::clone(&backend) as Arc<dyn TagSearchBackend>
            ]))
            .challenge_password(TEST_PASSWORD)
            .tag(TEST_TAG)
            .cache_ttl(Duration::from_secs(60))
            .build()
            .unwrap();

        for _ in 0..3 {
            let result = signer.authorize("host", &csr_with(TEST_PASSWORD, "key")).await;
            assert!(result.is_approved());
        }
        assert_eq!(backend.search_count(), 1);
        assert_eq!(signer.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_namespaced_tag_builds_prefix() {
        let backend = Arc::new(StaticBackend::new(
            "1234",
            vec![TaggedResource::new(["nd:auth=abc"])],
        ));
        let signer = Autosigner::builder()
            .inventory(autosign_inventory::InventoryClient::new(vec![
                Arc::clone(&backend) as Arc<dyn TagSearchBackend>
            ]))
            .challenge_password(TEST_PASSWORD)
            .tag("nd:auth")
            .build()
            .unwrap();

        let result = signer.authorize("host", &csr_with(TEST_PASSWORD, "abc")).await;

        assert!(result.is_approved(), "denied: {}", result.reason());
        assert_eq!(backend.queries()[0].tag_prefix, "nd:auth");
    }

    #[test]
    fn test_builder_validation() {
        let inventory = || autosign_inventory::InventoryClient::new(vec![]);

        for tag in ["", "nd:auth=value", ":auth", "nd:"] {
            let err = Autosigner::builder()
                .inventory(inventory())
                .challenge_password("pw")
                .tag(tag)
                .build()
                .unwrap_err();
            assert!(matches!(err, AutosignError::ConfigurationInvalid(_)), "tag {tag:?}");
        }

        let err = Autosigner::builder()
            .inventory(inventory())
            .challenge_password("")
            .tag("mytag")
            .build()
            .unwrap_err();
        assert!(matches!(err, AutosignError::ConfigurationInvalid(_)));
    }

    #[test]
    fn test_debug_omits_password() {
        let (signer, _) = test_signer(&[]);
        assert!(!format!("{signer:?}").contains(TEST_PASSWORD));
    }

    #[test]
    fn test_tag_name() {
        assert_eq!(tag_name("nd:auth=abc"), "nd:auth");
        assert_eq!(tag_name("mytag"), "mytag");
    }
}
