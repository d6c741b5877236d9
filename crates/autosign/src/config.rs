//! Configuration file.
//!
//! A TOML file with one `[global]` table and one table per inventory
//! account, named by account id:
//!
//! ```toml
//! [global]
//! challenge_password = "..."
//! tag = "namespace:predicate"
//! debug = "/var/log/puppet/autosign.log"
//! cache_ttl = "30s"
//!
//! [1234]
//! oath2_token = "..."
//!
//! [5678]
//! email = "ops@example.com"
//! password = "..."
//! ```
//!
//! The legacy key spellings `challange_password`, `rightscale_email` and
//! `rightscale_password` are accepted. Tables named `global`, `default` and
//! `lookup` are never accounts.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use autosign_inventory::{InventoryClient, LookupConfig, TagLookup, TagSearchBackend};
use autosign_inventory_rightscale::{AccountConfig, RetryConfig, RightScaleBackend};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::{
    engine::{Autosigner, DEFAULT_DECISION_TIMEOUT},
    error::{AutosignError, Result},
};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/puppet/autosign.toml";

/// Files tried in order when no path is given.
pub const CONFIG_CANDIDATES: [&str; 2] =
    [DEFAULT_CONFIG_PATH, "/etc/puppetlabs/puppet/autosign.toml"];

/// Table names that never name an account.
pub const RESERVED_SECTIONS: [&str; 3] = ["global", "default", "lookup"];

#[derive(Deserialize)]
struct RawConfig {
    global: Option<RawGlobal>,
    lookup: Option<LookupConfig>,
    #[serde(flatten)]
    sections: BTreeMap<String, toml::Value>,
}

#[derive(Deserialize)]
struct RawGlobal {
    #[serde(alias = "challange_password")]
    challenge_password: Option<String>,
    tag: Option<String>,
    debug: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    cache_ttl: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    decision_timeout: Option<Duration>,
}

#[derive(Deserialize)]
struct RawAccount {
    #[serde(alias = "rightscale_email")]
    email: Option<String>,
    #[serde(alias = "rightscale_password")]
    password: Option<String>,
    oath2_token: Option<String>,
    api_url: Option<String>,
    #[serde(default, with = "humantime_serde")]
    search_timeout: Option<Duration>,
    max_retries: Option<u32>,
}

/// The `[global]` table.
#[derive(Clone)]
pub struct GlobalConfig {
    /// Password every request must carry.
    pub challenge_password: Zeroizing<String>,
    /// `namespace:predicate`, or a bare `namespace`, searched for the
    /// preshared key.
    pub tag: String,
    /// Debug log file. Logging is off without it.
    pub debug: Option<PathBuf>,
    /// Search result lifetime. Unset disables caching.
    pub cache_ttl: Option<Duration>,
    /// Bound on one decision.
    pub decision_timeout: Duration,
}

impl std::fmt::Debug for GlobalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalConfig")
            .field("challenge_password", &"[REDACTED]")
            .field("tag", &self.tag)
            .field("debug", &self.debug)
            .field("cache_ttl", &self.cache_ttl)
            .field("decision_timeout", &self.decision_timeout)
            .finish()
    }
}

/// A validated configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    pub global: GlobalConfig,
    /// Accounts in table-name order.
    pub accounts: Vec<AccountConfig>,
    /// Lookup backend settings, if the `[lookup]` table is present.
    pub lookup: Option<LookupConfig>,
}

impl Config {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`AutosignError::ConfigurationInvalid`] for unparseable TOML,
    /// a missing `[global]` table or key, an unusable tag, no account
    /// tables, or an invalid account setting, and
    /// [`AutosignError::MissingCredentials`] for an account with neither a
    /// password pair nor a token.
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| AutosignError::config(e.message().to_owned()))?;

        let global = raw
            .global
            .ok_or_else(|| AutosignError::config("the config file must have a global section"))?;
        let global = validate_global(global)?;

        let accounts = raw
            .sections
            .into_iter()
            .filter(|(name, value)| {
                value.is_table() && !RESERVED_SECTIONS.contains(&name.as_str())
            })
            .map(|(name, value)| account(name, value))
            .collect::<Result<Vec<_>>>()?;
        if accounts.is_empty() {
            return Err(AutosignError::config(
                "the config file must contain at least one account stanza",
            ));
        }

        Ok(Self { global, accounts, lookup: raw.lookup })
    }

    /// Reads and validates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AutosignError::ConfigurationInvalid`] if the file cannot be
    /// read, plus everything [`from_toml`](Self::from_toml) returns.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AutosignError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), accounts = config.accounts.len(), "loaded config");
        Ok(config)
    }

    /// Picks the configuration file: `explicit` if given, otherwise the
    /// first of `candidates` that exists.
    ///
    /// # Errors
    ///
    /// Returns [`AutosignError::ConfigurationInvalid`] if no candidate
    /// exists.
    pub fn locate<P: AsRef<Path>>(explicit: Option<&Path>, candidates: &[P]) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        candidates
            .iter()
            .map(|candidate| candidate.as_ref())
            .find(|candidate| candidate.is_file())
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                let tried: Vec<_> =
                    candidates.iter().map(|c| c.as_ref().display().to_string()).collect();
                AutosignError::config(format!("could not find config file here: {tried:?}"))
            })
    }

    /// Builds an [`InventoryClient`] over every configured account.
    ///
    /// # Errors
    ///
    /// Returns [`AutosignError::Inventory`] if an HTTP client cannot be
    /// built.
    pub fn inventory_client(&self) -> Result<InventoryClient> {
        let backends = self
            .accounts
            .iter()
            .map(|account| -> Result<Arc<dyn TagSearchBackend>> {
                Ok(Arc::new(RightScaleBackend::new(account.clone())?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(InventoryClient::new(backends))
    }

    /// Builds the lookup context when a `[lookup]` table is present.
    ///
    /// # Errors
    ///
    /// See [`inventory_client`](Self::inventory_client).
    pub fn tag_lookup(&self) -> Result<Option<TagLookup>> {
        match &self.lookup {
            Some(lookup) => Ok(Some(TagLookup::new(self.inventory_client()?, lookup.clone()))),
            None => Ok(None),
        }
    }

    /// Builds the [`Autosigner`] this configuration describes.
    ///
    /// # Errors
    ///
    /// See [`inventory_client`](Self::inventory_client) and
    /// [`Autosigner::builder`].
    pub fn autosigner(&self) -> Result<Autosigner> {
        self.autosigner_over(self.inventory_client()?)
    }

    /// Builds an [`Autosigner`] with this configuration's `[global]`
    /// settings over an already constructed `inventory`.
    ///
    /// # Errors
    ///
    /// See [`Autosigner::builder`].
    pub fn autosigner_over(&self, inventory: InventoryClient) -> Result<Autosigner> {
        Autosigner::builder()
            .inventory(inventory)
            .challenge_password(self.global.challenge_password.as_str())
            .tag(self.global.tag.as_str())
            .maybe_cache_ttl(self.global.cache_ttl)
            .decision_timeout(self.global.decision_timeout)
            .build()
    }
}

fn validate_global(raw: RawGlobal) -> Result<GlobalConfig> {
    let challenge_password = raw
        .challenge_password
        .filter(|p| !p.is_empty())
        .map(Zeroizing::new)
        .ok_or_else(|| AutosignError::config("the config file must have a challenge_password"))?;
    let tag = raw
        .tag
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AutosignError::config("the config file must have a tag"))?;
    if tag.contains('=') {
        return Err(AutosignError::config(format!("tag '{tag}' must not carry a value")));
    }

    Ok(GlobalConfig {
        challenge_password,
        tag,
        debug: raw.debug,
        cache_ttl: raw.cache_ttl,
        decision_timeout: raw.decision_timeout.unwrap_or(DEFAULT_DECISION_TIMEOUT),
    })
}

fn account(name: String, value: toml::Value) -> Result<AccountConfig> {
    let raw: RawAccount = value
        .try_into()
        .map_err(|e: toml::de::Error| {
            AutosignError::config(format!("account {name}: {}", e.message()))
        })?;

    let retry = raw
        .max_retries
        .map(|max_retries| RetryConfig { max_retries, ..RetryConfig::default() });

    let config = AccountConfig::builder()
        .account_id(name)
        .maybe_email(raw.email)
        .maybe_password(raw.password)
        .maybe_oath2_token(raw.oath2_token)
        .maybe_api_url(raw.api_url)
        .maybe_search_timeout(raw.search_timeout)
        .maybe_retry(retry)
        .build()?;
    Ok(config)
}
