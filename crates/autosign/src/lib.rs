//! Policy-based certificate autosigning.
//!
//! A certificate authority asks this crate whether to sign a request. The
//! answer is yes only when the request carries the configured challenge
//! password and exactly one inventory resource is tagged with the
//! request's preshared key.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            autosign binary (policy executable)       │
//! │        config file ─► Autosigner ─► exit 0 / 1       │
//! ├──────────────────────────────────────────────────────┤
//! │  Autosigner: decode ─► password ─► search ─► count   │
//! │      csr::decode                  TtlCache           │
//! ├──────────────────────────────────────────────────────┤
//! │  autosign-inventory: InventoryClient (fan-out)       │
//! ├──────────────────────────────────────────────────────┤
//! │  autosign-inventory-rightscale: one backend/account  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use autosign::Config;
//!
//! # async fn example(csr: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("/etc/puppet/autosign.toml".as_ref())?;
//! let signer = config.autosigner()?;
//!
//! let result = signer.authorize("web-1.example.com", csr).await;
//! if result.is_approved() {
//!     println!("sign: {}", result.reason());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a byte-level CSR builder and canned
//!   signers.
//! - **`failpoints`**: Activates the `autosign-before-inventory-query` fail point.

#![deny(unsafe_code)]

pub mod config;
pub mod csr;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use config::{CONFIG_CANDIDATES, Config, DEFAULT_CONFIG_PATH, GlobalConfig};
pub use csr::{CertificateRequest, PRESHARED_KEY_NAME, PRESHARED_KEY_OID};
pub use engine::{AuthorizationResult, Autosigner, DEFAULT_DECISION_TIMEOUT};
pub use error::{AutosignError, Result};
