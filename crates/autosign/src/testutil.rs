//! Shared test utilities for autosign testing.
//!
//! This module builds synthetic certificate signing requests byte by byte,
//! so tests can produce both well-formed requests and every malformed
//! variant the extractor must reject, and wires an [`Autosigner`] to a
//! canned inventory. It is feature-gated behind `testutil` to prevent
//! leaking into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! autosign = { path = "../autosign", features = ["testutil"] }
//! ```

use std::sync::Arc;

use autosign_inventory::{
    InventoryClient, MemoryInventory, TagSearchBackend, TaggedResource, testutil::StaticBackend,
};
use der::{asn1::ObjectIdentifier, pem::LineEnding};

use crate::engine::Autosigner;

/// Challenge password used by [`test_signer`].
pub const TEST_PASSWORD: &str = "password";

/// Tag name used by [`test_signer`].
pub const TEST_TAG: &str = "mytag";

/// Encodes one DER element.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes: Vec<u8> =
            len.to_be_bytes().into_iter().skip_while(|&b| b == 0).collect();
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
    out.extend_from_slice(content);
    out
}

/// `SEQUENCE` of already-encoded elements.
pub fn sequence(items: Vec<Vec<u8>>) -> Vec<u8> {
    tlv(0x30, &items.concat())
}

/// `SET` of already-encoded elements, in the given order.
pub fn set(items: Vec<Vec<u8>>) -> Vec<u8> {
    tlv(0x31, &items.concat())
}

/// `OBJECT IDENTIFIER` from dotted notation.
///
/// # Panics
///
/// Panics if `dotted` is not a valid OID.
pub fn oid(dotted: &str) -> Vec<u8> {
    let oid = ObjectIdentifier::new(dotted).expect("valid object identifier");
    tlv(0x06, oid.as_bytes())
}

/// `UTF8String`.
pub fn utf8(value: &str) -> Vec<u8> {
    tlv(0x0c, value.as_bytes())
}

/// `PrintableString`.
pub fn printable(value: &str) -> Vec<u8> {
    tlv(0x13, value.as_bytes())
}

/// `OCTET STRING`.
pub fn octet_string(value: &[u8]) -> Vec<u8> {
    tlv(0x04, value)
}

/// `BOOLEAN`.
pub fn boolean(value: bool) -> Vec<u8> {
    tlv(0x01, &[if value { 0xff } else { 0x00 }])
}

/// An `Extension` with the given id element and raw value octets.
pub fn extension(id: Vec<u8>, critical: bool, value: &[u8]) -> Vec<u8> {
    let mut parts = vec![id];
    if critical {
        parts.push(boolean(true));
    }
    parts.push(octet_string(value));
    sequence(parts)
}

/// The `pp_preshared_key` extension, its value a `UTF8String` as Puppet writes it.
pub fn preshared_key_extension(key: &str) -> Vec<u8> {
    extension(oid("1.3.6.1.4.1.34380.1.1.4"), false, &utf8(key))
}

/// Builds a certificate signing request with arbitrary attributes.
///
/// The subject, key and signature are fixed placeholders; only the
/// attribute set varies.
#[derive(Debug, Clone, Default)]
pub struct CsrBuilder {
    attributes: Vec<Vec<u8>>,
}

impl CsrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `challengePassword` attribute holding a `UTF8String`.
    pub fn challenge_password(self, password: &str) -> Self {
        self.attribute("1.2.840.113549.1.9.7", vec![utf8(password)])
    }

    /// Appends an `extensionRequest` attribute holding `extensions`.
    pub fn extension_request(self, extensions: Vec<Vec<u8>>) -> Self {
        self.attribute("1.2.840.113549.1.9.14", vec![sequence(extensions)])
    }

    /// Appends an attribute of type `oid` with the given value set.
    pub fn attribute(mut self, oid_str: &str, values: Vec<Vec<u8>>) -> Self {
        self.attributes.push(sequence(vec![oid(oid_str), set(values)]));
        self
    }

    /// Encodes the request as DER.
    pub fn to_der(&self) -> Vec<u8> {
        let common_name = sequence(vec![oid("2.5.4.3"), utf8("host.example.com")]);
        let subject = sequence(vec![set(vec![common_name])]);
        let public_key = sequence(vec![
            sequence(vec![oid("1.2.840.10045.2.1"), oid("1.2.840.10045.3.1.7")]),
            tlv(0x03, &[0x00, 0x04, 0x01, 0x02, 0x03, 0x04]),
        ]);
        let info = sequence(vec![
            tlv(0x02, &[0x00]),
            subject,
            public_key,
            tlv(0xa0, &self.attributes.concat()),
        ]);
        let algorithm = sequence(vec![oid("1.2.840.10045.4.3.2")]);
        let signature = tlv(0x03, &[0x00, 0x30, 0x00]);
        sequence(vec![info, algorithm, signature])
    }

    /// Encodes the request as PEM.
    ///
    /// # Panics
    ///
    /// Panics if PEM encoding fails.
    pub fn to_pem(&self) -> String {
        der::pem::encode_string("CERTIFICATE REQUEST", LineEnding::LF, &self.to_der())
            .expect("PEM encoding")
    }
}

/// A well-formed request carrying `password` and `key`.
pub fn csr_with(password: &str, key: &str) -> Vec<u8> {
    CsrBuilder::new()
        .challenge_password(password)
        .extension_request(vec![preshared_key_extension(key)])
        .to_der()
}

/// An [`Autosigner`] for [`TEST_PASSWORD`] and [`TEST_TAG`] over a single
/// in-memory account holding one resource per entry of `tags`.
///
/// The account filters by query like a real one, so only tags the search
/// can actually return reach the signer. Returns the account too, so tests
/// can count searches.
///
/// # Panics
///
/// Panics if the signer cannot be built.
pub fn test_signer(tags: &[&str]) -> (Autosigner, MemoryInventory) {
    let account =
        MemoryInventory::with_resources("1234", tags.iter().map(|tag| TaggedResource::new([*tag])));
    let signer = signer_over(Arc::new(account.clone()));
    (signer, account)
}

/// Like [`test_signer`], but the account answers every search with
/// `tags` regardless of the query and records what it was asked.
///
/// # Panics
///
/// Panics if the signer cannot be built.
pub fn canned_signer(tags: &[&str]) -> (Autosigner, Arc<StaticBackend>) {
    let resources = tags.iter().map(|tag| TaggedResource::new([*tag])).collect();
    let backend = Arc::new(StaticBackend::new("1234", resources));
    let signer = signer_over(Arc::clone(&backend) as Arc<dyn TagSearchBackend>);
    (signer, backend)
}

/// An [`Autosigner`] for [`TEST_PASSWORD`] and [`TEST_TAG`] over `backend`.
///
/// # Panics
///
/// Panics if the signer cannot be built.
pub fn signer_over(backend: Arc<dyn TagSearchBackend>) -> Autosigner {
    Autosigner::builder()
        .inventory(InventoryClient::new(vec![backend]))
        .challenge_password(TEST_PASSWORD)
        .tag(TEST_TAG)
        .build()
        .expect("valid autosigner")
}
