//! Secret extraction from certificate signing requests.
//!
//! Only one request shape is accepted. The PKCS#10 attribute set must hold
//! exactly two attributes, in this order:
//!
//! ```text
//! attributes [0] {
//!   SEQUENCE { challengePassword,  SET { DirectoryString } }
//!   SEQUENCE { extensionRequest,   SET { SEQUENCE OF Extension } }
//! }
//!
//! Extension ::= SEQUENCE { id, critical BOOLEAN OPTIONAL, value OCTET STRING }
//! ```
//!
//! The preshared key is the value of the first extension whose `id` is
//! [`PRESHARED_KEY_OID`]. An `id` given as the string [`PRESHARED_KEY_NAME`]
//! is accepted too, for requests produced by older tooling. Anything that
//! deviates from this shape is rejected.

use std::borrow::Cow;

use der::{
    Decode, Reader, SliceReader, Tag, TagNumber, Tagged,
    asn1::{AnyRef, ObjectIdentifier},
};
use zeroize::Zeroizing;

use crate::error::{AutosignError, Result};

/// `pkcs-9-at-challengePassword`.
pub const CHALLENGE_PASSWORD_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.7");

/// `pkcs-9-at-extensionRequest`.
pub const EXTENSION_REQUEST_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// Puppet's `pp_preshared_key` registered extension.
pub const PRESHARED_KEY_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.34380.1.1.4");

/// Symbolic name accepted in place of [`PRESHARED_KEY_OID`].
pub const PRESHARED_KEY_NAME: &str = "pp_preshared_key";

/// PEM labels accepted for a request.
pub const PEM_LABELS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

const ATTRIBUTES_TAG: Tag = Tag::ContextSpecific { constructed: true, number: TagNumber::N0 };

/// The secrets carried by a request.
///
/// `Debug` never prints either secret.
#[derive(Clone)]
pub struct CertificateRequest {
    challenge_password: Zeroizing<String>,
    preshared_key: Zeroizing<String>,
}

impl std::fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("challenge_password", &"[REDACTED]")
            .field("preshared_key", &"[REDACTED]")
            .finish()
    }
}

impl CertificateRequest {
    /// Returns the challenge password.
    #[must_use]
    pub fn challenge_password(&self) -> &str {
        &self.challenge_password
    }

    /// Returns the preshared key.
    #[must_use]
    pub fn preshared_key(&self) -> &str {
        &self.preshared_key
    }
}

/// Decodes a PEM or DER encoded request and extracts its secrets.
///
/// # Errors
///
/// - [`AutosignError::MalformedRequest`] if the bytes are not a request, or the challenge password
///   attribute is unusable.
/// - [`AutosignError::MissingAttributes`] unless exactly two attributes are present.
/// - [`AutosignError::InvalidExtensionStructure`] if the extension request deviates from the
///   expected shape.
/// - [`AutosignError::MissingPresharedKey`] if no extension carries a non-empty key.
pub fn decode(raw: &[u8]) -> Result<CertificateRequest> {
    let der = to_der(raw)?;
    let attributes = request_attributes(&der)?;

    let [password_attr, extension_attr] = attributes.as_slice() else {
        return Err(AutosignError::MissingAttributes { found: attributes.len() });
    };

    let challenge_password = challenge_password(password_attr)?;
    let preshared_key = preshared_key(extension_attr)?;

    Ok(CertificateRequest { challenge_password, preshared_key })
}

struct Attribute<'a> {
    oid: ObjectIdentifier,
    values: Vec<AnyRef<'a>>,
}

fn to_der(raw: &[u8]) -> Result<Cow<'_, [u8]>> {
    let trimmed = raw.trim_ascii();
    if !trimmed.starts_with(b"-----BEGIN") {
        return Ok(Cow::Borrowed(raw));
    }

    let (label, der) = der::pem::decode_vec(trimmed)
        .map_err(|e| AutosignError::MalformedRequest(format!("invalid PEM: {e}")))?;
    if !PEM_LABELS.contains(&label) {
        return Err(AutosignError::MalformedRequest(format!("unexpected PEM label '{label}'")));
    }
    Ok(Cow::Owned(der))
}

fn request_attributes(der: &[u8]) -> Result<Vec<Attribute<'_>>> {
    let request = AnyRef::from_der(der)?;
    expect_tag(request, Tag::Sequence, "certificate request")?;

    let [info, algorithm, signature] = children(request)?[..] else {
        return Err(malformed("certificate request must have three elements"));
    };
    expect_tag(info, Tag::Sequence, "request info")?;
    expect_tag(algorithm, Tag::Sequence, "signature algorithm")?;
    expect_tag(signature, Tag::BitString, "signature")?;

    let [version, subject, public_key, attributes] = children(info)?[..] else {
        return Err(malformed("request info must have four elements"));
    };
    expect_tag(version, Tag::Integer, "version")?;
    expect_tag(subject, Tag::Sequence, "subject")?;
    expect_tag(public_key, Tag::Sequence, "subject public key info")?;
    expect_tag(attributes, ATTRIBUTES_TAG, "attributes")?;

    children(attributes)?.into_iter().map(attribute).collect()
}

fn attribute(any: AnyRef<'_>) -> Result<Attribute<'_>> {
    expect_tag(any, Tag::Sequence, "attribute")?;
    let [oid, values] = children(any)?[..] else {
        return Err(malformed("attribute must be a type and a value set"));
    };
    let oid = ObjectIdentifier::try_from(oid)?;
    expect_tag(values, Tag::Set, "attribute values")?;
    Ok(Attribute { oid, values: children(values)? })
}

fn challenge_password(attr: &Attribute<'_>) -> Result<Zeroizing<String>> {
    if attr.oid != CHALLENGE_PASSWORD_OID {
        return Err(malformed(format!("first attribute is {}, not challengePassword", attr.oid)));
    }
    let value = attr
        .values
        .first()
        .ok_or_else(|| malformed("challengePassword attribute has no value"))?;
    let password = text(*value).ok_or_else(|| malformed("challengePassword is not a string"))?;
    Ok(Zeroizing::new(password.to_owned()))
}

fn preshared_key(attr: &Attribute<'_>) -> Result<Zeroizing<String>> {
    if attr.oid != EXTENSION_REQUEST_OID {
        return Err(invalid(format!("second attribute is {}, not extensionRequest", attr.oid)));
    }
    let extensions = *attr.values.first().ok_or_else(|| invalid("extensionRequest has no value"))?;
    if extensions.tag() != Tag::Sequence {
        return Err(invalid("extensionRequest value is not a sequence"));
    }

    for extension in children(extensions).map_err(|e| invalid(e.to_string()))? {
        if extension.tag() != Tag::Sequence {
            return Err(invalid("extension is not a sequence"));
        }
        let parts = children(extension).map_err(|e| invalid(e.to_string()))?;
        let (id, value) = match parts[..] {
            [id, value] => (id, value),
            [id, critical, value] if critical.tag() == Tag::Boolean => (id, value),
            _ => return Err(invalid("extension must be an id, optional flag and value")),
        };
        if value.tag() != Tag::OctetString {
            return Err(invalid("extension value is not an octet string"));
        }

        if is_preshared_key_id(id)? {
            let key = extension_text(value.value())?;
            if key.is_empty() {
                return Err(AutosignError::MissingPresharedKey);
            }
            return Ok(Zeroizing::new(key.to_owned()));
        }
    }

    Err(AutosignError::MissingPresharedKey)
}

fn is_preshared_key_id(id: AnyRef<'_>) -> Result<bool> {
    if id.tag() == Tag::ObjectIdentifier {
        let oid = ObjectIdentifier::try_from(id).map_err(|e| invalid(e.to_string()))?;
        return Ok(oid == PRESHARED_KEY_OID);
    }
    match text(id) {
        Some(name) => Ok(name == PRESHARED_KEY_NAME),
        None => Err(invalid(format!("extension id has unexpected tag {}", id.tag()))),
    }
}

/// Decodes an extension value: a DER string if it is one, raw UTF-8 otherwise.
fn extension_text(octets: &[u8]) -> Result<&str> {
    if let Ok(inner) = AnyRef::from_der(octets)
        && let Some(value) = text(inner)
    {
        return Ok(value);
    }
    std::str::from_utf8(octets).map_err(|_| invalid("preshared key is not UTF-8"))
}

fn text(any: AnyRef<'_>) -> Option<&str> {
    match any.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String => {
            std::str::from_utf8(any.value()).ok()
        },
        _ => None,
    }
}

fn children(parent: AnyRef<'_>) -> der::Result<Vec<AnyRef<'_>>> {
    let mut reader = SliceReader::new(parent.value())?;
    let mut out = Vec::new();
    while !reader.is_finished() {
        out.push(AnyRef::decode(&mut reader)?);
    }
    Ok(out)
}

fn expect_tag(any: AnyRef<'_>, tag: Tag, what: &str) -> Result<()> {
    if any.tag() == tag {
        Ok(())
    } else {
        Err(malformed(format!("{what} has tag {}, expected {tag}", any.tag())))
    }
}

fn malformed(message: impl Into<String>) -> AutosignError {
    AutosignError::MalformedRequest(message.into())
}

fn invalid(message: impl Into<String>) -> AutosignError {
    AutosignError::InvalidExtensionStructure(message.into())
}
