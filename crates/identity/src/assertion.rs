//! Assertion documents and the per-type header schema.
//!
//! An assertion is an immutable signed document: a typed set of string
//! headers, an optional body, and a signature over the canonical encoding of
//! both. The schema here fixes, for each type, which headers are required,
//! the order they are encoded in, and which of them form the primary key
//! used for storage and lookup.

use recovery_crypto::{decode_public_key, KeyId, RsaPublicKey};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{AssertionError, Result};

pub const TYPE_HEADER: &str = "type";
pub const AUTHORITY_ID: &str = "authority-id";
pub const SIGN_KEY_ID: &str = "sign-key-sha3-384";
pub const BODY_LENGTH: &str = "body-length";
pub const REVISION: &str = "revision";

/// Assertion types handled by the trust chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssertionType {
    Account,
    AccountKey,
    Model,
    SerialRequest,
    Serial,
}

impl AssertionType {
    pub const ALL: [AssertionType; 5] = [
        AssertionType::Account,
        AssertionType::AccountKey,
        AssertionType::Model,
        AssertionType::SerialRequest,
        AssertionType::Serial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionType::Account => "account",
            AssertionType::AccountKey => "account-key",
            AssertionType::Model => "model",
            AssertionType::SerialRequest => "serial-request",
            AssertionType::Serial => "serial",
        }
    }

    /// Required headers in encoding order, excluding `type` and the signer key ID.
    pub fn required_headers(&self) -> &'static [&'static str] {
        match self {
            AssertionType::Account => &[
                "authority-id",
                "account-id",
                "display-name",
                "timestamp",
                "username",
                "validation",
            ],
            AssertionType::AccountKey => &[
                "authority-id",
                "public-key-sha3-384",
                "account-id",
                "since",
                "body-length",
            ],
            AssertionType::Model => &[
                "series",
                "authority-id",
                "brand-id",
                "model",
                "revision",
                "core",
                "architecture",
                "class",
                "gadget",
                "kernel",
                "store",
            ],
            AssertionType::Serial => &[
                "series",
                "authority-id",
                "brand-id",
                "model",
                "serial",
                "revision",
                "device-key-sha3-384",
                "body-length",
            ],
            AssertionType::SerialRequest => &[
                "series",
                "authority-id",
                "brand-id",
                "model",
                "serial",
                "revision",
                "nonce",
                "device-key-sha3-384",
                "body-length",
            ],
        }
    }

    /// Headers that identify one logical assertion of this type.
    pub fn primary_key(&self) -> &'static [&'static str] {
        match self {
            AssertionType::Account => &["account-id"],
            AssertionType::AccountKey => &["account-id", "public-key-sha3-384"],
            AssertionType::Model => &["series", "brand-id", "model"],
            AssertionType::Serial => &["brand-id", "model", "serial"],
            AssertionType::SerialRequest => &["brand-id", "model", "serial", "nonce"],
        }
    }

    /// Whether assertions of this type may be stored in the database.
    pub fn is_storable(&self) -> bool {
        !matches!(self, AssertionType::SerialRequest)
    }
}

impl fmt::Display for AssertionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssertionType {
    type Err = AssertionError;

    fn from_str(s: &str) -> Result<Self> {
        AssertionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AssertionError::Decode(format!("unknown assertion type {:?}", s)))
    }
}

/// A signed assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub(crate) assertion_type: AssertionType,
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) signature: Vec<u8>,
}

impl Assertion {
    pub fn assertion_type(&self) -> AssertionType {
        self.assertion_type
    }

    /// All headers, including `type` and the signer key ID.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn authority_id(&self) -> &str {
        self.header(AUTHORITY_ID).unwrap_or_default()
    }

    pub fn sign_key_id(&self) -> KeyId {
        KeyId::from(self.header(SIGN_KEY_ID).unwrap_or_default())
    }

    /// Revision number; types without a `revision` header are at revision 0.
    pub fn revision(&self) -> u32 {
        self.header(REVISION)
            .and_then(|r| r.parse().ok())
            .unwrap_or(0)
    }

    /// Primary-key values in schema order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.assertion_type
            .primary_key()
            .iter()
            .map(|name| self.header(name).unwrap_or_default())
            .collect()
    }

    /// Primary-key headers as a database query.
    pub fn primary_key_query(&self) -> Vec<(&'static str, &str)> {
        self.assertion_type
            .primary_key()
            .iter()
            .map(|name| (*name, self.header(name).unwrap_or_default()))
            .collect()
    }

    /// Primary key rendered for logs and storage, e.g. `["16","acme","router-x"]`.
    pub fn primary_key_string(&self) -> String {
        render_primary_key(&self.primary_key())
    }

    /// Whether every `(name, value)` pair matches this assertion's headers.
    pub fn matches(&self, query: &[(&str, &str)]) -> bool {
        query
            .iter()
            .all(|(name, value)| self.header(name) == Some(*value))
    }

    /// Public key carried in the body of account-key, serial, and
    /// serial-request assertions.
    pub fn body_public_key(&self) -> Result<RsaPublicKey> {
        match self.assertion_type {
            AssertionType::AccountKey | AssertionType::Serial | AssertionType::SerialRequest => {}
            other => {
                return Err(AssertionError::Unsupported(format!(
                    "{} assertions carry no public key",
                    other
                )))
            }
        }
        let body = self
            .body()
            .ok_or_else(|| AssertionError::Decode("missing public key body".to_string()))?;
        let text = std::str::from_utf8(body)
            .map_err(|_| AssertionError::Decode("public key body is not text".to_string()))?;
        Ok(decode_public_key(text)?)
    }

    /// ID of the key named by the type's key header
    /// (`public-key-sha3-384` or `device-key-sha3-384`).
    pub fn declared_key_id(&self) -> Option<KeyId> {
        let header = match self.assertion_type {
            AssertionType::AccountKey => "public-key-sha3-384",
            AssertionType::Serial | AssertionType::SerialRequest => "device-key-sha3-384",
            _ => return None,
        };
        self.header(header).map(KeyId::from)
    }
}

/// Storage form of primary-key values given in schema order.
pub(crate) fn render_primary_key(values: &[&str]) -> String {
    serde_json::to_string(values).unwrap_or_default()
}

/// Order header names canonically: `type`, the type's required headers,
/// other headers sorted, then the signer key ID.
pub(crate) fn canonical_order<'a>(
    assertion_type: AssertionType,
    headers: &'a BTreeMap<String, String>,
) -> Vec<(&'a str, &'a str)> {
    let required = assertion_type.required_headers();
    let mut ordered = Vec::with_capacity(headers.len());

    if let Some(value) = headers.get(TYPE_HEADER) {
        ordered.push((TYPE_HEADER, value.as_str()));
    }
    for name in required {
        if let Some((key, value)) = headers.get_key_value(*name) {
            ordered.push((key.as_str(), value.as_str()));
        }
    }
    // BTreeMap iteration is already lexicographic
    for (key, value) in headers {
        let key = key.as_str();
        if key != TYPE_HEADER && key != SIGN_KEY_ID && !required.contains(&key) {
            ordered.push((key, value.as_str()));
        }
    }
    if let Some(value) = headers.get(SIGN_KEY_ID) {
        ordered.push((SIGN_KEY_ID, value.as_str()));
    }
    ordered
}

/// Header names are lowercase ASCII letters, digits, and dashes.
pub(crate) fn validate_header_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Header values are non-empty single lines without surrounding whitespace.
pub(crate) fn validate_header_value(value: &str) -> bool {
    !value.is_empty() && !value.contains('\n') && !value.contains('\r') && value.trim() == value
}
