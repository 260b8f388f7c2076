//! RSA keypairs and their content-derived identifiers.
//!
//! A key is identified everywhere in the trust chain by the SHA3-384 digest of
//! its DER `SubjectPublicKeyInfo`, rendered as unpadded URL-safe base64. Two
//! distinct public keys therefore never share an ID, and the same key always
//! maps to the same ID regardless of where it was loaded from.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_384};
use std::fmt;

use crate::{KeyStoreError, Result};

/// Column at which base64 blocks are wrapped in text artifacts.
pub const BASE64_LINE_WIDTH: usize = 76;

/// Content-derived identifier of a public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Derive the ID of a public key.
    pub fn of(public_key: &RsaPublicKey) -> Result<Self> {
        let der = public_key_der(public_key)?;
        Ok(Self::of_der(&der))
    }

    /// Derive the ID from an already DER-encoded public key.
    pub fn of_der(der: &[u8]) -> Self {
        let digest = Sha3_384::digest(der);
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// An RSA signing keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct Keypair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    id: KeyId,
}

impl Keypair {
    /// Wrap an existing private key, deriving its public half and ID.
    pub fn from_private_key(private: RsaPrivateKey) -> Result<Self> {
        let public = private.to_public_key();
        let id = KeyId::of(&public)?;
        Ok(Self {
            private,
            public,
            id,
        })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("id", &self.id)
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// DER `SubjectPublicKeyInfo` of a public key.
pub fn public_key_der(public_key: &RsaPublicKey) -> Result<Vec<u8>> {
    let document = public_key
        .to_public_key_der()
        .map_err(|e| KeyStoreError::Format(format!("cannot encode public key: {}", e)))?;
    Ok(document.as_bytes().to_vec())
}

/// Text form of a public key as carried in assertion bodies.
pub fn encode_public_key(public_key: &RsaPublicKey) -> Result<String> {
    let der = public_key_der(public_key)?;
    Ok(wrap_base64(&STANDARD.encode(der)))
}

/// Parse the text form produced by [`encode_public_key`].
pub fn decode_public_key(text: &str) -> Result<RsaPublicKey> {
    let der = decode_wrapped_base64(text)?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| KeyStoreError::Format(format!("invalid public key: {}", e)))
}

/// Split a base64 string into lines of [`BASE64_LINE_WIDTH`] characters.
pub fn wrap_base64(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(BASE64_LINE_WIDTH)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode standard base64 that may be wrapped across lines.
pub fn decode_wrapped_base64(text: &str) -> Result<Vec<u8>> {
    let joined: String = text.split_whitespace().collect();
    STANDARD
        .decode(joined)
        .map_err(|e| KeyStoreError::Format(format!("invalid base64: {}", e)))
}
