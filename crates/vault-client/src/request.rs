//! Serial-request construction and checking of the serial that comes back.

use recovery_crypto::{encode_public_key, Keypair};
use recovery_identity::{codec, Assertion, AssertionError, AssertionType};
use std::collections::BTreeMap;
use std::fmt;

use crate::{ClientError, Result};

/// Single-use token issued by the signing server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(String);

impl Nonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build a device-signed serial-request for one device of `model`.
///
/// The request names the model's brand as authority and carries the
/// device's public key as its body.
pub fn build_serial_request(
    model: &Assertion,
    device_key: &Keypair,
    serial: &str,
    revision: u32,
    nonce: &Nonce,
) -> Result<Assertion> {
    if model.assertion_type() != AssertionType::Model {
        return Err(AssertionError::Unsupported(format!(
            "serial-request needs a model assertion, got {}",
            model.assertion_type()
        ))
        .into());
    }

    let brand_id = model.header("brand-id").unwrap_or_default();
    let mut headers = BTreeMap::new();
    for (name, value) in [
        ("series", model.header("series").unwrap_or_default()),
        ("authority-id", brand_id),
        ("brand-id", brand_id),
        ("model", model.header("model").unwrap_or_default()),
        ("serial", serial),
        ("nonce", nonce.as_str()),
        ("device-key-sha3-384", device_key.id().as_str()),
    ] {
        headers.insert(name.to_string(), value.to_string());
    }
    headers.insert("revision".to_string(), revision.to_string());

    let body = encode_public_key(device_key.public_key())
        .map_err(AssertionError::from)?
        .into_bytes();
    Ok(codec::sign(
        AssertionType::SerialRequest,
        headers,
        Some(body),
        device_key,
    )?)
}

/// Check that `serial` answers `request`: signed by the request's brand,
/// same model, serial number and device key.
pub fn validate_signed_serial(request: &Assertion, serial: &Assertion) -> Result<()> {
    if serial.assertion_type() != AssertionType::Serial {
        return Err(ClientError::Protocol(format!(
            "signing server returned a {} assertion instead of a serial",
            serial.assertion_type()
        )));
    }

    let brand_id = request.header("brand-id").unwrap_or_default();
    if serial.authority_id() != brand_id {
        return Err(ClientError::Protocol(format!(
            "returned serial is signed by authority {:?}, expected brand {:?}",
            serial.authority_id(),
            brand_id
        )));
    }

    for name in ["authority-id", "brand-id", "model", "serial", "device-key-sha3-384"] {
        if serial.header(name) != request.header(name) {
            return Err(ClientError::Protocol(format!(
                "returned serial has {} {:?}, request had {:?}",
                name,
                serial.header(name).unwrap_or_default(),
                request.header(name).unwrap_or_default()
            )));
        }
    }

    if serial.body() != request.body() {
        return Err(ClientError::Protocol(
            "returned serial carries a different device key".to_string(),
        ));
    }
    Ok(())
}
