//! Canonical text wire format for assertions.
//!
//! ```text
//! type: model
//! series: 16
//! ...
//! sign-key-sha3-384: <key id>
//!
//! <body, exactly body-length bytes, only when present>
//!
//! <base64 signature, wrapped at 76 columns>
//! ```
//!
//! The signature covers the content: the header block, plus `"\n\n"` and the
//! body when a body is present. Decoding only accepts content in canonical
//! header order, so every accepted document re-encodes to the same bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use recovery_crypto::{
    decode_wrapped_base64, sign_message, verify_message, wrap_base64, BASE64_LINE_WIDTH,
};
use recovery_crypto::{Keypair, RsaPublicKey};
use std::collections::BTreeMap;

use crate::assertion::{
    canonical_order, validate_header_name, validate_header_value, Assertion, AssertionType,
    BODY_LENGTH, REVISION, SIGN_KEY_ID, TYPE_HEADER,
};
use crate::{AssertionError, Result};

const SEPARATOR: &[u8] = b"\n\n";

impl Assertion {
    /// The signed portion of the wire form.
    pub fn content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, (name, value)) in canonical_order(self.assertion_type, &self.headers)
            .into_iter()
            .enumerate()
        {
            if i > 0 {
                out.push(b'\n');
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
        }
        if let Some(body) = &self.body {
            out.extend_from_slice(SEPARATOR);
            out.extend_from_slice(body);
        }
        out
    }
}

/// Encode an assertion in its canonical wire form.
pub fn encode(assertion: &Assertion) -> Vec<u8> {
    let mut out = assertion.content();
    out.extend_from_slice(SEPARATOR);
    out.extend_from_slice(wrap_base64(&STANDARD.encode(&assertion.signature)).as_bytes());
    out.push(b'\n');
    out
}

/// Sign `headers` and `body` with `signer`.
///
/// `type`, `sign-key-sha3-384` and, when a body is given, `body-length` are
/// stamped here; callers supply everything else.
pub fn sign(
    assertion_type: AssertionType,
    headers: BTreeMap<String, String>,
    body: Option<Vec<u8>>,
    signer: &Keypair,
) -> Result<Assertion> {
    let mut headers = headers;
    let body = body.filter(|b| !b.is_empty());

    headers.insert(TYPE_HEADER.to_string(), assertion_type.as_str().to_string());
    headers.insert(SIGN_KEY_ID.to_string(), signer.id().to_string());
    match &body {
        Some(body) => {
            headers.insert(BODY_LENGTH.to_string(), body.len().to_string());
        }
        None => {
            headers.remove(BODY_LENGTH);
        }
    }

    for (name, value) in &headers {
        if !validate_header_name(name) {
            return Err(AssertionError::InvalidHeader(format!(
                "invalid header name {:?}",
                name
            )));
        }
        if !validate_header_value(value) {
            return Err(AssertionError::InvalidHeader(format!(
                "invalid value for header {}: {:?}",
                name, value
            )));
        }
    }
    check_required(assertion_type, &headers).map_err(|e| match e {
        AssertionError::Decode(reason) => AssertionError::InvalidHeader(reason),
        other => other,
    })?;

    let mut assertion = Assertion {
        assertion_type,
        headers,
        body,
        signature: Vec::new(),
    };
    assertion.signature = sign_message(signer, &assertion.content())?;
    Ok(assertion)
}

/// Check the assertion's signature against `public_key`.
pub fn verify(assertion: &Assertion, public_key: &RsaPublicKey) -> bool {
    verify_message(public_key, &assertion.content(), &assertion.signature)
}

/// Decode exactly one assertion. Trailing blank lines are tolerated.
pub fn decode(bytes: &[u8]) -> Result<Assertion> {
    let (assertion, consumed) = decode_one(bytes)?;
    if bytes[consumed..].iter().any(|b| !b.is_ascii_whitespace()) {
        return Err(AssertionError::Decode(
            "unexpected data after signature block".to_string(),
        ));
    }
    Ok(assertion)
}

/// Decode a stream of assertions separated by blank lines.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Assertion>> {
    let mut assertions = Vec::new();
    let mut rest = bytes;
    loop {
        let start = rest
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(rest.len());
        rest = &rest[start..];
        if rest.is_empty() {
            return Ok(assertions);
        }
        let (assertion, consumed) = decode_one(rest)?;
        assertions.push(assertion);
        rest = &rest[consumed..];
    }
}

/// Encode several assertions as one stream.
pub fn encode_all(assertions: &[Assertion]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, assertion) in assertions.iter().enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        out.extend_from_slice(&encode(assertion));
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn decode_one(bytes: &[u8]) -> Result<(Assertion, usize)> {
    let header_end = find(bytes, SEPARATOR)
        .ok_or_else(|| AssertionError::Decode("missing blank line after headers".to_string()))?;
    let header_text = std::str::from_utf8(&bytes[..header_end])
        .map_err(|_| AssertionError::Decode("headers are not valid UTF-8".to_string()))?;

    let mut headers = BTreeMap::new();
    for line in header_text.split('\n') {
        let (name, value) = line
            .split_once(": ")
            .ok_or_else(|| AssertionError::Decode(format!("malformed header line {:?}", line)))?;
        if !validate_header_name(name) || !validate_header_value(value) {
            return Err(AssertionError::Decode(format!(
                "malformed header line {:?}",
                line
            )));
        }
        if headers.insert(name.to_string(), value.to_string()).is_some() {
            return Err(AssertionError::Decode(format!("repeated header {}", name)));
        }
    }

    let assertion_type: AssertionType = headers
        .get(TYPE_HEADER)
        .ok_or_else(|| AssertionError::Decode("missing type header".to_string()))?
        .parse()?;
    check_required(assertion_type, &headers)?;

    let mut cursor = header_end;
    let body = match headers.get(BODY_LENGTH) {
        Some(length) => {
            let length: usize = length
                .parse()
                .map_err(|_| AssertionError::Decode(format!("invalid body-length {:?}", length)))?;
            let start = cursor + SEPARATOR.len();
            let end = start
                .checked_add(length)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| AssertionError::Decode("body shorter than body-length".to_string()))?;
            if length == 0 {
                return Err(AssertionError::Decode("body-length must be positive".to_string()));
            }
            cursor = end;
            Some(bytes[start..end].to_vec())
        }
        None => None,
    };
    let content_end = cursor;

    if !bytes[cursor..].starts_with(SEPARATOR) {
        return Err(AssertionError::Decode(
            "missing blank line before signature".to_string(),
        ));
    }
    cursor += SEPARATOR.len();
    let signature_end = find(&bytes[cursor..], SEPARATOR)
        .map(|offset| cursor + offset)
        .unwrap_or(bytes.len());
    let signature_text = std::str::from_utf8(&bytes[cursor..signature_end])
        .map_err(|_| AssertionError::Decode("signature block is not text".to_string()))?;
    if signature_text.trim().is_empty() {
        return Err(AssertionError::Decode("empty signature block".to_string()));
    }
    let signature = decode_wrapped_base64(signature_text)
        .map_err(|e| AssertionError::Decode(format!("malformed signature block: {}", e)))?;
    let block = signature_text.strip_suffix('\n').unwrap_or(signature_text);
    if block != wrap_base64(&STANDARD.encode(&signature)) {
        return Err(AssertionError::Decode(format!(
            "{} signature block is not wrapped at {} columns",
            assertion_type, BASE64_LINE_WIDTH
        )));
    }

    let assertion = Assertion {
        assertion_type,
        headers,
        body,
        signature,
    };
    if assertion.content() != bytes[..content_end] {
        return Err(AssertionError::Decode(format!(
            "{} headers are not in canonical order",
            assertion_type
        )));
    }
    Ok((assertion, signature_end))
}

fn check_required(assertion_type: AssertionType, headers: &BTreeMap<String, String>) -> Result<()> {
    for name in assertion_type
        .required_headers()
        .iter()
        .chain(std::iter::once(&SIGN_KEY_ID))
    {
        if !headers.contains_key(*name) {
            return Err(AssertionError::Decode(format!(
                "{} assertion missing required header {}",
                assertion_type, name
            )));
        }
    }
    if let Some(revision) = headers.get(REVISION) {
        revision.parse::<u32>().map_err(|_| {
            AssertionError::Decode(format!("invalid revision {:?}", revision))
        })?;
    }
    Ok(())
}
