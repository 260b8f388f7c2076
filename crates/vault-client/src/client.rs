//! HTTP client for the signing server.
//!
//! # Protocol
//!
//! ```text
//! POST <server>/request-id   api-key: <key>          -> {"request-id": "<nonce>"}
//! POST <server>/sign         api-key: <key>
//!                            body: serial-request    -> signed serial assertion
//! ```
//!
//! Each call is a single attempt bounded by the configured timeout.

use recovery_core::{logging::redact, SigningConfig};
use recovery_identity::{codec, Assertion, AssertionError, AssertionType};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::request::{validate_signed_serial, Nonce};
use crate::{ClientError, Result};

pub const NONCE_PATH: &str = "/request-id";
pub const SIGN_PATH: &str = "/sign";
pub const API_KEY_HEADER: &str = "api-key";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const ASSERTION_CONTENT_TYPE: &str = "application/x.ubuntu.assertion";

#[derive(Debug, Deserialize)]
struct NonceResponse {
    #[serde(rename = "request-id")]
    request_id: String,
}

/// Client for one signing server.
#[derive(Debug, Clone)]
pub struct RemoteSigningClient {
    http: reqwest::Client,
    server_url: String,
    api_key: String,
}

impl RemoteSigningClient {
    /// Create a client for `server_url`. Trailing slashes are ignored.
    pub fn new(server_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let server_url = server_url.trim().trim_end_matches('/').to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "signing server URL must be http(s), got {:?}",
                server_url
            )));
        }
        if api_key.is_empty() {
            return Err(ClientError::Config("API key must not be empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("cannot build HTTP client: {}", e)))?;

        info!(
            server_url = %server_url,
            api_key = %redact(api_key),
            timeout_secs = timeout.as_secs(),
            "Signing server client ready"
        );
        Ok(Self {
            http,
            server_url,
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &SigningConfig) -> Result<Self> {
        Self::new(
            &config.server_url,
            &config.api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Ask the server for a fresh nonce.
    pub async fn request_nonce(&self) -> Result<Nonce> {
        let url = self.endpoint(NONCE_PATH);
        debug!(url = %url, "Requesting nonce");

        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: NonceResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(body = %body, "Unparseable nonce response");
            ClientError::Protocol(format!("invalid nonce response: {}", e))
        })?;
        if parsed.request_id.trim().is_empty() {
            return Err(ClientError::Protocol("server issued an empty nonce".to_string()));
        }

        debug!(nonce = %parsed.request_id, "Received nonce");
        Ok(Nonce::new(parsed.request_id))
    }

    /// Submit a serial-request and return the signed serial.
    pub async fn submit(&self, request: &Assertion) -> Result<Assertion> {
        if request.assertion_type() != AssertionType::SerialRequest {
            return Err(AssertionError::Unsupported(format!(
                "only serial-request assertions can be submitted, got {}",
                request.assertion_type()
            ))
            .into());
        }

        let url = self.endpoint(SIGN_PATH);
        info!(
            url = %url,
            serial = request.header("serial").unwrap_or_default(),
            model = request.header("model").unwrap_or_default(),
            "Submitting serial-request"
        );

        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, ASSERTION_CONTENT_TYPE)
            .header(API_KEY_HEADER, &self.api_key)
            .body(codec::encode(request))
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!(status = status.as_u16(), body = %body, "Signing server rejected serial-request");
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let serial = codec::decode(&body).map_err(|e| {
            ClientError::Protocol(format!("signing server returned an undecodable assertion: {}", e))
        })?;
        validate_signed_serial(request, &serial)?;

        info!(
            serial = serial.header("serial").unwrap_or_default(),
            authority_id = %serial.authority_id(),
            "Received signed serial"
        );
        Ok(serial)
    }
}
