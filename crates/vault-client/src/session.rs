//! One device's walk through the signing protocol.
//!
//! ```text
//! Idle ──request_nonce──▶ NonceRequested ──submit──▶ SerialRequestSubmitted ──▶ Signed
//!  ▲                                                         │
//!  └──────────── transport/protocol failure ◀────────────────┴──▶ Rejected
//! ```
//!
//! A nonce is used for at most one submission. After a rejection or a failed
//! submission the caller has to request a new nonce before trying again.

use recovery_crypto::Keypair;
use recovery_identity::Assertion;
use tracing::{debug, warn};

use crate::client::RemoteSigningClient;
use crate::request::{build_serial_request, Nonce};
use crate::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    NonceRequested { nonce: Nonce },
    SerialRequestSubmitted { nonce: Nonce },
    Signed { serial: Assertion },
    Rejected { status: u16, body: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::NonceRequested { .. } => "nonce-requested",
            SessionState::SerialRequestSubmitted { .. } => "serial-request-submitted",
            SessionState::Signed { .. } => "signed",
            SessionState::Rejected { .. } => "rejected",
        }
    }
}

/// Enforces nonce-before-submit ordering against one client.
pub struct SigningSession<'a> {
    client: &'a RemoteSigningClient,
    state: SessionState,
}

impl<'a> SigningSession<'a> {
    pub fn new(client: &'a RemoteSigningClient) -> Self {
        Self {
            client,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Fetch a fresh nonce. Allowed from `Idle` and `Rejected`.
    pub async fn request_nonce(&mut self) -> Result<Nonce> {
        match self.state {
            SessionState::Idle | SessionState::Rejected { .. } => {}
            _ => return Err(self.invalid("request a nonce")),
        }

        let nonce = self.client.request_nonce().await?;
        self.transition(SessionState::NonceRequested {
            nonce: nonce.clone(),
        });
        Ok(nonce)
    }

    /// Device-sign a serial-request carrying the current nonce.
    pub fn build_serial_request(
        &self,
        model: &Assertion,
        device_key: &Keypair,
        serial: &str,
        revision: u32,
    ) -> Result<Assertion> {
        match &self.state {
            SessionState::NonceRequested { nonce } => {
                build_serial_request(model, device_key, serial, revision, nonce)
            }
            _ => Err(self.invalid("build a serial-request")),
        }
    }

    /// Submit `request`, which must carry the nonce this session holds.
    pub async fn submit(&mut self, request: &Assertion) -> Result<Assertion> {
        let nonce = match &self.state {
            SessionState::NonceRequested { nonce } => nonce.clone(),
            _ => return Err(self.invalid("submit a serial-request")),
        };
        if request.header("nonce") != Some(nonce.as_str()) {
            return Err(ClientError::InvalidState(format!(
                "serial-request carries nonce {:?}, session holds {}",
                request.header("nonce").unwrap_or_default(),
                nonce
            )));
        }

        self.transition(SessionState::SerialRequestSubmitted { nonce });
        match self.client.submit(request).await {
            Ok(serial) => {
                self.transition(SessionState::Signed {
                    serial: serial.clone(),
                });
                Ok(serial)
            }
            Err(ClientError::Rejected { status, body }) => {
                self.transition(SessionState::Rejected {
                    status,
                    body: body.clone(),
                });
                Err(ClientError::Rejected { status, body })
            }
            Err(e) => {
                warn!(error = %e, "Submission failed, nonce discarded");
                self.transition(SessionState::Idle);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = self.state.name(), to = next.name(), "Signing session transition");
        self.state = next;
    }

    fn invalid(&self, action: &str) -> ClientError {
        ClientError::InvalidState(format!("cannot {} while {}", action, self.state.name()))
    }
}
