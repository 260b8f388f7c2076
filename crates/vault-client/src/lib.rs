//! Remote signing for real devices.
//!
//! A device cannot vouch for itself: it builds a serial-request signed with
//! its own key, embedding a single-use nonce fetched from the signing server,
//! and the server answers with a serial assertion signed by the brand.
//!
//! # Example
//! ```no_run
//! use recovery_vault_client::{RemoteSigningClient, SigningSession};
//! use std::time::Duration;
//!
//! # async fn run(model: recovery_identity::Assertion, device_key: recovery_crypto::Keypair)
//! #     -> recovery_vault_client::Result<()> {
//! let client = RemoteSigningClient::new("https://signer.example", "key", Duration::from_secs(30))?;
//! let mut session = SigningSession::new(&client);
//! session.request_nonce().await?;
//! let request = session.build_serial_request(&model, &device_key, "A1228ML", 1)?;
//! let serial = session.submit(&request).await?;
//! # let _ = serial;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod request;
pub mod session;

pub use client::RemoteSigningClient;
pub use error::{ClientError, Result};
pub use request::{build_serial_request, validate_signed_serial, Nonce};
pub use session::{SessionState, SigningSession};
