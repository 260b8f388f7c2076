//! Serial signing through a remote signing server.

use anyhow::{bail, Context};
use recovery_core::Config;
use recovery_crypto::{load_or_generate, secure_file};
use recovery_identity::{export, Assertion};
use recovery_vault_client::{RemoteSigningClient, SigningSession};
use tracing::info;

/// Outcome of one remote signing run.
#[derive(Debug, Clone)]
pub struct RemoteSerial {
    pub request: Assertion,
    pub serial: Assertion,
}

/// Request a nonce, write the device-signed serial-request, submit it, and
/// write the serial the server returns.
pub async fn run(config: &Config) -> anyhow::Result<RemoteSerial> {
    let signing = &config.signing;
    if !signing.remote_enabled() {
        bail!("signing.server_url is not set; a serial-request needs a nonce from the signing server");
    }

    let keystore = &config.keystore;
    secure_file::create_secure_dir(&keystore.dir)
        .with_context(|| format!("could not create keystore {}", keystore.dir.display()))?;
    let device_key = load_or_generate(&keystore.device_key_path(), keystore.key_bits)
        .context("could not provision the device key")?;
    let model = export::read_assertion(&signing.model_assertion_file).with_context(|| {
        format!(
            "could not read model assertion {}",
            signing.model_assertion_file.display()
        )
    })?;

    let client = RemoteSigningClient::from_config(signing)?;
    let mut session = SigningSession::new(&client);

    session
        .request_nonce()
        .await
        .context("could not obtain a nonce")?;
    let request = session.build_serial_request(
        &model,
        &device_key.keypair,
        &config.chain.serial,
        config.chain.revision,
    )?;
    export::write_assertion(&config.output.serial_request, &request)?;

    let serial = session
        .submit(&request)
        .await
        .context("signing server did not sign the serial-request")?;
    export::write_assertion(&config.output.serial_assertion, &serial)?;

    info!(
        serial = %config.chain.serial,
        path = %config.output.serial_assertion.display(),
        "Signed serial written"
    );
    Ok(RemoteSerial { request, serial })
}
