//! Local chain construction for mock and test environments.
//!
//! The local root authority signs the account and account-key; the
//! account's delegated key signs the model and serial. Keys are reused from
//! the keystore directory when present, so repeated runs converge on the
//! same chain.

use anyhow::Context;
use recovery_core::Config;
use recovery_crypto::{load_or_generate, secure_file, KeyId};
use recovery_identity::{
    export, Assertion, KeypairSummary, ModelFields, ModelSummary, RootAuthority, SerialFields,
    TrustChainBuilder,
};
use tracing::{info, warn};

/// Assertions produced by one mock run.
#[derive(Debug, Clone)]
pub struct MockChain {
    pub root_key_id: KeyId,
    pub account: Assertion,
    pub account_key: Assertion,
    pub model: Assertion,
    pub serial: Assertion,
}

/// Build account, account-key, model and serial and write every artifact.
pub fn run(config: &Config) -> anyhow::Result<MockChain> {
    warn!("Signing the serial locally; the result is only trusted by this tool's own root");

    let keystore = &config.keystore;
    let output = &config.output;
    let account_id = config.chain.account_id.as_str();

    secure_file::create_secure_dir(&keystore.dir)
        .with_context(|| format!("could not create keystore {}", keystore.dir.display()))?;
    let root_key = load_or_generate(&keystore.root_key_path(), keystore.key_bits)
        .context("could not provision the root authority key")?;
    let root = RootAuthority::new(config.authority.root_account_id.clone(), root_key.keypair);
    let root_key_id = root.keypair().id().clone();

    export::write_trusted_roots(&output.trusted_roots, &root.trusted_assertions()?)
        .context("could not write trusted roots")?;
    let mut chain = TrustChainBuilder::open(&keystore.dir, root)
        .with_context(|| format!("could not open keystore {}", keystore.dir.display()))?;

    let account = chain
        .ensure_account(account_id)
        .with_context(|| format!("could not establish account {}", account_id))?;
    export::write_assertion(&output.account_assertion, &account)?;

    let account_key = load_or_generate(&keystore.account_key_path(), keystore.key_bits)
        .context("could not provision the account key")?;
    let account_key_assertion = chain
        .ensure_account_key(account_id, &account_key.keypair)
        .with_context(|| format!("could not delegate a key to account {}", account_id))?;
    export::write_assertion(&output.account_key_assertion, &account_key_assertion)?;
    export::write_keypair_summary(
        &output.keypair_json,
        &KeypairSummary::new(account_id, &account_key.keypair)?,
    )?;

    let model = chain
        .build_model(&account_key.keypair, &ModelFields::from(&config.chain))
        .with_context(|| format!("could not build model {}", config.chain.model))?;
    export::write_assertion(&output.model_assertion, &model)?;
    export::write_model_summary(&output.model_json, &ModelSummary::of(&model)?)?;

    let device_key = load_or_generate(&keystore.device_key_path(), keystore.key_bits)
        .context("could not provision the device key")?;
    let serial = chain
        .build_serial(
            &account_key.keypair,
            device_key.keypair.public_key(),
            &SerialFields::from(&config.chain),
        )
        .with_context(|| format!("could not build serial {}", config.chain.serial))?;
    export::write_assertion(&output.serial_assertion, &serial)?;

    info!(
        account_id = %account_id,
        model = %config.chain.model,
        serial = %config.chain.serial,
        device_key = %device_key.keypair.id(),
        "Mock chain complete"
    );

    Ok(MockChain {
        root_key_id,
        account,
        account_key: account_key_assertion,
        model,
        serial,
    })
}
