//! Local mock chain: artifacts, reruns and offline verification

use crate::test_utils::{init_tracing, scratch_dir, test_config};
use recovery_crypto::generate;
use recovery_identity::{codec, export, AssertionType, Database};
use recovery_signer::{mock, verify};

#[test]
fn test_mock_serial_writes_every_artifact() {
    init_tracing();
    let dir = scratch_dir("mock_artifacts");
    let config = test_config(&dir);

    let chain = mock::run(&config).unwrap();
    let output = &config.output;

    assert_eq!(export::read_assertion(&output.account_assertion).unwrap(), chain.account);
    assert_eq!(
        export::read_assertion(&output.account_key_assertion).unwrap(),
        chain.account_key
    );
    assert_eq!(export::read_assertion(&output.model_assertion).unwrap(), chain.model);
    assert_eq!(export::read_assertion(&output.serial_assertion).unwrap(), chain.serial);
    assert!(!output.serial_request.exists());

    let roots = export::read_trusted_roots(&output.trusted_roots).unwrap();
    assert_eq!(roots.len(), 2);
    assert!(roots.iter().all(|a| a.sign_key_id() == chain.root_key_id));

    let keypair: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&output.keypair_json).unwrap()).unwrap();
    assert_eq!(keypair["authorityID"], "acme");
    assert!(!keypair["privateKey"].as_str().unwrap().is_empty());

    let model: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&output.model_json).unwrap()).unwrap();
    assert_eq!(model["brandID"], "acme");
    assert_eq!(model["name"], "router-x");
    assert_eq!(model["keypairID"], 1);

    assert_eq!(chain.serial.header("serial"), Some("A1228ML"));
    assert_eq!(chain.serial.authority_id(), "acme");
    assert_eq!(chain.model.sign_key_id(), chain.serial.sign_key_id());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_mock_serial_rerun_converges() {
    init_tracing();
    let dir = scratch_dir("mock_rerun");
    let config = test_config(&dir);

    let first = mock::run(&config).unwrap();
    let second = mock::run(&config).unwrap();

    assert_eq!(first.root_key_id, second.root_key_id);
    assert_eq!(first.account, second.account);
    assert_eq!(first.account_key, second.account_key);
    assert_eq!(first.model, second.model);
    assert_eq!(first.serial, second.serial);

    let roots = export::read_trusted_roots(&config.output.trusted_roots).unwrap();
    let db = Database::open(&config.keystore.dir, roots).unwrap();
    let serials = db
        .find_many(AssertionType::Serial, &[("serial", "A1228ML")])
        .unwrap();
    assert_eq!(serials.len(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_verify_accepts_the_mock_chain() {
    init_tracing();
    let dir = scratch_dir("mock_verify");
    let config = test_config(&dir);
    mock::run(&config).unwrap();

    let output = &config.output;
    let files = vec![
        output.trusted_roots.clone(),
        output.account_assertion.clone(),
        output.account_key_assertion.clone(),
        output.model_assertion.clone(),
        output.serial_assertion.clone(),
    ];
    let reports = verify::run(&config, &files).unwrap();

    assert_eq!(reports.len(), 6);
    for report in &reports {
        assert!(report.trusted, "{:?}", report);
        assert!(report.detail.is_none());
    }

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_verify_flags_model_from_foreign_key() {
    init_tracing();
    let dir = scratch_dir("mock_foreign");
    let config = test_config(&dir);
    let chain = mock::run(&config).unwrap();

    let foreign = generate(2048).unwrap();
    let forged = codec::sign(
        AssertionType::Model,
        chain.model.headers().clone(),
        None,
        &foreign,
    )
    .unwrap();
    let forged_path = dir.join("forged-model.assertion");
    export::write_assertion(&forged_path, &forged).unwrap();

    let reports = verify::run(&config, &[forged_path]).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].trusted);
    assert_eq!(reports[0].assertion_type, "model");
    assert!(reports[0].detail.is_some());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_verify_without_trusted_roots_fails() {
    init_tracing();
    let dir = scratch_dir("mock_no_roots");
    let config = test_config(&dir);

    let result = verify::run(&config, &[dir.join("model.assertion")]);
    assert!(result.is_err());

    std::fs::remove_dir_all(&dir).ok();
}

#[cfg(unix)]
#[test]
fn test_mock_serial_keystore_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    init_tracing();
    let dir = scratch_dir("mock_perms");
    let config = test_config(&dir);
    mock::run(&config).unwrap();

    let mode = std::fs::metadata(&config.keystore.dir)
        .unwrap()
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o700);
    let key_mode = std::fs::metadata(config.keystore.root_key_path())
        .unwrap()
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(key_mode, 0o600);

    std::fs::remove_dir_all(&dir).ok();
}
