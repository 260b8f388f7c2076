//! Remote serial signing against an in-process signing server

use crate::test_utils::{init_tracing, scratch_dir, test_config, MockSigningServer, TEST_API_KEY};
use recovery_crypto::load;
use recovery_identity::export;
use recovery_signer::{mock, remote, verify};
use recovery_vault_client::{ClientError, RemoteSigningClient};
use std::time::Duration;

#[tokio::test]
async fn test_sign_serial_end_to_end() {
    init_tracing();
    let dir = scratch_dir("remote_sign");
    let mut config = test_config(&dir);

    let chain = mock::run(&config).unwrap();
    std::fs::remove_file(&config.output.serial_assertion).unwrap();

    let brand_key = load(&config.keystore.account_key_path()).unwrap();
    let server = MockSigningServer::start(brand_key).await;
    config.signing.server_url = server.url.clone();
    config.signing.api_key = TEST_API_KEY.to_string();

    let signed = remote::run(&config).await.unwrap();
    assert_eq!(server.signed_count(), 1);

    assert!(signed.request.header("nonce").is_some());
    assert!(signed.serial.header("nonce").is_none());
    assert_eq!(signed.serial.header("serial"), Some("A1228ML"));
    assert_eq!(signed.serial.body(), signed.request.body());
    // The device key provisioned by the mock run is reused.
    assert_eq!(signed.serial.body(), chain.serial.body());

    assert_eq!(
        export::read_assertion(&config.output.serial_request).unwrap(),
        signed.request
    );
    assert_eq!(
        export::read_assertion(&config.output.serial_assertion).unwrap(),
        signed.serial
    );

    let reports = verify::run(
        &config,
        &[
            config.output.serial_request.clone(),
            config.output.serial_assertion.clone(),
        ],
    )
    .unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.trusted), "{:?}", reports);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_written_serial_request_cannot_be_replayed() {
    init_tracing();
    let dir = scratch_dir("remote_replay");
    let mut config = test_config(&dir);
    mock::run(&config).unwrap();

    let brand_key = load(&config.keystore.account_key_path()).unwrap();
    let server = MockSigningServer::start(brand_key).await;
    config.signing.server_url = server.url.clone();
    config.signing.api_key = TEST_API_KEY.to_string();

    remote::run(&config).await.unwrap();
    let request = export::read_assertion(&config.output.serial_request).unwrap();

    let client =
        RemoteSigningClient::new(&server.url, TEST_API_KEY, Duration::from_secs(10)).unwrap();
    let err = client.submit(&request).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected { status: 400, .. }), "{:?}", err);
    assert_eq!(server.signed_count(), 1);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_second_run_uses_a_fresh_nonce() {
    init_tracing();
    let dir = scratch_dir("remote_twice");
    let mut config = test_config(&dir);
    mock::run(&config).unwrap();

    let brand_key = load(&config.keystore.account_key_path()).unwrap();
    let server = MockSigningServer::start(brand_key).await;
    config.signing.server_url = server.url.clone();
    config.signing.api_key = TEST_API_KEY.to_string();

    let first = remote::run(&config).await.unwrap();
    let second = remote::run(&config).await.unwrap();

    assert_ne!(first.request.header("nonce"), second.request.header("nonce"));
    assert_eq!(first.serial.body(), second.serial.body());
    assert_eq!(server.signed_count(), 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_sign_serial_requires_server_url() {
    init_tracing();
    let dir = scratch_dir("remote_no_url");
    let config = test_config(&dir);
    assert!(config.signing.server_url.is_empty());

    let err = remote::run(&config).await.unwrap_err();
    assert!(format!("{:#}", err).contains("signing.server_url"));
    assert!(!config.output.serial_request.exists());
    assert!(!config.keystore.device_key_path().exists());

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_sign_serial_with_wrong_api_key_writes_nothing() {
    init_tracing();
    let dir = scratch_dir("remote_bad_key");
    let mut config = test_config(&dir);
    mock::run(&config).unwrap();
    std::fs::remove_file(&config.output.serial_assertion).unwrap();

    let brand_key = load(&config.keystore.account_key_path()).unwrap();
    let server = MockSigningServer::start(brand_key).await;
    config.signing.server_url = server.url.clone();
    config.signing.api_key = "not-the-key".to_string();

    assert!(remote::run(&config).await.is_err());
    assert!(!config.output.serial_request.exists());
    assert!(!config.output.serial_assertion.exists());
    assert_eq!(server.signed_count(), 0);

    std::fs::remove_dir_all(&dir).ok();
}
