//! Protocol tests against an in-process signing server.
//!
//! The mock server issues nonces, accepts each one exactly once, and
//! countersigns serial-requests with a brand key the way a real signing
//! service does.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use recovery_crypto::{generate, Keypair};
use recovery_identity::{codec, Assertion, AssertionType};
use recovery_vault_client::{
    build_serial_request, ClientError, Nonce, RemoteSigningClient, SessionState, SigningSession,
};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const API_KEY: &str = "U2VyaWFsIFZhdWx0Cg";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Honest,
    GarbageNonce,
    WrongSerial,
    RejectAll,
    ForeignAuthority,
    Stall,
}

#[derive(Clone)]
struct MockServer {
    issued: Arc<Mutex<HashSet<String>>>,
    brand_key: Arc<Keypair>,
    mode: Mode,
}

fn api_key_ok(headers: &HeaderMap) -> bool {
    headers.get("api-key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

async fn request_id(State(server): State<MockServer>, headers: HeaderMap) -> Response {
    if !api_key_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    if server.mode == Mode::GarbageNonce {
        return "<html>maintenance</html>".into_response();
    }
    let nonce = uuid::Uuid::new_v4().to_string();
    server.issued.lock().unwrap().insert(nonce.clone());
    Json(json!({ "request-id": nonce })).into_response()
}

async fn sign(State(server): State<MockServer>, headers: HeaderMap, body: Bytes) -> Response {
    if !api_key_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    if headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
        != Some("application/x.ubuntu.assertion")
    {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected an assertion").into_response();
    }
    if server.mode == Mode::Stall {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    if server.mode == Mode::RejectAll {
        return (StatusCode::CONFLICT, "device already has a serial").into_response();
    }

    let request = match codec::decode(&body) {
        Ok(request) if request.assertion_type() == AssertionType::SerialRequest => request,
        Ok(_) => return (StatusCode::BAD_REQUEST, "not a serial-request").into_response(),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let device_key = match request.body_public_key() {
        Ok(key) => key,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    if !codec::verify(&request, &device_key) {
        return (StatusCode::BAD_REQUEST, "bad device signature").into_response();
    }

    let nonce = request.header("nonce").unwrap_or_default().to_string();
    if !server.issued.lock().unwrap().remove(&nonce) {
        return (StatusCode::BAD_REQUEST, "unknown or reused nonce").into_response();
    }

    let mut serial_headers: BTreeMap<String, String> = request.headers().clone();
    serial_headers.remove("nonce");
    if server.mode == Mode::WrongSerial {
        serial_headers.insert("serial".to_string(), "SOMEONE-ELSE".to_string());
    }
    let signer = if server.mode == Mode::ForeignAuthority {
        serial_headers.insert("authority-id".to_string(), "evil".to_string());
        Arc::new(generate(2048).unwrap())
    } else {
        server.brand_key.clone()
    };
    let serial = codec::sign(
        AssertionType::Serial,
        serial_headers,
        request.body().map(|b| b.to_vec()),
        &signer,
    )
    .unwrap();

    (
        [(CONTENT_TYPE, "application/x.ubuntu.assertion")],
        codec::encode(&serial),
    )
        .into_response()
}

async fn spawn(mode: Mode) -> (String, Arc<Keypair>) {
    let brand_key = Arc::new(generate(2048).unwrap());
    let server = MockServer {
        issued: Arc::new(Mutex::new(HashSet::new())),
        brand_key: brand_key.clone(),
        mode,
    };
    let app = Router::new()
        .route("/request-id", post(request_id))
        .route("/sign", post(sign))
        .with_state(server);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/", addr), brand_key)
}

fn model(brand_key: &Keypair) -> Assertion {
    let headers = [
        ("series", "16"),
        ("authority-id", "acme"),
        ("brand-id", "acme"),
        ("model", "router-x"),
        ("revision", "1"),
        ("core", "ubuntu-core"),
        ("architecture", "amd64"),
        ("class", "fixed"),
        ("gadget", "pc"),
        ("kernel", "pc-kernel"),
        ("store", "brand-store"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    codec::sign(AssertionType::Model, headers, None, brand_key).unwrap()
}

fn client(url: &str) -> RemoteSigningClient {
    RemoteSigningClient::new(url, API_KEY, Duration::from_secs(10)).unwrap()
}

#[tokio::test]
async fn test_session_obtains_signed_serial() {
    let (url, brand_key) = spawn(Mode::Honest).await;
    let client = client(&url);
    let device_key = generate(2048).unwrap();

    let mut session = SigningSession::new(&client);
    let nonce = session.request_nonce().await.unwrap();
    assert!(matches!(session.state(), SessionState::NonceRequested { .. }));

    let request = session
        .build_serial_request(&model(&brand_key), &device_key, "A1228ML", 1)
        .unwrap();
    assert_eq!(request.header("nonce"), Some(nonce.as_str()));

    let serial = session.submit(&request).await.unwrap();
    assert_eq!(serial.assertion_type(), AssertionType::Serial);
    assert_eq!(serial.header("serial"), Some("A1228ML"));
    assert_eq!(serial.declared_key_id().as_ref(), Some(device_key.id()));
    assert!(codec::verify(&serial, brand_key.public_key()));
    assert!(matches!(session.state(), SessionState::Signed { .. }));

    // The nonce is spent: the session refuses to submit again.
    assert!(matches!(
        session.submit(&request).await,
        Err(ClientError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_reused_nonce_is_rejected() {
    let (url, brand_key) = spawn(Mode::Honest).await;
    let client = client(&url);
    let device_key = generate(2048).unwrap();

    let nonce = client.request_nonce().await.unwrap();
    let request =
        build_serial_request(&model(&brand_key), &device_key, "A1228ML", 1, &nonce).unwrap();

    assert!(client.submit(&request).await.is_ok());
    match client.submit(&request).await {
        Err(ClientError::Rejected { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("nonce"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_nonce_not_issued_by_server_is_rejected() {
    let (url, brand_key) = spawn(Mode::Honest).await;
    let client = client(&url);
    let device_key = generate(2048).unwrap();

    let forged = Nonce::new("made-up");
    let request =
        build_serial_request(&model(&brand_key), &device_key, "A1228ML", 1, &forged).unwrap();
    assert!(matches!(
        client.submit(&request).await,
        Err(ClientError::Rejected { status: 400, .. })
    ));
}

#[tokio::test]
async fn test_wrong_api_key_is_rejected() {
    let (url, _brand_key) = spawn(Mode::Honest).await;
    let client = RemoteSigningClient::new(&url, "wrong", Duration::from_secs(10)).unwrap();
    assert!(matches!(
        client.request_nonce().await,
        Err(ClientError::Rejected { status: 401, .. })
    ));
}

#[tokio::test]
async fn test_unparseable_nonce_is_protocol_error() {
    let (url, _brand_key) = spawn(Mode::GarbageNonce).await;
    assert!(matches!(
        client(&url).request_nonce().await,
        Err(ClientError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_mismatched_serial_is_protocol_error() {
    let (url, brand_key) = spawn(Mode::WrongSerial).await;
    let client = client(&url);
    let device_key = generate(2048).unwrap();

    let mut session = SigningSession::new(&client);
    session.request_nonce().await.unwrap();
    let request = session
        .build_serial_request(&model(&brand_key), &device_key, "A1228ML", 1)
        .unwrap();
    assert!(matches!(
        session.submit(&request).await,
        Err(ClientError::Protocol(_))
    ));
    assert_eq!(session.state(), &SessionState::Idle);
}

#[tokio::test]
async fn test_rejection_allows_fresh_nonce() {
    let (url, brand_key) = spawn(Mode::RejectAll).await;
    let client = client(&url);
    let device_key = generate(2048).unwrap();

    let mut session = SigningSession::new(&client);
    session.request_nonce().await.unwrap();
    let request = session
        .build_serial_request(&model(&brand_key), &device_key, "A1228ML", 1)
        .unwrap();
    assert!(matches!(
        session.submit(&request).await,
        Err(ClientError::Rejected { status: 409, .. })
    ));
    assert!(matches!(session.state(), SessionState::Rejected { status: 409, .. }));

    session.request_nonce().await.unwrap();
    assert!(matches!(session.state(), SessionState::NonceRequested { .. }));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client(&format!("http://{}", addr));
    let mut session = SigningSession::new(&client);
    assert!(matches!(
        session.request_nonce().await,
        Err(ClientError::Network(_))
    ));
    assert_eq!(session.state(), &SessionState::Idle);
}

#[tokio::test]
async fn test_serial_from_foreign_authority_is_protocol_error() {
    let (url, brand_key) = spawn(Mode::ForeignAuthority).await;
    let client = client(&url);
    let device_key = generate(2048).unwrap();

    let mut session = SigningSession::new(&client);
    session.request_nonce().await.unwrap();
    let request = session
        .build_serial_request(&model(&brand_key), &device_key, "A1228ML", 1)
        .unwrap();
    match session.submit(&request).await {
        Err(ClientError::Protocol(reason)) => assert!(reason.contains("evil")),
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert_eq!(session.state(), &SessionState::Idle);
}

#[tokio::test]
async fn test_stalled_server_times_out_as_network_error() {
    let (url, brand_key) = spawn(Mode::Stall).await;
    let client = RemoteSigningClient::new(&url, API_KEY, Duration::from_secs(1)).unwrap();
    let device_key = generate(2048).unwrap();

    let mut session = SigningSession::new(&client);
    session.request_nonce().await.unwrap();
    let request = session
        .build_serial_request(&model(&brand_key), &device_key, "A1228ML", 1)
        .unwrap();
    match session.submit(&request).await {
        Err(ClientError::Network(e)) => assert!(e.is_timeout()),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(session.state(), &SessionState::Idle);
}
