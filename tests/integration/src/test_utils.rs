//! Fixtures shared by the end-to-end tests

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use recovery_core::Config;
use recovery_crypto::Keypair;
use recovery_identity::{codec, AssertionType};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const TEST_API_KEY: &str = "U2VyaWFsIFZhdWx0Cg";

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Fresh directory under the system temp dir.
pub fn scratch_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}_{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Configuration with every path inside `dir` and test-sized keys.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::example();
    config.keystore.dir = dir.join("keystore");
    config.keystore.key_bits = 2048;
    config.chain.account_id = "acme".to_string();
    config.chain.model = "router-x".to_string();
    config.chain.serial = "A1228ML".to_string();

    let output = &mut config.output;
    output.account_assertion = dir.join("account.assertion");
    output.account_key_assertion = dir.join("account-key.assertion");
    output.model_assertion = dir.join("model.assertion");
    output.serial_assertion = dir.join("serial.assertion");
    output.serial_request = dir.join("serial.request");
    output.keypair_json = dir.join("keypair.json");
    output.model_json = dir.join("model.json");
    output.trusted_roots = dir.join("trusted-roots.assertion");

    config.signing.model_assertion_file = dir.join("model.assertion");
    config
}

#[derive(Clone)]
struct ServerState {
    issued: Arc<Mutex<HashSet<String>>>,
    signed: Arc<Mutex<u32>>,
    brand_key: Arc<Keypair>,
}

/// In-process signing server countersigning serial-requests with a brand key.
pub struct MockSigningServer {
    pub url: String,
    state: ServerState,
}

impl MockSigningServer {
    pub async fn start(brand_key: Keypair) -> Self {
        let state = ServerState {
            issued: Arc::new(Mutex::new(HashSet::new())),
            signed: Arc::new(Mutex::new(0)),
            brand_key: Arc::new(brand_key),
        };
        let app = Router::new()
            .route("/request-id", post(request_id))
            .route("/sign", post(sign))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    /// Number of serials signed so far.
    pub fn signed_count(&self) -> u32 {
        *self.state.signed.lock().unwrap()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("api-key").and_then(|v| v.to_str().ok()) == Some(TEST_API_KEY)
}

async fn request_id(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    let nonce = uuid::Uuid::new_v4().to_string();
    state.issued.lock().unwrap().insert(nonce.clone());
    debug!(nonce = %nonce, "Issued nonce");
    Json(json!({ "request-id": nonce })).into_response()
}

async fn sign(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }

    let request = match codec::decode(&body) {
        Ok(request) if request.assertion_type() == AssertionType::SerialRequest => request,
        Ok(other) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("expected serial-request, got {}", other.assertion_type()),
            )
                .into_response()
        }
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let verified = request
        .body_public_key()
        .map(|key| codec::verify(&request, &key))
        .unwrap_or(false);
    if !verified {
        return (StatusCode::BAD_REQUEST, "device signature does not verify").into_response();
    }

    let nonce = request.header("nonce").unwrap_or_default().to_string();
    if !state.issued.lock().unwrap().remove(&nonce) {
        return (StatusCode::BAD_REQUEST, "nonce expired or already used").into_response();
    }

    let mut serial_headers = request.headers().clone();
    serial_headers.remove("nonce");
    let serial = match codec::sign(
        AssertionType::Serial,
        serial_headers,
        request.body().map(|b| b.to_vec()),
        &state.brand_key,
    ) {
        Ok(serial) => serial,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    *state.signed.lock().unwrap() += 1;

    (
        [(CONTENT_TYPE, "application/x.ubuntu.assertion")],
        codec::encode(&serial),
    )
        .into_response()
}
