//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for sending requests through the full axum router with
//! an in-memory queue, plus a `FakeWebhook` receiver bound to a random port.
//!
//! ## Test Servers
//!
//! Use [`spawn_test_server()`] when the code under test makes real HTTP
//! calls (the batch relay posting to a webhook).
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{self, HeaderMap, Method, Request, Response, StatusCode};
use axum::routing::post;
use axum::Router;
use buffer_relay::api::{create_router, AppState};
use buffer_relay::config::Config;
use buffer_relay::queue::InMemoryQueue;
use buffer_relay::types::BufferMessage;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use sha2::Sha256;
use tokio::task::JoinHandle;
use tower::ServiceExt;

/// API key configured for every test app.
pub const TEST_API_KEY: &str = "secret123";

// ============================================================================
// Test App
// ============================================================================

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub queue: Arc<InMemoryQueue>,
    pub config: Arc<Config>,
}

impl TestApp {
    /// Create a new test app with the default test config.
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    /// Create a test app with a custom config.
    pub fn with_config(config: Config) -> Self {
        let queue = Arc::new(InMemoryQueue::new());
        let state = AppState::new(config.clone(), queue.clone());
        let router = create_router(state);

        Self {
            router,
            queue,
            config: Arc::new(config),
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Build an authenticated JSON POST to `/`.
    pub fn post_json(body: &serde_json::Value) -> Request<Body> {
        Self::request(Method::POST, "/")
            .header("Authorization", format!("Bearer {TEST_API_KEY}"))
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap()
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

/// Build a queue message with default type and no extension ids.
pub fn buffer_message(chat_id: &str, message_id: &str, content: &str, timestamp: i64) -> BufferMessage {
    BufferMessage {
        chat_id: chat_id.into(),
        message_id: message_id.into(),
        content: content.into(),
        message_type: "text".into(),
        timestamp,
        account_id: None,
        conversation_id: None,
    }
}

/// Check an `X-Webhook-Signature` value the way a webhook receiver would.
pub fn verify_webhook_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_signature) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(hex_signature) else {
        return false;
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

// ============================================================================
// Test Server
// ============================================================================

/// A running test server bound to a random port.
pub struct TestServer {
    /// Server address (127.0.0.1:PORT).
    pub addr: SocketAddr,
    /// Base URL for HTTP requests (e.g., `http://127.0.0.1:12345`).
    pub url: String,
    /// Handle to the server task for cleanup.
    _handle: JoinHandle<()>,
}

/// Spawn a real HTTP server on a random port.
pub async fn spawn_test_server(router: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });

    TestServer {
        addr,
        url,
        _handle: handle,
    }
}

// ============================================================================
// Fake Webhook
// ============================================================================

/// One request seen by the fake webhook.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub payload: serde_json::Value,
    /// Status the fake answered with.
    pub status: StatusCode,
}

#[derive(Default)]
struct FakeWebhookState {
    requests: Mutex<Vec<ReceivedRequest>>,
    /// Statuses to answer with, in order; 200 once exhausted.
    statuses: Mutex<VecDeque<StatusCode>>,
}

/// Webhook receiver that records every request.
pub struct FakeWebhook {
    /// Full URL to configure as the webhook target.
    pub url: String,
    state: Arc<FakeWebhookState>,
    _server: TestServer,
}

impl FakeWebhook {
    /// Start a receiver that answers 200 to everything.
    pub async fn start() -> Self {
        Self::with_statuses(Vec::new()).await
    }

    /// Start a receiver that answers with `statuses` in order, then 200.
    pub async fn with_statuses(statuses: Vec<StatusCode>) -> Self {
        let state = Arc::new(FakeWebhookState {
            requests: Mutex::new(Vec::new()),
            statuses: Mutex::new(statuses.into()),
        });
        let router = Router::new()
            .route("/webhook", post(receive))
            .with_state(state.clone());
        let server = spawn_test_server(router).await;

        Self {
            url: format!("{}/webhook", server.url),
            state,
            _server: server,
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Payloads of requests answered with a 2xx status.
    pub fn accepted_payloads(&self) -> Vec<serde_json::Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.status.is_success())
            .map(|r| r.payload)
            .collect()
    }
}

async fn receive(
    State(state): State<Arc<FakeWebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let status = state
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::OK);
    let payload = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    state.requests.lock().unwrap().push(ReceivedRequest {
        headers,
        body: body.to_vec(),
        payload,
        status,
    });

    status
}
