//! Local mock of the remote API for tests
//!
//! Serves the token endpoints plus a catch-all business route on
//! `127.0.0.1:0`. The business route answers 200 only for the bearer token the
//! mock currently considers valid and 401 `token_not_valid` otherwise, which
//! is what the real API does with an expired JWT.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// How the refresh endpoint answers.
#[derive(Debug, Clone)]
pub(crate) enum RefreshMode {
    /// 200 with a new access token, and a rotated refresh token when set
    Issue {
        access: String,
        rotated: Option<String>,
    },
    /// 401 `token_not_valid`
    Reject,
    /// Accept the connection and never answer
    Hang,
}

impl RefreshMode {
    pub(crate) fn issue(access: &str, rotated: Option<&str>) -> Self {
        RefreshMode::Issue {
            access: access.to_string(),
            rotated: rotated.map(str::to_string),
        }
    }
}

struct MockState {
    valid_access: Mutex<String>,
    pinned: AtomicBool,
    refresh_mode: Mutex<RefreshMode>,
    refresh_delay: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    business_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    authorizations_seen: Mutex<Vec<Option<String>>>,
}

pub(crate) struct MockApi {
    /// Base URL including the `/api/v1` prefix
    pub url: String,
    state: Arc<MockState>,
}

impl MockApi {
    /// Start the mock. The business route initially accepts `at_valid`.
    pub(crate) async fn start(refresh_mode: RefreshMode) -> Self {
        let state = Arc::new(MockState {
            valid_access: Mutex::new("at_valid".to_string()),
            pinned: AtomicBool::new(false),
            refresh_mode: Mutex::new(refresh_mode),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_calls: AtomicUsize::new(0),
            business_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            authorizations_seen: Mutex::new(Vec::new()),
        });

        let app = axum::Router::new()
            .route("/api/v1/auth/token/", post(login))
            .route("/api/v1/auth/token/refresh/", post(refresh))
            .route("/api/v1/auth/token/verify/", post(verify))
            .route("/api/v1/auth/logout/", post(logout))
            .route("/api/v1/slow/", get(slow))
            .fallback(business)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/v1", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, state }
    }

    /// Change which access token the business route accepts.
    pub(crate) fn set_valid_access(&self, token: &str) {
        *self.state.valid_access.lock().unwrap() = token.to_string();
    }

    /// Accept only `token`, even after a refresh issues another one.
    pub(crate) fn pin_valid_access(&self, token: &str) {
        self.set_valid_access(token);
        self.state.pinned.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.state.refresh_mode.lock().unwrap() = mode;
    }

    /// Delay refresh answers so concurrent callers pile up on one cycle.
    pub(crate) fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock().unwrap() = delay;
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn business_calls(&self) -> usize {
        self.state.business_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.refresh_tokens_seen.lock().unwrap().clone()
    }

    /// `Authorization` header of every business call, in arrival order.
    pub(crate) fn authorizations_seen(&self) -> Vec<Option<String>> {
        self.state.authorizations_seen.lock().unwrap().clone()
    }
}

fn token_not_valid() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "detail": "Given token not valid for any token type",
            "code": "token_not_valid"
        })),
    )
        .into_response()
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if body["password"] != "correct" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "No active account found with the given credentials"})),
        )
            .into_response();
    }
    *state.valid_access.lock().unwrap() = "at_login".to_string();
    Json(json!({"access": "at_login", "refresh": "rt_login"})).into_response()
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = body["refresh"].as_str() {
        state
            .refresh_tokens_seen
            .lock()
            .unwrap()
            .push(token.to_string());
    }

    let delay = *state.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mode = state.refresh_mode.lock().unwrap().clone();
    match mode {
        RefreshMode::Issue { access, rotated } => {
            if !state.pinned.load(Ordering::SeqCst) {
                *state.valid_access.lock().unwrap() = access.clone();
            }
            let mut body = json!({ "access": access });
            if let Some(rotated) = rotated {
                body["refresh"] = Value::String(rotated);
            }
            Json(body).into_response()
        }
        RefreshMode::Reject => token_not_valid(),
        RefreshMode::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

async fn verify(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let valid = state.valid_access.lock().unwrap().clone();
    if body["token"] == valid.as_str() {
        Json(json!({})).into_response()
    } else {
        token_not_valid()
    }
}

async fn logout(State(state): State<Arc<MockState>>) -> StatusCode {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn slow() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(30)).await;
    StatusCode::OK
}

/// Any other path: authorized by bearer token, echoes what it received.
async fn business(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.business_calls.fetch_add(1, Ordering::SeqCst);
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state
        .authorizations_seen
        .lock()
        .unwrap()
        .push(authorization.clone());

    if uri.path() == "/api/v1/status/500/" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }

    let valid = format!("Bearer {}", state.valid_access.lock().unwrap());
    if authorization.as_deref() != Some(valid.as_str()) {
        return token_not_valid();
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "body": body,
        "custom": headers.get("x-client").and_then(|v| v.to_str().ok()),
    }))
    .into_response()
}
