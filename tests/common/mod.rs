//! In-process stand-in for the judging backend.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use judging_session::{ClientConfig, CredentialStore, Session};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

pub const PASSWORD: &str = "secret";

/// A JWT whose `exp` lies in 1970.
pub const EXPIRED_JWT: &str = "eyJhbGciOiJIUzI1NiJ9.eyJleHAiOjF9.c2ln";

#[derive(Debug)]
pub struct Backend {
    access: Mutex<String>,
    refresh: Mutex<String>,
    issued: AtomicUsize,
    rotate: AtomicBool,
    refresh_delay: Mutex<Duration>,
    login_delay: Mutex<Duration>,
    reject_all: AtomicBool,
    fail_scores: AtomicBool,
    fail_approvals: AtomicBool,
    refresh_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    protected_calls: AtomicUsize,
    last_authorization: Mutex<Option<String>>,
    scores: Mutex<Vec<Value>>,
    approvals: Mutex<Vec<Value>>,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            access: Mutex::new("access-0".into()),
            refresh: Mutex::new("refresh-0".into()),
            issued: AtomicUsize::new(0),
            rotate: AtomicBool::new(false),
            refresh_delay: Mutex::new(Duration::ZERO),
            login_delay: Mutex::new(Duration::ZERO),
            reject_all: AtomicBool::new(false),
            fail_scores: AtomicBool::new(false),
            fail_approvals: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
            protected_calls: AtomicUsize::new(0),
            last_authorization: Mutex::new(None),
            scores: Mutex::new(Vec::new()),
            approvals: Mutex::new(Vec::new()),
        }
    }
}

impl Backend {
    pub fn access_token(&self) -> String {
        self.access.lock().clone()
    }

    pub fn refresh_token(&self) -> String {
        self.refresh.lock().clone()
    }

    /// Invalidate the access token handed out so far.
    pub fn revoke_access(&self) {
        *self.access.lock() = "revoked".into();
    }

    /// Invalidate the refresh token handed out so far.
    pub fn revoke_refresh(&self) {
        *self.refresh.lock() = "revoked".into();
    }

    pub fn set_rotate(&self, rotate: bool) {
        self.rotate.store(rotate, Ordering::SeqCst);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn set_login_delay(&self, delay: Duration) {
        *self.login_delay.lock() = delay;
    }

    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::SeqCst);
    }

    pub fn set_fail_scores(&self, fail: bool) {
        self.fail_scores.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_approvals(&self, fail: bool) {
        self.fail_approvals.store(fail, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn protected_calls(&self) -> usize {
        self.protected_calls.load(Ordering::SeqCst)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.last_authorization.lock().clone()
    }

    pub fn received_scores(&self) -> Vec<Value> {
        self.scores.lock().clone()
    }

    pub fn received_approvals(&self) -> Vec<Value> {
        self.approvals.lock().clone()
    }

    fn issue(&self, prefix: &str) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        self.protected_calls.fetch_add(1, Ordering::SeqCst);
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        *self.last_authorization.lock() = header.clone();

        let expected = format!("Bearer {}", self.access.lock());
        if self.reject_all.load(Ordering::SeqCst) || header.as_deref() != Some(expected.as_str()) {
            return Err(unauthorized("Given token not valid for any token type"));
        }
        Ok(())
    }
}

fn unauthorized(detail: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": detail, "code": "token_not_valid"})),
    )
        .into_response()
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh: String,
}

#[derive(Deserialize)]
struct VerifyBody {
    token: String,
}

#[derive(Deserialize)]
struct RegisterBody {
    username: String,
    #[serde(default)]
    email: Option<String>,
}

async fn obtain(State(b): State<Arc<Backend>>, Json(body): Json<Credentials>) -> Response {
    let delay = *b.login_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if body.password != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "No active account found with the given credentials"})),
        )
            .into_response();
    }
    let access = b.issue("access");
    *b.access.lock() = access.clone();
    let refresh = b.refresh_token();
    Json(json!({
        "access": access,
        "refresh": refresh,
        "user": {"id": 7, "username": body.username, "role": "judge"}
    }))
    .into_response()
}

async fn refresh(State(b): State<Arc<Backend>>, Json(body): Json<RefreshBody>) -> Response {
    b.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *b.refresh_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if body.refresh != b.refresh_token() {
        return unauthorized("Token is invalid or expired");
    }
    let access = b.issue("access");
    *b.access.lock() = access.clone();
    if b.rotate.load(Ordering::SeqCst) {
        let rotated = b.issue("refresh");
        *b.refresh.lock() = rotated.clone();
        return Json(json!({"access": access, "refresh": rotated})).into_response();
    }
    Json(json!({"access": access})).into_response()
}

async fn verify(State(b): State<Arc<Backend>>, Json(body): Json<VerifyBody>) -> Response {
    b.verify_calls.fetch_add(1, Ordering::SeqCst);
    if body.token != b.access_token() {
        return unauthorized("Token is invalid or expired");
    }
    Json(json!({})).into_response()
}

async fn register(State(b): State<Arc<Backend>>, Json(body): Json<RegisterBody>) -> Response {
    match body.username.as_str() {
        "taken" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"username": ["A user with that username already exists."]})),
        )
            .into_response(),
        "pending" => (
            StatusCode::CREATED,
            Json(json!({"message": "Account created, awaiting approval"})),
        )
            .into_response(),
        _ => {
            let access = b.issue("access");
            *b.access.lock() = access.clone();
            (
                StatusCode::CREATED,
                Json(json!({
                    "access": access,
                    "refresh": b.refresh_token(),
                    "user": {"username": body.username, "email": body.email}
                })),
            )
                .into_response()
        }
    }
}

async fn teams(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if let Err(denied) = b.authorize(&headers) {
        return denied;
    }
    Json(json!([
        {"id": 1, "team_id": "SIH2024_001", "team_name": "Tech Innovators",
         "idea_title": "Smart Traffic Management", "progress": "Reviewed", "marks": 85},
        {"id": 2, "team_id": "SIH2024_002", "team_name": "Code Crafters",
         "idea_title": "Blockchain Voting", "progress": "Not Reviewed"}
    ]))
    .into_response()
}

async fn team(
    State(b): State<Arc<Backend>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = b.authorize(&headers) {
        return denied;
    }
    if id != "SIH2024_001" {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found."}))).into_response();
    }
    Json(json!({
        "id": 1,
        "team_id": "SIH2024_001",
        "team_name": "Tech Innovators",
        "ideas": [
            {"idea_title": "Smart Traffic Management", "sih_ps_id": "SIH1001", "is_primary": true},
            {"idea_title": "Disaster Alert System", "sih_ps_id": "SIH1002"}
        ],
        "prior_scores": {"Problem Understanding": 18, "Impact": 40}
    }))
    .into_response()
}

async fn rubrics(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if let Err(denied) = b.authorize(&headers) {
        return denied;
    }
    Json(json!([
        {"name": "Problem Understanding", "max_score": 20},
        {"name": "Innovativeness", "max_score": 20},
        {"name": "Feasibility", "max_score": 15},
        {"name": "Prototype Quality", "max_score": 20},
        {"name": "Impact", "max_score": 15},
        {"name": "Presentation/Teamwork", "max_score": 10}
    ]))
    .into_response()
}

async fn scores(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = b.authorize(&headers) {
        return denied;
    }
    if b.fail_scores.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "database unavailable"})),
        )
            .into_response();
    }
    b.scores.lock().push(body);
    StatusCode::CREATED.into_response()
}

async fn approvals(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = b.authorize(&headers) {
        return denied;
    }
    if b.fail_approvals.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "database unavailable"})),
        )
            .into_response();
    }
    b.approvals.lock().push(body);
    StatusCode::CREATED.into_response()
}

fn routes(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/api/token/", post(obtain))
        .route("/api/token/refresh/", post(refresh))
        .route("/api/token/verify/", post(verify))
        .route("/api/register/", post(register))
        .route("/api/teams/teams/", get(teams))
        .route("/api/teams/teams/{id}/", get(team))
        .route("/api/judging/rubrics/", get(rubrics))
        .route("/api/judging/scores/", post(scores))
        .route("/api/judging/approvals/", post(approvals))
        .with_state(backend)
}

/// Serve a fresh backend on an ephemeral port.
pub async fn spawn() -> (Arc<Backend>, Url) {
    let backend = Arc::new(Backend::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes(backend.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (backend, format!("http://{addr}/").parse().unwrap())
}

/// A base URL on which nothing listens.
pub fn unreachable_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/").parse().unwrap()
}

pub fn session(base_url: Url, store: Arc<dyn CredentialStore>) -> Session {
    let config = ClientConfig::new(base_url).with_request_timeout(Duration::from_secs(5));
    Session::from_config(config, store).unwrap()
}
