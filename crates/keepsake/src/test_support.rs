// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: an in-process backend and client builders.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Form, Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::config::ClientConfig;
use crate::credential::store::{CredentialStore, MemoryStore};
use crate::credential::{CredentialPair, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::media::{LocalFile, DEFAULT_MAX_UPLOAD_BYTES};
use crate::upload::journal::ConfirmJournal;
use crate::Client;

pub const PASSWORD: &str = "hunter2";

/// Server-side state of one stored object.
#[derive(Debug, Clone)]
pub struct MockObject {
    pub title: String,
    pub content_type: String,
    pub status: &'static str,
    pub bytes_received: Option<usize>,
}

/// Observable state and knobs of the mock backend.
pub struct MockState {
    storage_base: String,
    pub refresh_calls: AtomicU32,
    pub protected_calls: AtomicU32,
    pub ticket_calls: AtomicU32,
    pub transfer_calls: AtomicU32,
    pub confirm_calls: AtomicU32,
    pub confirm_effects: AtomicU32,
    /// Fail every refresh with 401.
    pub refresh_fails: AtomicBool,
    /// Issue a new refresh token on every refresh.
    pub rotate_refresh: AtomicBool,
    /// Reject every access token, even fresh ones.
    pub reject_all: AtomicBool,
    /// Set when a storage PUT carried an Authorization header.
    pub transfer_saw_bearer: AtomicBool,
    pub refresh_delay: Mutex<Duration>,
    pub transfer_delay: Mutex<Duration>,
    /// Idempotency keys of every attempt, including rejected ones.
    pub seen_confirm_keys: Mutex<Vec<String>>,
    pub seen_ticket_keys: Mutex<Vec<String>>,
    access_token: Mutex<String>,
    refresh_token: Mutex<String>,
    generation: AtomicU32,
    objects: Mutex<HashMap<String, MockObject>>,
    ticket_keys: Mutex<HashMap<String, String>>,
    confirm_keys: Mutex<HashMap<String, String>>,
    fail_transfer: Mutex<HashSet<String>>,
    fail_confirm: Mutex<HashSet<String>>,
}

impl MockState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_all.load(Ordering::Relaxed) {
            return false;
        }
        let valid = self.access_token.lock().clone();
        !valid.is_empty() && bearer(headers).is_some_and(|b| b == valid)
    }

    fn issue(&self, rotate_refresh: bool) -> (String, Option<String>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let access = format!("access-{generation}");
        *self.access_token.lock() = access.clone();
        let refresh = if rotate_refresh {
            let refresh = format!("refresh-{generation}");
            *self.refresh_token.lock() = refresh.clone();
            Some(refresh)
        } else {
            None
        };
        (access, refresh)
    }
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState {
            storage_base: format!("http://{addr}/storage"),
            refresh_calls: AtomicU32::new(0),
            protected_calls: AtomicU32::new(0),
            ticket_calls: AtomicU32::new(0),
            transfer_calls: AtomicU32::new(0),
            confirm_calls: AtomicU32::new(0),
            confirm_effects: AtomicU32::new(0),
            refresh_fails: AtomicBool::new(false),
            rotate_refresh: AtomicBool::new(true),
            reject_all: AtomicBool::new(false),
            transfer_saw_bearer: AtomicBool::new(false),
            refresh_delay: Mutex::new(Duration::ZERO),
            transfer_delay: Mutex::new(Duration::ZERO),
            seen_confirm_keys: Mutex::new(Vec::new()),
            seen_ticket_keys: Mutex::new(Vec::new()),
            access_token: Mutex::new("access-0".to_owned()),
            refresh_token: Mutex::new("refresh-0".to_owned()),
            generation: AtomicU32::new(0),
            objects: Mutex::new(HashMap::new()),
            ticket_keys: Mutex::new(HashMap::new()),
            confirm_keys: Mutex::new(HashMap::new()),
            fail_transfer: Mutex::new(HashSet::new()),
            fail_confirm: Mutex::new(HashSet::new()),
        });

        let app = Router::new()
            .route("/v1/auth/refresh", post(refresh))
            .route("/v1/auth/login", post(login))
            .route("/v1/auth/logout", post(logout))
            .route("/v1/users/me", get(me))
            .route("/v1/media/files/upload", post(ticket))
            .route("/v1/media/files/upload/confirm", post(confirm))
            .route("/storage/{id}", put(store_object))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            api_url: self.base_url(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            request_timeout_ms: 5_000,
            transfer_timeout_ms: 5_000,
            upload_concurrency: 4,
            state_dir: None,
        }
    }

    /// The pair the backend currently accepts.
    pub fn valid_pair(&self) -> CredentialPair {
        CredentialPair {
            access_token: self.state.access_token.lock().clone(),
            refresh_token: self.state.refresh_token.lock().clone(),
        }
    }

    /// Invalidate the current access token; only a refresh brings one back.
    pub fn expire_access_token(&self) {
        self.state.access_token.lock().clear();
    }

    pub fn fail_transfer_for(&self, title: &str) {
        self.state.fail_transfer.lock().insert(title.to_owned());
    }

    pub fn fail_confirm_for(&self, title: &str) {
        self.state.fail_confirm.lock().insert(title.to_owned());
    }

    pub fn heal_confirm(&self) {
        self.state.fail_confirm.lock().clear();
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock() = delay;
    }

    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.state.transfer_delay.lock() = delay;
    }

    pub fn object(&self, file_id: &str) -> Option<MockObject> {
        self.state.objects.lock().get(file_id).cloned()
    }

    /// A store seeded with the currently valid pair.
    pub fn logged_in_store(&self) -> Arc<dyn CredentialStore> {
        let pair = self.valid_pair();
        let store = MemoryStore::new();
        store.set_many(&[
            (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
            (REFRESH_TOKEN_KEY, pair.refresh_token.as_str()),
        ]);
        Arc::new(store)
    }

    pub fn client_with(&self, config: &ClientConfig) -> anyhow::Result<Client> {
        Client::with_parts(config, self.logged_in_store(), ConfirmJournal::in_memory())
    }

    pub fn client(&self) -> anyhow::Result<Client> {
        self.client_with(&self.config())
    }
}

/// Read one of the backend's call counters.
pub fn calls(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::Relaxed)
}

/// An in-memory JPEG of `len` bytes.
pub fn jpeg(name: &str, len: usize) -> LocalFile {
    LocalFile::from_bytes(name, "image/jpeg", Bytes::from(vec![0xAB; len]))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn error(status: StatusCode, code: &str, detail: &str) -> Response {
    (status, Json(json!({ "code": code, "detail": detail }))).into_response()
}

fn unauthorized() -> Response {
    error(StatusCode::UNAUTHORIZED, "TOKEN_SIGNATURE_EXPIRED", "token expired")
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_owned)
}

async fn refresh(State(s): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    s.refresh_calls.fetch_add(1, Ordering::Relaxed);
    let delay = *s.refresh_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let expected = s.refresh_token.lock().clone();
    if s.refresh_fails.load(Ordering::Relaxed) || bearer(&headers) != Some(expected.as_str()) {
        return error(StatusCode::UNAUTHORIZED, "TOKEN_REVOKED", "refresh token revoked");
    }

    let (access, refresh) = s.issue(s.rotate_refresh.load(Ordering::Relaxed));
    let mut body = json!({ "code": "SUCCESS", "detail": "refreshed", "access_token": access, "token_type": "bearer" });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    Json(body).into_response()
}

async fn login(State(s): State<Arc<MockState>>, Form(form): Form<HashMap<String, String>>) -> Response {
    if form.get("password").map(String::as_str) != Some(PASSWORD) {
        return error(
            StatusCode::UNAUTHORIZED,
            "INCORRECT_USERNAME_PASSWORD",
            "incorrect username or password",
        );
    }
    let (access, refresh) = s.issue(true);
    Json(json!({
        "code": "SUCCESS",
        "detail": "logged in",
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
    }))
    .into_response()
}

async fn logout(State(s): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !s.authorized(&headers) {
        return unauthorized();
    }
    s.access_token.lock().clear();
    Json(json!({ "code": "SUCCESS", "detail": "logged out" })).into_response()
}

async fn me(State(s): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    s.protected_calls.fetch_add(1, Ordering::Relaxed);
    if !s.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "user": {
            "id": "7d0c6a8e-0000-4000-8000-000000000001",
            "created_at": "2026-02-14T10:00:00Z",
            "username": "alex",
            "avatar_url": null,
            "is_active": true,
        }
    }))
    .into_response()
}

#[derive(Deserialize)]
struct TicketBody {
    content_type: String,
    title: String,
    #[allow(dead_code)]
    description: Option<String>,
}

async fn ticket(
    State(s): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<TicketBody>,
) -> Response {
    s.ticket_calls.fetch_add(1, Ordering::Relaxed);
    let key = idempotency_key(&headers);
    if let Some(ref key) = key {
        s.seen_ticket_keys.lock().push(key.clone());
    }
    if !s.authorized(&headers) {
        return unauthorized();
    }
    let Some(key) = key else {
        return error(StatusCode::BAD_REQUEST, "INVALID_IDEMPOTENCY_KEY", "missing idempotency key");
    };

    let file_id = {
        let mut keys = s.ticket_keys.lock();
        match keys.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                let file_id = uuid::Uuid::new_v4().to_string();
                s.objects.lock().insert(
                    file_id.clone(),
                    MockObject {
                        title: body.title,
                        content_type: body.content_type,
                        status: "PENDING",
                        bytes_received: None,
                    },
                );
                keys.insert(key, file_id.clone());
                file_id
            }
        }
    };

    Json(json!({
        "url": {
            "file_id": file_id,
            "presigned_url": format!("{}/{file_id}", s.storage_base),
        }
    }))
    .into_response()
}

async fn store_object(
    State(s): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    s.transfer_calls.fetch_add(1, Ordering::Relaxed);
    if headers.contains_key(header::AUTHORIZATION) {
        s.transfer_saw_bearer.store(true, Ordering::Relaxed);
    }
    let delay = *s.transfer_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut objects = s.objects.lock();
    let Some(object) = objects.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if s.fail_transfer.lock().contains(&object.title) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    object.bytes_received = Some(body.len());
    StatusCode::OK.into_response()
}

#[derive(Deserialize)]
struct ConfirmBody {
    file_id: String,
}

async fn confirm(
    State(s): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<ConfirmBody>,
) -> Response {
    s.confirm_calls.fetch_add(1, Ordering::Relaxed);
    let key = idempotency_key(&headers);
    if let Some(ref key) = key {
        s.seen_confirm_keys.lock().push(key.clone());
    }
    if !s.authorized(&headers) {
        return unauthorized();
    }
    let Some(key) = key else {
        return error(StatusCode::BAD_REQUEST, "INVALID_IDEMPOTENCY_KEY", "missing idempotency key");
    };

    let mut keys = s.confirm_keys.lock();
    if let Some(previous) = keys.get(&key) {
        if *previous == body.file_id {
            return Json(json!({ "code": "SUCCESS", "detail": "already confirmed" })).into_response();
        }
        return error(StatusCode::CONFLICT, "IDEMPOTENCY_CONFLICT", "key reused for another file");
    }

    let mut objects = s.objects.lock();
    let Some(object) = objects.get_mut(&body.file_id) else {
        return error(StatusCode::NOT_FOUND, "FILE_NOT_FOUND", "file not found");
    };
    if s.fail_confirm.lock().contains(&object.title) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "storage unavailable");
    }
    if object.bytes_received.is_none() {
        return error(StatusCode::BAD_REQUEST, "UPLOAD_NOT_COMPLETED", "upload not completed");
    }
    object.status = "UPLOADED";
    keys.insert(key, body.file_id);
    s.confirm_effects.fetch_add(1, Ordering::Relaxed);
    Json(json!({ "code": "SUCCESS", "detail": "confirmed" })).into_response()
}
