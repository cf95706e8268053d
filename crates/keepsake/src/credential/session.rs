// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: the single owner of the credential pair and the only
//! component allowed to call the refresh endpoint.
//!
//! At most one refresh runs at a time. The first caller spawns the refresh
//! task and parks a shared handle to it in [`RefreshSlot`]; every caller that
//! arrives while the slot is occupied awaits that same handle. The task
//! clears the slot before its result becomes visible, so a later 401 always
//! starts a fresh attempt.

use std::fmt;
use std::sync::Arc;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credential::store::CredentialStore;
use crate::credential::{CredentialPair, SessionEvent, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

type RefreshFuture = Shared<BoxFuture<'static, Result<CredentialPair, RefreshError>>>;

/// Why a refresh did not produce a new pair. Every variant but
/// `NoRefreshToken` ends the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Nothing to exchange; the user never logged in, logged out, or the
    /// session already ended.
    NoRefreshToken,
    /// The refresh endpoint refused the refresh token.
    Rejected { status: u16, detail: String },
    /// The refresh call never got a response.
    Transport(String),
    /// The refresh endpoint answered with an unexpected body.
    Decode(String),
    /// The refresh task died before settling.
    Aborted(String),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRefreshToken => f.write_str("no refresh token available"),
            Self::Rejected { status, detail } => write!(f, "refresh rejected ({status}): {detail}"),
            Self::Transport(msg) => write!(f, "refresh request failed: {msg}"),
            Self::Decode(msg) => write!(f, "refresh response unreadable: {msg}"),
            Self::Aborted(msg) => write!(f, "refresh aborted: {msg}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Token response from the refresh and login endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// The in-flight refresh, tagged so only its own task can clear it.
struct InFlight {
    generation: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct RefreshSlot {
    next_generation: u64,
    current: Option<InFlight>,
}

pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    pair: RwLock<Option<CredentialPair>>,
    /// Serializes store writes with the in-memory swap that follows them.
    writer: Mutex<()>,
    refresh_slot: Mutex<RefreshSlot>,
    refresh_url: String,
    http: reqwest::Client,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create a manager, seeding the pair from the store if one is persisted.
    pub fn new(config: &ClientConfig, store: Arc<dyn CredentialStore>) -> anyhow::Result<Arc<Self>> {
        crate::ensure_crypto();
        let http = reqwest::Client::builder().timeout(config.request_timeout()).build()?;

        let pair = match (store.get(ACCESS_TOKEN_KEY), store.get(REFRESH_TOKEN_KEY)) {
            (Some(access_token), Some(refresh_token)) => {
                debug!("loaded persisted credentials");
                Some(CredentialPair { access_token, refresh_token })
            }
            (None, None) => None,
            _ => {
                warn!("ignoring incomplete persisted credentials");
                None
            }
        };

        let (event_tx, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            store,
            pair: RwLock::new(pair),
            writer: Mutex::new(()),
            refresh_slot: Mutex::new(RefreshSlot::default()),
            refresh_url: config.endpoint("/auth/refresh"),
            http,
            event_tx,
        }))
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Current access token. No network.
    pub fn access_token(&self) -> Option<String> {
        self.pair.read().as_ref().map(|p| p.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.pair.read().is_some()
    }

    /// Install a pair obtained from a login.
    pub fn establish(&self, pair: CredentialPair) {
        self.install(pair);
        info!("session established");
        let _ = self.event_tx.send(SessionEvent::LoggedIn);
    }

    /// Wipe the pair (logout).
    pub fn clear(&self) {
        self.wipe();
        info!("session cleared");
        let _ = self.event_tx.send(SessionEvent::LoggedOut);
    }

    /// Refresh after `rejected` was refused by the server.
    ///
    /// When the stored token already differs from the rejected one, another
    /// caller has rotated it in the meantime and it is returned without a
    /// network call. With no session at all there is nothing to refresh or
    /// end, so no event is sent.
    pub async fn refresh_after(self: &Arc<Self>, rejected: Option<&str>) -> Result<String, RefreshError> {
        let Some(current) = self.access_token() else {
            debug!("no session to refresh");
            return Err(RefreshError::NoRefreshToken);
        };
        if rejected != Some(current.as_str()) {
            debug!("access token already rotated, skipping refresh");
            return Ok(current);
        }
        self.refresh().await
    }

    /// Exchange the refresh token for a new pair, joining any refresh that is
    /// already in flight. Returns the new access token.
    pub async fn refresh(self: &Arc<Self>) -> Result<String, RefreshError> {
        let future = {
            let mut slot = self.refresh_slot.lock();
            match slot.current {
                Some(ref flight) => {
                    debug!(generation = flight.generation, "joining in-flight refresh");
                    flight.future.clone()
                }
                None => {
                    slot.next_generation += 1;
                    let generation = slot.next_generation;
                    let future = self.spawn_refresh(generation);
                    slot.current = Some(InFlight { generation, future: future.clone() });
                    future
                }
            }
        };
        future.await.map(|pair| pair.access_token)
    }

    /// Spawn the refresh task. Must be called with the slot locked so the
    /// task cannot clear the slot before it is filled.
    fn spawn_refresh(self: &Arc<Self>, generation: u64) -> RefreshFuture {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let guard = SlotGuard { manager: Arc::clone(&manager), generation };
            let outcome = manager.run_refresh().await;
            drop(guard);
            outcome
        });
        handle
            .map(|joined| joined.unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string()))))
            .boxed()
            .shared()
    }

    async fn run_refresh(&self) -> Result<CredentialPair, RefreshError> {
        let current = self.pair.read().clone();
        // Already logged out or ended: only a live session can end.
        let Some(current) = current else {
            return Err(RefreshError::NoRefreshToken);
        };

        match self.request_refresh(&current.refresh_token).await {
            Ok(token) => {
                let pair = CredentialPair {
                    access_token: token.access_token,
                    refresh_token: token.refresh_token.unwrap_or(current.refresh_token),
                };
                self.install(pair.clone());
                info!("credentials refreshed");
                let _ = self.event_tx.send(SessionEvent::Refreshed);
                Ok(pair)
            }
            Err(e) => {
                self.end_session(&e);
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenResponse, RefreshError> {
        let resp = self
            .http
            .post(&self.refresh_url)
            .bearer_auth(refresh_token)
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| RefreshError::Transport(format!("read body: {e}")))?;
        if !status.is_success() {
            let detail = crate::error::ApiError::from_body(status.as_u16(), &body).to_string();
            return Err(RefreshError::Rejected { status: status.as_u16(), detail });
        }

        serde_json::from_str(&body).map_err(|e| RefreshError::Decode(e.to_string()))
    }

    // Store I/O runs outside the `pair` lock so readers never wait on disk.
    fn install(&self, pair: CredentialPair) {
        let _writing = self.writer.lock();
        self.store.set_many(&[
            (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
            (REFRESH_TOKEN_KEY, pair.refresh_token.as_str()),
        ]);
        *self.pair.write() = Some(pair);
    }

    fn wipe(&self) {
        let _writing = self.writer.lock();
        self.store.remove_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY]);
        *self.pair.write() = None;
    }

    fn end_session(&self, err: &RefreshError) {
        warn!(err = %err, "refresh failed, ending session");
        self.wipe();
        let _ = self.event_tx.send(SessionEvent::Ended { reason: err.to_string() });
    }

    /// Whether a refresh is currently in flight.
    pub fn refresh_in_flight(&self) -> bool {
        self.refresh_slot.lock().current.is_some()
    }
}

/// Clears the refresh slot when the refresh task settles or is torn down.
struct SlotGuard {
    manager: Arc<SessionManager>,
    generation: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.manager.refresh_slot.lock();
        if slot.current.as_ref().is_some_and(|f| f.generation == self.generation) {
            slot.current = None;
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
