// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request gateway.
//!
//! Every API call goes through [`Gateway::send`], which attaches the current
//! access token and recovers from one expired-token response per call by
//! asking the [`SessionManager`] to refresh and re-issuing the request once.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{join_url, ClientConfig};
use crate::credential::session::SessionManager;
use crate::error::ApiError;

/// Header carrying the client-generated idempotency key.
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

#[derive(Debug, Clone)]
enum Body {
    Json(bytes::Bytes),
    Form(Vec<(String, String)>),
}

/// An API call that can be dispatched more than once.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Body>,
    anonymous: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: HeaderMap::new(), body: None, anonymous: false }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn idempotency_key(self, key: &str) -> Result<Self, ApiError> {
        let value = HeaderValue::from_str(key)
            .map_err(|e| ApiError::InvalidRequest(format!("idempotency key: {e}")))?;
        Ok(self.header(HeaderName::from_static(IDEMPOTENCY_KEY), value))
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let encoded =
            serde_json::to_vec(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        self.body = Some(Body::Json(encoded.into()));
        Ok(self)
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let fields = fields.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        self.body = Some(Body::Form(fields));
        self
    }

    /// Send without a bearer token and never trigger a refresh (login).
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Whether a 401 on this request may be recovered by refreshing.
    fn refreshable(&self) -> bool {
        !self.anonymous && !self.headers.contains_key(AUTHORIZATION)
    }
}

pub struct Gateway {
    http: reqwest::Client,
    base_url: String,
    session: Arc<SessionManager>,
}

impl Gateway {
    pub fn new(config: &ClientConfig, session: Arc<SessionManager>) -> anyhow::Result<Self> {
        crate::ensure_crypto();
        let http = reqwest::Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self { http, base_url: config.api_url.clone(), session })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Send a request, refreshing and retrying once on 401.
    ///
    /// Non-auth failures are returned as-is. If the refresh fails, the
    /// original 401 response is returned unchanged; a 401 on the retried
    /// request is returned without a second retry.
    pub async fn send(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        let token = if request.refreshable() { self.session.access_token() } else { None };
        let response = self.dispatch(request, token.as_deref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !request.refreshable() {
            return Ok(response);
        }

        debug!(path = %request.path, "unauthorized, refreshing session");
        match self.session.refresh_after(token.as_deref()).await {
            Ok(fresh) => {
                let retried = self.dispatch(request, Some(&fresh)).await?;
                if retried.status() == StatusCode::UNAUTHORIZED {
                    warn!(path = %request.path, "request rejected again after refresh");
                }
                Ok(retried)
            }
            Err(e) => {
                warn!(path = %request.path, err = %e, "refresh failed, returning original response");
                Ok(response)
            }
        }
    }

    /// Send and decode a JSON success body; non-2xx becomes [`ApiError::Status`].
    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let response = check_status(self.send(request).await?).await?;
        response.json::<T>().await.map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Send and discard the success body; non-2xx becomes [`ApiError::Status`].
    pub async fn send_empty(&self, request: &ApiRequest) -> Result<(), ApiError> {
        check_status(self.send(request).await?).await?;
        Ok(())
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = join_url(&self.base_url, &request.path);
        let mut builder =
            self.http.request(request.method.clone(), url).headers(request.headers.clone());
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            Some(Body::Json(ref bytes)) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes.clone()),
            Some(Body::Form(ref fields)) => builder.form(fields),
            None => builder,
        };
        builder.send().await.map_err(|e| ApiError::Transport(e.to_string()))
    }
}

/// Turn a non-success response into [`ApiError::Status`].
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_body(status.as_u16(), &body))
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
