// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes the backend uses in its `{code, detail}` envelope that the
/// client reacts to.
pub mod codes {
    pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
}

/// Failure of a call made through the [`Gateway`](crate::gateway::Gateway).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The server answered with a non-success status.
    Status { status: u16, code: Option<String>, detail: String },
    /// The request never produced a response (connect, TLS, timeout).
    Transport(String),
    /// The response body did not have the expected shape.
    Decode(String),
    /// The request could not be built.
    InvalidRequest(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Build a status error from a raw error response body.
    pub fn from_body(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
        let code = parsed.as_ref().and_then(|r| r.code.clone());
        let detail = parsed
            .and_then(|r| r.detail)
            .map(|d| render_detail(&d))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| fallback_detail(status));
        Self::Status { status, code, detail }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { detail, .. } => f.write_str(detail),
            Self::Transport(msg) => write!(f, "no response from server: {msg}"),
            Self::Decode(msg) => write!(f, "unexpected response: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Error envelope returned by the backend.
///
/// `detail` is a plain message for most errors and a list of field errors
/// for validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

fn render_detail(detail: &serde_json::Value) -> String {
    match detail {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| match item.get("msg").and_then(|m| m.as_str()) {
                Some(msg) => msg.to_owned(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn fallback_detail(status: u16) -> String {
    match status {
        429 => "too many requests, please wait".to_owned(),
        _ => format!("request failed with status {status}"),
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
