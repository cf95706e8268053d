// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential lifecycle: persisted token pair and the session manager that
//! owns refresh.

pub mod session;
pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Store key for the short-lived bearer token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Store key for the long-lived token exchanged on refresh.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// The access/refresh token pair. Always replaced as a whole.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Events emitted by the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A fresh pair was installed after login.
    LoggedIn,
    /// The pair was rotated by a refresh.
    Refreshed,
    /// Refresh failed and credentials were wiped; the user must log in again.
    Ended { reason: String },
    /// Credentials were wiped on request.
    LoggedOut,
}
