// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login, logout and the current-user lookup.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credential::session::TokenResponse;
use crate::credential::CredentialPair;
use crate::error::ApiError;
use crate::gateway::{ApiRequest, Gateway};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub created_at: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
struct MeResponse {
    #[serde(default)]
    user: Option<UserProfile>,
}

/// Exchange username and password for a credential pair and establish the
/// session with it.
pub async fn login(gateway: &Gateway, username: &str, password: &str) -> Result<(), ApiError> {
    let request = ApiRequest::post("/auth/login")
        .anonymous()
        .form(&[("username", username), ("password", password)]);
    let token: TokenResponse = gateway.send_json(&request).await?;
    let refresh_token = token
        .refresh_token
        .ok_or_else(|| ApiError::Decode("login response carried no refresh token".to_owned()))?;

    gateway.session().establish(CredentialPair { access_token: token.access_token, refresh_token });
    Ok(())
}

/// Tell the server the session is over, then wipe local credentials
/// regardless of how the server answered.
pub async fn logout(gateway: &Gateway) {
    if gateway.session().is_authenticated() {
        if let Err(e) = gateway.send_empty(&ApiRequest::post("/auth/logout")).await {
            warn!(err = %e, "server-side logout failed");
        }
    }
    gateway.session().clear();
}

/// The logged-in user, or `None` when there is no usable session.
pub async fn current_user(gateway: &Gateway) -> Result<Option<UserProfile>, ApiError> {
    if !gateway.session().is_authenticated() {
        return Ok(None);
    }
    match gateway.send_json::<MeResponse>(&ApiRequest::get("/users/me")).await {
        Ok(me) => Ok(me.user),
        Err(e) if e.is_unauthorized() => {
            debug!("session rejected while looking up current user");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
