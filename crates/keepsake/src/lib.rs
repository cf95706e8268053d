// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keepsake: session-aware API client and resumable media uploads.
//!
//! The [`Client`] wires the pieces together: a [`CredentialStore`] holding the
//! token pair, a [`SessionManager`] that owns refresh, a [`Gateway`] that
//! signs and retries API calls, and an [`UploadOrchestrator`] that drives
//! files through the presigned upload protocol.

pub mod auth;
pub mod cli;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod media;
pub mod persist;
pub mod upload;

#[cfg(test)]
mod test_support;

use std::sync::{Arc, Once};

use crate::config::ClientConfig;
use crate::credential::session::SessionManager;
use crate::credential::store::{CredentialStore, FileStore};
use crate::gateway::Gateway;
use crate::upload::journal::ConfirmJournal;
use crate::upload::orchestrator::UploadOrchestrator;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Fully wired client: session, gateway, and upload orchestrator.
pub struct Client {
    pub session: Arc<SessionManager>,
    pub gateway: Arc<Gateway>,
    pub uploads: Arc<UploadOrchestrator>,
}

impl Client {
    /// Open a client backed by the on-disk credential store and journal
    /// under the configured state directory.
    pub fn open(config: &ClientConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let store: Arc<dyn CredentialStore> = Arc::new(FileStore::open(config.credentials_path()));
        let journal = ConfirmJournal::open(config.journal_path());
        Self::with_parts(config, store, journal)
    }

    /// Assemble a client from explicit storage parts.
    pub fn with_parts(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        journal: ConfirmJournal,
    ) -> anyhow::Result<Self> {
        let session = SessionManager::new(config, store)?;
        let gateway = Arc::new(Gateway::new(config, Arc::clone(&session))?);
        let uploads = UploadOrchestrator::new(config, Arc::clone(&gateway), journal)?;
        Ok(Self { session, gateway, uploads })
    }
}
