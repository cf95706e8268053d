// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::media::DEFAULT_MAX_UPLOAD_BYTES;

/// Configuration for the keepsake client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the API, including the version prefix.
    #[arg(long, default_value = "http://localhost:8000/v1", env = "KEEPSAKE_API_URL")]
    pub api_url: String,

    /// Largest file accepted for upload, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "KEEPSAKE_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: u64,

    /// Timeout for regular API calls in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "KEEPSAKE_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Timeout for the direct object-storage transfer in milliseconds.
    #[arg(long, default_value_t = 600_000, env = "KEEPSAKE_TRANSFER_TIMEOUT_MS")]
    pub transfer_timeout_ms: u64,

    /// Number of files uploaded at the same time within one batch.
    #[arg(long, default_value_t = 4, env = "KEEPSAKE_UPLOAD_CONCURRENCY")]
    pub upload_concurrency: usize,

    /// Directory for persisted credentials and the upload journal.
    #[arg(long, env = "KEEPSAKE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("--api-url must be an http(s) URL, got {:?}", self.api_url);
        }
        if self.upload_concurrency == 0 {
            anyhow::bail!("--upload-concurrency must be at least 1");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("--max-upload-bytes must be non-zero");
        }
        Ok(())
    }

    /// Join an API path onto the configured base URL.
    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.api_url, path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Resolve the state directory.
    ///
    /// Checks `--state-dir`/`KEEPSAKE_STATE_DIR`, then `$XDG_STATE_HOME/keepsake`,
    /// then `$HOME/.local/state/keepsake`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("keepsake");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/keepsake");
        }
        PathBuf::from(".keepsake")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir().join("credentials.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.state_dir().join("pending_confirms.json")
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
