// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media upload pipeline: the per-file state machine, the three-phase
//! presigned protocol, and the journal of transfers awaiting confirmation.

pub mod journal;
pub mod orchestrator;
pub mod protocol;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::media::{format_file_size, SUPPORTED_TYPES};

/// Lifecycle of one upload record.
///
/// Moves strictly forward through `Pending → Uploading → Confirming →
/// Completed`; `Error` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Confirming,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Confirming => "confirming",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Uploading => 1,
            Self::Confirming => 2,
            Self::Completed => 3,
            Self::Error => u8::MAX,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Error => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one file in the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    /// 0..=100, never decreases.
    pub progress: u8,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-side object id, once a ticket was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

/// Published by the orchestrator as records change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    Progress { id: String, progress: u8, status: UploadStatus },
    Removed { id: String },
    BatchFinished { succeeded: usize, failed: Vec<String> },
}

/// Outcome of a batch: confirmed object ids in submission order and the
/// names of the files that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub file_ids: Vec<String>,
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn success_message(&self) -> Option<String> {
        (!self.file_ids.is_empty())
            .then(|| format!("Successfully uploaded {} file(s)", self.file_ids.len()))
    }

    pub fn failure_message(&self) -> Option<String> {
        (!self.failed.is_empty()).then(|| {
            format!("Failed to upload {} file(s): {}", self.failed.len(), self.failed.join(", "))
        })
    }
}

/// Outcome of replaying journaled confirmations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub confirmed: Vec<String>,
    /// Entries the server no longer knows about; removed from the journal.
    pub dropped: Vec<String>,
    pub still_pending: Vec<String>,
}

/// Failure of the direct object-storage transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    Transport(String),
    Status(u16),
    TimedOut,
    /// The local file could not be read.
    Io(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "upload failed: {msg}"),
            Self::Status(status) => write!(f, "upload failed with status {status}"),
            Self::TimedOut => f.write_str("upload timed out"),
            Self::Io(msg) => write!(f, "upload failed: cannot read file: {msg}"),
        }
    }
}

impl std::error::Error for TransferError {}

/// Why an upload ended in [`UploadStatus::Error`], or why a request on the
/// orchestrator was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    TooLarge { size: u64, limit: u64 },
    UnsupportedType(String),
    Ticket(ApiError),
    Transfer(TransferError),
    Confirm(ApiError),
    UnknownUpload(String),
    NotRetryable { id: String, status: UploadStatus },
}

impl UploadError {
    /// Local validation failure; no network call was made.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::TooLarge { .. } | Self::UnsupportedType(_))
    }

    /// The API rejected the session credentials.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Ticket(e) | Self::Confirm(e) => e.is_unauthorized(),
            _ => false,
        }
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { limit, .. } => {
                write!(f, "file size exceeds maximum allowed ({})", format_file_size(*limit))
            }
            Self::UnsupportedType(content_type) => write!(
                f,
                "unsupported file type: {content_type}. Supported types: {}",
                SUPPORTED_TYPES.join(", ")
            ),
            Self::Ticket(e) | Self::Confirm(e) => write!(f, "{e}"),
            Self::Transfer(e) => write!(f, "{e}"),
            Self::UnknownUpload(id) => write!(f, "no upload with id {id}"),
            Self::NotRetryable { id, status } => {
                write!(f, "upload {id} is {status}; only failed uploads can be retried")
            }
        }
    }
}

impl std::error::Error for UploadError {}

/// Percentage of `sent` over `total`, rounded to the nearest integer.
pub(crate) fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let sent = u128::from(sent.min(total));
    let total = u128::from(total);
    ((sent * 100 + total / 2) / total) as u8
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
