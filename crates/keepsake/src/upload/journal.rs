// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journal of transferred objects whose confirmation has not succeeded yet.
//!
//! An entry is written after the bytes reach object storage and removed
//! once the confirm call succeeds. Entries that survive a crash or a failed
//! confirm are replayed later with their original idempotency key.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One transferred-but-unconfirmed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConfirm {
    pub file_id: String,
    pub confirm_key: String,
    pub file_name: String,
    pub recorded_at_ms: u64,
}

impl PendingConfirm {
    pub fn new(file_id: &str, confirm_key: &str, file_name: &str) -> Self {
        Self {
            file_id: file_id.to_owned(),
            confirm_key: confirm_key.to_owned(),
            file_name: file_name.to_owned(),
            recorded_at_ms: epoch_ms(),
        }
    }
}

pub struct ConfirmJournal {
    path: Option<PathBuf>,
    entries: Mutex<IndexMap<String, PendingConfirm>>,
}

impl ConfirmJournal {
    /// Open the journal at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let list = match crate::persist::load::<Vec<PendingConfirm>>(&path) {
            Ok(list) => list,
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), "ignoring unreadable upload journal: {e}");
                }
                Vec::new()
            }
        };
        let entries = list.into_iter().map(|e| (e.file_id.clone(), e)).collect();
        Self { path: Some(path), entries: Mutex::new(entries) }
    }

    /// A journal that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self { path: None, entries: Mutex::new(IndexMap::new()) }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, entry: PendingConfirm) {
        debug!(file_id = %entry.file_id, "journaling unconfirmed upload");
        let mut entries = self.entries.lock();
        entries.insert(entry.file_id.clone(), entry);
        self.flush(&entries);
    }

    /// Drop the entry for `file_id`. Returns whether one existed.
    pub fn resolve(&self, file_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let existed = entries.shift_remove(file_id).is_some();
        if existed {
            self.flush(&entries);
        }
        existed
    }

    /// Entries in the order they were recorded.
    pub fn pending(&self) -> Vec<PendingConfirm> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn flush(&self, entries: &IndexMap<String, PendingConfirm>) {
        let Some(ref path) = self.path else {
            return;
        };
        let list: Vec<&PendingConfirm> = entries.values().collect();
        if let Err(e) = crate::persist::save(path, &list) {
            warn!(path = %path.display(), "failed to persist upload journal: {e}");
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
