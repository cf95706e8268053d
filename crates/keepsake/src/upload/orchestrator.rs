// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drives local files through the upload protocol and publishes per-file
//! progress.
//!
//! Each file gets an [`UploadRecord`] that only moves forward through the
//! state machine in [`UploadStatus`]. Files in a batch fail independently.
//! Removing a record hides it from observers but does not stop its upload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::codes;
use crate::gateway::Gateway;
use crate::media::{LocalFile, UploadLimits};
use crate::upload::journal::{ConfirmJournal, PendingConfirm};
use crate::upload::protocol::UploadProtocol;
use crate::upload::{
    percent, BatchReport, ResumeReport, UploadError, UploadEvent, UploadRecord, UploadStatus,
};

/// What is needed to run a failed upload again.
struct RetainedFile {
    file: LocalFile,
    title: String,
    description: Option<String>,
}

pub struct UploadOrchestrator {
    protocol: UploadProtocol,
    limits: UploadLimits,
    concurrency: usize,
    journal: ConfirmJournal,
    records: Mutex<IndexMap<String, UploadRecord>>,
    retained: Mutex<HashMap<String, RetainedFile>>,
    active: AtomicUsize,
    event_tx: broadcast::Sender<UploadEvent>,
}

impl UploadOrchestrator {
    pub fn new(
        config: &ClientConfig,
        gateway: Arc<Gateway>,
        journal: ConfirmJournal,
    ) -> anyhow::Result<Arc<Self>> {
        let (event_tx, _) = broadcast::channel(256);
        Ok(Arc::new(Self {
            protocol: UploadProtocol::new(config, gateway)?,
            limits: UploadLimits { max_bytes: config.max_upload_bytes },
            concurrency: config.upload_concurrency.max(1),
            journal,
            records: Mutex::new(IndexMap::new()),
            retained: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            event_tx,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of all records in the order they were created.
    pub fn records(&self) -> Vec<UploadRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn record(&self, id: &str) -> Option<UploadRecord> {
        self.records.lock().get(id).cloned()
    }

    pub fn is_uploading(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }

    pub fn journal(&self) -> &ConfirmJournal {
        &self.journal
    }

    /// Dismiss a record. An upload still in flight keeps running.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.records.lock().shift_remove(id).is_some();
        if removed {
            self.retained.lock().remove(id);
            let _ = self.event_tx.send(UploadEvent::Removed { id: id.to_owned() });
        }
        removed
    }

    /// Drop every completed record. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed: Vec<String> = {
            let mut records = self.records.lock();
            let ids: Vec<String> = records
                .values()
                .filter(|r| r.status == UploadStatus::Completed)
                .map(|r| r.id.clone())
                .collect();
            for id in &ids {
                records.shift_remove(id);
            }
            ids
        };
        for id in &removed {
            let _ = self.event_tx.send(UploadEvent::Removed { id: id.clone() });
        }
        removed.len()
    }

    /// Upload one file. Returns the confirmed object id.
    pub async fn upload_file(
        &self,
        file: LocalFile,
        title: &str,
        description: Option<&str>,
    ) -> Result<String, UploadError> {
        let _active = ActiveGuard::new(&self.active);
        let id = self.create_record(&file);
        self.run(&id, file, title, description).await
    }

    /// Upload a batch. Each file is titled `default_title` or its own name.
    ///
    /// Files run concurrently and fail independently; the report lists
    /// confirmed ids in submission order and the names of failed files.
    pub async fn submit(&self, files: Vec<LocalFile>, default_title: Option<&str>) -> BatchReport {
        let _active = ActiveGuard::new(&self.active);
        let jobs: Vec<(String, LocalFile)> =
            files.into_iter().map(|file| (self.create_record(&file), file)).collect();

        let outcomes: Vec<(String, Result<String, UploadError>)> = stream::iter(jobs)
            .map(|(id, file)| async move {
                let name = file.name.clone();
                let title = default_title.map(str::to_owned).unwrap_or_else(|| name.clone());
                let outcome = self.run(&id, file, &title, None).await;
                (name, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(file_id) => report.file_ids.push(file_id),
                Err(_) => report.failed.push(name),
            }
        }

        if let Some(msg) = report.failure_message() {
            warn!(failed = report.failed.len(), "{msg}");
        }
        if let Some(msg) = report.success_message() {
            info!(succeeded = report.file_ids.len(), "{msg}");
        }
        let _ = self.event_tx.send(UploadEvent::BatchFinished {
            succeeded: report.file_ids.len(),
            failed: report.failed.clone(),
        });
        report
    }

    /// Start a failed upload over as a new record with new idempotency keys.
    pub async fn retry(&self, id: &str) -> Result<String, UploadError> {
        let record = self.record(id).ok_or_else(|| UploadError::UnknownUpload(id.to_owned()))?;
        if record.status != UploadStatus::Error {
            return Err(UploadError::NotRetryable { id: id.to_owned(), status: record.status });
        }
        let retained = self
            .retained
            .lock()
            .remove(id)
            .ok_or_else(|| UploadError::UnknownUpload(id.to_owned()))?;

        // The new attempt owns this upload now; the abandoned object stays
        // pending on the server.
        if let Some(ref file_id) = record.file_id {
            self.journal.resolve(file_id);
        }
        self.remove(id);

        let _active = ActiveGuard::new(&self.active);
        let new_id = self.create_record(&retained.file);
        info!(upload = %new_id, previous = %id, "retrying upload");
        self.run(&new_id, retained.file, &retained.title, retained.description.as_deref()).await
    }

    /// Replay the confirm call for every journaled transfer.
    ///
    /// Entries that confirm, or that the server no longer knows, leave the
    /// journal; anything else stays for the next pass.
    pub async fn resume_unconfirmed(&self) -> ResumeReport {
        let _active = ActiveGuard::new(&self.active);
        let mut report = ResumeReport::default();
        for entry in self.journal.pending() {
            match self.protocol.confirm(&entry.file_id, &entry.confirm_key).await {
                Ok(()) => {
                    self.journal.resolve(&entry.file_id);
                    info!(file = %entry.file_name, file_id = %entry.file_id, "confirmed pending upload");
                    report.confirmed.push(entry.file_id);
                }
                Err(e) if e.status() == Some(404) || e.code() == Some(codes::FILE_NOT_FOUND) => {
                    self.journal.resolve(&entry.file_id);
                    warn!(file = %entry.file_name, file_id = %entry.file_id, "pending upload no longer exists");
                    report.dropped.push(entry.file_id);
                }
                Err(e) => {
                    warn!(file = %entry.file_name, file_id = %entry.file_id, err = %e, "pending upload still unconfirmed");
                    report.still_pending.push(entry.file_id);
                }
            }
        }
        report
    }

    fn create_record(&self, file: &LocalFile) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let record = UploadRecord {
            id: id.clone(),
            file_name: file.name.clone(),
            file_size: file.size,
            progress: 0,
            status: UploadStatus::Pending,
            error: None,
            file_id: None,
        };
        self.records.lock().insert(id.clone(), record);
        let _ = self.event_tx.send(UploadEvent::Progress {
            id: id.clone(),
            progress: 0,
            status: UploadStatus::Pending,
        });
        id
    }

    async fn run(
        &self,
        id: &str,
        file: LocalFile,
        title: &str,
        description: Option<&str>,
    ) -> Result<String, UploadError> {
        match self.drive(id, &file, title, description).await {
            Ok(file_id) => {
                info!(upload = %id, file = %file.name, file_id = %file_id, "upload completed");
                Ok(file_id)
            }
            Err(e) => {
                warn!(upload = %id, file = %file.name, err = %e, "upload failed");
                if self.transition(id, UploadStatus::Error, None, Some(e.to_string())) {
                    let retained = RetainedFile {
                        file,
                        title: title.to_owned(),
                        description: description.map(str::to_owned),
                    };
                    self.retained.lock().insert(id.to_owned(), retained);
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        id: &str,
        file: &LocalFile,
        title: &str,
        description: Option<&str>,
    ) -> Result<String, UploadError> {
        self.limits.validate(file)?;
        self.transition(id, UploadStatus::Uploading, None, None);

        // One key per phase of this attempt, reused by any re-issue.
        let ticket_key = uuid::Uuid::new_v4().to_string();
        let confirm_key = uuid::Uuid::new_v4().to_string();

        let ticket = self
            .protocol
            .request_ticket(&file.content_type, title, description, &ticket_key)
            .await
            .map_err(UploadError::Ticket)?;
        if let Some(record) = self.records.lock().get_mut(id) {
            record.file_id = Some(ticket.file_id.clone());
        }
        debug!(upload = %id, file_id = %ticket.file_id, "ticket issued");

        self.protocol
            .transfer(&ticket.upload_url, file, |sent| self.report_progress(id, percent(sent, file.size)))
            .await
            .map_err(UploadError::Transfer)?;

        self.journal.record(PendingConfirm::new(&ticket.file_id, &confirm_key, &file.name));
        self.transition(id, UploadStatus::Confirming, Some(100), None);

        self.protocol.confirm(&ticket.file_id, &confirm_key).await.map_err(UploadError::Confirm)?;
        self.journal.resolve(&ticket.file_id);
        self.transition(id, UploadStatus::Completed, None, None);
        Ok(ticket.file_id)
    }

    /// Apply a state change if the state machine allows it. Returns whether
    /// the record was changed.
    fn transition(
        &self,
        id: &str,
        next: UploadStatus,
        progress: Option<u8>,
        error: Option<String>,
    ) -> bool {
        let event = {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(id) else {
                debug!(upload = %id, to = %next, "record dismissed, not tracking transition");
                return false;
            };
            if !record.status.can_advance_to(next) {
                debug!(upload = %id, from = %record.status, to = %next, "ignoring illegal transition");
                return false;
            }
            record.status = next;
            if let Some(progress) = progress {
                record.progress = record.progress.max(progress);
            }
            if error.is_some() {
                record.error = error;
            }
            UploadEvent::Progress { id: id.to_owned(), progress: record.progress, status: next }
        };
        let _ = self.event_tx.send(event);
        true
    }

    fn report_progress(&self, id: &str, progress: u8) {
        let event = {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(id) else {
                return;
            };
            if record.status != UploadStatus::Uploading || progress <= record.progress {
                return;
            }
            record.progress = progress;
            UploadEvent::Progress { id: id.to_owned(), progress, status: record.status }
        };
        let _ = self.event_tx.send(event);
    }
}

/// Counts an operation as in flight for [`UploadOrchestrator::is_uploading`].
struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
