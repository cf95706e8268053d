// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The three remote phases of an upload: ticket, direct transfer, confirm.
//!
//! Ticket and confirm go through the [`Gateway`]. The transfer goes straight
//! to object storage with its own client and never carries the bearer token;
//! the presigned URL is its only credential.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::gateway::{ApiRequest, Gateway};
use crate::media::{FileSource, LocalFile};
use crate::upload::TransferError;

/// Size of each body chunk handed to the transport.
pub const CHUNK_SIZE: usize = 64 * 1024;

const TICKET_PATH: &str = "/media/files/upload";
const CONFIRM_PATH: &str = "/media/files/upload/confirm";

/// Where to send the bytes for a newly registered object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadTicket {
    #[serde(alias = "object_id")]
    pub file_id: String,
    #[serde(rename = "presigned_url", alias = "upload_url")]
    pub upload_url: String,
}

/// The backend has answered both flat and wrapped in `url`.
#[derive(Deserialize)]
#[serde(untagged)]
enum TicketResponse {
    Wrapped { url: UploadTicket },
    Flat(UploadTicket),
}

impl From<TicketResponse> for UploadTicket {
    fn from(response: TicketResponse) -> Self {
        match response {
            TicketResponse::Wrapped { url } => url,
            TicketResponse::Flat(ticket) => ticket,
        }
    }
}

#[derive(Serialize)]
struct TicketRequest<'a> {
    content_type: &'a str,
    title: &'a str,
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct ConfirmRequest<'a> {
    file_id: &'a str,
}

pub struct UploadProtocol {
    gateway: Arc<Gateway>,
    storage: reqwest::Client,
    transfer_timeout: Duration,
}

impl UploadProtocol {
    pub fn new(config: &ClientConfig, gateway: Arc<Gateway>) -> anyhow::Result<Self> {
        crate::ensure_crypto();
        let storage = reqwest::Client::builder().build()?;
        Ok(Self { gateway, storage, transfer_timeout: config.transfer_timeout() })
    }

    /// Phase 1: register the object and obtain a presigned URL.
    pub async fn request_ticket(
        &self,
        content_type: &str,
        title: &str,
        description: Option<&str>,
        idempotency_key: &str,
    ) -> Result<UploadTicket, ApiError> {
        let request = ApiRequest::post(TICKET_PATH)
            .idempotency_key(idempotency_key)?
            .json(&TicketRequest { content_type, title, description })?;
        let response: TicketResponse = self.gateway.send_json(&request).await?;
        Ok(response.into())
    }

    /// Phase 2: PUT the raw bytes to object storage.
    ///
    /// `on_progress` receives the cumulative number of bytes handed to the
    /// transport. Transport failures, non-2xx answers and a stall longer than
    /// the transfer timeout all fail the transfer.
    pub async fn transfer(
        &self,
        upload_url: &str,
        file: &LocalFile,
        mut on_progress: impl FnMut(u64),
    ) -> Result<(), TransferError> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut sent = 0u64;
        let body = open_body(file).await?.inspect_ok(move |chunk| {
            sent += chunk.len() as u64;
            let _ = progress_tx.send(sent);
        });

        let request = self
            .storage
            .put(upload_url)
            .header(CONTENT_TYPE, file.content_type.as_str())
            .header(CONTENT_LENGTH, file.size)
            .body(reqwest::Body::wrap_stream(body))
            .send();

        let stall_timeout = self.transfer_timeout;
        let response = await_with_progress(request, &mut progress_rx, stall_timeout, &mut on_progress)
            .await?
            .map_err(|e| TransferError::Transport(e.to_string()))?;
        while let Ok(sent) = progress_rx.try_recv() {
            on_progress(sent);
        }

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status.as_u16()));
        }
        debug!(file = %file.name, bytes = file.size, "transfer accepted by storage");
        Ok(())
    }

    /// Phase 3: mark the object as uploaded.
    pub async fn confirm(&self, file_id: &str, idempotency_key: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(CONFIRM_PATH)
            .idempotency_key(idempotency_key)?
            .json(&ConfirmRequest { file_id })?;
        self.gateway.send_empty(&request).await
    }
}

/// Drive `request` to completion, forwarding progress as it arrives.
///
/// Fails with [`TransferError::TimedOut`] once `stall_timeout` passes with no
/// progress, so a slow transfer that keeps moving is never cut off.
async fn await_with_progress<T>(
    request: impl Future<Output = T>,
    progress_rx: &mut mpsc::UnboundedReceiver<u64>,
    stall_timeout: Duration,
    on_progress: &mut impl FnMut(u64),
) -> Result<T, TransferError> {
    tokio::pin!(request);
    let stall = tokio::time::sleep(stall_timeout);
    tokio::pin!(stall);
    loop {
        tokio::select! {
            biased;
            Some(sent) = progress_rx.recv() => {
                on_progress(sent);
                stall.as_mut().reset(Instant::now() + stall_timeout);
            }
            result = &mut request => return Ok(result),
            () = &mut stall => return Err(TransferError::TimedOut),
        }
    }
}

async fn open_body(file: &LocalFile) -> Result<BoxStream<'static, std::io::Result<Bytes>>, TransferError> {
    match file.source {
        FileSource::Memory(ref bytes) => {
            let bytes = bytes.clone();
            let chunks: Vec<std::io::Result<Bytes>> = (0..bytes.len())
                .step_by(CHUNK_SIZE)
                .map(|start| Ok(bytes.slice(start..bytes.len().min(start + CHUNK_SIZE))))
                .collect();
            Ok(stream::iter(chunks).boxed())
        }
        FileSource::Path(ref path) => {
            let handle =
                tokio::fs::File::open(path).await.map_err(|e| TransferError::Io(e.to_string()))?;
            // Never send more than the advertised Content-Length.
            Ok(ReaderStream::with_capacity(handle.take(file.size), CHUNK_SIZE).boxed())
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
