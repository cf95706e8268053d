// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local media files and the checks run on them before any network call.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::upload::UploadError;

/// MIME types the backend accepts for upload.
pub const SUPPORTED_TYPES: &[&str] = &["image/jpeg", "image/png", "video/mp4", "video/quicktime"];

/// Default upload size limit (500 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

pub fn is_supported_type(content_type: &str) -> bool {
    SUPPORTED_TYPES.contains(&content_type)
}

/// Human-readable size: bytes, then KB and MB with one decimal, GB with two.
pub fn format_file_size(bytes: u64) -> String {
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < MIB {
        format!("{:.1} KB", b / KIB)
    } else if b < GIB {
        format!("{:.1} MB", b / MIB)
    } else {
        format!("{:.2} GB", b / GIB)
    }
}

/// Where the bytes of a [`LocalFile`] come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// A file queued for upload. Only metadata is held for on-disk files; the
/// content is streamed during transfer.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub source: FileSource,
}

impl LocalFile {
    pub fn from_bytes(name: impl Into<String>, content_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            size: bytes.len() as u64,
            source: FileSource::Memory(bytes),
        }
    }

    /// Describe a file on disk, guessing its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content_type = mime_guess::from_path(path).first_or_octet_stream().essence_str().to_owned();
        Ok(Self { name, content_type, size: meta.len(), source: FileSource::Path(path.to_path_buf()) })
    }
}

/// Client-side upload constraints.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self { max_bytes: DEFAULT_MAX_UPLOAD_BYTES }
    }
}

impl UploadLimits {
    /// Size is checked before type, so an oversized file of the wrong type
    /// reports the size problem.
    pub fn validate(&self, file: &LocalFile) -> Result<(), UploadError> {
        if file.size > self.max_bytes {
            return Err(UploadError::TooLarge { size: file.size, limit: self.max_bytes });
        }
        if !is_supported_type(&file.content_type) {
            return Err(UploadError::UnsupportedType(file.content_type.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "media_tests.rs"]
mod tests;
