// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key/value persistence for credentials.
//!
//! Stores never fail loudly: an unreadable or unwritable backing file
//! degrades to "nothing stored", which callers treat as logged out.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Persistent key/value storage for the credential pair.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);

    /// Write several entries as one update where the backend allows it.
    fn set_many(&self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    /// Remove several entries as one update where the backend allows it.
    fn remove_many(&self, keys: &[&str]) {
        for key in keys {
            self.remove(key);
        }
    }
}

/// In-process store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn set_many(&self, entries: &[(&str, &str)]) {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert((*key).to_owned(), (*value).to_owned());
        }
    }

    fn remove_many(&self, keys: &[&str]) {
        let mut map = self.entries.lock();
        for key in keys {
            map.remove(*key);
        }
    }
}

/// JSON-file store. Every mutation rewrites the whole file atomically.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing or corrupt file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match crate::persist::load::<HashMap<String, String>>(&path) {
            Ok(entries) => entries,
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), "ignoring unreadable credential file: {e}");
                } else {
                    debug!(path = %path.display(), "no persisted credentials");
                }
                HashMap::new()
            }
        };
        Self { path, entries: Mutex::new(entries) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<String, String>)) {
        let mut entries = self.entries.lock();
        f(&mut entries);
        if let Err(e) = crate::persist::save(&self.path, &*entries) {
            warn!(path = %self.path.display(), "failed to persist credentials: {e}");
        }
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.mutate(|map| {
            map.insert(key.to_owned(), value.to_owned());
        });
    }

    fn remove(&self, key: &str) {
        self.mutate(|map| {
            map.remove(key);
        });
    }

    fn set_many(&self, entries: &[(&str, &str)]) {
        self.mutate(|map| {
            for (key, value) in entries {
                map.insert((*key).to_owned(), (*value).to_owned());
            }
        });
    }

    fn remove_many(&self, keys: &[&str]) {
        self.mutate(|map| {
            for key in keys {
                map.remove(*key);
            }
        });
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
