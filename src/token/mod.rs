//! Read-only access to the session token.
//!
//! The token is written by an external login flow; the client only ever
//! looks it up by key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// Synchronous keyed credential lookup
pub trait TokenStore: Send + Sync {
    /// Value stored under `key`; `None` when absent or empty
    fn get(&self, key: &str) -> Option<String>;
}

/// Token store backed by a JSON object file, e.g. `{"ACS_TKN": "..."}`.
///
/// The file is re-read on every lookup so that changes made by the login
/// flow are picked up.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<Map<String, Value>>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(entries) => Ok(Some(entries)),
            _ => Err(ClientError::MalformedMessage(
                "token store is not a JSON object".to_string(),
            )),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = match self.read() {
            Ok(entries) => entries?,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read token store"
                );
                return None;
            }
        };

        match entries.get(key)? {
            Value::String(token) if !token.is_empty() => Some(token.clone()),
            Value::String(_) | Value::Null => None,
            _ => {
                tracing::warn!(key = %key, "Token store entry is not a string");
                None
            }
        }
    }
}

/// In-memory token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: DashMap<String, String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, token: impl Into<String>) {
        self.entries.insert(key.into(), token.into());
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .map(|token| token.value().clone())
            .filter(|token| !token.is_empty())
    }
}
