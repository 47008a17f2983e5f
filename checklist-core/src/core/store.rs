//! The blob store contract the persistence gateway talks to.
//!
//! The remote side is a small proxy in front of a git-backed object store:
//! `GET ?file=<path>` returns a JSON body, `GET ?list=<dir>` returns
//! `[{name, path}]`, and `POST /save` writes one file.

use crate::{ChecklistError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    pub name: String,
    pub path: String,
}

/// Body of a `POST /save` request.
///
/// Exactly one of `json` and `content` is set. `content` carries encoded
/// bytes (attachments) with `encoding` naming the scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub message: String,
}

impl SaveRequest {
    pub fn json(file: impl Into<String>, json: Value, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            json: Some(json),
            content: None,
            encoding: None,
            message: message.into(),
        }
    }

    pub fn base64(file: impl Into<String>, content: String, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            json: None,
            content: Some(content),
            encoding: Some("base64".to_string()),
            message: message.into(),
        }
    }
}

/// Remote JSON document storage.
pub trait BlobStore {
    /// Fetches and parses the JSON document at `path`.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::BlobNotFound`] if nothing is stored at `path`,
    /// [`ChecklistError::Network`] for transport failures.
    fn fetch(&self, path: &str) -> Result<Value>;

    /// Lists the entries of directory `dir`.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::Network`] for transport failures.
    fn list(&self, dir: &str) -> Result<Vec<BlobEntry>>;

    /// Writes one file.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::Network`] if the store rejects the write.
    fn store(&self, request: &SaveRequest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
enum StoredBlob {
    Json(Value),
    Encoded(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    blobs: BTreeMap<String, StoredBlob>,
    writes: Vec<String>,
    fail_writes: bool,
    fail_reads: bool,
}

/// In-process [`BlobStore`], used for tests and offline sessions.
///
/// Every successful write is recorded in order so callers can assert what
/// was written and when.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    state: Mutex<MemoryState>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Places a JSON document directly, without recording a write.
    pub fn insert(&self, path: &str, value: Value) {
        self.state().blobs.insert(path.to_string(), StoredBlob::Json(value));
    }

    /// Paths written through [`BlobStore::store`], oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    /// Encoded payload stored at `path`, if it was written as content.
    #[must_use]
    pub fn encoded(&self, path: &str) -> Option<String> {
        match self.state().blobs.get(path) {
            Some(StoredBlob::Encoded(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Makes every following write fail with a network error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Makes every following fetch and list fail with a network error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }
}

impl BlobStore for MemoryBlobStore {
    fn fetch(&self, path: &str) -> Result<Value> {
        let state = self.state();
        if state.fail_reads {
            return Err(ChecklistError::Network("503 Service Unavailable".to_string()));
        }
        match state.blobs.get(path) {
            Some(StoredBlob::Json(v)) => Ok(v.clone()),
            Some(StoredBlob::Encoded(_)) => Err(ChecklistError::Network(format!(
                "{path} is not a JSON document"
            ))),
            None => Err(ChecklistError::BlobNotFound(path.to_string())),
        }
    }

    fn list(&self, dir: &str) -> Result<Vec<BlobEntry>> {
        let state = self.state();
        if state.fail_reads {
            return Err(ChecklistError::Network("503 Service Unavailable".to_string()));
        }
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(state
            .blobs
            .keys()
            .filter_map(|path| {
                let name = path.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| BlobEntry {
                    name: name.to_string(),
                    path: path.clone(),
                })
            })
            .collect())
    }

    fn store(&self, request: &SaveRequest) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(ChecklistError::Network("500 Internal Server Error".to_string()));
        }
        let blob = match (&request.json, &request.content) {
            (Some(json), None) => StoredBlob::Json(json.clone()),
            (None, Some(content)) => StoredBlob::Encoded(content.clone()),
            _ => {
                return Err(ChecklistError::Network(
                    "400 Bad Request: exactly one of json or content is required".to_string(),
                ))
            }
        };
        state.blobs.insert(request.file.clone(), blob);
        state.writes.push(request.file.clone());
        Ok(())
    }
}

#[cfg(feature = "remote")]
pub use remote::HttpBlobStore;

#[cfg(feature = "remote")]
mod remote {
    use super::{BlobEntry, BlobStore, SaveRequest};
    use crate::{ChecklistError, Result};
    use reqwest::blocking::{Client, Response};
    use reqwest::StatusCode;
    use serde_json::Value;

    /// [`BlobStore`] backed by the HTTP proxy worker.
    #[derive(Debug, Clone)]
    pub struct HttpBlobStore {
        client: Client,
        base_url: String,
    }

    impl HttpBlobStore {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                client: Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
            }
        }

        fn check(response: Response, path: &str) -> Result<Response> {
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if status == StatusCode::NOT_FOUND {
                return Err(ChecklistError::BlobNotFound(path.to_string()));
            }
            let body = response.text().unwrap_or_default();
            Err(ChecklistError::Network(format!("{status}: {body}")))
        }
    }

    fn network(e: reqwest::Error) -> ChecklistError {
        ChecklistError::Network(e.to_string())
    }

    impl BlobStore for HttpBlobStore {
        fn fetch(&self, path: &str) -> Result<Value> {
            let response = self
                .client
                .get(&self.base_url)
                .query(&[("file", path)])
                .send()
                .map_err(network)?;
            Self::check(response, path)?.json().map_err(network)
        }

        fn list(&self, dir: &str) -> Result<Vec<BlobEntry>> {
            let response = self
                .client
                .get(&self.base_url)
                .query(&[("list", dir)])
                .send()
                .map_err(network)?;
            Self::check(response, dir)?.json().map_err(network)
        }

        fn store(&self, request: &SaveRequest) -> Result<()> {
            let response = self
                .client
                .post(format!("{}/save", self.base_url))
                .json(request)
                .send()
                .map_err(network)?;
            Self::check(response, &request.file)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(store.fetch("a.json"), Err(ChecklistError::BlobNotFound(_))));
    }

    #[test]
    fn test_store_then_fetch_and_list() {
        let store = MemoryBlobStore::new();
        store
            .store(&SaveRequest::json("checklists/a.json", json!({"x": 1}), "save"))
            .unwrap();
        store.insert("checklists/sub/b.json", json!({}));
        store.insert("config/users.json", json!({}));
        assert_eq!(store.fetch("checklists/a.json").unwrap(), json!({"x": 1}));
        let listing = store.list("checklists").unwrap();
        assert_eq!(
            listing,
            vec![BlobEntry { name: "a.json".to_string(), path: "checklists/a.json".to_string() }]
        );
        assert_eq!(store.writes(), vec!["checklists/a.json".to_string()]);
    }

    #[test]
    fn test_failed_write_records_nothing() {
        let store = MemoryBlobStore::new();
        store.set_fail_writes(true);
        let err = store.store(&SaveRequest::json("a.json", json!({}), "m")).unwrap_err();
        assert!(matches!(err, ChecklistError::Network(_)));
        assert!(store.writes().is_empty());
    }

    #[test]
    fn test_save_request_wire_format() {
        let req = SaveRequest::base64("files/a.png", "AAEC".to_string(), "upload");
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({"file": "files/a.png", "content": "AAEC", "encoding": "base64", "message": "upload"})
        );
    }
}
