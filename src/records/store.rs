// src/records/store.rs
//! Durable credential record store.
//!
//! One row per issued credential, unique on both `fingerprint` and
//! `credential_id`. Saves are idempotent upserts keyed by fingerprint:
//! repeated saves of the same fingerprint return the existing row instead of
//! writing a second one, which is what makes the orchestrator's confirm
//! phase safe to retry.
//!
//! The file-backed implementation snapshots the whole record set as JSON and
//! replaces the file with a temp-write + atomic rename, so a credential is
//! never visible half-written. All mutation happens under one async mutex,
//! serializing concurrent saves for the same fingerprint.

use async_trait::async_trait;
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::errors::IssuanceError;
use crate::models::credential::Credential;

/// Narrow contract over credential persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Idempotent upsert keyed by fingerprint. Returns the stored row: the
    /// new one, or the pre-existing one when the fingerprint was already
    /// persisted.
    async fn save(&self, credential: Credential) -> Result<Credential, IssuanceError>;

    /// Lookup by public credential ID.
    async fn get(&self, credential_id: &str) -> Result<Option<Credential>, IssuanceError>;

    /// Lookup by content fingerprint.
    async fn get_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Credential>, IssuanceError>;

    /// All credentials, newest first.
    async fn list(&self) -> Result<Vec<Credential>, IssuanceError>;
}

/// JSON-snapshot record store, file-backed or purely in-memory.
pub struct FileRecordStore {
    /// Rows keyed by fingerprint, guarded together with the snapshot write.
    rows: Mutex<HashMap<String, Credential>>,
    /// Snapshot location; `None` keeps records in memory only (tests, dev).
    path: Option<PathBuf>,
}

impl FileRecordStore {
    /// Opens (or creates) a store persisted at `path`, loading any existing
    /// snapshot.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IssuanceError> {
        let path = path.as_ref().to_path_buf();
        let rows = if path.exists() {
            let raw = std::fs::read(&path).map_err(|e| IssuanceError::RecordStore {
                message: format!("reading {}: {}", path.display(), e),
                retryable: false,
            })?;
            let records: Vec<Credential> =
                serde_json::from_slice(&raw).map_err(|e| IssuanceError::RecordStore {
                    message: format!("corrupt record snapshot {}: {}", path.display(), e),
                    retryable: false,
                })?;
            records
                .into_iter()
                .map(|c| (c.fingerprint.clone(), c))
                .collect()
        } else {
            HashMap::new()
        };
        info!(
            "record store opened at {} ({} credentials)",
            path.display(),
            rows.len()
        );
        Ok(FileRecordStore {
            rows: Mutex::new(rows),
            path: Some(path),
        })
    }

    /// Store with no backing file. Rows live for the process lifetime only.
    pub fn in_memory() -> Self {
        FileRecordStore {
            rows: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// Writes the full snapshot to a sibling temp file, then renames it over
    /// the real one. Called with the row lock held.
    async fn persist(&self, rows: &HashMap<String, Credential>) -> Result<(), IssuanceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let records: Vec<&Credential> = rows.values().collect();
        let raw = serde_json::to_vec_pretty(&records).map_err(|e| IssuanceError::RecordStore {
            message: format!("serializing records: {}", e),
            retryable: false,
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .map_err(|e| IssuanceError::RecordStore {
                message: format!("writing {}: {}", tmp.display(), e),
                retryable: true,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| IssuanceError::RecordStore {
                message: format!("replacing {}: {}", path.display(), e),
                retryable: true,
            })
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn save(&self, credential: Credential) -> Result<Credential, IssuanceError> {
        let mut rows = self.rows.lock().await;
        if let Some(existing) = rows.get(&credential.fingerprint) {
            return Ok(existing.clone());
        }
        rows.insert(credential.fingerprint.clone(), credential.clone());
        if let Err(err) = self.persist(&rows).await {
            // Roll the map back so the row never becomes visible without
            // having been durably written.
            rows.remove(&credential.fingerprint);
            return Err(err);
        }
        Ok(credential)
    }

    async fn get(&self, credential_id: &str) -> Result<Option<Credential>, IssuanceError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .find(|c| c.credential_id == credential_id)
            .cloned())
    }

    async fn get_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Credential>, IssuanceError> {
        let rows = self.rows.lock().await;
        Ok(rows.get(fingerprint).cloned())
    }

    async fn list(&self) -> Result<Vec<Credential>, IssuanceError> {
        let rows = self.rows.lock().await;
        let mut records: Vec<Credential> = rows.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
