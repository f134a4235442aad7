// src/storage/memory.rs
//! In-process storage double.
//!
//! Stands in for the storage network in tests and local development. Keeps
//! the network's essential behaviors: references are issued exactly once per
//! write, a second store of identical bytes yields a different reference, and
//! written objects are never removed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::gateway::PermanentStore;
use crate::errors::IssuanceError;

/// Append-only in-memory object store keyed by generated reference.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of objects ever written. Lets tests observe orphans left by
    /// abandoned issuance attempts.
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl PermanentStore for MemoryStore {
    async fn store(
        &self,
        data: &[u8],
        content_type: &str,
        _fingerprint: &str,
    ) -> Result<String, IssuanceError> {
        let storage_ref = format!("ar-{}", Uuid::new_v4().simple());
        self.objects
            .lock()
            .unwrap()
            .insert(storage_ref.clone(), (data.to_vec(), content_type.to_string()));
        Ok(storage_ref)
    }

    async fn fetch(&self, storage_ref: &str) -> Result<Vec<u8>, IssuanceError> {
        self.objects
            .lock()
            .unwrap()
            .get(storage_ref)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| {
                IssuanceError::storage_fatal(format!("no object stored under {}", storage_ref))
            })
    }
}
