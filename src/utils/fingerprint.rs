// src/utils/fingerprint.rs
//! Content fingerprint engine.
//!
//! Computes the deterministic SHA-256 fingerprint that content-addresses a
//! document through the whole pipeline: it keys the storage upload tags, the
//! on-chain registration, and the record store upsert. Hashing is streaming,
//! so arbitrarily large documents hash with a fixed working set.

use sha2::{Digest, Sha256};
use std::io::Read;

use crate::errors::IssuanceError;

/// Fixed read-buffer size for streaming hashes.
const CHUNK_SIZE: usize = 8192;

/// Hashes an in-memory document and returns the hex-encoded fingerprint.
///
/// Pure and deterministic: identical bytes always yield the identical
/// 64-character fingerprint.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hashes a document from any reader without buffering more than
/// [`CHUNK_SIZE`] bytes at a time.
///
/// The only failure mode is an unreadable input stream; the I/O error is
/// surfaced to the caller and never retried here.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> Result<String, IssuanceError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| IssuanceError::InvalidDocument(format!("unreadable document: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
