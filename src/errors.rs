// src/errors.rs
//! Error taxonomy for the issuance and verification pipeline.
//!
//! Every failure the orchestrator can surface is classified here, together
//! with a stable string code used in API error envelopes and a retryability
//! predicate that drives the backoff helper. Only connectivity-class failures
//! are ever retried; user-caused rejections and integrity mismatches are
//! terminal by construction.

use thiserror::Error;

/// Classified failure produced anywhere in the issuance or verification path.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Document rejected before hashing (unreadable, empty, or oversized).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Permanent-storage write or fetch failed. `retryable` is true only for
    /// connectivity-class failures (timeouts, connection resets); quota and
    /// malformed-response failures are fatal.
    #[error("storage failure: {message}")]
    Storage { message: String, retryable: bool },

    /// The external signer explicitly declined the transaction. User-caused,
    /// never retried automatically; the session returns to the form.
    #[error("transaction rejected by signer")]
    SignerRejected,

    /// The wallet is connected to the wrong chain. Recoverable through an
    /// explicit switch/add-chain step, not a hard failure.
    #[error("wallet on chain {actual}, expected {expected}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// Ledger submission or read-back failed. Retryable only when the chain
    /// was unreachable; contract-level reverts are not.
    #[error("ledger failure: {message}")]
    Ledger { message: String, retryable: bool },

    /// The fingerprint is already registered on chain with a matching storage
    /// reference. Surfaced from the duplicate guard during prepare.
    #[error("fingerprint already registered, storage ref {storage_ref}")]
    AlreadyRegistered { storage_ref: String },

    /// The fingerprint recorded on chain does not match the prepared upload.
    /// Always fatal; logged as a potential tampering signal.
    #[error("fingerprint mismatch: prepared {expected}, on-chain {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Lookup outcome for unknown credential IDs. Verification reports this
    /// as `verified=false` rather than an error.
    #[error("credential not found")]
    NotFound,

    /// Record store write or read failed.
    #[error("record store failure: {message}")]
    RecordStore { message: String, retryable: bool },

    /// The orchestration protocol was driven out of order (e.g. a second
    /// prepare while a pending upload is outstanding).
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Configuration is missing or malformed at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl IssuanceError {
    /// Stable machine-readable code, mirrored into API error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            IssuanceError::InvalidDocument(_) => "INVALID_DOCUMENT",
            IssuanceError::Storage { .. } => "STORAGE_FAILED",
            IssuanceError::SignerRejected => "SIGNER_REJECTED",
            IssuanceError::ChainMismatch { .. } => "CHAIN_MISMATCH",
            IssuanceError::Ledger { .. } => "LEDGER_FAILED",
            IssuanceError::AlreadyRegistered { .. } => "CREDENTIAL_EXISTS",
            IssuanceError::IntegrityMismatch { .. } => "INTEGRITY_MISMATCH",
            IssuanceError::NotFound => "NOT_FOUND",
            IssuanceError::RecordStore { .. } => "RECORD_STORE_FAILED",
            IssuanceError::InvalidState(_) => "INVALID_STATE",
            IssuanceError::Config(_) => "CONFIG_INVALID",
        }
    }

    /// Whether the backoff helper may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            IssuanceError::Storage { retryable, .. }
            | IssuanceError::Ledger { retryable, .. }
            | IssuanceError::RecordStore { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Convenience constructor for transient storage failures.
    pub fn storage_transient(message: impl Into<String>) -> Self {
        IssuanceError::Storage { message: message.into(), retryable: true }
    }

    /// Convenience constructor for fatal storage failures.
    pub fn storage_fatal(message: impl Into<String>) -> Self {
        IssuanceError::Storage { message: message.into(), retryable: false }
    }

    /// Convenience constructor for transient ledger failures.
    pub fn ledger_transient(message: impl Into<String>) -> Self {
        IssuanceError::Ledger { message: message.into(), retryable: true }
    }

    /// Convenience constructor for terminal ledger failures (reverts,
    /// malformed receipts).
    pub fn ledger_fatal(message: impl Into<String>) -> Self {
        IssuanceError::Ledger { message: message.into(), retryable: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_failure_class() {
        assert!(IssuanceError::storage_transient("timeout").is_retryable());
        assert!(!IssuanceError::storage_fatal("quota exhausted").is_retryable());
        assert!(IssuanceError::ledger_transient("rpc unreachable").is_retryable());
        assert!(!IssuanceError::SignerRejected.is_retryable());
        assert!(!IssuanceError::IntegrityMismatch {
            expected: "f1".into(),
            actual: "f2".into(),
        }
        .is_retryable());
        assert!(!IssuanceError::NotFound.is_retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(IssuanceError::SignerRejected.code(), "SIGNER_REJECTED");
        assert_eq!(
            IssuanceError::AlreadyRegistered { storage_ref: "s1".into() }.code(),
            "CREDENTIAL_EXISTS"
        );
        assert_eq!(IssuanceError::NotFound.code(), "NOT_FOUND");
    }
}
