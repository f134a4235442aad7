// src/services/issuer.rs
//! Issuance orchestrator.
//!
//! Drives the two-phase issuance protocol against the three collaborators:
//! permanent storage, the public ledger, and the record store. The
//! orchestrator is the only component with business-level state, and all of
//! it lives in the caller-owned [`IssuanceSession`]; the orchestrator itself
//! is stateless and shared.
//!
//! Phase 1 (`prepare`) hashes and stores the document and parks the session
//! at the wallet-signature suspension point. Phase 2 (`confirm`) validates
//! the mined transaction against the prepared fingerprint and persists the
//! credential. A credential is never persisted unless both anchors agree,
//! and retrying `confirm` with the same pair can never produce a second row.
//!
//! Failure after a successful storage write but before a successful ledger
//! confirmation leaves the stored bytes behind as an accepted orphan: the
//! storage network is append-only and offers no retraction, so the orphan is
//! logged and documented rather than compensated.

use log::{error, info, warn};
use std::sync::Arc;

use crate::errors::IssuanceError;
use crate::ledger::registry::{LedgerClient, SubmitOutcome};
use crate::models::credential::{
    Credential, CredentialMetadata, LedgerTransaction, PendingUpload,
};
use crate::records::store::RecordStore;
use crate::services::state::{advance, IssuanceEvent, IssuancePhase};
use crate::storage::gateway::PermanentStore;
use crate::utils::fingerprint::fingerprint_bytes;
use crate::utils::retry::{with_backoff, RetryPolicy};

/// One logical issuance flow, owned by a single caller.
///
/// Holds at most one pending upload; a second `prepare` is rejected while
/// one is outstanding. This is session-scoped exclusivity, not a global
/// lock; independent sessions issue concurrently.
#[derive(Debug)]
pub struct IssuanceSession {
    phase: IssuancePhase,
    pending: Option<PendingUpload>,
}

impl IssuanceSession {
    /// Fresh session at the form phase.
    pub fn new() -> Self {
        IssuanceSession {
            phase: IssuancePhase::Form,
            pending: None,
        }
    }

    /// Rebuilds a session parked at the signature suspension point from a
    /// pending upload handle the caller retained (e.g. across the HTTP
    /// prepare/confirm round trip).
    pub fn resume(pending: PendingUpload) -> Self {
        IssuanceSession {
            phase: IssuancePhase::AwaitingSignature,
            pending: Some(pending),
        }
    }

    pub fn phase(&self) -> IssuancePhase {
        self.phase
    }

    pub fn pending(&self) -> Option<&PendingUpload> {
        self.pending.as_ref()
    }
}

impl Default for IssuanceSession {
    fn default() -> Self {
        IssuanceSession::new()
    }
}

/// Stateless driver of the two-phase issuance protocol.
pub struct IssuanceOrchestrator {
    storage: Arc<dyn PermanentStore>,
    ledger: Arc<dyn LedgerClient>,
    records: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    max_document_bytes: usize,
}

impl IssuanceOrchestrator {
    pub fn new(
        storage: Arc<dyn PermanentStore>,
        ledger: Arc<dyn LedgerClient>,
        records: Arc<dyn RecordStore>,
        max_document_bytes: usize,
    ) -> Self {
        IssuanceOrchestrator {
            storage,
            ledger,
            records,
            retry: RetryPolicy::default(),
            max_document_bytes,
        }
    }

    /// Overrides the backoff schedule (tests use a fast one).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Phase 1: hash the document, guard against an existing registration,
    /// and write the bytes to permanent storage. On success the session moves
    /// to AWAITING_SIGNATURE holding the pending upload.
    ///
    /// Each successful call performs one new storage write, so callers must
    /// not invoke it twice for the same logical submission; the session
    /// enforces at-most-one-in-flight.
    pub async fn prepare(
        &self,
        session: &mut IssuanceSession,
        document: &[u8],
        content_type: &str,
        metadata: CredentialMetadata,
    ) -> Result<PendingUpload, IssuanceError> {
        if session.pending.is_some() {
            return Err(IssuanceError::InvalidState(
                "a pending upload is already outstanding for this session".into(),
            ));
        }
        if session.phase != IssuancePhase::Form {
            return Err(IssuanceError::InvalidState(format!(
                "prepare requires a fresh session, found phase {}",
                session.phase
            )));
        }
        if document.is_empty() {
            return Err(IssuanceError::InvalidDocument("document is empty".into()));
        }
        if document.len() > self.max_document_bytes {
            return Err(IssuanceError::InvalidDocument(format!(
                "document is {} bytes, limit is {}",
                document.len(),
                self.max_document_bytes
            )));
        }

        session.phase = advance(session.phase, IssuanceEvent::StartHashing)?;
        let fingerprint = fingerprint_bytes(document);
        info!("document hashed, fingerprint {}", fingerprint);
        session.phase = advance(session.phase, IssuanceEvent::Hashed)?;

        // Duplicate guard before paying for storage: the original flow checks
        // the registry first so a re-submission of known bytes never writes a
        // second permanent copy.
        let existing = with_backoff(self.retry, "ledger lookup", || {
            self.ledger.resolve_fingerprint(&fingerprint)
        })
        .await
        .map_err(|e| self.abort_with(session, e))?;
        if let Some(registration) = existing {
            let err = IssuanceError::AlreadyRegistered {
                storage_ref: registration.storage_ref,
            };
            return Err(self.abort_with(session, err));
        }

        let storage_ref = with_backoff(self.retry, "storage write", || {
            self.storage.store(document, content_type, &fingerprint)
        })
        .await
        .map_err(|e| self.abort_with(session, e))?;
        session.phase = advance(session.phase, IssuanceEvent::Stored)?;

        let pending = PendingUpload {
            fingerprint,
            storage_ref,
            content_type: content_type.to_string(),
            metadata,
        };
        session.pending = Some(pending.clone());
        info!(
            "prepare complete, session at {} with storage ref {}",
            session.phase, pending.storage_ref
        );
        Ok(pending)
    }

    /// Phase 2: validate the wallet's transaction against the prepared
    /// upload and persist the credential.
    ///
    /// Safe to retry with the same (pending upload, transaction) pair: the
    /// record store upserts by fingerprint, and a transient persistence
    /// failure rolls the session back to the signature suspension point
    /// instead of aborting it.
    pub async fn confirm(
        &self,
        session: &mut IssuanceSession,
        tx: LedgerTransaction,
    ) -> Result<Credential, IssuanceError> {
        let pending = session.pending.clone().ok_or_else(|| {
            IssuanceError::InvalidState("confirm requires a pending upload".into())
        })?;
        if tx.tx_hash.is_empty() {
            let err = IssuanceError::ledger_fatal("transaction receipt carries no hash");
            return Err(self.abort_with(session, err));
        }

        session.phase = advance(session.phase, IssuanceEvent::TransactionReceived)?;

        let entry = match with_backoff(self.retry, "ledger read-back", || {
            self.ledger.read_back(&tx.tx_hash)
        })
        .await
        {
            Ok(entry) => entry,
            Err(err) if err.is_retryable() => {
                // Chain unreachable even after backoff: keep the pending
                // upload so the caller can retry the same pair later.
                session.phase = IssuancePhase::AwaitingSignature;
                return Err(err);
            }
            Err(err) => return Err(self.abort_with(session, err)),
        };

        // Byte-for-byte comparison on the encoded form. Any disagreement is a
        // potential tampering signal, never silently accepted.
        if entry.fingerprint != pending.fingerprint {
            error!(
                "fingerprint mismatch on tx {}: prepared {}, on-chain {}",
                tx.tx_hash, pending.fingerprint, entry.fingerprint
            );
            let err = IssuanceError::IntegrityMismatch {
                expected: pending.fingerprint.clone(),
                actual: entry.fingerprint,
            };
            return Err(self.abort_with(session, err));
        }
        if entry.storage_ref != pending.storage_ref {
            error!(
                "storage ref mismatch on tx {}: prepared {}, on-chain {}",
                tx.tx_hash, pending.storage_ref, entry.storage_ref
            );
            let err = IssuanceError::IntegrityMismatch {
                expected: pending.storage_ref.clone(),
                actual: entry.storage_ref,
            };
            return Err(self.abort_with(session, err));
        }

        session.phase = advance(session.phase, IssuanceEvent::FingerprintMatched)?;

        let credential = Credential::from_anchors(pending, tx);
        let stored = match with_backoff(self.retry, "record save", || {
            self.records.save(credential.clone())
        })
        .await
        {
            Ok(stored) => stored,
            Err(err) if err.is_retryable() => {
                session.phase = IssuancePhase::AwaitingSignature;
                return Err(err);
            }
            Err(err) => return Err(self.abort_with(session, err)),
        };

        session.phase = advance(session.phase, IssuanceEvent::Persisted)?;
        session.pending = None;
        info!(
            "credential {} issued for fingerprint {}",
            stored.credential_id, stored.fingerprint
        );
        Ok(stored)
    }

    /// Drives the server-signed variant: submits the prepared pair through
    /// the ledger client's wallet capability and confirms the result in one
    /// call. A duplicate registration with a matching storage reference
    /// resolves to the already-issued credential.
    pub async fn sign_and_confirm(
        &self,
        session: &mut IssuanceSession,
    ) -> Result<Credential, IssuanceError> {
        let pending = session.pending.clone().ok_or_else(|| {
            IssuanceError::InvalidState("sign_and_confirm requires a pending upload".into())
        })?;

        let outcome = match with_backoff(self.retry, "ledger submit", || {
            self.ledger.submit(&pending.fingerprint, &pending.storage_ref)
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(IssuanceError::SignerRejected) => {
                self.abort(session, "signer rejected the transaction");
                return Err(IssuanceError::SignerRejected);
            }
            Err(err) if err.is_retryable() || matches!(err, IssuanceError::ChainMismatch { .. }) => {
                // Recoverable without restarting: the pending upload stays
                // valid, so a retry reuses the same storage write.
                return Err(err);
            }
            Err(err) => return Err(self.abort_with(session, err)),
        };

        match outcome {
            SubmitOutcome::Submitted(tx) => self.confirm(session, tx).await,
            SubmitOutcome::AlreadyRegistered(_) => {
                match self.records.get_by_fingerprint(&pending.fingerprint).await? {
                    Some(existing) => {
                        session.phase = advance(session.phase, IssuanceEvent::TransactionReceived)?;
                        session.phase = advance(session.phase, IssuanceEvent::FingerprintMatched)?;
                        session.phase = advance(session.phase, IssuanceEvent::Persisted)?;
                        session.pending = None;
                        Ok(existing)
                    }
                    None => Err(self.abort_with(
                        session,
                        IssuanceError::ledger_fatal(
                            "fingerprint registered on chain but no local credential record",
                        ),
                    )),
                }
            }
        }
    }

    /// Explicit cancellation: the user rejected the signature request or the
    /// caller abandoned the session. The pending upload is discarded; any
    /// bytes already written stay in the storage network as an accepted
    /// orphan.
    pub fn abort(&self, session: &mut IssuanceSession, reason: &str) {
        if session.phase.is_terminal() {
            return;
        }
        if let Some(pending) = &session.pending {
            warn!(
                "session aborted ({}); storage ref {} remains as an accepted orphan",
                reason, pending.storage_ref
            );
        } else {
            info!("session aborted ({})", reason);
        }
        session.phase = IssuancePhase::Aborted;
        session.pending = None;
    }

    /// Aborts and hands the causing error back, for `?`-style propagation.
    fn abort_with(&self, session: &mut IssuanceSession, err: IssuanceError) -> IssuanceError {
        self.abort(session, &err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::MockLedger;
    use crate::records::store::FileRecordStore;
    use crate::storage::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn metadata() -> CredentialMetadata {
        CredentialMetadata {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.edu".into(),
            university: "Example University".into(),
            faculty: "Engineering".into(),
            department: "Computer Science".into(),
            graduation_year: 2025,
            student_number: "202100456".into(),
            nationality: "British".into(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    struct Harness {
        storage: Arc<MemoryStore>,
        ledger: Arc<MockLedger>,
        records: Arc<FileRecordStore>,
        orchestrator: IssuanceOrchestrator,
    }

    fn harness() -> Harness {
        let storage = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        let records = Arc::new(FileRecordStore::in_memory());
        let orchestrator = IssuanceOrchestrator::new(
            storage.clone(),
            ledger.clone(),
            records.clone(),
            10 << 20,
        )
        .with_retry_policy(fast_retry());
        Harness {
            storage,
            ledger,
            records,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn prepare_then_confirm_issues_a_credential() {
        let h = harness();
        let mut session = IssuanceSession::new();
        let pending = h
            .orchestrator
            .prepare(&mut session, b"diploma bytes", "application/pdf", metadata())
            .await
            .unwrap();
        assert_eq!(session.phase(), IssuancePhase::AwaitingSignature);

        let tx = h
            .ledger
            .mine_registration(&pending.fingerprint, &pending.storage_ref);
        let credential = h.orchestrator.confirm(&mut session, tx).await.unwrap();

        assert_eq!(session.phase(), IssuancePhase::Success);
        assert!(session.pending().is_none());
        assert_eq!(credential.fingerprint, pending.fingerprint);
        assert_eq!(credential.storage_ref, pending.storage_ref);
        let stored = h
            .records
            .get(&credential.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.tx_hash, credential.tx_hash);
    }

    #[tokio::test]
    async fn second_prepare_on_same_session_is_rejected() {
        let h = harness();
        let mut session = IssuanceSession::new();
        h.orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap();
        let err = h
            .orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        // Only the first prepare wrote to storage.
        assert_eq!(h.storage.object_count(), 1);
    }

    #[tokio::test]
    async fn oversized_document_is_rejected_before_hashing() {
        let storage = Arc::new(MemoryStore::new());
        let orchestrator = IssuanceOrchestrator::new(
            storage.clone(),
            Arc::new(MockLedger::new()),
            Arc::new(FileRecordStore::in_memory()),
            16,
        );
        let mut session = IssuanceSession::new();
        let err = orchestrator
            .prepare(&mut session, &[0u8; 64], "application/pdf", metadata())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DOCUMENT");
        assert_eq!(storage.object_count(), 0);
        // Input gate rejects before any phase is entered.
        assert_eq!(session.phase(), IssuancePhase::Form);
    }

    #[tokio::test]
    async fn already_registered_fingerprint_aborts_before_storing() {
        let h = harness();
        let fingerprint = crate::utils::fingerprint::fingerprint_bytes(b"doc");
        h.ledger.mine_registration(&fingerprint, "ar-existing");

        let mut session = IssuanceSession::new();
        let err = h
            .orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CREDENTIAL_EXISTS");
        assert_eq!(session.phase(), IssuancePhase::Aborted);
        assert_eq!(h.storage.object_count(), 0);
    }

    #[tokio::test]
    async fn mismatched_fingerprint_aborts_without_persisting() {
        let h = harness();
        let mut session = IssuanceSession::new();
        let pending = h
            .orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap();

        // Transaction whose payload registers a different fingerprint.
        let tx = h.ledger.mine_mismatched("other-fingerprint", &pending.storage_ref);
        let err = h.orchestrator.confirm(&mut session, tx).await.unwrap_err();

        assert_eq!(err.code(), "INTEGRITY_MISMATCH");
        assert_eq!(session.phase(), IssuancePhase::Aborted);
        assert!(h.records.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirm_retry_with_same_pair_is_idempotent() {
        let h = harness();
        let mut session = IssuanceSession::new();
        let pending = h
            .orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap();
        let tx = h
            .ledger
            .mine_registration(&pending.fingerprint, &pending.storage_ref);

        let first = h
            .orchestrator
            .confirm(&mut session, tx.clone())
            .await
            .unwrap();

        // A second confirm with the retained handle (e.g. a client retry
        // after a lost response) upserts into the same row.
        let mut retry_session = IssuanceSession::resume(pending);
        let second = h.orchestrator.confirm(&mut retry_session, tx).await.unwrap();

        assert_eq!(first.credential_id, second.credential_id);
        assert_eq!(h.records.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_record_failure_keeps_the_pair_retryable() {
        struct FlakyRecords {
            inner: FileRecordStore,
            failures_left: AtomicU32,
        }

        #[async_trait]
        impl RecordStore for FlakyRecords {
            async fn save(&self, credential: Credential) -> Result<Credential, IssuanceError> {
                if self.failures_left.fetch_update(
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    |n| n.checked_sub(1),
                ).is_ok()
                {
                    return Err(IssuanceError::RecordStore {
                        message: "disk briefly unavailable".into(),
                        retryable: true,
                    });
                }
                self.inner.save(credential).await
            }

            async fn get(&self, id: &str) -> Result<Option<Credential>, IssuanceError> {
                self.inner.get(id).await
            }

            async fn get_by_fingerprint(
                &self,
                fp: &str,
            ) -> Result<Option<Credential>, IssuanceError> {
                self.inner.get_by_fingerprint(fp).await
            }

            async fn list(&self) -> Result<Vec<Credential>, IssuanceError> {
                self.inner.list().await
            }
        }

        let ledger = Arc::new(MockLedger::new());
        let records = Arc::new(FlakyRecords {
            inner: FileRecordStore::in_memory(),
            failures_left: AtomicU32::new(2), // outlasts the 2-attempt policy
        });
        let orchestrator = IssuanceOrchestrator::new(
            Arc::new(MemoryStore::new()),
            ledger.clone(),
            records.clone(),
            10 << 20,
        )
        .with_retry_policy(fast_retry());

        let mut session = IssuanceSession::new();
        let pending = orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap();
        let tx = ledger.mine_registration(&pending.fingerprint, &pending.storage_ref);

        let err = orchestrator
            .confirm(&mut session, tx.clone())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // Session rolled back to the suspension point, pair still usable.
        assert_eq!(session.phase(), IssuancePhase::AwaitingSignature);
        assert!(session.pending().is_some());

        let credential = orchestrator.confirm(&mut session, tx).await.unwrap();
        assert_eq!(session.phase(), IssuancePhase::Success);
        assert_eq!(records.list().await.unwrap().len(), 1);
        assert_eq!(credential.fingerprint, pending.fingerprint);
    }

    #[tokio::test]
    async fn signer_rejection_leaves_an_orphan_and_a_clean_retry_path() {
        let h = harness();
        let mut session = IssuanceSession::new();
        h.orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap();

        // User rejected the wallet prompt.
        h.orchestrator.abort(&mut session, "user rejected signature");
        assert_eq!(session.phase(), IssuancePhase::Aborted);
        assert!(session.pending().is_none());
        assert!(h.records.list().await.unwrap().is_empty());

        // A fresh session for the same document succeeds independently; the
        // first write stays behind as an orphan.
        let mut fresh = IssuanceSession::new();
        let pending = h
            .orchestrator
            .prepare(&mut fresh, b"doc", "application/pdf", metadata())
            .await
            .unwrap();
        let tx = h
            .ledger
            .mine_registration(&pending.fingerprint, &pending.storage_ref);
        h.orchestrator.confirm(&mut fresh, tx).await.unwrap();
        assert_eq!(h.storage.object_count(), 2);
        assert_eq!(h.records.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sign_and_confirm_drives_the_full_flow() {
        let h = harness();
        let mut session = IssuanceSession::new();
        h.orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap();
        let credential = h.orchestrator.sign_and_confirm(&mut session).await.unwrap();
        assert_eq!(session.phase(), IssuancePhase::Success);
        assert_eq!(h.records.list().await.unwrap().len(), 1);
        assert!(!credential.tx_hash.is_empty());
    }

    #[tokio::test]
    async fn sign_and_confirm_maps_rejection_to_aborted() {
        let h = harness();
        let mut session = IssuanceSession::new();
        h.orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap();
        h.ledger.reject_next_submit();
        let err = h.orchestrator.sign_and_confirm(&mut session).await.unwrap_err();
        assert!(matches!(err, IssuanceError::SignerRejected));
        assert_eq!(session.phase(), IssuancePhase::Aborted);
        assert!(h.records.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_ledger_keeps_session_alive_for_retry() {
        let h = harness();
        let mut session = IssuanceSession::new();
        h.orchestrator
            .prepare(&mut session, b"doc", "application/pdf", metadata())
            .await
            .unwrap();

        h.ledger.set_unreachable(true);
        let err = h.orchestrator.sign_and_confirm(&mut session).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.phase(), IssuancePhase::AwaitingSignature);

        h.ledger.set_unreachable(false);
        h.orchestrator.sign_and_confirm(&mut session).await.unwrap();
        assert_eq!(session.phase(), IssuancePhase::Success);
    }
}
