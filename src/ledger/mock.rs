// src/ledger/mock.rs
//! In-process ledger double.
//!
//! Plays both the registry contract and the signing wallet for tests and
//! local development, mirroring the registry's observable behavior: one
//! registration per fingerprint, duplicate writes revert, mined transactions
//! are readable back by hash.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::registry::{LedgerClient, SubmitOutcome};
use crate::errors::IssuanceError;
use crate::models::credential::{LedgerEntry, LedgerTransaction, Registration};

const MOCK_SIGNER: &str = "0x00000000000000000000000000000000000000a1";

#[derive(Default)]
struct MockState {
    /// Registrations keyed by fingerprint.
    registrations: HashMap<String, Registration>,
    /// Mined transactions keyed by tx hash.
    transactions: HashMap<String, LedgerEntry>,
    next_block: u64,
    reject_next: bool,
    unreachable: bool,
}

/// Ledger and wallet double for tests and `MOCK_LEDGER=true` development.
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new() -> Self {
        MockLedger::default()
    }

    /// The next `submit` call fails as a user rejection.
    pub fn reject_next_submit(&self) {
        self.state.lock().unwrap().reject_next = true;
    }

    /// All chain calls fail with connectivity errors until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Mines a registration directly, standing in for the external wallet
    /// signing flow that happens between prepare and confirm.
    pub fn mine_registration(&self, fingerprint: &str, storage_ref: &str) -> LedgerTransaction {
        self.mine(fingerprint, fingerprint, storage_ref)
    }

    /// Mines a transaction whose payload carries a different fingerprint than
    /// the caller believes it does. Used to exercise the tamper path.
    pub fn mine_mismatched(
        &self,
        payload_fingerprint: &str,
        storage_ref: &str,
    ) -> LedgerTransaction {
        self.mine("unclaimed", payload_fingerprint, storage_ref)
    }

    fn mine(
        &self,
        registered_fingerprint: &str,
        payload_fingerprint: &str,
        storage_ref: &str,
    ) -> LedgerTransaction {
        let mut state = self.state.lock().unwrap();
        state.next_block += 1;
        let tx_hash = format!("0x{:064x}", state.transactions.len() + 1);
        state.transactions.insert(
            tx_hash.clone(),
            LedgerEntry {
                fingerprint: payload_fingerprint.to_string(),
                storage_ref: storage_ref.to_string(),
            },
        );
        state.registrations.insert(
            registered_fingerprint.to_string(),
            Registration {
                storage_ref: storage_ref.to_string(),
                signer_address: MOCK_SIGNER.to_string(),
            },
        );
        LedgerTransaction {
            tx_hash,
            block_number: state.next_block,
            signer_address: MOCK_SIGNER.to_string(),
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn submit(
        &self,
        fingerprint: &str,
        storage_ref: &str,
    ) -> Result<SubmitOutcome, IssuanceError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.unreachable {
                return Err(IssuanceError::ledger_transient("mock ledger unreachable"));
            }
            if state.reject_next {
                state.reject_next = false;
                return Err(IssuanceError::SignerRejected);
            }
            if let Some(existing) = state.registrations.get(fingerprint) {
                if existing.storage_ref == storage_ref {
                    return Ok(SubmitOutcome::AlreadyRegistered(existing.clone()));
                }
                return Err(IssuanceError::IntegrityMismatch {
                    expected: storage_ref.to_string(),
                    actual: existing.storage_ref.clone(),
                });
            }
        }
        Ok(SubmitOutcome::Submitted(
            self.mine_registration(fingerprint, storage_ref),
        ))
    }

    async fn read_back(&self, tx_hash: &str) -> Result<LedgerEntry, IssuanceError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(IssuanceError::ledger_transient("mock ledger unreachable"));
        }
        state
            .transactions
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| {
                IssuanceError::ledger_fatal(format!("transaction {} not found on chain", tx_hash))
            })
    }

    async fn resolve_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Registration>, IssuanceError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(IssuanceError::ledger_transient("mock ledger unreachable"));
        }
        Ok(state.registrations.get(fingerprint).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_then_read_back_round_trips() {
        let ledger = MockLedger::new();
        let outcome = ledger.submit("f1", "s1").await.unwrap();
        let tx = match outcome {
            SubmitOutcome::Submitted(tx) => tx,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let entry = ledger.read_back(&tx.tx_hash).await.unwrap();
        assert_eq!(entry.fingerprint, "f1");
        assert_eq!(entry.storage_ref, "s1");
    }

    #[tokio::test]
    async fn duplicate_with_matching_ref_is_success_equivalent() {
        let ledger = MockLedger::new();
        ledger.mine_registration("f1", "s1");
        match ledger.submit("f1", "s1").await.unwrap() {
            SubmitOutcome::AlreadyRegistered(reg) => assert_eq!(reg.storage_ref, "s1"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_with_different_ref_is_integrity_mismatch() {
        let ledger = MockLedger::new();
        ledger.mine_registration("f1", "s1");
        let err = ledger.submit("f1", "s2").await.unwrap_err();
        assert_eq!(err.code(), "INTEGRITY_MISMATCH");
    }

    #[tokio::test]
    async fn unknown_transaction_fails_read_back() {
        let ledger = MockLedger::new();
        assert!(ledger.read_back("0xdeadbeef").await.is_err());
    }
}
