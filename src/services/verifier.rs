// src/services/verifier.rs
//! Credential verification.
//!
//! Answers the public question "is this credential genuine" from the local
//! record store, optionally re-reading the ledger to confirm the stored
//! fingerprint still matches what the chain says. An unknown ID is a normal
//! negative answer, not an error.

use log::warn;
use std::sync::Arc;

use crate::errors::IssuanceError;
use crate::ledger::registry::LedgerClient;
use crate::models::credential::VerificationResult;
use crate::records::store::RecordStore;

pub struct VerificationService {
    records: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerClient>,
    /// When set, every positive answer is cross-checked against the chain.
    cross_check_chain: bool,
}

impl VerificationService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerClient>,
        cross_check_chain: bool,
    ) -> Self {
        VerificationService {
            records,
            ledger,
            cross_check_chain,
        }
    }

    /// Resolves a public credential ID to a verification view.
    ///
    /// With cross-checking enabled, a record whose fingerprint disagrees with
    /// the transaction it claims to be anchored by is reported unverified and
    /// logged as a tamper signal. A chain that is merely unreachable is a
    /// retryable error, not a negative answer.
    pub async fn verify(&self, credential_id: &str) -> Result<VerificationResult, IssuanceError> {
        let Some(credential) = self.records.get(credential_id).await? else {
            return Ok(VerificationResult::not_found());
        };

        if self.cross_check_chain {
            let entry = match self.ledger.read_back(&credential.tx_hash).await {
                Ok(entry) => entry,
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => {
                    // The anchoring transaction is gone or invalid. Treat it
                    // the same as a fingerprint mismatch.
                    warn!(
                        "credential {} anchor tx {} failed read-back: {}",
                        credential_id, credential.tx_hash, err
                    );
                    return Ok(VerificationResult::not_found());
                }
            };
            if entry.fingerprint != credential.fingerprint {
                warn!(
                    "credential {} fingerprint diverges from chain: stored {}, on-chain {}",
                    credential_id, credential.fingerprint, entry.fingerprint
                );
                return Ok(VerificationResult::not_found());
            }
        }

        Ok(VerificationResult::from_credential(&credential))
    }
}
