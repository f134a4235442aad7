// src/models/credential.rs
//! Core data model for anchored academic credentials.
//!
//! A credential ties together three artifacts produced during issuance:
//! the content fingerprint of the uploaded document, the permanent storage
//! reference for its bytes, and the ledger transaction that registered the
//! fingerprint on chain. A [`Credential`] row exists only after all three
//! agree; everything before that point lives in an ephemeral
//! [`PendingUpload`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer-supplied holder metadata captured with every upload.
///
/// Field set mirrors what the registrar's form collects; all of it is stored
/// verbatim on the credential and echoed back by verification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub university: String,
    pub faculty: String,
    pub department: String,
    pub graduation_year: i32,
    pub student_number: String,
    pub nationality: String,
}

impl CredentialMetadata {
    /// Holder display name, "First Last".
    pub fn holder_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Ephemeral product of a successful PREPARE phase.
///
/// Exists only between prepare and confirm. It is promoted into a
/// [`Credential`] by a fingerprint-matching ledger transaction, or discarded
/// when the signer rejects; it is never persisted as-is.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpload {
    /// Hex-encoded SHA-256 of the document bytes. Content-addressing and
    /// idempotency key for the rest of the pipeline.
    pub fingerprint: String,
    /// Identifier the storage network issued for the written bytes.
    pub storage_ref: String,
    /// MIME type the bytes were stored under.
    pub content_type: String,
    pub metadata: CredentialMetadata,
}

/// Receipt of a wallet-signed registry transaction.
///
/// Created by the external wallet capability; the orchestrator only validates
/// its shape and confirms it references the expected fingerprint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub tx_hash: String,
    pub block_number: u64,
    pub signer_address: String,
}

/// Fingerprint/storage pair decoded from a registry transaction's payload
/// during read-back confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub storage_ref: String,
}

/// Existing on-chain registration for a fingerprint, returned by the
/// duplicate-submission guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub storage_ref: String,
    pub signer_address: String,
}

/// Durable, immutable credential record. One row per issued credential.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Human-facing lookup key, independent of the fingerprint.
    pub credential_id: String,
    pub fingerprint: String,
    pub storage_ref: String,
    pub content_type: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub signer_address: String,
    pub metadata: CredentialMetadata,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Builds the durable record from a matched pending upload and its
    /// ledger transaction. Assigns a fresh public credential ID.
    pub fn from_anchors(pending: PendingUpload, tx: LedgerTransaction) -> Self {
        Credential {
            credential_id: new_credential_id(),
            fingerprint: pending.fingerprint,
            storage_ref: pending.storage_ref,
            content_type: pending.content_type,
            tx_hash: tx.tx_hash,
            block_number: tx.block_number,
            signer_address: tx.signer_address,
            metadata: pending.metadata,
            created_at: Utc::now(),
        }
    }
}

/// Generates a public credential identifier, "BC-" followed by the first
/// twelve hex characters of a random UUID.
pub fn new_credential_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("BC-{}", raw[..12].to_uppercase())
}

/// Outcome of a verification query. "Not found" is a normal outcome, not a
/// failure, so this type is returned on the Ok path either way.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub university: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
}

impl VerificationResult {
    /// The negative outcome: unknown ID or failed cross-check.
    pub fn not_found() -> Self {
        VerificationResult {
            verified: false,
            credential_id: None,
            fingerprint: None,
            storage_ref: None,
            tx_hash: None,
            block_number: None,
            holder_name: None,
            university: None,
            degree: None,
            issue_date: None,
        }
    }

    /// Positive outcome carrying the full credential view.
    pub fn from_credential(credential: &Credential) -> Self {
        VerificationResult {
            verified: true,
            credential_id: Some(credential.credential_id.clone()),
            fingerprint: Some(credential.fingerprint.clone()),
            storage_ref: Some(credential.storage_ref.clone()),
            tx_hash: Some(credential.tx_hash.clone()),
            block_number: Some(credential.block_number),
            holder_name: Some(credential.metadata.holder_name()),
            university: Some(credential.metadata.university.clone()),
            degree: Some(format!(
                "{} - {}",
                credential.metadata.faculty, credential.metadata.department
            )),
            issue_date: Some(credential.created_at.format("%Y-%m-%d").to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> CredentialMetadata {
        CredentialMetadata {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.edu".into(),
            university: "Example University".into(),
            faculty: "Faculty of Engineering".into(),
            department: "Computer Science".into(),
            graduation_year: 2025,
            student_number: "202100456".into(),
            nationality: "British".into(),
        }
    }

    #[test]
    fn credential_id_has_public_prefix() {
        let id = new_credential_id();
        assert!(id.starts_with("BC-"));
        assert_eq!(id.len(), 15);
        assert_ne!(id, new_credential_id());
    }

    #[test]
    fn from_anchors_carries_both_anchor_ids() {
        let pending = PendingUpload {
            fingerprint: "f1".into(),
            storage_ref: "s1".into(),
            content_type: "application/pdf".into(),
            metadata: sample_metadata(),
        };
        let tx = LedgerTransaction {
            tx_hash: "t1".into(),
            block_number: 42,
            signer_address: "0xabc".into(),
        };
        let credential = Credential::from_anchors(pending, tx);
        assert_eq!(credential.fingerprint, "f1");
        assert_eq!(credential.storage_ref, "s1");
        assert_eq!(credential.tx_hash, "t1");
        assert_eq!(credential.block_number, 42);
        assert_eq!(credential.metadata.holder_name(), "Ada Lovelace");
    }

    #[test]
    fn verification_view_formats_degree_and_date() {
        let pending = PendingUpload {
            fingerprint: "f1".into(),
            storage_ref: "s1".into(),
            content_type: "application/pdf".into(),
            metadata: sample_metadata(),
        };
        let tx = LedgerTransaction {
            tx_hash: "t1".into(),
            block_number: 1,
            signer_address: "0xabc".into(),
        };
        let view = VerificationResult::from_credential(&Credential::from_anchors(pending, tx));
        assert!(view.verified);
        assert_eq!(
            view.degree.as_deref(),
            Some("Faculty of Engineering - Computer Science")
        );
        assert!(view.issue_date.is_some());
    }
}
