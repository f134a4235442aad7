// src/ledger/registry.rs
//! Ledger client for the CredentialRegistry contract.
//!
//! Two read paths and one write path. Reads go straight to the chain through
//! an HTTP provider: `resolve_fingerprint` asks the registry whether a
//! fingerprint is already registered (the duplicate-submission guard), and
//! `read_back` fetches a mined transaction and decodes the fingerprint and
//! storage reference out of its calldata. The write path assembles nothing
//! itself; it hands the pair to the external wallet capability and classifies
//! the outcome.
//!
//! Error classes are kept distinct: chain connectivity failures are
//! retryable, signer rejections are terminal and user-caused, and contract
//! reverts are terminal but inspected for duplicate-registration equivalence.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers_contract::{BaseContract, Contract, ContractError};
use ethers_core::abi::Abi;
use ethers_core::types::{Address, H256, U64};
use log::{info, warn};
use std::sync::Arc;

use crate::errors::IssuanceError;
use crate::ledger::wallet::{WalletCapability, WalletError};
use crate::models::credential::{LedgerEntry, LedgerTransaction, Registration};

/// Compile-time copy of the registry ABI.
pub(crate) const REGISTRY_ABI: &[u8] = include_bytes!("abi/CredentialRegistry.json");

/// Result of a submission attempt.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The wallet signed and the transaction was mined.
    Submitted(LedgerTransaction),
    /// The registry rejected the write because the fingerprint is already
    /// registered with the same storage reference. Success-equivalent.
    AlreadyRegistered(Registration),
}

/// Narrow contract over the public ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submits a fingerprint/storage pair through the wallet capability.
    async fn submit(
        &self,
        fingerprint: &str,
        storage_ref: &str,
    ) -> Result<SubmitOutcome, IssuanceError>;

    /// Reads a mined registry transaction back and returns the pair it
    /// registered. Fails if the transaction is unknown or reverted.
    async fn read_back(&self, tx_hash: &str) -> Result<LedgerEntry, IssuanceError>;

    /// Looks up an existing registration for a fingerprint, if any.
    async fn resolve_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Registration>, IssuanceError>;
}

/// Ledger client backed by an EVM JSON-RPC endpoint.
pub struct EvmRegistryClient {
    provider: Arc<Provider<Http>>,
    base: BaseContract,
    registry_address: Address,
    chain_id: u64,
    wallet: Arc<dyn WalletCapability>,
}

impl EvmRegistryClient {
    /// Creates a registry client.
    ///
    /// # Arguments
    /// * `rpc_url` - HTTP JSON-RPC endpoint of the target chain
    /// * `registry_address` - deployed CredentialRegistry address (hex string)
    /// * `chain_id` - chain the registry lives on; the wallet is asked to
    ///   switch here before signing
    /// * `wallet` - external signer capability
    pub fn new(
        rpc_url: &str,
        registry_address: &str,
        chain_id: u64,
        wallet: Arc<dyn WalletCapability>,
    ) -> Result<Self, IssuanceError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| IssuanceError::Config(format!("invalid ledger RPC url: {}", e)))?;
        let abi = Abi::load(REGISTRY_ABI)
            .map_err(|e| IssuanceError::Config(format!("registry ABI: {}", e)))?;
        let registry_address = registry_address
            .parse()
            .map_err(|e| IssuanceError::Config(format!("invalid registry address: {}", e)))?;
        Ok(EvmRegistryClient {
            provider: Arc::new(provider),
            base: BaseContract::from(abi),
            registry_address,
            chain_id,
            wallet,
        })
    }

    fn call_error(err: ContractError<Provider<Http>>) -> IssuanceError {
        match err {
            ContractError::Revert(data) => {
                IssuanceError::ledger_fatal(format!("registry call reverted: {}", data))
            }
            other => IssuanceError::ledger_transient(other.to_string()),
        }
    }

    /// Makes sure the wallet is on the registry's chain, asking for a switch
    /// when it is not. A wallet that cannot or will not switch surfaces as
    /// `ChainMismatch`, which the caller can present as an actionable step.
    async fn ensure_chain(&self) -> Result<(), IssuanceError> {
        let actual = self
            .wallet
            .chain_id()
            .await
            .map_err(|e| Self::wallet_error(e, self.chain_id))?;
        if actual == self.chain_id {
            return Ok(());
        }
        warn!(
            "wallet on chain {}, requesting switch to {}",
            actual, self.chain_id
        );
        self.wallet
            .switch_chain(self.chain_id)
            .await
            .map_err(|_| IssuanceError::ChainMismatch {
                expected: self.chain_id,
                actual,
            })
    }

    fn wallet_error(err: WalletError, expected_chain: u64) -> IssuanceError {
        match err {
            WalletError::Rejected => IssuanceError::SignerRejected,
            WalletError::WrongChain { actual } => IssuanceError::ChainMismatch {
                expected: expected_chain,
                actual,
            },
            WalletError::Connectivity(message) => IssuanceError::ledger_transient(message),
            WalletError::Reverted(message) => IssuanceError::ledger_fatal(message),
        }
    }
}

#[async_trait]
impl LedgerClient for EvmRegistryClient {
    async fn submit(
        &self,
        fingerprint: &str,
        storage_ref: &str,
    ) -> Result<SubmitOutcome, IssuanceError> {
        self.ensure_chain().await?;

        match self.wallet.sign_and_submit(fingerprint, storage_ref).await {
            Ok(tx) => {
                info!(
                    "fingerprint {} registered in tx {} (block {})",
                    fingerprint, tx.tx_hash, tx.block_number
                );
                Ok(SubmitOutcome::Submitted(tx))
            }
            // The registry's only revert is its duplicate guard. A matching
            // existing registration is success-equivalent; a mismatching one
            // means somebody registered this fingerprint with different bytes.
            Err(WalletError::Reverted(reason)) => {
                match self.resolve_fingerprint(fingerprint).await? {
                    Some(existing) if existing.storage_ref == storage_ref => {
                        info!(
                            "fingerprint {} already registered with matching storage ref",
                            fingerprint
                        );
                        Ok(SubmitOutcome::AlreadyRegistered(existing))
                    }
                    Some(existing) => Err(IssuanceError::IntegrityMismatch {
                        expected: storage_ref.to_string(),
                        actual: existing.storage_ref,
                    }),
                    None => Err(IssuanceError::ledger_fatal(format!(
                        "registry reverted without an existing registration: {}",
                        reason
                    ))),
                }
            }
            Err(other) => Err(Self::wallet_error(other, self.chain_id)),
        }
    }

    async fn read_back(&self, tx_hash: &str) -> Result<LedgerEntry, IssuanceError> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|_| IssuanceError::ledger_fatal(format!("malformed tx hash: {}", tx_hash)))?;

        let tx = self
            .provider
            .get_transaction(hash)
            .await
            .map_err(|e| IssuanceError::ledger_transient(e.to_string()))?
            .ok_or_else(|| {
                IssuanceError::ledger_fatal(format!("transaction {} not found on chain", tx_hash))
            })?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| IssuanceError::ledger_transient(e.to_string()))?
            .ok_or_else(|| {
                IssuanceError::ledger_fatal(format!("transaction {} not yet mined", tx_hash))
            })?;

        if receipt.status != Some(U64::from(1)) {
            return Err(IssuanceError::ledger_fatal(format!(
                "transaction {} reverted on chain",
                tx_hash
            )));
        }

        if tx.to != Some(self.registry_address) {
            return Err(IssuanceError::ledger_fatal(format!(
                "transaction {} does not target the credential registry",
                tx_hash
            )));
        }

        let (fingerprint, storage_ref): (String, String) = self
            .base
            .decode("registerCredential", tx.input.as_ref())
            .map_err(|e| {
                IssuanceError::ledger_fatal(format!("unable to decode registry calldata: {}", e))
            })?;

        Ok(LedgerEntry {
            fingerprint,
            storage_ref,
        })
    }

    async fn resolve_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Registration>, IssuanceError> {
        let contract = Contract::new(
            self.registry_address,
            self.base.clone(),
            self.provider.clone(),
        );
        let (exists, storage_ref, signer): (bool, String, Address) = contract
            .method("resolveCredential", fingerprint.to_string())
            .map_err(|e| IssuanceError::Config(format!("registry ABI: {}", e)))?
            .call()
            .await
            .map_err(Self::call_error)?;

        if !exists {
            return Ok(None);
        }
        Ok(Some(Registration {
            storage_ref,
            signer_address: format!("0x{:x}", signer),
        }))
    }
}
