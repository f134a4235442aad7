// src/ledger/wallet.rs
//! External wallet capability boundary.
//!
//! The orchestrator never holds keys. Signing is delegated to a wallet the
//! user controls; this module defines the narrow contract the ledger client
//! consumes: request the account, read the current chain, ask for a chain
//! switch, and submit one signed registry transaction. The submission call
//! blocks until the wallet resolves it with exactly one of three typed
//! outcomes: a receipt, an explicit user rejection, or a connectivity error.

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, JsonRpcError, Middleware, MiddlewareError, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers_contract::BaseContract;
use ethers_core::abi::Abi;
use ethers_core::types::{Address, TransactionRequest, U64};
use log::info;
use thiserror::Error;

use crate::errors::IssuanceError;
use crate::ledger::registry::REGISTRY_ABI;
use crate::models::credential::LedgerTransaction;

/// Failure surface of the wallet capability.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The user explicitly declined to sign. Terminal, never retried.
    #[error("user rejected the signature request")]
    Rejected,

    /// The wallet is connected to a different chain and refused to switch.
    #[error("wallet connected to chain {actual}")]
    WrongChain { actual: u64 },

    /// The transaction was mined but reverted by the registry contract.
    #[error("registry reverted: {0}")]
    Reverted(String),

    /// The wallet or its RPC endpoint was unreachable.
    #[error("wallet connectivity failure: {0}")]
    Connectivity(String),
}

/// Capability contract for the external signer.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// Address of the account that will sign.
    async fn account(&self) -> Result<String, WalletError>;

    /// Chain the wallet is currently connected to.
    async fn chain_id(&self) -> Result<u64, WalletError>;

    /// Asks the wallet to switch to (or add) the given chain.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError>;

    /// Asks the wallet to sign and submit a `registerCredential` transaction
    /// embedding the fingerprint and storage reference, then waits for the
    /// receipt.
    async fn sign_and_submit(
        &self,
        fingerprint: &str,
        storage_ref: &str,
    ) -> Result<LedgerTransaction, WalletError>;
}

/// Server-held signing key, for deployments where the issuing institution
/// signs its own registrations instead of delegating to a browser wallet.
///
/// The key is pinned to one chain at construction; `switch_chain` succeeds
/// only for that chain.
pub struct KeySigner {
    inner: SignerMiddleware<Provider<Http>, LocalWallet>,
    base: BaseContract,
    registry_address: Address,
}

impl KeySigner {
    pub fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        registry_address: &str,
    ) -> Result<Self, IssuanceError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| IssuanceError::Config(format!("invalid ledger RPC url: {}", e)))?;
        let wallet: LocalWallet = private_key
            .parse()
            .map_err(|_| IssuanceError::Config("invalid signer private key".into()))?;
        let wallet = wallet.with_chain_id(chain_id);
        let abi = Abi::load(REGISTRY_ABI)
            .map_err(|e| IssuanceError::Config(format!("registry ABI: {}", e)))?;
        let registry_address = registry_address
            .parse()
            .map_err(|e| IssuanceError::Config(format!("invalid registry address: {}", e)))?;
        Ok(KeySigner {
            inner: SignerMiddleware::new(provider, wallet),
            base: BaseContract::from(abi),
            registry_address,
        })
    }
}

#[async_trait]
impl WalletCapability for KeySigner {
    async fn account(&self) -> Result<String, WalletError> {
        Ok(format!("0x{:x}", self.inner.signer().address()))
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.inner.signer().chain_id())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        let pinned = self.inner.signer().chain_id();
        if chain_id == pinned {
            Ok(())
        } else {
            Err(WalletError::WrongChain { actual: pinned })
        }
    }

    async fn sign_and_submit(
        &self,
        fingerprint: &str,
        storage_ref: &str,
    ) -> Result<LedgerTransaction, WalletError> {
        let data = self
            .base
            .encode(
                "registerCredential",
                (fingerprint.to_string(), storage_ref.to_string()),
            )
            .map_err(|e| WalletError::Connectivity(format!("encoding calldata: {}", e)))?;

        let tx = TransactionRequest::new()
            .to(self.registry_address)
            .data(data);
        let pending = self
            .inner
            .send_transaction(tx, None)
            .await
            .map_err(submit_error)?;
        let receipt = pending
            .await
            .map_err(submit_error)?
            .ok_or_else(|| {
                WalletError::Connectivity("transaction dropped from the mempool".into())
            })?;

        if receipt.status != Some(U64::from(1)) {
            return Err(WalletError::Reverted(format!(
                "transaction {:?} reverted",
                receipt.transaction_hash
            )));
        }

        let tx_hash = format!("{:?}", receipt.transaction_hash);
        let block_number = receipt.block_number.map(|b| b.as_u64()).unwrap_or_default();
        info!("registration mined in tx {} (block {})", tx_hash, block_number);
        Ok(LedgerTransaction {
            tx_hash,
            block_number,
            signer_address: format!("0x{:x}", self.inner.signer().address()),
        })
    }
}

/// Classifies a submission failure. Contract reverts surface before any
/// receipt exists, as a JSON-RPC error from gas estimation, so the error
/// response is inspected for revert data; everything else is connectivity.
fn submit_error<E: MiddlewareError>(err: E) -> WalletError {
    if let Some(reason) = err.as_error_response().and_then(revert_reason) {
        return WalletError::Reverted(reason);
    }
    WalletError::Connectivity(err.to_string())
}

fn revert_reason(rpc: &JsonRpcError) -> Option<String> {
    if rpc.as_revert_data().is_some() || rpc.message.contains("revert") {
        Some(rpc.message.clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::ProviderError;
    use serde_json::json;

    #[test]
    fn estimation_revert_is_classified_as_reverted() {
        // Duplicate-guard reverts arrive as a JSON-RPC error during gas
        // estimation, before any receipt exists.
        let rpc = JsonRpcError {
            code: 3,
            message: "execution reverted: fingerprint already registered".into(),
            data: None,
        };
        assert_eq!(
            revert_reason(&rpc).as_deref(),
            Some("execution reverted: fingerprint already registered")
        );

        let with_data = JsonRpcError {
            code: 3,
            message: "execution failed".into(),
            data: Some(json!("0x08c379a0")),
        };
        assert!(revert_reason(&with_data).is_some());
    }

    #[test]
    fn non_revert_rpc_errors_are_not_reverts() {
        let rpc = JsonRpcError {
            code: -32000,
            message: "header not found".into(),
            data: None,
        };
        assert!(revert_reason(&rpc).is_none());
    }

    #[test]
    fn transport_failures_map_to_connectivity() {
        let err = submit_error(ProviderError::CustomError("connection refused".into()));
        assert!(matches!(err, WalletError::Connectivity(_)));
    }
}
