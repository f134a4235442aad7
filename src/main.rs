// src/main.rs

//! # BlockCertify - Main Entry Point
//!
//! Tamper-evident academic credential issuance: document bytes go to a
//! permanent content-addressed storage network, their fingerprint goes to an
//! EVM credential registry, and the resulting credential record answers
//! public verification queries.
//!
//! ## Initialization Sequence
//! 1. Load environment configuration (`.env` supported)
//! 2. Build the storage gateway and ledger clients (or in-process doubles
//!    with `MOCK_SERVICES=true`)
//! 3. Open the credential record store
//! 4. Start the API server
//!
//! ## Environment Variables
//! - `LEDGER_RPC_URL`: HTTP JSON-RPC endpoint of the target chain
//! - `REGISTRY_ADDRESS`: deployed CredentialRegistry contract address
//! - `SIGNER_PRIVATE_KEY`: institution signing key
//! - `STORAGE_GATEWAY_URL`: (optional) storage gateway (default: https://arweave.net)
//! - `CHAIN_ID`, `PORT`, `RECORDS_PATH`, `MAX_UPLOAD_BYTES`,
//!   `CROSS_CHECK_CHAIN`, `MOCK_SERVICES`: optional overrides

use anyhow::Context;
use dotenv::dotenv;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::ledger::mock::MockLedger;
use crate::ledger::registry::{EvmRegistryClient, LedgerClient};
use crate::ledger::wallet::KeySigner;
use crate::records::store::FileRecordStore;
use crate::services::api_server::ApiServer;
use crate::services::issuer::IssuanceOrchestrator;
use crate::services::verifier::VerificationService;
use crate::storage::gateway::{ArweaveGateway, PermanentStore};
use crate::storage::memory::MemoryStore;

mod config; // Environment configuration
mod errors; // Failure taxonomy
mod ledger; // Registry client and wallet capability
mod models; // Data structures
mod records; // Credential record persistence
mod services; // Business logic and API
mod storage; // Permanent storage layer
mod utils; // Fingerprinting and retry helpers

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env().context("loading configuration")?;

    // Storage and ledger clients, or in-process doubles for local runs.
    let (storage, ledger): (Arc<dyn PermanentStore>, Arc<dyn LedgerClient>) =
        if config.mock_services {
            info!("MOCK_SERVICES enabled, using in-process storage and ledger");
            (Arc::new(MemoryStore::new()), Arc::new(MockLedger::new()))
        } else {
            let gateway = ArweaveGateway::new(&config.storage_gateway_url, config.storage_timeout)
                .context("building storage gateway client")?;
            let signer = KeySigner::new(
                &config.ledger_rpc_url,
                &config.signer_private_key,
                config.chain_id,
                &config.registry_address,
            )
            .context("building signing wallet")?;
            let registry = EvmRegistryClient::new(
                &config.ledger_rpc_url,
                &config.registry_address,
                config.chain_id,
                Arc::new(signer),
            )
            .context("building registry client")?;
            (Arc::new(gateway), Arc::new(registry))
        };

    if let Some(parent) = config.records_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("creating records directory")?;
        }
    }
    let records = Arc::new(
        FileRecordStore::open(&config.records_path).context("opening credential record store")?,
    );

    let orchestrator = Arc::new(IssuanceOrchestrator::new(
        storage.clone(),
        ledger.clone(),
        records.clone(),
        config.max_upload_bytes,
    ));
    let verifier = Arc::new(VerificationService::new(
        records.clone(),
        ledger,
        config.cross_check_chain,
    ));

    let api_server = ApiServer::new(
        orchestrator,
        verifier,
        records,
        storage,
        config.max_upload_bytes,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("credential API starting on http://{}", addr);
    api_server.run(addr).await
}
