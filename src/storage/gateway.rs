// src/storage/gateway.rs
//! Permanent storage client.
//!
//! Writes document bytes to a content-addressed, append-only storage network
//! through its HTTP gateway and reads them back by reference. The network is
//! write-once: a stored object can never be retracted, which is why the
//! orchestrator treats abandoned uploads as accepted orphans rather than
//! cleaning them up.
//!
//! `store` is NOT idempotent at the network layer. Every successful call
//! creates a new stored object with a new reference; not calling it twice for
//! the same logical upload is the orchestrator's job, not this client's.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::IssuanceError;

/// Narrow contract over the permanent storage network.
#[async_trait]
pub trait PermanentStore: Send + Sync {
    /// Writes `data` and returns the retrieval reference the network issued.
    /// The fingerprint is attached as an upload tag so the stored object can
    /// be correlated with its on-chain registration.
    async fn store(
        &self,
        data: &[u8],
        content_type: &str,
        fingerprint: &str,
    ) -> Result<String, IssuanceError>;

    /// Reads the bytes previously stored under `storage_ref`.
    async fn fetch(&self, storage_ref: &str) -> Result<Vec<u8>, IssuanceError>;
}

/// Upload receipt returned by the gateway.
#[derive(Deserialize)]
struct UploadReceipt {
    id: String,
}

/// HTTP client for an Arweave-style storage gateway.
pub struct ArweaveGateway {
    client: reqwest::Client,
    base_url: String,
}

impl ArweaveGateway {
    /// Application tag attached to every upload.
    const APP_NAME: &'static str = "BlockCertify";

    /// Creates a gateway client for `base_url` (no trailing slash) with a
    /// bounded request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IssuanceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IssuanceError::Config(format!("storage client: {}", e)))?;
        Ok(ArweaveGateway {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Maps a transport-level failure: timeouts and connection errors are
    /// retryable, everything else is fatal.
    fn transport_error(err: reqwest::Error) -> IssuanceError {
        if err.is_timeout() || err.is_connect() {
            IssuanceError::storage_transient(err.to_string())
        } else {
            IssuanceError::storage_fatal(err.to_string())
        }
    }

    /// Maps a non-success status: 402 is the quota/payment failure, 5xx is
    /// transient, anything else fatal.
    fn status_error(status: StatusCode, context: &str) -> IssuanceError {
        if status == StatusCode::PAYMENT_REQUIRED {
            IssuanceError::storage_fatal(format!("{}: storage quota exhausted", context))
        } else if status.is_server_error() {
            IssuanceError::storage_transient(format!("{}: gateway returned {}", context, status))
        } else {
            IssuanceError::storage_fatal(format!("{}: gateway returned {}", context, status))
        }
    }
}

#[async_trait]
impl PermanentStore for ArweaveGateway {
    async fn store(
        &self,
        data: &[u8],
        content_type: &str,
        fingerprint: &str,
    ) -> Result<String, IssuanceError> {
        debug!("uploading {} bytes to storage gateway", data.len());
        let response = self
            .client
            .post(format!("{}/tx", self.base_url))
            .header("Content-Type", content_type)
            .header("X-App-Name", Self::APP_NAME)
            .header("X-File-Hash", fingerprint)
            .body(data.to_vec())
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, "store"));
        }

        let receipt: UploadReceipt = response
            .json()
            .await
            .map_err(|e| IssuanceError::storage_fatal(format!("malformed upload receipt: {}", e)))?;
        if receipt.id.is_empty() {
            return Err(IssuanceError::storage_fatal(
                "upload receipt carried no transaction id",
            ));
        }

        info!("stored document, storage ref {}", receipt.id);
        Ok(receipt.id)
    }

    async fn fetch(&self, storage_ref: &str) -> Result<Vec<u8>, IssuanceError> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, storage_ref))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, "fetch"));
        }

        let bytes = response.bytes().await.map_err(Self::transport_error)?;
        Ok(bytes.to_vec())
    }
}
