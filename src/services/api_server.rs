// src/services/api_server.rs
//! REST API for credential issuance and verification.
//!
//! Endpoints:
//! - POST /api/v1/credentials/prepare: multipart upload, phase 1
//! - POST /api/v1/credentials/confirm: wallet transaction receipt, phase 2
//! - POST /api/v1/credentials/verify: public verification query
//! - GET  /api/v1/records: issued credential summaries
//! - GET  /api/v1/records/:credential_id: original document bytes
//!
//! The API is stateless: prepare returns the full pending-upload handle and
//! confirm takes it back, so the signature wait lives entirely in the client
//! holding the wallet. Errors are rendered as a `{code, message, details}`
//! envelope with codes from the issuance error taxonomy.

use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Datelike, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::errors::IssuanceError;
use crate::models::credential::{
    Credential, CredentialMetadata, LedgerTransaction, PendingUpload, VerificationResult,
};
use crate::records::store::RecordStore;
use crate::services::issuer::{IssuanceOrchestrator, IssuanceSession};
use crate::services::verifier::VerificationService;
use crate::storage::gateway::PermanentStore;

const EARLIEST_GRADUATION_YEAR: i32 = 1950;

// API request and response structures

/// Request payload for confirming a prepared upload: the pending-upload
/// handle returned by prepare plus the mined wallet transaction.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest {
    fingerprint: String,
    storage_ref: String,
    content_type: String,
    tx_hash: String,
    block_number: u64,
    signer_address: String,
    metadata: CredentialMetadata,
}

/// Response for a confirmed issuance.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmResponse {
    success: bool,
    credential_id: String,
}

/// Request payload for verifying a credential by its public ID.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    credential_id: String,
}

/// One row of the issued-credential listing.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordSummary {
    credential_id: String,
    holder_name: String,
    university: String,
    department: String,
    storage_ref: String,
    created_at: DateTime<Utc>,
}

impl RecordSummary {
    fn from_credential(credential: &Credential) -> Self {
        RecordSummary {
            credential_id: credential.credential_id.clone(),
            holder_name: credential.metadata.holder_name(),
            university: credential.metadata.university.clone(),
            department: credential.metadata.department.clone(),
            storage_ref: credential.storage_ref.clone(),
            created_at: credential.created_at,
        }
    }
}

/// Error envelope returned on every failure path.
#[derive(Serialize, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// Wrapper giving `IssuanceError` an HTTP rendering, so handlers can use `?`.
struct ApiError(IssuanceError);

impl From<IssuanceError> for ApiError {
    fn from(err: IssuanceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            IssuanceError::InvalidDocument(_)
            | IssuanceError::SignerRejected
            | IssuanceError::ChainMismatch { .. } => StatusCode::BAD_REQUEST,
            IssuanceError::NotFound => StatusCode::NOT_FOUND,
            IssuanceError::AlreadyRegistered { .. }
            | IssuanceError::IntegrityMismatch { .. }
            | IssuanceError::InvalidState(_) => StatusCode::CONFLICT,
            _ if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {} ({})", err, err.code());
        }
        let details = match &err {
            IssuanceError::AlreadyRegistered { storage_ref } => {
                Some(json!({ "storageRef": storage_ref }))
            }
            IssuanceError::IntegrityMismatch { expected, actual } => {
                Some(json!({ "expected": expected, "actual": actual }))
            }
            IssuanceError::ChainMismatch { expected, actual } => {
                Some(json!({ "expectedChainId": expected, "actualChainId": actual }))
            }
            _ => None,
        };
        let body = ErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

/// API server state containing all service dependencies.
#[derive(Clone)]
pub struct ApiServer {
    /// Two-phase issuance driver.
    orchestrator: Arc<IssuanceOrchestrator>,

    /// Public verification queries.
    verifier: Arc<VerificationService>,

    /// Issued credential records, for listings and document lookups.
    records: Arc<dyn RecordStore>,

    /// Permanent storage, for serving original document bytes.
    storage: Arc<dyn PermanentStore>,

    /// Request body ceiling for the multipart prepare endpoint.
    max_body_bytes: usize,
}

impl ApiServer {
    pub fn new(
        orchestrator: Arc<IssuanceOrchestrator>,
        verifier: Arc<VerificationService>,
        records: Arc<dyn RecordStore>,
        storage: Arc<dyn PermanentStore>,
        max_body_bytes: usize,
    ) -> Self {
        ApiServer {
            orchestrator,
            verifier,
            records,
            storage,
            max_body_bytes,
        }
    }

    /// Builds the application router. Split out from `run` so tests can
    /// exercise handlers without binding a socket.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/credentials/prepare", post(Self::prepare_handler))
            .route("/api/v1/credentials/confirm", post(Self::confirm_handler))
            .route("/api/v1/credentials/verify", post(Self::verify_handler))
            .route("/api/v1/records", get(Self::list_records_handler))
            .route("/api/v1/records/:credential_id", get(Self::get_document_handler))
            // Slack over the document ceiling for multipart framing and the
            // metadata parts.
            .layer(DefaultBodyLimit::max(self.max_body_bytes + (1 << 20)))
            .layer(CorsLayer::permissive())
            .with_state(Arc::new(self.clone()))
    }

    /// Starts the API server and begins listening for requests.
    pub async fn run(&self, addr: SocketAddr) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("listening on {}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Phase 1: accepts the document and holder metadata as multipart form
    /// data, writes the bytes to permanent storage, and returns the pending
    /// upload the client must echo back to confirm.
    ///
    /// # Responses
    /// - 200 OK: pending upload handle
    /// - 400 Bad Request: missing/empty document or invalid metadata
    /// - 409 Conflict: fingerprint already registered on chain
    /// - 503 Service Unavailable: storage or chain unreachable after retries
    async fn prepare_handler(
        State(state): State<Arc<ApiServer>>,
        multipart: Multipart,
    ) -> Result<Json<PendingUpload>, ApiError> {
        let submission = read_submission(multipart).await?;
        validate_metadata(&submission.metadata)?;

        let mut session = IssuanceSession::new();
        let pending = state
            .orchestrator
            .prepare(
                &mut session,
                &submission.document,
                &submission.content_type,
                submission.metadata,
            )
            .await?;
        Ok(Json(pending))
    }

    /// Phase 2: validates the wallet's mined transaction against the pending
    /// upload and persists the credential. Safe to retry with the same body.
    ///
    /// # Responses
    /// - 200 OK: `{success, credentialId}`
    /// - 409 Conflict: on-chain payload disagrees with the prepared upload
    /// - 503 Service Unavailable: chain or record store unreachable
    async fn confirm_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<ConfirmRequest>,
    ) -> Result<Json<ConfirmResponse>, ApiError> {
        validate_metadata(&payload.metadata)?;

        let pending = PendingUpload {
            fingerprint: payload.fingerprint,
            storage_ref: payload.storage_ref,
            content_type: payload.content_type,
            metadata: payload.metadata,
        };
        let tx = LedgerTransaction {
            tx_hash: payload.tx_hash,
            block_number: payload.block_number,
            signer_address: payload.signer_address,
        };

        let mut session = IssuanceSession::resume(pending);
        let credential = state.orchestrator.confirm(&mut session, tx).await?;
        Ok(Json(ConfirmResponse {
            success: true,
            credential_id: credential.credential_id,
        }))
    }

    /// Public verification query. Unknown IDs answer `verified: false` with
    /// 200, never 404.
    async fn verify_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<VerifyRequest>,
    ) -> Result<Json<VerificationResult>, ApiError> {
        let result = state.verifier.verify(&payload.credential_id).await?;
        Ok(Json(result))
    }

    /// Lists issued credentials, newest first.
    async fn list_records_handler(
        State(state): State<Arc<ApiServer>>,
    ) -> Result<Json<Vec<RecordSummary>>, ApiError> {
        let records = state.records.list().await?;
        let summaries = records.iter().map(RecordSummary::from_credential).collect();
        Ok(Json(summaries))
    }

    /// Streams the original document bytes back from permanent storage,
    /// under the content type they were stored with.
    async fn get_document_handler(
        State(state): State<Arc<ApiServer>>,
        Path(credential_id): Path<String>,
    ) -> Result<Response, ApiError> {
        let credential = state
            .records
            .get(&credential_id)
            .await?
            .ok_or(IssuanceError::NotFound)?;
        let bytes = state.storage.fetch(&credential.storage_ref).await?;
        Ok((
            [(header::CONTENT_TYPE, credential.content_type)],
            bytes,
        )
            .into_response())
    }
}

/// Document bytes plus metadata decoded from the prepare form.
struct Submission {
    document: Vec<u8>,
    content_type: String,
    metadata: CredentialMetadata,
}

/// Pulls the document part and the metadata text parts out of the multipart
/// body. Field names match the registrar form.
async fn read_submission(mut multipart: Multipart) -> Result<Submission, IssuanceError> {
    let mut document: Option<Vec<u8>> = None;
    let mut content_type = String::from("application/octet-stream");
    let mut first_name = String::new();
    let mut last_name = String::new();
    let mut email = String::new();
    let mut university = String::new();
    let mut faculty = String::new();
    let mut department = String::new();
    let mut graduation_year: Option<i32> = None;
    let mut student_number = String::new();
    let mut nationality = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| IssuanceError::InvalidDocument(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "document" => {
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                let bytes = field.bytes().await.map_err(|e| {
                    IssuanceError::InvalidDocument(format!("reading document part: {}", e))
                })?;
                document = Some(bytes.to_vec());
            }
            other => {
                let value = field.text().await.map_err(|e| {
                    IssuanceError::InvalidDocument(format!("reading field {}: {}", other, e))
                })?;
                match other {
                    "firstName" => first_name = value,
                    "lastName" => last_name = value,
                    "email" => email = value,
                    "university" => university = value,
                    "faculty" => faculty = value,
                    "department" => department = value,
                    "graduationYear" => {
                        graduation_year = Some(value.parse().map_err(|_| {
                            IssuanceError::InvalidDocument(format!(
                                "graduationYear is not a number: {}",
                                value
                            ))
                        })?)
                    }
                    "studentNumber" => student_number = value,
                    "nationality" => nationality = value,
                    // Unknown parts are ignored, matching lenient form handling.
                    _ => {}
                }
            }
        }
    }

    let document = document
        .ok_or_else(|| IssuanceError::InvalidDocument("missing document part".into()))?;
    let graduation_year = graduation_year
        .ok_or_else(|| IssuanceError::InvalidDocument("missing graduationYear".into()))?;

    Ok(Submission {
        document,
        content_type,
        metadata: CredentialMetadata {
            first_name,
            last_name,
            email,
            university,
            faculty,
            department,
            graduation_year,
            student_number,
            nationality,
        },
    })
}

/// Holder metadata gate: names, email, university and department are
/// required, and the graduation year must be plausible.
fn validate_metadata(metadata: &CredentialMetadata) -> Result<(), IssuanceError> {
    let required = [
        ("firstName", &metadata.first_name),
        ("lastName", &metadata.last_name),
        ("email", &metadata.email),
        ("university", &metadata.university),
        ("department", &metadata.department),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(IssuanceError::InvalidDocument(format!(
                "{} is required",
                name
            )));
        }
    }
    let latest = Utc::now().year() + 1;
    if metadata.graduation_year < EARLIEST_GRADUATION_YEAR || metadata.graduation_year > latest {
        return Err(IssuanceError::InvalidDocument(format!(
            "graduationYear must be between {} and {}",
            EARLIEST_GRADUATION_YEAR, latest
        )));
    }
    Ok(())
}
