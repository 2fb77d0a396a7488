//! Wallet REST API Handlers

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::WalletError;
use crate::pkcs11::ModuleGateway;
use crate::repository::KeyRecordStore;
use crate::wallet::Wallet;

/// Response containing a freshly generated public point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Raw uncompressed EC point, hex encoded
    pub ec_point: String,
}

/// Request to sign a digest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    /// Public point of the key pair, as returned by generate
    pub ec_point: String,
    /// Digest to sign, hex encoded, already hashed by the caller
    pub message: String,
}

/// Response containing a raw ECDSA signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    pub r: String,
    pub s: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

// ==================== Error Handling ====================

pub struct ApiError(pub StatusCode, pub Json<ErrorResponse>);

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::NOT_FOUND,
            Json(ErrorResponse { error: msg.into() }),
        )
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: msg.into() }),
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: msg.into() }),
        )
    }
}

impl From<WalletError> for ApiError {
    fn from(e: WalletError) -> Self {
        match &e {
            WalletError::KeyNotFound(_) => ApiError::not_found(e.to_string()),
            WalletError::InvalidDigest(_) | WalletError::Configuration(_) => {
                ApiError::bad_request(e.to_string())
            }
            WalletError::Module(_) | WalletError::SignatureIntegrity | WalletError::Storage(_) => {
                ApiError::internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

// ==================== Handlers ====================

/// Health check
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Generate a keypair in the module and return its public point
pub async fn generate<G, S>(
    State(wallet): State<Arc<Wallet<G, S>>>,
) -> Result<Json<GenerateResponse>, ApiError>
where
    G: ModuleGateway,
    S: KeyRecordStore + 'static,
{
    let ec_point = wallet.generate().await?;
    Ok(Json(GenerateResponse { ec_point }))
}

/// Sign a caller-hashed digest with the key pair behind a public point
pub async fn sign<G, S>(
    State(wallet): State<Arc<Wallet<G, S>>>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError>
where
    G: ModuleGateway,
    S: KeyRecordStore + 'static,
{
    if request.ec_point.is_empty() {
        return Err(ApiError::bad_request("ecPoint cannot be empty"));
    }

    let (r, s) = wallet.sign(&request.ec_point, &request.message).await?;
    Ok(Json(SignResponse { r, s }))
}
