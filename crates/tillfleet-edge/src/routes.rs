//! HTTP pairing surface served by the onsite agent.
//!
//! `POST /pairing/claim` is the local operator entry point; confirm and
//! finalize are what the cloud control plane calls during redemption.
//! Error codes here are the contract the cloud maps back into its claim
//! taxonomy.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::pairing::{
    ClaimPackage, CloudIdentity, ConfirmInfo, FinalizeRequest, PairingError, PairingManager,
};

#[derive(Clone)]
pub struct AppState {
    pub pairing: Arc<PairingManager>,
}

impl IntoResponse for PairingError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::UnknownClaim(_) => (StatusCode::NOT_FOUND, "claim_not_found"),
            Self::Expired => (StatusCode::UNPROCESSABLE_ENTITY, "claim_expired"),
            Self::CodeMismatch => (StatusCode::UNPROCESSABLE_ENTITY, "claim_code_mismatch"),
            Self::AlreadyUsed => (StatusCode::CONFLICT, "claim_already_used"),
            Self::State(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateClaimRequest {
    #[serde(default)]
    pub label: Option<String>,
}

/// `POST /pairing/claim` — issue a fresh claim, replacing any active one.
pub async fn create_claim(
    State(state): State<AppState>,
    Json(req): Json<CreateClaimRequest>,
) -> Result<Json<ClaimPackage>, PairingError> {
    Ok(Json(state.pairing.create_claim(req.label)?))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub claim_id: String,
    pub claim_code: String,
}

/// `POST /pairing/confirm` — cloud-side verification of a claim.
pub async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmInfo>, PairingError> {
    Ok(Json(state.pairing.confirm(&req.claim_id, &req.claim_code)?))
}

/// `POST /pairing/finalize` — cloud pushes the final linkage back.
pub async fn finalize(
    State(state): State<AppState>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<CloudIdentity>, PairingError> {
    Ok(Json(state.pairing.finalize(&req)?))
}

#[derive(Debug, Serialize)]
pub struct PairingStatus {
    pub server_uid: String,
    pub paired: bool,
    pub cloud: Option<CloudIdentity>,
}

/// `GET /pairing/status` — local diagnostics.
pub async fn status(State(state): State<AppState>) -> Json<PairingStatus> {
    let cloud = state.pairing.cloud_identity();
    Json(PairingStatus {
        server_uid: state.pairing.server_uid(),
        paired: cloud.is_some(),
        cloud,
    })
}

/// Build the pairing router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/pairing/claim", post(create_claim))
        .route("/pairing/confirm", post(confirm))
        .route("/pairing/finalize", post(finalize))
        .route("/pairing/status", get(status))
        .with_state(state)
}
