//! Operator login.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::password;

use super::AppState;
use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub expires_in_secs: i64,
    pub account_id: String,
    pub account_type: String,
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let account = state
        .db
        .get_account_by_email(&req.email)
        .await
        .map_err(|_| ApiError::unauthenticated("Invalid credentials"))?;

    if !password::verify_password(&req.password, &account.password_hash) {
        warn!(email = %req.email, "Failed login attempt");
        return Err(ApiError::unauthenticated("Invalid credentials"));
    }

    let (access_token, expires_in_secs) = state
        .jwt
        .issue_access_token(&account)
        .map_err(|e| ApiError::internal(format!("Token creation failed: {e}")))?;

    info!(account_id = %account.id, account_type = %account.account_type, "Operator logged in");

    Ok(Json(LoginResponse {
        access_token,
        expires_in_secs,
        account_id: account.id,
        account_type: account.account_type,
    }))
}
