//! Request extractors for operator and agent authentication.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::warn;

use crate::auth::node_token;
use crate::storage::{Account, Node};

use super::error::ApiError;
use super::AppState;

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthenticated("Missing authorization header"))
}

/// An authenticated operator, loaded from a valid access token.
pub struct Operator(pub Account);

impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(parts)?;

        let claims = state
            .jwt
            .validate_access(token)
            .map_err(|_| ApiError::unauthenticated("Invalid token"))?;
        if !claims.is_access() {
            return Err(ApiError::unauthenticated("Not an access token"));
        }

        let account = state
            .db
            .get_account(&claims.sub)
            .await
            .map_err(|_| ApiError::unauthenticated("Unknown account"))?;

        Ok(Self(account))
    }
}

/// An authenticated onsite node, identified by its node key and current
/// credential. Verification runs against the stored digest only, so a
/// rotated credential is rejected from the first request after rotation.
pub struct AgentNode(pub Node);

impl FromRequestParts<AppState> for AgentNode {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let node_key = parts
            .headers
            .get("x-node-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthenticated("Missing x-node-key header"))?;
        let token = bearer_token(parts)?;

        let node = state
            .db
            .get_node_by_key(node_key)
            .await
            .map_err(|_| ApiError::unauthenticated("Unknown node"))?;

        if !node_token::verify_token(token, &node.token_hash) {
            warn!(node_key, "Node presented a stale or invalid credential");
            return Err(ApiError::unauthenticated("Invalid node credential"));
        }

        Ok(Self(node))
    }
}
