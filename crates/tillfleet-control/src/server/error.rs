//! API error taxonomy and HTTP mapping.
//!
//! Scope violations deliberately map to 404, never 403, so an
//! unauthorized caller cannot learn that a record exists. Each claim
//! failure keeps its own code because each implies a different operator
//! remedy.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use tillfleet_core::db::DatabaseError;

use crate::claim::{ClaimError, OnsiteError};
use crate::dispatch::DispatchError;
use crate::impersonation::ImpersonationError;
use crate::scope::ScopeError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", what)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::not_found(what),
            DatabaseError::InvalidState(what) => {
                Self::new(StatusCode::CONFLICT, "invalid_state", what)
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<ScopeError> for ApiError {
    fn from(e: ScopeError) -> Self {
        // Scope resolution only fails on broken account invariants.
        Self::internal(e.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::UnknownCommand(_)
            | DispatchError::UnknownStatus(_)
            | DispatchError::InvalidTarget(_)
            | DispatchError::InvalidParameters(_) => Self::invalid_request(e.to_string()),
            DispatchError::NotFound(what) => Self::not_found(what),
            DispatchError::StateConflict(what) => {
                Self::new(StatusCode::CONFLICT, "invalid_state", what)
            }
            DispatchError::Storage(inner) => Self::internal(inner.to_string()),
        }
    }
}

impl From<ClaimError> for ApiError {
    fn from(e: ClaimError) -> Self {
        match e {
            ClaimError::NotFound(what) => Self::not_found(what),
            ClaimError::AlreadyUsed(_) => {
                Self::new(StatusCode::CONFLICT, "claim_already_used", e.to_string())
            }
            ClaimError::Onsite(onsite) => match onsite {
                OnsiteError::Expired => Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "claim_expired",
                    onsite.to_string(),
                ),
                OnsiteError::CodeMismatch => Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "claim_code_mismatch",
                    onsite.to_string(),
                ),
                OnsiteError::UnknownClaim => Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "claim_not_found",
                    onsite.to_string(),
                ),
                OnsiteError::AlreadyUsed => {
                    Self::new(StatusCode::CONFLICT, "claim_already_used", onsite.to_string())
                }
                OnsiteError::Unreachable { .. } => Self::new(
                    StatusCode::BAD_GATEWAY,
                    "onsite_unreachable",
                    onsite.to_string(),
                ),
                OnsiteError::Protocol(_) => Self::new(
                    StatusCode::BAD_GATEWAY,
                    "onsite_protocol",
                    onsite.to_string(),
                ),
            },
            ClaimError::Storage(inner) => Self::internal(inner.to_string()),
        }
    }
}

impl From<ImpersonationError> for ApiError {
    fn from(e: ImpersonationError) -> Self {
        match e {
            ImpersonationError::NotFound(what) => Self::not_found(what),
            ImpersonationError::NoAddress(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "no_onsite_address",
                e.to_string(),
            ),
            ImpersonationError::Signing(message) => Self::internal(message),
            ImpersonationError::Storage(inner) => Self::internal(inner.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_misses_map_to_not_found_not_forbidden() {
        let err: ApiError = DatabaseError::NotFound("Store s1".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "not_found");
    }

    #[test]
    fn claim_errors_stay_distinguishable() {
        let expired: ApiError = ClaimError::Onsite(OnsiteError::Expired).into();
        let mismatch: ApiError = ClaimError::Onsite(OnsiteError::CodeMismatch).into();
        let used: ApiError = ClaimError::AlreadyUsed("c1".into()).into();
        let unreachable: ApiError = ClaimError::Onsite(OnsiteError::Unreachable {
            url: "https://edge.example".into(),
            reason: "refused".into(),
        })
        .into();

        assert_eq!(expired.code, "claim_expired");
        assert_eq!(mismatch.code, "claim_code_mismatch");
        assert_eq!(used.code, "claim_already_used");
        assert_eq!(unreachable.code, "onsite_unreachable");
        assert_eq!(unreachable.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn state_conflicts_map_to_409() {
        let err: ApiError = DatabaseError::InvalidState("action a1 is ACKED".into()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
