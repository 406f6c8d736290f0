//! Claim redemption endpoint.

use axum::Json;
use axum::extract::State;

use crate::claim::{RedeemOutcome, RedeemRequest};
use crate::scope::{self, ScopeQuery};

use super::AppState;
use super::error::ApiError;
use super::extract::Operator;

/// `POST /claims/redeem`
///
/// A `finalize_error` in the 200 response means the store/node were
/// created but the onsite server did not learn its cloud identity; the
/// operator can retry finalization without re-running the claim.
pub async fn redeem(
    State(state): State<AppState>,
    Operator(account): Operator,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<RedeemOutcome>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    let outcome = state.claims.redeem(&filter, &req).await?;
    Ok(Json(outcome))
}
