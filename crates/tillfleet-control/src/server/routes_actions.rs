//! Operator-facing remote action endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use crate::dispatch::{self, DispatchRequest};
use crate::scope::{self, ScopeQuery};
use crate::storage::RemoteAction;

use super::AppState;
use super::error::ApiError;
use super::extract::Operator;

#[derive(Debug, Default, Deserialize)]
pub struct ActionListParams {
    /// Comma-separated status set, e.g. `PENDING,FAILED`.
    pub status: Option<String>,
    pub reseller_id: Option<String>,
    pub tenant_id: Option<String>,
    pub store_id: Option<String>,
    pub node_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `POST /actions`
pub async fn create(
    State(state): State<AppState>,
    Operator(account): Operator,
    Json(req): Json<DispatchRequest>,
) -> Result<Json<RemoteAction>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    let action = dispatch::enqueue(&state.db, &filter, &req).await?;
    Ok(Json(action))
}

/// `GET /actions`
pub async fn list(
    State(state): State<AppState>,
    Operator(account): Operator,
    Query(params): Query<ActionListParams>,
) -> Result<Json<Vec<RemoteAction>>, ApiError> {
    let filter = scope::resolve(
        &account,
        &ScopeQuery {
            reseller_id: params.reseller_id.clone(),
            tenant_id: params.tenant_id.clone(),
        },
    )?;

    let statuses = match &params.status {
        Some(raw) => dispatch::parse_status_set(raw).map_err(ApiError::from)?,
        None => Vec::new(),
    };

    let actions = dispatch::list(
        &state.db,
        &filter,
        &statuses,
        params.store_id.clone(),
        params.node_id.clone(),
        params.limit,
        params.offset,
    )
    .await?;

    Ok(Json(actions))
}

/// `POST /actions/{id}/retry`
pub async fn retry(
    State(state): State<AppState>,
    Operator(account): Operator,
    Path(id): Path<String>,
) -> Result<Json<RemoteAction>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    Ok(Json(dispatch::retry(&state.db, &filter, &id).await?))
}

/// `POST /actions/{id}/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    Operator(account): Operator,
    Path(id): Path<String>,
) -> Result<Json<RemoteAction>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    Ok(Json(dispatch::cancel(&state.db, &filter, &id).await?))
}
