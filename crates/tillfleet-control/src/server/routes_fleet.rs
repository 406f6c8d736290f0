//! Fleet read endpoints, credential rotation, and impersonation links.
//!
//! Node status in every response here is derived at read time from
//! `last_heartbeat_at`; nothing ever writes it.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use tillfleet_core::db::unix_timestamp;
use tillfleet_core::health::{self, NodeHealth};

use crate::auth::node_token;
use crate::impersonation::{self, ImpersonationLink};
use crate::scope::{self, ScopeQuery};
use crate::storage::{Node, Reseller, Store, Tenant};

use super::AppState;
use super::error::ApiError;
use super::extract::Operator;

const DEFAULT_PAGE: u32 = 100;
const MAX_PAGE: u32 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub reseller_id: Option<String>,
    pub tenant_id: Option<String>,
    pub store_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListParams {
    fn scope_query(&self) -> ScopeQuery {
        ScopeQuery {
            reseller_id: self.reseller_id.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }

    fn page(&self) -> (u32, u32) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        (limit, self.offset.unwrap_or(0))
    }
}

/// A node as the UI sees it: stored fields plus the derived status.
#[derive(Debug, Serialize)]
pub struct NodeView {
    pub id: String,
    pub store_id: String,
    pub node_key: String,
    pub label: String,
    pub status: NodeHealth,
    pub software_version: Option<String>,
    pub onsite_server_uid: Option<String>,
    pub onsite_base_url: Option<String>,
    pub last_heartbeat_at: Option<i64>,
    pub credential_version: i64,
}

pub fn node_view(node: Node, state: &AppState) -> NodeView {
    let status = health::classify(node.last_heartbeat_at, unix_timestamp(), &state.thresholds);
    NodeView {
        id: node.id,
        store_id: node.store_id,
        node_key: node.node_key,
        label: node.label,
        status,
        software_version: node.software_version,
        onsite_server_uid: node.onsite_server_uid,
        onsite_base_url: node.onsite_base_url,
        last_heartbeat_at: node.last_heartbeat_at,
        credential_version: node.credential_version,
    }
}

/// `GET /resellers`
pub async fn list_resellers(
    State(state): State<AppState>,
    Operator(account): Operator,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Reseller>>, ApiError> {
    let filter = scope::resolve(&account, &params.scope_query())?;
    let (limit, offset) = params.page();
    Ok(Json(state.db.list_resellers(&filter, limit, offset).await?))
}

/// `GET /tenants`
pub async fn list_tenants(
    State(state): State<AppState>,
    Operator(account): Operator,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    let filter = scope::resolve(&account, &params.scope_query())?;
    let (limit, offset) = params.page();
    Ok(Json(state.db.list_tenants(&filter, limit, offset).await?))
}

/// `GET /stores`
pub async fn list_stores(
    State(state): State<AppState>,
    Operator(account): Operator,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Store>>, ApiError> {
    let filter = scope::resolve(&account, &params.scope_query())?;
    let (limit, offset) = params.page();
    let stores = state
        .db
        .list_stores(&filter, params.tenant_id.as_deref(), limit, offset)
        .await?;
    Ok(Json(stores))
}

/// `GET /stores/{id}`
pub async fn get_store(
    State(state): State<AppState>,
    Operator(account): Operator,
    Path(id): Path<String>,
) -> Result<Json<Store>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    Ok(Json(state.db.get_store_scoped(&id, &filter).await?))
}

/// `GET /nodes`
pub async fn list_nodes(
    State(state): State<AppState>,
    Operator(account): Operator,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<NodeView>>, ApiError> {
    let filter = scope::resolve(&account, &params.scope_query())?;
    let (limit, offset) = params.page();
    let nodes = state
        .db
        .list_nodes(&filter, params.store_id.as_deref(), limit, offset)
        .await?;
    Ok(Json(
        nodes.into_iter().map(|n| node_view(n, &state)).collect(),
    ))
}

/// `GET /nodes/{id}`
pub async fn get_node(
    State(state): State<AppState>,
    Operator(account): Operator,
    Path(id): Path<String>,
) -> Result<Json<NodeView>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    let node = state.db.get_node_scoped(&id, &filter).await?;
    Ok(Json(node_view(node, &state)))
}

#[derive(Debug, Serialize)]
pub struct RotateTokenResponse {
    pub node_token: String,
    pub credential_version: i64,
}

/// `POST /nodes/{id}/rotate-token`
///
/// The returned plaintext is visible exactly once. The previous
/// credential is dead before this handler returns.
pub async fn rotate_token(
    State(state): State<AppState>,
    Operator(account): Operator,
    Path(id): Path<String>,
) -> Result<Json<RotateTokenResponse>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    let node = state.db.get_node_scoped(&id, &filter).await?;

    let token = node_token::generate_token();
    let rotated = state
        .db
        .rotate_node_credential(&node.id, &node_token::hash_token(&token))
        .await?;

    info!(node_id = %rotated.id, version = rotated.credential_version, "Node credential rotated");

    Ok(Json(RotateTokenResponse {
        node_token: token,
        credential_version: rotated.credential_version,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteNodeResponse {
    pub removed: bool,
}

/// `DELETE /nodes/{id}`
pub async fn delete_node(
    State(state): State<AppState>,
    Operator(account): Operator,
    Path(id): Path<String>,
) -> Result<Json<DeleteNodeResponse>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    let node = state.db.get_node_scoped(&id, &filter).await?;
    let removed = state.db.delete_node(&node.id).await?;

    info!(node_id = %node.id, "Node detached");

    Ok(Json(DeleteNodeResponse { removed }))
}

/// `POST /stores/{id}/impersonation-link`
pub async fn issue_impersonation_link(
    State(state): State<AppState>,
    Operator(account): Operator,
    Path(id): Path<String>,
) -> Result<Json<ImpersonationLink>, ApiError> {
    let filter = scope::resolve(&account, &ScopeQuery::default())?;
    let link = impersonation::issue_link(&state.db, &state.jwt, &filter, &account.id, &id).await?;
    Ok(Json(link))
}
