//! Agent-facing endpoints: heartbeat, action feed, and reports.
//!
//! Everything here authenticates with the node's current credential, so
//! a rotated token is rejected atomically by the extractor.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use tillfleet_core::db::unix_timestamp;

use crate::storage::RemoteAction;

use super::AppState;
use super::error::ApiError;
use super::extract::AgentNode;

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub software_version: Option<String>,
    #[serde(default)]
    pub onsite_base_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub node_id: String,
    pub received_at: i64,
    /// How many actions are waiting, so a quiet agent knows to sync.
    pub pending_actions: usize,
}

/// `POST /agent/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    AgentNode(node): AgentNode,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    state
        .db
        .record_heartbeat(
            &node.id,
            req.software_version.as_deref(),
            req.onsite_base_url.as_deref(),
        )
        .await?;

    let pending = state
        .db
        .pending_actions_for_node(&node.id, &node.store_id, 50)
        .await?
        .len();

    Ok(Json(HeartbeatResponse {
        node_id: node.id,
        received_at: unix_timestamp(),
        pending_actions: pending,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    pub limit: Option<u32>,
}

/// `GET /agent/actions` — pending work for the calling node, including
/// broadcasts for its store. Oldest first.
pub async fn action_feed(
    State(state): State<AppState>,
    AgentNode(node): AgentNode,
    Query(params): Query<FeedParams>,
) -> Result<Json<Vec<RemoteAction>>, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let actions = state
        .db
        .pending_actions_for_node(&node.id, &node.store_id, limit)
        .await?;
    Ok(Json(actions))
}

#[derive(Debug, Deserialize)]
pub struct ActionReport {
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_detail: Option<String>,
}

/// `POST /agent/actions/{id}/report`
///
/// The dispatcher stores agent-reported failures verbatim; it never
/// interprets them.
pub async fn report(
    State(state): State<AppState>,
    AgentNode(node): AgentNode,
    Path(id): Path<String>,
    Json(report): Json<ActionReport>,
) -> Result<Json<RemoteAction>, ApiError> {
    let action = state.db.get_action(&id).await?;

    // An action is reportable by this node only if addressed to it or
    // broadcast to its store.
    let addressed = action.node_id.as_deref() == Some(node.id.as_str())
        || (action.target_all_nodes != 0 && action.store_id == node.store_id);
    if !addressed {
        return Err(ApiError::not_found(format!("Action {id}")));
    }

    let updated = if report.success {
        state.db.ack_action(&action.id).await?
    } else {
        let code = report
            .error_code
            .as_deref()
            .ok_or_else(|| ApiError::invalid_request("error_code is required on failure"))?;
        state
            .db
            .fail_action(&action.id, code, report.error_detail.as_deref())
            .await?
    };

    info!(
        action_id = %updated.id,
        node_id = %node.id,
        status = %updated.status,
        "Agent reported action outcome"
    );

    Ok(Json(updated))
}
