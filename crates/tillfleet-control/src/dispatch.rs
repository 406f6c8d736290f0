//! Remote command dispatch.
//!
//! Operators enqueue commands here; onsite agents poll and acknowledge
//! them. Dispatch failures are always local validation rejections, never
//! deferred: once a row exists it only changes through the guarded
//! transitions in the storage layer.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use tillfleet_core::db::DatabaseError;

use crate::scope::ScopeFilter;
use crate::storage::{ActionListQuery, ControlDatabase, NewActionParams, RemoteAction};

/// Default and maximum page sizes for action listings.
pub const DEFAULT_PAGE: u32 = 100;
pub const MAX_PAGE: u32 = 500;

/// Commands an onsite agent knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    HeartbeatNow,
    SyncPull,
    RunDiagnostics,
    ReloadSettings,
    RestartAgent,
    RestartBackend,
}

impl CommandKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HeartbeatNow => "HEARTBEAT_NOW",
            Self::SyncPull => "SYNC_PULL",
            Self::RunDiagnostics => "RUN_DIAGNOSTICS",
            Self::ReloadSettings => "RELOAD_SETTINGS",
            Self::RestartAgent => "RESTART_AGENT",
            Self::RestartBackend => "RESTART_BACKEND",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HEARTBEAT_NOW" => Some(Self::HeartbeatNow),
            "SYNC_PULL" => Some(Self::SyncPull),
            "RUN_DIAGNOSTICS" => Some(Self::RunDiagnostics),
            "RELOAD_SETTINGS" => Some(Self::ReloadSettings),
            "RESTART_AGENT" => Some(Self::RestartAgent),
            "RESTART_BACKEND" => Some(Self::RestartBackend),
            _ => None,
        }
    }
}

/// Queue states of a remote action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Acked,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Acked => "ACKED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "ACKED" => Some(Self::Acked),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error(transparent)]
    Storage(DatabaseError),
}

impl From<DatabaseError> for DispatchError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            DatabaseError::InvalidState(what) => Self::StateConflict(what),
            other => Self::Storage(other),
        }
    }
}

/// An operator's dispatch request, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub store_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub target_all_nodes: bool,
    pub command: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Parse a comma-separated status set, e.g. `PENDING,FAILED`.
pub fn parse_status_set(raw: &str) -> Result<Vec<ActionStatus>, DispatchError> {
    let mut statuses = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let status = ActionStatus::parse(part)
            .ok_or_else(|| DispatchError::UnknownStatus(part.to_string()))?;
        if !statuses.contains(&status) {
            statuses.push(status);
        }
    }
    Ok(statuses)
}

/// Validate the parameters payload for a command kind, returning the JSON
/// object to persist.
///
/// `RESTART_BACKEND` is the one disruptive command that demands an
/// explicit structured payload; everything else defaults to `{}`.
pub fn validate_parameters(
    kind: CommandKind,
    parameters: Option<&Value>,
) -> Result<Value, DispatchError> {
    match parameters {
        Some(value) if !value.is_object() => Err(DispatchError::InvalidParameters(
            "parameters must be a JSON object".into(),
        )),
        Some(value) if kind == CommandKind::RestartBackend => {
            let endpoint = value.get("endpoint").and_then(Value::as_str).unwrap_or("");
            if endpoint.is_empty() {
                return Err(DispatchError::InvalidParameters(
                    "RESTART_BACKEND requires a non-empty \"endpoint\" parameter".into(),
                ));
            }
            Ok(value.clone())
        }
        Some(value) => Ok(value.clone()),
        None if kind == CommandKind::RestartBackend => Err(DispatchError::InvalidParameters(
            "RESTART_BACKEND requires a parameters payload".into(),
        )),
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}

/// Enqueue a remote action for one node or for every node of a store.
///
/// Broadcast membership is resolved against the store's node set at
/// dispatch time; the created row itself stays single (`node_id` null).
pub async fn enqueue(
    db: &ControlDatabase,
    filter: &ScopeFilter,
    request: &DispatchRequest,
) -> Result<RemoteAction, DispatchError> {
    let kind = CommandKind::parse(&request.command)
        .ok_or_else(|| DispatchError::UnknownCommand(request.command.clone()))?;
    let parameters = validate_parameters(kind, request.parameters.as_ref())?;

    // Scope check first: an out-of-scope store reads as absent.
    let store = db.get_store_scoped(&request.store_id, filter).await?;

    let node_id = if request.target_all_nodes {
        if request.node_id.is_some() {
            return Err(DispatchError::InvalidTarget(
                "node_id must be omitted when targeting all nodes".into(),
            ));
        }
        if db.count_store_nodes(&store.id).await? == 0 {
            return Err(DispatchError::InvalidTarget(format!(
                "store {} has no nodes",
                store.id
            )));
        }
        None
    } else {
        let node_id = request.node_id.as_deref().ok_or_else(|| {
            DispatchError::InvalidTarget("either node_id or target_all_nodes is required".into())
        })?;
        let node = db.get_node_scoped(node_id, filter).await?;
        if node.store_id != store.id {
            return Err(DispatchError::InvalidTarget(format!(
                "node {} does not belong to store {}",
                node.id, store.id
            )));
        }
        Some(node.id)
    };

    let id = uuid::Uuid::new_v4().to_string();
    let parameters_json = parameters.to_string();
    let action = db
        .create_action(&NewActionParams {
            id: &id,
            store_id: &store.id,
            node_id: node_id.as_deref(),
            target_all_nodes: request.target_all_nodes,
            command: kind.as_str(),
            parameters: &parameters_json,
            note: request.note.as_deref(),
        })
        .await?;

    info!(
        action_id = %action.id,
        store_id = %action.store_id,
        command = %action.command,
        broadcast = request.target_all_nodes,
        "Remote action enqueued"
    );

    Ok(action)
}

/// Operator retry: FAILED -> PENDING on the same row.
pub async fn retry(
    db: &ControlDatabase,
    filter: &ScopeFilter,
    action_id: &str,
) -> Result<RemoteAction, DispatchError> {
    db.get_action_scoped(action_id, filter).await?;
    Ok(db.retry_action(action_id).await?)
}

/// Operator cancel: PENDING -> CANCELLED, conflict otherwise.
pub async fn cancel(
    db: &ControlDatabase,
    filter: &ScopeFilter,
    action_id: &str,
) -> Result<RemoteAction, DispatchError> {
    db.get_action_scoped(action_id, filter).await?;
    Ok(db.cancel_action(action_id).await?)
}

/// Scope-filtered, paginated action listing.
pub async fn list(
    db: &ControlDatabase,
    filter: &ScopeFilter,
    statuses: &[ActionStatus],
    store_id: Option<String>,
    node_id: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
) -> Result<Vec<RemoteAction>, DispatchError> {
    let query = ActionListQuery {
        statuses: statuses.iter().map(|s| s.as_str().to_string()).collect(),
        store_id,
        node_id,
        limit: limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE),
        offset: offset.unwrap_or(0),
    };
    Ok(db.list_actions(filter, &query).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewNodeParams;
    use crate::storage::NewStoreParams;
    use serde_json::json;

    #[test]
    fn status_set_parses_and_dedupes() {
        let set = parse_status_set("PENDING,FAILED,PENDING").unwrap();
        assert_eq!(set, vec![ActionStatus::Pending, ActionStatus::Failed]);

        assert!(parse_status_set("PENDING,BOGUS").is_err());
        assert!(parse_status_set("").unwrap().is_empty());
    }

    #[test]
    fn restart_backend_requires_endpoint() {
        let err = validate_parameters(CommandKind::RestartBackend, None).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameters(_)));

        let err =
            validate_parameters(CommandKind::RestartBackend, Some(&json!({}))).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameters(_)));

        let ok = validate_parameters(
            CommandKind::RestartBackend,
            Some(&json!({"endpoint": "http://127.0.0.1:9090/restart"})),
        )
        .unwrap();
        assert_eq!(ok["endpoint"], "http://127.0.0.1:9090/restart");
    }

    #[test]
    fn other_commands_default_to_empty_parameters() {
        let ok = validate_parameters(CommandKind::SyncPull, None).unwrap();
        assert_eq!(ok, json!({}));

        let err = validate_parameters(CommandKind::SyncPull, Some(&json!([1, 2]))).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameters(_)));
    }

    async fn seeded_db() -> ControlDatabase {
        let db = ControlDatabase::open_in_memory().await.unwrap();
        db.create_reseller("r1", "North", "NORTH").await.unwrap();
        db.create_tenant("t1", "Burger", "burger", "r1").await.unwrap();
        db.create_store(&NewStoreParams {
            id: "s1",
            tenant_id: "t1",
            name: "Downtown",
            code: "DTN",
            timezone: "UTC",
            edge_base_url: None,
        })
        .await
        .unwrap();
        db.create_node(&NewNodeParams {
            id: "n1",
            store_id: "s1",
            node_key: "nd-AAAAAA",
            label: "edge",
            software_version: None,
            onsite_server_uid: "uid-1",
            onsite_base_url: None,
            token_hash: "digest",
        })
        .await
        .unwrap();
        db
    }

    fn request(command: &str) -> DispatchRequest {
        DispatchRequest {
            store_id: "s1".into(),
            node_id: Some("n1".into()),
            target_all_nodes: false,
            command: command.into(),
            parameters: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn enqueue_targets_one_node() {
        let db = seeded_db().await;
        let action = enqueue(&db, &ScopeFilter::default(), &request("HEARTBEAT_NOW"))
            .await
            .unwrap();
        assert_eq!(action.status, "PENDING");
        assert_eq!(action.node_id.as_deref(), Some("n1"));
        assert_eq!(action.parameters, "{}");
    }

    #[tokio::test]
    async fn enqueue_rejects_unknown_command() {
        let db = seeded_db().await;
        let err = enqueue(&db, &ScopeFilter::default(), &request("MAKE_COFFEE"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownCommand(_)));
    }

    #[tokio::test]
    async fn enqueue_rejects_out_of_scope_store_as_not_found() {
        let db = seeded_db().await;
        let foreign = ScopeFilter {
            reseller_id: Some("r2".into()),
            tenant_id: None,
        };
        let err = enqueue(&db, &foreign, &request("SYNC_PULL")).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn enqueue_rejects_node_from_another_store() {
        let db = seeded_db().await;
        db.create_store(&NewStoreParams {
            id: "s2",
            tenant_id: "t1",
            name: "Uptown",
            code: "UPT",
            timezone: "UTC",
            edge_base_url: None,
        })
        .await
        .unwrap();

        let mut req = request("SYNC_PULL");
        req.store_id = "s2".into();
        let err = enqueue(&db, &ScopeFilter::default(), &req).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn broadcast_requires_nodes_and_no_node_id() {
        let db = seeded_db().await;

        let mut req = request("HEARTBEAT_NOW");
        req.target_all_nodes = true;
        let err = enqueue(&db, &ScopeFilter::default(), &req).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTarget(_)));

        req.node_id = None;
        let action = enqueue(&db, &ScopeFilter::default(), &req).await.unwrap();
        assert_eq!(action.node_id, None);
        assert_eq!(action.target_all_nodes, 1);

        db.create_store(&NewStoreParams {
            id: "s2",
            tenant_id: "t1",
            name: "Uptown",
            code: "UPT",
            timezone: "UTC",
            edge_base_url: None,
        })
        .await
        .unwrap();
        let mut empty = req.clone();
        empty.store_id = "s2".into();
        let err = enqueue(&db, &ScopeFilter::default(), &empty).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn retry_and_cancel_respect_scope_and_state() {
        let db = seeded_db().await;
        let action = enqueue(&db, &ScopeFilter::default(), &request("SYNC_PULL"))
            .await
            .unwrap();

        let foreign = ScopeFilter {
            reseller_id: Some("r2".into()),
            tenant_id: None,
        };
        let err = cancel(&db, &foreign, &action.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        let err = retry(&db, &ScopeFilter::default(), &action.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::StateConflict(_)));

        let cancelled = cancel(&db, &ScopeFilter::default(), &action.id).await.unwrap();
        assert_eq!(cancelled.status, "CANCELLED");
    }
}
