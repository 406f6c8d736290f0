//! Impersonation link issuance.
//!
//! Lets an authorized operator open a store's own local management
//! surface already authenticated as that store's administrator. Target
//! resolution is a pure function of stored state; no network access.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use tillfleet_core::db::DatabaseError;

use crate::auth::JwtManager;
use crate::scope::ScopeFilter;
use crate::storage::{ControlDatabase, Node, Store};

#[derive(Debug, Error)]
pub enum ImpersonationError {
    /// Out-of-scope or missing store; indistinguishable on purpose.
    #[error("not found: {0}")]
    NotFound(String),

    /// Neither the store's nodes nor the store itself have a recorded
    /// onsite address.
    #[error("store {0} has no recorded onsite address")]
    NoAddress(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Storage(DatabaseError),
}

impl From<DatabaseError> for ImpersonationError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}

/// A minted impersonation link. Meant to be opened immediately, not
/// stored.
#[derive(Debug, Serialize)]
pub struct ImpersonationLink {
    pub url: String,
    pub target_base_url: String,
    pub expires_in_secs: i64,
}

/// Pick the address to open: the freshest node address wins, the store's
/// last-known edge address is the fallback.
pub fn resolve_target_base_url(store: &Store, nodes: &[Node]) -> Option<String> {
    nodes
        .iter()
        .filter(|n| n.onsite_base_url.is_some())
        .max_by_key(|n| n.last_heartbeat_at.unwrap_or(0))
        .and_then(|n| n.onsite_base_url.clone())
        .or_else(|| store.edge_base_url.clone())
}

/// Issue an impersonation link for a store inside the operator's scope.
pub async fn issue_link(
    db: &ControlDatabase,
    jwt: &JwtManager,
    filter: &ScopeFilter,
    operator_id: &str,
    store_id: &str,
) -> Result<ImpersonationLink, ImpersonationError> {
    let store = db.get_store_scoped(store_id, filter).await?;
    let nodes = db.list_nodes(filter, Some(store.id.as_str()), 100, 0).await?;

    let target_base_url = resolve_target_base_url(&store, &nodes)
        .ok_or_else(|| ImpersonationError::NoAddress(store.id.clone()))?;

    let (token, expires_in_secs) = jwt
        .issue_impersonation_token(operator_id, &store.id)
        .map_err(|e| ImpersonationError::Signing(e.to_string()))?;

    let url = format!(
        "{}/admin/sso?token={token}",
        target_base_url.trim_end_matches('/')
    );

    info!(store_id = %store.id, operator_id, "Impersonation link issued");

    Ok(ImpersonationLink {
        url,
        target_base_url,
        expires_in_secs,
    })
}
