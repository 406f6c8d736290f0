//! Data models for control plane storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub account_type: String,
    pub reseller_id: Option<String>,
    pub tenant_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reseller {
    pub id: String,
    pub name: String,
    pub code: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub reseller_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Store {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub code: String,
    pub status: String,
    pub timezone: String,
    pub edge_base_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Node {
    pub id: String,
    pub store_id: String,
    pub node_key: String,
    pub label: String,
    pub software_version: Option<String>,
    pub onsite_server_uid: Option<String>,
    pub onsite_base_url: Option<String>,
    pub last_heartbeat_at: Option<i64>,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub credential_version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A redeemed claim id. The claim itself lives onsite; this row is the
/// cloud-side single-use guarantee.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClaimUse {
    pub claim_id: String,
    pub server_uid: String,
    pub node_id: Option<String>,
    pub used_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RemoteAction {
    pub id: String,
    pub store_id: String,
    pub node_id: Option<String>,
    pub target_all_nodes: i64,
    pub command: String,
    pub parameters: String,
    pub note: Option<String>,
    pub status: String,
    pub issued_at: i64,
    pub acknowledged_at: Option<i64>,
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
    pub log_count: i64,
    pub created_at: i64,
}
