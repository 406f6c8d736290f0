//! Database queries for accounts and the reseller/tenant/store/node
//! hierarchy. Every list/get here takes the caller's resolved
//! [`ScopeFilter`]; rows outside the scope are indistinguishable from
//! rows that do not exist.

use tillfleet_core::db::{DatabaseError, unix_timestamp};

use super::db::ControlDatabase;
use super::models::{Account, ClaimUse, Node, Reseller, Store, Tenant};
use crate::scope::ScopeFilter;

/// Parameters for creating a store.
pub struct NewStoreParams<'a> {
    pub id: &'a str,
    pub tenant_id: &'a str,
    pub name: &'a str,
    pub code: &'a str,
    pub timezone: &'a str,
    pub edge_base_url: Option<&'a str>,
}

/// Parameters for creating a node.
pub struct NewNodeParams<'a> {
    pub id: &'a str,
    pub store_id: &'a str,
    pub node_key: &'a str,
    pub label: &'a str,
    pub software_version: Option<&'a str>,
    pub onsite_server_uid: &'a str,
    pub onsite_base_url: Option<&'a str>,
    pub token_hash: &'a str,
}

/// Everything a successful claim confirmation needs written in one
/// transaction: the consumed claim id, the store to create or reuse, and
/// the new node.
pub struct ClaimRedemptionParams<'a> {
    pub claim_id: &'a str,
    pub server_uid: &'a str,
    pub tenant_id: &'a str,
    pub store_id: &'a str,
    pub store_name: &'a str,
    pub store_code: &'a str,
    pub timezone: &'a str,
    pub node_id: &'a str,
    pub node_key: &'a str,
    pub node_label: &'a str,
    pub software_version: Option<&'a str>,
    pub onsite_base_url: &'a str,
    pub token_hash: &'a str,
}

impl ControlDatabase {
    // =========================================================================
    // Account queries
    // =========================================================================

    /// Create an operator account.
    pub async fn create_account(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        account_type: &str,
        reseller_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> Result<Account, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO accounts (id, email, password_hash, account_type, reseller_id, tenant_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .bind(account_type)
        .bind(reseller_id)
        .bind(tenant_id)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_account(id).await
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: &str) -> Result<Account, DatabaseError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Account {id}")))
    }

    /// Get an account by email.
    pub async fn get_account_by_email(&self, email: &str) -> Result<Account, DatabaseError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE email = ?")
            .bind(email)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Account with email {email}")))
    }

    // =========================================================================
    // Reseller queries
    // =========================================================================

    /// Create a reseller.
    pub async fn create_reseller(
        &self,
        id: &str,
        name: &str,
        code: &str,
    ) -> Result<Reseller, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query("INSERT INTO resellers (id, name, code, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(code)
            .bind(now)
            .execute(self.pool())
            .await?;

        sqlx::query_as::<_, Reseller>("SELECT * FROM resellers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Reseller {id}")))
    }

    /// List resellers visible to the given scope.
    pub async fn list_resellers(
        &self,
        filter: &ScopeFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Reseller>, DatabaseError> {
        let resellers = sqlx::query_as::<_, Reseller>(
            "SELECT * FROM resellers
             WHERE (? IS NULL OR id = ?)
               AND (? IS NULL OR id IN (SELECT reseller_id FROM tenants WHERE id = ?))
             ORDER BY name ASC LIMIT ? OFFSET ?",
        )
        .bind(filter.reseller_id.as_deref())
        .bind(filter.reseller_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(resellers)
    }

    // =========================================================================
    // Tenant queries
    // =========================================================================

    /// Create a tenant under a reseller.
    pub async fn create_tenant(
        &self,
        id: &str,
        name: &str,
        slug: &str,
        reseller_id: &str,
    ) -> Result<Tenant, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO tenants (id, name, slug, reseller_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(slug)
        .bind(reseller_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_tenant_scoped(id, &ScopeFilter::default()).await
    }

    /// Get a tenant by ID, restricted to the given scope.
    pub async fn get_tenant_scoped(
        &self,
        id: &str,
        filter: &ScopeFilter,
    ) -> Result<Tenant, DatabaseError> {
        sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants
             WHERE id = ?
               AND (? IS NULL OR reseller_id = ?)
               AND (? IS NULL OR id = ?)",
        )
        .bind(id)
        .bind(filter.reseller_id.as_deref())
        .bind(filter.reseller_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Tenant {id}")))
    }

    /// List tenants visible to the given scope.
    pub async fn list_tenants(
        &self,
        filter: &ScopeFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Tenant>, DatabaseError> {
        let tenants = sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants
             WHERE (? IS NULL OR reseller_id = ?)
               AND (? IS NULL OR id = ?)
             ORDER BY name ASC LIMIT ? OFFSET ?",
        )
        .bind(filter.reseller_id.as_deref())
        .bind(filter.reseller_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(tenants)
    }

    // =========================================================================
    // Store queries
    // =========================================================================

    /// Create a store.
    pub async fn create_store(&self, params: &NewStoreParams<'_>) -> Result<Store, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO stores (id, tenant_id, name, code, timezone, edge_base_url, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.tenant_id)
        .bind(params.name)
        .bind(params.code)
        .bind(params.timezone)
        .bind(params.edge_base_url)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_store_scoped(params.id, &ScopeFilter::default())
            .await
    }

    /// Get a store by ID, restricted to the given scope.
    pub async fn get_store_scoped(
        &self,
        id: &str,
        filter: &ScopeFilter,
    ) -> Result<Store, DatabaseError> {
        sqlx::query_as::<_, Store>(
            "SELECT s.* FROM stores s
             JOIN tenants t ON t.id = s.tenant_id
             WHERE s.id = ?
               AND (? IS NULL OR t.reseller_id = ?)
               AND (? IS NULL OR s.tenant_id = ?)",
        )
        .bind(id)
        .bind(filter.reseller_id.as_deref())
        .bind(filter.reseller_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Store {id}")))
    }

    /// List stores visible to the given scope, optionally narrowed to one
    /// tenant.
    pub async fn list_stores(
        &self,
        filter: &ScopeFilter,
        tenant_id: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Store>, DatabaseError> {
        let stores = sqlx::query_as::<_, Store>(
            "SELECT s.* FROM stores s
             JOIN tenants t ON t.id = s.tenant_id
             WHERE (? IS NULL OR t.reseller_id = ?)
               AND (? IS NULL OR s.tenant_id = ?)
               AND (? IS NULL OR s.tenant_id = ?)
             ORDER BY s.name ASC LIMIT ? OFFSET ?",
        )
        .bind(filter.reseller_id.as_deref())
        .bind(filter.reseller_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(tenant_id)
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(stores)
    }

    /// Find a store in a tenant by its short code.
    pub async fn find_store_by_code(
        &self,
        tenant_id: &str,
        code: &str,
    ) -> Result<Option<Store>, DatabaseError> {
        let store =
            sqlx::query_as::<_, Store>("SELECT * FROM stores WHERE tenant_id = ? AND code = ?")
                .bind(tenant_id)
                .bind(code)
                .fetch_optional(self.pool())
                .await?;

        Ok(store)
    }

    // =========================================================================
    // Node queries
    // =========================================================================

    /// Create a node linked to a store.
    pub async fn create_node(&self, params: &NewNodeParams<'_>) -> Result<Node, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO nodes (id, store_id, node_key, label, software_version, onsite_server_uid, onsite_base_url, token_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.id)
        .bind(params.store_id)
        .bind(params.node_key)
        .bind(params.label)
        .bind(params.software_version)
        .bind(params.onsite_server_uid)
        .bind(params.onsite_base_url)
        .bind(params.token_hash)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_node(params.id).await
    }

    /// Get a node by ID.
    pub async fn get_node(&self, id: &str) -> Result<Node, DatabaseError> {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Node {id}")))
    }

    /// Get a node by ID, restricted to the given scope.
    pub async fn get_node_scoped(
        &self,
        id: &str,
        filter: &ScopeFilter,
    ) -> Result<Node, DatabaseError> {
        sqlx::query_as::<_, Node>(
            "SELECT n.* FROM nodes n
             JOIN stores s ON s.id = n.store_id
             JOIN tenants t ON t.id = s.tenant_id
             WHERE n.id = ?
               AND (? IS NULL OR t.reseller_id = ?)
               AND (? IS NULL OR s.tenant_id = ?)",
        )
        .bind(id)
        .bind(filter.reseller_id.as_deref())
        .bind(filter.reseller_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Node {id}")))
    }

    /// Get a node by its stable human-legible key (agent authentication).
    pub async fn get_node_by_key(&self, node_key: &str) -> Result<Node, DatabaseError> {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE node_key = ?")
            .bind(node_key)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Node with key {node_key}")))
    }

    /// List nodes visible to the given scope, optionally narrowed to one
    /// store.
    pub async fn list_nodes(
        &self,
        filter: &ScopeFilter,
        store_id: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Node>, DatabaseError> {
        let nodes = sqlx::query_as::<_, Node>(
            "SELECT n.* FROM nodes n
             JOIN stores s ON s.id = n.store_id
             JOIN tenants t ON t.id = s.tenant_id
             WHERE (? IS NULL OR t.reseller_id = ?)
               AND (? IS NULL OR s.tenant_id = ?)
               AND (? IS NULL OR n.store_id = ?)
             ORDER BY n.label ASC LIMIT ? OFFSET ?",
        )
        .bind(filter.reseller_id.as_deref())
        .bind(filter.reseller_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(filter.tenant_id.as_deref())
        .bind(store_id)
        .bind(store_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(nodes)
    }

    /// Count nodes in a store.
    pub async fn count_store_nodes(&self, store_id: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nodes WHERE store_id = ?")
            .bind(store_id)
            .fetch_one(self.pool())
            .await?;

        Ok(row.0)
    }

    /// Record a heartbeat. Last write wins; the optional fields only
    /// overwrite when the agent reported them.
    pub async fn record_heartbeat(
        &self,
        node_id: &str,
        software_version: Option<&str>,
        onsite_base_url: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "UPDATE nodes SET last_heartbeat_at = ?,
                 software_version = COALESCE(?, software_version),
                 onsite_base_url = COALESCE(?, onsite_base_url),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(software_version)
        .bind(onsite_base_url)
        .bind(now)
        .bind(node_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Swap the node's credential digest and bump the version in one
    /// update, so the old credential is invalid the moment this returns.
    pub async fn rotate_node_credential(
        &self,
        node_id: &str,
        new_token_hash: &str,
    ) -> Result<Node, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE nodes SET token_hash = ?, credential_version = credential_version + 1, updated_at = ? WHERE id = ?",
        )
        .bind(new_token_hash)
        .bind(now)
        .bind(node_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Node {node_id}")));
        }

        self.get_node(node_id).await
    }

    /// Detach a node. Its action history stays behind with a null node id.
    pub async fn delete_node(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Claim redemption
    // =========================================================================

    /// Look up whether a claim id has already been redeemed.
    pub async fn get_claim_use(&self, claim_id: &str) -> Result<Option<ClaimUse>, DatabaseError> {
        let claim = sqlx::query_as::<_, ClaimUse>("SELECT * FROM claim_uses WHERE claim_id = ?")
            .bind(claim_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(claim)
    }

    /// Atomically record a confirmed claim: consume the claim id, create
    /// or reuse the store (keyed by tenant + code), and create the node.
    ///
    /// A second call with the same claim id fails with `InvalidState` and
    /// writes nothing.
    pub async fn record_claim_redemption(
        &self,
        params: &ClaimRedemptionParams<'_>,
    ) -> Result<(Store, Node), DatabaseError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        let used: Option<(String,)> =
            sqlx::query_as("SELECT claim_id FROM claim_uses WHERE claim_id = ?")
                .bind(params.claim_id)
                .fetch_optional(&mut *tx)
                .await?;
        if used.is_some() {
            return Err(DatabaseError::InvalidState(format!(
                "claim {} already redeemed",
                params.claim_id
            )));
        }

        let existing: Option<Store> =
            sqlx::query_as("SELECT * FROM stores WHERE tenant_id = ? AND code = ?")
                .bind(params.tenant_id)
                .bind(params.store_code)
                .fetch_optional(&mut *tx)
                .await?;

        let store_id = match &existing {
            Some(store) => {
                sqlx::query("UPDATE stores SET edge_base_url = ?, updated_at = ? WHERE id = ?")
                    .bind(params.onsite_base_url)
                    .bind(now)
                    .bind(&store.id)
                    .execute(&mut *tx)
                    .await?;
                store.id.clone()
            }
            None => {
                sqlx::query(
                    "INSERT INTO stores (id, tenant_id, name, code, timezone, edge_base_url, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(params.store_id)
                .bind(params.tenant_id)
                .bind(params.store_name)
                .bind(params.store_code)
                .bind(params.timezone)
                .bind(params.onsite_base_url)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                params.store_id.to_string()
            }
        };

        sqlx::query(
            "INSERT INTO nodes (id, store_id, node_key, label, software_version, onsite_server_uid, onsite_base_url, token_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.node_id)
        .bind(&store_id)
        .bind(params.node_key)
        .bind(params.node_label)
        .bind(params.software_version)
        .bind(params.server_uid)
        .bind(params.onsite_base_url)
        .bind(params.token_hash)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO claim_uses (claim_id, server_uid, node_id, used_at) VALUES (?, ?, ?, ?)",
        )
        .bind(params.claim_id)
        .bind(params.server_uid)
        .bind(params.node_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let store = self.get_store_scoped(&store_id, &ScopeFilter::default()).await?;
        let node = self.get_node(params.node_id).await?;
        Ok((store, node))
    }
}
