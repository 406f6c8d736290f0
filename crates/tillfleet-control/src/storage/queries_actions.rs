//! Remote action queue queries.
//!
//! Every status transition here is a compare-and-set UPDATE guarded by
//! the current status, so a racing cancel and agent acknowledgment cannot
//! silently overwrite each other: whichever commits first wins and the
//! loser gets `InvalidState`.

use sqlx::Sqlite;

use tillfleet_core::db::{DatabaseError, unix_timestamp};

use super::db::ControlDatabase;
use super::models::RemoteAction;
use crate::scope::ScopeFilter;

/// Parameters for enqueueing a remote action.
pub struct NewActionParams<'a> {
    pub id: &'a str,
    pub store_id: &'a str,
    /// `None` exactly when `target_all_nodes` is true.
    pub node_id: Option<&'a str>,
    pub target_all_nodes: bool,
    pub command: &'a str,
    /// JSON object, already validated for the command kind.
    pub parameters: &'a str,
    pub note: Option<&'a str>,
}

/// Filters for listing actions.
#[derive(Debug, Default)]
pub struct ActionListQuery {
    /// Empty means any status.
    pub statuses: Vec<String>,
    pub store_id: Option<String>,
    pub node_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl ControlDatabase {
    /// Enqueue a remote action in `PENDING`.
    pub async fn create_action(
        &self,
        params: &NewActionParams<'_>,
    ) -> Result<RemoteAction, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO remote_actions (id, store_id, node_id, target_all_nodes, command, parameters, note, status, issued_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', ?, ?)",
        )
        .bind(params.id)
        .bind(params.store_id)
        .bind(params.node_id)
        .bind(i64::from(params.target_all_nodes))
        .bind(params.command)
        .bind(params.parameters)
        .bind(params.note)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_action(params.id).await
    }

    /// Get an action by ID.
    pub async fn get_action(&self, id: &str) -> Result<RemoteAction, DatabaseError> {
        sqlx::query_as::<_, RemoteAction>("SELECT * FROM remote_actions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Action {id}")))
    }

    /// Get an action by ID, restricted to the given scope.
    pub async fn get_action_scoped(
        &self,
        id: &str,
        filter: &ScopeFilter,
    ) -> Result<RemoteAction, DatabaseError> {
        sqlx::query_as::<_, RemoteAction>(
            "SELECT a.* FROM remote_actions a
             JOIN stores s ON s.id = a.store_id
             JOIN tenants t ON t.id = s.tenant_id
             WHERE a.id = ?
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
        .ok_or_else(|| DatabaseError::NotFound(format!("Action {id}")))
    }

    /// List actions matching the scope, an optional status set, and
    /// optional store/node narrowing. Newest first.
    pub async fn list_actions(
        &self,
        filter: &ScopeFilter,
        query: &ActionListQuery,
    ) -> Result<Vec<RemoteAction>, DatabaseError> {
        let mut qb = sqlx::QueryBuilder::<Sqlite>::new(
            "SELECT a.* FROM remote_actions a
             JOIN stores s ON s.id = a.store_id
             JOIN tenants t ON t.id = s.tenant_id
             WHERE 1 = 1",
        );

        if let Some(reseller_id) = &filter.reseller_id {
            qb.push(" AND t.reseller_id = ").push_bind(reseller_id);
        }
        if let Some(tenant_id) = &filter.tenant_id {
            qb.push(" AND s.tenant_id = ").push_bind(tenant_id);
        }
        if let Some(store_id) = &query.store_id {
            qb.push(" AND a.store_id = ").push_bind(store_id);
        }
        if let Some(node_id) = &query.node_id {
            qb.push(" AND a.node_id = ").push_bind(node_id);
        }
        if !query.statuses.is_empty() {
            qb.push(" AND a.status IN (");
            let mut separated = qb.separated(", ");
            for status in &query.statuses {
                separated.push_bind(status);
            }
            separated.push_unseparated(")");
        }

        qb.push(" ORDER BY a.issued_at DESC, a.id ASC LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);

        let actions = qb
            .build_query_as::<RemoteAction>()
            .fetch_all(self.pool())
            .await?;

        Ok(actions)
    }

    /// Pending work for one node: actions addressed to it plus broadcasts
    /// for its store. Oldest first, so agents execute in issue order.
    pub async fn pending_actions_for_node(
        &self,
        node_id: &str,
        store_id: &str,
        limit: u32,
    ) -> Result<Vec<RemoteAction>, DatabaseError> {
        let actions = sqlx::query_as::<_, RemoteAction>(
            "SELECT * FROM remote_actions
             WHERE status = 'PENDING'
               AND (node_id = ? OR (target_all_nodes = 1 AND store_id = ?))
             ORDER BY issued_at ASC, id ASC LIMIT ?",
        )
        .bind(node_id)
        .bind(store_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(actions)
    }

    // =========================================================================
    // Status transitions (one compare-and-set per edge)
    // =========================================================================

    /// PENDING -> ACKED (terminal).
    pub async fn ack_action(&self, id: &str) -> Result<RemoteAction, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE remote_actions
             SET status = 'ACKED', acknowledged_at = ?, log_count = log_count + 1
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, "PENDING").await);
        }

        self.get_action(id).await
    }

    /// PENDING -> FAILED. The agent-reported error is stored verbatim.
    pub async fn fail_action(
        &self,
        id: &str,
        error_code: &str,
        error_detail: Option<&str>,
    ) -> Result<RemoteAction, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE remote_actions
             SET status = 'FAILED', error_code = ?, error_detail = ?, acknowledged_at = ?, log_count = log_count + 1
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(error_code)
        .bind(error_detail)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, "PENDING").await);
        }

        self.get_action(id).await
    }

    /// PENDING -> CANCELLED (terminal). Rejected once the action has left
    /// PENDING, to avoid racing an agent that is already executing it.
    pub async fn cancel_action(&self, id: &str) -> Result<RemoteAction, DatabaseError> {
        let result = sqlx::query(
            "UPDATE remote_actions SET status = 'CANCELLED' WHERE id = ? AND status = 'PENDING'",
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, "PENDING").await);
        }

        self.get_action(id).await
    }

    /// FAILED -> PENDING. Reuses the same row: clears the error fields and
    /// refreshes `issued_at`, but keeps `log_count` history.
    pub async fn retry_action(&self, id: &str) -> Result<RemoteAction, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "UPDATE remote_actions
             SET status = 'PENDING', error_code = NULL, error_detail = NULL, acknowledged_at = NULL, issued_at = ?
             WHERE id = ? AND status = 'FAILED'",
        )
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_conflict(id, "FAILED").await);
        }

        self.get_action(id).await
    }

    /// A guarded update matched no row: either the action is gone, or it
    /// is no longer in the state the transition requires.
    async fn transition_conflict(&self, id: &str, expected: &str) -> DatabaseError {
        match self.get_action(id).await {
            Ok(action) => DatabaseError::InvalidState(format!(
                "action {id} is {}, expected {expected}",
                action.status
            )),
            Err(e) => e,
        }
    }
}
