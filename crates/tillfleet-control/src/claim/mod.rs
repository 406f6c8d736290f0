//! Claim redemption: pairing an onsite server with a cloud store/node.
//!
//! The flow crosses a network boundary mid-way (confirm with the onsite
//! server, then create records), so it is a compensating workflow rather
//! than a two-phase commit: record creation is atomic, and the trailing
//! finalize push is best-effort and never rolls anything back.

mod onsite;

use std::sync::Arc;

use rand::RngExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use tillfleet_core::db::DatabaseError;

pub use onsite::{ConfirmOutcome, FinalizePayload, HttpOnsiteClient, OnsiteClient, OnsiteError};

use crate::auth::node_token;
use crate::scope::ScopeFilter;
use crate::storage::{ClaimRedemptionParams, ControlDatabase, Node, Store};

#[derive(Debug, Error)]
pub enum ClaimError {
    /// Out-of-scope tenant or missing record; indistinguishable on purpose.
    #[error("not found: {0}")]
    NotFound(String),

    /// The claim id was redeemed before, regardless of elapsed time.
    #[error("claim {0} was already used")]
    AlreadyUsed(String),

    /// Onsite-reported verdicts and transport failures.
    #[error(transparent)]
    Onsite(OnsiteError),

    #[error(transparent)]
    Storage(DatabaseError),
}

impl From<DatabaseError> for ClaimError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other),
        }
    }
}

/// Operator request to redeem a claim produced by an onsite server.
#[derive(Debug, Clone, Deserialize)]
pub struct RedeemRequest {
    pub onsite_base_url: String,
    pub claim_id: String,
    pub claim_code: String,
    pub tenant_id: String,
    /// Operator overrides; onsite hints fill the gaps.
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub store_code: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub node_label: Option<String>,
}

/// Result of a successful redemption. `node_token` is the plaintext
/// credential, visible here and never again. `finalize_error` is the
/// non-fatal tail-end warning: the store/node exist even when it is set.
#[derive(Debug, Serialize)]
pub struct RedeemOutcome {
    pub store: Store,
    pub node: Node,
    pub node_token: String,
    pub server_uid: String,
    pub finalize_error: Option<String>,
}

/// Orchestrates claim redemption against storage and the onsite server.
pub struct ClaimService {
    db: ControlDatabase,
    onsite: Arc<dyn OnsiteClient>,
}

impl ClaimService {
    pub fn new(db: ControlDatabase, onsite: Arc<dyn OnsiteClient>) -> Self {
        Self { db, onsite }
    }

    /// Redeem a claim on behalf of an operator whose scope has already
    /// been resolved.
    pub async fn redeem(
        &self,
        filter: &ScopeFilter,
        request: &RedeemRequest,
    ) -> Result<RedeemOutcome, ClaimError> {
        // Scope gate before anything touches the network.
        self.db.get_tenant_scoped(&request.tenant_id, filter).await?;

        if self.db.get_claim_use(&request.claim_id).await?.is_some() {
            return Err(ClaimError::AlreadyUsed(request.claim_id.clone()));
        }

        let confirm = self
            .onsite
            .confirm(
                &request.onsite_base_url,
                &request.claim_id,
                &request.claim_code,
            )
            .await
            .map_err(|e| match e {
                OnsiteError::AlreadyUsed => ClaimError::AlreadyUsed(request.claim_id.clone()),
                other => ClaimError::Onsite(other),
            })?;

        let store_name = request
            .store_name
            .clone()
            .or_else(|| confirm.store_name_hint.clone())
            .unwrap_or_else(|| "Unnamed store".to_string());
        let store_code = request
            .store_code
            .clone()
            .or_else(|| confirm.store_code_hint.clone())
            .unwrap_or_else(generate_store_code);
        let timezone = request
            .timezone
            .clone()
            .or_else(|| confirm.timezone_hint.clone())
            .unwrap_or_else(|| "UTC".to_string());
        let node_label = request
            .node_label
            .clone()
            .unwrap_or_else(|| "Onsite server".to_string());

        let node_token = node_token::generate_token();
        let token_hash = node_token::hash_token(&node_token);
        let node_key = node_token::generate_node_key();
        let store_id = uuid::Uuid::new_v4().to_string();
        let node_id = uuid::Uuid::new_v4().to_string();

        let (store, node) = self
            .db
            .record_claim_redemption(&ClaimRedemptionParams {
                claim_id: &request.claim_id,
                server_uid: &confirm.server_uid,
                tenant_id: &request.tenant_id,
                store_id: &store_id,
                store_name: &store_name,
                store_code: &store_code,
                timezone: &timezone,
                node_id: &node_id,
                node_key: &node_key,
                node_label: &node_label,
                software_version: confirm.software_version.as_deref(),
                onsite_base_url: &request.onsite_base_url,
                token_hash: &token_hash,
            })
            .await
            .map_err(|e| match e {
                DatabaseError::InvalidState(_) => ClaimError::AlreadyUsed(request.claim_id.clone()),
                other => ClaimError::Storage(other),
            })?;

        info!(
            claim_id = %request.claim_id,
            store_id = %store.id,
            node_id = %node.id,
            node_key = %node.node_key,
            "Claim redeemed"
        );

        // Push the linkage back so the onsite server durably remembers its
        // cloud identity. Failure here is reported, not fatal.
        let finalize_error = match self
            .onsite
            .finalize(
                &request.onsite_base_url,
                &FinalizePayload {
                    claim_id: request.claim_id.clone(),
                    node_key: node.node_key.clone(),
                    store_code: store.code.clone(),
                    store_name: store.name.clone(),
                },
            )
            .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!(claim_id = %request.claim_id, error = %e, "Claim finalize push failed");
                Some(e.to_string())
            }
        };

        Ok(RedeemOutcome {
            store,
            node,
            node_token,
            server_uid: confirm.server_uid,
            finalize_error,
        })
    }
}

/// Fallback store code when neither the operator nor the onsite server
/// supplied one.
fn generate_store_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("ST-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewStoreParams;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted onsite server for redemption tests.
    struct FakeOnsite {
        confirm_result: Mutex<Option<Result<ConfirmOutcome, OnsiteError>>>,
        finalize_result: Mutex<Option<Result<(), OnsiteError>>>,
        finalize_calls: Mutex<Vec<FinalizePayload>>,
    }

    impl FakeOnsite {
        fn confirming(outcome: ConfirmOutcome) -> Self {
            Self {
                confirm_result: Mutex::new(Some(Ok(outcome))),
                finalize_result: Mutex::new(Some(Ok(()))),
                finalize_calls: Mutex::new(Vec::new()),
            }
        }

        fn refusing(error: OnsiteError) -> Self {
            Self {
                confirm_result: Mutex::new(Some(Err(error))),
                finalize_result: Mutex::new(Some(Ok(()))),
                finalize_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OnsiteClient for FakeOnsite {
        async fn confirm(
            &self,
            _base_url: &str,
            _claim_id: &str,
            _claim_code: &str,
        ) -> Result<ConfirmOutcome, OnsiteError> {
            self.confirm_result.lock().unwrap().take().unwrap()
        }

        async fn finalize(
            &self,
            _base_url: &str,
            payload: &FinalizePayload,
        ) -> Result<(), OnsiteError> {
            self.finalize_calls.lock().unwrap().push(payload.clone());
            self.finalize_result.lock().unwrap().take().unwrap()
        }
    }

    async fn seeded_db() -> ControlDatabase {
        let db = ControlDatabase::open_in_memory().await.unwrap();
        db.create_reseller("r1", "North", "NORTH").await.unwrap();
        db.create_tenant("t1", "Burger", "burger", "r1").await.unwrap();
        db
    }

    fn confirm_outcome() -> ConfirmOutcome {
        ConfirmOutcome {
            server_uid: "srv-9f2".into(),
            store_name_hint: Some("Harborside".into()),
            store_code_hint: Some("HBR".into()),
            timezone_hint: Some("Europe/Amsterdam".into()),
            software_version: Some("2.4.0".into()),
        }
    }

    fn redeem_request() -> RedeemRequest {
        RedeemRequest {
            onsite_base_url: "https://harborside.example:8443".into(),
            claim_id: "c1".into(),
            claim_code: "KQ7F2M".into(),
            tenant_id: "t1".into(),
            store_name: None,
            store_code: None,
            timezone: None,
            node_label: Some("kitchen edge".into()),
        }
    }

    #[tokio::test]
    async fn redeem_creates_store_node_and_returns_token_once() {
        let db = seeded_db().await;
        let onsite = Arc::new(FakeOnsite::confirming(confirm_outcome()));
        let service = ClaimService::new(db.clone(), onsite.clone());

        let outcome = service
            .redeem(&ScopeFilter::default(), &redeem_request())
            .await
            .unwrap();

        assert_eq!(outcome.store.name, "Harborside");
        assert_eq!(outcome.store.code, "HBR");
        assert_eq!(outcome.store.timezone, "Europe/Amsterdam");
        assert_eq!(outcome.node.label, "kitchen edge");
        assert_eq!(outcome.server_uid, "srv-9f2");
        assert_eq!(outcome.finalize_error, None);

        // Only the digest of the returned token is stored.
        let node = db.get_node(&outcome.node.id).await.unwrap();
        assert_ne!(node.token_hash, outcome.node_token);
        assert!(node_token::verify_token(&outcome.node_token, &node.token_hash));

        // Finalize carried the linkage.
        let calls = onsite.finalize_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].node_key, outcome.node.node_key);
    }

    #[tokio::test]
    async fn operator_overrides_beat_onsite_hints() {
        let db = seeded_db().await;
        let service = ClaimService::new(
            db.clone(),
            Arc::new(FakeOnsite::confirming(confirm_outcome())),
        );

        let mut request = redeem_request();
        request.store_name = Some("Harborside II".into());
        request.store_code = Some("HBR2".into());
        let outcome = service.redeem(&ScopeFilter::default(), &request).await.unwrap();

        assert_eq!(outcome.store.name, "Harborside II");
        assert_eq!(outcome.store.code, "HBR2");
    }

    #[tokio::test]
    async fn expired_claim_creates_nothing() {
        let db = seeded_db().await;
        let service =
            ClaimService::new(db.clone(), Arc::new(FakeOnsite::refusing(OnsiteError::Expired)));

        let err = service
            .redeem(&ScopeFilter::default(), &redeem_request())
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::Onsite(OnsiteError::Expired)));

        let stores = db
            .list_stores(&ScopeFilter::default(), Some("t1"), 100, 0)
            .await
            .unwrap();
        assert!(stores.is_empty());
        assert!(db.get_claim_use("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_redemption_fails_already_used() {
        let db = seeded_db().await;
        let service = ClaimService::new(
            db.clone(),
            Arc::new(FakeOnsite::confirming(confirm_outcome())),
        );
        service
            .redeem(&ScopeFilter::default(), &redeem_request())
            .await
            .unwrap();

        // A fresh service with a fresh scripted confirm: the cloud-side
        // used record alone must reject the second attempt.
        let service = ClaimService::new(
            db.clone(),
            Arc::new(FakeOnsite::confirming(confirm_outcome())),
        );
        let err = service
            .redeem(&ScopeFilter::default(), &redeem_request())
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyUsed(_)));
    }

    #[tokio::test]
    async fn out_of_scope_tenant_reads_as_not_found() {
        let db = seeded_db().await;
        let service = ClaimService::new(
            db.clone(),
            Arc::new(FakeOnsite::confirming(confirm_outcome())),
        );

        let foreign = ScopeFilter {
            reseller_id: Some("r2".into()),
            tenant_id: None,
        };
        let err = service.redeem(&foreign, &redeem_request()).await.unwrap_err();
        assert!(matches!(err, ClaimError::NotFound(_)));
    }

    #[tokio::test]
    async fn unreachable_onsite_is_a_distinct_error() {
        let db = seeded_db().await;
        let service = ClaimService::new(
            db.clone(),
            Arc::new(FakeOnsite::refusing(OnsiteError::Unreachable {
                url: "https://harborside.example:8443/pairing/confirm".into(),
                reason: "connection refused".into(),
            })),
        );

        let err = service
            .redeem(&ScopeFilter::default(), &redeem_request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClaimError::Onsite(OnsiteError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn finalize_failure_is_non_fatal() {
        let db = seeded_db().await;
        let onsite = FakeOnsite::confirming(confirm_outcome());
        *onsite.finalize_result.lock().unwrap() = Some(Err(OnsiteError::Unreachable {
            url: "https://harborside.example:8443/pairing/finalize".into(),
            reason: "timed out".into(),
        }));
        let service = ClaimService::new(db.clone(), Arc::new(onsite));

        let outcome = service
            .redeem(&ScopeFilter::default(), &redeem_request())
            .await
            .unwrap();

        assert!(outcome.finalize_error.is_some());
        // The created records survived the finalize failure.
        assert!(db.get_node(&outcome.node.id).await.is_ok());
        assert!(db.get_claim_use("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn redemption_reuses_existing_store_by_code() {
        let db = seeded_db().await;
        db.create_store(&NewStoreParams {
            id: "s1",
            tenant_id: "t1",
            name: "Harborside",
            code: "HBR",
            timezone: "Europe/Amsterdam",
            edge_base_url: None,
        })
        .await
        .unwrap();

        let service = ClaimService::new(
            db.clone(),
            Arc::new(FakeOnsite::confirming(confirm_outcome())),
        );
        let outcome = service
            .redeem(&ScopeFilter::default(), &redeem_request())
            .await
            .unwrap();

        assert_eq!(outcome.store.id, "s1");
        assert_eq!(outcome.node.store_id, "s1");
    }
}
