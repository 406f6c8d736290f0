//! Onsite claim issuance and confirmation.
//!
//! The POS server generates its own identity (`server_uid`), a claim id,
//! and a short human-readable code. The cloud later presents both for
//! confirmation; confirmation is idempotent so the cloud may retry on
//! timeout without re-triggering side effects. Only finalize consumes
//! the claim.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use rand::RngExt;
use tillfleet_core::db::unix_timestamp;

// Code alphabet without 0/O/1/I; the code is typed by a human.
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("no claim with id {0}")]
    UnknownClaim(String),

    #[error("claim has expired")]
    Expired,

    #[error("claim code does not match")]
    CodeMismatch,

    #[error("claim was already used")]
    AlreadyUsed,

    #[error("state file error: {0}")]
    State(String),
}

/// What `create_claim` hands to the operator: the long id is pasted, the
/// short code is typed.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimPackage {
    pub claim_id: String,
    pub claim_code: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// What a successful confirm reports back to the cloud.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmInfo {
    pub server_uid: String,
    pub store_name_hint: Option<String>,
    pub store_code_hint: Option<String>,
    pub timezone_hint: Option<String>,
    pub software_version: Option<String>,
}

/// The linkage the cloud pushes back after redemption.
#[derive(Debug, Clone, Deserialize)]
pub struct FinalizeRequest {
    pub claim_id: String,
    pub node_key: String,
    pub store_code: String,
    pub store_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActiveClaim {
    id: String,
    code: String,
    label: Option<String>,
    issued_at: i64,
    expires_at: i64,
    used_at: Option<i64>,
}

/// The durable cloud identity of this server after pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudIdentity {
    pub node_key: String,
    pub store_code: String,
    pub store_name: String,
    pub linked_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PairingState {
    server_uid: String,
    claim: Option<ActiveClaim>,
    cloud: Option<CloudIdentity>,
}

/// Locally-held hints the onsite server reports during confirmation.
#[derive(Debug, Clone, Default)]
pub struct StoreHints {
    pub store_name: Option<String>,
    pub store_code: Option<String>,
    pub timezone: Option<String>,
}

/// Manages the single active claim and the persisted pairing state.
pub struct PairingManager {
    state: Mutex<PairingState>,
    state_path: Option<PathBuf>,
    claim_ttl_secs: i64,
    hints: StoreHints,
    software_version: String,
}

impl PairingManager {
    /// Load pairing state from `state_path` (or start fresh with a new
    /// `server_uid` if there is none).
    pub fn open(
        state_path: Option<PathBuf>,
        claim_ttl_secs: i64,
        hints: StoreHints,
        software_version: &str,
    ) -> Result<Self, PairingError> {
        let state = match &state_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| PairingError::State(e.to_string()))?;
                serde_json::from_str(&raw).map_err(|e| PairingError::State(e.to_string()))?
            }
            _ => PairingState {
                server_uid: format!("srv-{}", uuid::Uuid::new_v4()),
                claim: None,
                cloud: None,
            },
        };

        info!(server_uid = %state.server_uid, paired = state.cloud.is_some(), "Pairing state loaded");

        let manager = Self {
            state: Mutex::new(state),
            state_path,
            claim_ttl_secs,
            hints,
            software_version: software_version.to_string(),
        };
        manager.save()?;
        Ok(manager)
    }

    /// This server's self-generated identity.
    pub fn server_uid(&self) -> String {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).server_uid.clone()
    }

    /// The cloud identity, once paired.
    pub fn cloud_identity(&self) -> Option<CloudIdentity> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .cloud
            .clone()
    }

    /// Issue a fresh claim. Any previous active claim is invalidated: at
    /// most one claim per server is redeemable at a time.
    pub fn create_claim(&self, label: Option<String>) -> Result<ClaimPackage, PairingError> {
        let now = unix_timestamp();
        let claim = ActiveClaim {
            id: uuid::Uuid::new_v4().to_string(),
            code: generate_code(),
            label,
            issued_at: now,
            expires_at: now + self.claim_ttl_secs,
            used_at: None,
        };

        let package = ClaimPackage {
            claim_id: claim.id.clone(),
            claim_code: claim.code.clone(),
            issued_at: claim.issued_at,
            expires_at: claim.expires_at,
        };

        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(previous) = &state.claim {
                info!(previous_claim = %previous.id, "Replacing active claim");
            }
            state.claim = Some(claim);
        }
        self.save()?;

        info!(claim_id = %package.claim_id, expires_at = package.expires_at, "Claim issued");
        Ok(package)
    }

    /// Verify a presented claim id and code. Idempotent: repeated calls
    /// with the same inputs return the same answer and change nothing.
    pub fn confirm(&self, claim_id: &str, claim_code: &str) -> Result<ConfirmInfo, PairingError> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let claim = state
            .claim
            .as_ref()
            .filter(|c| c.id == claim_id)
            .ok_or_else(|| PairingError::UnknownClaim(claim_id.to_string()))?;

        if claim.used_at.is_some() {
            return Err(PairingError::AlreadyUsed);
        }
        if unix_timestamp() > claim.expires_at {
            return Err(PairingError::Expired);
        }
        if claim.code != claim_code {
            warn!(claim_id, "Claim code mismatch");
            return Err(PairingError::CodeMismatch);
        }

        Ok(ConfirmInfo {
            server_uid: state.server_uid.clone(),
            store_name_hint: self.hints.store_name.clone(),
            store_code_hint: self.hints.store_code.clone(),
            timezone_hint: self.hints.timezone.clone(),
            software_version: Some(self.software_version.clone()),
        })
    }

    /// Consume the claim and durably remember the cloud identity.
    /// Idempotent for the same node key, so the cloud may retry.
    pub fn finalize(&self, request: &FinalizeRequest) -> Result<CloudIdentity, PairingError> {
        let identity = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);

            let claim = state
                .claim
                .as_ref()
                .filter(|c| c.id == request.claim_id)
                .ok_or_else(|| PairingError::UnknownClaim(request.claim_id.clone()))?;

            if claim.used_at.is_some() {
                // Retried finalize for the same linkage is fine.
                match &state.cloud {
                    Some(cloud) if cloud.node_key == request.node_key => return Ok(cloud.clone()),
                    _ => return Err(PairingError::AlreadyUsed),
                }
            }

            let now = unix_timestamp();
            if let Some(claim) = state.claim.as_mut() {
                claim.used_at = Some(now);
            }
            let identity = CloudIdentity {
                node_key: request.node_key.clone(),
                store_code: request.store_code.clone(),
                store_name: request.store_name.clone(),
                linked_at: now,
            };
            state.cloud = Some(identity.clone());
            identity
        };
        self.save()?;

        info!(node_key = %identity.node_key, store_code = %identity.store_code, "Pairing finalized");
        Ok(identity)
    }

    /// Persist state to disk via a temp-file rename, if a path is set.
    fn save(&self) -> Result<(), PairingError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };

        let snapshot = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        let raw = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| PairingError::State(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PairingError::State(e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, raw).map_err(|e| PairingError::State(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| PairingError::State(e.to_string()))?;
        Ok(())
    }
}

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CODE_CHARSET.len());
            CODE_CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn manager() -> PairingManager {
        PairingManager::open(None, 600, StoreHints::default(), "2.4.0").unwrap()
    }

    fn finalize_request(claim_id: &str) -> FinalizeRequest {
        FinalizeRequest {
            claim_id: claim_id.into(),
            node_key: "nd-TEST01".into(),
            store_code: "DTN".into(),
            store_name: "Downtown".into(),
        }
    }

    #[test]
    fn confirm_accepts_the_issued_code() {
        let manager = manager();
        let package = manager.create_claim(Some("front counter".into())).unwrap();

        let info = manager.confirm(&package.claim_id, &package.claim_code).unwrap();
        assert_eq!(info.server_uid, manager.server_uid());
        assert_eq!(info.software_version.as_deref(), Some("2.4.0"));

        // Idempotent: asking again changes nothing.
        assert!(manager.confirm(&package.claim_id, &package.claim_code).is_ok());
    }

    #[test]
    fn confirm_rejects_wrong_code_and_unknown_id() {
        let manager = manager();
        let package = manager.create_claim(None).unwrap();

        assert!(matches!(
            manager.confirm(&package.claim_id, "WRONG1"),
            Err(PairingError::CodeMismatch)
        ));
        assert!(matches!(
            manager.confirm("bogus-id", &package.claim_code),
            Err(PairingError::UnknownClaim(_))
        ));
    }

    #[test]
    fn expired_claim_is_rejected() {
        let manager = PairingManager::open(None, -1, StoreHints::default(), "2.4.0").unwrap();
        let package = manager.create_claim(None).unwrap();

        assert!(matches!(
            manager.confirm(&package.claim_id, &package.claim_code),
            Err(PairingError::Expired)
        ));
    }

    #[test]
    fn reissuing_invalidates_the_previous_claim() {
        let manager = manager();
        let first = manager.create_claim(None).unwrap();
        let second = manager.create_claim(None).unwrap();

        assert!(matches!(
            manager.confirm(&first.claim_id, &first.claim_code),
            Err(PairingError::UnknownClaim(_))
        ));
        assert!(manager.confirm(&second.claim_id, &second.claim_code).is_ok());
    }

    #[test]
    fn finalize_consumes_the_claim_and_is_idempotent() {
        let manager = manager();
        let package = manager.create_claim(None).unwrap();
        manager.confirm(&package.claim_id, &package.claim_code).unwrap();

        let identity = manager.finalize(&finalize_request(&package.claim_id)).unwrap();
        assert_eq!(identity.node_key, "nd-TEST01");
        assert_eq!(manager.cloud_identity().unwrap().node_key, "nd-TEST01");

        // Confirm after use reports already-used.
        assert!(matches!(
            manager.confirm(&package.claim_id, &package.claim_code),
            Err(PairingError::AlreadyUsed)
        ));

        // Retried finalize with the same node key succeeds without change.
        assert!(manager.finalize(&finalize_request(&package.claim_id)).is_ok());

        // A different node key against the used claim is rejected.
        let mut other = finalize_request(&package.claim_id);
        other.node_key = "nd-OTHER1".into();
        assert!(matches!(
            manager.finalize(&other),
            Err(PairingError::AlreadyUsed)
        ));
    }

    #[test]
    fn claim_codes_use_the_unambiguous_alphabet() {
        let manager = manager();
        let package = manager.create_claim(None).unwrap();
        assert_eq!(package.claim_code.len(), CODE_LEN);
        assert!(package
            .claim_code
            .bytes()
            .all(|b| CODE_CHARSET.contains(&b)));
    }

    #[test]
    fn state_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairing.json");

        let first = PairingManager::open(
            Some(path.clone()),
            600,
            StoreHints::default(),
            "2.4.0",
        )
        .unwrap();
        let uid = first.server_uid();
        let package = first.create_claim(None).unwrap();
        first.finalize(&finalize_request(&package.claim_id)).unwrap();
        drop(first);

        let second =
            PairingManager::open(Some(path), 600, StoreHints::default(), "2.4.0").unwrap();
        assert_eq!(second.server_uid(), uid);
        assert_eq!(second.cloud_identity().unwrap().node_key, "nd-TEST01");
    }
}
