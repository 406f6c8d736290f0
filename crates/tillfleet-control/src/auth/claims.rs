//! JWT claims for operator sessions and impersonation links.

use serde::{Deserialize, Serialize};

/// Claims embedded in operator access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorClaims {
    /// JWT ID (unique per token).
    pub jti: String,
    /// Subject (account ID).
    pub sub: String,
    /// Operator email.
    pub email: String,
    /// Account type: OWNER, RESELLER, or TENANT_ADMIN.
    pub account_type: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// Token type: always "access".
    pub token_type: String,
}

impl OperatorClaims {
    pub fn is_access(&self) -> bool {
        self.token_type == "access"
    }
}

/// Claims embedded in an impersonation link token. The bearer opens a
/// store's local management surface as that store's administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonationClaims {
    /// JWT ID (unique per link).
    pub jti: String,
    /// Subject (the requesting operator's account ID).
    pub sub: String,
    /// The store whose admin context the link grants.
    pub store_id: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// Token type: always "impersonation".
    pub token_type: String,
}

impl ImpersonationClaims {
    pub fn is_impersonation(&self) -> bool {
        self.token_type == "impersonation"
    }
}
