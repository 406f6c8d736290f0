//! Operator scope resolution.
//!
//! Every read and write in the control plane passes through a resolved
//! [`ScopeFilter`] before touching storage. Client-supplied filters may
//! narrow an operator's scope but never widen it; anything outside the
//! resolved scope surfaces as not-found, never as permission-denied.

use serde::Deserialize;
use thiserror::Error;

use crate::storage::Account;

/// Operator account classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Owner,
    Reseller,
    TenantAdmin,
}

impl AccountType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Reseller => "RESELLER",
            Self::TenantAdmin => "TENANT_ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OWNER" => Some(Self::Owner),
            "RESELLER" => Some(Self::Reseller),
            "TENANT_ADMIN" => Some(Self::TenantAdmin),
            _ => None,
        }
    }
}

/// Narrowing filters supplied by the client on list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeQuery {
    pub reseller_id: Option<String>,
    pub tenant_id: Option<String>,
}

/// The filter actually applied to storage queries.
///
/// `None` means unrestricted on that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub reseller_id: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("unknown account type: {0}")]
    UnknownAccountType(String),

    #[error("reseller account {0} has no reseller id")]
    MissingResellerId(String),

    #[error("tenant admin account {0} has no tenant id")]
    MissingTenantId(String),
}

/// Resolve the effective scope for an operator account.
///
/// Owners get exactly what they asked for. Resellers and tenant admins
/// get their own axis pinned server-side regardless of the request; the
/// other axis keeps the requested narrowing.
pub fn resolve(account: &Account, requested: &ScopeQuery) -> Result<ScopeFilter, ScopeError> {
    let account_type = AccountType::parse(&account.account_type)
        .ok_or_else(|| ScopeError::UnknownAccountType(account.account_type.clone()))?;

    match account_type {
        AccountType::Owner => Ok(ScopeFilter {
            reseller_id: requested.reseller_id.clone(),
            tenant_id: requested.tenant_id.clone(),
        }),
        AccountType::Reseller => {
            let reseller_id = account
                .reseller_id
                .clone()
                .ok_or_else(|| ScopeError::MissingResellerId(account.id.clone()))?;
            Ok(ScopeFilter {
                reseller_id: Some(reseller_id),
                tenant_id: requested.tenant_id.clone(),
            })
        }
        AccountType::TenantAdmin => {
            let tenant_id = account
                .tenant_id
                .clone()
                .ok_or_else(|| ScopeError::MissingTenantId(account.id.clone()))?;
            Ok(ScopeFilter {
                reseller_id: None,
                tenant_id: Some(tenant_id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(account_type: &str, reseller_id: Option<&str>, tenant_id: Option<&str>) -> Account {
        Account {
            id: "a1".into(),
            email: "op@example.com".into(),
            password_hash: "hash".into(),
            account_type: account_type.into(),
            reseller_id: reseller_id.map(Into::into),
            tenant_id: tenant_id.map(Into::into),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn owner_passes_requested_filters_through() {
        let acc = account("OWNER", None, None);
        let filter = resolve(
            &acc,
            &ScopeQuery {
                reseller_id: Some("r1".into()),
                tenant_id: None,
            },
        )
        .unwrap();
        assert_eq!(filter.reseller_id.as_deref(), Some("r1"));
        assert_eq!(filter.tenant_id, None);
    }

    #[test]
    fn owner_unfiltered_by_default() {
        let acc = account("OWNER", None, None);
        let filter = resolve(&acc, &ScopeQuery::default()).unwrap();
        assert_eq!(filter, ScopeFilter::default());
    }

    #[test]
    fn reseller_cannot_widen_to_another_reseller() {
        let acc = account("RESELLER", Some("r1"), None);
        let filter = resolve(
            &acc,
            &ScopeQuery {
                reseller_id: Some("r2".into()),
                tenant_id: None,
            },
        )
        .unwrap();
        assert_eq!(filter.reseller_id.as_deref(), Some("r1"));
    }

    #[test]
    fn reseller_keeps_tenant_narrowing() {
        let acc = account("RESELLER", Some("r1"), None);
        let filter = resolve(
            &acc,
            &ScopeQuery {
                reseller_id: None,
                tenant_id: Some("t5".into()),
            },
        )
        .unwrap();
        assert_eq!(filter.reseller_id.as_deref(), Some("r1"));
        assert_eq!(filter.tenant_id.as_deref(), Some("t5"));
    }

    #[test]
    fn tenant_admin_is_pinned_to_own_tenant() {
        let acc = account("TENANT_ADMIN", None, Some("t1"));
        let filter = resolve(
            &acc,
            &ScopeQuery {
                reseller_id: Some("r9".into()),
                tenant_id: Some("t2".into()),
            },
        )
        .unwrap();
        assert_eq!(filter.reseller_id, None);
        assert_eq!(filter.tenant_id.as_deref(), Some("t1"));
    }

    #[test]
    fn reseller_without_reseller_id_is_rejected() {
        let acc = account("RESELLER", None, None);
        assert!(matches!(
            resolve(&acc, &ScopeQuery::default()),
            Err(ScopeError::MissingResellerId(_))
        ));
    }

    #[test]
    fn unknown_account_type_is_rejected() {
        let acc = account("INTERN", None, None);
        assert!(matches!(
            resolve(&acc, &ScopeQuery::default()),
            Err(ScopeError::UnknownAccountType(_))
        ));
    }
}
