//! JWT issuance and validation for operator sessions and impersonation
//! links.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

use tillfleet_core::db::unix_timestamp;

use super::claims::{ImpersonationClaims, OperatorClaims};
use crate::storage::Account;

/// Manages JWT creation and validation.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: i64,
    impersonation_ttl_secs: i64,
}

impl JwtManager {
    /// Create a new `JwtManager` with the given secret.
    pub fn new(secret: &[u8], access_ttl_secs: i64, impersonation_ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_secs,
            impersonation_ttl_secs,
        }
    }

    /// Issue an access token for an operator account.
    pub fn issue_access_token(
        &self,
        account: &Account,
    ) -> Result<(String, i64), jsonwebtoken::errors::Error> {
        let now = unix_timestamp();
        let claims = OperatorClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: account.id.clone(),
            email: account.email.clone(),
            account_type: account.account_type.clone(),
            iat: now,
            exp: now + self.access_ttl_secs,
            token_type: "access".to_string(),
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, self.access_ttl_secs))
    }

    /// Issue a short-lived impersonation token granting a store's admin
    /// context to the given operator.
    pub fn issue_impersonation_token(
        &self,
        operator_id: &str,
        store_id: &str,
    ) -> Result<(String, i64), jsonwebtoken::errors::Error> {
        let now = unix_timestamp();
        let claims = ImpersonationClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: operator_id.to_string(),
            store_id: store_id.to_string(),
            iat: now,
            exp: now + self.impersonation_ttl_secs,
            token_type: "impersonation".to_string(),
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, self.impersonation_ttl_secs))
    }

    /// Validate an operator access token and return its claims.
    pub fn validate_access(
        &self,
        token: &str,
    ) -> Result<OperatorClaims, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<OperatorClaims>(
            token,
            &self.decoding_key,
            &Validation::default(),
        )?;
        Ok(data.claims)
    }

    /// Validate an impersonation token and return its claims.
    pub fn validate_impersonation(
        &self,
        token: &str,
    ) -> Result<ImpersonationClaims, jsonwebtoken::errors::Error> {
        let data = jsonwebtoken::decode::<ImpersonationClaims>(
            token,
            &self.decoding_key,
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_jwt() -> JwtManager {
        JwtManager::new(b"test-secret-key-for-testing", 3600, 300)
    }

    fn test_account() -> Account {
        Account {
            id: "acc-1".into(),
            email: "ops@example.com".into(),
            password_hash: "hash".into(),
            account_type: "RESELLER".into(),
            reseller_id: Some("r1".into()),
            tenant_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn issue_and_validate_access_token() {
        let jwt = test_jwt();
        let (token, ttl) = jwt.issue_access_token(&test_account()).unwrap();
        assert_eq!(ttl, 3600);

        let claims = jwt.validate_access(&token).unwrap();
        assert_eq!(claims.sub, "acc-1");
        assert_eq!(claims.account_type, "RESELLER");
        assert!(claims.is_access());
    }

    #[test]
    fn issue_and_validate_impersonation_token() {
        let jwt = test_jwt();
        let (token, expires_in) = jwt.issue_impersonation_token("acc-1", "store-7").unwrap();
        assert_eq!(expires_in, 300);

        let claims = jwt.validate_impersonation(&token).unwrap();
        assert_eq!(claims.sub, "acc-1");
        assert_eq!(claims.store_id, "store-7");
        assert!(claims.is_impersonation());
    }

    #[test]
    fn invalid_token_fails_validation() {
        let jwt = test_jwt();
        assert!(jwt.validate_access("not-a-valid-token").is_err());
    }

    #[test]
    fn wrong_secret_fails_validation() {
        let jwt1 = test_jwt();
        let jwt2 = JwtManager::new(b"different-secret", 3600, 300);

        let (token, _) = jwt1.issue_access_token(&test_account()).unwrap();
        assert!(jwt2.validate_access(&token).is_err());
    }
}
