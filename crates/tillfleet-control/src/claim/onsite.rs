//! HTTP client for the onsite server's pairing surface.
//!
//! The cloud only ever calls the onsite server here: once to confirm a
//! claim, once to push the final linkage back. Everything else is
//! initiated by the agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from talking to an onsite server.
///
/// `Unreachable` is kept distinct from the claim verdicts because it is
/// the most common operational failure and has its own remedy (check
/// networking/VPN/tunnel rather than the claim itself).
#[derive(Debug, Error)]
pub enum OnsiteError {
    #[error("onsite server unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("claim has expired")]
    Expired,

    #[error("claim code does not match")]
    CodeMismatch,

    #[error("claim was already used")]
    AlreadyUsed,

    #[error("onsite server holds no claim with that id")]
    UnknownClaim,

    #[error("unexpected onsite response: {0}")]
    Protocol(String),
}

/// What the onsite server reports back on a successful confirm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub server_uid: String,
    #[serde(default)]
    pub store_name_hint: Option<String>,
    #[serde(default)]
    pub store_code_hint: Option<String>,
    #[serde(default)]
    pub timezone_hint: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
}

/// The linkage pushed back to the onsite server after redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizePayload {
    pub claim_id: String,
    pub node_key: String,
    pub store_code: String,
    pub store_name: String,
}

/// Seam between claim redemption and the network. The production
/// implementation speaks HTTP; tests substitute a scripted fake.
#[async_trait]
pub trait OnsiteClient: Send + Sync {
    async fn confirm(
        &self,
        base_url: &str,
        claim_id: &str,
        claim_code: &str,
    ) -> Result<ConfirmOutcome, OnsiteError>;

    async fn finalize(&self, base_url: &str, payload: &FinalizePayload)
    -> Result<(), OnsiteError>;
}

#[derive(Debug, Clone, Serialize)]
struct ConfirmRequest<'a> {
    claim_id: &'a str,
    claim_code: &'a str,
}

/// reqwest-backed onsite client.
pub struct HttpOnsiteClient {
    http: reqwest::Client,
}

impl HttpOnsiteClient {
    pub fn new(timeout: std::time::Duration) -> Result<Self, reqwest::Error> {
        // Ensure a TLS crypto provider is installed (reqwest uses
        // rustls-no-provider). The `Err` case just means it was already
        // installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    fn pairing_url(base_url: &str, leaf: &str) -> String {
        format!("{}/pairing/{leaf}", base_url.trim_end_matches('/'))
    }

    fn unreachable(url: &str, e: &reqwest::Error) -> OnsiteError {
        OnsiteError::Unreachable {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }

    /// Map a non-success pairing response to the claim verdict it carries.
    async fn claim_verdict(resp: reqwest::Response) -> OnsiteError {
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let code = body
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");

        match code {
            "claim_expired" => OnsiteError::Expired,
            "claim_code_mismatch" => OnsiteError::CodeMismatch,
            "claim_already_used" => OnsiteError::AlreadyUsed,
            "claim_not_found" => OnsiteError::UnknownClaim,
            _ => OnsiteError::Protocol(format!("status {status}, code {code:?}")),
        }
    }
}

#[async_trait]
impl OnsiteClient for HttpOnsiteClient {
    async fn confirm(
        &self,
        base_url: &str,
        claim_id: &str,
        claim_code: &str,
    ) -> Result<ConfirmOutcome, OnsiteError> {
        let url = Self::pairing_url(base_url, "confirm");
        let resp = self
            .http
            .post(&url)
            .json(&ConfirmRequest {
                claim_id,
                claim_code,
            })
            .send()
            .await
            .map_err(|e| Self::unreachable(&url, &e))?;

        if !resp.status().is_success() {
            return Err(Self::claim_verdict(resp).await);
        }

        resp.json::<ConfirmOutcome>()
            .await
            .map_err(|e| OnsiteError::Protocol(e.to_string()))
    }

    async fn finalize(
        &self,
        base_url: &str,
        payload: &FinalizePayload,
    ) -> Result<(), OnsiteError> {
        let url = Self::pairing_url(base_url, "finalize");
        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Self::unreachable(&url, &e))?;

        if !resp.status().is_success() {
            return Err(Self::claim_verdict(resp).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_urls_tolerate_trailing_slash() {
        assert_eq!(
            HttpOnsiteClient::pairing_url("https://edge.local:8443/", "confirm"),
            "https://edge.local:8443/pairing/confirm"
        );
        assert_eq!(
            HttpOnsiteClient::pairing_url("https://edge.local:8443", "finalize"),
            "https://edge.local:8443/pairing/finalize"
        );
    }
}
