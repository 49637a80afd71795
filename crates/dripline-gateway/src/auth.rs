//! Caller authentication for the trigger endpoints.
//!
//! - Cron trigger: shared bearer secret (`CRON_SECRET`). With no secret
//!   configured, calls are refused unless `insecure_mode` is on.
//! - Manual triggers and unsubscribe links: per-user HMAC tokens of the form
//!   `<uid>.<base64url(hmac-sha256(secret, purpose || uid))>`. Access and
//!   unsubscribe tokens use different purposes, so an unsubscribe link
//!   cannot authorize a send.

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dripline_core::config::CronConfig;
use dripline_core::{DriplineError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const ACCESS_PURPOSE: &str = "access:";
const UNSUBSCRIBE_PURPOSE: &str = "unsubscribe:";

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolves a user token to the user id it was issued for.
pub trait TokenVerifier: Send + Sync {
    /// Bearer token for the manual trigger routes.
    fn verify(&self, token: &str) -> Result<String>;

    /// Token embedded in unsubscribe links.
    fn verify_unsubscribe(&self, token: &str) -> Result<String>;
}

pub struct HmacTokenVerifier {
    secret: Vec<u8>,
}

impl HmacTokenVerifier {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(DriplineError::Configuration("auth.token_secret is empty".into()));
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    fn mac(&self, purpose: &str, user_id: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| DriplineError::Configuration(format!("HMAC key: {e}")))?;
        mac.update(purpose.as_bytes());
        mac.update(user_id.as_bytes());
        Ok(mac)
    }

    fn sign(&self, purpose: &str, user_id: &str) -> Result<String> {
        let sig = self.mac(purpose, user_id)?.finalize().into_bytes();
        Ok(format!("{user_id}.{}", URL_SAFE_NO_PAD.encode(sig)))
    }

    fn check(&self, purpose: &str, token: &str) -> Result<String> {
        let invalid = || DriplineError::Auth("Invalid token".into());
        let (user_id, sig) = token.rsplit_once('.').ok_or_else(invalid)?;
        if user_id.is_empty() {
            return Err(invalid());
        }
        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| invalid())?;
        self.mac(purpose, user_id)?
            .verify_slice(&sig)
            .map_err(|_| invalid())?;
        Ok(user_id.to_string())
    }

    /// Bearer token for `user_id`, printed by `dripline token`.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        self.sign(ACCESS_PURPOSE, user_id)
    }

    /// Token for `user_id`'s unsubscribe links.
    pub fn issue_unsubscribe(&self, user_id: &str) -> Result<String> {
        self.sign(UNSUBSCRIBE_PURPOSE, user_id)
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str) -> Result<String> {
        self.check(ACCESS_PURPOSE, token)
    }

    fn verify_unsubscribe(&self, token: &str) -> Result<String> {
        self.check(UNSUBSCRIBE_PURPOSE, token)
    }
}

/// Shared-secret check for the cron trigger.
#[derive(Debug, Clone, Default)]
pub struct CronAuth {
    secret: Option<String>,
    insecure_mode: bool,
}

impl CronAuth {
    pub fn new(secret: Option<String>, insecure_mode: bool) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
            insecure_mode,
        }
    }

    pub fn from_config(config: &CronConfig) -> Self {
        Self::new(config.secret.clone(), config.insecure_mode)
    }

    pub fn authorize(&self, headers: &HeaderMap) -> Result<()> {
        let Some(expected) = &self.secret else {
            if self.insecure_mode {
                tracing::warn!("⚠️ Cron trigger accepted without a secret (insecure_mode)");
                return Ok(());
            }
            return Err(DriplineError::Auth("Cron secret not configured".into()));
        };
        let provided = bearer_token(headers)
            .ok_or_else(|| DriplineError::Auth("Missing bearer token".into()))?;
        if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(DriplineError::Auth("Invalid cron secret".into()))
        }
    }
}
