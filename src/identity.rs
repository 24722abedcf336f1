//! Identity at the HTTP edge (spec §6, "Identity").
//!
//! When an upstream authenticating proxy is enabled, the server trusts
//! `X-Auth-Request-Email` only if the accompanying
//! `X-Auth-Request-Access-Token` validates against the configured OIDC
//! JWKS and its `email` claim matches the header. Absence of both headers
//! on a write endpoint is a `401`. With no JWKS URL configured, the proxy
//! is considered disabled and callers are recorded as `"unknown"`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    email: Option<String>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Validates bearer access tokens against a remote JWKS endpoint, refetched
/// on a short TTL rather than once at startup so key rotation doesn't
/// require a restart.
pub struct JwksValidator {
    jwks_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
}

impl JwksValidator {
    pub fn new(jwks_url: String) -> Arc<Self> {
        Arc::new(Self {
            jwks_url,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        })
    }

    async fn jwk_set(&self) -> Result<JwkSet, String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_CACHE_TTL {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let keys: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    /// Validates `access_token` and checks its `email` claim matches
    /// `expected_email`. Returns `Ok(())` only when both hold.
    pub async fn validate(&self, access_token: &str, expected_email: &str) -> Result<(), String> {
        let header = decode_header(access_token).map_err(|e| e.to_string())?;
        let kid = header.kid.ok_or("token has no kid")?;

        let jwks = self.jwk_set().await?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| format!("no matching jwk for kid {kid}"))?;

        let decoding_key = DecodingKey::from_jwk(jwk).map_err(|e| e.to_string())?;
        let mut validation = Validation::new(header.alg.unwrap_or(Algorithm::RS256));
        validation.validate_aud = false;

        let data = decode::<IdTokenClaims>(access_token, &decoding_key, &validation)
            .map_err(|e| e.to_string())?;

        match data.claims.email {
            Some(email) if email.eq_ignore_ascii_case(expected_email) => Ok(()),
            Some(email) => Err(format!("token email {email} does not match header email")),
            None => Err("token has no email claim".to_string()),
        }
    }
}

/// Resolves `changed_by` for a write request per spec §6. `proxy` is `None`
/// when `OIDC_JWKS_URL` isn't configured.
pub async fn resolve_identity(
    proxy: Option<&JwksValidator>,
    email_header: Option<&str>,
    access_token_header: Option<&str>,
) -> Result<String, String> {
    let Some(proxy) = proxy else {
        return Ok("unknown".to_string());
    };

    let (email, token) = match (email_header, access_token_header) {
        (Some(email), Some(token)) => (email, token),
        _ => return Err("missing identity headers".to_string()),
    };

    proxy.validate(token, email).await?;
    Ok(email.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_proxy_yields_unknown() {
        let identity = resolve_identity(None, None, None).await.unwrap();
        assert_eq!(identity, "unknown");
    }

    #[tokio::test]
    async fn enabled_proxy_requires_both_headers() {
        let validator = JwksValidator::new("https://example.invalid/jwks".to_string());
        let err = resolve_identity(Some(&validator), Some("a@example.com"), None)
            .await
            .unwrap_err();
        assert!(err.contains("missing"));
    }
}
