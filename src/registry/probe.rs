//! Registry probe (C1): resolves the current content digest for an image
//! reference against a Docker Registry HTTP API v2 endpoint.
//!
//! Never caches — caching the resolved digest is the caller's concern
//! (spec §4.1); in this codebase that caller is the CR's
//! `status.lastObservedDigest`, never a process-local cache (§9).

use reqwest::{Client as HttpClient, StatusCode};
use thiserror::Error;

use crate::imageref::ImageRef;
use crate::registry::docker_config::{find_credential, BasicCredential};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("authentication required for {0}")]
    AuthRequired(String),
    #[error("transient registry error: {0}")]
    Transient(String),
    #[error("malformed registry response: {0}")]
    Malformed(String),
}

const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.oci.image.index.v1+json"
);

pub struct RegistryProbe {
    http: HttpClient,
}

impl Default for RegistryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryProbe {
    pub fn new() -> Self {
        Self {
            http: HttpClient::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
        }
    }

    /// Resolve the current digest for `image`. `pull_secrets` is a list of
    /// raw Docker-config-JSON blobs; the first matching credential for the
    /// reference's registry host is used.
    pub async fn resolve_digest(
        &self,
        image: &str,
        pull_secrets: &[Vec<u8>],
    ) -> Result<String, RegistryError> {
        let image_ref = ImageRef::parse(image);
        let base = registry_base_url(&image_ref.registry);
        let manifest_url = format!(
            "{base}/v2/{repo}/manifests/{tag}",
            repo = image_ref.repository,
            tag = image_ref.tag
        );

        let credential = find_credential(pull_secrets, &image_ref.registry);

        let first = self.get_manifest(&manifest_url, None).await?;
        match first {
            ManifestAttempt::Digest(digest) => return Ok(digest),
            ManifestAttempt::NeedsAuth(www_authenticate) => {
                let token = self
                    .fetch_bearer_token(&www_authenticate, credential.as_ref())
                    .await?;
                match self.get_manifest(&manifest_url, Some(&token)).await? {
                    ManifestAttempt::Digest(digest) => Ok(digest),
                    ManifestAttempt::NeedsAuth(_) => Err(RegistryError::AuthRequired(
                        image_ref.registry.clone(),
                    )),
                }
            }
        }
    }

    async fn get_manifest(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<ManifestAttempt, RegistryError> {
        let mut req = self.http.head(url).header("Accept", MANIFEST_ACCEPT);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| RegistryError::Transient(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let digest = response
                    .headers()
                    .get("Docker-Content-Digest")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        RegistryError::Malformed(
                            "manifest response missing Docker-Content-Digest".to_string(),
                        )
                    })?;
                Ok(ManifestAttempt::Digest(digest))
            }
            StatusCode::UNAUTHORIZED => {
                let header = response
                    .headers()
                    .get("WWW-Authenticate")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Ok(ManifestAttempt::NeedsAuth(header))
            }
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(url.to_string())),
            status if status.is_server_error() => {
                Err(RegistryError::Transient(format!("registry returned {status}")))
            }
            status => Err(RegistryError::Malformed(format!(
                "unexpected registry status {status}"
            ))),
        }
    }

    async fn fetch_bearer_token(
        &self,
        www_authenticate: &str,
        credential: Option<&BasicCredential>,
    ) -> Result<String, RegistryError> {
        let challenge = parse_bearer_challenge(www_authenticate).ok_or_else(|| {
            RegistryError::Malformed(format!("unparsable WWW-Authenticate: {www_authenticate}"))
        })?;

        let mut req = self.http.get(&challenge.realm).query(&[
            ("service", challenge.service.as_deref().unwrap_or_default()),
            ("scope", challenge.scope.as_deref().unwrap_or_default()),
        ]);
        if let Some(cred) = credential {
            req = req.basic_auth(&cred.username, Some(&cred.password));
        }

        let response = req
            .send()
            .await
            .map_err(|e| RegistryError::Transient(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            return Err(RegistryError::AuthRequired(challenge.realm));
        }
        if !response.status().is_success() {
            return Err(RegistryError::Transient(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;

        body.token
            .or(body.access_token)
            .ok_or_else(|| RegistryError::Malformed("token endpoint returned no token".to_string()))
    }
}

enum ManifestAttempt {
    Digest(String),
    NeedsAuth(String),
}

struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

/// Parse a `WWW-Authenticate: Bearer realm="...",service="...",scope="..."` header.
fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim_matches('"');
            match key {
                "realm" => realm = Some(value.to_string()),
                "service" => service = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                _ => {}
            }
        }
    }
    let realm = realm?;
    Some(BearerChallenge {
        realm,
        service,
        scope,
    })
}

fn registry_base_url(registry: &str) -> String {
    if registry == "docker.io" {
        "https://registry-1.docker.io".to_string()
    } else {
        format!("https://{registry}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge() {
        let header =
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#;
        let challenge = parse_bearer_challenge(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/nginx:pull")
        );
    }

    #[test]
    fn docker_io_maps_to_registry_1() {
        assert_eq!(registry_base_url("docker.io"), "https://registry-1.docker.io");
    }

    #[test]
    fn other_registries_use_https_host() {
        assert_eq!(
            registry_base_url("registry.example.com"),
            "https://registry.example.com"
        );
    }
}
