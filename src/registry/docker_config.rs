//! Parsing of Docker-config-JSON pull secrets (`.dockerconfigjson`).

use base64::Engine;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct DockerConfigJson {
    auths: BTreeMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// A decoded username/password pair for one registry host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicCredential {
    pub username: String,
    pub password: String,
}

/// Find the credential matching `registry_host` across a list of
/// Docker-config-JSON blobs (as supplied by ImagePullSecrets).
pub fn find_credential(blobs: &[Vec<u8>], registry_host: &str) -> Option<BasicCredential> {
    for blob in blobs {
        let Ok(parsed) = serde_json::from_slice::<DockerConfigJson>(blob) else {
            continue;
        };
        for (host, entry) in &parsed.auths {
            if !hosts_match(host, registry_host) {
                continue;
            }
            if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
                return Some(BasicCredential {
                    username: username.clone(),
                    password: password.clone(),
                });
            }
            if let Some(auth) = &entry.auth {
                if let Some(cred) = decode_auth_field(auth) {
                    return Some(cred);
                }
            }
        }
    }
    None
}

fn hosts_match(config_host: &str, registry_host: &str) -> bool {
    let strip = |h: &str| {
        h.trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    };
    strip(config_host) == strip(registry_host)
}

fn decode_auth_field(auth: &str) -> Option<BasicCredential> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth.trim())
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some(BasicCredential {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_blob(host: &str, user: &str, pass: &str) -> Vec<u8> {
        let auth = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        serde_json::json!({
            "auths": { host: { "auth": auth } }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn finds_matching_host() {
        let blob = config_blob("registry.example.com", "alice", "hunter2");
        let cred = find_credential(&[blob], "registry.example.com").unwrap();
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.password, "hunter2");
    }

    #[test]
    fn ignores_scheme_and_trailing_slash() {
        let blob = config_blob("https://registry.example.com/", "bob", "pw");
        let cred = find_credential(&[blob], "registry.example.com").unwrap();
        assert_eq!(cred.username, "bob");
    }

    #[test]
    fn returns_none_when_no_match() {
        let blob = config_blob("other.example.com", "bob", "pw");
        assert!(find_credential(&[blob], "registry.example.com").is_none());
    }
}
