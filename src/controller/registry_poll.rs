//! Registry polling mode (spec §4.7): periodically resolves the current
//! digest for each `ImageScan` with `registryPoll.enabled` and launches an
//! immediate one-shot scan `Job` when the digest changes.
//!
//! The last-seen digest is never cached in-process (spec §9, "Digest
//! cache") — it is read back from and written back to `status.lastObservedDigest`
//! on the CR itself, so a controller restart never re-triggers a spurious scan.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{info, warn};

use super::resources;
use crate::crd::ImageScan;
use crate::registry::RegistryProbe;

const POLL_TICK: Duration = Duration::from_secs(30);

/// Drives the registry-poll loop for as long as the process runs. Each
/// tick lists all `ImageScan`s, filters to those due for a poll, and
/// checks each one independently so a single registry failure never
/// blocks the rest.
pub async fn run_registry_poll(client: Client) {
    let probe = RegistryProbe::new();
    let mut ticker = tokio::time::interval(POLL_TICK);

    loop {
        ticker.tick().await;

        let api: Api<ImageScan> = Api::all(client.clone());
        let scans = match api.list(&Default::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(error = %e, "failed to list ImageScans for registry poll");
                continue;
            }
        };

        let due: Vec<ImageScan> = scans
            .into_iter()
            .filter(|s| s.spec.registry_poll.enabled && is_due(s))
            .collect();

        futures::stream::iter(due)
            .for_each_concurrent(4, |scan| {
                let client = client.clone();
                let probe = &probe;
                async move {
                    if let Err(e) = poll_one(&client, probe, &scan).await {
                        warn!(name = %scan.name_any(), error = %e, "registry poll failed");
                    }
                }
            })
            .await;
    }
}

fn is_due(scan: &ImageScan) -> bool {
    let Some(status) = &scan.status else {
        return true;
    };
    let Some(next_check) = &status.next_check_time else {
        return true;
    };
    match chrono::DateTime::parse_from_rfc3339(next_check) {
        Ok(next) => chrono::Utc::now() >= next,
        Err(_) => true,
    }
}

async fn poll_one(
    client: &Client,
    probe: &RegistryProbe,
    scan: &ImageScan,
) -> crate::error::Result<()> {
    let pull_secrets = fetch_pull_secrets(client, scan).await;
    let digest = probe.resolve_digest(&scan.spec.image, &pull_secrets).await?;

    let previous_digest = scan.status.as_ref().and_then(|s| s.last_observed_digest.clone());
    let changed = previous_digest.as_deref() != Some(digest.as_str());

    if changed {
        info!(name = %scan.name_any(), digest = %digest, "observed digest change, launching triggered scan");
        resources::launch_triggered_scan(client, scan, &digest).await?;
    }

    let interval = scan.spec.registry_poll.interval_seconds.max(60);
    let next_check_time = (chrono::Utc::now() + chrono::Duration::seconds(interval as i64)).to_rfc3339();
    patch_poll_status(client, scan, &digest, &next_check_time).await
}

async fn fetch_pull_secrets(client: &Client, scan: &ImageScan) -> Vec<Vec<u8>> {
    let Some(secret_name) = &scan.spec.registry_poll.pull_secret else {
        return Vec::new();
    };
    let namespace = scan.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(client.clone(), &namespace);
    match api.get(secret_name).await {
        Ok(secret) => secret
            .data
            .and_then(|d| d.get(".dockerconfigjson").cloned())
            .map(|b| vec![b.0])
            .unwrap_or_default(),
        Err(e) => {
            warn!(name = %scan.name_any(), secret = %secret_name, error = %e, "failed to fetch pull secret");
            Vec::new()
        }
    }
}

async fn patch_poll_status(
    client: &Client,
    scan: &ImageScan,
    digest: &str,
    next_check_time: &str,
) -> crate::error::Result<()> {
    let namespace = scan.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ImageScan> = Api::namespaced(client.clone(), &namespace);

    let patch = serde_json::json!({
        "status": {
            "lastObservedDigest": digest,
            "nextCheckTime": next_check_time,
        }
    });

    api.patch_status(
        &scan.name_any(),
        &PatchParams::apply("imagescan-operator"),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(crate::error::Error::KubeError)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ImageScanSpec, ImageScanStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn scan_with_status(status: Option<ImageScanStatus>) -> ImageScan {
        ImageScan {
            metadata: ObjectMeta {
                name: Some("nginx-scan".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: ImageScanSpec {
                image: "docker.io/nginx:latest".to_string(),
                schedule: "0 3 * * *".to_string(),
                time_zone: None,
                sbom_format: Default::default(),
                suspend: false,
                successful_jobs_history_limit: 3,
                failed_jobs_history_limit: 3,
                resources: Default::default(),
                workspace_size: "10Gi".to_string(),
                api_endpoint: None,
                scanner_image: None,
                webhooks: None,
                image_pull_secrets: Vec::new(),
                only_fixable: false,
                sla: None,
                registry_poll: Default::default(),
            },
            status,
        }
    }

    #[test]
    fn test_is_due_with_no_status_yet() {
        assert!(is_due(&scan_with_status(None)));
    }

    #[test]
    fn test_is_due_with_no_next_check_time() {
        let status = ImageScanStatus::default();
        assert!(is_due(&scan_with_status(Some(status))));
    }

    #[test]
    fn test_is_due_when_next_check_time_in_the_past() {
        let mut status = ImageScanStatus::default();
        status.next_check_time = Some("2020-01-01T00:00:00Z".to_string());
        assert!(is_due(&scan_with_status(Some(status))));
    }

    #[test]
    fn test_not_due_when_next_check_time_in_the_future() {
        let next = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let mut status = ImageScanStatus::default();
        status.next_check_time = Some(next);
        assert!(!is_due(&scan_with_status(Some(status))));
    }

    #[test]
    fn test_is_due_on_unparseable_next_check_time() {
        let mut status = ImageScanStatus::default();
        status.next_check_time = Some("not-a-timestamp".to_string());
        assert!(is_due(&scan_with_status(Some(status))));
    }
}
