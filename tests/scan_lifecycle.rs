//! End-to-end ingest/lifecycle scenarios (spec §8 S1-S4), driven against
//! `Repositories::in_memory()` rather than a live Postgres instance.

use imagescan_operator::ingest::envelope::{
    GrypeArtifact, GrypeDescriptor, GrypeFix, GrypeMatch, GrypeResult, GrypeVulnerability,
    ScanIngest,
};
use imagescan_operator::ingest::IngestPipeline;
use imagescan_operator::lifecycle::LifecycleService;
use imagescan_operator::notify::NotificationDispatcher;
use imagescan_operator::store::types::{Severity, UpdateContext, UpsertVulnerability, VulnStatus};
use imagescan_operator::store::Repositories;

fn finding(cve_id: &str, package: &str, version: &str, severity: &str, fix: Option<&str>) -> GrypeMatch {
    GrypeMatch {
        vulnerability: GrypeVulnerability {
            id: cve_id.to_string(),
            severity: severity.to_string(),
            description: None,
            urls: Vec::new(),
            fix: fix.map(|v| GrypeFix {
                versions: vec![v.to_string()],
            }),
        },
        artifact: GrypeArtifact {
            name: package.to_string(),
            version: version.to_string(),
            type_: Some("deb".to_string()),
        },
    }
}

fn envelope(image: &str, matches: Vec<GrypeMatch>) -> ScanIngest {
    ScanIngest {
        image: image.to_string(),
        image_digest: None,
        sbom: serde_json::json!({"bomFormat": "CycloneDX"}),
        sbom_format: imagescan_operator::store::types::SbomFormat::Cyclonedx,
        sbom_version: Some("1.5".to_string()),
        grype_result: GrypeResult {
            matches,
            descriptor: GrypeDescriptor {
                name: "grype".to_string(),
                version: "0.74.0".to_string(),
            },
        },
        webhook_config: None,
        sla_config: None,
        imagescan_context: None,
    }
}

fn pipeline() -> (IngestPipeline, Repositories) {
    let repos = Repositories::in_memory();
    let dispatcher = NotificationDispatcher::spawn();
    let pipeline = IngestPipeline::new(repos.clone(), dispatcher, "http://localhost:8080".to_string());
    (pipeline, repos)
}

/// S1 — first ingest creates one image, one scan, two active vulnerabilities,
/// and a diff with nothing but new findings.
#[tokio::test]
async fn first_ingest_creates_image_scan_and_vulnerabilities() {
    let (pipeline, repos) = pipeline();

    let outcome = pipeline
        .ingest(envelope(
            "nginx:latest",
            vec![
                finding("CVE-2023-1", "openssl", "1.1.1", "High", None),
                finding("CVE-2023-2", "curl", "7.74.0", "Medium", Some("7.75.0")),
            ],
        ))
        .await
        .expect("first ingest succeeds");

    assert_eq!(outcome.diff.new_count, 2);
    assert_eq!(outcome.diff.fixed_count, 0);
    assert_eq!(outcome.diff.persistent_count, 0);

    let image = repos
        .images
        .get_by_id(outcome.image_id)
        .await
        .unwrap()
        .expect("image row exists");
    assert_eq!(image.registry, "docker.io");
    assert_eq!(image.repository, "nginx");
    assert_eq!(image.tag, "latest");

    let vulns = repos.scans.get_vulnerabilities(outcome.scan_id).await.unwrap();
    assert_eq!(vulns.len(), 2);
    assert!(vulns.iter().all(|v| v.status == VulnStatus::Active));
}

/// S2 — second ingest drops CVE-2023-2; it is auto-marked fixed and the
/// diff reflects one fixed, one persistent, zero new.
#[tokio::test]
async fn second_ingest_auto_fixes_missing_finding() {
    let (pipeline, repos) = pipeline();

    pipeline
        .ingest(envelope(
            "nginx:latest",
            vec![
                finding("CVE-2023-1", "openssl", "1.1.1", "High", None),
                finding("CVE-2023-2", "curl", "7.74.0", "Medium", Some("7.75.0")),
            ],
        ))
        .await
        .unwrap();

    let outcome = pipeline
        .ingest(envelope(
            "nginx:latest",
            vec![finding("CVE-2023-1", "openssl", "1.1.1", "High", None)],
        ))
        .await
        .unwrap();

    assert_eq!(outcome.diff.new_count, 0);
    assert_eq!(outcome.diff.fixed_count, 1);
    assert_eq!(outcome.diff.persistent_count, 1);

    let fixed = repos
        .vulnerabilities
        .get_by_unique_key("CVE-2023-2", "curl", "7.74.0")
        .await
        .unwrap()
        .expect("vulnerability still on record");
    assert_eq!(fixed.status, VulnStatus::Fixed);
    assert_eq!(fixed.updated_by.as_deref(), Some("system"));

    let history = repos.vulnerabilities.get_history(fixed.id).await.unwrap();
    assert!(history.iter().any(|h| h.new_value.as_deref() == Some("fixed")));
}

/// S3 — a manual fix is reverted the next time the scanner still reports
/// the finding, exactly once per ingest even if the key repeats.
#[tokio::test]
async fn manual_fix_reverts_on_reappearance_once_per_ingest() {
    let (pipeline, repos) = pipeline();

    pipeline
        .ingest(envelope(
            "nginx:latest",
            vec![finding("CVE-2023-1", "openssl", "1.1.1", "High", None)],
        ))
        .await
        .unwrap();

    let first = repos
        .vulnerabilities
        .get_by_unique_key("CVE-2023-1", "openssl", "1.1.1")
        .await
        .unwrap()
        .unwrap();

    repos
        .vulnerabilities
        .update(
            first.id,
            &UpdateContext {
                changed_by: "operator".to_string(),
                status: Some(VulnStatus::Fixed),
                notes: Some("hotpatched".to_string()),
            },
        )
        .await
        .unwrap();

    // the same finding reported twice in one scan must not double-revert
    pipeline
        .ingest(envelope(
            "nginx:latest",
            vec![
                finding("CVE-2023-1", "openssl", "1.1.1", "High", None),
                finding("CVE-2023-1", "openssl", "1.1.1", "High", None),
            ],
        ))
        .await
        .unwrap();

    let after = repos
        .vulnerabilities
        .get_by_unique_key("CVE-2023-1", "openssl", "1.1.1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, VulnStatus::Active);

    let history = repos.vulnerabilities.get_history(after.id).await.unwrap();
    let reverts = history
        .iter()
        .filter(|h| h.old_value.as_deref() == Some("fixed") && h.new_value.as_deref() == Some("active"))
        .count();
    assert_eq!(reverts, 1, "revert must happen exactly once, not per duplicate finding");
    assert_eq!(
        history
            .iter()
            .find(|h| h.new_value.as_deref() == Some("active"))
            .unwrap()
            .changed_by,
        "system"
    );
}

/// S4 — bulk update is rejected above the cap, and exactly 100 history
/// rows are written for a 100-id request.
#[tokio::test]
async fn bulk_update_enforces_cap_and_records_history() {
    let repos = Repositories::in_memory();
    let dispatcher = NotificationDispatcher::spawn();
    let lifecycle = LifecycleService::new(repos.clone(), dispatcher);

    let mut ids = Vec::new();
    for i in 0..101 {
        let id = repos
            .vulnerabilities
            .upsert(UpsertVulnerability {
                cve_id: format!("CVE-2024-{i}"),
                package_name: "pkg".to_string(),
                package_version: "1.0".to_string(),
                package_type: None,
                severity: Severity::Low,
                fix_version: None,
                url: None,
                description: None,
                imagescan_namespace: None,
                imagescan_name: None,
            })
            .await
            .unwrap();
        ids.push(id);
    }

    let over_cap = lifecycle
        .bulk_update(
            ids.clone(),
            UpdateContext {
                changed_by: "operator".to_string(),
                status: Some(VulnStatus::Accepted),
                notes: None,
            },
        )
        .await;
    assert!(over_cap.is_err(), "101 ids must be rejected");

    ids.truncate(100);
    let updated = lifecycle
        .bulk_update(
            ids.clone(),
            UpdateContext {
                changed_by: "operator".to_string(),
                status: Some(VulnStatus::Accepted),
                notes: None,
            },
        )
        .await
        .expect("100 ids is within the cap");
    assert_eq!(updated.len(), 100);
    assert!(updated.iter().all(|v| v.status == VulnStatus::Accepted));

    let mut history_rows = 0;
    for id in &ids {
        history_rows += repos.vulnerabilities.get_history(*id).await.unwrap().len();
    }
    assert_eq!(history_rows, 100);
}
