//! Webhook delivery over the fire-and-forget notification dispatcher
//! (spec §4.6), exercised against a mocked HTTP endpoint.

use std::time::Duration;

use imagescan_operator::ingest::envelope::{
    GrypeArtifact, GrypeDescriptor, GrypeFix, GrypeMatch, GrypeResult, GrypeVulnerability,
    IngestWebhookConfig, ScanIngest,
};
use imagescan_operator::ingest::IngestPipeline;
use imagescan_operator::notify::NotificationDispatcher;
use imagescan_operator::store::types::{SbomFormat, WebhookFormat};
use imagescan_operator::store::Repositories;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn scan_completion_posts_to_configured_webhook() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/scan"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let repos = Repositories::in_memory();
    let dispatcher = NotificationDispatcher::spawn();
    let pipeline = IngestPipeline::new(repos, dispatcher, "http://localhost:8080".to_string());

    let envelope = ScanIngest {
        image: "nginx:latest".to_string(),
        image_digest: None,
        sbom: serde_json::json!({"bomFormat": "CycloneDX"}),
        sbom_format: SbomFormat::Cyclonedx,
        sbom_version: Some("1.5".to_string()),
        grype_result: GrypeResult {
            matches: vec![GrypeMatch {
                vulnerability: GrypeVulnerability {
                    id: "CVE-2023-1".to_string(),
                    severity: "High".to_string(),
                    description: None,
                    urls: Vec::new(),
                    fix: Some(GrypeFix {
                        versions: vec!["1.1.2".to_string()],
                    }),
                },
                artifact: GrypeArtifact {
                    name: "openssl".to_string(),
                    version: "1.1.1".to_string(),
                    type_: Some("deb".to_string()),
                },
            }],
            descriptor: GrypeDescriptor {
                name: "grype".to_string(),
                version: "0.74.0".to_string(),
            },
        },
        webhook_config: Some(IngestWebhookConfig {
            url: format!("{}/hooks/scan", mock_server.uri()),
            format: WebhookFormat::Slack,
            min_severity: Some("low".to_string()),
            only_fixable: Some(false),
        }),
        sla_config: None,
        imagescan_context: None,
    };

    pipeline.ingest(envelope).await.expect("ingest succeeds");

    // delivery happens on a detached worker task; give it a moment to land.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let received = mock_server.received_requests().await.expect("mock server recorded requests");
    assert_eq!(received.len(), 1, "webhook should be posted exactly once");
}
