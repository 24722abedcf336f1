//! C8 — Scan job contract: the wire shape scan jobs POST to `/api/v1/scans`.

use serde::{Deserialize, Serialize};

use crate::store::types::SbomFormat;

#[derive(Clone, Debug, Deserialize)]
pub struct ScanIngest {
    pub image: String,
    pub image_digest: Option<String>,
    pub sbom: serde_json::Value,
    pub sbom_format: SbomFormat,
    pub sbom_version: Option<String>,
    pub grype_result: GrypeResult,
    pub webhook_config: Option<IngestWebhookConfig>,
    pub sla_config: Option<IngestSlaConfig>,
    pub imagescan_context: Option<ImageScanContext>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GrypeResult {
    pub matches: Vec<GrypeMatch>,
    pub descriptor: GrypeDescriptor,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GrypeDescriptor {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GrypeMatch {
    pub vulnerability: GrypeVulnerability,
    pub artifact: GrypeArtifact,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GrypeVulnerability {
    pub id: String,
    pub severity: String,
    pub description: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    pub fix: Option<GrypeFix>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GrypeFix {
    #[serde(default)]
    pub versions: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GrypeArtifact {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngestWebhookConfig {
    pub url: String,
    pub format: crate::store::types::WebhookFormat,
    pub min_severity: Option<String>,
    pub only_fixable: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngestSlaConfig {
    pub critical: Option<i32>,
    pub high: Option<i32>,
    pub medium: Option<i32>,
    pub low: Option<i32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ImageScanContext {
    pub namespace: String,
    pub name: String,
}

/// A single normalized finding, derived from one `GrypeMatch`. Every
/// downstream ingest step operates on this, not the raw wire shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NormalizedFinding {
    pub cve_id: String,
    pub package_name: String,
    pub package_version: String,
}

#[derive(Clone, Debug)]
pub struct Finding {
    pub key: NormalizedFinding,
    pub package_type: Option<String>,
    pub severity: crate::store::types::Severity,
    pub fix_version: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
}

impl GrypeResult {
    pub fn findings(&self) -> Vec<Finding> {
        self.matches
            .iter()
            .map(|m| Finding {
                key: NormalizedFinding {
                    cve_id: m.vulnerability.id.clone(),
                    package_name: m.artifact.name.clone(),
                    package_version: m.artifact.version.clone(),
                },
                package_type: m.artifact.type_.clone(),
                severity: crate::store::types::Severity::normalize(&m.vulnerability.severity),
                fix_version: m.vulnerability.fix.as_ref().and_then(|f| f.versions.first().cloned()),
                url: m.vulnerability.urls.first().cloned(),
                description: m.vulnerability.description.clone(),
            })
            .collect()
    }
}

/// DTO returned from `POST /scans` and embedded in `GET /scans/:id`.
#[derive(Clone, Debug, Serialize)]
pub struct ScanResponse {
    pub id: uuid::Uuid,
    pub image_id: uuid::Uuid,
}
