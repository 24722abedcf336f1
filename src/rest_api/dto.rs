//! Wire DTOs for the REST API (spec §6) — request bodies, query params, and
//! the shared paginated-list envelope.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::types::{Severity, VulnStatus, WebhookFormat};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Shared envelope for every offset-paginated listing endpoint.
#[derive(Serialize)]
pub struct Paged<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Deserialize)]
pub struct ListScansQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub image_id: Option<Uuid>,
    pub image: Option<String>,
    pub has_fix: Option<bool>,
}

#[derive(Deserialize)]
pub struct ScanDetailQuery {
    pub has_fix: Option<bool>,
}

#[derive(Deserialize)]
pub struct ListVulnerabilitiesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub severity: Option<Severity>,
    pub status: Option<VulnStatus>,
    pub has_fix: Option<bool>,
    pub image_id: Option<Uuid>,
    pub image: Option<String>,
    pub cve_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ListImagesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub registry: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub has_fix: Option<bool>,
}

#[derive(Deserialize)]
pub struct ImageHistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub has_fix: Option<bool>,
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    pub has_fix: Option<bool>,
    pub image_name: Option<String>,
}

#[derive(Deserialize)]
pub struct PatchVulnerabilityRequest {
    pub status: Option<VulnStatus>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct BulkPatchRequest {
    pub ids: Vec<Uuid>,
    pub status: Option<VulnStatus>,
    pub notes: Option<String>,
}

#[derive(Serialize)]
pub struct BulkPatchResponse {
    pub updated_count: usize,
    pub status: Option<VulnStatus>,
}

#[derive(Deserialize)]
pub struct WebhookConfigRequest {
    pub url: String,
    pub format: WebhookFormat,
    #[serde(default)]
    pub scan_completion_enabled: bool,
    #[serde(default = "default_min_severity")]
    pub scan_completion_min_severity: String,
    #[serde(default)]
    pub scan_completion_only_fixable: bool,
    #[serde(default)]
    pub status_change_enabled: bool,
    #[serde(default = "default_min_severity")]
    pub status_change_min_severity: String,
    #[serde(default)]
    pub status_change_only_fixable: bool,
    #[serde(default)]
    pub status_change_transitions: Vec<String>,
    #[serde(default)]
    pub status_change_include_note_changes: bool,
}

fn default_min_severity() -> String {
    "negligible".to_string()
}

/// Dashboard summary served by `GET /metrics` — distinct from the
/// Prometheus `/metrics` text exposition, which lives under the
/// `metrics` feature.
#[derive(Serialize, Default)]
pub struct DashboardMetrics {
    pub total_images: i64,
    pub total_scans: i64,
    pub open_vulnerabilities: i64,
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub unknown: i64,
}
