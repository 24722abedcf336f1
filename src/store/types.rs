//! Shared entity and filter types for the relational store (C3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

/// Normalized vulnerability severity (spec §4.4 step 5). `Unknown` is a
/// real value here, unlike the notification-only `Negligible` sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Case-insensitive normalization of a scanner-supplied severity string.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" | "moderate" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Vulnerability lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VulnStatus {
    Active,
    InProgress,
    Fixed,
    Ignored,
    Accepted,
}

impl VulnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VulnStatus::Active => "active",
            VulnStatus::InProgress => "in_progress",
            VulnStatus::Fixed => "fixed",
            VulnStatus::Ignored => "ignored",
            VulnStatus::Accepted => "accepted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(VulnStatus::Active),
            "in_progress" => Some(VulnStatus::InProgress),
            "fixed" => Some(VulnStatus::Fixed),
            "ignored" => Some(VulnStatus::Ignored),
            "accepted" => Some(VulnStatus::Accepted),
            _ => None,
        }
    }
}

impl std::fmt::Display for VulnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SBOM document format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SbomFormat {
    Cyclonedx,
    Spdx,
}

/// Offset pagination request shared by all listing operations.
#[derive(Clone, Copy, Debug)]
pub struct Paging {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct Image {
    pub id: Uuid,
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct ImageFilters {
    pub registry: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
    /// `fix_version IS NOT NULL` (true) / `IS NULL` (false) across any of
    /// the image's vulnerabilities.
    pub has_fix: Option<bool>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct Scan {
    pub id: Uuid,
    pub image_id: Uuid,
    pub scan_date: DateTime<Utc>,
    pub scanner_versions: serde_json::Value,
    pub status: String,
    pub sla_critical: i32,
    pub sla_high: i32,
    pub sla_medium: i32,
    pub sla_low: i32,
    pub imagescan_namespace: Option<String>,
    pub imagescan_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewScan {
    pub image_id: Uuid,
    pub scanner_versions: serde_json::Value,
    pub sla_critical: i32,
    pub sla_high: i32,
    pub sla_medium: i32,
    pub sla_low: i32,
    pub imagescan_namespace: Option<String>,
    pub imagescan_name: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SeverityCounts {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub unknown: i64,
}

#[derive(Clone, Debug)]
pub struct ScanDetail {
    pub scan: Scan,
    pub counts: SeverityCounts,
    pub total: i64,
}

#[derive(Clone, Debug, Default)]
pub struct ScanFilters {
    pub image_id: Option<Uuid>,
    pub image_name: Option<String>,
    pub has_fix: Option<bool>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SbomRef {
    pub scan_id: Uuid,
    pub format: SbomFormat,
    pub version: Option<String>,
    pub size_bytes: Option<i64>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct Vulnerability {
    pub id: Uuid,
    pub cve_id: String,
    pub package_name: String,
    pub package_version: String,
    pub package_type: Option<String>,
    pub severity: Severity,
    pub fix_version: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub status: VulnStatus,
    pub first_detected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub remediation_date: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub notes: Option<String>,
    pub imagescan_namespace: Option<String>,
    pub imagescan_name: Option<String>,
}

/// A unique key identifying one finding across scans.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VulnKey {
    pub cve_id: String,
    pub package_name: String,
    pub package_version: String,
}

#[derive(Clone, Debug)]
pub struct UpsertVulnerability {
    pub cve_id: String,
    pub package_name: String,
    pub package_version: String,
    pub package_type: Option<String>,
    pub severity: Severity,
    pub fix_version: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub imagescan_namespace: Option<String>,
    pub imagescan_name: Option<String>,
}

/// Carries the actor and requested mutation for a single status update.
/// `changed_by` is derived from upstream identity headers or `"system"`
/// (spec §4.5).
#[derive(Clone, Debug)]
pub struct UpdateContext {
    pub changed_by: String,
    pub status: Option<VulnStatus>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct VulnerabilityHistoryEntry {
    pub id: Uuid,
    pub vulnerability_id: Uuid,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct VulnerabilityFilters {
    pub severity: Option<Severity>,
    pub status: Option<VulnStatus>,
    pub has_fix: Option<bool>,
    pub image_id: Option<Uuid>,
    pub image_name: Option<String>,
    pub cve_id: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct VulnerabilityWithImage {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub vulnerability: Vulnerability,
    pub image_registry: String,
    pub image_repository: String,
    pub image_tag: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    Slack,
    Teams,
}

#[derive(Clone, Debug, Serialize)]
pub struct WebhookConfig {
    pub namespace: String,
    pub name: String,
    pub url: String,
    pub format: WebhookFormat,
    pub scan_completion_enabled: bool,
    pub scan_completion_min_severity: String,
    pub scan_completion_only_fixable: bool,
    pub status_change_enabled: bool,
    pub status_change_min_severity: String,
    pub status_change_only_fixable: bool,
    pub status_change_transitions: Vec<String>,
    pub status_change_include_note_changes: bool,
}
