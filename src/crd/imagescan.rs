//! `ImageScan` Custom Resource Definition
//!
//! Declares a container image and a desired scanning cadence. The
//! reconciler converts this into an owned CronJob (plus, optionally, a
//! one-shot Job triggered by registry-digest polling).

use std::str::FromStr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ResourceRequirements};

/// SBOM document format produced by the scan job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SbomFormat {
    #[default]
    Cyclonedx,
    Spdx,
}

impl std::fmt::Display for SbomFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SbomFormat::Cyclonedx => write!(f, "cyclonedx"),
            SbomFormat::Spdx => write!(f, "spdx"),
        }
    }
}

/// Destination format for a webhook notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFormat {
    Slack,
    Teams,
}

/// Minimum severity gate shared by both webhook event classes. Includes the
/// notification-only `Negligible` sentinel, which sits below `Low` and never
/// appears as a `Vulnerability.severity` value (see spec §9, Open Questions).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MinSeverity {
    Negligible,
    Low,
    Medium,
    High,
    Critical,
}

impl Default for MinSeverity {
    fn default() -> Self {
        MinSeverity::Negligible
    }
}

/// Filters applied to the `ScanCompleted` notification.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanCompletionWebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_severity: MinSeverity,
    #[serde(default)]
    pub only_fixable: bool,
}

/// Filters applied to the `StatusChanged` notification.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeWebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_severity: MinSeverity,
    #[serde(default)]
    pub only_fixable: bool,
    /// Allow-list of `"old->new"` transition strings. Empty means all transitions pass.
    #[serde(default)]
    pub status_transitions: Vec<String>,
    #[serde(default)]
    pub include_note_changes: bool,
}

/// Webhook delivery configuration for both event classes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhooksConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<WebhookFormat>,
    #[serde(default)]
    pub scan_completion: ScanCompletionWebhookConfig,
    #[serde(default)]
    pub status_change: StatusChangeWebhookConfig,
}

/// Per-severity remediation SLA, in days.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlaConfig {
    #[serde(default = "default_sla_critical")]
    pub critical: i32,
    #[serde(default = "default_sla_high")]
    pub high: i32,
    #[serde(default = "default_sla_medium")]
    pub medium: i32,
    #[serde(default = "default_sla_low")]
    pub low: i32,
}

fn default_sla_critical() -> i32 {
    7
}
fn default_sla_high() -> i32 {
    30
}
fn default_sla_medium() -> i32 {
    90
}
fn default_sla_low() -> i32 {
    180
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            critical: default_sla_critical(),
            high: default_sla_high(),
            medium: default_sla_medium(),
            low: default_sla_low(),
        }
    }
}

/// Registry-digest polling configuration (§4.7 "Registry polling mode").
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryPollConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Poll interval in seconds; the reconciler enforces a floor of 60.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret: Option<String>,
}

fn default_poll_interval_secs() -> u32 {
    300
}

fn default_history_limit() -> i32 {
    3
}

fn default_workspace_size() -> String {
    "10Gi".to_string()
}

/// Structured validation error for `ImageScanSpec`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "security.imagescan.io",
    version = "v1alpha1",
    kind = "ImageScan",
    namespaced,
    status = "ImageScanStatus",
    shortname = "iscan",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Suspend","type":"boolean","jsonPath":".spec.suspend"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageScanSpec {
    /// Image reference to scan, e.g. "registry/repo:tag".
    pub image: String,

    /// Cron expression driving the scheduled scan CronJob.
    pub schedule: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,

    #[serde(default)]
    pub sbom_format: SbomFormat,

    #[serde(default)]
    pub suspend: bool,

    #[serde(default = "default_history_limit")]
    pub successful_jobs_history_limit: i32,

    #[serde(default = "default_history_limit")]
    pub failed_jobs_history_limit: i32,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default = "default_workspace_size")]
    pub workspace_size: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhooks: Option<WebhooksConfig>,

    #[serde(default)]
    pub image_pull_secrets: Vec<String>,

    #[serde(default)]
    pub only_fixable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaConfig>,

    #[serde(default)]
    pub registry_poll: RegistryPollConfig,
}

impl ImageScanSpec {
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.image.trim().is_empty() {
            return Err(SpecValidationError {
                field: "image".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if cron::Schedule::from_str(&self.schedule).is_err() {
            return Err(SpecValidationError {
                field: "schedule".to_string(),
                message: format!("not a valid cron expression: {}", self.schedule),
            });
        }
        if self.registry_poll.enabled && self.registry_poll.interval_seconds < 60 {
            return Err(SpecValidationError {
                field: "registryPoll.intervalSeconds".to_string(),
                message: "must be at least 60 seconds".to_string(),
            });
        }
        if let Some(webhooks) = &self.webhooks {
            let needs_url = webhooks.scan_completion.enabled || webhooks.status_change.enabled;
            if needs_url && webhooks.url.is_none() {
                return Err(SpecValidationError {
                    field: "webhooks.url".to_string(),
                    message: "required when a webhook event class is enabled".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Status reported back onto the `ImageScan` resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageScanStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_job_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Last digest observed by the registry poller, recorded on the CR so
    /// controller restarts never re-trigger a spurious immediate scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_observed_digest: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_check_time: Option<String>,
}

impl ImageScanStatus {
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == "Ready" && c.status == "True")
    }
}
