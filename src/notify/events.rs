//! Notification event types and their filter pipelines (spec §4.6).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::store::types::{Severity, VulnStatus};

/// Notification-only severity ordering; `Negligible` never appears on a
/// stored `Vulnerability` (spec §9 open question).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotifySeverity {
    Negligible,
    Low,
    Medium,
    High,
    Critical,
}

impl NotifySeverity {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => NotifySeverity::Critical,
            "high" => NotifySeverity::High,
            "medium" => NotifySeverity::Medium,
            "low" => NotifySeverity::Low,
            _ => NotifySeverity::Negligible,
        }
    }
}

impl From<Severity> for NotifySeverity {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Critical => NotifySeverity::Critical,
            Severity::High => NotifySeverity::High,
            Severity::Medium => NotifySeverity::Medium,
            Severity::Low => NotifySeverity::Low,
            Severity::Unknown => NotifySeverity::Negligible,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ScanCompletedFinding {
    pub cve_id: String,
    pub severity: Severity,
    pub fix_version: Option<String>,
    pub status: VulnStatus,
}

#[derive(Clone, Debug)]
pub struct ScanCompletedEvent {
    pub image: String,
    pub image_digest: Option<String>,
    pub scan_id: Uuid,
    pub scan_url: String,
    pub findings: Vec<ScanCompletedFinding>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScanCompletedPayload {
    pub image: String,
    pub image_digest: Option<String>,
    pub scan_id: Uuid,
    pub scan_url: String,
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Applies the §4.6 `ScanCompleted` filter pipeline. Returns `None` when
/// the filtered finding set is empty (suppress the call entirely).
pub fn filter_scan_completed(
    event: &ScanCompletedEvent,
    min_severity: NotifySeverity,
    only_fixable: bool,
) -> Option<ScanCompletedPayload> {
    let surviving: Vec<&ScanCompletedFinding> = event
        .findings
        .iter()
        .filter(|f| !matches!(f.status, VulnStatus::Ignored | VulnStatus::Accepted))
        .filter(|f| !only_fixable || f.fix_version.is_some())
        .filter(|f| NotifySeverity::from(f.severity) >= min_severity)
        .collect();

    if surviving.is_empty() {
        return None;
    }

    let mut payload = ScanCompletedPayload {
        image: event.image.clone(),
        image_digest: event.image_digest.clone(),
        scan_id: event.scan_id,
        scan_url: event.scan_url.clone(),
        total: surviving.len(),
        critical: 0,
        high: 0,
        medium: 0,
        low: 0,
    };
    for f in surviving {
        match f.severity {
            Severity::Critical => payload.critical += 1,
            Severity::High => payload.high += 1,
            Severity::Medium => payload.medium += 1,
            Severity::Low => payload.low += 1,
            Severity::Unknown => {}
        }
    }
    Some(payload)
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusChangedEvent {
    pub vulnerability_id: Uuid,
    pub cve_id: String,
    pub package_name: String,
    pub package_version: String,
    pub severity: Severity,
    pub fix_version: Option<String>,
    pub old_status: VulnStatus,
    pub new_status: VulnStatus,
    pub changed_by: String,
    pub notes: Option<String>,
    pub image_name: String,
    pub timestamp: DateTime<Utc>,
    /// True when this transition is a notes-only edit (`old_status ==
    /// new_status`), so `include_note_changes` can gate it.
    pub notes_only: bool,
}

/// Applies the §4.6 `StatusChanged` filter pipeline.
pub fn passes_status_changed_filters(
    event: &StatusChangedEvent,
    min_severity: NotifySeverity,
    only_fixable: bool,
    status_transitions: &[String],
    include_note_changes: bool,
) -> bool {
    if event.notes_only && !include_note_changes {
        return false;
    }
    if only_fixable && event.fix_version.is_none() {
        return false;
    }
    if NotifySeverity::from(event.severity) < min_severity {
        return false;
    }
    if !status_transitions.is_empty() {
        let transition = format!("{}→{}", event.old_status, event.new_status);
        if !status_transitions.iter().any(|t| t == &transition) {
            return false;
        }
    }
    true
}
