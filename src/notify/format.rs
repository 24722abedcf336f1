//! Pluggable per-destination notification formatters (spec §4.6).

use serde_json::{json, Value};

use crate::notify::events::{ScanCompletedPayload, StatusChangedEvent};

pub trait Formatter: Send + Sync {
    fn format_scan_completed(&self, payload: &ScanCompletedPayload) -> Value;
    fn format_status_changed(&self, event: &StatusChangedEvent) -> Value;
}

pub struct SlackFormatter;

impl Formatter for SlackFormatter {
    fn format_scan_completed(&self, payload: &ScanCompletedPayload) -> Value {
        let text = format!(
            "Scan completed for {} — {} findings ({} critical, {} high, {} medium, {} low)",
            payload.image, payload.total, payload.critical, payload.high, payload.medium, payload.low
        );
        json!({ "text": text, "payload": payload })
    }

    fn format_status_changed(&self, event: &StatusChangedEvent) -> Value {
        let text = format!(
            "{} in {}@{} ({}): {} → {} by {}",
            event.cve_id,
            event.package_name,
            event.package_version,
            event.image_name,
            event.old_status,
            event.new_status,
            event.changed_by
        );
        json!({ "text": text, "payload": event })
    }
}

pub struct TeamsFormatter;

impl Formatter for TeamsFormatter {
    fn format_scan_completed(&self, payload: &ScanCompletedPayload) -> Value {
        let summary = format!("Scan completed for {}", payload.image);
        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "summary": summary,
            "text": summary,
            "payload": payload,
        })
    }

    fn format_status_changed(&self, event: &StatusChangedEvent) -> Value {
        let summary = format!("{} status changed to {}", event.cve_id, event.new_status);
        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "summary": summary,
            "text": summary,
            "payload": event,
        })
    }
}

pub fn formatter_for(format: crate::store::types::WebhookFormat) -> Box<dyn Formatter> {
    match format {
        crate::store::types::WebhookFormat::Slack => Box::new(SlackFormatter),
        crate::store::types::WebhookFormat::Teams => Box::new(TeamsFormatter),
    }
}
