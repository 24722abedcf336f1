//! C6 — Notification dispatcher.

pub mod dispatcher;
pub mod events;
pub mod format;

pub use dispatcher::NotificationDispatcher;
pub use events::{
    filter_scan_completed, passes_status_changed_filters, NotifySeverity, ScanCompletedEvent,
    ScanCompletedFinding, StatusChangedEvent,
};
pub use format::{formatter_for, Formatter};

use crate::store::types::WebhookConfig;

/// Applies a `WebhookConfig` row's filters and, if the event survives,
/// enqueues a delivery in the configured format.
pub fn dispatch_scan_completed(
    dispatcher: &NotificationDispatcher,
    cfg: &WebhookConfig,
    event: &ScanCompletedEvent,
) {
    if !cfg.scan_completion_enabled {
        return;
    }
    let min_severity = NotifySeverity::parse(&cfg.scan_completion_min_severity);
    let Some(payload) = filter_scan_completed(event, min_severity, cfg.scan_completion_only_fixable)
    else {
        return;
    };
    let body = formatter_for(cfg.format).format_scan_completed(&payload);
    dispatcher.enqueue(cfg.url.clone(), body);
}

pub fn dispatch_status_changed(
    dispatcher: &NotificationDispatcher,
    cfg: &WebhookConfig,
    event: &StatusChangedEvent,
) {
    if !cfg.status_change_enabled {
        return;
    }
    let min_severity = NotifySeverity::parse(&cfg.status_change_min_severity);
    if !passes_status_changed_filters(
        event,
        min_severity,
        cfg.status_change_only_fixable,
        &cfg.status_change_transitions,
        cfg.status_change_include_note_changes,
    ) {
        return;
    }
    let body = formatter_for(cfg.format).format_status_changed(event);
    dispatcher.enqueue(cfg.url.clone(), body);
}
