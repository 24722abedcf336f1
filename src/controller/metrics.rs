//! Prometheus metrics for the imagescan-operator control plane.
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `imagescan_reconcile_duration_seconds` (histogram): reconcile duration by controller.
//! - `imagescan_reconcile_errors_total` (counter): reconcile errors by controller and kind.
//! - `imagescan_ingest_duration_seconds` (histogram): ingest pipeline duration.
//! - `imagescan_ingest_findings_total` (counter): findings ingested by severity.
//! - `imagescan_ingest_errors_total` (counter): per-finding ingest failures.
//! - `imagescan_notifications_total` (counter): webhook deliveries by event type and outcome.
//! - `imagescan_registry_poll_total` (counter): registry digest polls by outcome.
//! - `imagescan_open_vulnerabilities` (gauge): open (non-fixed, non-ignored) vulnerabilities by namespace/name/severity.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::{text::encode, EncodeLabelSet};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for reconcile metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub controller: String,
}

/// Labels for reconcile error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    pub kind: String,
}

/// Labels for per-severity ingest metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SeverityLabels {
    pub severity: String,
}

/// Labels for the open-vulnerability gauge, scoped to one ImageScan.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ImageSeverityLabels {
    pub namespace: String,
    pub name: String,
    pub severity: String,
}

/// Labels for notification delivery outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NotificationLabels {
    pub event: String,
    pub outcome: String,
}

/// Labels for registry poll outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RegistryPollLabels {
    pub outcome: String,
}

pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }
    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static INGEST_DURATION_SECONDS: Lazy<Histogram> =
    Lazy::new(|| Histogram::new(exponential_buckets(0.01, 2.0, 16)));

pub static INGEST_FINDINGS_TOTAL: Lazy<Family<SeverityLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static INGEST_ERRORS_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

pub static NOTIFICATIONS_TOTAL: Lazy<Family<NotificationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REGISTRY_POLL_TOTAL: Lazy<Family<RegistryPollLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static OPEN_VULNERABILITIES: Lazy<Family<ImageSeverityLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "imagescan_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "imagescan_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "imagescan_ingest_duration_seconds",
        "Duration of the ingest pipeline in seconds",
        INGEST_DURATION_SECONDS.clone(),
    );
    registry.register(
        "imagescan_ingest_findings_total",
        "Total findings ingested, by severity",
        INGEST_FINDINGS_TOTAL.clone(),
    );
    registry.register(
        "imagescan_ingest_errors_total",
        "Total per-finding ingest failures",
        INGEST_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "imagescan_notifications_total",
        "Webhook deliveries attempted, by event type and outcome",
        NOTIFICATIONS_TOTAL.clone(),
    );
    registry.register(
        "imagescan_registry_poll_total",
        "Registry digest polls, by outcome",
        REGISTRY_POLL_TOTAL.clone(),
    );
    registry.register(
        "imagescan_open_vulnerabilities",
        "Open (non-fixed, non-ignored) vulnerabilities by image and severity",
        OPEN_VULNERABILITIES.clone(),
    );

    registry
});

pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    RECONCILE_DURATION_SECONDS
        .get_or_create(&ReconcileLabels {
            controller: controller.to_string(),
        })
        .observe(seconds);
}

pub fn inc_reconcile_error(controller: &str, kind: &str) {
    RECONCILE_ERRORS_TOTAL
        .get_or_create(&ErrorLabels {
            controller: controller.to_string(),
            kind: kind.to_string(),
        })
        .inc();
}

pub fn observe_ingest_duration_seconds(seconds: f64) {
    INGEST_DURATION_SECONDS.observe(seconds);
}

pub fn inc_ingest_finding(severity: &str) {
    INGEST_FINDINGS_TOTAL
        .get_or_create(&SeverityLabels {
            severity: severity.to_string(),
        })
        .inc();
}

pub fn inc_ingest_error() {
    INGEST_ERRORS_TOTAL.inc();
}

pub fn inc_notification(event: &str, outcome: &str) {
    NOTIFICATIONS_TOTAL
        .get_or_create(&NotificationLabels {
            event: event.to_string(),
            outcome: outcome.to_string(),
        })
        .inc();
}

pub fn inc_registry_poll(outcome: &str) {
    REGISTRY_POLL_TOTAL
        .get_or_create(&RegistryPollLabels {
            outcome: outcome.to_string(),
        })
        .inc();
}

pub fn set_open_vulnerabilities(namespace: &str, name: &str, severity: &str, count: i64) {
    OPEN_VULNERABILITIES
        .get_or_create(&ImageSeverityLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            severity: severity.to_string(),
        })
        .set(count);
}

/// Render the registry in Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_duration_observed() {
        observe_reconcile_duration_seconds("imagescan", 0.05);
    }

    #[test]
    fn test_reconcile_error_counter() {
        inc_reconcile_error("imagescan", "validation");
    }

    #[test]
    fn test_ingest_metrics() {
        observe_ingest_duration_seconds(1.2);
        inc_ingest_finding("critical");
        inc_ingest_error();
    }

    #[test]
    fn test_notification_and_poll_counters() {
        inc_notification("scan_completed", "delivered");
        inc_registry_poll("unchanged");
    }

    #[test]
    fn test_open_vulnerabilities_gauge() {
        set_open_vulnerabilities("default", "nginx", "high", 3);
    }

    #[test]
    fn test_encode_metrics_produces_text() {
        inc_reconcile_error("imagescan", "kube");
        let text = encode_metrics().expect("encode succeeds");
        assert!(text.contains("imagescan_reconcile_errors_total"));
    }
}
