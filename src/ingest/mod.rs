//! C4 — Ingest pipeline, the hot path (spec §4.4).

pub mod diff;
pub mod envelope;

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::imageref::ImageRef;
use crate::ingest::diff::{compute_diff, ScanDiff};
use crate::ingest::envelope::{Finding, NormalizedFinding, ScanIngest};
use crate::notify::{dispatch_scan_completed, NotificationDispatcher, ScanCompletedEvent, ScanCompletedFinding};
use crate::store::types::{NewScan, UpdateContext, UpsertVulnerability, VulnStatus};
use crate::store::Repositories;

const DEFAULT_SLA_CRITICAL: i32 = 7;
const DEFAULT_SLA_HIGH: i32 = 30;
const DEFAULT_SLA_MEDIUM: i32 = 90;
const DEFAULT_SLA_LOW: i32 = 180;

pub struct IngestOutcome {
    pub scan_id: Uuid,
    pub image_id: Uuid,
    pub diff: ScanDiff,
}

pub struct IngestPipeline {
    repos: Repositories,
    dispatcher: NotificationDispatcher,
    api_base_url: String,
}

impl IngestPipeline {
    pub fn new(repos: Repositories, dispatcher: NotificationDispatcher, api_base_url: String) -> Self {
        Self {
            repos,
            dispatcher,
            api_base_url,
        }
    }

    pub async fn ingest(&self, envelope: ScanIngest) -> Result<IngestOutcome> {
        // Step 1: parse image reference.
        let image_ref = ImageRef::parse(&envelope.image);

        // Step 2: upsert Image, capture image_id.
        let image_id = self
            .repos
            .images
            .upsert_by_nrt(
                &image_ref.registry,
                &image_ref.repository,
                &image_ref.tag,
                envelope.image_digest.as_deref(),
            )
            .await?;

        // Step 3: create Scan row, snapshotting SLA values.
        let sla = envelope.sla_config.as_ref();
        let new_scan = NewScan {
            image_id,
            scanner_versions: serde_json::json!({
                "name": envelope.grype_result.descriptor.name,
                "version": envelope.grype_result.descriptor.version,
            }),
            sla_critical: sla.and_then(|s| s.critical).unwrap_or(DEFAULT_SLA_CRITICAL),
            sla_high: sla.and_then(|s| s.high).unwrap_or(DEFAULT_SLA_HIGH),
            sla_medium: sla.and_then(|s| s.medium).unwrap_or(DEFAULT_SLA_MEDIUM),
            sla_low: sla.and_then(|s| s.low).unwrap_or(DEFAULT_SLA_LOW),
            imagescan_namespace: envelope.imagescan_context.as_ref().map(|c| c.namespace.clone()),
            imagescan_name: envelope.imagescan_context.as_ref().map(|c| c.name.clone()),
        };
        // Captured before `create` so the boundary strictly precedes the
        // new scan's own `scan_date` — otherwise `get_previous` would
        // return the scan just created as its own "previous" scan.
        let scan_created_at = Utc::now();
        let scan_id = self.repos.scans.create(new_scan).await?;

        // Step 4: persist the SBOM bytes; a failure here aborts the ingest.
        let sbom_bytes = serde_json::to_vec(&envelope.sbom).map_err(Error::SerializationError)?;
        let size_bytes = sbom_bytes.len() as i64;
        self.repos
            .sbom_objects
            .put(scan_id, sbom_bytes)
            .await
            .map_err(|_| Error::StorageUnavailable("sbom object store write failed".to_string()))?;
        self.repos
            .sboms
            .insert(
                scan_id,
                envelope.sbom_format,
                envelope.sbom_version.clone(),
                Some(size_bytes),
            )
            .await?;

        // Step 5: normalize and upsert each finding.
        let findings = envelope.grype_result.findings();
        let mut reverted: HashSet<NormalizedFinding> = HashSet::new();
        let mut linked_vulnerability_ids = Vec::with_capacity(findings.len());

        let imagescan_context = envelope.imagescan_context.as_ref();

        for finding in &findings {
            match self
                .ingest_one_finding(finding, scan_id, imagescan_context, &mut reverted)
                .await
            {
                Ok(vuln_id) => linked_vulnerability_ids.push(vuln_id),
                Err(e) => {
                    tracing::warn!(
                        cve_id = %finding.key.cve_id,
                        package = %finding.key.package_name,
                        error = %e,
                        "failed to ingest finding, continuing"
                    );
                }
            }
        }

        // Step 6: auto-fix sweep against the immediately previous scan.
        let current_keys: Vec<NormalizedFinding> = findings.iter().map(|f| f.key.clone()).collect();
        let previous_scan = self.repos.scans.get_previous(image_id, scan_created_at).await?;

        let (previous_keys, fixed_ids) = if let Some(previous) = &previous_scan {
            let previous_vulns = self.repos.scans.get_vulnerabilities(previous.id).await?;
            let previous_keys: Vec<NormalizedFinding> = previous_vulns
                .iter()
                .map(|v| NormalizedFinding {
                    cve_id: v.cve_id.clone(),
                    package_name: v.package_name.clone(),
                    package_version: v.package_version.clone(),
                })
                .collect();

            let current_set: HashSet<&NormalizedFinding> = current_keys.iter().collect();
            let mut fixed_ids = Vec::new();
            for v in &previous_vulns {
                let key = NormalizedFinding {
                    cve_id: v.cve_id.clone(),
                    package_name: v.package_name.clone(),
                    package_version: v.package_version.clone(),
                };
                if !current_set.contains(&key) {
                    fixed_ids.push(v.id);
                }
            }
            (previous_keys, fixed_ids)
        } else {
            (Vec::new(), Vec::new())
        };

        self.repos.vulnerabilities.mark_as_fixed(&fixed_ids).await?;

        // Step 7: build the diff.
        let diff = compute_diff(&previous_keys, &current_keys);

        // Step 8: detached notification dispatch.
        self.dispatch_scan_completed(&envelope, &image_ref, scan_id, &linked_vulnerability_ids)
            .await;

        Ok(IngestOutcome {
            scan_id,
            image_id,
            diff,
        })
    }

    async fn ingest_one_finding(
        &self,
        finding: &Finding,
        scan_id: Uuid,
        imagescan_context: Option<&crate::ingest::envelope::ImageScanContext>,
        reverted: &mut HashSet<NormalizedFinding>,
    ) -> Result<Uuid> {
        let existing = self
            .repos
            .vulnerabilities
            .get_by_unique_key(
                &finding.key.cve_id,
                &finding.key.package_name,
                &finding.key.package_version,
            )
            .await?;

        // Step 5b: revert a manually-fixed finding the scanner still sees,
        // at most once per ingest for this key.
        if let Some(existing) = &existing {
            if existing.status == VulnStatus::Fixed
                && existing.updated_by.as_deref() != Some("system")
                && !reverted.contains(&finding.key)
            {
                let ctx = UpdateContext {
                    changed_by: "system".to_string(),
                    status: Some(VulnStatus::Active),
                    notes: None,
                };
                self.repos.vulnerabilities.update(existing.id, &ctx).await?;
                reverted.insert(finding.key.clone());
            }
        }

        // Step 5c: upsert, preserving first_detected_at.
        let vuln_id = self
            .repos
            .vulnerabilities
            .upsert(UpsertVulnerability {
                cve_id: finding.key.cve_id.clone(),
                package_name: finding.key.package_name.clone(),
                package_version: finding.key.package_version.clone(),
                package_type: finding.package_type.clone(),
                severity: finding.severity,
                fix_version: finding.fix_version.clone(),
                url: finding.url.clone(),
                description: finding.description.clone(),
                imagescan_namespace: imagescan_context.map(|c| c.namespace.clone()),
                imagescan_name: imagescan_context.map(|c| c.name.clone()),
            })
            .await?;

        // Step 5d: link to scan, idempotent.
        self.repos.vulnerabilities.link_to_scan(scan_id, vuln_id).await?;

        Ok(vuln_id)
    }

    async fn dispatch_scan_completed(
        &self,
        envelope: &ScanIngest,
        image_ref: &ImageRef,
        scan_id: Uuid,
        vulnerability_ids: &[Uuid],
    ) {
        let Some(cfg) = &envelope.webhook_config else {
            return;
        };

        let mut findings = Vec::with_capacity(vulnerability_ids.len());
        for id in vulnerability_ids {
            if let Ok(Some(v)) = self.repos.vulnerabilities.get_by_id(*id).await {
                findings.push(ScanCompletedFinding {
                    cve_id: v.cve_id,
                    severity: v.severity,
                    fix_version: v.fix_version,
                    status: v.status,
                });
            }
        }

        let event = ScanCompletedEvent {
            image: image_ref.canonical(),
            image_digest: envelope.image_digest.clone(),
            scan_id,
            scan_url: format!("{}/api/v1/scans/{}", self.api_base_url, scan_id),
            findings,
        };

        let webhook_config = crate::store::types::WebhookConfig {
            namespace: String::new(),
            name: String::new(),
            url: cfg.url.clone(),
            format: cfg.format,
            scan_completion_enabled: true,
            scan_completion_min_severity: cfg
                .min_severity
                .clone()
                .unwrap_or_else(|| "negligible".to_string()),
            scan_completion_only_fixable: cfg.only_fixable.unwrap_or(false),
            status_change_enabled: false,
            status_change_min_severity: "negligible".to_string(),
            status_change_only_fixable: false,
            status_change_transitions: Vec::new(),
            status_change_include_note_changes: false,
        };

        dispatch_scan_completed(&self.dispatcher, &webhook_config, &event);
    }
}
