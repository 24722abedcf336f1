//! In-memory repository implementations backing integration tests. Kept
//! alongside the Postgres implementations rather than under `tests/` so
//! both can implement the same capability traits without duplicating the
//! trait definitions.
//!
//! All five fakes share one [`FakeDb`] the way the Postgres stores all
//! share one connection pool and schema — a vulnerability linked to a scan
//! through `FakeVulnerabilityStore::link_to_scan` is immediately visible to
//! `FakeScanStore::get_vulnerabilities` and to `FakeImageStore::scan_history`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::postgres::{
    ImageStore, ScanStore, SbomRefStore, VulnerabilityStore, WebhookConfigStore,
};
use crate::store::types::{
    Image, ImageFilters, NewScan, Paging, Scan, ScanDetail, ScanFilters, SbomFormat, SbomRef,
    Severity, SeverityCounts, UpdateContext, UpsertVulnerability, Vulnerability,
    VulnerabilityFilters, VulnerabilityHistoryEntry, VulnerabilityWithImage, VulnStatus,
    WebhookConfig,
};

#[derive(Default)]
struct Tables {
    images: Vec<Image>,
    scans: Vec<Scan>,
    vulns: Vec<Vulnerability>,
    /// `scan_id -> vulnerability_id`, the in-memory `scan_vulnerabilities` junction.
    links: HashMap<Uuid, Vec<Uuid>>,
    history: Vec<VulnerabilityHistoryEntry>,
    sbom_refs: HashMap<Uuid, SbomRef>,
    webhook_configs: HashMap<(String, String), WebhookConfig>,
}

/// Shared backing store for every `Fake*Store`. Construct one and hand a
/// clone to each capability wrapper.
#[derive(Clone, Default)]
pub struct FakeDb(Arc<Mutex<Tables>>);

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_store(&self) -> FakeImageStore {
        FakeImageStore(self.clone())
    }

    pub fn scan_store(&self) -> FakeScanStore {
        FakeScanStore(self.clone())
    }

    pub fn vulnerability_store(&self) -> FakeVulnerabilityStore {
        FakeVulnerabilityStore(self.clone())
    }

    pub fn sbom_ref_store(&self) -> FakeSbomRefStore {
        FakeSbomRefStore(self.clone())
    }

    pub fn webhook_config_store(&self) -> FakeWebhookConfigStore {
        FakeWebhookConfigStore(self.clone())
    }
}

pub struct FakeImageStore(FakeDb);

#[async_trait]
impl ImageStore for FakeImageStore {
    async fn upsert_by_nrt(
        &self,
        registry: &str,
        repository: &str,
        tag: &str,
        digest: Option<&str>,
    ) -> Result<Uuid> {
        let mut db = self.0 .0.lock().unwrap();
        if let Some(existing) = db
            .images
            .iter_mut()
            .find(|i| i.registry == registry && i.repository == repository && i.tag == tag)
        {
            if let Some(d) = digest {
                existing.digest = Some(d.to_string());
            }
            existing.updated_at = Utc::now();
            return Ok(existing.id);
        }
        let id = Uuid::new_v4();
        db.images.push(Image {
            id,
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest: digest.map(|d| d.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Image>> {
        Ok(self.0 .0.lock().unwrap().images.iter().find(|i| i.id == id).cloned())
    }

    async fn list(&self, paging: Paging, filters: ImageFilters) -> Result<(Vec<Image>, i64)> {
        let db = self.0 .0.lock().unwrap();
        let filtered: Vec<Image> = db
            .images
            .iter()
            .filter(|i| filters.registry.as_deref().map(|v| v == i.registry).unwrap_or(true))
            .filter(|i| filters.repository.as_deref().map(|v| v == i.repository).unwrap_or(true))
            .filter(|i| filters.tag.as_deref().map(|v| v == i.tag).unwrap_or(true))
            .filter(|i| {
                filters
                    .has_fix
                    .map(|want_fix| image_has_fix(&db, i.id) == want_fix)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        let total = filtered.len() as i64;
        let page = filtered
            .into_iter()
            .skip(paging.offset as usize)
            .take(paging.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn scan_history(
        &self,
        image_id: Uuid,
        paging: Paging,
        has_fix: Option<bool>,
    ) -> Result<(Vec<Scan>, i64)> {
        let db = self.0 .0.lock().unwrap();
        let filtered: Vec<Scan> = db
            .scans
            .iter()
            .filter(|s| s.image_id == image_id)
            .filter(|s| {
                has_fix
                    .map(|want_fix| scan_has_fix(&db, s.id) == want_fix)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        let total = filtered.len() as i64;
        let page = filtered
            .into_iter()
            .skip(paging.offset as usize)
            .take(paging.limit as usize)
            .collect();
        Ok((page, total))
    }
}

fn scan_has_fix(db: &Tables, scan_id: Uuid) -> bool {
    db.links
        .get(&scan_id)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| db.vulns.iter().find(|v| v.id == *id))
                .any(|v| v.fix_version.is_some())
        })
        .unwrap_or(false)
}

fn image_has_fix(db: &Tables, image_id: Uuid) -> bool {
    db.scans
        .iter()
        .filter(|s| s.image_id == image_id)
        .any(|s| scan_has_fix(db, s.id))
}

pub struct FakeScanStore(FakeDb);

#[async_trait]
impl ScanStore for FakeScanStore {
    async fn create(&self, new: NewScan) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.0 .0.lock().unwrap().scans.push(Scan {
            id,
            image_id: new.image_id,
            scan_date: Utc::now(),
            scanner_versions: new.scanner_versions,
            status: "completed".to_string(),
            sla_critical: new.sla_critical,
            sla_high: new.sla_high,
            sla_medium: new.sla_medium,
            sla_low: new.sla_low,
            imagescan_namespace: new.imagescan_namespace,
            imagescan_name: new.imagescan_name,
        });
        Ok(id)
    }

    async fn get_with_details(&self, id: Uuid, has_fix: Option<bool>) -> Result<Option<ScanDetail>> {
        let scan = {
            let db = self.0 .0.lock().unwrap();
            db.scans.iter().find(|s| s.id == id).cloned()
        };
        let Some(scan) = scan else {
            return Ok(None);
        };
        let vulns = self.get_vulnerabilities(id).await?;
        let mut counts = SeverityCounts::default();
        let mut total = 0i64;
        for v in &vulns {
            if let Some(want_fix) = has_fix {
                if v.fix_version.is_some() != want_fix {
                    continue;
                }
            }
            total += 1;
            match v.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
                Severity::Unknown => counts.unknown += 1,
            }
        }
        Ok(Some(ScanDetail { scan, counts, total }))
    }

    async fn list(&self, paging: Paging, filters: ScanFilters) -> Result<(Vec<Scan>, i64)> {
        let db = self.0 .0.lock().unwrap();
        let filtered: Vec<Scan> = db
            .scans
            .iter()
            .filter(|s| filters.image_id.map(|id| id == s.image_id).unwrap_or(true))
            .filter(|s| {
                filters
                    .image_name
                    .as_deref()
                    .map(|name| {
                        db.images
                            .iter()
                            .find(|i| i.id == s.image_id)
                            .map(|i| i.repository == name || format!("{}:{}", i.repository, i.tag) == name)
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .filter(|s| filters.has_fix.map(|want_fix| scan_has_fix(&db, s.id) == want_fix).unwrap_or(true))
            .cloned()
            .collect();
        let total = filtered.len() as i64;
        let page = filtered
            .into_iter()
            .skip(paging.offset as usize)
            .take(paging.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_previous(&self, image_id: Uuid, before: chrono::DateTime<Utc>) -> Result<Option<Scan>> {
        let db = self.0 .0.lock().unwrap();
        Ok(db
            .scans
            .iter()
            .filter(|s| s.image_id == image_id && s.scan_date < before)
            .max_by_key(|s| s.scan_date)
            .cloned())
    }

    async fn get_vulnerabilities(&self, scan_id: Uuid) -> Result<Vec<Vulnerability>> {
        let db = self.0 .0.lock().unwrap();
        let ids = db.links.get(&scan_id).cloned().unwrap_or_default();
        Ok(db.vulns.iter().filter(|v| ids.contains(&v.id)).cloned().collect())
    }
}

pub struct FakeVulnerabilityStore(FakeDb);

#[async_trait]
impl VulnerabilityStore for FakeVulnerabilityStore {
    async fn get_by_unique_key(
        &self,
        cve_id: &str,
        package_name: &str,
        package_version: &str,
    ) -> Result<Option<Vulnerability>> {
        Ok(self
            .0
             .0
            .lock()
            .unwrap()
            .vulns
            .iter()
            .find(|v| v.cve_id == cve_id && v.package_name == package_name && v.package_version == package_version)
            .cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Vulnerability>> {
        Ok(self.0 .0.lock().unwrap().vulns.iter().find(|v| v.id == id).cloned())
    }

    async fn upsert(&self, new: UpsertVulnerability) -> Result<Uuid> {
        let mut db = self.0 .0.lock().unwrap();
        if let Some(existing) = db.vulns.iter_mut().find(|v| {
            v.cve_id == new.cve_id && v.package_name == new.package_name && v.package_version == new.package_version
        }) {
            existing.severity = new.severity;
            existing.package_type = new.package_type;
            existing.fix_version = new.fix_version;
            existing.url = new.url;
            existing.description = new.description;
            existing.last_seen_at = Utc::now();
            existing.imagescan_namespace = new.imagescan_namespace;
            existing.imagescan_name = new.imagescan_name;
            return Ok(existing.id);
        }
        let id = Uuid::new_v4();
        let now = Utc::now();
        db.vulns.push(Vulnerability {
            id,
            cve_id: new.cve_id,
            package_name: new.package_name,
            package_version: new.package_version,
            package_type: new.package_type,
            severity: new.severity,
            fix_version: new.fix_version,
            url: new.url,
            description: new.description,
            status: VulnStatus::Active,
            first_detected_at: now,
            last_seen_at: now,
            remediation_date: None,
            updated_by: None,
            notes: None,
            imagescan_namespace: new.imagescan_namespace,
            imagescan_name: new.imagescan_name,
        });
        Ok(id)
    }

    async fn link_to_scan(&self, scan_id: Uuid, vulnerability_id: Uuid) -> Result<()> {
        let mut db = self.0 .0.lock().unwrap();
        let entry = db.links.entry(scan_id).or_default();
        if !entry.contains(&vulnerability_id) {
            entry.push(vulnerability_id);
        }
        Ok(())
    }

    async fn update(&self, id: Uuid, ctx: &UpdateContext) -> Result<Vulnerability> {
        let mut db = self.0 .0.lock().unwrap();
        let mut history_entry = None;
        {
            let v = db
                .vulns
                .iter_mut()
                .find(|v| v.id == id)
                .ok_or_else(|| Error::NotFound(format!("vulnerability {id}")))?;

            if let Some(status) = ctx.status {
                if status != v.status {
                    history_entry = Some(VulnerabilityHistoryEntry {
                        id: Uuid::new_v4(),
                        vulnerability_id: id,
                        old_value: Some(v.status.as_str().to_string()),
                        new_value: Some(status.as_str().to_string()),
                        changed_by: ctx.changed_by.clone(),
                        changed_at: Utc::now(),
                        notes: ctx.notes.clone(),
                    });
                }
                v.status = status;
                if status == VulnStatus::Fixed {
                    v.remediation_date = Some(Utc::now());
                }
            }
            if let Some(notes) = &ctx.notes {
                v.notes = Some(notes.clone());
            }
            v.updated_by = Some(ctx.changed_by.clone());
        }
        if let Some(entry) = history_entry {
            db.history.push(entry);
        }
        Ok(db.vulns.iter().find(|v| v.id == id).cloned().unwrap())
    }

    async fn bulk_update(&self, ids: &[Uuid], ctx: &UpdateContext) -> Result<Vec<Vulnerability>> {
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.update(*id, ctx).await?);
        }
        Ok(updated)
    }

    async fn mark_as_fixed(&self, ids: &[Uuid]) -> Result<()> {
        let mut db = self.0 .0.lock().unwrap();
        let mut new_history = Vec::new();
        for v in db.vulns.iter_mut().filter(|v| ids.contains(&v.id) && v.status != VulnStatus::Fixed) {
            v.status = VulnStatus::Fixed;
            v.updated_by = Some("system".to_string());
            v.remediation_date = Some(Utc::now());
            new_history.push(VulnerabilityHistoryEntry {
                id: Uuid::new_v4(),
                vulnerability_id: v.id,
                old_value: None,
                new_value: Some(VulnStatus::Fixed.as_str().to_string()),
                changed_by: "system".to_string(),
                changed_at: Utc::now(),
                notes: None,
            });
        }
        db.history.extend(new_history);
        Ok(())
    }

    async fn get_by_cve(&self, cve_id: &str) -> Result<Vec<Vulnerability>> {
        Ok(self
            .0
             .0
            .lock()
            .unwrap()
            .vulns
            .iter()
            .filter(|v| v.cve_id == cve_id)
            .cloned()
            .collect())
    }

    async fn list_with_image_info(
        &self,
        paging: Paging,
        filters: VulnerabilityFilters,
    ) -> Result<(Vec<VulnerabilityWithImage>, i64)> {
        let db = self.0 .0.lock().unwrap();
        let mut rows = Vec::new();
        for v in &db.vulns {
            if let Some(severity) = filters.severity {
                if v.severity != severity {
                    continue;
                }
            }
            if let Some(status) = filters.status {
                if v.status != status {
                    continue;
                }
            }
            if let Some(want_fix) = filters.has_fix {
                if v.fix_version.is_some() != want_fix {
                    continue;
                }
            }
            if let Some(cve_id) = &filters.cve_id {
                if &v.cve_id != cve_id {
                    continue;
                }
            }

            // A vulnerability can be linked to several scans across several
            // images; surface one row per distinct image it currently
            // appears in, the way the Postgres join does.
            let image_ids: Vec<Uuid> = db
                .links
                .iter()
                .filter(|(_, ids)| ids.contains(&v.id))
                .filter_map(|(scan_id, _)| db.scans.iter().find(|s| s.id == *scan_id))
                .map(|s| s.image_id)
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .collect();

            for image_id in image_ids {
                if let Some(want_image_id) = filters.image_id {
                    if image_id != want_image_id {
                        continue;
                    }
                }
                let Some(image) = db.images.iter().find(|i| i.id == image_id) else {
                    continue;
                };
                if let Some(name) = &filters.image_name {
                    if &image.repository != name && &format!("{}:{}", image.repository, image.tag) != name {
                        continue;
                    }
                }
                rows.push(VulnerabilityWithImage {
                    vulnerability: v.clone(),
                    image_registry: image.registry.clone(),
                    image_repository: image.repository.clone(),
                    image_tag: image.tag.clone(),
                });
            }
        }
        rows.sort_by(|a, b| b.vulnerability.last_seen_at.cmp(&a.vulnerability.last_seen_at));
        let total = rows.len() as i64;
        let page = rows
            .into_iter()
            .skip(paging.offset as usize)
            .take(paging.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_history(&self, id: Uuid) -> Result<Vec<VulnerabilityHistoryEntry>> {
        Ok(self
            .0
             .0
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|h| h.vulnerability_id == id)
            .cloned()
            .collect())
    }

    async fn open_severity_breakdown(
        &self,
        has_fix: Option<bool>,
        image_name: Option<&str>,
    ) -> Result<SeverityCounts> {
        let db = self.0 .0.lock().unwrap();
        let mut counts = SeverityCounts::default();
        for v in &db.vulns {
            if matches!(v.status, VulnStatus::Fixed | VulnStatus::Ignored) {
                continue;
            }
            if let Some(want_fix) = has_fix {
                if v.fix_version.is_some() != want_fix {
                    continue;
                }
            }
            if let Some(name) = image_name {
                let in_named_image = db
                    .links
                    .iter()
                    .filter(|(_, ids)| ids.contains(&v.id))
                    .filter_map(|(scan_id, _)| db.scans.iter().find(|s| s.id == *scan_id))
                    .filter_map(|s| db.images.iter().find(|i| i.id == s.image_id))
                    .any(|i| i.repository == name || format!("{}:{}", i.repository, i.tag) == name);
                if !in_named_image {
                    continue;
                }
            }
            match v.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
                Severity::Unknown => counts.unknown += 1,
            }
        }
        Ok(counts)
    }
}

pub struct FakeSbomRefStore(FakeDb);

#[async_trait]
impl SbomRefStore for FakeSbomRefStore {
    async fn insert(
        &self,
        scan_id: Uuid,
        format: SbomFormat,
        version: Option<String>,
        size_bytes: Option<i64>,
    ) -> Result<()> {
        self.0 .0.lock().unwrap().sbom_refs.insert(
            scan_id,
            SbomRef {
                scan_id,
                format,
                version,
                size_bytes,
            },
        );
        Ok(())
    }

    async fn get(&self, scan_id: Uuid) -> Result<Option<SbomRef>> {
        Ok(self.0 .0.lock().unwrap().sbom_refs.get(&scan_id).cloned())
    }
}

pub struct FakeWebhookConfigStore(FakeDb);

#[async_trait]
impl WebhookConfigStore for FakeWebhookConfigStore {
    async fn upsert(&self, cfg: WebhookConfig) -> Result<()> {
        self.0
             .0
            .lock()
            .unwrap()
            .webhook_configs
            .insert((cfg.namespace.clone(), cfg.name.clone()), cfg);
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WebhookConfig>> {
        Ok(self
            .0
             .0
            .lock()
            .unwrap()
            .webhook_configs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.0
             .0
            .lock()
            .unwrap()
            .webhook_configs
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}
