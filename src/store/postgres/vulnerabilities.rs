//! Vulnerability repository (C3) — the lifecycle-tracked finding table.
//!
//! `upsert` preserves `first_detected_at` across scans of the same
//! (cve, package, version) key; `update`/`bulk_update` each write one
//! history row per observed field change (spec §4.5).

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::store::types::{
    SeverityCounts, UpdateContext, UpsertVulnerability, Vulnerability, VulnerabilityFilters,
    VulnerabilityHistoryEntry, VulnerabilityWithImage, Paging,
};

#[async_trait]
pub trait VulnerabilityStore: Send + Sync {
    async fn get_by_unique_key(
        &self,
        cve_id: &str,
        package_name: &str,
        package_version: &str,
    ) -> Result<Option<Vulnerability>>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Vulnerability>>;

    /// Insert or refresh a finding. Preserves `first_detected_at` and any
    /// manually-set `status`/`notes` on conflict; refreshes `last_seen_at`,
    /// `severity`, `fix_version`, `url`, `description`.
    async fn upsert(&self, new: UpsertVulnerability) -> Result<Uuid>;

    /// Associate a vulnerability with a scan. Idempotent — calling twice
    /// for the same pair is a no-op.
    async fn link_to_scan(&self, scan_id: Uuid, vulnerability_id: Uuid) -> Result<()>;

    async fn update(&self, id: Uuid, ctx: &UpdateContext) -> Result<Vulnerability>;

    async fn bulk_update(&self, ids: &[Uuid], ctx: &UpdateContext) -> Result<Vec<Vulnerability>>;

    /// Force `status = fixed` for the given ids without recording a
    /// history row per-field — used by the auto-fix sweep (spec §4.4
    /// step 7), which already gets its own scan-diff accounting.
    async fn mark_as_fixed(&self, ids: &[Uuid]) -> Result<()>;

    async fn get_by_cve(&self, cve_id: &str) -> Result<Vec<Vulnerability>>;

    async fn list_with_image_info(
        &self,
        paging: Paging,
        filters: VulnerabilityFilters,
    ) -> Result<(Vec<VulnerabilityWithImage>, i64)>;

    /// Newest-first audit trail for one vulnerability.
    async fn get_history(&self, id: Uuid) -> Result<Vec<VulnerabilityHistoryEntry>>;

    /// Severity breakdown of open (non-`fixed`, non-`ignored`) vulnerabilities,
    /// optionally narrowed by fixability or image name, for the dashboard
    /// `GET /metrics` endpoint.
    async fn open_severity_breakdown(
        &self,
        has_fix: Option<bool>,
        image_name: Option<&str>,
    ) -> Result<SeverityCounts>;
}

pub struct PgVulnerabilityStore {
    pool: PgPool,
}

impl PgVulnerabilityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn record_history(
        &self,
        vulnerability_id: Uuid,
        old_value: Option<&str>,
        new_value: Option<&str>,
        changed_by: &str,
        notes: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO vulnerability_history \
                (id, vulnerability_id, old_value, new_value, changed_by, changed_at, notes) \
             VALUES (gen_random_uuid(), $1, $2, $3, $4, now(), $5)",
        )
        .bind(vulnerability_id)
        .bind(old_value)
        .bind(new_value)
        .bind(changed_by)
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_update(&self, id: Uuid, ctx: &UpdateContext) -> Result<Vulnerability> {
        let current = sqlx::query_as::<_, Vulnerability>(
            "SELECT id, cve_id, package_name, package_version, package_type, severity, \
                    fix_version, url, description, status, first_detected_at, last_seen_at, \
                    remediation_date, updated_by, notes, imagescan_namespace, imagescan_name \
             FROM vulnerabilities WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if let Some(new_status) = ctx.status {
            if new_status != current.status {
                self.record_history(
                    id,
                    Some(current.status.as_str()),
                    Some(new_status.as_str()),
                    &ctx.changed_by,
                    ctx.notes.as_deref(),
                )
                .await?;
            }
        }
        if let Some(new_notes) = &ctx.notes {
            if current.notes.as_deref() != Some(new_notes.as_str()) {
                self.record_history(
                    id,
                    current.notes.as_deref(),
                    Some(new_notes.as_str()),
                    &ctx.changed_by,
                    None,
                )
                .await?;
            }
        }

        let remediation_date_clause = match ctx.status {
            Some(crate::store::types::VulnStatus::Fixed) => "now()",
            _ => "remediation_date",
        };
        let query = format!(
            "UPDATE vulnerabilities SET \
                status = COALESCE($2, status), \
                notes = COALESCE($3, notes), \
                updated_by = $4, \
                remediation_date = {remediation_date_clause} \
             WHERE id = $1 \
             RETURNING id, cve_id, package_name, package_version, package_type, severity, \
                       fix_version, url, description, status, first_detected_at, last_seen_at, \
                       remediation_date, updated_by, notes, imagescan_namespace, imagescan_name"
        );
        let updated = sqlx::query_as::<_, Vulnerability>(&query)
            .bind(id)
            .bind(ctx.status)
            .bind(&ctx.notes)
            .bind(&ctx.changed_by)
            .fetch_one(&self.pool)
            .await?;
        Ok(updated)
    }
}

#[async_trait]
impl VulnerabilityStore for PgVulnerabilityStore {
    async fn get_by_unique_key(
        &self,
        cve_id: &str,
        package_name: &str,
        package_version: &str,
    ) -> Result<Option<Vulnerability>> {
        let row = sqlx::query_as::<_, Vulnerability>(
            "SELECT id, cve_id, package_name, package_version, package_type, severity, \
                    fix_version, url, description, status, first_detected_at, last_seen_at, \
                    remediation_date, updated_by, notes, imagescan_namespace, imagescan_name \
             FROM vulnerabilities \
             WHERE cve_id = $1 AND package_name = $2 AND package_version = $3",
        )
        .bind(cve_id)
        .bind(package_name)
        .bind(package_version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Vulnerability>> {
        let row = sqlx::query_as::<_, Vulnerability>(
            "SELECT id, cve_id, package_name, package_version, package_type, severity, \
                    fix_version, url, description, status, first_detected_at, last_seen_at, \
                    remediation_date, updated_by, notes, imagescan_namespace, imagescan_name \
             FROM vulnerabilities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn upsert(&self, new: UpsertVulnerability) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO vulnerabilities (
                id, cve_id, package_name, package_version, package_type, severity,
                fix_version, url, description, status,
                first_detected_at, last_seen_at,
                imagescan_namespace, imagescan_name
            )
            VALUES (
                gen_random_uuid(), $1, $2, $3, $4, $5,
                $6, $7, $8, 'active',
                now(), now(),
                $9, $10
            )
            ON CONFLICT (cve_id, package_name, package_version) DO UPDATE
                SET severity = EXCLUDED.severity,
                    package_type = EXCLUDED.package_type,
                    fix_version = EXCLUDED.fix_version,
                    url = EXCLUDED.url,
                    description = EXCLUDED.description,
                    last_seen_at = now(),
                    imagescan_namespace = EXCLUDED.imagescan_namespace,
                    imagescan_name = EXCLUDED.imagescan_name
            RETURNING id
            "#,
        )
        .bind(&new.cve_id)
        .bind(&new.package_name)
        .bind(&new.package_version)
        .bind(&new.package_type)
        .bind(new.severity)
        .bind(&new.fix_version)
        .bind(&new.url)
        .bind(&new.description)
        .bind(&new.imagescan_namespace)
        .bind(&new.imagescan_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<Uuid, _>("id"))
    }

    async fn link_to_scan(&self, scan_id: Uuid, vulnerability_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_vulnerabilities (scan_id, vulnerability_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(scan_id)
        .bind(vulnerability_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, id: Uuid, ctx: &UpdateContext) -> Result<Vulnerability> {
        self.apply_update(id, ctx).await
    }

    async fn bulk_update(&self, ids: &[Uuid], ctx: &UpdateContext) -> Result<Vec<Vulnerability>> {
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            updated.push(self.apply_update(*id, ctx).await?);
        }
        Ok(updated)
    }

    async fn mark_as_fixed(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE vulnerabilities SET status = 'fixed', remediation_date = now() \
             WHERE id = ANY($1) AND status != 'fixed'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_cve(&self, cve_id: &str) -> Result<Vec<Vulnerability>> {
        let rows = sqlx::query_as::<_, Vulnerability>(
            "SELECT id, cve_id, package_name, package_version, package_type, severity, \
                    fix_version, url, description, status, first_detected_at, last_seen_at, \
                    remediation_date, updated_by, notes, imagescan_namespace, imagescan_name \
             FROM vulnerabilities WHERE cve_id = $1 ORDER BY last_seen_at DESC",
        )
        .bind(cve_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_with_image_info(
        &self,
        paging: Paging,
        filters: VulnerabilityFilters,
    ) -> Result<(Vec<VulnerabilityWithImage>, i64)> {
        let has_fix_clause = match filters.has_fix {
            Some(true) => "AND v.fix_version IS NOT NULL",
            Some(false) => "AND v.fix_version IS NULL",
            None => "",
        };
        let list_image_name_clause = if filters.image_name.is_some() {
            "AND (i.repository = $7 OR i.repository || ':' || i.tag = $7)"
        } else {
            "AND ($7::text IS NULL)"
        };
        let count_image_name_clause = if filters.image_name.is_some() {
            "AND (i.repository = $5 OR i.repository || ':' || i.tag = $5)"
        } else {
            "AND ($5::text IS NULL)"
        };

        let query = format!(
            "SELECT v.id, v.cve_id, v.package_name, v.package_version, v.package_type, \
                    v.severity, v.fix_version, v.url, v.description, v.status, \
                    v.first_detected_at, v.last_seen_at, v.remediation_date, \
                    v.updated_by, v.notes, v.imagescan_namespace, v.imagescan_name, \
                    i.registry AS image_registry, i.repository AS image_repository, \
                    i.tag AS image_tag \
             FROM vulnerabilities v \
             JOIN scan_vulnerabilities sv ON sv.vulnerability_id = v.id \
             JOIN scans s ON s.id = sv.scan_id \
             JOIN images i ON i.id = s.image_id \
             WHERE ($1::text IS NULL OR v.severity = $1) \
               AND ($2::text IS NULL OR v.status = $2) \
               AND ($3::uuid IS NULL OR i.id = $3) \
               AND ($4::text IS NULL OR v.cve_id = $4) \
               {has_fix_clause} \
               {list_image_name_clause} \
             GROUP BY v.id, i.registry, i.repository, i.tag \
             ORDER BY CASE v.severity \
                WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 \
                WHEN 'low' THEN 3 ELSE 4 END, v.last_seen_at DESC \
             LIMIT $5 OFFSET $6"
        );
        let count_query = format!(
            "SELECT count(DISTINCT v.id) AS count \
             FROM vulnerabilities v \
             JOIN scan_vulnerabilities sv ON sv.vulnerability_id = v.id \
             JOIN scans s ON s.id = sv.scan_id \
             JOIN images i ON i.id = s.image_id \
             WHERE ($1::text IS NULL OR v.severity = $1) \
               AND ($2::text IS NULL OR v.status = $2) \
               AND ($3::uuid IS NULL OR i.id = $3) \
               AND ($4::text IS NULL OR v.cve_id = $4) \
               {has_fix_clause} \
               {count_image_name_clause}"
        );

        let severity = filters.severity.map(|s| s.as_str().to_string());
        let status = filters.status.map(|s| s.as_str().to_string());

        let rows = sqlx::query_as::<_, VulnerabilityWithImage>(&query)
            .bind(&severity)
            .bind(&status)
            .bind(filters.image_id)
            .bind(&filters.cve_id)
            .bind(paging.limit)
            .bind(paging.offset)
            .bind(&filters.image_name)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query(&count_query)
            .bind(&severity)
            .bind(&status)
            .bind(filters.image_id)
            .bind(&filters.cve_id)
            .bind(&filters.image_name)
            .fetch_one(&self.pool)
            .await?
            .get("count");

        Ok((rows, total))
    }

    async fn get_history(&self, id: Uuid) -> Result<Vec<VulnerabilityHistoryEntry>> {
        let rows = sqlx::query_as::<_, VulnerabilityHistoryEntry>(
            "SELECT id, vulnerability_id, old_value, new_value, changed_by, changed_at, notes \
             FROM vulnerability_history \
             WHERE vulnerability_id = $1 \
             ORDER BY changed_at DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn open_severity_breakdown(
        &self,
        has_fix: Option<bool>,
        image_name: Option<&str>,
    ) -> Result<SeverityCounts> {
        let has_fix_clause = match has_fix {
            Some(true) => "AND v.fix_version IS NOT NULL",
            Some(false) => "AND v.fix_version IS NULL",
            None => "",
        };
        let image_name_clause = if image_name.is_some() {
            "AND (i.repository = $1 OR i.repository || ':' || i.tag = $1)"
        } else {
            "AND ($1::text IS NULL)"
        };

        let query = format!(
            "SELECT v.severity AS severity, count(DISTINCT v.id) AS count \
             FROM vulnerabilities v \
             JOIN scan_vulnerabilities sv ON sv.vulnerability_id = v.id \
             JOIN scans s ON s.id = sv.scan_id \
             JOIN images i ON i.id = s.image_id \
             WHERE v.status NOT IN ('fixed', 'ignored') \
               {image_name_clause} \
               {has_fix_clause} \
             GROUP BY v.severity"
        );

        let rows = sqlx::query(&query)
            .bind(image_name)
            .fetch_all(&self.pool)
            .await?;

        let mut counts = SeverityCounts::default();
        for row in &rows {
            let severity: String = row.get("severity");
            let count: i64 = row.get("count");
            match severity.as_str() {
                "critical" => counts.critical = count,
                "high" => counts.high = count,
                "medium" => counts.medium = count,
                "low" => counts.low = count,
                _ => counts.unknown = count,
            }
        }
        Ok(counts)
    }
}
