//! Scan repository (C3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::store::types::{NewScan, Scan, ScanDetail, ScanFilters, SeverityCounts, Paging, Vulnerability};

#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn create(&self, new: NewScan) -> Result<Uuid>;

    /// `has_fix` narrows the returned severity breakdown to vulnerabilities
    /// with (`Some(true)`) or without (`Some(false)`) a known fix version.
    async fn get_with_details(&self, id: Uuid, has_fix: Option<bool>) -> Result<Option<ScanDetail>>;

    async fn list(&self, paging: Paging, filters: ScanFilters) -> Result<(Vec<Scan>, i64)>;

    /// Most recent scan of `image_id` strictly before `before`, or `None`
    /// for a first scan.
    async fn get_previous(&self, image_id: Uuid, before: DateTime<Utc>) -> Result<Option<Scan>>;

    async fn get_vulnerabilities(&self, scan_id: Uuid) -> Result<Vec<Vulnerability>>;
}

pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn create(&self, new: NewScan) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO scans (
                id, image_id, scan_date, scanner_versions, status,
                sla_critical, sla_high, sla_medium, sla_low,
                imagescan_namespace, imagescan_name
            )
            VALUES (gen_random_uuid(), $1, now(), $2, 'completed', $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(new.image_id)
        .bind(&new.scanner_versions)
        .bind(new.sla_critical)
        .bind(new.sla_high)
        .bind(new.sla_medium)
        .bind(new.sla_low)
        .bind(&new.imagescan_namespace)
        .bind(&new.imagescan_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<Uuid, _>("id"))
    }

    async fn get_with_details(&self, id: Uuid, has_fix: Option<bool>) -> Result<Option<ScanDetail>> {
        let scan = sqlx::query_as::<_, Scan>(
            "SELECT id, image_id, scan_date, scanner_versions, status, \
                    sla_critical, sla_high, sla_medium, sla_low, \
                    imagescan_namespace, imagescan_name \
             FROM scans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(scan) = scan else {
            return Ok(None);
        };

        let has_fix_clause = match has_fix {
            Some(true) => "AND v.fix_version IS NOT NULL",
            Some(false) => "AND v.fix_version IS NULL",
            None => "",
        };
        let query = format!(
            "SELECT v.severity AS severity, count(*) AS count \
             FROM scan_vulnerabilities sv \
             JOIN vulnerabilities v ON v.id = sv.vulnerability_id \
             WHERE sv.scan_id = $1 {has_fix_clause} \
             GROUP BY v.severity"
        );
        let rows = sqlx::query(&query).bind(id).fetch_all(&self.pool).await?;

        let mut counts = SeverityCounts::default();
        let mut total = 0i64;
        for row in &rows {
            let severity: String = row.get("severity");
            let count: i64 = row.get("count");
            total += count;
            match severity.as_str() {
                "critical" => counts.critical = count,
                "high" => counts.high = count,
                "medium" => counts.medium = count,
                "low" => counts.low = count,
                _ => counts.unknown = count,
            }
        }

        Ok(Some(ScanDetail {
            scan,
            counts,
            total,
        }))
    }

    async fn list(&self, paging: Paging, filters: ScanFilters) -> Result<(Vec<Scan>, i64)> {
        let has_fix_clause = match filters.has_fix {
            Some(true) => {
                "AND EXISTS (SELECT 1 FROM scan_vulnerabilities sv \
                 JOIN vulnerabilities v ON v.id = sv.vulnerability_id \
                 WHERE sv.scan_id = scans.id AND v.fix_version IS NOT NULL)"
            }
            Some(false) => {
                "AND NOT EXISTS (SELECT 1 FROM scan_vulnerabilities sv \
                 JOIN vulnerabilities v ON v.id = sv.vulnerability_id \
                 WHERE sv.scan_id = scans.id AND v.fix_version IS NOT NULL)"
            }
            None => "",
        };

        let image_name_clause = if filters.image_name.is_some() {
            "AND EXISTS (SELECT 1 FROM images i WHERE i.id = scans.image_id \
             AND (i.repository = $2 OR i.repository || ':' || i.tag = $2))"
        } else {
            "AND ($2::text IS NULL)"
        };

        let query = format!(
            "SELECT id, image_id, scan_date, scanner_versions, status, \
                    sla_critical, sla_high, sla_medium, sla_low, \
                    imagescan_namespace, imagescan_name \
             FROM scans \
             WHERE ($1::uuid IS NULL OR image_id = $1) \
               {image_name_clause} \
               {has_fix_clause} \
             ORDER BY scan_date DESC LIMIT $3 OFFSET $4"
        );
        let count_query = format!(
            "SELECT count(*) AS count FROM scans \
             WHERE ($1::uuid IS NULL OR image_id = $1) \
               {image_name_clause} \
               {has_fix_clause}"
        );

        let rows = sqlx::query_as::<_, Scan>(&query)
            .bind(filters.image_id)
            .bind(&filters.image_name)
            .bind(paging.limit)
            .bind(paging.offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query(&count_query)
            .bind(filters.image_id)
            .bind(&filters.image_name)
            .fetch_one(&self.pool)
            .await?
            .get("count");

        Ok((rows, total))
    }

    async fn get_previous(&self, image_id: Uuid, before: DateTime<Utc>) -> Result<Option<Scan>> {
        let scan = sqlx::query_as::<_, Scan>(
            "SELECT id, image_id, scan_date, scanner_versions, status, \
                    sla_critical, sla_high, sla_medium, sla_low, \
                    imagescan_namespace, imagescan_name \
             FROM scans WHERE image_id = $1 AND scan_date < $2 \
             ORDER BY scan_date DESC LIMIT 1",
        )
        .bind(image_id)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?;
        Ok(scan)
    }

    async fn get_vulnerabilities(&self, scan_id: Uuid) -> Result<Vec<Vulnerability>> {
        let rows = sqlx::query_as::<_, Vulnerability>(
            "SELECT v.id, v.cve_id, v.package_name, v.package_version, v.package_type, \
                    v.severity, v.fix_version, v.url, v.description, v.status, \
                    v.first_detected_at, v.last_seen_at, v.remediation_date, \
                    v.updated_by, v.notes, v.imagescan_namespace, v.imagescan_name \
             FROM scan_vulnerabilities sv \
             JOIN vulnerabilities v ON v.id = sv.vulnerability_id \
             WHERE sv.scan_id = $1 \
             ORDER BY CASE v.severity \
                WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 \
                WHEN 'low' THEN 3 ELSE 4 END, v.cve_id",
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
