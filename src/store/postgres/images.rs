//! Image repository (C3).

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::store::types::{Image, ImageFilters, Paging, Scan};

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Upsert keyed on (registry, repository, tag) — the "nrt" triple.
    /// `digest` is updated in place when supplied; the row's id is stable
    /// across calls for the same triple.
    async fn upsert_by_nrt(
        &self,
        registry: &str,
        repository: &str,
        tag: &str,
        digest: Option<&str>,
    ) -> Result<Uuid>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Image>>;

    async fn list(&self, paging: Paging, filters: ImageFilters) -> Result<(Vec<Image>, i64)>;

    async fn scan_history(
        &self,
        image_id: Uuid,
        paging: Paging,
        has_fix: Option<bool>,
    ) -> Result<(Vec<Scan>, i64)>;
}

pub struct PgImageStore {
    pool: PgPool,
}

impl PgImageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageStore for PgImageStore {
    async fn upsert_by_nrt(
        &self,
        registry: &str,
        repository: &str,
        tag: &str,
        digest: Option<&str>,
    ) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO images (id, registry, repository, tag, digest, created_at, updated_at)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, now(), now())
            ON CONFLICT (registry, repository, tag) DO UPDATE
                SET digest = COALESCE(EXCLUDED.digest, images.digest),
                    updated_at = now()
            RETURNING id
            "#,
        )
        .bind(registry)
        .bind(repository)
        .bind(tag)
        .bind(digest)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<Uuid, _>("id"))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Image>> {
        let image = sqlx::query_as::<_, Image>(
            "SELECT id, registry, repository, tag, digest, created_at, updated_at \
             FROM images WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(image)
    }

    async fn list(&self, paging: Paging, filters: ImageFilters) -> Result<(Vec<Image>, i64)> {
        let has_fix_clause = match filters.has_fix {
            Some(true) => {
                "AND EXISTS (SELECT 1 FROM scan_vulnerabilities sv \
                 JOIN scans s ON s.id = sv.scan_id \
                 JOIN vulnerabilities v ON v.id = sv.vulnerability_id \
                 WHERE s.image_id = images.id AND v.fix_version IS NOT NULL)"
            }
            Some(false) => {
                "AND NOT EXISTS (SELECT 1 FROM scan_vulnerabilities sv \
                 JOIN scans s ON s.id = sv.scan_id \
                 JOIN vulnerabilities v ON v.id = sv.vulnerability_id \
                 WHERE s.image_id = images.id AND v.fix_version IS NOT NULL)"
            }
            None => "",
        };

        let query = format!(
            "SELECT id, registry, repository, tag, digest, created_at, updated_at FROM images \
             WHERE ($1::text IS NULL OR registry = $1) \
               AND ($2::text IS NULL OR repository = $2) \
               AND ($3::text IS NULL OR tag = $3) \
               {has_fix_clause} \
             ORDER BY registry, repository, tag \
             LIMIT $4 OFFSET $5"
        );
        let count_query = format!(
            "SELECT count(*) AS count FROM images \
             WHERE ($1::text IS NULL OR registry = $1) \
               AND ($2::text IS NULL OR repository = $2) \
               AND ($3::text IS NULL OR tag = $3) \
               {has_fix_clause}"
        );

        let rows = sqlx::query_as::<_, Image>(&query)
            .bind(&filters.registry)
            .bind(&filters.repository)
            .bind(&filters.tag)
            .bind(paging.limit)
            .bind(paging.offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query(&count_query)
            .bind(&filters.registry)
            .bind(&filters.repository)
            .bind(&filters.tag)
            .fetch_one(&self.pool)
            .await?
            .get("count");

        Ok((rows, total))
    }

    async fn scan_history(
        &self,
        image_id: Uuid,
        paging: Paging,
        has_fix: Option<bool>,
    ) -> Result<(Vec<Scan>, i64)> {
        let has_fix_clause = match has_fix {
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

        let query = format!(
            "SELECT id, image_id, scan_date, scanner_versions, status, \
                    sla_critical, sla_high, sla_medium, sla_low, \
                    imagescan_namespace, imagescan_name \
             FROM scans WHERE image_id = $1 {has_fix_clause} \
             ORDER BY scan_date DESC LIMIT $2 OFFSET $3"
        );
        let count_query =
            format!("SELECT count(*) AS count FROM scans WHERE image_id = $1 {has_fix_clause}");

        let rows = sqlx::query_as::<_, Scan>(&query)
            .bind(image_id)
            .bind(paging.limit)
            .bind(paging.offset)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query(&count_query)
            .bind(image_id)
            .fetch_one(&self.pool)
            .await?
            .get("count");

        Ok((rows, total))
    }
}
