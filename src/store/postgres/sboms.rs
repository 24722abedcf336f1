//! SBOM metadata repository (C3). The document bytes themselves live in
//! the object store (C2); this table only indexes what was produced for
//! a scan so listings can show format/size without fetching the blob.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::store::types::{SbomFormat, SbomRef};

#[async_trait]
pub trait SbomRefStore: Send + Sync {
    async fn insert(
        &self,
        scan_id: Uuid,
        format: SbomFormat,
        version: Option<String>,
        size_bytes: Option<i64>,
    ) -> Result<()>;

    async fn get(&self, scan_id: Uuid) -> Result<Option<SbomRef>>;
}

pub struct PgSbomRefStore {
    pool: PgPool,
}

impl PgSbomRefStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SbomRefStore for PgSbomRefStore {
    async fn insert(
        &self,
        scan_id: Uuid,
        format: SbomFormat,
        version: Option<String>,
        size_bytes: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sbom_refs (scan_id, format, version, size_bytes) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (scan_id) DO UPDATE SET \
                format = EXCLUDED.format, version = EXCLUDED.version, size_bytes = EXCLUDED.size_bytes",
        )
        .bind(scan_id)
        .bind(format)
        .bind(version)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, scan_id: Uuid) -> Result<Option<SbomRef>> {
        let row = sqlx::query_as::<_, SbomRef>(
            "SELECT scan_id, format, version, size_bytes FROM sbom_refs WHERE scan_id = $1",
        )
        .bind(scan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
