//! Storage layer: C2 (object store) and C3 (relational store), composed
//! behind capability traits so the rest of the crate depends on
//! interfaces, not concrete Postgres/S3 types (spec §9, "Shared mutable
//! repositories via dependency wiring").

pub mod fake;
pub mod object_store;
pub mod postgres;
pub mod types;

use std::sync::Arc;

pub use object_store::{InMemorySbomStore, S3SbomStore, SbomStore};
pub use postgres::{
    ImageStore, PgImageStore, PgScanStore, PgSbomRefStore, PgVulnerabilityStore,
    PgWebhookConfigStore, SbomRefStore, ScanStore, VulnerabilityStore, WebhookConfigStore,
};

/// Every repository a handler or reconciler might need, wired once at
/// startup and cloned cheaply (each field is an `Arc`).
#[derive(Clone)]
pub struct Repositories {
    pub images: Arc<dyn ImageStore>,
    pub scans: Arc<dyn ScanStore>,
    pub vulnerabilities: Arc<dyn VulnerabilityStore>,
    pub sboms: Arc<dyn SbomRefStore>,
    pub webhook_configs: Arc<dyn WebhookConfigStore>,
    pub sbom_objects: Arc<dyn SbomStore>,
}

impl Repositories {
    pub fn from_postgres(pool: sqlx::PgPool, sbom_objects: Arc<dyn SbomStore>) -> Self {
        Self {
            images: Arc::new(PgImageStore::new(pool.clone())),
            scans: Arc::new(PgScanStore::new(pool.clone())),
            vulnerabilities: Arc::new(PgVulnerabilityStore::new(pool.clone())),
            sboms: Arc::new(PgSbomRefStore::new(pool.clone())),
            webhook_configs: Arc::new(PgWebhookConfigStore::new(pool)),
            sbom_objects,
        }
    }

    /// All-in-memory wiring for tests; no database or object store needed.
    /// Every fake shares one [`fake::FakeDb`], the way the Postgres stores
    /// all share one pool and schema.
    pub fn in_memory() -> Self {
        let db = fake::FakeDb::new();
        Self {
            images: Arc::new(db.image_store()),
            scans: Arc::new(db.scan_store()),
            vulnerabilities: Arc::new(db.vulnerability_store()),
            sboms: Arc::new(db.sbom_ref_store()),
            webhook_configs: Arc::new(db.webhook_config_store()),
            sbom_objects: Arc::new(InMemorySbomStore::default()),
        }
    }
}
