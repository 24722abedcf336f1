//! C3 — Relational store: Postgres-backed repositories for images, scans,
//! vulnerabilities, and webhook configs. Raw `sqlx::query`/`query_as` only
//! — no compile-time-checked `query!` macros, since this crate is built
//! without a live database to check against.

pub mod images;
pub mod scans;
pub mod sboms;
pub mod vulnerabilities;
pub mod webhook_configs;

pub use images::{ImageStore, PgImageStore};
pub use scans::{PgScanStore, ScanStore};
pub use sboms::{PgSbomRefStore, SbomRefStore};
pub use vulnerabilities::{PgVulnerabilityStore, VulnerabilityStore};
pub use webhook_configs::{PgWebhookConfigStore, WebhookConfigStore};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::Result;

/// Builds the shared connection pool. Call once at startup and hand the
/// pool to each repository constructor.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}
