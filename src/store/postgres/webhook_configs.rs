//! Webhook config repository (C3) — one row per (namespace, name) CR.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::store::types::WebhookConfig;

#[async_trait]
pub trait WebhookConfigStore: Send + Sync {
    async fn upsert(&self, cfg: WebhookConfig) -> Result<()>;
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WebhookConfig>>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

pub struct PgWebhookConfigStore {
    pool: PgPool,
}

impl PgWebhookConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookConfigStore for PgWebhookConfigStore {
    async fn upsert(&self, cfg: WebhookConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_configs (
                namespace, name, url, format,
                scan_completion_enabled, scan_completion_min_severity, scan_completion_only_fixable,
                status_change_enabled, status_change_min_severity, status_change_only_fixable,
                status_change_transitions, status_change_include_note_changes,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
            ON CONFLICT (namespace, name) DO UPDATE SET
                url = EXCLUDED.url,
                format = EXCLUDED.format,
                scan_completion_enabled = EXCLUDED.scan_completion_enabled,
                scan_completion_min_severity = EXCLUDED.scan_completion_min_severity,
                scan_completion_only_fixable = EXCLUDED.scan_completion_only_fixable,
                status_change_enabled = EXCLUDED.status_change_enabled,
                status_change_min_severity = EXCLUDED.status_change_min_severity,
                status_change_only_fixable = EXCLUDED.status_change_only_fixable,
                status_change_transitions = EXCLUDED.status_change_transitions,
                status_change_include_note_changes = EXCLUDED.status_change_include_note_changes,
                updated_at = now()
            "#,
        )
        .bind(&cfg.namespace)
        .bind(&cfg.name)
        .bind(&cfg.url)
        .bind(cfg.format)
        .bind(cfg.scan_completion_enabled)
        .bind(&cfg.scan_completion_min_severity)
        .bind(cfg.scan_completion_only_fixable)
        .bind(cfg.status_change_enabled)
        .bind(&cfg.status_change_min_severity)
        .bind(cfg.status_change_only_fixable)
        .bind(&cfg.status_change_transitions)
        .bind(cfg.status_change_include_note_changes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WebhookConfig>> {
        let row = sqlx::query(
            "SELECT namespace, name, url, format, \
                    scan_completion_enabled, scan_completion_min_severity, scan_completion_only_fixable, \
                    status_change_enabled, status_change_min_severity, status_change_only_fixable, \
                    status_change_transitions, status_change_include_note_changes \
             FROM webhook_configs WHERE namespace = $1 AND name = $2",
        )
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| WebhookConfig {
            namespace: row.get("namespace"),
            name: row.get("name"),
            url: row.get("url"),
            format: row.get("format"),
            scan_completion_enabled: row.get("scan_completion_enabled"),
            scan_completion_min_severity: row.get("scan_completion_min_severity"),
            scan_completion_only_fixable: row.get("scan_completion_only_fixable"),
            status_change_enabled: row.get("status_change_enabled"),
            status_change_min_severity: row.get("status_change_min_severity"),
            status_change_only_fixable: row.get("status_change_only_fixable"),
            status_change_transitions: row.get("status_change_transitions"),
            status_change_include_note_changes: row.get("status_change_include_note_changes"),
        }))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM webhook_configs WHERE namespace = $1 AND name = $2")
            .bind(namespace)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
