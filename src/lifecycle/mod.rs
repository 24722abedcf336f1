//! C5 — Lifecycle/query layer: thin projections over C3 plus the
//! notification side-effects that follow a status mutation.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::notify::{dispatch_status_changed, NotificationDispatcher, StatusChangedEvent};
use crate::store::types::{UpdateContext, Vulnerability, WebhookConfig};
use crate::store::Repositories;

/// Bulk PATCH requests above this size are rejected outright (spec §4.5,
/// §8 scenario S4).
pub const MAX_BULK_IDS: usize = 100;

pub struct LifecycleService {
    repos: Repositories,
    dispatcher: NotificationDispatcher,
}

impl LifecycleService {
    pub fn new(repos: Repositories, dispatcher: NotificationDispatcher) -> Self {
        Self { repos, dispatcher }
    }

    pub async fn update_one(&self, id: Uuid, ctx: UpdateContext) -> Result<Vulnerability> {
        let before = self
            .repos
            .vulnerabilities
            .get_by_id(id)
            .await?;
        let updated = self.repos.vulnerabilities.update(id, &ctx).await?;
        if let Some(before) = before {
            self.notify_if_configured(&before, &updated, &ctx).await;
        }
        Ok(updated)
    }

    /// Caps at [`MAX_BULK_IDS`]; each id gets its own mutation, history
    /// row, and notification attempt (spec §4.5).
    pub async fn bulk_update(&self, ids: Vec<Uuid>, ctx: UpdateContext) -> Result<Vec<Vulnerability>> {
        if ids.len() > MAX_BULK_IDS {
            return Err(Error::BadRequest(format!(
                "bulk update accepts at most {MAX_BULK_IDS} ids, got {}",
                ids.len()
            )));
        }

        let mut befores = Vec::with_capacity(ids.len());
        for id in &ids {
            befores.push(self.repos.vulnerabilities.get_by_id(*id).await?);
        }

        let updated = self.repos.vulnerabilities.bulk_update(&ids, &ctx).await?;

        for (before, after) in befores.into_iter().zip(updated.iter()) {
            if let Some(before) = before {
                self.notify_if_configured(&before, after, &ctx).await;
            }
        }

        Ok(updated)
    }

    async fn notify_if_configured(
        &self,
        before: &Vulnerability,
        after: &Vulnerability,
        ctx: &UpdateContext,
    ) {
        let (Some(namespace), Some(name)) = (&after.imagescan_namespace, &after.imagescan_name) else {
            return;
        };
        let Ok(Some(cfg)) = self.repos.webhook_configs.get(namespace, name).await else {
            return;
        };
        self.emit_status_changed(&cfg, before, after, ctx).await;
    }

    async fn emit_status_changed(
        &self,
        cfg: &WebhookConfig,
        before: &Vulnerability,
        after: &Vulnerability,
        ctx: &UpdateContext,
    ) {
        let event = StatusChangedEvent {
            vulnerability_id: after.id,
            cve_id: after.cve_id.clone(),
            package_name: after.package_name.clone(),
            package_version: after.package_version.clone(),
            severity: after.severity,
            fix_version: after.fix_version.clone(),
            old_status: before.status,
            new_status: after.status,
            changed_by: ctx.changed_by.clone(),
            notes: after.notes.clone(),
            image_name: after
                .imagescan_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            timestamp: chrono::Utc::now(),
            notes_only: before.status == after.status,
        };
        dispatch_status_changed(&self.dispatcher, cfg, &event);
    }
}
