//! Main reconciler for `ImageScan` resources (C7).
//!
//! Implements the controller pattern using kube-rs runtime: each
//! `ImageScan` owns a scheduled-scan `CronJob`; the finalizer guarantees
//! that `CronJob` is deleted before the CR itself disappears.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::CronJob;
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{error, info, instrument, warn};

use super::conditions::{not_ready_condition, ready_condition, set_condition};
use super::finalizers::IMAGESCAN_FINALIZER;
use super::resources;
use crate::crd::ImageScan;
use crate::error::{Error, Result};

/// Shared state handed to every reconcile invocation.
pub struct ControllerState {
    pub client: Client,
    /// Restricts the watch to one namespace (least-privilege mode) when
    /// set; cluster-wide otherwise (spec §4.7).
    pub watch_namespace: Option<String>,
}

/// Main entry point to start the controller.
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let (scans, owned_jobs): (Api<ImageScan>, Api<CronJob>) = match &state.watch_namespace {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client.clone(), ns)),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    info!(namespace = ?state.watch_namespace, "starting ImageScan controller");

    match scans.list(&Default::default()).await {
        Ok(_) => info!("ImageScan CRD is available"),
        Err(e) => {
            error!(error = ?e, "ImageScan CRD not found, install it first");
            return Err(Error::ConfigError("ImageScan CRD not installed".to_string()));
        }
    }

    Controller::new(scans, Config::default())
        .owns::<CronJob>(owned_jobs, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!(?obj, "reconciled"),
                Err(e) => {
                    #[cfg(feature = "metrics")]
                    super::metrics::inc_reconcile_error("imagescan", "reconcile");
                    error!(error = ?e, "reconcile error");
                }
            }
        })
        .await;

    Ok(())
}

/// Called whenever an `ImageScan` is created/updated/deleted, an owned
/// `CronJob` changes, or the requeue timer expires.
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<ImageScan>, ctx: Arc<ControllerState>) -> Result<Action> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let client = ctx.client.clone();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ImageScan> = Api::namespaced(client.clone(), &namespace);

    let result = finalizer(&api, IMAGESCAN_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(scan) => apply_imagescan(&client, &scan).await,
            FinalizerEvent::Cleanup(scan) => cleanup_imagescan(&client, &scan).await,
        }
    })
    .await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds("imagescan", started.elapsed().as_secs_f64());

    result
    .map_err(Error::from)
}

#[instrument(skip(client, scan), fields(name = %scan.name_any(), namespace = scan.namespace()))]
async fn apply_imagescan(client: &Client, scan: &ImageScan) -> Result<Action> {
    let name = scan.name_any();

    if let Err(e) = scan.spec.validate() {
        warn!(name = %name, error = %e, "ImageScan spec failed validation");
        update_status(client, scan, false, "ReconcileFailed", &e.to_string(), None).await?;
        return Err(Error::ValidationError(e.to_string()));
    }

    resources::ensure_cron_job(client, scan).await?;

    update_status(
        client,
        scan,
        true,
        "ReconcileSuccess",
        "scheduled scan CronJob is up to date",
        Some(resources::cron_job_name(scan)),
    )
    .await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

#[instrument(skip(client, scan), fields(name = %scan.name_any(), namespace = scan.namespace()))]
async fn cleanup_imagescan(client: &Client, scan: &ImageScan) -> Result<Action> {
    info!(name = %scan.name_any(), "cleaning up ImageScan");

    if let Err(e) = resources::delete_cron_job(client, scan).await {
        warn!(name = %scan.name_any(), error = %e, "failed to delete owned CronJob");
    }

    Ok(Action::await_change())
}

async fn update_status(
    client: &Client,
    scan: &ImageScan,
    ready: bool,
    reason: &str,
    message: &str,
    cron_job_name: Option<String>,
) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ImageScan> = Api::namespaced(client.clone(), &namespace);

    let mut conditions = scan
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    let condition = if ready {
        ready_condition(reason, message)
    } else {
        not_ready_condition(reason, message)
    };
    set_condition(
        &mut conditions,
        &condition.type_,
        &condition.status,
        &condition.reason,
        &condition.message,
    );

    let patch = serde_json::json!({
        "status": {
            "conditions": conditions,
            "observedGeneration": scan.metadata.generation,
            "cronJobName": cron_job_name,
        }
    });

    api.patch_status(
        &scan.name_any(),
        &PatchParams::apply("imagescan-operator"),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;

    Ok(())
}

fn error_policy(scan: Arc<ImageScan>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(name = %scan.name_any(), error = %error, "reconciliation error");
    Action::requeue(error.requeue_after())
}
