//! Single-leader operation (spec §5 "Leader election", §9 supplement B.2).
//!
//! Exactly one controller replica reconciles at a time; others stand by and
//! keep serving `/health`/`/ready`. Leased against a `coordination.k8s.io/v1
//! Lease` the same way the rest of the controller already talks to the
//! API server (`Api::patch` with server-side apply, as in
//! [`crate::controller::resources`]), rather than a bespoke election
//! protocol.

use std::time::Duration;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::{info, warn};

const LEASE_NAME: &str = "imagescan-operator-leader";
const LEASE_DURATION_SECONDS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);

/// Blocks until this process acquires (or renews into) the lease, then
/// returns. Callers run the controller loop only after this resolves, and
/// should re-check [`is_leader`] periodically if they want to step down
/// gracefully on loss — this implementation renews for the life of the
/// process and only gives up the lease on shutdown.
pub async fn acquire(client: Client, namespace: &str, identity: &str) -> kube::Result<()> {
    let api: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        match try_acquire_or_renew(&api, identity).await {
            Ok(true) => {
                info!(identity, "acquired leader lease");
                return Ok(());
            }
            Ok(false) => {
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
            Err(e) => {
                warn!(error = %e, "leader lease check failed, retrying");
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
        }
    }
}

/// Spawns a background task that renews the lease for as long as the
/// process runs, relinquishing it is implicit on process exit (the lease's
/// `leaseDurationSeconds` expires and another replica takes over).
pub fn spawn_renewal(client: Client, namespace: String, identity: String) {
    tokio::spawn(async move {
        let api: Api<Lease> = Api::namespaced(client, &namespace);
        let mut ticker = tokio::time::interval(RENEW_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = try_acquire_or_renew(&api, &identity).await {
                warn!(error = %e, "failed to renew leader lease");
            }
        }
    });
}

async fn try_acquire_or_renew(api: &Api<Lease>, identity: &str) -> kube::Result<bool> {
    let existing = api.get_opt(LEASE_NAME).await?;

    let holder_is_us_or_expired = existing.as_ref().map(|lease| is_acquirable(lease, identity)).unwrap_or(true);
    if !holder_is_us_or_expired {
        return Ok(false);
    }

    let lease = Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
            acquire_time: existing
                .as_ref()
                .and_then(|l| l.spec.as_ref())
                .and_then(|s| s.acquire_time.clone())
                .or_else(|| Some(MicroTime(chrono::Utc::now()))),
            renew_time: Some(MicroTime(chrono::Utc::now())),
            lease_transitions: existing
                .as_ref()
                .and_then(|l| l.spec.as_ref())
                .and_then(|s| s.lease_transitions)
                .map(|t| if is_new_holder(&existing, identity) { t + 1 } else { t })
                .or(Some(0)),
            ..Default::default()
        }),
    };

    api.patch(
        LEASE_NAME,
        &PatchParams::apply("imagescan-operator").force(),
        &Patch::Apply(&lease),
    )
    .await?;

    Ok(true)
}

fn is_new_holder(existing: &Option<Lease>, identity: &str) -> bool {
    existing
        .as_ref()
        .and_then(|l| l.spec.as_ref())
        .and_then(|s| s.holder_identity.as_deref())
        .map(|holder| holder != identity)
        .unwrap_or(true)
}

fn is_acquirable(lease: &Lease, identity: &str) -> bool {
    let Some(spec) = &lease.spec else {
        return true;
    };
    if spec.holder_identity.as_deref() == Some(identity) {
        return true;
    }
    let Some(renew_time) = &spec.renew_time else {
        return true;
    };
    let duration = spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECONDS);
    let expires_at = renew_time.0 + chrono::Duration::seconds(duration as i64);
    chrono::Utc::now() > expires_at
}
