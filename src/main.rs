//! imagescan-operator entry point.
//!
//! Parses process configuration, wires the relational/object stores, and
//! runs whichever of {reconciler, registry poller, REST API} are enabled
//! for this replica — all three by default, so a single binary works for
//! both the standalone demo deployment and a split multi-replica one.

use std::sync::Arc;

use clap::Parser;
use imagescan_operator::config::Config;
use imagescan_operator::store::{Repositories, S3SbomStore};
use imagescan_operator::{controller, telemetry, Error};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();
    telemetry::init(config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting imagescan-operator"
    );

    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;
    info!("connected to Kubernetes cluster");

    let pool = imagescan_operator::store::postgres::connect(
        &config.database_url(),
        config.db_max_connections,
    )
    .await?;
    info!("connected to database");

    let sbom_objects = Arc::new(
        S3SbomStore::new(
            config.sbom_bucket.clone(),
            config.sbom_s3_endpoint.clone(),
            config.sbom_s3_region.clone(),
        )
        .await,
    );
    let repos = Repositories::from_postgres(pool, sbom_objects);

    let dispatcher = imagescan_operator::notify::NotificationDispatcher::spawn();
    let ingest = Arc::new(imagescan_operator::ingest::IngestPipeline::new(
        repos.clone(),
        dispatcher.clone(),
        config.api_base_url.clone(),
    ));
    let lifecycle = Arc::new(imagescan_operator::lifecycle::LifecycleService::new(
        repos.clone(),
        dispatcher.clone(),
    ));

    let identity = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    let mut join_set = tokio::task::JoinSet::new();

    if config.enable_controller {
        let reconcile_client = client.clone();
        let namespace = config.leader_election_namespace.clone();
        let watch_namespace = config.watch_namespace.clone();
        let reconcile_identity = identity.clone();
        join_set.spawn(async move {
            controller::leader::acquire(reconcile_client.clone(), &namespace, &reconcile_identity)
                .await
                .map_err(Error::KubeError)?;
            controller::leader::spawn_renewal(reconcile_client.clone(), namespace, reconcile_identity);

            let state = Arc::new(controller::ControllerState {
                client: reconcile_client,
                watch_namespace,
            });
            controller::run_controller(state).await
        });

        let poll_client = client.clone();
        join_set.spawn(async move {
            controller::run_registry_poll(poll_client).await;
            Ok(())
        });
    }

    #[cfg(feature = "rest-api")]
    if config.enable_api {
        let jwks_validator = config
            .oidc_jwks_url
            .clone()
            .map(imagescan_operator::identity::JwksValidator::new);
        let state = imagescan_operator::rest_api::AppState {
            repos: repos.clone(),
            ingest: ingest.clone(),
            lifecycle: lifecycle.clone(),
            jwks_validator,
        };
        let port = config.port;
        join_set.spawn(async move { imagescan_operator::rest_api::run_server(state, port).await });
    }

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "component exited with error");
                return Err(e);
            }
            Err(e) => {
                error!(error = %e, "component task panicked");
                return Err(Error::ReconcileFailed(e.to_string()));
            }
        }
    }

    Ok(())
}
