//! Controller module for `ImageScan` reconciliation (C7).
//!
//! Contains the main controller loop, status/condition helpers, the
//! finalizer guarding owned-resource cleanup, the CronJob/Job builders,
//! the registry-polling loop, and (behind `--features metrics`) the
//! Prometheus metrics exported at `/metrics`.

pub mod conditions;
mod finalizers;
pub mod leader;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod registry_poll;
mod resources;

pub use finalizers::IMAGESCAN_FINALIZER;
pub use reconciler::{run_controller, ControllerState};
pub use registry_poll::run_registry_poll;
