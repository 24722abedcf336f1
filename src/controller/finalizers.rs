//! Finalizer handling for `ImageScan` cleanup.
//!
//! The finalizer guarantees the owned CronJob is deleted before the
//! `ImageScan` resource itself disappears (spec §4.7 step 1).

use kube::{
    api::{Api, Patch, PatchParams},
    Client, ResourceExt,
};
use serde_json::json;
use tracing::info;

use crate::crd::ImageScan;
use crate::error::Result;

pub const IMAGESCAN_FINALIZER: &str = "imagescan.security.imagescan.io/finalizer";

#[allow(dead_code)]
pub async fn add_finalizer(client: &Client, scan: &ImageScan) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ImageScan> = Api::namespaced(client.clone(), &namespace);

    let finalizers: Vec<String> = scan.finalizers().iter().cloned().collect();
    if !finalizers.contains(&IMAGESCAN_FINALIZER.to_string()) {
        let mut new_finalizers = finalizers;
        new_finalizers.push(IMAGESCAN_FINALIZER.to_string());

        let patch = json!({ "metadata": { "finalizers": new_finalizers } });
        api.patch(
            &scan.name_any(),
            &PatchParams::apply("imagescan-operator"),
            &Patch::Merge(&patch),
        )
        .await?;
        info!(name = %scan.name_any(), "added finalizer to ImageScan");
    }
    Ok(())
}

#[allow(dead_code)]
pub async fn remove_finalizer(client: &Client, scan: &ImageScan) -> Result<()> {
    let namespace = scan.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ImageScan> = Api::namespaced(client.clone(), &namespace);

    let finalizers: Vec<String> = scan
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != IMAGESCAN_FINALIZER)
        .cloned()
        .collect();

    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(
        &scan.name_any(),
        &PatchParams::apply("imagescan-operator"),
        &Patch::Merge(&patch),
    )
    .await?;

    info!(name = %scan.name_any(), "removed finalizer from ImageScan");
    Ok(())
}

pub fn is_being_deleted(scan: &ImageScan) -> bool {
    scan.metadata.deletion_timestamp.is_some()
}

#[allow(dead_code)]
pub fn has_finalizer(scan: &ImageScan) -> bool {
    scan.finalizers().iter().any(|f| f == IMAGESCAN_FINALIZER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_name() {
        assert_eq!(IMAGESCAN_FINALIZER, "imagescan.security.imagescan.io/finalizer");
    }
}
