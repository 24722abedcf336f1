//! Custom Resource Definitions for the ImageScan operator.

pub mod imagescan;
pub mod types;

pub use imagescan::{
    ImageScan, ImageScanSpec, ImageScanStatus, MinSeverity, RegistryPollConfig,
    ScanCompletionWebhookConfig, SbomFormat, SlaConfig, SpecValidationError,
    StatusChangeWebhookConfig, WebhookFormat, WebhooksConfig,
};
pub use types::{Condition, ResourceRequirements, ResourceSpec};
