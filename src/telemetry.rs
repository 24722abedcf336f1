//! Tracing/log initialization. Format is selectable (`LOG_FORMAT=json|text`)
//! so the same binary emits human-readable lines in local dev and
//! structured JSON in-cluster.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogFormat;

pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_target(true))
                .with(env_filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(env_filter)
                .init();
        }
    }
}
