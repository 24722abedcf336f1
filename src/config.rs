//! Process-boundary configuration (spec §6, "Environment variables").
//!
//! Parsed once at startup via `clap`'s `derive`+`env` features, so the same
//! struct is driven by flags in local dev and by env vars in-cluster —
//! mirroring how the stack already depends on `clap` for CLI entry points.

use clap::{Parser, ValueEnum};

/// Log line format selector (`LOG_FORMAT`).
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Clone, Debug)]
#[command(name = "imagescan-operator")]
#[command(about = "Container-image vulnerability management control plane")]
pub struct Config {
    /// HTTP API bind port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Origin allowed to call the API from a browser (CORS); informational
    /// when the frontend is served separately.
    #[arg(long, env = "FRONTEND_URL", default_value = "http://localhost:3000")]
    pub frontend_url: String,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER", default_value = "imagescan")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "")]
    pub db_password: String,

    #[arg(long, env = "DB_NAME", default_value = "imagescan")]
    pub db_name: String,

    #[arg(long, env = "DB_SSLMODE", default_value = "prefer")]
    pub db_sslmode: String,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// S3-compatible bucket holding SBOM documents.
    #[arg(long, env = "SBOM_BUCKET", default_value = "imagescan-sboms")]
    pub sbom_bucket: String,

    /// Overrides the AWS SDK endpoint resolution, e.g. for MinIO/localstack.
    #[arg(long, env = "SBOM_S3_ENDPOINT")]
    pub sbom_s3_endpoint: Option<String>,

    #[arg(long, env = "SBOM_S3_REGION")]
    pub sbom_s3_region: Option<String>,

    /// Base URL the dispatcher embeds in `ScanCompleted` notifications
    /// (spec §4.6 `scan_url`).
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:8080")]
    pub api_base_url: String,

    /// When set, writes are rejected unless `X-Auth-Request-Email` /
    /// `X-Auth-Request-Access-Token` validate against this JWKS endpoint
    /// (spec §6 "Identity at HTTP edge").
    #[arg(long, env = "OIDC_JWKS_URL")]
    pub oidc_jwks_url: Option<String>,

    /// Restrict the `ImageScan` watch to the controller's own namespace
    /// (least-privilege mode) instead of cluster-wide.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Namespace used for the leader-election Lease object.
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "imagescan-system")]
    pub leader_election_namespace: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Run the reconciler and the HTTP API in the same process (default).
    /// Disable to run one component per replica.
    #[arg(long, env = "ENABLE_CONTROLLER", default_value_t = true)]
    pub enable_controller: bool,

    #[arg(long, env = "ENABLE_API", default_value_t = true)]
    pub enable_api: bool,
}

impl Config {
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{user}:{password}@{host}:{port}/{name}?sslmode={sslmode}",
            user = self.db_user,
            password = self.db_password,
            host = self.db_host,
            port = self.db_port,
            name = self.db_name,
            sslmode = self.db_sslmode,
        )
    }
}
