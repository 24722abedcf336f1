//! Crate-wide error type.
//!
//! One `Error` enum covers the controller, the ingest/lifecycle store
//! paths, and the HTTP API; `IntoResponse` (below, behind `rest-api`)
//! maps variants onto the taxonomy in spec §7.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("object store error: {0}")]
    ObjectStoreError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("reconcile failed: {0}")]
    ReconcileFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Action kube-rs should take in `error_policy` after this error.
    pub fn requeue_after(&self) -> std::time::Duration {
        match self {
            Error::Registry(_) | Error::StorageUnavailable(_) => std::time::Duration::from_secs(30),
            _ => std::time::Duration::from_secs(60),
        }
    }

    /// Transient errors get a short retry; everything else the default.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Registry(_) | Error::StorageUnavailable(_) | Error::DatabaseError(_))
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        use kube::runtime::finalizer::Error as FinalizerError;
        match e {
            FinalizerError::ApplyFailed(inner) | FinalizerError::CleanupFailed(inner) => inner,
            other => Error::ReconcileFailed(other.to_string()),
        }
    }
}

#[cfg(feature = "rest-api")]
mod axum_response {
    use super::Error;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use serde_json::json;

    impl IntoResponse for Error {
        fn into_response(self) -> Response {
            let (status, message) = match &self {
                Error::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
                Error::ValidationError(m) => (StatusCode::BAD_REQUEST, m.clone()),
                Error::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
                Error::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
                Error::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
                Error::StorageUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
                Error::ObjectStoreError(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
                Error::DatabaseError(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
            };
            (status, Json(json!({ "error": message }))).into_response()
        }
    }
}
