//! C2 — Object store: opaque byte store for SBOM documents keyed by scan id.
//!
//! Key layout is fixed: `scans/{scan_id}/sbom.json`. Writes are atomic —
//! `get` either returns the full document or `NotFound`, never a partial
//! write (spec §4.2).

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use uuid::Uuid;

use crate::error::{Error, Result};

fn sbom_key(scan_id: Uuid) -> String {
    format!("scans/{scan_id}/sbom.json")
}

/// Capability implemented by the SBOM object store.
#[async_trait]
pub trait SbomStore: Send + Sync {
    async fn put(&self, scan_id: Uuid, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, scan_id: Uuid) -> Result<Vec<u8>>;
    async fn exists(&self, scan_id: Uuid) -> Result<bool>;
    /// Best-effort presigned URL; implementations that can't produce one
    /// return `Ok(None)` rather than an error.
    async fn presign(&self, scan_id: Uuid, ttl_secs: u64) -> Result<Option<String>>;
}

/// S3-compatible implementation. `endpoint_url` lets this point at
/// MinIO/localstack as well as real S3.
pub struct S3SbomStore {
    client: S3Client,
    bucket: String,
}

impl S3SbomStore {
    pub async fn new(bucket: String, endpoint_url: Option<String>, region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region));
        }
        let shared_config = loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(s3_config_builder.build()),
            bucket,
        }
    }
}

#[async_trait]
impl SbomStore for S3SbomStore {
    async fn put(&self, scan_id: Uuid, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(sbom_key(scan_id))
            .content_type("application/json")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| Error::ObjectStoreError(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, scan_id: Uuid) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(sbom_key(scan_id))
            .send()
            .await
            .map_err(|e| {
                let svc_err = e.into_service_error();
                if svc_err.is_no_such_key() {
                    Error::NotFound(format!("sbom for scan {scan_id}"))
                } else {
                    Error::ObjectStoreError(svc_err.to_string())
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| Error::ObjectStoreError(e.to_string()))?
            .into_bytes();
        Ok(bytes.to_vec())
    }

    async fn exists(&self, scan_id: Uuid) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(sbom_key(scan_id))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let svc_err = e.into_service_error();
                if svc_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(Error::ObjectStoreError(svc_err.to_string()))
                }
            }
        }
    }

    async fn presign(&self, scan_id: Uuid, ttl_secs: u64) -> Result<Option<String>> {
        use aws_sdk_s3::presigning::PresigningConfig;
        let config = PresigningConfig::expires_in(std::time::Duration::from_secs(ttl_secs))
            .map_err(|e| Error::ObjectStoreError(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(sbom_key(scan_id))
            .presigned(config)
            .await
            .map_err(|e| Error::ObjectStoreError(e.to_string()))?;
        Ok(Some(presigned.uri().to_string()))
    }
}

/// In-memory store used by tests and local development.
#[derive(Default)]
pub struct InMemorySbomStore {
    objects: tokio::sync::RwLock<std::collections::HashMap<Uuid, Vec<u8>>>,
}

#[async_trait]
impl SbomStore for InMemorySbomStore {
    async fn put(&self, scan_id: Uuid, bytes: Vec<u8>) -> Result<()> {
        self.objects.write().await.insert(scan_id, bytes);
        Ok(())
    }

    async fn get(&self, scan_id: Uuid) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&scan_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("sbom for scan {scan_id}")))
    }

    async fn exists(&self, scan_id: Uuid) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(&scan_id))
    }

    async fn presign(&self, _scan_id: Uuid, _ttl_secs: u64) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let store = InMemorySbomStore::default();
        let id = Uuid::new_v4();
        assert!(!store.exists(id).await.unwrap());
        store.put(id, b"hello".to_vec()).await.unwrap();
        assert!(store.exists(id).await.unwrap());
        assert_eq!(store.get(id).await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn in_memory_missing_is_not_found() {
        let store = InMemorySbomStore::default();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
