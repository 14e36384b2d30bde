//! Production `Storage` driver backed by an S3-compatible object store.
//! Not exercised by the test suite (no network access in CI), but built
//! against the same `Storage` trait as the reference drivers.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use uuid::Uuid;

use crate::application::ports::storage::{RetrievedDoc, Storage, StorageError, StorageRef};
use crate::bootstrap::config::Config;

pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(cfg: &Config) -> anyhow::Result<Self> {
        let bucket = cfg
            .s3_bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("S3_BUCKET must be set when STORAGE=s3"))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &cfg.s3_region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let (Some(access), Some(secret)) = (&cfg.s3_access_key, &cfg.s3_secret_key) {
            builder = builder.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "roomsync-s3-static",
            ));
        }
        if let Some(endpoint) = &cfg.s3_endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        if cfg.s3_use_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
        })
    }

    fn prefix(room: &str, docid: &str) -> String {
        format!(
            "{}/{}",
            urlencoding::encode(room),
            urlencoding::encode(docid)
        )
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn persist_doc(
        &self,
        room: &str,
        docid: &str,
        merged_state: &[u8],
    ) -> Result<StorageRef, StorageError> {
        let reference = Uuid::new_v4().to_string();
        let key = format!("{}/{}", Self::prefix(room, docid), reference);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(merged_state.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::Backend(anyhow::anyhow!(e)))?;
        Ok(StorageRef(reference))
    }

    async fn retrieve_doc(
        &self,
        room: &str,
        docid: &str,
    ) -> Result<Option<RetrievedDoc>, StorageError> {
        let prefix = format!("{}/", Self::prefix(room, docid));
        let listing = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .send()
            .await
            .map_err(|e| StorageError::Backend(anyhow::anyhow!(e)))?;

        let mut references = Vec::new();
        let mut blobs = Vec::new();
        for object in listing.contents() {
            let Some(key) = object.key() else { continue };
            let body = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| StorageError::Backend(anyhow::anyhow!(e)))?
                .body
                .collect()
                .await
                .map_err(|e| StorageError::Backend(anyhow::anyhow!(e)))?
                .into_bytes();
            let reference = key.trim_start_matches(&prefix).to_string();
            references.push(StorageRef(reference));
            blobs.push(body.to_vec());
        }
        if blobs.is_empty() {
            return Ok(None);
        }
        let merged = crate::crdt::merge_updates(&blobs)
            .map_err(|e| StorageError::Backend(anyhow::anyhow!(e)))?;
        Ok(Some(RetrievedDoc {
            merged: crate::crdt::encode_state(&merged),
            references,
        }))
    }

    async fn retrieve_state_vector(
        &self,
        _room: &str,
        _docid: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    async fn delete_references(&self, room: &str, docid: &str, refs: &[StorageRef]) {
        let prefix = Self::prefix(room, docid);
        for r in refs {
            let key = format!("{prefix}/{}", r.0);
            if let Err(e) = self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
            {
                tracing::warn!(room, docid, reference = %r, error = ?e, "s3_storage_delete_failed");
            }
        }
    }

    async fn destroy(&self) {}
}
