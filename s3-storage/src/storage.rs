use super::*;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use whisk_controller::Bytes;
use whisk_controller::async_trait;
use whisk_controller::storage::{BlobKey, BlobStorage};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bucket must be set")]
    NoBucket,

    #[error("invalid presign expiry: {0}")]
    Presign(String),

    #[error("failed to prepare bucket {bucket}: {reason}")]
    Bucket { bucket: String, reason: String },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub bucket: String,
    /// Falls back to environment configuration when unset.
    pub region: Option<String>,
    /// Custom endpoint URL for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Path-style addressing for S3-compatible stores.
    pub force_path_style: bool,
    /// Create the bucket at startup when it does not exist.
    pub create_bucket: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: "whisk".into(),
            region: None,
            endpoint: None,
            force_path_style: false,
            create_bucket: true,
        }
    }
}

struct Storage {
    client: Client,
    bucket: String,
}

pub async fn new(config: &Config) -> Result<Arc<dyn BlobStorage>, Error> {
    if config.bucket.trim().is_empty() {
        return Err(Error::NoBucket);
    }

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let shared_config = loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
    if config.force_path_style {
        builder = builder.force_path_style(true);
    }
    let client = Client::from_conf(builder.build());

    ensure_bucket(&client, &config.bucket, config.create_bucket).await?;
    info!("S3 blob storage ready: bucket={}", config.bucket);

    Ok(Arc::new(Storage {
        client,
        bucket: config.bucket.clone(),
    }))
}

async fn ensure_bucket(client: &Client, bucket: &str, create: bool) -> Result<(), Error> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => return Ok(()),
        Err(e) => {
            let missing = e
                .as_service_error()
                .map(|se| se.is_not_found())
                .unwrap_or(false);
            if !missing || !create {
                return Err(Error::Bucket {
                    bucket: bucket.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    match client.create_bucket().bucket(bucket).send().await {
        Ok(_) => {
            info!("Created bucket: {bucket}");
            Ok(())
        }
        Err(e) => {
            let already_there = e
                .as_service_error()
                .map(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                })
                .unwrap_or(false);
            if already_there {
                Ok(())
            } else {
                Err(Error::Bucket {
                    bucket: bucket.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl BlobStorage for Storage {
    async fn put(
        &self,
        key: &BlobKey,
        data: Bytes,
    ) -> whisk_controller::storage::Result<()> {
        // Keys are content-addressed, so overwriting an existing object
        // writes identical bytes and duplicate puts stay no-ops
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.to_string())
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(())
    }

    async fn get(
        &self,
        key: &BlobKey,
    ) -> whisk_controller::storage::Result<Option<Bytes>> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.to_string())
            .send()
            .await
        {
            Ok(output) => Ok(Some(output.body.collect().await?.into_bytes())),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing { Ok(None) } else { Err(e.into()) }
            }
        }
    }

    async fn remove(&self, key: &BlobKey) -> whisk_controller::storage::Result<bool> {
        // DeleteObject succeeds for absent keys, check first so the caller
        // learns whether anything was actually removed
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key.to_string())
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if missing {
                    return Ok(false);
                }
                return Err(e.into());
            }
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.to_string())
            .send()
            .await?;
        Ok(true)
    }

    async fn presign_get(
        &self,
        key: &BlobKey,
        expires_in: std::time::Duration,
    ) -> whisk_controller::storage::Result<Option<String>> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| Error::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.to_string())
            .presigned(presigning)
            .await
            .inspect_err(|e| warn!("Failed to presign {key}: {e}"))?;

        Ok(Some(presigned.uri().to_string()))
    }
}
