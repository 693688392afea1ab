//! Blob storage access, backed by the Supabase Storage REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Bucket holding generated images.
pub const IMAGES_BUCKET: &str = "images";

/// Enumeration of errors for blob storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("object {bucket}/{object} not found")]
    NotFound { bucket: String, object: String },
    #[error("storage error: {0}")]
    Other(String),
}

/// The blob store contract the consumer depends on.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `bytes`, returning the stored object name.
    async fn upload(&self, bucket: &str, bytes: Vec<u8>) -> Result<String, StorageError>;

    async fn download(&self, bucket: &str, object: &str) -> Result<Vec<u8>, StorageError>;
}

pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SupabaseStorage {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        }
    }

    fn object_url(&self, bucket: &str, object: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, object)
    }
}

#[async_trait]
impl BlobStore for SupabaseStorage {
    async fn upload(&self, bucket: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let object = format!("{}.png", Uuid::now_v7());

        self.client
            .post(self.object_url(bucket, &object))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!(bucket, object, "uploaded blob");
        Ok(object)
    }

    async fn download(&self, bucket: &str, object: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get(self.object_url(bucket, object))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                bucket: bucket.to_owned(),
                object: object.to_owned(),
            });
        }

        Ok(response.error_for_status()?.bytes().await?.to_vec())
    }
}
