//! Listing images in a private Cloud Storage bucket

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{percent_encode, CredentialSource, GcpError};
use crate::config::GcpConfig;

const PUBLIC_HOST: &str = "https://storage.googleapis.com";

/// Object storage for listing images
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Store an object and return its public URL
    async fn put(&self, blob_name: &str, data: Vec<u8>, content_type: &str)
        -> Result<String, GcpError>;

    /// Delete the object behind a public URL; false when it could not be removed
    async fn delete(&self, public_url: &str) -> bool;
}

/// Canonical URL of an object; only reachable through signed URLs
pub fn public_url(bucket: &str, blob_name: &str) -> String {
    format!("{}/{}/{}", PUBLIC_HOST, bucket, blob_name)
}

/// Object name behind a public URL, if it points into `bucket`
pub fn blob_name_from_public_url<'a>(bucket: &str, url: &'a str) -> Option<&'a str> {
    let rest = url.strip_prefix(PUBLIC_HOST)?.strip_prefix('/')?;
    let blob = rest.strip_prefix(bucket)?.strip_prefix('/')?;
    (!blob.is_empty()).then_some(blob)
}

/// `<category>/<listing_id>_<YYYYMMDD>_<12 hex chars>.<ext>`
pub fn blob_name(category: &str, listing_id: Uuid, extension: &str, now: DateTime<Utc>) -> String {
    let unique = Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}_{}_{}.{}",
        category,
        listing_id,
        now.format("%Y%m%d"),
        &unique[..12],
        extension
    )
}

/// Cloud Storage JSON API client
pub struct GcsStore {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    credentials: Arc<CredentialSource>,
}

impl GcsStore {
    pub fn new(
        config: &GcpConfig,
        credentials: Arc<CredentialSource>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: config.storage_base_url.trim_end_matches('/').to_string(),
            bucket: config.storage_bucket.clone(),
            credentials,
        })
    }

    async fn remove(&self, blob: &str) -> Result<(), GcpError> {
        let token = self.credentials.access_token().await?;
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            self.bucket,
            percent_encode(blob, false)
        );
        let response = self.http.delete(&url).bearer_auth(token).send().await?;

        // Already gone is as good as deleted
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(GcpError::from_response("storage delete", response).await)
        }
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(
        &self,
        blob_name: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, GcpError> {
        let token = self.credentials.access_token().await?;
        let url = format!("{}/upload/storage/v1/b/{}/o", self.base_url, self.bucket);
        let size = data.len();

        let response = self
            .http
            .post(&url)
            .query(&[("uploadType", "media"), ("name", blob_name)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GcpError::from_response("storage upload", response).await);
        }

        tracing::debug!("Uploaded {} ({} bytes)", blob_name, size);
        Ok(public_url(&self.bucket, blob_name))
    }

    async fn delete(&self, public_url: &str) -> bool {
        let Some(blob) = blob_name_from_public_url(&self.bucket, public_url) else {
            tracing::warn!("Not an object of bucket {}: {}", self.bucket, public_url);
            return false;
        };

        match self.remove(blob).await {
            Ok(()) => {
                tracing::debug!("Deleted {}", blob);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to delete {}: {}", blob, e);
                false
            }
        }
    }
}
