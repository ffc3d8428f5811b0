//! OAuth access tokens and the runtime identity for Google APIs.
//!
//! On Cloud Run both come from the metadata server; locally a static token
//! (for example from `gcloud auth print-access-token`) and an explicit
//! service-account email can be configured instead.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::GcpError;
use crate::config::GcpConfig;

const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const EMAIL_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/email";

/// Refresh this long before the server-side expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

enum TokenOrigin {
    Static(String),
    Metadata { cache: Mutex<Option<CachedToken>> },
}

pub struct CredentialSource {
    http: reqwest::Client,
    metadata_base_url: String,
    origin: TokenOrigin,
    email: OnceCell<String>,
}

impl CredentialSource {
    pub fn from_config(gcp: &GcpConfig, http: reqwest::Client) -> Self {
        let origin = match &gcp.access_token {
            Some(token) => TokenOrigin::Static(token.clone()),
            None => TokenOrigin::Metadata {
                cache: Mutex::new(None),
            },
        };
        let email = OnceCell::new_with(gcp.service_account_email.clone());

        Self {
            http,
            metadata_base_url: gcp.metadata_base_url.trim_end_matches('/').to_string(),
            origin,
            email,
        }
    }

    /// Bearer token for Google API calls
    pub async fn access_token(&self) -> Result<String, GcpError> {
        let cache = match &self.origin {
            TokenOrigin::Static(token) => return Ok(token.clone()),
            TokenOrigin::Metadata { cache } => cache,
        };

        if let Some(cached) = cache.lock().as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let token: MetadataToken = self
            .metadata_get(TOKEN_PATH)
            .await?
            .json()
            .await
            .map_err(|e| GcpError::Malformed(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cache.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        tracing::debug!("Refreshed metadata access token");

        Ok(token.access_token)
    }

    /// Email of the identity the service runs as
    pub async fn service_account_email(&self) -> Result<String, GcpError> {
        self.email
            .get_or_try_init(|| async {
                if let TokenOrigin::Static(_) = self.origin {
                    return Err(GcpError::Credentials(
                        "gcp.service_account_email is required with a static access token"
                            .to_string(),
                    ));
                }
                let email = self.metadata_get(EMAIL_PATH).await?.text().await?;
                Ok(email.trim().to_string())
            })
            .await
            .cloned()
    }

    async fn metadata_get(&self, path: &str) -> Result<reqwest::Response, GcpError> {
        let response = self
            .http
            .get(format!("{}{}", self.metadata_base_url, path))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| GcpError::Credentials(format!("metadata server unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(GcpError::from_response("metadata server", response).await);
        }
        Ok(response)
    }
}
