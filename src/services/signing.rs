//! Signed URLs for private listing images.
//!
//! The runtime identity holds no private key. V4 URLs are signed by asking
//! the IAM credentials service to sign the string-to-sign on behalf of the
//! very account that is asking; that account needs
//! `roles/iam.serviceAccountTokenCreator` on itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::storage::blob_name_from_public_url;
use super::{percent_encode, CredentialSource, GcpError};
use crate::config::Config;
use crate::error::{AppError, AppResult};

const STORAGE_HOST: &str = "storage.googleapis.com";
const ALGORITHM: &str = "GOOG4-RSA-SHA256";
const MAX_V4_EXPIRY_SECS: u64 = 7 * 24 * 3600;

/// Signs bytes as some service account
#[async_trait]
pub trait BlobSigner: Send + Sync {
    /// Account whose key produces the signature
    async fn signer_email(&self) -> Result<String, GcpError>;

    async fn sign_blob(&self, payload: &[u8]) -> Result<Vec<u8>, GcpError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

/// `signBlob` through the IAM credentials API, signing as ourselves
pub struct IamBlobSigner {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialSource>,
}

impl IamBlobSigner {
    pub fn new(
        base_url: &str,
        credentials: Arc<CredentialSource>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }
}

#[async_trait]
impl BlobSigner for IamBlobSigner {
    async fn signer_email(&self) -> Result<String, GcpError> {
        self.credentials.service_account_email().await
    }

    async fn sign_blob(&self, payload: &[u8]) -> Result<Vec<u8>, GcpError> {
        let email = self.signer_email().await?;
        let token = self.credentials.access_token().await?;
        let url = format!(
            "{}/v1/projects/-/serviceAccounts/{}:signBlob",
            self.base_url, email
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "payload": STANDARD.encode(payload) }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(GcpError::PermissionDenied(format!(
                "{} may not sign as itself; grant it roles/iam.serviceAccountTokenCreator on its own account",
                email
            )));
        }
        if !response.status().is_success() {
            return Err(GcpError::from_response("iam signBlob", response).await);
        }

        let body: SignBlobResponse = response.json().await?;
        STANDARD
            .decode(body.signed_blob)
            .map_err(|e| GcpError::Malformed(format!("signedBlob: {}", e)))
    }
}

/// Cloud Storage V4 signed URLs (GET only)
pub struct V4UrlSigner {
    bucket: String,
    signer: Arc<dyn BlobSigner>,
}

impl V4UrlSigner {
    pub fn new(bucket: impl Into<String>, signer: Arc<dyn BlobSigner>) -> Self {
        Self {
            bucket: bucket.into(),
            signer,
        }
    }

    pub async fn sign(
        &self,
        blob_name: &str,
        expires_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<String, GcpError> {
        let email = self.signer.signer_email().await?;
        let (query, string_to_sign) =
            self.string_to_sign(blob_name, &email, expires_secs, now);
        let signature = self.signer.sign_blob(string_to_sign.as_bytes()).await?;

        Ok(format!(
            "https://{}{}?{}&X-Goog-Signature={}",
            STORAGE_HOST,
            self.resource(blob_name),
            query,
            hex::encode(signature)
        ))
    }

    fn resource(&self, blob_name: &str) -> String {
        format!("/{}/{}", self.bucket, percent_encode(blob_name, true))
    }

    /// Canonical query string and the string-to-sign for a GET of `blob_name`
    fn string_to_sign(
        &self,
        blob_name: &str,
        email: &str,
        expires_secs: u64,
        now: DateTime<Utc>,
    ) -> (String, String) {
        let datestamp = now.format("%Y%m%d").to_string();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{}/auto/storage/goog4_request", datestamp);
        let expires = expires_secs.clamp(1, MAX_V4_EXPIRY_SECS).to_string();
        let credential = format!("{}/{}", email, scope);

        // Already in lexicographic order
        let params = [
            ("X-Goog-Algorithm", ALGORITHM),
            ("X-Goog-Credential", credential.as_str()),
            ("X-Goog-Date", timestamp.as_str()),
            ("X-Goog-Expires", expires.as_str()),
            ("X-Goog-SignedHeaders", "host"),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k, false), percent_encode(v, false)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            self.resource(blob_name),
            query,
            STORAGE_HOST
        );
        let hashed = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!("{}\n{}\n{}\n{}", ALGORITHM, timestamp, scope, hashed);

        (query, string_to_sign)
    }
}

/// Cloud CDN signed-request tokens
pub struct CdnSigner {
    base_url: String,
    bucket: String,
    key_name: String,
    mac: Hmac<Sha1>,
}

impl CdnSigner {
    pub fn new(
        base_url: &str,
        bucket: &str,
        key_name: String,
        key: &[u8],
    ) -> Result<Self, InvalidLength> {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            base_url,
            bucket: bucket.to_string(),
            key_name,
            mac: Hmac::new_from_slice(key)?,
        })
    }

    /// Token authorising every URL under `url_prefix` until `expires_at` (unix seconds)
    pub fn url_prefix_token(&self, url_prefix: &str, expires_at: i64) -> String {
        let policy = format!(
            "URLPrefix={}&Expires={}&KeyName={}",
            URL_SAFE_NO_PAD.encode(url_prefix),
            expires_at,
            self.key_name
        );
        let mut mac = self.mac.clone();
        mac.update(policy.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}&Signature={}", policy, signature)
    }

    /// Prefix covering one image category
    pub fn category_prefix(&self, category: &str) -> String {
        format!("{}{}/", self.base_url, category)
    }

    /// Same object, served through the CDN host
    pub fn cdn_url(&self, public_url: &str) -> Option<String> {
        let blob = blob_name_from_public_url(&self.bucket, public_url)?;
        Some(format!("{}{}", self.base_url, blob))
    }
}

/// Turns bucket URLs into URLs a browser can fetch
pub enum ImageUrlSigner {
    Cdn { signer: CdnSigner, expiry_secs: u64 },
    Gcs { signer: V4UrlSigner, expiry_secs: u64 },
}

impl ImageUrlSigner {
    /// CDN mode when a CDN key is configured, V4 through `blob_signer` otherwise
    pub fn from_config(config: &Config, blob_signer: Arc<dyn BlobSigner>) -> anyhow::Result<Self> {
        let bucket = &config.gcp.storage_bucket;
        Ok(match config.cdn.key()? {
            Some((key_name, key)) => ImageUrlSigner::Cdn {
                signer: CdnSigner::new(&config.cdn.base_url, bucket, key_name, &key)
                    .map_err(|_| anyhow::anyhow!("cdn.signing_key has an unusable length"))?,
                expiry_secs: config.cdn.token_expiry_secs,
            },
            None => ImageUrlSigner::Gcs {
                signer: V4UrlSigner::new(bucket.clone(), blob_signer),
                expiry_secs: config.gcp.signed_url_expiry_secs,
            },
        })
    }

    pub fn expiry_secs(&self) -> u64 {
        match self {
            ImageUrlSigner::Cdn { expiry_secs, .. } | ImageUrlSigner::Gcs { expiry_secs, .. } => {
                *expiry_secs
            }
        }
    }

    /// Signed URLs in input order
    pub async fn sign_all(&self, category: &str, public_urls: &[String]) -> AppResult<Vec<String>> {
        if public_urls.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();

        match self {
            ImageUrlSigner::Cdn {
                signer,
                expiry_secs,
            } => {
                let expires_at = now.timestamp() + *expiry_secs as i64;
                let token = signer.url_prefix_token(&signer.category_prefix(category), expires_at);
                public_urls
                    .iter()
                    .map(|url| {
                        signer
                            .cdn_url(url)
                            .map(|cdn| format!("{}?{}", cdn, token))
                            .ok_or_else(|| AppError::Signing(format!("not a bucket URL: {}", url)))
                    })
                    .collect()
            }
            ImageUrlSigner::Gcs {
                signer,
                expiry_secs,
            } => {
                let signing = public_urls.iter().map(|url| async move {
                    let blob = blob_name_from_public_url(&signer.bucket, url)
                        .ok_or_else(|| AppError::Signing(format!("not a bucket URL: {}", url)))?;
                    signer
                        .sign(blob, *expiry_secs, now)
                        .await
                        .map_err(|e| AppError::Signing(e.to_string()))
                });
                try_join_all(signing).await
            }
        }
    }

    pub async fn sign_one(&self, category: &str, public_url: &str) -> AppResult<String> {
        let mut urls = self.sign_all(category, &[public_url.to_string()]).await?;
        urls.pop()
            .ok_or_else(|| AppError::Signing("no URL signed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedSigner;

    #[async_trait]
    impl BlobSigner for FixedSigner {
        async fn signer_email(&self) -> Result<String, GcpError> {
            Ok("api@project-8300.iam.gserviceaccount.com".to_string())
        }

        async fn sign_blob(&self, payload: &[u8]) -> Result<Vec<u8>, GcpError> {
            // Stand-in signature: the digest of what we were asked to sign
            Ok(Sha256::digest(payload).to_vec())
        }
    }

    fn cdn_signer() -> CdnSigner {
        CdnSigner::new(
            "https://cdn.swapwithus.com",
            "listing-images",
            "cdnkey".to_string(),
            b"0123456789abcdef",
        )
        .unwrap()
    }

    #[test]
    fn string_to_sign_follows_v4_layout() {
        let signer = V4UrlSigner::new("listing-images", Arc::new(FixedSigner));
        let now = Utc.with_ymd_and_hms(2025, 10, 5, 8, 30, 0).unwrap();
        let (query, string_to_sign) = signer.string_to_sign(
            "home/abc 1.jpg",
            "api@project-8300.iam.gserviceaccount.com",
            3600,
            now,
        );

        assert_eq!(
            query,
            "X-Goog-Algorithm=GOOG4-RSA-SHA256\
             &X-Goog-Credential=api%40project-8300.iam.gserviceaccount.com%2F20251005%2Fauto%2Fstorage%2Fgoog4_request\
             &X-Goog-Date=20251005T083000Z\
             &X-Goog-Expires=3600\
             &X-Goog-SignedHeaders=host"
        );

        let lines: Vec<&str> = string_to_sign.lines().collect();
        assert_eq!(lines[0], "GOOG4-RSA-SHA256");
        assert_eq!(lines[1], "20251005T083000Z");
        assert_eq!(lines[2], "20251005/auto/storage/goog4_request");
        assert_eq!(lines[3].len(), 64);
    }

    #[test]
    fn v4_expiry_is_clamped() {
        let signer = V4UrlSigner::new("listing-images", Arc::new(FixedSigner));
        let now = Utc::now();
        let (query, _) = signer.string_to_sign("home/a.jpg", "a@b", 30 * 24 * 3600, now);
        assert!(query.contains("X-Goog-Expires=604800"));
        let (query, _) = signer.string_to_sign("home/a.jpg", "a@b", 0, now);
        assert!(query.contains("X-Goog-Expires=1&"));
    }

    #[tokio::test]
    async fn v4_url_carries_hex_signature() {
        let signer = V4UrlSigner::new("listing-images", Arc::new(FixedSigner));
        let now = Utc.with_ymd_and_hms(2025, 10, 5, 8, 30, 0).unwrap();
        let url = signer.sign("home/a.jpg", 900, now).await.unwrap();

        assert!(url.starts_with("https://storage.googleapis.com/listing-images/home/a.jpg?"));
        let signature = url.rsplit("X-Goog-Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cdn_token_is_verifiable() {
        let signer = cdn_signer();
        let token = signer.url_prefix_token("https://cdn.swapwithus.com/home/", 1_760_000_000);

        let (policy, signature) = token.rsplit_once("&Signature=").unwrap();
        assert_eq!(
            policy,
            "URLPrefix=aHR0cHM6Ly9jZG4uc3dhcHdpdGh1cy5jb20vaG9tZS8&Expires=1760000000&KeyName=cdnkey"
        );
        assert!(!signature.contains('='));

        let mut mac = Hmac::<Sha1>::new_from_slice(b"0123456789abcdef").unwrap();
        mac.update(policy.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        assert_eq!(signature, expected);
    }

    #[test]
    fn cdn_url_maps_bucket_objects_only() {
        let signer = cdn_signer();
        assert_eq!(
            signer.cdn_url("https://storage.googleapis.com/listing-images/home/a.jpg"),
            Some("https://cdn.swapwithus.com/home/a.jpg".to_string())
        );
        assert_eq!(signer.cdn_url("https://storage.googleapis.com/elsewhere/a.jpg"), None);
        assert_eq!(signer.category_prefix("home"), "https://cdn.swapwithus.com/home/");
    }

    #[tokio::test]
    async fn cdn_mode_shares_one_token() {
        let urls = ImageUrlSigner::Cdn {
            signer: cdn_signer(),
            expiry_secs: 3600,
        };
        let signed = urls
            .sign_all(
                "home",
                &[
                    "https://storage.googleapis.com/listing-images/home/a.jpg".to_string(),
                    "https://storage.googleapis.com/listing-images/home/b.jpg".to_string(),
                ],
            )
            .await
            .unwrap();

        assert_eq!(signed.len(), 2);
        assert!(signed[0].starts_with("https://cdn.swapwithus.com/home/a.jpg?URLPrefix="));
        assert!(signed[1].starts_with("https://cdn.swapwithus.com/home/b.jpg?URLPrefix="));
        let token = |url: &str| url.split_once('?').map(|(_, t)| t.to_string());
        assert_eq!(token(&signed[0]), token(&signed[1]));
    }

    #[tokio::test]
    async fn foreign_urls_are_not_signed() {
        let urls = ImageUrlSigner::Gcs {
            signer: V4UrlSigner::new("listing-images", Arc::new(FixedSigner)),
            expiry_secs: 3600,
        };
        let result = urls
            .sign_one("home", "https://example.com/listing-images/home/a.jpg")
            .await;
        assert!(matches!(result, Err(AppError::Signing(_))));
    }

    #[test]
    fn nothing_to_sign() {
        let urls = ImageUrlSigner::Gcs {
            signer: V4UrlSigner::new("listing-images", Arc::new(FixedSigner)),
            expiry_secs: 3600,
        };
        let signed = tokio_test::block_on(urls.sign_all("home", &[])).unwrap();
        assert!(signed.is_empty());
    }
}
