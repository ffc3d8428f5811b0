mod credentials;
mod geocoding;
mod identity;
mod images;
mod listings;
mod signing;
mod storage;

pub use credentials::CredentialSource;
pub use geocoding::Geocoder;
pub use identity::{AuthFailure, CachedVerifier, FirebaseTokenVerifier, TokenVerifier};
pub use images::{check_upload, optimize, optimize_blocking, OptimizedImage, MAX_IMAGE_BYTES};
pub use listings::{discard_uploads, upload_images, UploadedFile, MAX_IMAGES_PER_LISTING};
pub use signing::{BlobSigner, CdnSigner, IamBlobSigner, ImageUrlSigner, V4UrlSigner};
pub use storage::{blob_name, blob_name_from_public_url, public_url, GcsStore, ObjectStore};

use thiserror::Error;

use crate::error::AppError;

/// Failures talking to Google Cloud endpoints
#[derive(Error, Debug)]
pub enum GcpError {
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl GcpError {
    /// Build an error from a non-success response, consuming its body
    async fn from_response(service: &'static str, response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        GcpError::Status {
            service,
            status,
            body,
        }
    }
}

impl From<GcpError> for AppError {
    fn from(e: GcpError) -> Self {
        AppError::Storage(e.to_string())
    }
}

/// RFC 3986 percent-encoding; `/` is kept when `keep_slash` is set
pub(crate) fn percent_encode(value: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encoding_is_strict() {
        assert_eq!(percent_encode("home/a b.jpg", true), "home/a%20b.jpg");
        assert_eq!(percent_encode("home/a b.jpg", false), "home%2Fa%20b.jpg");
        assert_eq!(
            percent_encode("svc@proj.iam.gserviceaccount.com", false),
            "svc%40proj.iam.gserviceaccount.com"
        );
        assert_eq!(percent_encode("~*+", false), "~%2A%2B");
    }
}
