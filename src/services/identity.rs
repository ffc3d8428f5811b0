//! Firebase ID token verification through the Identity Toolkit API

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::FirebaseConfig;
use crate::error::AppError;

/// How long a lookup result is trusted
const VERDICT_TTL: Duration = Duration::from_secs(60);

/// Drop expired verdicts once this many tokens are remembered
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Error, Debug)]
pub enum AuthFailure {
    /// The token is malformed, expired, revoked or belongs to a disabled account
    #[error("{0}")]
    Rejected(String),

    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

impl From<AuthFailure> for AppError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::Rejected(reason) => AppError::InvalidToken(reason),
            AuthFailure::Unavailable(reason) => AppError::Internal(reason),
        }
    }
}

/// Resolves a bearer token to the Firebase UID it was issued for
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, AuthFailure>;
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    disabled: bool,
}

#[derive(Deserialize)]
struct LookupError {
    error: LookupErrorBody,
}

#[derive(Deserialize)]
struct LookupErrorBody {
    message: String,
}

pub struct FirebaseTokenVerifier {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FirebaseTokenVerifier {
    pub fn new(config: &FirebaseConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: config.identity_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl TokenVerifier for FirebaseTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthFailure> {
        let url = format!("{}/v1/accounts:lookup", self.base_url);
        let response = self
            .http
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&json!({ "idToken": token }))
            .send()
            .await
            .map_err(|e| AuthFailure::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            // Identity Toolkit answers 400 with a reason code for bad tokens
            let reason = response
                .json::<LookupError>()
                .await
                .map(|e| e.error.message)
                .unwrap_or_else(|_| status.to_string());
            tracing::debug!("Token rejected: {}", reason);
            return Err(AuthFailure::Rejected(reason));
        }
        if !status.is_success() {
            return Err(AuthFailure::Unavailable(format!(
                "accounts:lookup returned {}",
                status
            )));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| AuthFailure::Unavailable(e.to_string()))?;

        match body.users.into_iter().next() {
            Some(user) if user.disabled => Err(AuthFailure::Rejected("USER_DISABLED".into())),
            Some(user) => Ok(user.local_id),
            None => Err(AuthFailure::Rejected("USER_NOT_FOUND".into())),
        }
    }
}

struct Verdict {
    outcome: Result<String, String>,
    expires_at: Instant,
}

/// Remembers recent verdicts so each token is looked up once per window.
///
/// Accepted and rejected tokens are both remembered, keyed by a SHA-256 of
/// the token; outages are never cached.
pub struct CachedVerifier {
    inner: Arc<dyn TokenVerifier>,
    ttl: Duration,
    verdicts: Mutex<HashMap<String, Verdict>>,
}

impl CachedVerifier {
    pub fn new(inner: Arc<dyn TokenVerifier>) -> Self {
        Self::with_ttl(inner, VERDICT_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn TokenVerifier>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            verdicts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TokenVerifier for CachedVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthFailure> {
        let key = hex::encode(Sha256::digest(token.as_bytes()));
        let now = Instant::now();

        let cached = {
            let verdicts = self.verdicts.lock();
            verdicts
                .get(&key)
                .filter(|verdict| now < verdict.expires_at)
                .map(|verdict| verdict.outcome.clone())
        };
        if let Some(outcome) = cached {
            return outcome.map_err(AuthFailure::Rejected);
        }

        let result = self.inner.verify(token).await;
        let outcome = match &result {
            Ok(uid) => Some(Ok(uid.clone())),
            Err(AuthFailure::Rejected(reason)) => Some(Err(reason.clone())),
            Err(AuthFailure::Unavailable(_)) => None,
        };
        let Some(outcome) = outcome else {
            return result;
        };

        let mut verdicts = self.verdicts.lock();
        if verdicts.len() >= PRUNE_THRESHOLD {
            verdicts.retain(|_, verdict| verdict.expires_at > now);
        }
        verdicts.insert(
            key,
            Verdict {
                outcome,
                expires_at: now + self.ttl,
            },
        );
        result
    }
}
