use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};

use crate::error::{AppError, AppResult};
use crate::AppState;

/// UID already verified earlier in the same request (by the rate limiter)
#[derive(Clone, Debug)]
pub struct VerifiedUid(pub String);

/// Token the rate limiter already saw rejected, with the reason
#[derive(Clone, Debug)]
pub struct TokenRejected(pub String);

/// Extractor for the caller's verified Firebase identity
#[derive(Debug)]
pub struct AuthUser {
    pub uid: String,
}

impl AuthUser {
    /// Fail unless the caller is the user a resource belongs to
    pub fn require_owner(&self, claimed_uid: &str) -> AppResult<()> {
        if self.uid != claimed_uid {
            tracing::warn!("User {} tried to act as {}", self.uid, claimed_uid);
            return Err(AppError::NotAuthorized);
        }
        Ok(())
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(VerifiedUid(uid)) = parts.extensions.get::<VerifiedUid>() {
            return Ok(AuthUser { uid: uid.clone() });
        }
        if let Some(TokenRejected(reason)) = parts.extensions.get::<TokenRejected>() {
            return Err(AppError::InvalidToken(reason.clone()));
        }

        let token = bearer_token(&parts.headers).ok_or(AppError::NotAuthenticated)?;
        let uid = state.verifier.verify(&token).await?;

        parts.extensions.insert(VerifiedUid(uid.clone()));
        Ok(AuthUser { uid })
    }
}

/// Token from an `Authorization: Bearer` header
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
        .filter(|token| !token.is_empty())
}
