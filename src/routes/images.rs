use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Deserialize;

use super::query_params;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::SignedImageUrl;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub public_url: String,
}

/// Fresh signed URL for one stored image
pub async fn signed_url(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    query: Result<Query<SignedUrlQuery>, QueryRejection>,
) -> AppResult<Json<SignedImageUrl>> {
    let SignedUrlQuery { public_url } = query_params(query)?;

    let category: String =
        sqlx::query_scalar("SELECT category FROM images WHERE public_url = $1 LIMIT 1")
            .bind(&public_url)
            .fetch_optional(state.db.pool())
            .await?
            .ok_or(AppError::ImageNotFound)?;

    let signed_url = state.image_urls.sign_one(&category, &public_url).await?;
    tracing::debug!("Signed {} for {}", public_url, user.uid);

    Ok(Json(SignedImageUrl {
        signed_url,
        expires_in: state.image_urls.expiry_secs(),
    }))
}
