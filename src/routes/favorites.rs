use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::users::json_error;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::{FavoriteHome, HOME_CATEGORY};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub listing_id: Option<String>,
}

/// The caller's favourite homes with their hero images
pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<FavoriteHome>>> {
    let mut favorites: Vec<FavoriteHome> = sqlx::query_as(
        r#"
        SELECT h.*, hero.public_url AS hero_image_url
        FROM favorites f
        JOIN homes h ON h.listing_id = f.listing_id
        LEFT JOIN LATERAL (
            SELECT i.public_url FROM images i
            WHERE i.listing_id = h.listing_id AND i.is_hero = TRUE
            ORDER BY i.sort_order
            LIMIT 1
        ) hero ON TRUE
        WHERE f.owner_firebase_uid = $1
        ORDER BY f.created_at DESC
        "#,
    )
    .bind(&user.uid)
    .fetch_all(state.db.pool())
    .await?;

    let heroes: Vec<String> = favorites
        .iter()
        .filter_map(|favorite| favorite.hero_image_url.clone())
        .collect();
    let mut signed = state
        .image_urls
        .sign_all(HOME_CATEGORY, &heroes)
        .await?
        .into_iter();

    for favorite in favorites.iter_mut() {
        if favorite.hero_image_url.is_some() {
            favorite.signed_url = signed.next();
        }
    }

    Ok(Json(favorites))
}

/// Mark a listing as favourite; repeating it is harmless
pub async fn add(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Result<Json<FavoriteRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(request) = body.map_err(json_error)?;
    let listing_id = request
        .listing_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::invalid("listing_id is required"))?;
    let listing_id = parse_listing_id(&listing_id)?;
    tracing::info!("Adding favorite {} for user {}", listing_id, user.uid);

    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM homes WHERE listing_id = $1")
        .bind(listing_id)
        .fetch_optional(state.db.pool())
        .await?;
    if exists.is_none() {
        return Err(AppError::ListingNotFound);
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO favorites (owner_firebase_uid, listing_id)
        VALUES ($1, $2)
        ON CONFLICT (owner_firebase_uid, listing_id) DO NOTHING
        "#,
    )
    .bind(&user.uid)
    .bind(listing_id)
    .execute(state.db.pool())
    .await;

    match inserted {
        Ok(_) => Ok(Json(json!({ "message": "Listing added to favorites" }))),
        // Favourites hang off the user row, which registration creates
        Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
            Err(AppError::UserNotFound)
        }
        Err(e) => Err(e.into()),
    }
}

/// Unmark a favourite; unknown ones are ignored
pub async fn remove(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(listing_id): Path<String>,
) -> AppResult<Json<Value>> {
    let listing_id = parse_listing_id(&listing_id)?;

    sqlx::query("DELETE FROM favorites WHERE owner_firebase_uid = $1 AND listing_id = $2")
        .bind(&user.uid)
        .bind(listing_id)
        .execute(state.db.pool())
        .await?;

    Ok(Json(json!({ "message": "Listing removed from favorites" })))
}

fn parse_listing_id(value: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|_| AppError::invalid("listing_id must be a UUID"))
}
