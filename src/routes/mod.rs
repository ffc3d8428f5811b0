pub mod favorites;
pub mod homes;
pub mod images;
pub mod users;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    BrowsePage, BrowseQuery, Home, HomeWithImages, ImageRow, ImageView, Pagination,
    HOME_CATEGORY,
};
use crate::AppState;

/// Health check endpoint
pub async fn health() -> Json<Value> {
    Json(json!({ "message": "Welcome to SwapWithUs API!" }))
}

/// Anything outside the API
pub async fn not_found() -> AppError {
    AppError::RouteNotFound
}

/// Public listing feed: homes with at least one image, newest first
pub async fn browse(
    State(state): State<Arc<AppState>>,
    query: Result<Query<BrowseQuery>, QueryRejection>,
) -> AppResult<Json<BrowsePage>> {
    let query = query_params(query)?;
    query.validate()?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM homes h
        WHERE EXISTS (SELECT 1 FROM images i WHERE i.listing_id = h.listing_id)
        "#,
    )
    .fetch_one(state.db.pool())
    .await?;

    let homes: Vec<Home> = sqlx::query_as(
        r#"
        SELECT h.* FROM homes h
        WHERE EXISTS (SELECT 1 FROM images i WHERE i.listing_id = h.listing_id)
        ORDER BY h.created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(query.page_size())
    .bind(query.offset())
    .fetch_all(state.db.pool())
    .await?;

    let homes = attach_images(&state, homes, true).await?;
    tracing::debug!("Browse page {} with {} homes", query.page(), homes.len());

    Ok(Json(BrowsePage {
        homes,
        pagination: Pagination::new(query.page(), query.page_size(), total),
    }))
}

/// Load and sign the images of `homes`, keeping the homes' order.
///
/// Images come ordered by `sort_order`; with `hero_first` the hero moves to the front.
pub(crate) async fn attach_images(
    state: &AppState,
    homes: Vec<Home>,
    hero_first: bool,
) -> AppResult<Vec<HomeWithImages>> {
    if homes.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = homes.iter().map(|home| home.listing_id).collect();
    let rows: Vec<ImageRow> = sqlx::query_as(
        r#"
        SELECT listing_id, public_url, tag, caption, is_hero, sort_order
        FROM images
        WHERE listing_id = ANY($1) AND category = $2
        ORDER BY listing_id, sort_order
        "#,
    )
    .bind(&ids[..])
    .bind(HOME_CATEGORY)
    .fetch_all(state.db.pool())
    .await?;

    let urls: Vec<String> = rows.iter().map(|row| row.public_url.clone()).collect();
    let signed = state.image_urls.sign_all(HOME_CATEGORY, &urls).await?;

    let mut by_listing: HashMap<Uuid, Vec<ImageView>> = HashMap::new();
    for (row, signed_url) in rows.into_iter().zip(signed) {
        by_listing
            .entry(row.listing_id)
            .or_default()
            .push(ImageView::new(row, signed_url));
    }

    Ok(homes
        .into_iter()
        .map(|home| {
            let mut images = by_listing.remove(&home.listing_id).unwrap_or_default();
            if hero_first {
                images.sort_by_key(|image| !image.is_hero);
            }
            HomeWithImages::new(home, images)
        })
        .collect())
}

/// Query string parse failures are validation errors
pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}
