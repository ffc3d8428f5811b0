use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{PathRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{attach_images, query_params};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::{
    Home, HomeInput, HomeWithImages, ImageMetadata, ImageMetadataCollection, HOME_CATEGORY,
};
use crate::services::{discard_uploads, upload_images, UploadedFile, MAX_IMAGES_PER_LISTING};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner_firebase_uid: Option<String>,
}

/// Listings of one owner; only that owner may ask
pub async fn list_for_owner(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    query: Result<Query<OwnerQuery>, QueryRejection>,
) -> AppResult<Json<Vec<HomeWithImages>>> {
    let owner = query_params(query)?
        .owner_firebase_uid
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| AppError::validation("owner_firebase_uid", "field required"))?;
    user.require_owner(&owner)?;

    Ok(Json(owner_homes(&state, &owner).await?))
}

/// The caller's own listings
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<HomeWithImages>>> {
    Ok(Json(owner_homes(&state, &user.uid).await?))
}

async fn owner_homes(state: &AppState, owner: &str) -> AppResult<Vec<HomeWithImages>> {
    let homes: Vec<Home> = sqlx::query_as(
        "SELECT * FROM homes WHERE owner_firebase_uid = $1 ORDER BY created_at DESC",
    )
    .bind(owner)
    .fetch_all(state.db.pool())
    .await?;

    attach_images(state, homes, false).await
}

/// Create a listing from the multipart listing form
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    let form = ListingForm::read(multipart).await?;
    let (mut input, metadata) = form.parse()?;
    user.require_owner(&input.owner_firebase_uid)?;
    input.validate()?;
    metadata.validate()?;

    let email = input
        .email
        .clone()
        .ok_or_else(|| AppError::validation("email", "field required"))?;

    let files = form.files;
    if files.is_empty() {
        return Err(AppError::invalid("At least one image is required"));
    }
    if files.len() > MAX_IMAGES_PER_LISTING {
        return Err(AppError::invalid("Maximum 20 images allowed per listing"));
    }
    if files.len() != metadata.images_metadata.len() {
        return Err(AppError::invalid("Image count doesn't match metadata count"));
    }

    if input.latitude.is_none() && input.longitude.is_none() {
        if let Some(geocoder) = &state.geocoder {
            if let Some((lat, lng)) = geocoder.geocode(&input.address()).await {
                input.latitude = Some(lat);
                input.longitude = Some(lng);
            }
        }
    }

    let listing_id = Uuid::new_v4();
    tracing::info!(
        "Creating listing {} for user {} with {} images",
        listing_id,
        user.uid,
        files.len()
    );

    let urls = upload_images(state.store.as_ref(), listing_id, HOME_CATEGORY, files).await?;

    let saved = insert_listing(
        &state,
        &input,
        &email,
        listing_id,
        &metadata.images_metadata,
        &urls,
    )
    .await;
    if let Err(e) = saved {
        tracing::error!("Saving listing {} failed, removing its uploads", listing_id);
        discard_uploads(state.store.as_ref(), &urls).await;
        return Err(e);
    }

    tracing::info!("Created listing {}", listing_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": listing_id,
            "message": "Home listing created successfully",
            "image_count": urls.len(),
        })),
    ))
}

async fn insert_listing(
    state: &AppState,
    input: &HomeInput,
    email: &str,
    listing_id: Uuid,
    metadata: &[ImageMetadata],
    urls: &[String],
) -> AppResult<()> {
    let mut tx = state.db.pool().begin().await?;

    sqlx::query(
        r#"
        INSERT INTO users (owner_firebase_uid, email, name, profile_image)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&input.owner_firebase_uid)
    .bind(email)
    .bind(&input.name)
    .bind(&input.profile_image)
    .execute(&mut *tx)
    .await?;

    input
        .insert_columns(listing_id)
        .into_insert()
        .build()
        .execute(&mut *tx)
        .await?;

    for (index, (meta, url)) in metadata.iter().zip(urls).enumerate() {
        upsert_image(&mut tx, &input.owner_firebase_uid, listing_id, url, meta, index).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Update listing fields and reconcile its images
pub async fn update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    listing_id: Result<Path<Uuid>, PathRejection>,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    let listing_id = listing_path(listing_id)?;
    let owner = listing_owner(&state, listing_id).await?;
    if owner != user.uid {
        return Err(AppError::NotListingOwner);
    }

    let form = ListingForm::read(multipart).await?;
    let (input, metadata) = form.parse()?;
    input.validate()?;
    metadata.validate()?;
    if let Some(url) = metadata.kept_and_deleted() {
        return Err(AppError::invalid(format!(
            "Image cannot be both kept and deleted: {}",
            url
        )));
    }

    let new_count = metadata.new_image_count();
    if new_count > MAX_IMAGES_PER_LISTING {
        return Err(AppError::invalid("Maximum 20 new images allowed"));
    }
    let files = form.files;
    if files.len() != new_count {
        return Err(AppError::invalid(format!(
            "Expected {} new images, got {}",
            new_count,
            files.len()
        )));
    }

    let known: HashSet<String> =
        sqlx::query_scalar("SELECT public_url FROM images WHERE listing_id = $1")
            .bind(listing_id)
            .fetch_all(state.db.pool())
            .await?
            .into_iter()
            .collect();
    let foreign = metadata
        .images_metadata
        .iter()
        .filter_map(|meta| meta.public_url.as_ref())
        .find(|url| !url.is_empty() && !known.contains(*url));
    if let Some(url) = foreign {
        return Err(AppError::invalid(format!(
            "Image does not belong to this listing: {}",
            url
        )));
    }

    tracing::info!(
        "Updating listing {}: {} new images, {} to delete",
        listing_id,
        new_count,
        metadata.deleted_public_urls.len()
    );

    let uploaded = if files.is_empty() {
        Vec::new()
    } else {
        upload_images(state.store.as_ref(), listing_id, HOME_CATEGORY, files).await?
    };

    // New entries take the uploaded URLs in order
    let mut fresh = uploaded.iter();
    let records: Vec<(String, &ImageMetadata)> = metadata
        .images_metadata
        .iter()
        .filter_map(|meta| {
            let url = if meta.is_new() {
                fresh.next().cloned()
            } else {
                meta.public_url.clone()
            };
            url.map(|url| (url, meta))
        })
        .collect();

    let saved = update_listing(
        &state,
        &owner,
        listing_id,
        &input,
        &records,
        &metadata.deleted_public_urls,
    )
    .await;
    let removed = match saved {
        Ok(removed) => removed,
        Err(e) => {
            discard_uploads(state.store.as_ref(), &uploaded).await;
            return Err(e);
        }
    };

    delete_objects(&state, &removed).await;

    tracing::info!("Updated listing {}", listing_id);
    Ok(Json(json!({
        "success": true,
        "listing_id": listing_id,
        "message": "Listing updated successfully",
        "images_updated": records.len(),
        "images_deleted": removed.len(),
    })))
}

/// Returns the URLs whose rows were removed
async fn update_listing(
    state: &AppState,
    owner: &str,
    listing_id: Uuid,
    input: &HomeInput,
    records: &[(String, &ImageMetadata)],
    deleted_urls: &[String],
) -> AppResult<Vec<String>> {
    let mut tx = state.db.pool().begin().await?;

    input
        .update_columns()
        .into_update("listing_id", listing_id)
        .build()
        .execute(&mut *tx)
        .await?;

    let removed: Vec<String> = if deleted_urls.is_empty() {
        Vec::new()
    } else {
        sqlx::query_scalar(
            "DELETE FROM images WHERE listing_id = $1 AND public_url = ANY($2) RETURNING public_url",
        )
        .bind(listing_id)
        .bind(deleted_urls)
        .fetch_all(&mut *tx)
        .await?
    };

    for (index, (url, meta)) in records.iter().enumerate() {
        upsert_image(&mut tx, owner, listing_id, url, meta, index).await?;
    }

    tx.commit().await?;
    Ok(removed)
}

/// Delete a listing, its image rows and its stored images
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    listing_id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<Value>> {
    let listing_id = listing_path(listing_id)?;
    let owner = listing_owner(&state, listing_id).await?;
    if owner != user.uid {
        return Err(AppError::NotListingOwner);
    }

    let mut tx = state.db.pool().begin().await?;
    let urls: Vec<String> =
        sqlx::query_scalar("SELECT public_url FROM images WHERE listing_id = $1")
            .bind(listing_id)
            .fetch_all(&mut *tx)
            .await?;
    sqlx::query("DELETE FROM homes WHERE listing_id = $1")
        .bind(listing_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!("Deleted listing {}", listing_id);

    delete_objects(&state, &urls).await;

    Ok(Json(json!({
        "message": "Listing deleted successfully with its corresponding images from image table and storage"
    })))
}

/// Malformed listing ids cannot name a listing
fn listing_path(path: Result<Path<Uuid>, PathRejection>) -> AppResult<Uuid> {
    path.map(|Path(id)| id).map_err(|_| AppError::ListingNotFound)
}

async fn listing_owner(state: &AppState, listing_id: Uuid) -> AppResult<String> {
    sqlx::query_scalar("SELECT owner_firebase_uid FROM homes WHERE listing_id = $1")
        .bind(listing_id)
        .fetch_optional(state.db.pool())
        .await?
        .ok_or(AppError::ListingNotFound)
}

async fn upsert_image(
    tx: &mut Transaction<'_, Postgres>,
    owner: &str,
    listing_id: Uuid,
    public_url: &str,
    meta: &ImageMetadata,
    index: usize,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO images (
            owner_firebase_uid, listing_id, category, public_url,
            tag, caption, is_hero, sort_order
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (listing_id, public_url) DO UPDATE SET
            tag = EXCLUDED.tag,
            caption = EXCLUDED.caption,
            is_hero = EXCLUDED.is_hero,
            sort_order = EXCLUDED.sort_order,
            updated_at = NOW()
        "#,
    )
    .bind(owner)
    .bind(listing_id)
    .bind(HOME_CATEGORY)
    .bind(public_url)
    .bind(&meta.tag)
    .bind(&meta.caption)
    .bind(meta.is_hero.unwrap_or(false))
    .bind(meta.sort_order.unwrap_or(index as i32))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Remove stored objects after their rows are gone; failures are only logged
pub(crate) async fn delete_objects(state: &AppState, urls: &[String]) {
    if urls.is_empty() {
        return;
    }
    let results = join_all(urls.iter().map(|url| state.store.delete(url))).await;
    let failed = results.iter().filter(|ok| !**ok).count();
    if failed > 0 {
        tracing::error!("Failed to delete {} of {} images from storage", failed, urls.len());
    } else {
        tracing::info!("Deleted {} images from storage", urls.len());
    }
}

/// Parts of the listing form
struct ListingForm {
    listing: String,
    files: Vec<UploadedFile>,
}

impl ListingForm {
    async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut listing = None;
        let mut files = Vec::new();

        while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
            match field.name() {
                Some("listing") => listing = Some(field.text().await.map_err(bad_form)?),
                Some("images") => {
                    let file_name = field.file_name().map(str::to_owned);
                    let content_type = field.content_type().map(str::to_owned);
                    let data = field.bytes().await.map_err(bad_form)?.to_vec();
                    // Browsers send an empty part when no file was picked
                    if data.is_empty() && file_name.as_deref().map_or(true, str::is_empty) {
                        continue;
                    }
                    files.push(UploadedFile {
                        file_name,
                        content_type,
                        data,
                    });
                }
                _ => {}
            }
        }

        let listing = listing.ok_or_else(|| AppError::validation("listing", "field required"))?;
        Ok(Self { listing, files })
    }

    fn parse(&self) -> AppResult<(HomeInput, ImageMetadataCollection)> {
        let input: HomeInput = serde_json::from_str(&self.listing)
            .map_err(|e| AppError::validation("listing", e))?;
        let metadata: ImageMetadataCollection = serde_json::from_str(&self.listing)
            .map_err(|e| AppError::validation("listing", e))?;
        Ok((input, metadata))
    }
}

fn bad_form(e: MultipartError) -> AppError {
    AppError::invalid(e.body_text())
}
