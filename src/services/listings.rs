//! Image uploads for listings, kept outside database transactions

use chrono::Utc;
use futures::future::{join_all, try_join_all};
use uuid::Uuid;

use super::images::{check_upload, optimize_blocking};
use super::storage::{blob_name, ObjectStore};
use crate::error::{AppError, AppResult};

pub const MAX_IMAGES_PER_LISTING: usize = 20;

/// A file part from a multipart form
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Optimise and upload every file concurrently, returning public URLs in input order.
///
/// Invalid files fail the whole batch before anything is uploaded. If any
/// upload fails, the ones that succeeded are deleted again.
pub async fn upload_images(
    store: &dyn ObjectStore,
    listing_id: Uuid,
    category: &str,
    files: Vec<UploadedFile>,
) -> AppResult<Vec<String>> {
    for file in &files {
        check_upload(file.content_type.as_deref(), file.data.len())?;
    }

    let optimized = try_join_all(files.into_iter().map(|file| optimize_blocking(file.data))).await?;

    let now = Utc::now();
    let uploads = optimized.into_iter().map(|image| async move {
        let name = blob_name(category, listing_id, image.extension, now);
        store.put(&name, image.data, image.content_type).await
    });
    let results = join_all(uploads).await;

    let failures = results.iter().filter(|r| r.is_err()).count();
    if failures == 0 {
        tracing::info!("Uploaded {} images for listing {}", results.len(), listing_id);
        return Ok(results.into_iter().flatten().collect());
    }

    for error in results.iter().filter_map(|r| r.as_ref().err()) {
        tracing::error!("Image upload for listing {} failed: {}", listing_id, error);
    }
    let uploaded: Vec<String> = results.into_iter().flatten().collect();
    discard_uploads(store, &uploaded).await;

    Err(AppError::UploadFailed)
}

/// Best-effort removal of objects whose database rows never made it
pub async fn discard_uploads(store: &dyn ObjectStore, public_urls: &[String]) {
    if public_urls.is_empty() {
        return;
    }
    let deleted = join_all(public_urls.iter().map(|url| store.delete(url)))
        .await
        .into_iter()
        .filter(|ok| *ok)
        .count();
    if deleted < public_urls.len() {
        tracing::warn!(
            "Removed {} of {} uploaded images; the rest are orphaned",
            deleted,
            public_urls.len()
        );
    }
}
