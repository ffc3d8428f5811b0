use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::check_opt_len;
use crate::error::AppResult;

/// Image category for home listings
pub const HOME_CATEGORY: &str = "home";

/// Image row as stored
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub listing_id: Uuid,
    pub public_url: String,
    pub tag: Option<String>,
    pub caption: Option<String>,
    pub is_hero: bool,
    pub sort_order: i32,
}

/// Image as returned to clients, with a signed URL
#[derive(Debug, Clone, Serialize)]
pub struct ImageView {
    pub public_url: String,
    pub signed_url: String,
    pub tag: Option<String>,
    pub caption: Option<String>,
    pub is_hero: bool,
    pub sort_order: i32,
}

impl ImageView {
    pub fn new(row: ImageRow, signed_url: String) -> Self {
        Self {
            public_url: row.public_url,
            signed_url,
            tag: row.tag,
            caption: row.caption,
            is_hero: row.is_hero,
            sort_order: row.sort_order,
        }
    }
}

/// Per-image metadata sent with the listing form
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub caption: Option<String>,
    pub tag: Option<String>,
    #[serde(default, alias = "is_hero")]
    pub is_hero: Option<bool>,
    #[serde(alias = "sort_order")]
    pub sort_order: Option<i32>,
    /// Set for images that already exist when editing a listing
    #[serde(alias = "public_url")]
    pub public_url: Option<String>,
}

impl ImageMetadata {
    /// True for an entry that still needs its file uploaded
    pub fn is_new(&self) -> bool {
        self.public_url.as_deref().map_or(true, str::is_empty)
    }

    pub fn validate(&self) -> AppResult<()> {
        check_opt_len("caption", self.caption.as_ref(), 0, 200)?;
        check_opt_len("tag", self.tag.as_ref(), 0, 100)?;
        check_opt_len("public_url", self.public_url.as_ref(), 0, 2048)?;
        if let Some(order) = self.sort_order {
            super::check_range("sort_order", order, 0, i32::MAX)?;
        }
        Ok(())
    }
}

/// Image part of the listing form
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadataCollection {
    #[serde(default, alias = "images_metadata")]
    pub images_metadata: Vec<ImageMetadata>,
    #[serde(default, alias = "deleted_public_urls")]
    pub deleted_public_urls: Vec<String>,
}

impl ImageMetadataCollection {
    pub fn validate(&self) -> AppResult<()> {
        for metadata in &self.images_metadata {
            metadata.validate()?;
        }
        for url in &self.deleted_public_urls {
            check_opt_len("deleted_public_urls", Some(url), 0, 2048)?;
        }
        Ok(())
    }

    pub fn new_image_count(&self) -> usize {
        self.images_metadata.iter().filter(|m| m.is_new()).count()
    }

    /// An existing image listed both as kept and as deleted
    pub fn kept_and_deleted(&self) -> Option<&str> {
        self.images_metadata
            .iter()
            .filter_map(|meta| meta.public_url.as_deref())
            .filter(|url| !url.is_empty())
            .find(|url| {
                self.deleted_public_urls
                    .iter()
                    .any(|deleted| deleted.as_str() == *url)
            })
    }
}

/// Signed URL handed out for a single image
#[derive(Debug, Clone, Serialize)]
pub struct SignedImageUrl {
    pub signed_url: String,
    pub expires_in: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_images_have_no_public_url() {
        let collection: ImageMetadataCollection = serde_json::from_str(
            r#"{
                "imagesMetadata": [
                    {"caption": "Kitchen", "isHero": true, "sortOrder": 0},
                    {"publicUrl": "https://storage.googleapis.com/b/home/a.jpg", "sortOrder": 1},
                    {"publicUrl": "", "sortOrder": 2}
                ],
                "deletedPublicUrls": ["https://storage.googleapis.com/b/home/old.jpg"]
            }"#,
        )
        .unwrap();

        assert_eq!(collection.new_image_count(), 2);
        assert_eq!(collection.deleted_public_urls.len(), 1);
        assert!(collection.validate().is_ok());
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let collection: ImageMetadataCollection =
            serde_json::from_str(r#"{"title": "ignored"}"#).unwrap();
        assert!(collection.images_metadata.is_empty());
        assert!(collection.deleted_public_urls.is_empty());
    }

    #[test]
    fn long_caption_is_rejected() {
        let metadata = ImageMetadata {
            caption: Some("x".repeat(201)),
            ..Default::default()
        };
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn kept_and_deleted_overlap_is_found() {
        let collection: ImageMetadataCollection = serde_json::from_str(
            r#"{
                "imagesMetadata": [
                    {"publicUrl": "https://storage.googleapis.com/b/home/a.jpg"},
                    {"publicUrl": "https://storage.googleapis.com/b/home/b.jpg"}
                ],
                "deletedPublicUrls": ["https://storage.googleapis.com/b/home/b.jpg"]
            }"#,
        )
        .unwrap();
        assert_eq!(
            collection.kept_and_deleted(),
            Some("https://storage.googleapis.com/b/home/b.jpg")
        );

        let disjoint = ImageMetadataCollection {
            deleted_public_urls: vec!["https://storage.googleapis.com/b/home/c.jpg".into()],
            ..collection
        };
        assert_eq!(disjoint.kept_and_deleted(), None);
    }
}
