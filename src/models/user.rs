use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{check_len, check_opt_len};
use crate::db::{ColumnSet, Table};
use crate::error::{AppError, AppResult};

/// Full profile, returned to its owner only
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub owner_firebase_uid: String,
    pub email: String,
    pub name: Option<String>,
    pub profile_image: Option<String>,
    pub phone_country_code: Option<String>,
    pub phone_number: Option<String>,
    pub linkedin_url: Option<String>,
    pub instagram_id: Option<String>,
    pub facebook_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What other users may see
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PublicProfile {
    pub owner_firebase_uid: String,
    pub name: Option<String>,
    pub profile_image: Option<String>,
}

/// Create user request, sent right after Firebase sign-up
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(alias = "owner_firebase_uid")]
    pub owner_firebase_uid: String,
    pub email: String,
    pub name: String,
    #[serde(default, alias = "profile_image")]
    pub profile_image: Option<String>,
    #[serde(alias = "is_email_verified")]
    pub is_email_verified: bool,
}

impl CreateUserRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_len("email", &self.email, 3, 255)?;
        if !looks_like_email(&self.email) {
            return Err(AppError::validation("email", "must be a valid email address"));
        }
        check_len("name", &self.name, 2, 100)?;
        check_opt_len("profile_image", self.profile_image.as_ref(), 0, 500)
    }
}

/// Partial profile update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    #[serde(alias = "phone_country_code")]
    pub phone_country_code: Option<String>,
    #[serde(alias = "phone_number")]
    pub phone_number: Option<String>,
    #[serde(alias = "linkedin_url")]
    pub linkedin_url: Option<String>,
    #[serde(alias = "instagram_id")]
    pub instagram_id: Option<String>,
    #[serde(alias = "facebook_id")]
    pub facebook_id: Option<String>,
    #[serde(alias = "profile_image")]
    pub profile_image: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_opt_len("name", self.name.as_ref(), 2, 100)?;
        check_opt_len("phone_country_code", self.phone_country_code.as_ref(), 2, 5)?;
        if let Some(number) = &self.phone_number {
            let digits = number.chars().all(|c| c.is_ascii_digit());
            if !digits || !(4..=15).contains(&number.len()) {
                return Err(AppError::validation("phone_number", "must be 4 to 15 digits"));
            }
        }
        check_opt_len("linkedin_url", self.linkedin_url.as_ref(), 5, 200)?;
        check_opt_len("instagram_id", self.instagram_id.as_ref(), 2, 100)?;
        check_opt_len("facebook_id", self.facebook_id.as_ref(), 2, 100)?;
        check_opt_len("profile_image", self.profile_image.as_ref(), 0, 500)
    }

    /// Columns to write, provided fields only
    pub fn columns(&self) -> ColumnSet {
        let mut columns = ColumnSet::new(Table::Users);
        columns
            .set_opt("name", self.name.clone())
            .set_opt("phone_country_code", self.phone_country_code.clone())
            .set_opt("phone_number", self.phone_number.clone())
            .set_opt("linkedin_url", self.linkedin_url.clone())
            .set_opt("instagram_id", self.instagram_id.clone())
            .set_opt("facebook_id", self.facebook_id.clone())
            .set_opt("profile_image", self.profile_image.clone());
        columns
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}
