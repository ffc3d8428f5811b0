use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{check_choice, check_len, check_opt_len, check_range, ImageView};
use crate::db::{ColumnSet, Table};
use crate::error::{AppError, AppResult};

pub const ACCOMMODATION_TYPES: &[&str] = &["entire_place", "private_room"];

pub const PROPERTY_TYPES: &[&str] = &[
    "apartment",
    "detached_house",
    "terrace_house",
    "duplex",
    "studio",
    "cottage",
    "loft",
    "cabin",
    "other",
];

pub const PARKING_TYPES: &[&str] = &["none", "street", "driveway", "garage", "covered"];

pub const LISTING_STATUSES: &[&str] = &["draft", "published", "archived"];

/// Home listing row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Home {
    pub listing_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner_firebase_uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub profile_image: Option<String>,
    pub accommodation_type: String,
    pub property_type: String,
    pub max_guests: i32,
    pub bedrooms: Option<i32>,
    pub size_m2: Option<f64>,
    pub surroundings_type: Option<String>,
    pub country: String,
    pub city: String,
    pub street_address: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub privacy_radius: Option<i32>,
    pub house_rules: Option<serde_json::Value>,
    pub main_residence: Option<bool>,
    pub open_to_car_swap: bool,
    pub require_car_swap_match: bool,
    pub car_details: Option<serde_json::Value>,
    pub amenities: Option<serde_json::Value>,
    pub accessibility_features: Option<serde_json::Value>,
    pub parking_type: Option<String>,
    pub is_flexible: Option<bool>,
    pub available_from: Option<NaiveDate>,
    pub available_until: Option<NaiveDate>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
}

/// Car offered alongside the home
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarDetails {
    #[serde(alias = "make_model_year", skip_serializing_if = "Option::is_none")]
    pub make_model_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmission: Option<String>,
    #[serde(alias = "fuel_type", skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    #[serde(alias = "connector_type", skip_serializing_if = "Option::is_none")]
    pub connector_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats: Option<i32>,
    #[serde(alias = "insurance_status", skip_serializing_if = "Option::is_none")]
    pub insurance_status: Option<String>,
    #[serde(alias = "min_driver_age", skip_serializing_if = "Option::is_none")]
    pub min_driver_age: Option<i32>,
    #[serde(alias = "mileage_limit", skip_serializing_if = "Option::is_none")]
    pub mileage_limit: Option<i32>,
    #[serde(alias = "pickup_note", skip_serializing_if = "Option::is_none")]
    pub pickup_note: Option<String>,
}

impl CarDetails {
    fn validate(&self) -> AppResult<()> {
        if let Some(seats) = self.seats {
            check_range("car_details.seats", seats, 1, 20)?;
        }
        if let Some(age) = self.min_driver_age {
            check_range("car_details.min_driver_age", age, 16, 99)?;
        }
        if let Some(limit) = self.mileage_limit {
            check_range("car_details.mileage_limit", limit, 0, i32::MAX)?;
        }
        Ok(())
    }
}

/// Listing fields posted by the multi-step listing form
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeInput {
    #[serde(alias = "owner_firebase_uid")]
    pub owner_firebase_uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "profile_image")]
    pub profile_image: Option<String>,

    #[serde(alias = "accommodation_type")]
    pub accommodation_type: String,
    #[serde(alias = "property_type")]
    pub property_type: String,

    #[serde(alias = "max_guests")]
    pub max_guests: i32,
    pub bedrooms: Option<i32>,
    #[serde(alias = "size_m2")]
    pub size_m2: Option<f64>,
    #[serde(alias = "surroundings_type")]
    pub surroundings_type: Option<String>,

    pub country: String,
    pub city: String,
    #[serde(alias = "street_address")]
    pub street_address: Option<String>,
    #[serde(alias = "postal_code")]
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(alias = "privacy_radius")]
    pub privacy_radius: Option<i32>,

    #[serde(default, alias = "house_rules")]
    pub house_rules: Vec<String>,
    #[serde(alias = "main_residence")]
    pub main_residence: Option<bool>,

    #[serde(default, alias = "open_to_car_swap")]
    pub open_to_car_swap: bool,
    #[serde(default, alias = "require_car_swap_match")]
    pub require_car_swap_match: bool,
    #[serde(alias = "car_details")]
    pub car_details: Option<CarDetails>,

    #[serde(default)]
    pub amenities: serde_json::Map<String, serde_json::Value>,
    #[serde(default, alias = "accessibility_features")]
    pub accessibility_features: Vec<String>,
    #[serde(alias = "parking_type")]
    pub parking_type: Option<String>,

    #[serde(alias = "is_flexible")]
    pub is_flexible: Option<bool>,
    #[serde(alias = "available_from")]
    pub available_from: Option<NaiveDate>,
    #[serde(alias = "available_until")]
    pub available_until: Option<NaiveDate>,

    pub title: String,
    pub description: Option<String>,

    pub status: Option<String>,
}

impl HomeInput {
    pub fn validate(&self) -> AppResult<()> {
        check_opt_len("name", self.name.as_ref(), 2, 100)?;
        check_choice("accommodation_type", &self.accommodation_type, ACCOMMODATION_TYPES)?;
        check_choice("property_type", &self.property_type, PROPERTY_TYPES)?;

        check_range("max_guests", self.max_guests, 1, 50)?;
        if let Some(bedrooms) = self.bedrooms {
            check_range("bedrooms", bedrooms, 0, 50)?;
        }
        if let Some(size) = self.size_m2 {
            if size <= 0.0 || size > 100_000.0 {
                return Err(AppError::validation(
                    "size_m2",
                    "must be greater than 0 and at most 100000",
                ));
            }
        }
        check_opt_len("surroundings_type", self.surroundings_type.as_ref(), 0, 30)?;

        check_len("country", &self.country, 2, 100)?;
        check_len("city", &self.city, 2, 100)?;
        check_opt_len("street_address", self.street_address.as_ref(), 2, 200)?;
        check_opt_len("postal_code", self.postal_code.as_ref(), 2, 20)?;
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => {
                check_range("latitude", lat, -90.0, 90.0)?;
                check_range("longitude", lng, -180.0, 180.0)?;
            }
            (None, None) => {}
            _ => {
                return Err(AppError::validation(
                    "latitude",
                    "provide both latitude and longitude, or neither",
                ))
            }
        }
        if let Some(radius) = self.privacy_radius {
            check_range("privacy_radius", radius, 0, i32::MAX)?;
        }

        if self.require_car_swap_match && !self.open_to_car_swap {
            return Err(AppError::validation(
                "require_car_swap_match",
                "cannot require a car swap match without being open to car swap",
            ));
        }
        if let Some(car) = &self.car_details {
            car.validate()?;
        }
        if let Some(parking) = &self.parking_type {
            check_choice("parking_type", parking, PARKING_TYPES)?;
        }

        if let (Some(from), Some(until)) = (self.available_from, self.available_until) {
            if until < from {
                return Err(AppError::validation(
                    "available_until",
                    "must be on or after available_from",
                ));
            }
        }

        check_len("title", &self.title, 5, 200)?;
        check_opt_len("description", self.description.as_ref(), 10, 5000)?;
        if let Some(status) = &self.status {
            check_choice("status", status, LISTING_STATUSES)?;
        }
        Ok(())
    }

    /// Address line for geocoding, most specific part first
    pub fn address(&self) -> String {
        [
            self.street_address.as_deref(),
            self.postal_code.as_deref(),
            Some(self.city.as_str()),
            Some(self.country.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// Row for a new listing
    pub fn insert_columns(&self, listing_id: Uuid) -> ColumnSet {
        let mut columns = ColumnSet::new(Table::Homes);
        columns
            .set("listing_id", listing_id)
            .set("owner_firebase_uid", self.owner_firebase_uid.clone());
        self.push_fields(&mut columns);
        columns
    }

    /// Editable fields of an existing listing; the owner never changes
    pub fn update_columns(&self) -> ColumnSet {
        let mut columns = ColumnSet::new(Table::Homes);
        self.push_fields(&mut columns);
        columns
    }

    fn push_fields(&self, columns: &mut ColumnSet) {
        columns
            .set_opt("email", self.email.clone())
            .set_opt("name", self.name.clone())
            .set_opt("profile_image", self.profile_image.clone())
            .set("accommodation_type", self.accommodation_type.clone())
            .set("property_type", self.property_type.clone())
            .set("max_guests", self.max_guests)
            .set_opt("bedrooms", self.bedrooms)
            .set_opt("size_m2", self.size_m2)
            .set_opt("surroundings_type", self.surroundings_type.clone())
            .set("country", self.country.clone())
            .set("city", self.city.clone())
            .set_opt("street_address", self.street_address.clone())
            .set_opt("postal_code", self.postal_code.clone())
            .set_opt("latitude", self.latitude)
            .set_opt("longitude", self.longitude)
            .set_opt("privacy_radius", self.privacy_radius)
            .set("house_rules", serde_json::json!(self.house_rules))
            .set_opt("main_residence", self.main_residence)
            .set("open_to_car_swap", self.open_to_car_swap)
            .set("require_car_swap_match", self.require_car_swap_match)
            .set_opt(
                "car_details",
                self.car_details.as_ref().map(|car| serde_json::json!(car)),
            )
            .set("amenities", serde_json::Value::Object(self.amenities.clone()))
            .set(
                "accessibility_features",
                serde_json::json!(self.accessibility_features),
            )
            .set_opt("parking_type", self.parking_type.clone())
            .set_opt("is_flexible", self.is_flexible)
            .set_opt("available_from", self.available_from)
            .set_opt("available_until", self.available_until)
            .set("title", self.title.clone())
            .set_opt("description", self.description.clone())
            .set_opt("status", self.status.clone());
    }
}

/// Listing with its images, as returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct HomeWithImages {
    #[serde(flatten)]
    pub home: Home,
    pub images: Vec<ImageView>,
    pub hero_image_url: Option<String>,
}

impl HomeWithImages {
    /// Hero image's signed URL, else the first image's, else none
    pub fn new(home: Home, images: Vec<ImageView>) -> Self {
        let hero_image_url = images
            .iter()
            .find(|image| image.is_hero)
            .or_else(|| images.first())
            .map(|image| image.signed_url.clone());
        Self {
            home,
            images,
            hero_image_url,
        }
    }
}

/// Favourite listing with its hero image
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FavoriteHome {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub home: Home,
    pub hero_image_url: Option<String>,
    #[sqlx(skip)]
    pub signed_url: Option<String>,
}

/// Browse paging parameters
#[derive(Debug, Clone, Deserialize)]
pub struct BrowseQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl BrowseQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size.unwrap_or(20)
    }

    /// Rows to skip; pages far past the end saturate and come back empty
    pub fn offset(&self) -> i64 {
        self.page()
            .saturating_sub(1)
            .saturating_mul(self.page_size())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.page() < 1 {
            return Err(AppError::validation("page", "must be at least 1"));
        }
        check_range("page_size", self.page_size(), 1, 100)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Pagination {
    pub fn new(page: i64, page_size: i64, total_items: i64) -> Self {
        let total_pages = if total_items > 0 {
            (total_items + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            page,
            page_size,
            total_items,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowsePage {
    pub homes: Vec<HomeWithImages>,
    pub pagination: Pagination,
}
