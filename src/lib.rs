//! SwapWithUs: a home-swap listings API.
//!
//! Listings and profiles live in PostgreSQL, images in a private Cloud
//! Storage bucket served through short-lived signed URLs, and callers are
//! identified by Firebase ID tokens.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;
use crate::middleware::{RateLimitLayer, RatePolicy};
use crate::services::{
    CachedVerifier, CredentialSource, FirebaseTokenVerifier, GcsStore, Geocoder, IamBlobSigner,
    ImageUrlSigner, ObjectStore, TokenVerifier,
};

/// Application state shared across all handlers
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub verifier: Arc<dyn TokenVerifier>,
    pub store: Arc<dyn ObjectStore>,
    pub image_urls: ImageUrlSigner,
    pub geocoder: Option<Geocoder>,
}

impl AppState {
    /// Wire the Google clients described by `config`
    pub fn new(config: Config, db: Database) -> anyhow::Result<Self> {
        let credentials = Arc::new(CredentialSource::from_config(
            &config.gcp,
            reqwest::Client::new(),
        ));

        let firebase = Arc::new(FirebaseTokenVerifier::new(&config.firebase)?);
        let verifier = Arc::new(CachedVerifier::new(firebase));
        let store = Arc::new(GcsStore::new(&config.gcp, credentials.clone())?);
        let blob_signer = Arc::new(IamBlobSigner::new(&config.gcp.iam_base_url, credentials)?);
        let image_urls = ImageUrlSigner::from_config(&config, blob_signer)?;

        let geocoder = Geocoder::from_config(&config.maps)?;
        if geocoder.is_none() {
            tracing::warn!("No maps API key configured, listings will not be geocoded");
        }

        Ok(Self {
            db,
            config,
            verifier,
            store,
            image_urls,
            geocoder,
        })
    }
}

/// Build the API router
pub fn app(state: Arc<AppState>) -> Router {
    let limit = |policy: RatePolicy| RateLimitLayer::new(policy, &state);
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    Router::new()
        .route(
            "/api/health",
            get(routes::health).layer(limit(RatePolicy::per_minute(100))),
        )
        .route(
            "/api/browse",
            get(routes::browse).layer(limit(RatePolicy::per_minute(30))),
        )
        // Homes
        .route(
            "/api/homes",
            get(routes::homes::list_for_owner).layer(limit(RatePolicy::per_minute(60))),
        )
        .route(
            "/api/homes",
            post(routes::homes::create)
                .layer::<_, std::convert::Infallible>(upload_limit)
                .layer(limit(RatePolicy::per_hour(15))),
        )
        .route(
            "/api/homes/me",
            get(routes::homes::list_mine).layer(limit(RatePolicy::per_minute(60))),
        )
        .route(
            "/api/homes/:listing_id",
            put(routes::homes::update)
                .layer::<_, std::convert::Infallible>(upload_limit)
                .layer(limit(RatePolicy::per_minute(10))),
        )
        .route(
            "/api/homes/:listing_id",
            delete(routes::homes::delete).layer(limit(RatePolicy::per_hour(5))),
        )
        // Users
        .route(
            "/api/users",
            post(routes::users::create).layer(limit(RatePolicy::per_hour(5))),
        )
        .route(
            "/api/users/me",
            get(routes::users::me).layer(limit(RatePolicy::per_minute(100))),
        )
        .route(
            "/api/users/:uid",
            get(routes::users::public_profile).layer(limit(RatePolicy::per_minute(100))),
        )
        .route(
            "/api/users/:uid",
            patch(routes::users::update).layer(limit(RatePolicy::per_minute(10))),
        )
        .route(
            "/api/users/:uid",
            delete(routes::users::delete).layer(limit(RatePolicy::per_hour(3))),
        )
        // Favorites
        .route(
            "/api/favorites",
            get(routes::favorites::list).layer(limit(RatePolicy::per_minute(50))),
        )
        .route(
            "/api/favorites",
            post(routes::favorites::add).layer(limit(RatePolicy::per_minute(50))),
        )
        .route(
            "/api/favorites/:listing_id",
            delete(routes::favorites::remove).layer(limit(RatePolicy::per_minute(50))),
        )
        // Images
        .route(
            "/api/images/signed-url",
            get(routes::images::signed_url).layer(limit(RatePolicy::per_minute(60))),
        )
        .fallback(routes::not_found)
        .layer(RequestBodyLimitLayer::new(state.config.max_upload_bytes))
        .layer(cors(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}
