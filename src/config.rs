use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

/// Application configuration
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (`PORT` overrides it on managed platforms)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Maximum request body size for multipart uploads
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Per-route rate limiting switch
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,

    /// Set when the platform marker variable (`K_SERVICE`) is present
    #[serde(default)]
    pub cloud_run: bool,

    pub database: DatabaseConfig,

    #[serde(default)]
    pub gcp: GcpConfig,

    #[serde(default)]
    pub cdn: CdnConfig,

    pub firebase: FirebaseConfig,

    #[serde(default)]
    pub maps: MapsConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; wins over the individual fields
    pub url: Option<String>,

    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,

    /// Public host used outside Cloud Run
    pub host: Option<String>,

    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Cloud SQL region, combined with the project and instance
    pub sql_region: Option<String>,

    /// Cloud SQL instance name
    pub sql_instance: Option<String>,

    /// Explicit `project:region:instance` connection name
    pub cloud_sql_connection: Option<String>,

    /// Directory where the Cloud SQL proxy exposes its sockets
    #[serde(default = "default_socket_dir")]
    pub socket_dir: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GcpConfig {
    pub project_id: Option<String>,

    /// Private bucket holding listing images
    #[serde(default = "default_bucket")]
    pub storage_bucket: String,

    /// Runtime identity; looked up on the metadata server when absent
    pub service_account_email: Option<String>,

    /// Static OAuth access token, used instead of the metadata server
    pub access_token: Option<String>,

    #[serde(default = "default_storage_base_url")]
    pub storage_base_url: String,

    #[serde(default = "default_iam_base_url")]
    pub iam_base_url: String,

    #[serde(default = "default_metadata_base_url")]
    pub metadata_base_url: String,

    /// Lifetime of V4 signed URLs in seconds
    #[serde(default = "default_signed_url_expiry")]
    pub signed_url_expiry_secs: u64,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            storage_bucket: default_bucket(),
            service_account_email: None,
            access_token: None,
            storage_base_url: default_storage_base_url(),
            iam_base_url: default_iam_base_url(),
            metadata_base_url: default_metadata_base_url(),
            signed_url_expiry_secs: default_signed_url_expiry(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CdnConfig {
    /// Public CDN origin that fronts the bucket
    #[serde(default = "default_cdn_base_url")]
    pub base_url: String,

    pub key_name: Option<String>,

    /// Base64 signing key attached to the CDN backend
    pub signing_key: Option<String>,

    /// Lifetime of URL-prefix tokens in seconds
    #[serde(default = "default_cdn_token_expiry")]
    pub token_expiry_secs: u64,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            base_url: default_cdn_base_url(),
            key_name: None,
            signing_key: None,
            token_expiry_secs: default_cdn_token_expiry(),
        }
    }
}

impl CdnConfig {
    /// Decoded key and its name, when CDN signing is configured
    pub fn key(&self) -> anyhow::Result<Option<(String, Vec<u8>)>> {
        let (Some(name), Some(key)) = (&self.key_name, &self.signing_key) else {
            return Ok(None);
        };
        let bytes = decode_key(key)?;
        if bytes.len() < 16 {
            anyhow::bail!("cdn.signing_key decodes to fewer than 16 bytes");
        }
        Ok(Some((name.clone(), bytes)))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct FirebaseConfig {
    /// Web API key of the Firebase project
    pub api_key: String,

    #[serde(default = "default_identity_base_url")]
    pub identity_base_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MapsConfig {
    pub api_key: Option<String>,

    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            geocoding_url: default_geocoding_url(),
        }
    }
}

/// Database transport resolution failures
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DatabaseConfigError {
    #[error("database user, password and name are required when no url is set")]
    MissingCredentials,

    #[error("database host is required outside Cloud Run")]
    MissingHost,

    #[error("Cloud SQL connection name (or project, sql_region and sql_instance) is required on Cloud Run")]
    MissingCloudSqlConnection,

    #[error("invalid database url: {0}")]
    InvalidUrl(String),
}

impl DatabaseConfig {
    /// `project:region:instance` used for the proxy socket path
    pub fn connection_name(&self, project: Option<&str>) -> Option<String> {
        if let Some(name) = &self.cloud_sql_connection {
            return Some(name.clone());
        }
        match (project, &self.sql_region, &self.sql_instance) {
            (Some(project), Some(region), Some(instance)) => {
                Some(format!("{}:{}:{}", project, region, instance))
            }
            _ => None,
        }
    }

    /// Resolve connection options: URL, then Unix socket on Cloud Run, then host
    pub fn connect_options(
        &self,
        project: Option<&str>,
        cloud_run: bool,
    ) -> Result<PgConnectOptions, DatabaseConfigError> {
        if let Some(url) = &self.url {
            return url
                .parse::<PgConnectOptions>()
                .map_err(|e| DatabaseConfigError::InvalidUrl(e.to_string()));
        }

        let (Some(user), Some(password), Some(name)) = (&self.user, &self.password, &self.name)
        else {
            return Err(DatabaseConfigError::MissingCredentials);
        };

        let options = PgConnectOptions::new()
            .username(user)
            .password(password)
            .database(name);

        if cloud_run {
            let connection = self
                .connection_name(project)
                .ok_or(DatabaseConfigError::MissingCloudSqlConnection)?;
            let socket = PathBuf::from(&self.socket_dir).join(connection);
            Ok(options.socket(socket))
        } else {
            let host = self.host.as_ref().ok_or(DatabaseConfigError::MissingHost)?;
            Ok(options.host(host).port(self.port))
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:8080".to_string(),
        "https://swapwithus.com".to_string(),
        "https://www.swapwithus.com".to_string(),
    ]
}

fn default_max_upload_bytes() -> usize {
    // 20 images of up to 5 MB plus the listing form
    110 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_db_port() -> u16 {
    5432
}

fn default_socket_dir() -> String {
    "/cloudsql".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout_secs() -> u64 {
    60
}

fn default_bucket() -> String {
    "swapwithus-listing-images".to_string()
}

fn default_storage_base_url() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_iam_base_url() -> String {
    "https://iamcredentials.googleapis.com".to_string()
}

fn default_metadata_base_url() -> String {
    "http://metadata.google.internal".to_string()
}

fn default_signed_url_expiry() -> u64 {
    3600
}

fn default_cdn_base_url() -> String {
    "https://cdn.swapwithus.com/".to_string()
}

fn default_cdn_token_expiry() -> u64 {
    10 * 3600
}

fn default_identity_base_url() -> String {
    "https://identitytoolkit.googleapis.com".to_string()
}

fn default_geocoding_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode/json".to_string()
}

/// Deployment variables read as-is, without the `SWAPWITHUS_` prefix
const PLATFORM_VARIABLES: &[(&str, &str)] = &[
    ("PORT", "port"),
    ("DATABASE_URL", "database.url"),
    ("GOOGLE_CLOUD_PROJECT", "gcp.project_id"),
    ("GOOGLE_CLOUD_STORAGE_BUCKET", "gcp.storage_bucket"),
    ("GOOGLE_CLOUD_CDN_SIGNING_KEY", "cdn.signing_key"),
    ("GOOGLE_CLOUD_CDN_KEY_NAME", "cdn.key_name"),
    ("GOOGLE_GEOCODING_API_KEY", "maps.api_key"),
    ("FIREBASE_API_KEY", "firebase.api_key"),
];

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

impl Config {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let mut builder = Self::defaults()?
            // Load from config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (SWAPWITHUS_ prefix)
            .add_source(
                config::Environment::with_prefix("SWAPWITHUS")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in PLATFORM_VARIABLES {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }
        builder = builder.set_override("cloud_run", std::env::var("K_SERVICE").is_ok())?;

        Self::finish(builder)
    }

    /// Build configuration from a TOML document on top of the defaults
    pub fn from_toml(source: &str) -> anyhow::Result<Self> {
        let builder = Self::defaults()?
            .add_source(config::File::from_str(source, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn defaults() -> anyhow::Result<Builder> {
        Ok(config::Config::builder()
            .set_default("host", default_host())?
            .set_default("port", default_port())?
            .set_default("rate_limit_enabled", true)?
            .set_default("cloud_run", false)?)
    }

    fn finish(builder: Builder) -> anyhow::Result<Self> {
        let config: Config = builder.build()?.try_deserialize()?;

        // Validate required fields
        if config.firebase.api_key.is_empty() {
            anyhow::bail!("firebase.api_key is required");
        }
        config
            .database
            .connect_options(config.gcp.project_id.as_deref(), config.cloud_run)?;
        config.cdn.key()?;

        Ok(config)
    }
}

/// Decode a key given in URL-safe or standard base64, padded or not
fn decode_key(key: &str) -> anyhow::Result<Vec<u8>> {
    let trimmed = key.trim().trim_end_matches('=');
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(trimmed) {
        return Ok(bytes);
    }
    let padding = (4 - trimmed.len() % 4) % 4;
    let padded = format!("{}{}", trimmed, "=".repeat(padding));
    Ok(STANDARD.decode(padded)?)
}
