use std::time::Duration;

use serde::Deserialize;

use crate::config::MapsConfig;

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

/// Google Geocoding API client
pub struct Geocoder {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl Geocoder {
    /// None when no maps key is configured
    pub fn from_config(config: &MapsConfig) -> Result<Option<Self>, reqwest::Error> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Some(Self {
            http,
            url: config.geocoding_url.clone(),
            api_key,
        }))
    }

    /// Best-effort `(latitude, longitude)`; every failure is logged and yields None
    pub async fn geocode(&self, address: &str) -> Option<(f64, f64)> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }

        let response = match self
            .http
            .get(&self.url)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::error!("Geocoding API returned status {}", response.status());
                return None;
            }
            Err(e) => {
                tracing::error!("Geocoding request failed: {}", e);
                return None;
            }
        };

        let body: GeocodeResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Unreadable geocoding response: {}", e);
                return None;
            }
        };

        match body.status.as_str() {
            "OK" => {
                let location = &body.results.first()?.geometry.location;
                tracing::info!("Geocoded address: {}", address);
                Some((location.lat, location.lng))
            }
            "ZERO_RESULTS" => {
                tracing::warn!("No geocoding results for address: {}", address);
                None
            }
            status => {
                tracing::error!(
                    "Geocoding failed: {} - {}",
                    status,
                    body.error_message.as_deref().unwrap_or("unknown error")
                );
                None
            }
        }
    }
}
