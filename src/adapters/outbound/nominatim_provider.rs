//! Nominatim Geocode Provider
//!
//! Implements GeocodeProvider against the OpenStreetMap Nominatim search API.
//! No credential is needed, but the usage policy requires a User-Agent.

use crate::domain::entities::GeocodeResult;
use crate::domain::errors::GeocodeError;
use crate::domain::ports::GeocodeProvider;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

pub const NOMINATIM_DEFAULT_URL: &str = "https://nominatim.openstreetmap.org";

/// Configuration for the Nominatim provider.
#[derive(Debug, Clone)]
pub struct NominatimConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    pub user_agent: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: NOMINATIM_DEFAULT_URL.to_string(),
            user_agent: concat!("merchant-geo/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// One entry of the `/search` response.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
    #[serde(rename = "type", default)]
    place_type: String,
    #[serde(default)]
    importance: Option<f64>,
}

pub struct NominatimProvider {
    config: NominatimConfig,
    client: reqwest::Client,
}

impl NominatimProvider {
    pub fn new(config: NominatimConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Importance (0..1) scaled to 0..100.
    fn score(importance: Option<f64>) -> i32 {
        let scaled = (importance.unwrap_or(0.0) * 100.0).round();
        scaled.clamp(0.0, 100.0) as i32
    }

    fn parse(&self, body: &str, address: &str) -> Result<GeocodeResult, GeocodeError> {
        let places: Vec<NominatimPlace> = serde_json::from_str(body)
            .map_err(|e| GeocodeError::MalformedResponse(e.to_string()))?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NoResults(address.to_string()))?;

        let latitude: f64 = place
            .lat
            .trim()
            .parse()
            .map_err(|_| GeocodeError::MalformedResponse(format!("invalid latitude: {}", place.lat)))?;
        let longitude: f64 = place
            .lon
            .trim()
            .parse()
            .map_err(|_| GeocodeError::MalformedResponse(format!("invalid longitude: {}", place.lon)))?;

        Ok(GeocodeResult {
            longitude,
            latitude,
            level: place.place_type,
            score: Self::score(place.importance),
            description: place.display_name,
            address: address.to_string(),
            provider: self.name().to_string(),
        })
    }
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    async fn geocode(&self, address: &str) -> Result<GeocodeResult, GeocodeError> {
        if address.trim().is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }

        let url = format!("{}/search", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", address),
                ("format", "json"),
                ("limit", "1"),
                ("addressdetails", "1"),
            ])
            .header(USER_AGENT, &self.config.user_agent)
            .timeout(self.config.timeout)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(GeocodeError::HttpStatus(response.status().as_u16()));
        }

        let body = response.text().await?;
        self.parse(&body, address)
    }

    fn name(&self) -> &str {
        "nominatim"
    }
}
