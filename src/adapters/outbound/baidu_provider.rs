//! Baidu Geocode Provider
//!
//! Implements GeocodeProvider against the Baidu Maps geocoding v3 API.
//! Requires an API key (`ak`); without one every call fails before any I/O.

use crate::domain::entities::GeocodeResult;
use crate::domain::errors::GeocodeError;
use crate::domain::ports::GeocodeProvider;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

pub const BAIDU_DEFAULT_URL: &str = "https://api.map.baidu.com";

#[derive(Debug, Clone)]
pub struct BaiduConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for BaiduConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: BAIDU_DEFAULT_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BaiduResponse {
    status: i64,
    #[serde(default, alias = "msg")]
    message: String,
    #[serde(default)]
    result: Option<BaiduResult>,
}

#[derive(Debug, Deserialize)]
struct BaiduResult {
    location: BaiduLocation,
    #[serde(default)]
    confidence: i64,
    #[serde(default)]
    level: String,
}

#[derive(Debug, Deserialize)]
struct BaiduLocation {
    lng: f64,
    lat: f64,
}

pub struct BaiduProvider {
    config: BaiduConfig,
    client: reqwest::Client,
}

impl BaiduProvider {
    pub fn new(config: BaiduConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn parse(&self, body: &str, address: &str) -> Result<GeocodeResult, GeocodeError> {
        let response: BaiduResponse = serde_json::from_str(body)
            .map_err(|e| GeocodeError::MalformedResponse(e.to_string()))?;

        if response.status != 0 {
            return Err(GeocodeError::Provider {
                status: response.status,
                message: response.message,
            });
        }

        let result = response
            .result
            .ok_or_else(|| GeocodeError::NoResults(address.to_string()))?;

        Ok(GeocodeResult {
            longitude: result.location.lng,
            latitude: result.location.lat,
            level: result.level,
            score: result.confidence.clamp(0, 100) as i32,
            description: address.to_string(),
            address: address.to_string(),
            provider: self.name().to_string(),
        })
    }
}

#[async_trait]
impl GeocodeProvider for BaiduProvider {
    async fn geocode(&self, address: &str) -> Result<GeocodeResult, GeocodeError> {
        if address.trim().is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }
        if self.config.api_key.is_empty() {
            return Err(GeocodeError::MissingApiKey {
                provider: "Baidu".to_string(),
            });
        }

        let url = format!("{}/geocoding/v3/", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("address", address),
                ("output", "json"),
                ("ak", self.config.api_key.as_str()),
            ])
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
        "baidu"
    }
}
