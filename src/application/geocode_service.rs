//! Geocode Service - Address resolution use case
//!
//! Runs the ordered provider chain, caches results as geo points keyed by
//! (address, source) and answers approximate nearby queries.

use crate::domain::entities::{GeoPoint, GeoPointDraft, GeocodeResult};
use crate::domain::errors::{DomainError, GeocodeError};
use crate::domain::ports::{GeoPointFilter, GeoPointRepository, GeocodeProvider};
use crate::domain::services::CoarseWindow;
use crate::domain::value_objects::{validate_latitude, validate_longitude};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Pause after each successful lookup of a batch.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

/// A geocode-and-save request, optionally linking the result to a merchant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodeJob {
    pub merchant_id: Option<i64>,
    pub address: String,
    pub source: String,
    pub metadata: Option<Map<String, Value>>,
}

/// Geocoding use case.
///
/// Providers are tried strictly in registration order; the first success
/// wins. The chain is fixed at construction.
pub struct GeocodeService {
    providers: Vec<Arc<dyn GeocodeProvider>>,
    geo_points: Arc<dyn GeoPointRepository>,
    batch_delay: Duration,
}

impl GeocodeService {
    pub fn new(
        providers: Vec<Arc<dyn GeocodeProvider>>,
        geo_points: Arc<dyn GeoPointRepository>,
    ) -> Self {
        Self {
            providers,
            geo_points,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Names of the registered providers, in chain order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Resolve an address through the provider chain.
    pub async fn geocode(&self, address: &str) -> Result<GeocodeResult, GeocodeError> {
        if address.trim().is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }

        let mut last_error = None;
        for provider in &self.providers {
            match provider.geocode(address).await {
                Ok(result) => {
                    tracing::debug!(
                        "geocoded '{}' via {} -> ({}, {})",
                        address,
                        provider.name(),
                        result.longitude,
                        result.latitude
                    );
                    return Ok(result);
                }
                Err(e) => {
                    tracing::debug!("provider {} failed for '{}': {}", provider.name(), address, e);
                    last_error = Some((provider.name().to_string(), e));
                }
            }
        }

        match last_error {
            Some((provider, source)) => Err(GeocodeError::AllProvidersFailed {
                provider,
                source: Box::new(source),
            }),
            None => Err(GeocodeError::NoProviders),
        }
    }

    /// Return the cached point for (address, source), or geocode and persist
    /// a new one.
    ///
    /// A cache hit is returned as stored: no provider call, no metadata merge.
    /// Concurrent misses for the same key may both persist a point.
    pub async fn geocode_and_save(
        &self,
        address: &str,
        source: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<GeoPoint, DomainError> {
        if address.trim().is_empty() {
            return Err(GeocodeError::EmptyAddress.into());
        }

        if let Some(existing) = self
            .geo_points
            .find_by_address_and_source(address, source)
            .await?
        {
            tracing::debug!("geocode cache hit for '{}' ({})", address, source);
            return Ok(existing);
        }

        let result = self.geocode(address).await?;

        let mut metadata = metadata.unwrap_or_default();
        metadata
            .entry("provider")
            .or_insert_with(|| Value::String(result.provider.clone()));
        if !result.level.is_empty() {
            metadata
                .entry("place_type")
                .or_insert_with(|| Value::String(result.level.clone()));
        }

        let draft = GeoPointDraft {
            merchant_id: None,
            source: source.to_string(),
            longitude: result.longitude,
            latitude: result.latitude,
            address: address.to_string(),
            accuracy: result.score,
            metadata: serde_json::to_string(&metadata)?,
        };
        draft.validate()?;

        let point = self.geo_points.insert_point(GeoPoint::from_draft(draft)).await?;
        tracing::debug!("saved geo point {} for '{}'", point.id, address);
        Ok(point)
    }

    /// `geocode_and_save`, then link the point to the job's merchant.
    ///
    /// A cached point already linked to a different merchant is left alone;
    /// the job's merchant gets its own copy of the coordinates instead.
    pub async fn geocode_and_link(&self, job: GeocodeJob) -> Result<GeoPoint, DomainError> {
        let mut point = self
            .geocode_and_save(&job.address, &job.source, job.metadata.clone())
            .await?;

        let Some(merchant_id) = job.merchant_id else {
            return Ok(point);
        };

        match point.merchant_id {
            Some(current) if current == merchant_id => Ok(point),
            Some(current) => {
                tracing::debug!(
                    "geo point {} belongs to merchant {}, copying for merchant {}",
                    point.id,
                    current,
                    merchant_id
                );
                self.copy_for_merchant(&point, merchant_id, job.metadata).await
            }
            None => {
                self.geo_points
                    .set_point_merchant(point.id, Some(merchant_id))
                    .await?;
                point.merchant_id = Some(merchant_id);
                Ok(point)
            }
        }
    }

    async fn copy_for_merchant(
        &self,
        cached: &GeoPoint,
        merchant_id: i64,
        metadata: Option<Map<String, Value>>,
    ) -> Result<GeoPoint, DomainError> {
        let filter = GeoPointFilter {
            merchant_id,
            ..Default::default()
        };
        let (owned, _) = self.geo_points.find_points(&filter).await?;
        if let Some(existing) = owned
            .into_iter()
            .find(|p| p.address == cached.address && p.source == cached.source)
        {
            return Ok(existing);
        }

        let mut metadata = metadata.unwrap_or_default();
        for (key, value) in cached.metadata_map()? {
            if key == "provider" || key == "place_type" {
                metadata.entry(key).or_insert(value);
            }
        }

        let draft = GeoPointDraft {
            merchant_id: Some(merchant_id),
            source: cached.source.clone(),
            longitude: cached.longitude,
            latitude: cached.latitude,
            address: cached.address.clone(),
            accuracy: cached.accuracy,
            metadata: serde_json::to_string(&metadata)?,
        };
        draft.validate()?;

        Ok(self.geo_points.insert_point(GeoPoint::from_draft(draft)).await?)
    }

    /// Geocode several addresses sequentially, keeping only the successes.
    pub async fn batch_geocode(&self, addresses: &[String], source: &str) -> Vec<GeoPoint> {
        let mut points = Vec::with_capacity(addresses.len());

        for address in addresses {
            if address.trim().is_empty() {
                continue;
            }

            match self.geocode_and_save(address, source, None).await {
                Ok(point) => {
                    points.push(point);
                    if !self.batch_delay.is_zero() {
                        tokio::time::sleep(self.batch_delay).await;
                    }
                }
                Err(e) => tracing::error!("failed to geocode address '{}': {}", address, e),
            }
        }

        points
    }

    /// Points within `radius_km` of (lng, lat).
    ///
    /// `limit` bounds the coarse candidate set (`0` = unlimited), so fewer than
    /// `limit` points may come back even when more exist within the radius.
    pub async fn find_nearby_geo_points(
        &self,
        lng: f64,
        lat: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<GeoPoint>, DomainError> {
        validate_longitude(lng)?;
        validate_latitude(lat)?;
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(DomainError::validation(
                "radius must be a non-negative number of kilometers",
            ));
        }

        let window = CoarseWindow::around(lng, lat, radius_km);
        let candidates = self.geo_points.find_in_window(&window, limit).await?;
        let total = candidates.len();

        let nearby: Vec<GeoPoint> = candidates
            .into_iter()
            .filter(|p| p.distance_to_km(lat, lng) <= radius_km)
            .collect();

        tracing::debug!(
            "nearby ({}, {}) r={}km: {} candidates, {} within radius",
            lng,
            lat,
            radius_km,
            total,
            nearby.len()
        );
        Ok(nearby)
    }
}
