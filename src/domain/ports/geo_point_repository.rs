//! Geo Point Repository Port
//!
//! Storage of geo points, including the coarse spatial window query used by
//! nearby search and the (address, source) lookup used as geocode cache.

use crate::domain::entities::GeoPoint;
use crate::domain::services::CoarseWindow;
use crate::domain::value_objects::Paging;
use async_trait::async_trait;

/// Query over the points linked to one merchant.
#[derive(Debug, Clone, Default)]
pub struct GeoPointFilter {
    pub merchant_id: i64,
    /// Case-insensitive substring over the address
    pub search: String,
    pub paging: Paging,
}

#[async_trait]
pub trait GeoPointRepository: Send + Sync {
    async fn insert_point(&self, point: GeoPoint) -> anyhow::Result<GeoPoint>;

    async fn get_point(&self, id: i64) -> anyhow::Result<Option<GeoPoint>>;

    async fn update_point(&self, point: &GeoPoint) -> anyhow::Result<bool>;

    async fn delete_point(&self, id: i64) -> anyhow::Result<bool>;

    /// First point (lowest id) with exactly this address and source.
    async fn find_by_address_and_source(
        &self,
        address: &str,
        source: &str,
    ) -> anyhow::Result<Option<GeoPoint>>;

    async fn find_points(&self, filter: &GeoPointFilter) -> anyhow::Result<(Vec<GeoPoint>, u64)>;

    /// Points strictly inside the window, ordered by id, at most `limit`
    /// of them (`0` = no limit).
    async fn find_in_window(
        &self,
        window: &CoarseWindow,
        limit: usize,
    ) -> anyhow::Result<Vec<GeoPoint>>;

    /// Set or clear the soft link to a merchant.
    async fn set_point_merchant(&self, id: i64, merchant_id: Option<i64>) -> anyhow::Result<bool>;

    async fn delete_points_for_merchant(&self, merchant_id: i64) -> anyhow::Result<usize>;
}
