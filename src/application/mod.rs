//! Application layer: use cases orchestrating the domain ports.

pub mod csv_import;
pub mod geo_point_service;
pub mod geocode_dispatcher;
pub mod geocode_service;
pub mod merchant_service;
pub mod merchant_tag_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use csv_import::{
    ColumnDictionary, CsvImportError, CsvImportResult, ImportColumn, ImportSummary,
    MerchantCsvImporter,
};
pub use geo_point_service::GeoPointService;
pub use geocode_dispatcher::GeocodeDispatcher;
pub use geocode_service::{GeocodeJob, GeocodeService};
pub use merchant_service::MerchantService;
pub use merchant_tag_service::MerchantTagService;

use crate::domain::ports::{
    FavoriteStore, GeoPointRepository, MerchantRepository, MerchantTagRepository,
};
use std::sync::Arc;

/// Storage ports shared by the application services.
#[derive(Clone)]
pub struct Repositories {
    pub merchants: Arc<dyn MerchantRepository>,
    pub tags: Arc<dyn MerchantTagRepository>,
    pub geo_points: Arc<dyn GeoPointRepository>,
    pub favorites: Arc<dyn FavoriteStore>,
}

impl Repositories {
    /// Use one store for every port.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: MerchantRepository
            + MerchantTagRepository
            + GeoPointRepository
            + FavoriteStore
            + 'static,
    {
        Self {
            merchants: store.clone(),
            tags: store.clone(),
            geo_points: store.clone(),
            favorites: store,
        }
    }
}
