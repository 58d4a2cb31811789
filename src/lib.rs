//! merchant-geo Library
//!
//! Merchant directory with multi-provider geocoding: merchants, merchant
//! tags, geo points, CSV import and nearby search. Exposed as a library for
//! the binary and the integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;

// Re-export commonly used types
pub use application::{
    GeoPointService, GeocodeDispatcher, GeocodeJob, GeocodeService, MerchantCsvImporter,
    MerchantService, MerchantTagService, Repositories,
};
pub use config::{load_config, Config, StorageKind};
pub use domain::entities::{GeoPoint, GeocodeResult, Merchant, MerchantTag, Principal};
pub use domain::errors::{DomainError, GeocodeError};
pub use domain::ports::{
    EventPublisher, FavoriteStore, GeoPointRepository, GeocodeProvider, MerchantRepository,
    MerchantTagRepository,
};
