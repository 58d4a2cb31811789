mod event_publisher;
mod favorite_store;
mod geo_point_repository;
mod geocode_provider;
mod merchant_repository;
mod merchant_tag_repository;

pub use event_publisher::EventPublisher;
pub use favorite_store::FavoriteStore;
pub use geo_point_repository::{GeoPointFilter, GeoPointRepository};
pub use geocode_provider::GeocodeProvider;
pub use merchant_repository::{MerchantFilter, MerchantRepository};
pub use merchant_tag_repository::{MerchantTagRepository, TagFilter};
