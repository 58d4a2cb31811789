mod baidu_provider;
mod broadcast_event_publisher;
mod dashmap_store;
mod nominatim_provider;
mod sqlite_store;

pub use baidu_provider::{BaiduConfig, BaiduProvider, BAIDU_DEFAULT_URL};
pub use broadcast_event_publisher::{BroadcastEventPublisher, DEFAULT_EVENT_CAPACITY};
pub use dashmap_store::DashMapStore;
pub use nominatim_provider::{NominatimConfig, NominatimProvider, NOMINATIM_DEFAULT_URL};
pub use sqlite_store::SqliteStore;
