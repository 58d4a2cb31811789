//! Domain Layer
//!
//! Entities, value objects, events and the ports the application layer
//! talks to. Nothing in here knows about HTTP or SQL.

pub mod entities;
pub mod errors;
pub mod events;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::{
    GeoMetadata, GeoPoint, GeoPointDraft, GeocodeResult, Merchant, MerchantDraft, MerchantFields,
    MerchantTag, MerchantTagDraft, MerchantTagRelation, MerchantUpdate, Principal,
};
pub use errors::{DomainError, GeocodeError};
pub use events::{DomainEvent, EventKind, EventPayload};
pub use value_objects::{Coordinate, Page, Paging, Permission};
