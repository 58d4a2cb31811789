//! Domain Events
//!
//! Notifications emitted at the end of every mutating operation.

use crate::domain::entities::{GeoPoint, Merchant, MerchantTag, Principal};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    MerchantCreated,
    MerchantUpdated,
    MerchantDeleted,
    MerchantTagCreated,
    MerchantTagUpdated,
    MerchantTagDeleted,
    GeoPointCreated,
    GeoPointUpdated,
    GeoPointDeleted,
}

impl EventKind {
    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MerchantCreated => "merchant.created",
            Self::MerchantUpdated => "merchant.updated",
            Self::MerchantDeleted => "merchant.deleted",
            Self::MerchantTagCreated => "merchant_tag.created",
            Self::MerchantTagUpdated => "merchant_tag.updated",
            Self::MerchantTagDeleted => "merchant_tag.deleted",
            Self::GeoPointCreated => "geo_point.created",
            Self::GeoPointUpdated => "geo_point.updated",
            Self::GeoPointDeleted => "geo_point.deleted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The entity an event is about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "entity", rename_all = "snake_case")]
pub enum EventPayload {
    Merchant(Merchant),
    MerchantTag(MerchantTag),
    GeoPoint(GeoPoint),
}

impl EventPayload {
    pub fn entity_id(&self) -> i64 {
        match self {
            Self::Merchant(m) => m.id,
            Self::MerchantTag(t) => t.id,
            Self::GeoPoint(p) => p.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
    /// The principal that performed the change
    pub doer: Principal,
}

impl DomainEvent {
    pub fn merchant(kind: EventKind, merchant: &Merchant, doer: &Principal) -> Self {
        Self {
            kind,
            payload: EventPayload::Merchant(merchant.clone()),
            doer: doer.clone(),
        }
    }

    pub fn merchant_tag(kind: EventKind, tag: &MerchantTag, doer: &Principal) -> Self {
        Self {
            kind,
            payload: EventPayload::MerchantTag(tag.clone()),
            doer: doer.clone(),
        }
    }

    pub fn geo_point(kind: EventKind, point: &GeoPoint, doer: &Principal) -> Self {
        Self {
            kind,
            payload: EventPayload::GeoPoint(point.clone()),
            doer: doer.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}
