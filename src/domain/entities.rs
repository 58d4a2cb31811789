//! Domain Entities - Core business objects
//!
//! Merchants, merchant tags, geo points and the transient geocoding result.
//! They have no storage dependencies and carry only validation logic.

use crate::domain::errors::DomainError;
use crate::domain::services::geo_math;
use crate::domain::value_objects::{
    validate_latitude, validate_longitude, validate_max_chars, Permission,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Geocode description of a merchant nobody has resolved yet.
pub const GEOCODE_PENDING: &str = "pending";

/// The authenticated actor of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub username: String,
}

impl Principal {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// Output of one geocoding provider call. Never persisted as such.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub longitude: f64,
    pub latitude: f64,
    /// Provider specific granularity ("house", "city", ...)
    pub level: String,
    /// Quality score normalized to 0-100
    pub score: i32,
    pub description: String,
    /// The address that was queried
    pub address: String,
    pub provider: String,
}

// ===== Merchant =====

/// A merchant as stored, plus the read-populated associations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub area: String,
    pub lng: Option<f64>,
    pub lat: Option<f64>,
    pub geocode_level: String,
    pub geocode_score: i32,
    pub geocode_description: String,
    pub geocode_attempts: u32,
    pub owner_id: i64,
    #[serde(default)]
    pub tags: Vec<MerchantTag>,
    #[serde(default)]
    pub geo_points: Vec<GeoPoint>,
    /// Derived per reader, never stored on the merchant row
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub max_permission: Permission,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Merchant {
    /// Build a new, not yet persisted merchant owned by `owner_id`.
    pub fn from_fields(fields: MerchantFields, owner_id: i64) -> Self {
        let now = Utc::now();
        let mut merchant = Self {
            id: 0,
            title: String::new(),
            description: String::new(),
            phone: String::new(),
            address: String::new(),
            city: String::new(),
            area: String::new(),
            lng: None,
            lat: None,
            geocode_level: String::new(),
            geocode_score: 0,
            geocode_description: GEOCODE_PENDING.to_string(),
            geocode_attempts: 0,
            owner_id,
            tags: Vec::new(),
            geo_points: Vec::new(),
            is_favorite: false,
            max_permission: Permission::Read,
            created: now,
            updated: now,
        };
        merchant.apply(fields);
        merchant
    }

    /// Overwrite the scalar columns. An empty geocode description keeps the
    /// current one.
    pub fn apply(&mut self, fields: MerchantFields) {
        self.title = fields.title;
        self.description = fields.description;
        self.phone = fields.phone;
        self.address = fields.address;
        self.city = fields.city;
        self.area = fields.area;
        self.lng = fields.lng;
        self.lat = fields.lat;
        self.geocode_level = fields.geocode_level;
        self.geocode_score = fields.geocode_score;
        if !fields.geocode_description.is_empty() {
            self.geocode_description = fields.geocode_description;
        }
        self.geocode_attempts = fields.geocode_attempts;
        self.updated = Utc::now();
    }

    pub fn is_owned_by(&self, principal: &Principal) -> bool {
        self.owner_id == principal.id
    }

    /// Strip read-populated associations before writing the row.
    pub fn row(&self) -> Self {
        Self {
            tags: Vec::new(),
            geo_points: Vec::new(),
            is_favorite: false,
            max_permission: Permission::Read,
            ..self.clone()
        }
    }
}

/// Writable scalar columns of a merchant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MerchantFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub geocode_level: String,
    #[serde(default)]
    pub geocode_score: i32,
    #[serde(default)]
    pub geocode_description: String,
    #[serde(default)]
    pub geocode_attempts: u32,
}

impl MerchantFields {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("merchant title is required"));
        }
        validate_max_chars("merchant title", &self.title, 100)?;
        validate_max_chars("phone number", &self.phone, 20)?;
        validate_max_chars("city", &self.city, 50)?;
        validate_max_chars("area", &self.area, 50)?;
        validate_max_chars("geocode level", &self.geocode_level, 50)?;
        validate_max_chars("geocode description", &self.geocode_description, 100)?;
        if let Some(lng) = self.lng {
            validate_longitude(lng)?;
        }
        if let Some(lat) = self.lat {
            validate_latitude(lat)?;
        }
        if !(0..=100).contains(&self.geocode_score) {
            return Err(DomainError::validation(
                "geocode score must be between 0 and 100",
            ));
        }
        Ok(())
    }
}

/// Input of merchant creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MerchantDraft {
    #[serde(flatten)]
    pub fields: MerchantFields,
    /// Existing tags to link; non-positive ids are ignored
    #[serde(default)]
    pub tag_ids: Vec<i64>,
    /// Existing geo points to link to the new merchant
    #[serde(default)]
    pub geo_point_ids: Vec<i64>,
    #[serde(default)]
    pub is_favorite: bool,
}

impl MerchantDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            fields: MerchantFields {
                title: title.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Input of merchant update. `None` relation sets are left untouched,
/// `Some` replaces the full set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MerchantUpdate {
    #[serde(flatten)]
    pub fields: MerchantFields,
    #[serde(default)]
    pub tag_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub geo_point_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
}

// ===== Merchant tags =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantTag {
    pub id: i64,
    pub tag_name: String,
    pub alias: String,
    pub class: String,
    pub remarks: String,
    pub hex_color: String,
    pub owner_id: i64,
    #[serde(default)]
    pub max_permission: Permission,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl MerchantTag {
    pub fn is_owned_by(&self, principal: &Principal) -> bool {
        self.owner_id == principal.id
    }
}

/// Writable columns of a merchant tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MerchantTagDraft {
    pub tag_name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub hex_color: String,
}

impl MerchantTagDraft {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.tag_name.trim().is_empty() {
            return Err(DomainError::validation("merchant tag name is required"));
        }
        validate_max_chars("merchant tag name", &self.tag_name, 50)?;
        validate_max_chars("alias", &self.alias, 10)?;
        validate_max_chars("class", &self.class, 50)?;
        validate_max_chars("hex color", &self.hex_color, 7)?;
        Ok(())
    }
}

/// Join row between a merchant and a tag. Duplicate pairs are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantTagRelation {
    pub merchant_id: i64,
    pub merchant_tag_id: i64,
    pub created: DateTime<Utc>,
}

impl MerchantTagRelation {
    pub fn new(merchant_id: i64, merchant_tag_id: i64) -> Self {
        Self {
            merchant_id,
            merchant_tag_id,
            created: Utc::now(),
        }
    }
}

// ===== Geo points =====

/// A persisted coordinate, optionally linked to a merchant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub id: i64,
    /// Soft link, no foreign key
    pub merchant_id: Option<i64>,
    /// Source tag the point is cached under (provider name or caller tag)
    #[serde(rename = "from")]
    pub source: String,
    pub longitude: f64,
    pub latitude: f64,
    pub address: String,
    /// 0-100
    pub accuracy: i32,
    /// Opaque JSON object text, may be empty
    pub metadata: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl GeoPoint {
    pub fn from_draft(draft: GeoPointDraft) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            merchant_id: draft.merchant_id,
            source: draft.source,
            longitude: draft.longitude,
            latitude: draft.latitude,
            address: draft.address,
            accuracy: draft.accuracy,
            metadata: draft.metadata,
            created: now,
            updated: now,
        }
    }

    /// Metadata as a JSON map. Empty text yields an empty map.
    pub fn metadata_map(&self) -> Result<Map<String, Value>, DomainError> {
        if self.metadata.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&self.metadata)?)
    }

    pub fn typed_metadata(&self) -> Result<GeoMetadata, DomainError> {
        if self.metadata.trim().is_empty() {
            return Ok(GeoMetadata::default());
        }
        Ok(serde_json::from_str(&self.metadata)?)
    }

    pub fn set_metadata(&mut self, metadata: Option<&GeoMetadata>) -> Result<(), DomainError> {
        self.metadata = match metadata {
            Some(m) => serde_json::to_string(m)?,
            None => String::new(),
        };
        Ok(())
    }

    /// Great-circle distance from this point to (`lat`, `lng`) in km.
    pub fn distance_to_km(&self, lat: f64, lng: f64) -> f64 {
        geo_math::haversine_km(self.latitude, self.longitude, lat, lng)
    }
}

/// Writable columns of a geo point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPointDraft {
    #[serde(default)]
    pub merchant_id: Option<i64>,
    #[serde(rename = "from", default)]
    pub source: String,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub accuracy: i32,
    #[serde(default)]
    pub metadata: String,
}

impl GeoPointDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_longitude(self.longitude)?;
        validate_latitude(self.latitude)?;
        if !(0..=100).contains(&self.accuracy) {
            return Err(DomainError::validation("accuracy must be between 0 and 100"));
        }
        validate_max_chars("source", &self.source, 50)?;
        Ok(())
    }
}

/// Typed view over the well-known metadata keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}
