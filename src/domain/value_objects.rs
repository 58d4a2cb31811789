//! Value Objects - Immutable domain primitives
//!
//! Coordinates, permission levels and paging results. They carry validation
//! rules but no identity.

use crate::domain::errors::DomainError;
use serde::{Deserialize, Serialize};

pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;
pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;

/// Access level a principal holds on an entity.
///
/// Ordered: `Read < Write < Admin`. Serialized as its numeric level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Permission {
    pub fn level(self) -> u8 {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Admin => 2,
        }
    }

    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Read,
            1 => Self::Write,
            _ => Self::Admin,
        }
    }
}

impl Default for Permission {
    fn default() -> Self {
        Self::Read
    }
}

impl Serialize for Permission {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.level())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_level(u8::deserialize(deserializer)?))
    }
}

/// A WGS84 coordinate that passed range validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    pub fn new(longitude: f64, latitude: f64) -> Result<Self, DomainError> {
        Ok(Self {
            longitude: validate_longitude(longitude)?,
            latitude: validate_latitude(latitude)?,
        })
    }
}

/// Reject longitudes outside [-180, 180] (NaN included).
pub fn validate_longitude(lng: f64) -> Result<f64, DomainError> {
    if (MIN_LONGITUDE..=MAX_LONGITUDE).contains(&lng) {
        Ok(lng)
    } else {
        Err(DomainError::validation("longitude must be between -180 and 180"))
    }
}

/// Reject latitudes outside [-90, 90] (NaN included).
pub fn validate_latitude(lat: f64) -> Result<f64, DomainError> {
    if (MIN_LATITUDE..=MAX_LATITUDE).contains(&lat) {
        Ok(lat)
    } else {
        Err(DomainError::validation("latitude must be between -90 and 90"))
    }
}

/// Reject a string longer than `max` chars.
pub fn validate_max_chars(field: &str, value: &str, max: usize) -> Result<(), DomainError> {
    if value.chars().count() > max {
        return Err(DomainError::validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

/// Canonical form of a hex colour: trimmed, no leading `#`, lowercase.
pub fn normalize_hex(color: &str) -> String {
    let trimmed = color.trim();
    trimmed
        .strip_prefix('#')
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

/// One page of a ReadAll query.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of items on this page
    pub result_count: usize,
    /// Number of items matching the query across all pages
    pub total_items: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_items: u64) -> Self {
        Self {
            result_count: items.len(),
            items,
            total_items,
        }
    }
}

/// Paging window: `page` is 1-based, zero in either field disables paging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub per_page: usize,
}

impl Paging {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    /// `(offset, limit)` when paging is active.
    pub fn window(&self) -> Option<(usize, usize)> {
        if self.page > 0 && self.per_page > 0 {
            Some(((self.page - 1) * self.per_page, self.per_page))
        } else {
            None
        }
    }

    /// Apply the window to an already filtered, ordered list.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        match self.window() {
            Some((offset, limit)) => items.into_iter().skip(offset).take(limit).collect(),
            None => items,
        }
    }
}
