//! Geocode Provider Port
//!
//! Defines the interface for resolving a free-text address into a coordinate.

use crate::domain::entities::GeocodeResult;
use crate::domain::errors::GeocodeError;
use async_trait::async_trait;

/// A single external geocoding backend.
///
/// This is an outbound port. Implementations make one best-effort attempt
/// per call (no retries); falling back to another provider is the job of
/// the application layer.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Resolve `address` to the provider's best candidate.
    async fn geocode(&self, address: &str) -> Result<GeocodeResult, GeocodeError>;

    /// Stable identifier of the provider ("nominatim", "baidu", ...).
    fn name(&self) -> &str;
}
