//! Domain Errors
//!
//! Error types shared by the application services and the adapters.

/// Failure of a single geocoding provider or of the whole provider chain.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("address cannot be empty")]
    EmptyAddress,

    #[error("{provider} API key is required")]
    MissingApiKey { provider: String },

    #[error("failed to make geocoding request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("geocoding request failed with status: {0}")]
    HttpStatus(u16),

    #[error("failed to parse geocoding response: {0}")]
    MalformedResponse(String),

    #[error("no results found for address: {0}")]
    NoResults(String),

    /// The provider answered 200 but reported a failure in its own payload.
    #[error("geocoding failed: {message} (status: {status})")]
    Provider { status: i64, message: String },

    #[error("no geocoding providers available")]
    NoProviders,

    #[error("all geocoding providers failed, last error from {provider}: {source}")]
    AllProvidersFailed {
        provider: String,
        #[source]
        source: Box<GeocodeError>,
    },
}

/// Errors surfaced by the merchant directory operations.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// Out-of-range coordinate, missing or too long field.
    #[error("{0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The principal may not touch the entity. Existence is not disclosed.
    #[error("{0} not found or access denied")]
    AccessDenied(String),

    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read CSV file: {0}")]
    Csv(#[from] csv::Error),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn access_denied(entity: impl Into<String>) -> Self {
        Self::AccessDenied(entity.into())
    }
}
