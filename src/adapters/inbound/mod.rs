mod api_server;

pub use api_server::{router, ApiServer, ApiState, DEFAULT_MAX_UPLOAD_BYTES};

// Re-export for external use (e.g., integration tests)
#[allow(unused_imports)]
pub use api_server::{ApiError, AuthPrincipal, GeocodeRequest, USERNAME_HEADER, USER_ID_HEADER};
