//! Merchant Directory API Server
//!
//! HTTP surface over the application services: merchants, merchant tags,
//! geo points, CSV import and ad-hoc geocoding.
//! The caller is identified by the `x-user-id` / `x-username` headers.

use crate::application::{
    CsvImportResult, GeoPointService, GeocodeService, MerchantCsvImporter, MerchantService,
    MerchantTagService,
};
use crate::domain::entities::{
    GeoPoint, GeoPointDraft, Merchant, MerchantDraft, MerchantTag, MerchantTagDraft,
    MerchantUpdate, Principal,
};
use crate::domain::errors::{DomainError, GeocodeError};
use crate::domain::value_objects::{Page, Paging};
use axum::{
    async_trait,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";

/// Upload cap for CSV imports (20 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Source tag for points saved through `POST /api/v1/geocode`.
pub const API_GEOCODE_SOURCE: &str = "api";

/// Services shared by the handlers.
#[derive(Clone)]
pub struct ApiState {
    pub merchants: Arc<MerchantService>,
    pub tags: Arc<MerchantTagService>,
    pub geo_points: Arc<GeoPointService>,
    pub geocoder: Arc<GeocodeService>,
    pub importer: Arc<MerchantCsvImporter>,
}

// ===== Requests / responses =====

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub per_page: usize,
}

impl ListQuery {
    fn paging(&self) -> Paging {
        Paging::new(self.page, self.per_page)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TagListQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub per_page: usize,
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    #[serde(default = "default_auto_geocode")]
    pub auto_geocode: bool,
}

fn default_auto_geocode() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lng: f64,
    pub lat: f64,
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
    #[serde(default)]
    pub limit: usize,
}

fn default_radius_km() -> f64 {
    1.0
}

/// Body of `POST /api/v1/geocode`. With a `source` the result is persisted
/// (or served from the cache) as a geo point.
#[derive(Debug, Deserialize)]
pub struct GeocodeRequest {
    pub address: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub providers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NearbyPoint {
    #[serde(flatten)]
    pub point: GeoPoint,
    pub distance_km: f64,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: i64,
    pub deleted: bool,
}

// ===== Errors =====

/// Error returned by every handler, rendered as
/// `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Domain(DomainError),
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self::Domain(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Domain(e) => match e {
                DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                DomainError::Csv(_) => (StatusCode::BAD_REQUEST, "invalid_csv"),
                DomainError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                DomainError::AccessDenied(_) => (StatusCode::FORBIDDEN, "access_denied"),
                DomainError::Geocode(GeocodeError::EmptyAddress) => {
                    (StatusCode::BAD_REQUEST, "validation_error")
                }
                DomainError::Geocode(_) => (StatusCode::BAD_GATEWAY, "geocoding_failed"),
                DomainError::Storage(_) | DomainError::Serialization(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            Self::Unauthorized => format!("missing or invalid {} header", USER_ID_HEADER),
            Self::Domain(e) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("request failed: {:?}", e);
                "internal server error".to_string()
            }
            Self::Domain(e) => e.to_string(),
        };

        let body = serde_json::json!({
            "error": { "code": code, "message": message }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ===== Principal extraction =====

/// The calling user, taken from the request headers.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id: i64 = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .ok_or(ApiError::Unauthorized)?;

        let username = parts
            .headers
            .get(USERNAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("user-{}", id));

        Ok(Self(Principal::new(id, username)))
    }
}

// ===== Server =====

/// Build the API router over `state`.
pub fn router(state: ApiState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Merchants
        .route(
            "/api/v1/merchants",
            post(create_merchant_handler).get(list_merchants_handler),
        )
        .route(
            "/api/v1/merchants/import",
            post(import_merchants_handler).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/v1/merchants/import/template", get(import_template_handler))
        .route(
            "/api/v1/merchants/:id",
            get(get_merchant_handler)
                .put(update_merchant_handler)
                .delete(delete_merchant_handler),
        )
        .route("/api/v1/merchants/:id/geocode", post(geocode_merchant_handler))
        // Geo points
        .route(
            "/api/v1/merchants/:id/geopoints",
            post(create_geo_point_handler).get(list_geo_points_handler),
        )
        .route("/api/v1/geopoints/nearby", get(nearby_handler))
        .route(
            "/api/v1/geopoints/:id",
            get(get_geo_point_handler)
                .put(update_geo_point_handler)
                .delete(delete_geo_point_handler),
        )
        // Merchant tags
        .route(
            "/api/v1/merchant-tags",
            post(create_tag_handler).get(list_tags_handler),
        )
        .route(
            "/api/v1/merchant-tags/:id",
            get(get_tag_handler)
                .put(update_tag_handler)
                .delete(delete_tag_handler),
        )
        // Ad-hoc geocoding
        .route("/api/v1/geocode", post(geocode_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    listen_addr: String,
    state: ApiState,
    max_upload_bytes: usize,
}

impl ApiServer {
    pub fn new(listen_addr: String, state: ApiState) -> Self {
        Self {
            listen_addr,
            state,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state, self.max_upload_bytes);

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("merchant API listening on {}", self.listen_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// ===== Handlers =====

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.geocoder.provider_names(),
    })
}

async fn create_merchant_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(draft): Json<MerchantDraft>,
) -> ApiResult<(StatusCode, Json<Merchant>)> {
    let merchant = state.merchants.create(&principal, draft).await?;
    tracing::info!("merchant {} created by {}", merchant.id, principal.username);
    Ok((StatusCode::CREATED, Json(merchant)))
}

async fn list_merchants_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<Merchant>>> {
    let page = state
        .merchants
        .read_all(&principal, &query.search, query.paging())
        .await?;
    Ok(Json(page))
}

async fn get_merchant_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Json<Merchant>> {
    Ok(Json(state.merchants.read_one(&principal, id).await?))
}

async fn update_merchant_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
    Json(update): Json<MerchantUpdate>,
) -> ApiResult<Json<Merchant>> {
    Ok(Json(state.merchants.update(&principal, id, update).await?))
}

async fn delete_merchant_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeletedResponse>> {
    state.merchants.delete(&principal, id).await?;
    tracing::info!("merchant {} deleted by {}", id, principal.username);
    Ok(Json(DeletedResponse { id, deleted: true }))
}

async fn geocode_merchant_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Json<Merchant>> {
    Ok(Json(state.merchants.geocode_merchant(&principal, id).await?))
}

async fn import_merchants_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> ApiResult<Json<CsvImportResult>> {
    let result = state
        .importer
        .import(&principal, body.as_ref(), query.auto_geocode)
        .await?;
    Ok(Json(result))
}

async fn import_template_handler(State(state): State<ApiState>) -> ApiResult<Response> {
    let template = state.importer.generate_template()?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"merchant_import_template.csv\"",
            ),
        ],
        template,
    )
        .into_response())
}

async fn create_geo_point_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(merchant_id): Path<i64>,
    Json(mut draft): Json<GeoPointDraft>,
) -> ApiResult<(StatusCode, Json<GeoPoint>)> {
    draft.merchant_id = Some(merchant_id);
    let point = state.geo_points.create(&principal, draft).await?;
    Ok((StatusCode::CREATED, Json(point)))
}

async fn list_geo_points_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(merchant_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<GeoPoint>>> {
    let page = state
        .geo_points
        .read_all(&principal, merchant_id, &query.search, query.paging())
        .await?;
    Ok(Json(page))
}

async fn get_geo_point_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Json<GeoPoint>> {
    Ok(Json(state.geo_points.read_one(&principal, id).await?))
}

async fn update_geo_point_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
    Json(draft): Json<GeoPointDraft>,
) -> ApiResult<Json<GeoPoint>> {
    Ok(Json(state.geo_points.update(&principal, id, draft).await?))
}

async fn delete_geo_point_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeletedResponse>> {
    state.geo_points.delete(&principal, id).await?;
    Ok(Json(DeletedResponse { id, deleted: true }))
}

async fn nearby_handler(
    State(state): State<ApiState>,
    AuthPrincipal(_principal): AuthPrincipal,
    Query(query): Query<NearbyQuery>,
) -> ApiResult<Json<Vec<NearbyPoint>>> {
    let points = state
        .geocoder
        .find_nearby_geo_points(query.lng, query.lat, query.radius_km, query.limit)
        .await?;

    let nearby = points
        .into_iter()
        .map(|point| NearbyPoint {
            distance_km: point.distance_to_km(query.lat, query.lng),
            point,
        })
        .collect();
    Ok(Json(nearby))
}

async fn create_tag_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(draft): Json<MerchantTagDraft>,
) -> ApiResult<(StatusCode, Json<MerchantTag>)> {
    let tag = state.tags.create(&principal, draft).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn list_tags_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<TagListQuery>,
) -> ApiResult<Json<Page<MerchantTag>>> {
    let paging = Paging::new(query.page, query.per_page);
    let page = state
        .tags
        .read_all(&principal, &query.search, query.class, paging)
        .await?;
    Ok(Json(page))
}

async fn get_tag_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Json<MerchantTag>> {
    Ok(Json(state.tags.read_one(&principal, id).await?))
}

async fn update_tag_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
    Json(draft): Json<MerchantTagDraft>,
) -> ApiResult<Json<MerchantTag>> {
    Ok(Json(state.tags.update(&principal, id, draft).await?))
}

async fn delete_tag_handler(
    State(state): State<ApiState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeletedResponse>> {
    state.tags.delete(&principal, id).await?;
    Ok(Json(DeletedResponse { id, deleted: true }))
}

async fn geocode_handler(
    State(state): State<ApiState>,
    AuthPrincipal(_principal): AuthPrincipal,
    Json(req): Json<GeocodeRequest>,
) -> ApiResult<Response> {
    match req.source {
        Some(source) => {
            let source = if source.trim().is_empty() {
                API_GEOCODE_SOURCE.to_string()
            } else {
                source
            };
            let point = state
                .geocoder
                .geocode_and_save(&req.address, &source, req.metadata)
                .await?;
            Ok(Json(point).into_response())
        }
        None => {
            let result = state
                .geocoder
                .geocode(&req.address)
                .await
                .map_err(DomainError::from)?;
            Ok(Json(result).into_response())
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::DashMapStore;
    use crate::application::test_support::{FakeProvider, RecordingPublisher};
    use crate::application::{GeocodeDispatcher, Repositories};
    use crate::domain::ports::{EventPublisher, GeocodeProvider};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        publisher: Arc<RecordingPublisher>,
        dispatcher: GeocodeDispatcher,
    }

    fn test_state(
        providers: Vec<Arc<dyn GeocodeProvider>>,
    ) -> (ApiState, Arc<RecordingPublisher>, GeocodeDispatcher) {
        let store = Arc::new(DashMapStore::new());
        let repos = Repositories::from_store(store);
        let publisher = Arc::new(RecordingPublisher::default());
        let events: Arc<dyn EventPublisher> = publisher.clone();

        let geocoder = Arc::new(
            GeocodeService::new(providers, repos.geo_points.clone())
                .with_batch_delay(Duration::ZERO),
        );
        let dispatcher = GeocodeDispatcher::new(geocoder.clone(), 2);
        let merchants = Arc::new(
            MerchantService::new(repos.clone(), events.clone()).with_geocoder(geocoder.clone()),
        );
        let importer = Arc::new(
            MerchantCsvImporter::new(merchants.clone(), repos.tags.clone())
                .with_dispatcher(dispatcher.clone()),
        );

        let state = ApiState {
            merchants,
            tags: Arc::new(MerchantTagService::new(repos.tags.clone(), events.clone())),
            geo_points: Arc::new(GeoPointService::new(
                repos.merchants.clone(),
                repos.geo_points.clone(),
                events,
            )),
            geocoder,
            importer,
        };
        (state, publisher, dispatcher)
    }

    fn test_app(providers: Vec<Arc<dyn GeocodeProvider>>) -> TestApp {
        let (state, publisher, dispatcher) = test_state(providers);
        TestApp {
            router: router(state, DEFAULT_MAX_UPLOAD_BYTES),
            publisher,
            dispatcher,
        }
    }

    fn resolving_app() -> TestApp {
        test_app(vec![Arc::new(FakeProvider::resolving("fake", 116.4, 39.9))])
    }

    fn request(method: &str, uri: &str, user: Option<i64>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user {
            builder = builder
                .header(USER_ID_HEADER, id.to_string())
                .header(USERNAME_HEADER, format!("user{}", id));
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_lists_providers() {
        let app = resolving_app();
        let (status, body) = send(&app, request("GET", "/health", None, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["providers"], serde_json::json!(["fake"]));
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        let app = resolving_app();
        let (status, body) = send(&app, request("GET", "/api/v1/merchants", None, None)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_invalid_principal_is_unauthorized() {
        let app = resolving_app();
        let req = Request::builder()
            .uri("/api/v1/merchants")
            .header(USER_ID_HEADER, "abc")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_merchant_crud_flow() {
        let app = resolving_app();

        let (status, created) = send(
            &app,
            request(
                "POST",
                "/api/v1/merchants",
                Some(1),
                Some(serde_json::json!({ "title": "Tea House", "city": "Hangzhou" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["max_permission"], 2);
        let id = created["id"].as_i64().unwrap();

        let (status, listed) =
            send(&app, request("GET", "/api/v1/merchants?search=tea", Some(1), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["total_items"], 1);

        let (status, updated) = send(
            &app,
            request(
                "PUT",
                &format!("/api/v1/merchants/{}", id),
                Some(1),
                Some(serde_json::json!({ "title": "Tea House 2", "is_favorite": true })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "Tea House 2");
        assert_eq!(updated["is_favorite"], true);

        let (status, _) = send(
            &app,
            request("DELETE", &format!("/api/v1/merchants/{}", id), Some(1), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            request("GET", &format!("/api/v1/merchants/{}", id), Some(1), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");

        assert_eq!(
            app.publisher.names(),
            vec!["merchant.created", "merchant.updated", "merchant.deleted"]
        );
    }

    #[tokio::test]
    async fn test_validation_error_is_bad_request() {
        let app = resolving_app();
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/v1/merchants",
                Some(1),
                Some(serde_json::json!({ "title": "x", "lng": 200.0 })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("longitude"));
    }

    #[tokio::test]
    async fn test_foreign_merchant_is_forbidden() {
        let app = resolving_app();
        let (_, created) = send(
            &app,
            request(
                "POST",
                "/api/v1/merchants",
                Some(1),
                Some(serde_json::json!({ "title": "Mine" })),
            ),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            request("GET", &format!("/api/v1/merchants/{}", id), Some(2), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["message"], "merchant not found or access denied");
    }

    #[tokio::test]
    async fn test_geocode_merchant_endpoint() {
        let app = resolving_app();
        let (_, created) = send(
            &app,
            request(
                "POST",
                "/api/v1/merchants",
                Some(1),
                Some(serde_json::json!({ "title": "Shop", "address": "1 Main St" })),
            ),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            request("POST", &format!("/api/v1/merchants/{}/geocode", id), Some(1), None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lng"], 116.4);
        assert_eq!(body["geocode_attempts"], 1);
        assert_eq!(body["geo_points"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_geocode_failure_is_bad_gateway() {
        let app = test_app(vec![Arc::new(FakeProvider::failing("down"))]);
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/v1/geocode",
                Some(1),
                Some(serde_json::json!({ "address": "nowhere" })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "geocoding_failed");
    }

    #[tokio::test]
    async fn test_geocode_endpoint_with_and_without_source() {
        let app = resolving_app();

        let (status, result) = send(
            &app,
            request(
                "POST",
                "/api/v1/geocode",
                Some(1),
                Some(serde_json::json!({ "address": "Tiananmen" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["provider"], "fake");
        assert!(result.get("id").is_none());

        let (status, point) = send(
            &app,
            request(
                "POST",
                "/api/v1/geocode",
                Some(1),
                Some(serde_json::json!({ "address": "Tiananmen", "source": "" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(point["from"], API_GEOCODE_SOURCE);
        assert!(point["id"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_empty_address_is_bad_request() {
        let app = resolving_app();
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/api/v1/geocode",
                Some(1),
                Some(serde_json::json!({ "address": " " })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_geo_point_endpoints_and_nearby() {
        let app = resolving_app();
        let (_, merchant) = send(
            &app,
            request(
                "POST",
                "/api/v1/merchants",
                Some(1),
                Some(serde_json::json!({ "title": "Shop" })),
            ),
        )
        .await;
        let merchant_id = merchant["id"].as_i64().unwrap();

        let (status, point) = send(
            &app,
            request(
                "POST",
                &format!("/api/v1/merchants/{}/geopoints", merchant_id),
                Some(1),
                Some(serde_json::json!({
                    "from": "manual", "longitude": 0.1, "latitude": 0.1, "address": "near"
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(point["merchant_id"], merchant_id);
        let point_id = point["id"].as_i64().unwrap();

        let (status, page) = send(
            &app,
            request(
                "GET",
                &format!("/api/v1/merchants/{}/geopoints", merchant_id),
                Some(1),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["result_count"], 1);

        let (status, nearby) = send(
            &app,
            request(
                "GET",
                "/api/v1/geopoints/nearby?lng=0&lat=0&radius_km=50",
                Some(1),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let nearby = nearby.as_array().unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0]["id"], point_id);
        assert!(nearby[0]["distance_km"].as_f64().unwrap() < 16.0);

        let (status, _) = send(
            &app,
            request("DELETE", &format!("/api/v1/geopoints/{}", point_id), Some(1), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_nearby_rejects_bad_coordinates() {
        let app = resolving_app();
        let (status, _) = send(
            &app,
            request("GET", "/api/v1/geopoints/nearby?lng=181&lat=0", Some(1), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tag_endpoints() {
        let app = resolving_app();
        let (status, tag) = send(
            &app,
            request(
                "POST",
                "/api/v1/merchant-tags",
                Some(1),
                Some(serde_json::json!({ "tag_name": "Food", "class": "dining", "hex_color": "#FFAA00" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(tag["hex_color"], "ffaa00");
        let id = tag["id"].as_i64().unwrap();

        let (_, page) = send(
            &app,
            request("GET", "/api/v1/merchant-tags?class=dining", Some(1), None),
        )
        .await;
        assert_eq!(page["total_items"], 1);

        let (status, _) = send(
            &app,
            request("GET", &format!("/api/v1/merchant-tags/{}", id), Some(2), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            request("DELETE", &format!("/api/v1/merchant-tags/{}", id), Some(1), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_import_endpoint() {
        let app = resolving_app();
        let csv = "商户名称,地址,经度\nShop A,1 Main St,\nShop B,,500\n";
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/merchants/import?auto_geocode=true")
            .header(USER_ID_HEADER, "1")
            .header("content-type", "text/csv")
            .body(Body::from(csv))
            .unwrap();

        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success_count"], 1);
        assert_eq!(body["error_count"], 1);
        assert_eq!(body["errors"][0]["row"], 3);
        assert_eq!(body["summary"]["geocoding_enabled"], true);

        app.dispatcher.wait_idle().await;
        let (_, listed) = send(&app, request("GET", "/api/v1/merchants", Some(1), None)).await;
        assert_eq!(listed["items"][0]["geo_points"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_without_title_column_fails() {
        let app = resolving_app();
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/merchants/import")
            .header(USER_ID_HEADER, "1")
            .body(Body::from("address\nsomewhere\n"))
            .unwrap();

        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("required column 'title'"));
    }

    #[tokio::test]
    async fn test_import_template_download() {
        let app = resolving_app();
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/api/v1/merchants/import/template", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("商户名称,"));
    }

    #[tokio::test]
    async fn test_api_server_run_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (state, _, _) = test_state(Vec::new());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = ApiServer::new(addr.to_string(), state);
        let handle = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = reqwest::Client::new()
            .get(format!("http://{}/health", addr))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
