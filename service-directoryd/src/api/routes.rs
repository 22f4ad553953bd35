use std::collections::BTreeSet;
use std::sync::Arc;
use axum::{
    extract::{rejection::JsonRejection, Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::protocol::{API_PREFIX, SERVICE_INFO_PATH};
use shared::types::{ServiceRecord, ValidationError};
use crate::finder::{self, SearchQuery};
use crate::registry::{RegistryError, ServiceRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    /// What this directory answers on its own `/service-info`
    pub self_info: Arc<ServiceRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match e {
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.status.as_u16(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Search parameters as sent on the query string.
/// Set values may be comma separated (`modes=CAR,BUS`), repeated
/// (`modes=CAR&modes=BUS`), or both.
#[derive(Debug, Default)]
pub struct SearchParams {
    pub modes: Vec<String>,
    pub apis: Vec<String>,
    pub mobility_types: Vec<String>,
    pub service_ids: Vec<String>,
    pub exclude_inactive: Option<bool>,
}

impl SearchParams {
    /// Merge decoded `key=value` pairs; unknown keys are ignored
    pub fn from_query_string(raw: &str) -> Result<Self, ApiError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw)
            .map_err(|e| ApiError::bad_request(format!("Malformed query string: {}", e)))?;

        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "modes" => params.modes.push(value),
                "apis" => params.apis.push(value),
                "mobilityTypes" => params.mobility_types.push(value),
                "serviceIds" => params.service_ids.push(value),
                "excludeInactive" | "active" => {
                    let flag = value.trim().parse::<bool>().map_err(|_| {
                        ApiError::bad_request(format!("Invalid value [{}] for parameter {}", value, key))
                    })?;
                    params.exclude_inactive = Some(flag);
                }
                _ => {}
            }
        }

        Ok(params)
    }

    fn into_query(self) -> Result<SearchQuery, ApiError> {
        Ok(SearchQuery {
            modes: parse_set(&self.modes, "modes")?,
            apis: parse_set(&self.apis, "apis")?,
            mobility_types: parse_set(&self.mobility_types, "mobilityTypes")?,
            service_ids: split_list(&self.service_ids)
                .map(str::to_string)
                .collect(),
            exclude_inactive: self.exclude_inactive.unwrap_or(true),
        })
    }
}

fn split_list(values: &[String]) -> impl Iterator<Item = &str> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Parse enum names as they appear in JSON
fn parse_set<T: DeserializeOwned + Ord>(values: &[String], param: &str) -> Result<BTreeSet<T>, ApiError> {
    split_list(values)
        .map(|item| {
            serde_json::from_value(serde_json::Value::String(item.to_string()))
                .map_err(|_| ApiError::bad_request(format!("Invalid value [{}] for parameter {}", item, param)))
        })
        .collect()
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/services", get(get_all).post(register_service))
        .route(
            "/services/:id",
            get(get_service).put(update_service).delete(delete_service),
        )
        .route("/search", get(search));

    Router::new()
        .nest(API_PREFIX, api)
        .route(SERVICE_INFO_PATH, get(service_info))
        .with_state(state)
}

async fn service_info(State(state): State<AppState>) -> Json<ServiceRecord> {
    Json(state.self_info.as_ref().clone())
}

async fn get_all(State(state): State<AppState>) -> Json<Vec<ServiceRecord>> {
    Json(state.registry.get_all())
}

async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceRecord>, ApiError> {
    Ok(Json(state.registry.get_by_id(&id)?))
}

async fn register_service(
    State(state): State<AppState>,
    payload: Result<Json<ServiceRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<ServiceRecord>), ApiError> {
    let Json(service) = payload?;
    service.validate()?;

    let stored = state.registry.register(service)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ServiceRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<ServiceRecord>), ApiError> {
    let Json(mut service) = payload?;

    // The path decides the id; a body without one is still valid
    service.id = id.clone();
    service.validate()?;

    let stored = state.registry.update(&id, service)?;
    Ok((StatusCode::ACCEPTED, Json(stored)))
}

async fn delete_service(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.registry.delete(&id);
    StatusCode::NO_CONTENT
}

async fn search(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<ServiceRecord>>, ApiError> {
    let query = SearchParams::from_query_string(raw.as_deref().unwrap_or_default())?.into_query()?;
    Ok(Json(finder::search(&state.registry, &query)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use shared::types::Mode;
    use tower::ServiceExt; // for `oneshot`

    fn test_record(id: &str, mode: Mode) -> ServiceRecord {
        ServiceRecord {
            id: id.to_string(),
            provider: "Legendary Services GmbH".to_string(),
            name: id.to_string(),
            service_url: format!("http://{}/", id),
            area: "Entire Spacetime-continuum".to_string(),
            modes: BTreeSet::from([mode]),
            ..Default::default()
        }
    }

    fn test_app() -> (Router, Arc<ServiceRegistry>) {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(test_record("legendary-service-1", Mode::Car)).unwrap();
        registry.register(test_record("legendary-service-2", Mode::Bicycle)).unwrap();

        let state = AppState {
            registry: registry.clone(),
            self_info: Arc::new(test_record("service-directory", Mode::Walk)),
        };
        (router(state), registry)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<String>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("Content-Type", "application/json");
                Body::from(json)
            }
            None => Body::empty(),
        };

        app.clone().oneshot(request.body(body).unwrap()).await.unwrap()
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn ids(services: &[ServiceRecord]) -> Vec<&str> {
        services.iter().map(|s| s.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_get_all_services() {
        let (app, _) = test_app();
        let response = send(&app, "GET", "/api/services", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(services.len(), 2);
    }

    #[tokio::test]
    async fn test_get_service_by_id() {
        let (app, _) = test_app();
        let response = send(&app, "GET", "/api/services/legendary-service-1", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let service: ServiceRecord = read_json(response).await;
        assert_eq!(service, test_record("legendary-service-1", Mode::Car));
    }

    #[tokio::test]
    async fn test_get_service_404() {
        let (app, _) = test_app();
        let response = send(&app, "GET", "/api/services/unknown_service_id", None).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error: ErrorResponse = read_json(response).await;
        assert_eq!(error.code, 404);
        assert!(!error.message.is_empty());
    }

    #[tokio::test]
    async fn test_register_service() {
        let (app, registry) = test_app();
        let record = test_record("legendary-service-3", Mode::Bus);
        let body = serde_json::to_string(&record).unwrap();

        let response = send(&app, "POST", "/api/services", Some(body)).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let stored: ServiceRecord = read_json(response).await;
        assert_eq!(stored, record);
        assert!(registry.is_active("legendary-service-3"));
    }

    #[tokio::test]
    async fn test_register_missing_url_400() {
        let (app, registry) = test_app();
        let mut record = test_record("legendary-service-3", Mode::Bus);
        record.service_url = String::new();

        let response = send(&app, "POST", "/api/services", Some(serde_json::to_string(&record).unwrap())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let error: ErrorResponse = read_json(response).await;
        assert!(error.message.contains("serviceUrl"));
        assert!(!registry.contains("legendary-service-3"));
    }

    #[tokio::test]
    async fn test_register_malformed_json_400() {
        let (app, _) = test_app();
        let response = send(&app, "POST", "/api/services", Some(r#"{"id": "x", "modes": ["HOVERCRAFT"]}"#.to_string())).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_service() {
        let (app, registry) = test_app();
        registry.mark_inactive("legendary-service-1");

        let mut record = test_record("ignored", Mode::Tram);
        record.name = "Renamed".to_string();
        let body = serde_json::to_string(&record).unwrap();

        let response = send(&app, "PUT", "/api/services/legendary-service-1", Some(body)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let stored: ServiceRecord = read_json(response).await;
        assert_eq!(stored.id, "legendary-service-1");
        assert_eq!(registry.get_by_id("legendary-service-1").unwrap().name, "Renamed");
        assert!(registry.is_active("legendary-service-1"));
    }

    #[tokio::test]
    async fn test_update_unknown_404() {
        let (app, registry) = test_app();
        let body = serde_json::to_string(&test_record("unknown", Mode::Car)).unwrap();

        let response = send(&app, "PUT", "/api/services/unknown", Some(body)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (app, registry) = test_app();

        for _ in 0..2 {
            let response = send(&app, "DELETE", "/api/services/legendary-service-1", None).await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        assert!(!registry.contains("legendary-service-1"));
    }

    #[tokio::test]
    async fn test_search_all_regardless_of_activity() {
        let (app, registry) = test_app();
        registry.set_active("legendary-service-2", false);

        let response = send(&app, "GET", "/api/search?active=false", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(ids(&services), vec!["legendary-service-1", "legendary-service-2"]);
    }

    #[tokio::test]
    async fn test_search_active_only_by_default() {
        let (app, registry) = test_app();
        registry.set_active("legendary-service-2", false);

        let response = send(&app, "GET", "/api/search", None).await;
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(ids(&services), vec!["legendary-service-1"]);
    }

    #[tokio::test]
    async fn test_search_by_modes() {
        let (app, _) = test_app();

        let response = send(&app, "GET", "/api/search?excludeInactive=true&modes=BICYCLE", None).await;
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(ids(&services), vec!["legendary-service-2"]);

        let response = send(&app, "GET", "/api/search?modes=CAR,BICYCLE", None).await;
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(services.len(), 2);

        let response = send(&app, "GET", "/api/search?modes=TRAM", None).await;
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert!(services.is_empty());
    }

    #[tokio::test]
    async fn test_search_repeated_mode_keys() {
        let (app, _) = test_app();

        let response = send(&app, "GET", "/api/search?modes=CAR&modes=BUS", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(ids(&services), vec!["legendary-service-1"]);

        let response = send(&app, "GET", "/api/search?modes=TRAM,CAR&modes=BICYCLE", None).await;
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(ids(&services), vec!["legendary-service-1", "legendary-service-2"]);
    }

    #[tokio::test]
    async fn test_search_repeated_service_ids() {
        let (app, _) = test_app();
        let response = send(
            &app,
            "GET",
            "/api/search?serviceIds=legendary-service-2&serviceIds=UNKNOWN",
            None,
        )
        .await;

        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(ids(&services), vec!["legendary-service-2"]);
    }

    #[tokio::test]
    async fn test_search_invalid_flag_returns_json_error() {
        let (app, _) = test_app();
        let response = send(&app, "GET", "/api/search?excludeInactive=maybe", None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = read_json(response).await;
        assert_eq!(error.code, 400);
        assert!(error.message.contains("excludeInactive"));
    }

    #[tokio::test]
    async fn test_search_flag_and_alias_together() {
        let (app, registry) = test_app();
        registry.set_active("legendary-service-2", false);

        let response = send(&app, "GET", "/api/search?active=false&excludeInactive=false", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(services.len(), 2);
    }

    #[tokio::test]
    async fn test_search_unknown_mode_400() {
        let (app, _) = test_app();
        let response = send(&app, "GET", "/api/search?modes=UNKNOWN", None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = read_json(response).await;
        assert_eq!(error.code, 400);
        assert!(error.message.contains("UNKNOWN"));
    }

    #[tokio::test]
    async fn test_search_by_service_id() {
        let (app, _) = test_app();

        let response = send(&app, "GET", "/api/search?serviceIds=UNKNOWN", None).await;
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert!(services.is_empty());

        let response = send(&app, "GET", "/api/search?serviceIds=LEGENDARY-SERVICE-1", None).await;
        let services: Vec<ServiceRecord> = read_json(response).await;
        assert_eq!(ids(&services), vec!["legendary-service-1"]);
    }

    #[tokio::test]
    async fn test_own_service_info() {
        let (app, _) = test_app();
        let response = send(&app, "GET", "/service-info", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let info: ServiceRecord = read_json(response).await;
        assert_eq!(info.id, "service-directory");
    }
}
