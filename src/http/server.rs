//! HTTP API server for the entity store
//!
//! Engine calls are synchronous and may block on RocksDB, so every handler
//! runs them on tokio's blocking pool.

use crate::{
    error::StoreError,
    storage::{scan::ChangePage, Store},
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{future::Future, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

/// Address the server binds to.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080, page_size: DEFAULT_PAGE_SIZE }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Entries returned by a listing request that gives no `take`.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Shared state for all handlers
pub struct AppState {
    pub store: Arc<Store>,
    /// Page size applied when a listing request gives no `take`
    pub page_size: usize,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Request to create a dataset
#[derive(Debug, Deserialize)]
pub struct CreateDatasetRequest {
    pub name: String,
    #[serde(default)]
    pub entity: Option<Value>,
}

/// Dataset description returned by the dataset endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetResponse {
    pub name: String,
    pub id: u32,
    pub last_sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<Value>,
}

/// Result of an ingestion request
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub dataset: String,
    pub count: usize,
}

/// Store description returned by `/info`
#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub datasets: usize,
    pub namespaces: usize,
    pub shard_count: u32,
    pub entity: Value,
}

#[derive(Debug, Deserialize)]
pub struct ListingParams {
    pub id: Option<String>,
    pub token: Option<String>,
    pub take: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartitionParams {
    pub count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EntityParams {
    pub id: String,
    /// Comma separated dataset names. Absent means all datasets.
    pub datasets: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelatedParams {
    pub id: String,
    pub property: Option<String>,
    #[serde(default)]
    pub inverse: bool,
    #[serde(default)]
    pub skip: usize,
    pub take: Option<usize>,
    pub datasets: Option<String>,
}

/// Custom error type for API errors
pub enum ApiError {
    Store(StoreError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(err) => {
                let status = match &err {
                    StoreError::Parse { .. } | StoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
                    StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %err, "request failed");
                }
                (status, err.to_string())
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run an engine call on the blocking pool.
async fn blocking<T, F>(store: &Arc<Store>, call: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> crate::Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(&store))
        .await
        .map_err(|e| ApiError::Internal(format!("engine task failed: {}", e)))?
        .map_err(ApiError::from)
}

fn dataset_list(param: Option<&str>) -> Vec<String> {
    param
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Listing body: context entity, items, then the continuation entity if any.
fn listing(context: Value, items: Vec<Value>, next_token: Option<String>) -> Json<Value> {
    let mut body = Vec::with_capacity(items.len() + 2);
    body.push(context);
    body.extend(items);
    if let Some(token) = next_token {
        body.push(json!({"@id": "@continuation", "wod:next-data": token}));
    }
    Json(Value::Array(body))
}

/// Create the HTTP server with all routes
pub fn create_server(store: Arc<Store>) -> Router {
    create_server_with_page_size(store, DEFAULT_PAGE_SIZE)
}

/// Create the HTTP server, bounding listings without `take` to `page_size`
/// entries.
pub fn create_server_with_page_size(store: Arc<Store>, page_size: usize) -> Router {
    let state = Arc::new(AppState { store, page_size: page_size.max(1) });
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(get_info).put(put_info))
        .route("/datasets", get(list_datasets).post(create_dataset))
        .route("/datasets/:name", get(get_dataset).put(update_dataset).delete(delete_dataset))
        .route("/datasets/:name/entities", get(get_entities).post(post_entities))
        .route("/datasets/:name/entities/partitions", get(entity_partitions))
        .route("/datasets/:name/changes", get(get_changes))
        .route("/datasets/:name/changes/partitions", get(change_partitions))
        .route("/entity", get(get_entity))
        .route("/related", get(get_related))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(SuccessResponse { message: "webofdata store is running".to_string() })
}

/// GET /info
async fn get_info(State(state): State<Arc<AppState>>) -> ApiResult<Json<InfoResponse>> {
    let info = blocking(&state.store, |store| {
        Ok(InfoResponse {
            datasets: store.datasets().len(),
            namespaces: store.interner().namespaces().len(),
            shard_count: store.config().shard_count,
            entity: store.get_store_metadata()?.unwrap_or_else(|| json!({})),
        })
    })
    .await?;
    Ok(Json(info))
}

/// PUT /info - replace the store metadata entity
async fn put_info(State(state): State<Arc<AppState>>, Json(entity): Json<Value>) -> ApiResult<StatusCode> {
    blocking(&state.store, move |store| store.put_store_metadata(&entity)).await?;
    Ok(StatusCode::OK)
}

fn describe(store: &Store, name: &str) -> crate::Result<DatasetResponse> {
    let dataset = store.require_dataset(name)?;
    Ok(DatasetResponse {
        name: dataset.name().to_string(),
        id: dataset.id(),
        last_sequence: dataset.last_sequence(),
        entity: store.get_dataset_metadata(name)?,
    })
}

/// GET /datasets
async fn list_datasets(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DatasetResponse>>> {
    let datasets = blocking(&state.store, |store| {
        store.datasets().iter().map(|dataset| describe(store, dataset.name())).collect()
    })
    .await?;
    Ok(Json(datasets))
}

/// POST /datasets
async fn create_dataset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDatasetRequest>,
) -> ApiResult<Response> {
    let name = request.name.clone();
    let created = blocking(&state.store, move |store| {
        if store.get_dataset(&request.name).is_some() {
            return Err(StoreError::BadRequest(format!("dataset '{}' already exists", request.name)));
        }
        store.assert_dataset(&request.name)?;
        if let Some(entity) = &request.entity {
            store.put_dataset_metadata(&request.name, entity)?;
        }
        describe(store, &request.name)
    })
    .await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/datasets/{}", name)) {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(created)).into_response())
}

/// GET /datasets/:name
async fn get_dataset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<DatasetResponse>> {
    Ok(Json(blocking(&state.store, move |store| describe(store, &name)).await?))
}

/// PUT /datasets/:name - create the dataset if needed and replace its metadata entity
async fn update_dataset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(entity): Json<Value>,
) -> ApiResult<Json<DatasetResponse>> {
    let updated = blocking(&state.store, move |store| {
        store.assert_dataset(&name)?;
        store.put_dataset_metadata(&name, &entity)?;
        describe(store, &name)
    })
    .await?;
    Ok(Json(updated))
}

/// DELETE /datasets/:name
async fn delete_dataset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    let message = format!("dataset '{}' deleted", name);
    blocking(&state.store, move |store| store.delete_dataset(&name)).await?;
    Ok(Json(SuccessResponse { message }))
}

/// GET /datasets/:name/entities - one entity with `?id=`, otherwise a listing
async fn get_entities(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<ListingParams>,
) -> ApiResult<Json<Value>> {
    let take = params.take.unwrap_or(state.page_size);
    blocking(&state.store, move |store| {
        store.require_dataset(&name)?;
        if let Some(id) = &params.id {
            let rid = store.resource_id(id)?;
            return Ok(Json(store.get_entity(&rid, &[name])?));
        }
        let page = store.scan_entities_from_token(&name, params.token.as_deref(), Some(take))?;
        Ok(listing(store.namespaces_context(), page.items, page.next_token))
    })
    .await
}

/// POST /datasets/:name/entities - ingest a JSON array of entities
async fn post_entities(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<IngestResponse>> {
    let response = blocking(&state.store, move |store| {
        let count = store.store_entities(&name, &body)?;
        Ok(IngestResponse { dataset: name, count })
    })
    .await?;
    info!(dataset = %response.dataset, entities = response.count, "entities ingested over http");
    Ok(Json(response))
}

/// GET /datasets/:name/entities/partitions
async fn entity_partitions(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<PartitionParams>,
) -> ApiResult<Json<Vec<String>>> {
    let tokens = blocking(&state.store, move |store| {
        let count = params.count.unwrap_or(store.config().shard_count);
        store.shard_tokens(&name, count)
    })
    .await?;
    Ok(Json(tokens))
}

/// GET /datasets/:name/changes
async fn get_changes(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<ListingParams>,
) -> ApiResult<Response> {
    let take = params.take.unwrap_or(state.page_size);
    let (context, page): (Value, ChangePage) = blocking(&state.store, move |store| {
        let page = store.scan_changes_from_token(&name, params.token.as_deref(), Some(take))?;
        Ok((store.namespaces_context(), page))
    })
    .await?;

    let full_resync = page.full_resync;
    let body = listing(context, page.items, Some(page.next_token));
    let mut headers = HeaderMap::new();
    if full_resync {
        headers.insert("x-full-resync", HeaderValue::from_static("true"));
    }
    Ok((headers, body).into_response())
}

/// GET /datasets/:name/changes/partitions
async fn change_partitions(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<PartitionParams>,
) -> ApiResult<Json<Vec<String>>> {
    let tokens = blocking(&state.store, move |store| {
        let count = params.count.unwrap_or(store.config().shard_count);
        store.change_shard_tokens(&name, count)
    })
    .await?;
    Ok(Json(tokens))
}

/// GET /entity - merged view of one entity across datasets
async fn get_entity(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EntityParams>,
) -> ApiResult<Json<Value>> {
    blocking(&state.store, move |store| {
        let rid = store.resource_id(&params.id)?;
        let entity = store.get_entity(&rid, &dataset_list(params.datasets.as_deref()))?;
        Ok(listing(store.namespaces_context(), vec![entity], None))
    })
    .await
}

/// GET /related - entities connected to `id`
async fn get_related(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RelatedParams>,
) -> ApiResult<Json<Value>> {
    let page_size = state.page_size;
    blocking(&state.store, move |store| {
        let rid = store.resource_id(&params.id)?;
        let related = store.get_related(
            &rid,
            params.property.as_deref(),
            params.inverse,
            params.skip,
            Some(params.take.unwrap_or(page_size)),
            &dataset_list(params.datasets.as_deref()),
        )?;
        Ok(listing(store.namespaces_context(), related, None))
    })
    .await
}

/// Bind `config` and serve until `shutdown` resolves.
pub async fn start_server<S>(
    config: &ServerConfig,
    store: Arc<Store>,
    shutdown: S,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = create_server_with_page_size(store, config.page_size);
    let addr = config.addr();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "webofdata HTTP API listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    info!("HTTP API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_list_parsing() {
        assert!(dataset_list(None).is_empty());
        assert_eq!(dataset_list(Some("a, b,,c")), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_listing_shape() {
        let Json(body) = listing(json!({"@id": "@context"}), vec![json!({"@id": "ns1:a"})], Some("0_5_1".into()));
        assert_eq!(
            body,
            json!([
                {"@id": "@context"},
                {"@id": "ns1:a"},
                {"@id": "@continuation", "wod:next-data": "0_5_1"}
            ])
        );
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |err: StoreError| ApiError::Store(err).into_response().status();
        assert_eq!(status(StoreError::BadRequest("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(StoreError::parse("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status(StoreError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(StoreError::Backend("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
