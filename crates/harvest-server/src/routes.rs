use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use futures::{Stream, StreamExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use harvest_core::error::AppError;
use harvest_core::event::ResultQueueEvent;

use crate::auth::require_api_key;
use crate::dto::{
    CollectionStatusResponse, DeepResultResponse, DeepTaskResponse, ErrorResponse,
    HealthResponse, ListRecordsQuery, RecordListResponse, SaveRecordsRequest,
    SaveRecordsResponse, SavedRecordResponse, SourceListResponse, SourceResponse,
    StartCollectionRequest, StartCollectionResponse, StartDeepCollectionRequest,
    StartDeepCollectionResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::{AppState, DeepService};

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/sources", get(list_sources))
        .route("/v1/collections", post(start_collection))
        .route("/v1/collections/save", post(save_records))
        .route("/v1/collections/{id}", get(collection_status))
        .route("/v1/collections/{id}", delete(stop_collection))
        .route("/v1/collections/{id}/stream", get(stream_collection))
        .route("/v1/records", get(list_records))
        .route("/v1/records/{id}", delete(delete_record))
        .route("/v1/records/{id}/deep", get(get_deep_result))
        .route("/v1/deep-collections", post(start_deep_collection))
        .route("/v1/deep-collections/{task_id}", get(deep_collection_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn error_body(status: StatusCode, error: &str, message: String) -> axum::response::Response {
    let body = ErrorResponse {
        error: error.to_string(),
        message,
    };
    (status, axum::Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/sources",
    responses(
        (status = 200, description = "Active sources", body = SourceListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn list_sources(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sources = state.collections.list_active_sources().await?;
    let total = sources.len();

    Ok(axum::Json(SourceListResponse {
        sources: sources.into_iter().map(SourceResponse::from).collect(),
        total,
    }))
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/collections",
    request_body = StartCollectionRequest,
    responses(
        (status = 202, description = "Collection job started", body = StartCollectionResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "collections"
)]
pub async fn start_collection(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<StartCollectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = state.collections.start_job(body.into())?;
    let status = state
        .collections
        .job_status(&job_id)
        .map(|s| s.status.to_string())
        .unwrap_or_else(|| "pending".to_string());

    Ok((
        StatusCode::ACCEPTED,
        axum::Json(StartCollectionResponse { job_id, status }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/collections/{id}",
    params(("id" = String, Path, description = "Collection job ID")),
    responses(
        (status = 200, description = "Job status", body = CollectionStatusResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "collections"
)]
pub async fn collection_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.collections.job_status(&id) {
        Some(snapshot) => axum::Json(CollectionStatusResponse::from(snapshot)).into_response(),
        None => error_body(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Collection job not found: {id}"),
        ),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/collections/{id}",
    params(("id" = String, Path, description = "Collection job ID")),
    responses(
        (status = 204, description = "Stop requested"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Job already finished", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "collections"
)]
pub async fn stop_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.collections.stop_job(&id) {
        return StatusCode::NO_CONTENT.into_response();
    }
    match state.collections.job_status(&id) {
        Some(snapshot) => error_body(
            StatusCode::CONFLICT,
            "conflict",
            format!("Collection job {id} already finished: {}", snapshot.status),
        ),
        None => error_body(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Collection job not found: {id}"),
        ),
    }
}

fn event_name(event: &ResultQueueEvent) -> &'static str {
    match event {
        ResultQueueEvent::Record(_) => "record",
        ResultQueueEvent::Error { .. } => "error",
        ResultQueueEvent::Completed { .. } => "completed",
    }
}

fn to_sse(event: ResultQueueEvent) -> Event {
    Event::default()
        .event(event_name(&event))
        .json_data(&event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

#[utoipa::path(
    get,
    path = "/v1/collections/{id}/stream",
    params(("id" = String, Path, description = "Collection job ID")),
    responses(
        (status = 200, description = "Server-sent `record`, `error` and `completed` events; closes after the terminal event", content_type = "text/event-stream"),
        (status = 404, description = "Unknown job or stream already attached", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "collections"
)]
pub async fn stream_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let stream = state.collections.stream_results(&id)?;
    let events = stream.into_stream().map(|event| Ok(to_sse(event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[utoipa::path(
    post,
    path = "/v1/collections/save",
    request_body = SaveRecordsRequest,
    responses(
        (status = 200, description = "Records saved", body = SaveRecordsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "collections"
)]
pub async fn save_records(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<SaveRecordsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let saved = state.collections.save_records(&body.records).await?;
    Ok(axum::Json(SaveRecordsResponse { saved }))
}

// ---------------------------------------------------------------------------
// Saved records
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/records",
    params(ListRecordsQuery),
    responses(
        (status = 200, description = "Saved records, newest first", body = RecordListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "records"
)]
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRecordsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.db.records().list(&query.into()).await?;
    let total = records.len();

    Ok(axum::Json(RecordListResponse {
        records: records.into_iter().map(SavedRecordResponse::from).collect(),
        total,
    }))
}

#[utoipa::path(
    delete,
    path = "/v1/records/{id}",
    params(("id" = i64, Path, description = "Saved record ID")),
    responses(
        (status = 204, description = "Record deleted"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "records"
)]
pub async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if state.db.records().delete(id).await? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(error_body(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Saved record not found: {id}"),
        ))
    }
}

#[utoipa::path(
    get,
    path = "/v1/records/{id}/deep",
    params(("id" = i64, Path, description = "Saved record ID")),
    responses(
        (status = 200, description = "Deep-collection result", body = DeepResultResponse),
        (status = 404, description = "No deep result for this record", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "deep"
)]
pub async fn get_deep_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .db
        .deep()
        .get_for_record(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No deep-collection result for record {id}")))?;

    Ok(axum::Json(DeepResultResponse::from(row)))
}

// ---------------------------------------------------------------------------
// Deep collection
// ---------------------------------------------------------------------------

fn deep_service(state: &AppState) -> Result<&DeepService, AppError> {
    state.deep.as_ref().ok_or_else(|| {
        AppError::ConfigError("Deep collection requires HARVEST_API_KEY to be set".into())
    })
}

#[utoipa::path(
    post,
    path = "/v1/deep-collections",
    request_body = StartDeepCollectionRequest,
    responses(
        (status = 202, description = "Deep collection started", body = StartDeepCollectionResponse),
        (status = 400, description = "No record ids", body = ErrorResponse),
        (status = 503, description = "No LLM configured", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "deep"
)]
pub async fn start_deep_collection(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<StartDeepCollectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task_id = deep_service(&state)?.start(body.record_ids)?;
    Ok((
        StatusCode::ACCEPTED,
        axum::Json(StartDeepCollectionResponse { task_id }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/deep-collections/{task_id}",
    params(("task_id" = String, Path, description = "Deep-collection task ID")),
    responses(
        (status = 200, description = "Task progress", body = DeepTaskResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 503, description = "No LLM configured", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "deep"
)]
pub async fn deep_collection_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = deep_service(&state)?
        .task_status(&task_id)
        .ok_or_else(|| AppError::NotFound(format!("Deep-collection task not found: {task_id}")))?;

    Ok(axum::Json(DeepTaskResponse::from(status)))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = state.db.health_check().await.is_ok();

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        database: if healthy { "ok" } else { "error" },
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, axum::Json(response))
}
