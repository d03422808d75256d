use crate::error::LocationError;
use crate::location::LocationAssignment;
use crate::logging::TraceId;
use crate::scheduler::RunSnapshot;
use crate::state::AppState;
use crate::store::{AssetData, ConfigSource, DataSink, StoreError};
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use gridmon_common::types::{AppStatus, Configuration};
use gridmon_provider::{verify_api_key, ProviderError, Zone, ZoneCatalog};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Placeholder returned instead of the stored API key. Sending it back keeps the stored key.
pub const REDACTED_API_KEY: &str = "***";

/// API error body
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

/// Response envelope shared by every endpoint
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "invalid_config" => 1101,
        "invalid_api_key" => 1102,
        "location_not_found" => 1103,
        "internal_error" => 1500,
        "storage_error" => 1501,
        "provider_error" => 1502,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn store_error_response(trace_id: &str, err: &StoreError) -> Response {
    if err.is_not_found() {
        error_response(StatusCode::NOT_FOUND, trace_id, "not_found", &err.to_string())
    } else {
        tracing::error!(trace_id = %trace_id, error = %err, "Store operation failed");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            trace_id,
            "storage_error",
            &err.to_string(),
        )
    }
}

fn provider_error_response(trace_id: &str, err: &ProviderError) -> Response {
    match err.status() {
        Some(401 | 403) => error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "invalid_api_key",
            &err.to_string(),
        ),
        _ => error_response(
            StatusCode::BAD_GATEWAY,
            trace_id,
            "provider_error",
            &err.to_string(),
        ),
    }
}

fn redacted(mut config: Configuration) -> Configuration {
    if !config.api_key.is_empty() {
        config.api_key = REDACTED_API_KEY.to_string();
    }
    config
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    status: AppStatus,
    /// 0 = ok, 1 = error, 2 = fatal
    status_code: u8,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Run of the stored configuration, if one is live
    run: Option<RunSnapshot>,
}

/// Service health and collection status.
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let snapshot = state.health.snapshot();
    let run = match state.store.current_configuration().await {
        Ok(config) => state.scheduler.run_state(config.id),
        Err(_) => None,
    };

    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            status: snapshot.status,
            status_code: snapshot.status.code(),
            last_success_at: snapshot.last_success_at,
            last_error: snapshot.last_error,
            run,
        },
    )
}

/// Stored configuration with the API key redacted.
#[utoipa::path(
    get,
    path = "/v1/configs",
    tag = "Configuration",
    responses(
        (status = 200, description = "Current configuration", body = Configuration),
        (status = 404, description = "No configuration stored", body = ApiError)
    )
)]
async fn get_config(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.store.current_configuration().await {
        Ok(config) => success_response(StatusCode::OK, &trace_id, redacted(config)),
        Err(e) => store_error_response(&trace_id, &e),
    }
}

/// Replace the configuration.
///
/// Enabled configurations must carry an API key the provider accepts. The scheduler
/// sees the new snapshot immediately and restarts a live run.
#[utoipa::path(
    put,
    path = "/v1/configs",
    tag = "Configuration",
    request_body = Configuration,
    responses(
        (status = 200, description = "Configuration stored", body = Configuration),
        (status = 400, description = "Invalid configuration or API key", body = ApiError),
        (status = 502, description = "Provider unreachable", body = ApiError)
    )
)]
async fn put_config(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(mut config): Json<Configuration>,
) -> impl IntoResponse {
    let previous = match state.store.current_configuration().await {
        Ok(previous) => Some(previous),
        Err(e) if e.is_not_found() => None,
        Err(e) => return store_error_response(&trace_id, &e),
    };

    if config.api_key == REDACTED_API_KEY {
        match &previous {
            Some(previous) => config.api_key = previous.api_key.clone(),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &trace_id,
                    "invalid_config",
                    "api_key is required",
                )
            }
        }
    }

    if let Err(e) = config.validate() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "invalid_config",
            &e.to_string(),
        );
    }

    if config.enabled {
        if let Err(e) = verify_api_key(state.provider.as_ref(), &config.api_key).await {
            tracing::warn!(trace_id = %trace_id, config_id = config.id, error = %e, "API key rejected");
            return provider_error_response(&trace_id, &e);
        }
    }

    // The trigger must not tick an older stored snapshot between our write and tick.
    let _apply = state.scheduler.apply_guard().await;
    let previous = match state.store.current_configuration().await {
        Ok(previous) => Some(previous),
        Err(e) if e.is_not_found() => None,
        Err(e) => return store_error_response(&trace_id, &e),
    };
    if let Err(e) = state.store.put_configuration(config.clone()).await {
        return store_error_response(&trace_id, &e);
    }

    if state.config.collection.enabled {
        if let Some(mut retired) = previous.filter(|p| p.id != config.id) {
            retired.enabled = false;
            if let Err(e) = state.scheduler.tick(&retired, state.collection.clone()) {
                tracing::warn!(config_id = retired.id, error = %e, "Failed to stop replaced configuration");
            }
        }
        if let Err(e) = state.scheduler.tick(&config, state.collection.clone()) {
            tracing::warn!(config_id = config.id, error = %e, "Failed to apply configuration");
        }
    }

    success_response(StatusCode::OK, &trace_id, redacted(config))
}

/// Zones available to the configured API key.
#[utoipa::path(
    get,
    path = "/v1/zones",
    tag = "Zones",
    responses(
        (status = 200, description = "Available zones ordered by code", body = Vec<Zone>),
        (status = 404, description = "No configuration stored", body = ApiError),
        (status = 502, description = "Provider unreachable", body = ApiError)
    )
)]
async fn list_zones(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let config = match state.store.current_configuration().await {
        Ok(config) => config,
        Err(e) => return store_error_response(&trace_id, &e),
    };

    match ZoneCatalog::refresh(state.provider.as_ref(), &config.api_key).await {
        Ok(catalog) => {
            let zones: Vec<Zone> = catalog.iter().cloned().collect();
            success_response(StatusCode::OK, &trace_id, zones)
        }
        Err(e) => provider_error_response(&trace_id, &e),
    }
}

#[derive(Deserialize, ToSchema)]
struct LocationRequest {
    /// Host project the asset belongs to
    #[serde(default)]
    project_id: String,
    /// Free-text location, e.g. "Zurich" or "DE"
    name: String,
}

/// Bind an asset to the zone best matching a free-text location.
#[utoipa::path(
    put,
    path = "/v1/assets/{asset_id}/location",
    tag = "Assets",
    params(("asset_id" = i32, Path, description = "Host platform asset id")),
    request_body = LocationRequest,
    responses(
        (status = 200, description = "Location assigned", body = LocationAssignment),
        (status = 400, description = "Empty location name", body = ApiError),
        (status = 404, description = "No matching zone or no configuration", body = ApiError),
        (status = 502, description = "Provider unreachable", body = ApiError)
    )
)]
async fn put_asset_location(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(asset_id): Path<i32>,
    Json(req): Json<LocationRequest>,
) -> impl IntoResponse {
    match state
        .locations
        .apply(asset_id, &req.project_id, &req.name)
        .await
    {
        Ok(assignment) => success_response(StatusCode::OK, &trace_id, assignment),
        Err(LocationError::EmptyName) => error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            &LocationError::EmptyName.to_string(),
        ),
        Err(e @ LocationError::NotFound { .. }) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "location_not_found",
            &e.to_string(),
        ),
        Err(LocationError::Provider(e)) => provider_error_response(&trace_id, &e),
        Err(LocationError::Store(e)) => store_error_response(&trace_id, &e),
    }
}

/// Latest data written to an asset.
#[utoipa::path(
    get,
    path = "/v1/assets/{asset_id}/data",
    tag = "Assets",
    params(("asset_id" = i32, Path, description = "Host platform asset id")),
    responses(
        (status = 200, description = "Latest input and property records", body = AssetData),
        (status = 404, description = "Nothing written yet", body = ApiError)
    )
)]
async fn get_asset_data(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(asset_id): Path<i32>,
) -> impl IntoResponse {
    match state.store.asset_data(asset_id).await {
        Ok(data) => success_response(StatusCode::OK, &trace_id, data),
        Err(e) => store_error_response(&trace_id, &e),
    }
}

pub fn api_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_config, put_config))
        .routes(routes!(list_zones))
        .routes(routes!(put_asset_location))
        .routes(routes!(get_asset_data))
}
