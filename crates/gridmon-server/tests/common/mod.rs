#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use gridmon_provider::{build_provider, ProviderSettings, ZoneProvider};
use gridmon_server::app;
use gridmon_server::config::ServerConfig;
use gridmon_server::state::AppState;
use gridmon_server::store::{JsonFileStore, STORE_FILE_NAME};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const VALID_KEY: &str = "test-key";

/// Handle on the fake provider: counts data requests and can be told to fail them.
#[derive(Clone, Default)]
pub struct FakeProvider {
    pub data_requests: Arc<AtomicUsize>,
    pub fail_data: Arc<AtomicBool>,
}

impl FakeProvider {
    pub fn data_requests(&self) -> usize {
        self.data_requests.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_data.store(failing, Ordering::SeqCst);
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
    pub provider_url: String,
    pub fake: FakeProvider,
}

#[derive(Deserialize)]
struct ZoneQuery {
    zone: String,
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Invalid auth-token" })),
    )
        .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("auth-token")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|key| key == VALID_KEY)
}

fn known_zone(zone: &str) -> bool {
    matches!(zone, "CH" | "DE" | "FR")
}

async fn zones(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "CH": { "zoneName": "Switzerland", "access": ["carbon-intensity/latest"] },
        "DE": { "zoneName": "Germany", "access": ["carbon-intensity/latest"] },
        "FR": { "zoneName": "France", "access": ["carbon-intensity/latest"] }
    }))
    .into_response()
}

async fn carbon_intensity(
    State(fake): State<FakeProvider>,
    headers: HeaderMap,
    Query(query): Query<ZoneQuery>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    fake.data_requests.fetch_add(1, Ordering::SeqCst);
    if fake.fail_data.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response();
    }
    if !known_zone(&query.zone) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Zone '{}' does not exist", query.zone) })),
        )
            .into_response();
    }
    Json(json!({
        "zone": query.zone,
        "carbonIntensity": 120.0,
        "datetime": "2024-05-01T10:00:00.000Z",
        "updatedAt": "2024-05-01T10:05:00.000Z",
        "emissionFactorType": "lifecycle",
        "isEstimated": false
    }))
    .into_response()
}

async fn power_breakdown(headers: HeaderMap, Query(query): Query<ZoneQuery>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "zone": query.zone,
        "datetime": "2024-05-01T10:00:00.000Z",
        "powerConsumptionBreakdown": { "hydro": 5000.0, "nuclear": 3000.0 },
        "powerProductionBreakdown": { "hydro": 5200.0, "nuclear": 3100.0 },
        "fossilFreePercentage": 95.0,
        "renewablePercentage": 62.0,
        "powerConsumptionTotal": 8000.0,
        "powerProductionTotal": 8300.0,
        "powerImportTotal": 100.0,
        "powerExportTotal": 400.0
    }))
    .into_response()
}

/// Serve a minimal provider API on an ephemeral port and return its base URL.
pub async fn spawn_fake_provider(fake: FakeProvider) -> Result<String> {
    let router = axum::Router::new()
        .route("/v3/zones", get(zones))
        .route("/v3/carbon-intensity/latest", get(carbon_intensity))
        .route("/v3/power-breakdown/latest", get(power_breakdown))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}/v3"))
}

pub async fn build_test_context() -> Result<TestContext> {
    build_test_context_with(|_| {}).await
}

/// Like [`build_test_context`], letting the caller adjust the server config first.
pub async fn build_test_context_with(
    configure: impl FnOnce(&mut ServerConfig),
) -> Result<TestContext> {
    let fake = FakeProvider::default();
    let provider_url = spawn_fake_provider(fake.clone()).await?;
    let temp_dir = tempfile::tempdir()?;

    let mut config = ServerConfig {
        data_dir: temp_dir.path().to_string_lossy().to_string(),
        provider: ProviderSettings {
            base_url: provider_url.clone(),
            timeout_secs: 5,
            ..ProviderSettings::default()
        },
        ..ServerConfig::default()
    };
    configure(&mut config);

    let store = Arc::new(JsonFileStore::open(temp_dir.path().join(STORE_FILE_NAME)).await?);
    let provider: Arc<dyn ZoneProvider> = Arc::from(build_provider(&config.provider)?);
    let state = AppState::with_parts(config, store, provider);
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
        provider_url,
        fake,
    })
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

/// Store an enabled configuration with the valid key through the API.
pub async fn put_valid_config(app: &axum::Router, id: i64) -> Value {
    let (status, body, _) = request_json(
        app,
        "PUT",
        "/v1/configs",
        json!({ "id": id, "api_key": VALID_KEY, "refresh_interval_secs": 3600 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
    body
}

pub fn assert_ok_envelope(json: &Value) {
    assert_eq!(json["err_code"], 0);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
}

pub fn assert_err_envelope(json: &Value, err_code: i32) {
    assert_eq!(json["err_code"], err_code);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
    assert!(json.get("data").is_some());
    assert!(json["data"].is_null());
}

pub fn decode_data<T: DeserializeOwned>(json: &Value) -> T {
    serde_json::from_value(json["data"].clone()).expect("data should decode")
}

/// Poll `done` on the real clock until it holds or a few seconds pass.
pub async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    done()
}
