mod common;

use axum::http::StatusCode;
use common::*;
use gridmon_server::store::ConfigSource;
use serde_json::json;
use std::collections::BTreeSet;

#[tokio::test]
async fn health_reports_ok_before_any_collection() {
    let ctx = build_test_context().await.expect("context should build");

    let (status, body, trace_id) = request_no_body(&ctx.app, "GET", "/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["status_code"], 0);
    assert!(body["data"]["run"].is_null());

    let trace_id = trace_id.expect("x-trace-id header should be set");
    assert_eq!(trace_id.len(), 16);
    assert_eq!(body["trace_id"], trace_id);
}

#[tokio::test]
async fn config_is_missing_until_stored() {
    let ctx = build_test_context().await.expect("context should build");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/configs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn put_config_stores_and_redacts_api_key() {
    let ctx = build_test_context().await.expect("context should build");

    let body = put_valid_config(&ctx.app, 1).await;
    assert_ok_envelope(&body);
    assert_eq!(body["data"]["api_key"], "***");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/configs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], 1);
    assert_eq!(body["data"]["api_key"], "***");
    assert_eq!(body["data"]["enabled"], true);

    let stored = ctx
        .state
        .store
        .current_configuration()
        .await
        .expect("configuration should be stored");
    assert_eq!(stored.api_key, VALID_KEY);
}

#[tokio::test]
async fn redacted_key_keeps_the_stored_key() {
    let ctx = build_test_context().await.expect("context should build");
    put_valid_config(&ctx.app, 1).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/configs",
        json!({ "id": 1, "api_key": "***", "refresh_interval_secs": 600 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {body}");

    let stored = ctx
        .state
        .store
        .current_configuration()
        .await
        .expect("configuration should be stored");
    assert_eq!(stored.api_key, VALID_KEY);
    assert_eq!(stored.refresh_interval_secs, 600);
}

#[tokio::test]
async fn put_config_rejects_invalid_values() {
    let ctx = build_test_context().await.expect("context should build");

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/configs",
        json!({ "id": 1, "api_key": VALID_KEY, "refresh_interval_secs": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1101);

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/configs",
        json!({ "id": 1, "api_key": "  " }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1101);

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/v1/configs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_config_rejects_key_the_provider_refuses() {
    let ctx = build_test_context().await.expect("context should build");

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/configs",
        json!({ "id": 1, "api_key": "wrong-key" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1102);

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/v1/configs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn disabled_config_skips_key_verification() {
    let ctx = build_test_context().await.expect("context should build");

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/configs",
        json!({ "id": 3, "api_key": "not-checked", "enabled": false }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
    assert_eq!(body["data"]["enabled"], false);
    assert!(ctx.state.scheduler.run_state(3).is_none());
}

#[tokio::test]
async fn zones_are_listed_in_code_order() {
    let ctx = build_test_context().await.expect("context should build");
    put_valid_config(&ctx.app, 1).await;

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/zones").await;
    assert_eq!(status, StatusCode::OK);
    let codes: Vec<String> = body["data"]
        .as_array()
        .expect("zones should be an array")
        .iter()
        .map(|z| z["code"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(codes, vec!["CH", "DE", "FR"]);
    assert_eq!(body["data"][0]["zoneName"], "Switzerland");
}

#[tokio::test]
async fn zones_require_a_stored_config() {
    let ctx = build_test_context().await.expect("context should build");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/zones").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn asset_location_binds_closest_zone() {
    let ctx = build_test_context().await.expect("context should build");
    put_valid_config(&ctx.app, 1).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/assets/7/location",
        json!({ "project_id": "p1", "name": "Switzerlnd" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
    assert_eq!(body["data"]["zone"]["code"], "CH");
    assert_eq!(body["data"]["label"], "CH - Switzerland");
    assert_eq!(body["data"]["created"], true);
    assert_eq!(body["data"]["asset"]["asset_id"], 7);
    assert_eq!(body["data"]["asset"]["location_id"], "CH");

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/assets/7/location",
        json!({ "project_id": "p1", "name": "de" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created"], false);
    assert_eq!(body["data"]["asset"]["location_id"], "DE");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/assets/7/data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["property"]["attributes"]["name"],
        "DE - Germany"
    );
}

#[tokio::test]
async fn unknown_location_lists_available_zones() {
    let ctx = build_test_context().await.expect("context should build");
    put_valid_config(&ctx.app, 1).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/assets/8/location",
        json!({ "name": "Xyzzyxyzzy" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1103);
    let msg = body["err_msg"].as_str().unwrap_or_default();
    assert!(msg.starts_with("Location not found. Available: "), "{msg}");
    assert!(msg.contains("Switzerland(CH)"));

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/assets/8/data").await;
    assert_eq!(status, StatusCode::OK);
    let hint = body["data"]["property"]["attributes"]["name"]
        .as_str()
        .unwrap_or_default();
    assert!(hint.starts_with("Location not found. Available: "));
}

#[tokio::test]
async fn empty_location_name_is_rejected() {
    let ctx = build_test_context().await.expect("context should build");
    put_valid_config(&ctx.app, 1).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/assets/9/location",
        json!({ "name": "   " }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);
}

#[tokio::test]
async fn asset_data_is_missing_for_untouched_assets() {
    let ctx = build_test_context().await.expect("context should build");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/assets/42/data").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn openapi_documents_every_route() {
    let ctx = build_test_context().await.expect("context should build");

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/v1/openapi.json").await;
    assert_eq!(status, StatusCode::OK);

    let paths = body["paths"]
        .as_object()
        .expect("openapi paths should be an object");
    let mut exposed = BTreeSet::new();
    for (path, item) in paths {
        let Some(methods) = item.as_object() else {
            continue;
        };
        for method in ["get", "post", "put", "delete", "patch"] {
            if methods.contains_key(method) {
                exposed.insert(format!("{} {}", method.to_uppercase(), path));
            }
        }
    }

    let expected: BTreeSet<String> = [
        "GET /v1/health",
        "GET /v1/configs",
        "PUT /v1/configs",
        "GET /v1/zones",
        "PUT /v1/assets/{asset_id}/location",
        "GET /v1/assets/{asset_id}/data",
    ]
    .into_iter()
    .map(|s| s.to_string())
    .collect();

    assert_eq!(exposed, expected);
}
