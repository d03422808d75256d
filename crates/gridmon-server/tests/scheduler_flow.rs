mod common;

use common::*;
use gridmon_common::types::{AppStatus, Configuration};
use gridmon_server::scheduler::RunPhase;
use gridmon_server::store::{AssetStore, ConfigSource, DataSink};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn input_written(ctx: &TestContext, asset_id: i32) -> bool {
    for _ in 0..200 {
        if let Ok(data) = ctx.state.store.asset_data(asset_id).await {
            if data.input.is_some() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn stored_config_collects_zone_data_for_assets() {
    let ctx = build_test_context().await.expect("context should build");
    ctx.state
        .store
        .insert_asset("p1", 7, "CH")
        .await
        .expect("asset should insert");

    put_valid_config(&ctx.app, 1).await;
    assert!(input_written(&ctx, 7).await, "zone data should be written");

    let data = ctx
        .state
        .store
        .asset_data(7)
        .await
        .expect("asset data should exist");
    let input = data.input.expect("input record should exist");
    assert_eq!(input.attributes["name"], "CH");
    assert_eq!(input.attributes["carbon_intensity"], 120.0);
    assert_eq!(input.attributes["renewable_percentage"], 62.0);
    assert_eq!(input.attributes["fossil_free_percentage"], 95.0);

    assert!(
        wait_until(|| {
            ctx.state
                .scheduler
                .run_state(1)
                .is_some_and(|run| run.phase == RunPhase::Waiting)
        })
        .await
    );

    ctx.state.scheduler.shutdown().await;
}

#[tokio::test]
async fn trigger_marks_health_error_when_provider_fails() {
    let ctx = build_test_context().await.expect("context should build");
    ctx.state
        .store
        .insert_asset("p1", 7, "CH")
        .await
        .expect("asset should insert");
    ctx.state
        .store
        .put_configuration(Configuration::new(1, VALID_KEY))
        .await
        .expect("configuration should store");
    ctx.fake.set_failing(true);

    let shutdown = CancellationToken::new();
    let trigger = tokio::spawn(ctx.state.trigger().run(shutdown.clone()));

    let health = ctx.state.health.clone();
    assert!(wait_until(|| health.snapshot().status == AppStatus::Error).await);
    let snapshot = health.snapshot();
    assert!(snapshot.last_success_at.is_none());
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("503")));

    shutdown.cancel();
    trigger.await.expect("trigger should stop");
    ctx.state.scheduler.shutdown().await;
}

#[tokio::test]
async fn trigger_records_success_in_health() {
    let ctx = build_test_context().await.expect("context should build");
    ctx.state
        .store
        .insert_asset("p1", 7, "DE")
        .await
        .expect("asset should insert");
    ctx.state
        .store
        .put_configuration(Configuration::new(1, VALID_KEY))
        .await
        .expect("configuration should store");

    let shutdown = CancellationToken::new();
    let trigger = tokio::spawn(ctx.state.trigger().run(shutdown.clone()));

    let health = ctx.state.health.clone();
    assert!(wait_until(|| health.snapshot().last_success_at.is_some()).await);
    assert_eq!(health.snapshot().status, AppStatus::Ok);
    assert!(input_written(&ctx, 7).await);

    shutdown.cancel();
    trigger.await.expect("trigger should stop");
    ctx.state.scheduler.shutdown().await;
}

#[tokio::test]
async fn config_change_restarts_the_run() {
    let ctx = build_test_context().await.expect("context should build");
    ctx.state
        .store
        .insert_asset("p1", 7, "FR")
        .await
        .expect("asset should insert");

    put_valid_config(&ctx.app, 1).await;
    let scheduler = ctx.state.scheduler.clone();
    assert!(
        wait_until(|| scheduler
            .run_state(1)
            .is_some_and(|run| run.phase == RunPhase::Waiting))
        .await
    );
    let first = scheduler.run_state(1).expect("run should be live");
    let requests = ctx.fake.data_requests();

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/configs",
        serde_json::json!({ "id": 1, "api_key": VALID_KEY, "refresh_interval_secs": 1800 }),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::OK, "unexpected body: {body}");

    assert!(
        wait_until(|| scheduler
            .run_state(1)
            .is_some_and(|run| run.generation > first.generation
                && run.phase == RunPhase::Waiting))
        .await
    );
    assert!(ctx.fake.data_requests() > requests);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn replacing_config_id_stops_the_old_run() {
    let ctx = build_test_context().await.expect("context should build");

    put_valid_config(&ctx.app, 1).await;
    let scheduler = ctx.state.scheduler.clone();
    assert!(wait_until(|| scheduler.run_state(1).is_some()).await);

    put_valid_config(&ctx.app, 2).await;
    assert!(scheduler.run_state(1).is_none());
    assert!(scheduler.run_state(2).is_some());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn new_asset_location_restarts_live_runs() {
    let ctx = build_test_context().await.expect("context should build");

    put_valid_config(&ctx.app, 1).await;
    let scheduler = ctx.state.scheduler.clone();
    assert!(
        wait_until(|| scheduler
            .run_state(1)
            .is_some_and(|run| run.phase == RunPhase::Waiting))
        .await
    );
    let first = scheduler.run_state(1).expect("run should be live");

    let (status, _, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/assets/11/location",
        serde_json::json!({ "project_id": "p1", "name": "France" }),
    )
    .await;
    assert_eq!(status, axum::http::StatusCode::OK);

    assert!(input_written(&ctx, 11).await);
    assert!(scheduler
        .run_state(1)
        .is_some_and(|run| run.generation > first.generation));

    scheduler.shutdown().await;
}
