//! Router tests: auth gate, query validation, data and analytics responses.
//!
//! Requests go through `tower::ServiceExt::oneshot` against the real router;
//! the clean tier is a temp directory of parquet files.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use datalayer_core::data::{CacheManager, RemoteFetcher, TransportError};
use datalayer_core::{Settings, TokenProvider};
use datalayer_server::{router, AppState};
use http_body_util::BodyExt;
use polars::prelude::*;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

const TOKEN: &str = "secret";

// ── Fixtures ─────────────────────────────────────────────────────────

struct Offline;

impl RemoteFetcher for Offline {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Unreachable(url.to_string()))
    }
}

fn write_parquet(path: &Path, mut df: DataFrame) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    ParquetWriter::new(File::create(path).unwrap())
        .finish(&mut df)
        .unwrap();
}

fn seed_clean_tier(root: &Path) {
    // 2024-01-01 and 2024-01-02 as days since the epoch
    write_parquet(
        &root.join("clean/prices/data.parquet"),
        DataFrame::new(vec![
            Column::new("provider".into(), ["ONE", "ONE", "TWO"]),
            Column::new("country".into(), ["KEN", "KEN", "KEN"]),
            Column::new("date".into(), [19723_i32, 19724, 19724])
                .cast(&DataType::Date)
                .unwrap(),
            Column::new("price".into(), [5.0_f64, 6.0, 7.0]),
        ])
        .unwrap(),
    );
    write_parquet(
        &root.join("clean/realestate/homes.parquet"),
        DataFrame::new(vec![
            Column::new("provider".into(), ["HOME"]),
            Column::new("country".into(), ["KEN"]),
            Column::new("bedrooms".into(), [3_i64]),
        ])
        .unwrap(),
    );
    write_parquet(
        &root.join("clean/providers/providers.parquet"),
        DataFrame::new(vec![Column::new("provider".into(), ["ONE", "HOME"])]).unwrap(),
    );
}

fn app_with(dir: &Path, extra_env: &[(&str, &str)]) -> Router {
    let mut env = vec![
        ("DATA_BASE_PATH".to_string(), dir.display().to_string()),
        ("CACHE_DIR".to_string(), dir.join("cache").display().to_string()),
        ("ENVIRONMENT".to_string(), "test".to_string()),
        ("BLOB_CONTAINER".to_string(), "datalake".to_string()),
    ];
    env.extend(extra_env.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    let settings = Settings::from_sources(None, env).unwrap();

    let cache = CacheManager::new(&settings.cache_dir, settings.cache_ttl).unwrap();
    let tokens = Arc::new(TokenProvider::from_settings(&settings));
    router(AppState::new(
        Arc::new(settings),
        cache,
        Arc::new(Offline),
        tokens,
    ))
}

fn app(dir: &Path) -> Router {
    seed_clean_tier(dir);
    app_with(dir, &[("API_AUTH_TOKEN", TOKEN)])
}

async fn get(app: Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder().uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

// ── Health ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoints_need_no_token() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = get(app.clone(), "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "live"}));

    let (status, body) = get(app, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["blob_container"], "datalake");
}

// ── Auth ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn bearer_token_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = get(app.clone(), "/api/data/prices", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Missing bearer token");

    let (status, body) = get(app.clone(), "/api/data/prices", Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid bearer token");

    let (status, _) = get(app, "/api/data/prices", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unauthorized_response_has_challenge_header() {
    let dir = tempfile::tempdir().unwrap();
    let resp = app(dir.path())
        .oneshot(
            Request::builder()
                .uri("/api/data/providers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");
}

#[tokio::test]
async fn unavailable_token_is_503() {
    let dir = tempfile::tempdir().unwrap();
    seed_clean_tier(dir.path());
    let secrets = dir.path().join("secrets");
    fs::create_dir_all(&secrets).unwrap();
    let app = app_with(dir.path(), &[("SECRET_DIR", secrets.to_str().unwrap())]);

    let (status, body) = get(app, "/api/data/providers", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["detail"], "Auth token unavailable");
}

#[tokio::test]
async fn token_is_read_from_secret_dir() {
    let dir = tempfile::tempdir().unwrap();
    seed_clean_tier(dir.path());
    let secrets = dir.path().join("secrets");
    fs::create_dir_all(&secrets).unwrap();
    fs::write(secrets.join("API_AUTH_TOKEN"), "mounted\n").unwrap();
    let app = app_with(dir.path(), &[("SECRET_DIR", secrets.to_str().unwrap())]);

    let (status, _) = get(app, "/api/data/providers", Some("mounted")).await;
    assert_eq!(status, StatusCode::OK);
}

// ── Data ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn prices_are_filtered() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(
        app(dir.path()),
        "/api/data/prices?provider=one&start_date=2024-01-02",
        Some(TOKEN),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["price"], 6.0);
    assert_eq!(rows[0]["date"], "2024-01-02");
}

#[tokio::test]
async fn realestate_rows_are_returned() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(
        app(dir.path()),
        "/api/data/realestate?min_bedrooms=2&max_bedrooms=4",
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["provider"], "HOME");
}

#[tokio::test]
async fn providers_are_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(dir.path()), "/api/data/providers", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["HOME", "ONE"]));
}

#[tokio::test]
async fn invalid_query_is_422_with_field_detail() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = get(app.clone(), "/api/data/prices?limit=0", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"][0]["field"], "limit");

    let (status, body) = get(
        app.clone(),
        "/api/data/prices?start_date=2024-02-01&end_date=2024-01-01",
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"][0]["field"], "end_date");

    let (status, body) = get(app, "/api/data/prices?limit=many", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"][0]["field"], "query");
}

#[tokio::test]
async fn missing_dataset_is_400() {
    let dir = tempfile::tempdir().unwrap();
    seed_clean_tier(dir.path());
    fs::remove_dir_all(dir.path().join("clean/realestate")).unwrap();
    let app = app_with(dir.path(), &[("API_AUTH_TOKEN", TOKEN)]);

    let (status, body) = get(app, "/api/data/realestate", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("not found"));
}

// ── Analytics ────────────────────────────────────────────────────────

#[tokio::test]
async fn provider_summary_groups_prices() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(
        app(dir.path()),
        "/api/analytics/provider-summary",
        Some(TOKEN),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"provider": "ONE", "avg": 5.5, "total": 11.0, "count": 2},
            {"provider": "TWO", "avg": 7.0, "total": 7.0, "count": 1},
        ])
    );
}

#[tokio::test]
async fn summary_over_missing_metric_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(
        app(dir.path()),
        "/api/analytics/provider-summary?metric=rent",
        Some(TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("rent"));
}

#[tokio::test]
async fn custom_prefix_moves_protected_routes() {
    let dir = tempfile::tempdir().unwrap();
    seed_clean_tier(dir.path());
    let app = app_with(
        dir.path(),
        &[("API_AUTH_TOKEN", TOKEN), ("API_PREFIX", "/v1")],
    );

    let (status, _) = get(app.clone(), "/v1/data/providers", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(app, "/api/data/providers", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
