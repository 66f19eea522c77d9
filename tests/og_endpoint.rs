mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use tower::ServiceExt;

use common::{build_app, read_json, temp_storage, test_config};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .expect("build request")
}

#[tokio::test]
async fn renders_png_with_cdn_cache_headers() {
    let app = build_app(test_config(), None);
    let resp = app
        .oneshot(get("/api/og?title=Launch%20Day&theme=ocean&pattern=dots"))
        .await
        .expect("request /api/og");

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(
        resp.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=86400, s-maxage=86400, stale-while-revalidate=604800"
    );
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    assert_eq!(&body[..8], &PNG_SIGNATURE);
}

#[tokio::test]
async fn identical_requests_are_served_from_cache() {
    let cfg = test_config();
    let state = ogpix_backend::AppState::with_storage(cfg, None).expect("build state");
    let cache = state.render_cache.clone().expect("cache enabled by default");
    let app = ogpix_backend::app::build_router(state);

    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(get("/api/og?title=Cached"))
            .await
            .expect("request /api/og");
        assert_eq!(resp.status(), StatusCode::OK);
    }
    cache.run_pending_tasks().await;
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn repeated_query_parameters_render_with_first_value() {
    let app = build_app(test_config(), None);
    let resp = app
        .oneshot(get("/api/og?title=a&title=b&theme=ocean&theme=not-a-theme"))
        .await
        .expect("request /api/og");

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    assert_eq!(&body[..8], &PNG_SIGNATURE);
}

#[tokio::test]
async fn storage_failure_is_generic_internal_error() {
    let storage = temp_storage("og-closed-pool").await;
    let app = build_app(test_config(), Some(storage.clone()));
    storage.pool.close().await;

    let resp = app
        .oneshot(get("/api/og?title=Hi&key=ogpix_anything"))
        .await
        .expect("request /api/og");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let text = String::from_utf8_lossy(&body);
    assert!(!text.contains("api_keys"), "leaked storage detail: {text}");
    assert!(!text.contains("SELECT"), "leaked storage detail: {text}");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("parse json");
    assert_eq!(json["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn logo_outside_allow_list_is_rejected() {
    let app = build_app(test_config(), None);
    let resp = app
        .oneshot(get("/api/og?logo=https%3A%2F%2Fevil.example.com%2Flogo.png"))
        .await
        .expect("request /api/og");

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    let json = read_json(resp).await;
    assert_eq!(json["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn anonymous_clients_are_rate_limited_per_ip() {
    let mut cfg = test_config();
    cfg.rate_limit.max_requests = 2;
    let app = build_app(cfg, None);

    // 非法 logo 在准入之后校验，仍然消耗额度
    let uri = "/api/og?logo=http%3A%2F%2Flocalhost%2Fa.png";
    for _ in 0..2 {
        let resp = app.clone().oneshot(get(uri)).await.expect("request");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    let resp = app.clone().oneshot(get(uri)).await.expect("request");
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().get(header::RETRY_AFTER).is_some());
    assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    let json = read_json(resp).await;
    assert_eq!(json["code"], "RATE_LIMITED");
    assert_eq!(json["limit"], 2);

    // 其它 IP 不受影响
    let other = Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.9")
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(other).await.expect("request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_api_key_is_rejected_with_zero_limit() {
    let storage = temp_storage("og-invalid-key").await;
    let app = build_app(test_config(), Some(storage));

    let resp = app
        .oneshot(get("/api/og?key=ogpix_doesnotexist"))
        .await
        .expect("request /api/og");

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = read_json(resp).await;
    assert_eq!(json["code"], "INVALID_API_KEY");
    assert_eq!(json["usage"], 0);
    assert_eq!(json["limit"], 0);
}

#[tokio::test]
async fn exhausted_quota_is_reported_with_usage() {
    let storage = temp_storage("og-quota").await;
    let now = chrono::Utc::now().timestamp();
    storage
        .upsert_user_plan("user_q", "free", 2, now)
        .await
        .expect("plan");
    let key = storage
        .create_api_key("user_q", "CI", "ogpix_quota_test", now)
        .await
        .expect("key");
    for _ in 0..2 {
        storage
            .insert_usage_log(&key.id, Some("dark"), "/api/og", now)
            .await
            .expect("usage");
    }

    let app = build_app(test_config(), Some(storage));
    let resp = app
        .oneshot(get("/api/og?key=ogpix_quota_test"))
        .await
        .expect("request /api/og");

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = read_json(resp).await;
    assert_eq!(json["code"], "QUOTA_EXCEEDED");
    assert_eq!(json["usage"], 2);
    assert_eq!(json["limit"], 2);
}

#[tokio::test]
async fn valid_key_bypasses_ip_rate_limit() {
    let storage = temp_storage("og-valid-key").await;
    let now = chrono::Utc::now().timestamp();
    storage
        .create_api_key("user_v", "Default", "ogpix_valid_test", now)
        .await
        .expect("key");

    let mut cfg = test_config();
    cfg.rate_limit.max_requests = 1;
    let app = build_app(cfg, Some(storage));

    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(get("/api/og?key=ogpix_valid_test&title=Keyed"))
            .await
            .expect("request /api/og");
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn catalog_lists_themes_and_templates() {
    let app = build_app(test_config(), None);
    let resp = app
        .oneshot(get("/api/og/catalog"))
        .await
        .expect("request catalog");

    assert_eq!(resp.status(), StatusCode::OK);
    let json = read_json(resp).await;
    let themes = json["themes"].as_array().expect("themes array");
    assert_eq!(themes.len(), 15);
    assert_eq!(themes[0]["name"], "dark");
    assert_eq!(json["templates"].as_array().expect("templates").len(), 5);
}

#[tokio::test]
async fn health_reports_development_mode_without_storage() {
    let app = build_app(test_config(), None);
    let resp = app.oneshot(get("/health")).await.expect("request /health");

    assert_eq!(resp.status(), StatusCode::OK);
    let json = read_json(resp).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["storage"], "development");
}
