use axum::{
    Router,
    body::Body,
    http::{Request, header},
    routing::get,
};
use tower::ServiceExt;

use ogpix_backend::config::CorsConfig;
use ogpix_backend::cors::build_cors_layer;

#[test]
fn disabled_or_originless_config_builds_no_layer() {
    assert!(build_cors_layer(&CorsConfig::default()).is_none());
    let enabled_without_origins = CorsConfig {
        enabled: true,
        ..CorsConfig::default()
    };
    assert!(build_cors_layer(&enabled_without_origins).is_none());
}

#[tokio::test]
async fn cors_layer_adds_allow_origin_header() {
    let cors = CorsConfig {
        enabled: true,
        allowed_origins: vec!["https://editor.example.com".to_string()],
        allowed_methods: vec!["GET".to_string()],
        allowed_headers: vec!["Content-Type".to_string()],
        ..CorsConfig::default()
    };

    let layer = build_cors_layer(&cors).expect("cors layer");
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .layer(layer);

    let req = Request::builder()
        .method("GET")
        .uri("/")
        .header(header::ORIGIN, "https://editor.example.com")
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("call app");

    let allow_origin = resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .expect("missing allow origin")
        .to_str()
        .expect("invalid allow origin");
    assert_eq!(allow_origin, "https://editor.example.com");
}

#[tokio::test]
async fn preflight_defaults_to_dashboard_methods() {
    let cors = CorsConfig {
        enabled: true,
        allowed_origins: vec!["*".to_string()],
        ..CorsConfig::default()
    };

    let layer = build_cors_layer(&cors).expect("cors layer");
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .layer(layer);

    let req = Request::builder()
        .method("OPTIONS")
        .uri("/")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("call app");

    let allow_methods = resp
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_METHODS)
        .expect("missing allow methods")
        .to_str()
        .expect("invalid allow methods");
    assert!(allow_methods.contains("DELETE"));
    assert!(allow_methods.contains("POST"));
}
