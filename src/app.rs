use axum::{Router, routing::get};
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::cors::build_cors_layer;
use crate::features::{
    health::health_check, keys::create_keys_router, og::create_og_router,
    waitlist::create_waitlist_router,
};
use crate::openapi::ApiDoc;
use crate::request_id::request_id_middleware;
use crate::state::AppState;

/// 压缩策略：JSON/文本/SVG 压缩，PNG 等已压缩的二进制跳过
fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

/// 装配完整路由：业务接口挂在 `config.api.prefix` 下，`/health` 与文档在根路径
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let api_router = Router::<AppState>::new()
        .merge(create_og_router())
        .merge(create_waitlist_router())
        .merge(create_keys_router());

    let mut app = Router::<AppState>::new()
        .route("/health", get(health_check))
        .nest(&config.api.prefix, api_router)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // 营销站/文档站静态产物（未命中任何路由时回落）
    if let Some(dir) = config
        .server
        .static_dir
        .as_deref()
        .filter(|d| !d.trim().is_empty())
    {
        tracing::info!("静态站点目录: {}", dir);
        app = app.fallback_service(ServeDir::new(dir));
    }

    let mut app = app
        .with_state(state)
        .layer(CompressionLayer::new().compress_when(compression_predicate()));
    if let Some(cors) = build_cors_layer(&config.cors) {
        app = app.layer(cors);
    }
    app.layer(axum::middleware::from_fn(request_id_middleware))
}

#[cfg(test)]
mod compression_predicate_tests {
    use super::compression_predicate;
    use axum::body::Body;
    use axum::http::{Response as HttpResponse, header};
    use tower_http::compression::predicate::Predicate;

    fn should_compress_for(ct: &str) -> bool {
        let resp = HttpResponse::builder()
            .header(header::CONTENT_TYPE, ct)
            .body(Body::from(vec![b'x'; 2048]))
            .unwrap();
        compression_predicate().should_compress(&resp)
    }

    #[test]
    fn png_is_never_compressed() {
        assert!(!should_compress_for("image/png"));
    }

    #[test]
    fn json_and_problem_details_are_compressed() {
        assert!(should_compress_for("application/json"));
        assert!(should_compress_for("application/problem+json"));
        assert!(should_compress_for("image/svg+xml"));
    }
}
