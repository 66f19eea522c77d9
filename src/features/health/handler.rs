use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// 服务状态
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "ogpix-backend")]
    pub service: String,
    /// Cargo package version
    #[schema(example = "0.1.0")]
    pub version: String,
    /// 持久化模式：sqlite | development
    #[schema(example = "sqlite")]
    pub storage: String,
    /// 当前缓存的 OG 图数量
    pub cached_images: u64,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "探活端点。存储不可用时返回 503。",
    responses(
        (status = 200, description = "服务健康", body = HealthResponse),
        (status = 503, description = "存储不可用", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, storage) = match &state.storage {
        Some(st) => match sqlx::query("SELECT 1").execute(&st.pool).await {
            Ok(_) => (StatusCode::OK, "sqlite"),
            Err(e) => {
                tracing::warn!("健康检查：SQLite 不可用: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "sqlite")
            }
        },
        None => (StatusCode::OK, "development"),
    };

    (
        status,
        Json(HealthResponse {
            status: if status.is_success() { "healthy" } else { "degraded" }.to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            storage: storage.to_string(),
            cached_images: state
                .render_cache
                .as_ref()
                .map(|c| c.entry_count())
                .unwrap_or(0),
        }),
    )
}
