#![allow(dead_code)]

use axum::{Router, body::to_bytes, response::Response};
use std::sync::Arc;

use ogpix_backend::app::build_router;
use ogpix_backend::storage::Storage;
use ogpix_backend::{AppConfig, AppState};

/// 测试用配置：不加载系统字体，避免依赖宿主环境
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.image.load_system_fonts = false;
    cfg.image.max_parallel = 2;
    cfg
}

/// 临时 SQLite 库（每次调用独立文件）
pub async fn temp_storage(tag: &str) -> Arc<Storage> {
    let path = std::env::temp_dir().join(format!("ogpix-it-{tag}-{}.db", uuid::Uuid::new_v4()));
    let storage = Storage::connect_sqlite(path.to_str().expect("utf8 path"), false)
        .await
        .expect("connect sqlite");
    storage.init_schema().await.expect("init schema");
    Arc::new(storage)
}

pub fn build_app(cfg: AppConfig, storage: Option<Arc<Storage>>) -> Router {
    let state = AppState::with_storage(cfg, storage).expect("build state");
    build_router(state)
}

pub async fn read_json(resp: Response) -> serde_json::Value {
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("parse json")
}
