/// 统一错误处理模块
pub mod error;

/// 配置模块
pub mod config;

/// 路由装配
pub mod app;

/// CORS 中间件构建
pub mod cors;

/// 功能聚合模块
pub mod features;

/// OpenAPI 文档
pub mod openapi;

/// 请求 ID 中间件
pub mod request_id;

/// SQLite 持久化
pub mod storage;

/// 应用状态聚合模块
pub mod state;

/// 优雅退出管理模块
pub mod shutdown;

/// HTTP Client 构建
pub mod http;

// 导出常用类型供外部使用
pub use config::AppConfig;
pub use error::AppError;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::AppState;
