use axum::body::Bytes;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::keys::session::SessionVerifier;
use crate::features::og::renderer::OgRenderer;
use crate::features::quota::rate_limit::{InMemoryRateLimiter, RateLimiter};
use crate::features::quota::recorder::UsageRecorder;
use crate::features::quota::tracker::UsageTracker;
use crate::storage::Storage;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// 未配置时为开发模式
    pub storage: Option<Arc<Storage>>,
    /// 匿名请求限流（可替换为共享存储实现）
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub tracker: UsageTracker,
    pub recorder: Option<UsageRecorder>,
    pub renderer: Arc<OgRenderer>,
    /// 控制并发渲染的信号量（限制 CPU 密集型任务数量）
    pub render_semaphore: Arc<Semaphore>,
    /// OG 图缓存（按图片字节大小加权）；未启用时为 None
    pub render_cache: Option<Cache<String, Bytes>>,
    /// logo 下载客户端（禁止重定向）
    pub logo_client: reqwest::Client,
    /// 控制台会话校验；未配置密钥时为 None
    pub session: Option<SessionVerifier>,
}

impl AppState {
    /// 按配置装配全部依赖：连接数据库、建表、启动用量写入任务
    pub async fn build(config: AppConfig) -> Result<Self, AppError> {
        let storage = match config.storage.configured_path() {
            Some(path) => {
                if let Some(dir) = std::path::Path::new(path).parent()
                    && !dir.as_os_str().is_empty()
                {
                    tokio::fs::create_dir_all(dir).await.map_err(|e| {
                        AppError::Internal(format!("创建数据库目录失败 {}: {e}", dir.display()))
                    })?;
                }
                let storage = Storage::connect_sqlite(path, config.storage.sqlite_wal).await?;
                storage.init_schema().await?;
                tracing::info!("SQLite 已就绪: {}", path);
                Some(Arc::new(storage))
            }
            None => None,
        };
        Self::with_storage(config, storage)
    }

    /// 使用给定的存储装配（测试中直接注入临时库）。需在 tokio 运行时内调用
    pub fn with_storage(config: AppConfig, storage: Option<Arc<Storage>>) -> Result<Self, AppError> {
        let recorder = storage
            .clone()
            .map(|s| UsageRecorder::spawn(s, config.quota.recorder_queue_capacity));
        let endpoint = format!("{}/og", config.api.prefix.trim_end_matches('/'));
        let tracker = UsageTracker::new(
            storage.clone(),
            recorder.clone(),
            config.quota.default_monthly_limit,
            endpoint,
        );

        let render_cache = config.image.cache_enabled.then(|| {
            Cache::builder()
                .weigher(|_k: &String, v: &Bytes| v.len().try_into().unwrap_or(u32::MAX))
                .max_capacity(config.image.cache_max_bytes)
                .time_to_live(Duration::from_secs(config.image.cache_ttl_secs))
                .build()
        });

        let logo_client = crate::http::build_logo_client(&config.logo)
            .map_err(|e| AppError::Internal(format!("构建 HTTP Client 失败: {e}")))?;

        let parallelism = config.image.effective_parallelism();
        tracing::info!("并发渲染许可数: {}", parallelism);

        Ok(Self {
            rate_limiter: Arc::new(InMemoryRateLimiter::from_config(&config.rate_limit)),
            renderer: Arc::new(OgRenderer::new(&config.image, &config.branding)),
            render_semaphore: Arc::new(Semaphore::new(parallelism)),
            session: SessionVerifier::from_config(&config.session),
            storage,
            tracker,
            recorder,
            render_cache,
            logo_client,
            config: Arc::new(config),
        })
    }

    /// 需要持久化的接口调用：未配置存储时返回 503
    pub fn require_storage(&self) -> Result<&Arc<Storage>, AppError> {
        self.storage
            .as_ref()
            .ok_or_else(|| AppError::Unavailable("未配置持久化存储".into()))
    }
}
