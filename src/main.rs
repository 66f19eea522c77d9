use ogpix_backend::app::build_router;
use ogpix_backend::config::LoggingConfig;
use ogpix_backend::{AppConfig, AppState, ShutdownManager};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.default_filter()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    // 配置加载先于日志初始化：日志格式与级别来自配置本身
    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config init failed: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);
    tracing::info!("配置已加载: {:?}", AppConfig::get_config_path());

    let shutdown_manager = ShutdownManager::new();
    shutdown_manager.spawn_signal_listener();

    let state = match AppState::build(config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("应用状态初始化失败: {}", e);
            std::process::exit(1);
        }
    };
    let config = state.config.clone();
    let recorder = state.recorder.clone();
    let app = build_router(state);

    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("OG API: http://{}{}/og", addr, config.api.prefix);
    if config.storage.configured_path().is_none() {
        tracing::info!("开发模式：未配置 SQLite，用量不落库");
    }

    let shutdown_for_serve = shutdown_manager.clone();
    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        let reason = shutdown_for_serve.wait().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
    });

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    // 连接已全部结束，排空尚未落库的用量事件
    if let Some(recorder) = recorder {
        let timeout = config.shutdown.timeout_duration();
        if let Err(e) = recorder.graceful_shutdown(timeout).await {
            tracing::warn!("用量写入任务关闭失败: {}", e);
        }
    }

    tracing::info!("服务器已优雅关闭");
}
