use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    /// 可选：营销站/文档站的静态产物目录（未配置则不挂载）
    #[serde(default)]
    pub static_dir: Option<String>,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        3000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            static_dir: None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// 日志格式：full | json
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
    fn default_format() -> String {
        "full".to_string()
    }

    /// 未设置 RUST_LOG 时使用的过滤表达式
    pub fn default_filter(&self) -> String {
        format!("ogpix_backend={},tower_http={}", self.level, self.level)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 路由前缀
    #[serde(default = "ApiConfig::default_prefix")]
    pub prefix: String,
}

impl ApiConfig {
    fn default_prefix() -> String {
        "/api".to_string()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: Self::default_prefix(),
        }
    }
}

/// CORS 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 是否启用 CORS
    #[serde(default = "CorsConfig::default_enabled")]
    pub enabled: bool,
    /// 允许的 Origin 列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// 允许的方法列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// 允许的请求头列表（支持 "*" 表示任意）
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// 预检缓存时间（秒）
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl CorsConfig {
    fn default_enabled() -> bool {
        false
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            allowed_origins: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            max_age_secs: None,
        }
    }
}

/// 图片渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRenderConfig {
    /// 是否优先速度渲染（OptimizeSpeed），提升栅格化性能，可能略降画质
    #[serde(default)]
    pub optimize_speed: bool,
    /// 是否加载系统字体（容器内通常只有 fonts_dir 中的字体）
    #[serde(default = "ImageRenderConfig::default_load_system_fonts")]
    pub load_system_fonts: bool,
    /// 自定义字体目录（.ttf/.otf）
    #[serde(default = "ImageRenderConfig::default_fonts_dir")]
    pub fonts_dir: String,
    /// 是否启用渲染结果缓存
    #[serde(default = "ImageRenderConfig::default_cache_enabled")]
    pub cache_enabled: bool,
    /// 缓存最大容量（字节），按图片字节大小加权
    #[serde(default = "ImageRenderConfig::default_cache_max_bytes")]
    pub cache_max_bytes: u64,
    /// 缓存 TTL（秒）
    #[serde(default = "ImageRenderConfig::default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// 并发渲染许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
}

impl ImageRenderConfig {
    fn default_load_system_fonts() -> bool {
        true
    }
    fn default_fonts_dir() -> String {
        "resources/fonts".to_string()
    }
    fn default_cache_enabled() -> bool {
        true
    }
    fn default_cache_max_bytes() -> u64 {
        64 * 1024 * 1024
    }
    fn default_cache_ttl() -> u64 {
        3600
    }

    /// 实际生效的并发渲染许可数
    pub fn effective_parallelism(&self) -> usize {
        match self.max_parallel {
            0 => num_cpus::get().max(1),
            n => n as usize,
        }
    }
}

impl Default for ImageRenderConfig {
    fn default() -> Self {
        Self {
            optimize_speed: false,
            load_system_fonts: Self::default_load_system_fonts(),
            fonts_dir: Self::default_fonts_dir(),
            cache_enabled: Self::default_cache_enabled(),
            cache_max_bytes: Self::default_cache_max_bytes(),
            cache_ttl_secs: Self::default_cache_ttl(),
            max_parallel: 0,
        }
    }
}

/// 品牌/展示配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandingConfig {
    /// 右下角水印文字
    #[serde(default = "BrandingConfig::default_watermark_text")]
    pub watermark_text: String,
}

impl BrandingConfig {
    fn default_watermark_text() -> String {
        "ogpix.dev".to_string()
    }
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            watermark_text: Self::default_watermark_text(),
        }
    }
}

/// 匿名请求（未携带 API Key）的固定窗口限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 每个窗口允许的请求数
    #[serde(default = "RateLimitConfig::default_max_requests")]
    pub max_requests: u32,
    /// 窗口长度（秒）
    #[serde(default = "RateLimitConfig::default_window_secs")]
    pub window_secs: u64,
}

impl RateLimitConfig {
    fn default_max_requests() -> u32 {
        100
    }
    fn default_window_secs() -> u64 {
        3600
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: Self::default_max_requests(),
            window_secs: Self::default_window_secs(),
        }
    }
}

/// API Key 月度配额配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// 未设置套餐时的默认月度配额
    #[serde(default = "QuotaConfig::default_monthly_limit")]
    pub default_monthly_limit: i64,
    /// 用量写入队列容量（满则丢弃）
    #[serde(default = "QuotaConfig::default_queue_capacity")]
    pub recorder_queue_capacity: usize,
}

impl QuotaConfig {
    fn default_monthly_limit() -> i64 {
        100
    }
    fn default_queue_capacity() -> usize {
        1024
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_monthly_limit: Self::default_monthly_limit(),
            recorder_queue_capacity: Self::default_queue_capacity(),
        }
    }
}

/// 持久化配置
///
/// 未配置 `sqlite_path` 时进入开发模式：用量追踪与等候名单均直接放行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite 文件路径
    #[serde(default)]
    pub sqlite_path: Option<String>,
    /// 是否启用 WAL
    #[serde(default = "StorageConfig::default_wal")]
    pub sqlite_wal: bool,
}

impl StorageConfig {
    fn default_wal() -> bool {
        true
    }

    /// 返回非空的数据库路径
    pub fn configured_path(&self) -> Option<&str> {
        self.sqlite_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            sqlite_wal: Self::default_wal(),
        }
    }
}

/// Logo 外链配置（SSRF 白名单与下载限制）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoConfig {
    /// 允许的主机（精确匹配或以 `.host` 结尾的子域）
    #[serde(default = "LogoConfig::default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
    /// 下载超时（秒）
    #[serde(default = "LogoConfig::default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// 下载体积上限（字节）
    #[serde(default = "LogoConfig::default_max_bytes")]
    pub max_bytes: usize,
}

impl LogoConfig {
    fn default_allowed_hosts() -> Vec<String> {
        [
            "avatars.githubusercontent.com",
            "raw.githubusercontent.com",
            "github.com",
            "gravatar.com",
            "i.imgur.com",
            "pbs.twimg.com",
            "cdn.discordapp.com",
            "lh3.googleusercontent.com",
            "images.unsplash.com",
            "res.cloudinary.com",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    fn default_fetch_timeout() -> u64 {
        5
    }
    fn default_max_bytes() -> usize {
        2 * 1024 * 1024
    }
}

impl Default for LogoConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Self::default_allowed_hosts(),
            fetch_timeout_secs: Self::default_fetch_timeout(),
            max_bytes: Self::default_max_bytes(),
        }
    }
}

/// 控制台会话校验配置（会话由外部身份服务签发，HS256）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// 与身份服务共享的签名密钥；为空则控制台接口不可用
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// 可选：校验 iss
    #[serde(default)]
    pub issuer: Option<String>,
    /// 可选：校验 aud
    #[serde(default)]
    pub audience: Option<String>,
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        15
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub image: ImageRenderConfig,
    #[serde(default)]
    pub branding: BrandingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logo: LogoConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置（文件可缺省），支持环境变量覆盖
    ///
    /// 环境变量示例：`APP_STORAGE__SQLITE_PATH=./data/ogpix.db`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        let builder = ConfigBuilder::builder()
            .add_source(File::from(config_path).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("logo.allowed_hosts")
                    .with_list_parse_key("cors.allowed_origins")
                    .with_list_parse_key("cors.allowed_methods")
                    .with_list_parse_key("cors.allowed_headers")
                    .try_parsing(true),
            )
            .build()?;

        builder.try_deserialize()
    }

    /// 获取配置文件路径（可通过 OGPIX_CONFIG 覆盖）
    pub fn get_config_path() -> PathBuf {
        std::env::var("OGPIX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::AppConfig;
    use std::io;
    use std::sync::{Arc, Mutex};

    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn load_emits_no_log_events() {
        // 日志订阅者在加载配置之后才初始化，加载阶段的事件会丢失
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || CaptureWriter(sink.clone()))
            .finish();
        let loaded = tracing::subscriber::with_default(subscriber, AppConfig::load);
        assert!(loaded.is_ok(), "load failed: {:?}", loaded.err());
        assert!(captured.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_config_deserializes_with_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").expect("deserialize empty config");
        assert_eq!(cfg.api.prefix, "/api");
        assert_eq!(cfg.rate_limit.max_requests, 100);
        assert_eq!(cfg.rate_limit.window_secs, 3600);
        assert_eq!(cfg.quota.default_monthly_limit, 100);
        assert!(cfg.storage.configured_path().is_none());
        assert!(
            cfg.logo
                .allowed_hosts
                .iter()
                .any(|h| h == "avatars.githubusercontent.com")
        );
    }

    #[test]
    fn blank_sqlite_path_counts_as_unconfigured() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"storage":{"sqlite_path":"  "}}"#).expect("deserialize");
        assert!(cfg.storage.configured_path().is_none());
    }
}
