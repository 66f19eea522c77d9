use reqwest::{Client, redirect::Policy};
use std::time::Duration;

use crate::config::LogoConfig;

/// 外链 logo 下载专用的 HTTP Client。
///
/// - 禁止跟随重定向：白名单只校验首跳 URL，跟随 3xx 会绕过校验
/// - `Client` 内部带连接池，随 `AppState` 全局复用
pub fn build_logo_client(cfg: &LogoConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .redirect(Policy::none())
        .timeout(Duration::from_secs(cfg.fetch_timeout_secs.max(1)))
        .user_agent(concat!("ogpix-backend/", env!("CARGO_PKG_VERSION")))
        .build()
}
