//! 匿名请求的固定窗口限流。
//!
//! 以可注入的 `RateLimiter` 能力接口暴露，由 `AppState` 持有；默认实现为进程内 map，
//! 多副本部署时各副本独立计数（可接受的误差）。

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// 超过该条目数时清理已过期窗口
const PRUNE_THRESHOLD: usize = 50_000;

/// 无法识别客户端地址时共用的限流键
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// 限流能力接口
pub trait RateLimiter: Send + Sync {
    /// 本次请求是否放行（放行即计数）
    fn check(&self, key: &str) -> bool;

    /// 每个窗口的请求上限
    fn limit(&self) -> u32;

    /// 距当前窗口重置的剩余时间
    fn retry_after(&self, _key: &str) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

/// 进程内固定窗口实现
pub struct InMemoryRateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl InMemoryRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.max_requests, cfg.window())
    }

    /// 持锁方 panic 后仍沿用已有计数
    fn lock_windows(&self) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 以指定时刻判断（便于测试时间推进）
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut guard = self.lock_windows();

        let allowed = match guard.get_mut(key) {
            Some(w) if now < w.reset_at => {
                if w.count < self.max_requests {
                    w.count += 1;
                    true
                } else {
                    false
                }
            }
            _ => {
                guard.insert(
                    key.to_string(),
                    RateWindow {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        };

        if guard.len() > PRUNE_THRESHOLD {
            guard.retain(|_, w| now < w.reset_at);
        }
        allowed
    }

    #[cfg(test)]
    fn count_of(&self, key: &str) -> Option<u32> {
        self.lock_windows().get(key).map(|w| w.count)
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn limit(&self) -> u32 {
        self.max_requests
    }

    fn retry_after(&self, key: &str) -> Option<Duration> {
        self.lock_windows()
            .get(key)
            .map(|w| w.reset_at.saturating_duration_since(Instant::now()))
    }
}

/// 从代理头中取客户端 IP（x-forwarded-for 首段，其次 x-real-ip）
pub fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next());
    let real_ip = headers.get("x-real-ip").and_then(|v| v.to_str().ok());

    [forwarded, real_ip]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// 限流键：客户端 IP，缺失时归入 `anonymous`
pub fn rate_limit_key(headers: &HeaderMap) -> String {
    client_ip_from_headers(headers).unwrap_or_else(|| ANONYMOUS_CLIENT.to_string())
}
