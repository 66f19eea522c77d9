pub mod rate_limit;
pub mod recorder;
pub mod tracker;

use axum::http::HeaderMap;

use crate::error::AppError;
use rate_limit::{RateLimiter, rate_limit_key};
use tracker::{UsageDecision, UsageTracker, seconds_until_next_month};

/// 准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 未携带 Key，已通过 IP 限流
    Anonymous,
    /// 携带 Key，已通过月度配额
    Tracked(UsageDecision),
}

/// 图片请求准入：携带 Key 走配额追踪，否则按客户端 IP 限流。
///
/// 拒绝时返回对应的 429 错误（RATE_LIMITED / INVALID_API_KEY / QUOTA_EXCEEDED）。
pub async fn admit(
    rate_limiter: &dyn RateLimiter,
    tracker: &UsageTracker,
    headers: &HeaderMap,
    api_key: Option<&str>,
    label: Option<&str>,
) -> Result<Admission, AppError> {
    let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) else {
        let client = rate_limit_key(headers);
        if rate_limiter.check(&client) {
            return Ok(Admission::Anonymous);
        }
        let retry_after_secs = rate_limiter
            .retry_after(&client)
            .map(|d| d.as_secs())
            .unwrap_or(60);
        tracing::info!(target: "ogpix_backend::quota", "匿名请求触发限流 client={client}");
        return Err(AppError::RateLimited {
            retry_after_secs,
            limit: i64::from(rate_limiter.limit()),
        });
    };

    let decision = tracker.check(key, label).await?;
    if decision.allowed {
        return Ok(Admission::Tracked(decision));
    }
    if decision.is_invalid_key() {
        return Err(AppError::InvalidApiKey);
    }
    Err(AppError::QuotaExceeded {
        usage: decision.usage,
        limit: decision.limit,
        retry_after_secs: seconds_until_next_month(chrono::Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rate_limit::InMemoryRateLimiter;
    use std::time::Duration;

    #[tokio::test]
    async fn anonymous_requests_hit_rate_limiter() {
        let limiter = InMemoryRateLimiter::new(1, Duration::from_secs(3600));
        let tracker = UsageTracker::new(None, None, 100, "/api/og");
        let headers = HeaderMap::new();

        let first = admit(&limiter, &tracker, &headers, None, None).await.unwrap();
        assert_eq!(first, Admission::Anonymous);

        let err = admit(&limiter, &tracker, &headers, Some("  "), None)
            .await
            .unwrap_err();
        match err {
            AppError::RateLimited {
                retry_after_secs,
                limit,
            } => {
                assert_eq!(limit, 1);
                assert!(retry_after_secs <= 3600);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn keyed_requests_bypass_rate_limiter() {
        let limiter = InMemoryRateLimiter::new(1, Duration::from_secs(3600));
        let tracker = UsageTracker::new(None, None, 100, "/api/og");
        let headers = HeaderMap::new();
        for _ in 0..3 {
            let res = admit(&limiter, &tracker, &headers, Some("ogpix_dev"), None)
                .await
                .unwrap();
            assert!(matches!(res, Admission::Tracked(d) if d.allowed && d.limit == 100));
        }
    }
}
