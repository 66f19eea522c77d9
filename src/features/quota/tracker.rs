//! API Key 月度配额判定。

use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};

use super::recorder::{UsageEvent, UsageRecorder};
use crate::error::AppError;
use crate::storage::Storage;

/// 判定结果。`limit == 0` 表示 Key 无效或已停用，区别于配额用尽
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageDecision {
    pub allowed: bool,
    pub usage: i64,
    pub limit: i64,
}

impl UsageDecision {
    pub fn is_invalid_key(&self) -> bool {
        !self.allowed && self.limit == 0
    }
}

/// 当前 UTC 自然月的起始时刻
pub fn month_start_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// 距下个 UTC 自然月的秒数（至少 1）
pub fn seconds_until_next_month(now: DateTime<Utc>) -> u64 {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .map(|next| (next - now).num_seconds().max(1) as u64)
        .unwrap_or(1)
}

/// 配额追踪器。
///
/// 未配置存储时为开发模式，所有 Key 直接放行。
#[derive(Clone)]
pub struct UsageTracker {
    backend: Option<(Arc<Storage>, UsageRecorder)>,
    default_limit: i64,
    endpoint: String,
}

impl UsageTracker {
    pub fn new(
        storage: Option<Arc<Storage>>,
        recorder: Option<UsageRecorder>,
        default_limit: i64,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            backend: storage.zip(recorder),
            default_limit,
            endpoint: endpoint.into(),
        }
    }

    pub async fn check(&self, key: &str, label: Option<&str>) -> Result<UsageDecision, AppError> {
        self.check_at(key, label, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        key: &str,
        label: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UsageDecision, AppError> {
        let Some((storage, recorder)) = &self.backend else {
            return Ok(UsageDecision {
                allowed: true,
                usage: 0,
                limit: self.default_limit,
            });
        };

        let record = match storage.find_api_key(key).await? {
            Some(r) if r.is_active => r,
            _ => {
                return Ok(UsageDecision {
                    allowed: false,
                    usage: 0,
                    limit: 0,
                });
            }
        };

        let limit = storage
            .get_user_plan(&record.user_id)
            .await?
            .map(|p| p.monthly_limit)
            .unwrap_or(self.default_limit);
        let usage = storage
            .count_usage_since(&record.id, month_start_utc(now).timestamp())
            .await?;

        if usage >= limit {
            return Ok(UsageDecision {
                allowed: false,
                usage,
                limit,
            });
        }

        // 不等待写入结果
        recorder.record(UsageEvent {
            api_key_id: record.id,
            label: label.map(str::to_string),
            endpoint: self.endpoint.clone(),
            ts: now.timestamp(),
        });

        Ok(UsageDecision {
            allowed: true,
            usage: usage + 1,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_storage;
    use std::time::Duration;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
    }

    async fn tracker_with_key(limit: i64) -> (UsageTracker, Arc<Storage>, UsageRecorder, String) {
        let storage = Arc::new(temp_storage("tracker").await);
        let key = storage
            .create_api_key("u1", "Default", "ogpix_test", 1)
            .await
            .unwrap();
        storage.upsert_user_plan("u1", "free", limit, 1).await.unwrap();
        let recorder = UsageRecorder::spawn(storage.clone(), 64);
        let tracker = UsageTracker::new(Some(storage.clone()), Some(recorder.clone()), 100, "/api/og");
        (tracker, storage, recorder, key.id)
    }

    #[test]
    fn month_boundaries() {
        assert_eq!(month_start_utc(ts(2026, 3, 17, 12)), ts(2026, 3, 1, 0));
        assert_eq!(seconds_until_next_month(ts(2026, 12, 31, 23)), 3600);
        assert_eq!(seconds_until_next_month(ts(2026, 2, 28, 0)), 86_400);
    }

    #[tokio::test]
    async fn dev_mode_allows_everything() {
        let tracker = UsageTracker::new(None, None, 100, "/api/og");
        let d = tracker.check("anything", None).await.unwrap();
        assert_eq!(
            d,
            UsageDecision {
                allowed: true,
                usage: 0,
                limit: 100
            }
        );
    }

    #[tokio::test]
    async fn unknown_or_inactive_key_is_denied_with_zero_limit() {
        let (tracker, storage, _rec, key_id) = tracker_with_key(10).await;
        let d = tracker.check("ogpix_missing", None).await.unwrap();
        assert!(d.is_invalid_key());

        storage.deactivate_api_key("u1", &key_id).await.unwrap();
        let d = tracker.check("ogpix_test", None).await.unwrap();
        assert!(d.is_invalid_key());
        assert_eq!(d.usage, 0);
    }

    #[tokio::test]
    async fn quota_boundary() {
        let now = ts(2026, 5, 20, 10);
        let (tracker, storage, recorder, key_id) = tracker_with_key(3).await;
        // 上个月的记录不计入
        storage
            .insert_usage_log(&key_id, None, "/api/og", ts(2026, 4, 30, 23).timestamp())
            .await
            .unwrap();
        for h in 0..2 {
            storage
                .insert_usage_log(&key_id, None, "/api/og", ts(2026, 5, 1, h).timestamp())
                .await
                .unwrap();
        }

        // 比配额少 1：放行，并计入本次
        let d = tracker.check_at("ogpix_test", Some("dark"), now).await.unwrap();
        assert_eq!(
            d,
            UsageDecision {
                allowed: true,
                usage: 3,
                limit: 3
            }
        );

        // 等待后台写入落库后恰好达到配额
        recorder
            .graceful_shutdown(Duration::from_secs(5))
            .await
            .unwrap();
        let d = tracker.check_at("ogpix_test", None, now).await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.usage, d.limit);
        assert!(!d.is_invalid_key());
    }

    #[tokio::test]
    async fn missing_plan_uses_default_limit() {
        let storage = Arc::new(temp_storage("tracker_default").await);
        storage
            .create_api_key("u2", "Default", "ogpix_noplan", 1)
            .await
            .unwrap();
        let recorder = UsageRecorder::spawn(storage.clone(), 8);
        let tracker = UsageTracker::new(Some(storage), Some(recorder), 100, "/api/og");
        let d = tracker.check("ogpix_noplan", None).await.unwrap();
        assert_eq!(d.limit, 100);
        assert!(d.allowed);
    }

    #[tokio::test]
    async fn storage_failure_propagates_as_storage_error() {
        let (tracker, storage, _rec, _key_id) = tracker_with_key(10).await;
        storage.pool.close().await;
        let err = tracker.check("ogpix_test", None).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)), "unexpected error: {err:?}");
    }
}
