use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::{ConnectOptions, Row, SqlitePool, sqlite::SqliteConnectOptions};
use uuid::Uuid;

use crate::error::AppError;

pub const PLAN_FREE: &str = "free";

/// API Key 记录（控制台签发，图片接口只读 + 触发 last_used_at 更新）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_id: String,
    pub key: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

/// 用户套餐
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserPlan {
    pub user_id: String,
    pub plan: String,
    pub monthly_limit: i64,
}

/// 等候名单写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitlistInsert {
    Inserted,
    AlreadyPresent,
}

/// SQLite 持久化：api_keys / user_plans / usage_logs / waitlist
#[derive(Clone)]
pub struct Storage {
    pub pool: SqlitePool,
}

fn row_to_api_key(row: &sqlx::sqlite::SqliteRow) -> ApiKeyRecord {
    ApiKeyRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        key: row.get("key"),
        name: row.get("name"),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: row.get("created_at"),
        last_used_at: row
            .try_get::<Option<i64>, _>("last_used_at")
            .ok()
            .flatten(),
    }
}

impl Storage {
    pub async fn connect_sqlite(path: &str, wal: bool) -> Result<Self, AppError> {
        let opt = SqliteConnectOptions::new()
            .filename(Path::new(path))
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Off);
        let pool = SqlitePool::connect_with(opt)
            .await
            .map_err(|e| AppError::Storage(format!("sqlite connect: {e}")))?;
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&pool)
                .await
                .ok();
        }
        sqlx::query("PRAGMA synchronous=NORMAL;")
            .execute(&pool)
            .await
            .ok();
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), AppError> {
        let ddl = r#"
        CREATE TABLE IF NOT EXISTS user_plans (
          user_id TEXT PRIMARY KEY,
          plan TEXT NOT NULL DEFAULT 'free',
          monthly_limit INTEGER NOT NULL,
          created_at INTEGER NOT NULL,
          updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS api_keys (
          id TEXT PRIMARY KEY,
          user_id TEXT NOT NULL,
          key TEXT NOT NULL UNIQUE,
          name TEXT NOT NULL,
          is_active INTEGER NOT NULL DEFAULT 1,
          created_at INTEGER NOT NULL,
          last_used_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_api_keys_user_id ON api_keys(user_id);

        CREATE TABLE IF NOT EXISTS usage_logs (
          id TEXT PRIMARY KEY,
          api_key_id TEXT NOT NULL,
          created_at INTEGER NOT NULL,
          theme TEXT,
          endpoint TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_usage_logs_key_time ON usage_logs(api_key_id, created_at);

        CREATE TABLE IF NOT EXISTS waitlist (
          email TEXT PRIMARY KEY,
          source TEXT NOT NULL,
          created_at INTEGER NOT NULL
        );
        "#;

        sqlx::raw_sql(ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Storage(format!("init schema: {e}")))?;
        Ok(())
    }

    // ---------------- API Key ----------------

    pub async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>, AppError> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key = ? LIMIT 1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_api_key))
    }

    pub async fn list_active_api_keys(&self, user_id: &str) -> Result<Vec<ApiKeyRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT * FROM api_keys WHERE user_id = ? AND is_active = 1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_api_key).collect())
    }

    pub async fn create_api_key(
        &self,
        user_id: &str,
        name: &str,
        key: &str,
        now_ts: i64,
    ) -> Result<ApiKeyRecord, AppError> {
        let id = format!("key_{}", Uuid::new_v4().simple());
        sqlx::query(
            "INSERT INTO api_keys(id, user_id, key, name, is_active, created_at) VALUES(?, ?, ?, ?, 1, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(key)
        .bind(name)
        .bind(now_ts)
        .execute(&self.pool)
        .await?;
        Ok(ApiKeyRecord {
            id,
            user_id: user_id.to_string(),
            key: key.to_string(),
            name: name.to_string(),
            is_active: true,
            created_at: now_ts,
            last_used_at: None,
        })
    }

    /// 停用属于该用户的 Key；返回是否命中
    pub async fn deactivate_api_key(&self, user_id: &str, key_id: &str) -> Result<bool, AppError> {
        let res = sqlx::query(
            "UPDATE api_keys SET is_active = 0 WHERE id = ? AND user_id = ? AND is_active = 1",
        )
        .bind(key_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn touch_api_key_last_used(&self, key_id: &str, now_ts: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(now_ts)
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------- 套餐与用量 ----------------

    pub async fn get_user_plan(&self, user_id: &str) -> Result<Option<UserPlan>, AppError> {
        let row = sqlx::query("SELECT user_id, plan, monthly_limit FROM user_plans WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| UserPlan {
            user_id: r.get("user_id"),
            plan: r.get("plan"),
            monthly_limit: r.get("monthly_limit"),
        }))
    }

    pub async fn upsert_user_plan(
        &self,
        user_id: &str,
        plan: &str,
        monthly_limit: i64,
        now_ts: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO user_plans(user_id, plan, monthly_limit, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
               plan = excluded.plan,
               monthly_limit = excluded.monthly_limit,
               updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(plan)
        .bind(monthly_limit)
        .bind(now_ts)
        .bind(now_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_usage_since(&self, api_key_id: &str, since_ts: i64) -> Result<i64, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM usage_logs WHERE api_key_id = ? AND created_at >= ?",
        )
        .bind(api_key_id)
        .bind(since_ts)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// 用户名下各有效 Key 自 `since_ts` 起的用量（无记录的 Key 不出现）
    pub async fn usage_counts_for_user_since(
        &self,
        user_id: &str,
        since_ts: i64,
    ) -> Result<HashMap<String, i64>, AppError> {
        let rows = sqlx::query(
            "SELECT u.api_key_id AS key_id, COUNT(*) AS n
             FROM usage_logs u JOIN api_keys k ON k.id = u.api_key_id
             WHERE k.user_id = ? AND k.is_active = 1 AND u.created_at >= ?
             GROUP BY u.api_key_id",
        )
        .bind(user_id)
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("key_id"), r.get::<i64, _>("n")))
            .collect())
    }

    pub async fn insert_usage_log(
        &self,
        api_key_id: &str,
        theme: Option<&str>,
        endpoint: &str,
        now_ts: i64,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO usage_logs(id, api_key_id, created_at, theme, endpoint) VALUES(?, ?, ?, ?, ?)",
        )
        .bind(format!("use_{}", Uuid::new_v4().simple()))
        .bind(api_key_id)
        .bind(now_ts)
        .bind(theme)
        .bind(endpoint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---------------- 等候名单 ----------------

    pub async fn insert_waitlist(
        &self,
        email: &str,
        source: &str,
        now_ts: i64,
    ) -> Result<WaitlistInsert, AppError> {
        let res = sqlx::query(
            "INSERT INTO waitlist(email, source, created_at) VALUES(?, ?, ?) ON CONFLICT(email) DO NOTHING",
        )
        .bind(email)
        .bind(source)
        .bind(now_ts)
        .execute(&self.pool)
        .await?;
        Ok(if res.rows_affected() == 0 {
            WaitlistInsert::AlreadyPresent
        } else {
            WaitlistInsert::Inserted
        })
    }

    pub async fn count_waitlist(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM waitlist")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}
