use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::get,
};
use serde::{Deserialize, Serialize};
use once_cell::sync::Lazy;

use crate::error::AppError;
use crate::state::AppState;
use crate::storage::WaitlistInsert;

static EMAIL_RE: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex")
});

const DEFAULT_SOURCE: &str = "website";
const MAX_SOURCE_CHARS: usize = 64;
const MAX_EMAIL_CHARS: usize = 254;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct WaitlistRequest {
    pub email: Option<String>,
    /// 来源页面标识，默认 website
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WaitlistResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WaitlistCount {
    pub count: i64,
}

/// 邮箱归一化（去首尾空白 + 小写）并校验格式
pub fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if email.chars().count() > MAX_EMAIL_CHARS || !EMAIL_RE.is_match(&email) {
        return Err(AppError::Validation("邮箱格式不正确".into()));
    }
    Ok(email)
}

fn normalize_source(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.chars().take(MAX_SOURCE_CHARS).collect())
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string())
}

#[utoipa::path(
    post,
    path = "/waitlist",
    summary = "加入 Pro 等候名单",
    description = "重复提交同一邮箱视为成功。未配置存储时只记录日志并返回成功。",
    request_body = WaitlistRequest,
    responses(
        (status = 200, description = "已加入", body = WaitlistResponse),
        (status = 400, description = "邮箱缺失或格式不正确", body = crate::error::ProblemDetails),
        (status = 500, description = "存储错误", body = crate::error::ProblemDetails)
    ),
    tag = "Waitlist"
)]
pub async fn join_waitlist(
    State(state): State<AppState>,
    payload: Result<Json<WaitlistRequest>, JsonRejection>,
) -> Result<Json<WaitlistResponse>, AppError> {
    let Json(req) = payload?;
    let raw_email = req
        .email
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| AppError::Validation("缺少 email".into()))?;
    let email = normalize_email(raw_email)?;
    let source = normalize_source(req.source.as_deref());

    let Some(storage) = &state.storage else {
        tracing::warn!(target: "ogpix_backend::waitlist", "{email} ({source}) - 未配置存储，仅记录");
        return Ok(Json(WaitlistResponse {
            success: true,
            message: "You're on the list!".into(),
        }));
    };

    let now = chrono::Utc::now().timestamp();
    let message = match storage.insert_waitlist(&email, &source, now).await? {
        WaitlistInsert::Inserted => {
            tracing::info!(target: "ogpix_backend::waitlist", "新的等候名单登记 source={source}");
            "You're on the list! We'll notify you when Pro launches."
        }
        WaitlistInsert::AlreadyPresent => "You're already on the list!",
    };

    Ok(Json(WaitlistResponse {
        success: true,
        message: message.into(),
    }))
}

#[utoipa::path(
    get,
    path = "/waitlist",
    summary = "等候名单人数",
    description = "未配置存储或查询失败时返回 0。",
    responses((status = 200, description = "登记总数", body = WaitlistCount)),
    tag = "Waitlist"
)]
pub async fn waitlist_count(State(state): State<AppState>) -> Json<WaitlistCount> {
    let count = match &state.storage {
        Some(storage) => storage.count_waitlist().await.unwrap_or_else(|e| {
            tracing::warn!(target: "ogpix_backend::waitlist", "查询等候名单人数失败: {e}");
            0
        }),
        None => 0,
    };
    Json(WaitlistCount { count })
}

pub fn create_waitlist_router() -> Router<AppState> {
    Router::new().route("/waitlist", get(waitlist_count).post(join_waitlist))
}
