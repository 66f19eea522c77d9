use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    routing::get,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::session::SessionClaims;
use crate::error::AppError;
use crate::features::quota::tracker::month_start_utc;
use crate::state::AppState;
use crate::storage::{ApiKeyRecord, PLAN_FREE, Storage, UserPlan};

pub const API_KEY_PREFIX: &str = "ogpix_";
const MAX_NAME_CHARS: usize = 64;
const MAX_ACTIVE_KEYS: usize = 10;

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DashboardUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanInfo {
    pub plan: String,
    pub monthly_limit: i64,
}

/// 控制台中的单个 Key（含本月用量）
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyItem {
    pub id: String,
    pub key: String,
    pub name: String,
    /// RFC3339
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub usage_count: i64,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub user: DashboardUser,
    pub plan: PlanInfo,
    pub api_keys: Vec<ApiKeyItem>,
    pub total_usage: i64,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteKeyRequest {
    pub key_id: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeleteKeyResponse {
    pub success: bool,
}

/// 生成 `ogpix_` + 32 位十六进制的 Key
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
}

fn sanitize_name(name: Option<&str>) -> Result<String, AppError> {
    let n = name.map(str::trim).unwrap_or_default();
    if n.is_empty() {
        return Ok("Default".to_string());
    }
    if n.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::Validation(format!(
            "name 过长（最大 {MAX_NAME_CHARS} 字符）"
        )));
    }
    Ok(n.to_string())
}

fn rfc3339(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<SessionClaims, AppError> {
    let verifier = state
        .session
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("控制台会话校验未配置".into()))?;
    verifier.authenticate(headers)
}

/// 读取用户套餐，首次访问时写入默认免费套餐
async fn ensure_plan(
    storage: &Storage,
    user_id: &str,
    default_limit: i64,
) -> Result<UserPlan, AppError> {
    if let Some(plan) = storage.get_user_plan(user_id).await? {
        return Ok(plan);
    }
    let now = chrono::Utc::now().timestamp();
    storage
        .upsert_user_plan(user_id, PLAN_FREE, default_limit, now)
        .await?;
    Ok(UserPlan {
        user_id: user_id.to_string(),
        plan: PLAN_FREE.to_string(),
        monthly_limit: default_limit,
    })
}

fn to_item(rec: ApiKeyRecord, usage_count: i64) -> ApiKeyItem {
    ApiKeyItem {
        created_at: rfc3339(rec.created_at),
        last_used_at: rec.last_used_at.map(rfc3339),
        id: rec.id,
        key: rec.key,
        name: rec.name,
        usage_count,
    }
}

#[utoipa::path(
    get,
    path = "/keys",
    summary = "控制台概览：套餐、API Keys 与本月用量",
    responses(
        (status = 200, description = "查询成功", body = DashboardResponse),
        (status = 401, description = "会话无效", body = crate::error::ProblemDetails, content_type = "application/problem+json"),
        (status = 503, description = "存储或会话校验未配置", body = crate::error::ProblemDetails, content_type = "application/problem+json")
    ),
    security(("SessionBearer" = [])),
    tag = "Keys"
)]
pub async fn get_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardResponse>, AppError> {
    let claims = authenticate(&state, &headers)?;
    let storage = state.require_storage()?;

    let plan = ensure_plan(storage, &claims.sub, state.config.quota.default_monthly_limit).await?;
    let since = month_start_utc(chrono::Utc::now()).timestamp();

    let usage = storage.usage_counts_for_user_since(&claims.sub, since).await?;
    let api_keys: Vec<ApiKeyItem> = storage
        .list_active_api_keys(&claims.sub)
        .await?
        .into_iter()
        .map(|rec| {
            let count = usage.get(&rec.id).copied().unwrap_or(0);
            to_item(rec, count)
        })
        .collect();
    let total_usage = api_keys.iter().map(|k| k.usage_count).sum();

    Ok(Json(DashboardResponse {
        user: DashboardUser {
            id: claims.sub,
            email: claims.email,
        },
        plan: PlanInfo {
            plan: plan.plan,
            monthly_limit: plan.monthly_limit,
        },
        api_keys,
        total_usage,
    }))
}

#[utoipa::path(
    post,
    path = "/keys",
    summary = "创建 API Key",
    request_body = CreateKeyRequest,
    responses(
        (status = 201, description = "创建成功", body = ApiKeyItem),
        (status = 400, description = "参数校验失败或 Key 数量已达上限", body = crate::error::ProblemDetails, content_type = "application/problem+json"),
        (status = 401, description = "会话无效", body = crate::error::ProblemDetails, content_type = "application/problem+json")
    ),
    security(("SessionBearer" = [])),
    tag = "Keys"
)]
pub async fn create_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiKeyItem>), AppError> {
    let claims = authenticate(&state, &headers)?;
    let Json(req) = payload?;
    let storage = state.require_storage()?;
    let name = sanitize_name(req.name.as_deref())?;

    if storage.list_active_api_keys(&claims.sub).await?.len() >= MAX_ACTIVE_KEYS {
        return Err(AppError::Validation(format!(
            "最多只能持有 {MAX_ACTIVE_KEYS} 个有效 Key"
        )));
    }
    ensure_plan(storage, &claims.sub, state.config.quota.default_monthly_limit).await?;

    let now = chrono::Utc::now().timestamp();
    let created = storage
        .create_api_key(&claims.sub, &name, &generate_api_key(), now)
        .await?;
    tracing::info!(target: "ogpix_backend::keys", "创建 API Key user={} key_id={}", claims.sub, created.id);

    Ok((StatusCode::CREATED, Json(to_item(created, 0))))
}

#[utoipa::path(
    delete,
    path = "/keys",
    summary = "停用 API Key",
    request_body = DeleteKeyRequest,
    responses(
        (status = 200, description = "已停用", body = DeleteKeyResponse),
        (status = 401, description = "会话无效", body = crate::error::ProblemDetails, content_type = "application/problem+json"),
        (status = 404, description = "Key 不存在或不属于当前用户", body = crate::error::ProblemDetails, content_type = "application/problem+json")
    ),
    security(("SessionBearer" = [])),
    tag = "Keys"
)]
pub async fn delete_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<DeleteKeyRequest>, JsonRejection>,
) -> Result<Json<DeleteKeyResponse>, AppError> {
    let claims = authenticate(&state, &headers)?;
    let Json(req) = payload?;
    let storage = state.require_storage()?;

    if !storage.deactivate_api_key(&claims.sub, req.key_id.trim()).await? {
        return Err(AppError::NotFound("API Key 不存在".into()));
    }
    tracing::info!(target: "ogpix_backend::keys", "停用 API Key user={} key_id={}", claims.sub, req.key_id);
    Ok(Json(DeleteKeyResponse { success: true }))
}

pub fn create_keys_router() -> Router<AppState> {
    Router::new().route("/keys", get(get_dashboard).post(create_key).delete(delete_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_prefix_and_hex_body() {
        let key = generate_api_key();
        let body = key.strip_prefix(API_KEY_PREFIX).expect("prefix");
        assert_eq!(body.len(), 32);
        assert!(body.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_api_key(), key);
    }

    #[test]
    fn name_defaults_and_length_limit() {
        assert_eq!(sanitize_name(None).unwrap(), "Default");
        assert_eq!(sanitize_name(Some("  CI  ")).unwrap(), "CI");
        assert!(sanitize_name(Some(&"n".repeat(65))).is_err());
    }
}
