use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 应用统一错误类型
#[derive(Error, Debug, utoipa::ToSchema)]
pub enum AppError {
    /// 参数校验错误（邮箱格式、Logo 外链等）
    #[error("参数校验错误: {0}")]
    Validation(String),

    /// 认证失败
    #[error("认证失败: {0}")]
    Auth(String),

    /// 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 依赖的后端未配置或不可用
    #[error("服务不可用: {0}")]
    Unavailable(String),

    /// 匿名请求超出固定窗口限流
    #[error("请求过于频繁，请稍后再试")]
    RateLimited {
        /// 建议的重试等待（秒）
        retry_after_secs: u64,
        limit: i64,
    },

    /// API Key 不存在或已停用
    #[error("API Key 无效或已停用")]
    InvalidApiKey,

    /// API Key 月度配额已用尽
    #[error("本月配额已用尽 ({usage}/{limit})")]
    QuotaExceeded {
        usage: i64,
        limit: i64,
        /// 距下个自然月的秒数
        retry_after_secs: u64,
    },

    /// 图像渲染错误
    #[error("图像渲染错误: {0}")]
    ImageRendererError(String),

    /// 持久化层错误
    #[error("存储错误: {0}")]
    Storage(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// RFC7807 风格的错误响应（Problem Details）。
///
/// - 所有 API 错误统一返回结构化 JSON（content-type = application/problem+json）
/// - 限流/配额错误额外携带 usage/limit，调用方据此区分“匿名限流 / Key 无效 / 配额用尽”
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    /// 问题类型（URI）。若无更细分的类型，可使用 about:blank。
    #[serde(rename = "type")]
    #[schema(example = "about:blank")]
    pub type_url: String,

    /// 简短标题，用于概括错误。
    #[schema(example = "Too Many Requests")]
    pub title: String,

    /// HTTP 状态码（与响应 status 一致）。
    #[schema(example = 429)]
    pub status: u16,

    /// 人类可读的详细信息（尽量稳定，不建议依赖解析）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// 稳定的错误码，用于程序化处理。
    #[schema(example = "QUOTA_EXCEEDED")]
    pub code: String,

    /// 可选：请求追踪 ID。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// 可选：当前周期已用量。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<i64>,

    /// 可选：当前周期上限（0 表示 Key 无效）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RateLimited { .. }
            | AppError::InvalidApiKey
            | AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ImageRendererError(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn stable_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Auth(_) => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::InvalidApiKey => "INVALID_API_KEY",
            AppError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            AppError::ImageRendererError(_) => "IMAGE_RENDER_FAILED",
            AppError::Storage(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::TOO_MANY_REQUESTS => "Too Many Requests",
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
    }

    /// 对外展示的 detail：5xx 一律替换为通用文案，真实原因只进日志。
    fn public_detail(&self) -> String {
        match self {
            AppError::ImageRendererError(_) | AppError::Storage(_) | AppError::Internal(_) => {
                tracing::error!(target: "ogpix_backend::error", "请求处理失败: {}", self);
                "服务器内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        }
    }

    /// 限流类错误的 (usage, limit, retry_after)
    fn admission_info(&self) -> Option<(i64, i64, u64)> {
        match self {
            AppError::RateLimited {
                retry_after_secs,
                limit,
            } => Some((*limit, *limit, *retry_after_secs)),
            AppError::InvalidApiKey => Some((0, 0, 0)),
            AppError::QuotaExceeded {
                usage,
                limit,
                retry_after_secs,
            } => Some((*usage, *limit, *retry_after_secs)),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let admission = self.admission_info();

        let problem = ProblemDetails {
            type_url: "about:blank".to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: Some(self.public_detail()),
            code: self.stable_code().to_string(),
            request_id: crate::request_id::current_request_id(),
            usage: admission.map(|(usage, _, _)| usage),
            limit: admission.map(|(_, limit, _)| limit),
        };

        let mut res = Json(problem).into_response();
        *res.status_mut() = status;
        let headers = res.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        // 错误响应禁止被 CDN/浏览器缓存，否则一次 429 会被放大成长期失败
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if let Some((_, _, retry_after)) = admission {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after.max(1)));
        }
        res
    }
}

/// 请求体无法解析为期望的 JSON：统一按参数校验错误返回，不回显反序列化细节
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(target: "ogpix_backend::error", "请求体解析失败: {}", rejection.body_text());
        AppError::Validation("请求体必须是符合接口定义的 JSON 对象".into())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}
