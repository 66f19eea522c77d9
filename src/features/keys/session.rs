//! 控制台会话校验。
//!
//! 会话令牌由外部身份服务签发（HS256），这里只负责验签并取出用户 ID。

use axum::http::{HeaderMap, header};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// 用户 ID
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// 会话校验器（由配置构建，随 AppState 共享）
#[derive(Clone)]
pub struct SessionVerifier {
    key: jsonwebtoken::DecodingKey,
    validation: jsonwebtoken::Validation,
}

impl SessionVerifier {
    /// 未配置 jwt_secret 时返回 None（控制台接口不可用）
    pub fn from_config(cfg: &SessionConfig) -> Option<Self> {
        let secret = cfg
            .jwt_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        match cfg.issuer.as_deref().filter(|s| !s.is_empty()) {
            Some(iss) => validation.set_issuer(&[iss]),
            None => validation.iss = None,
        }
        match cfg.audience.as_deref().filter(|s| !s.is_empty()) {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Some(Self {
            key: jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn decode(&self, token: &str) -> Result<SessionClaims, AppError> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| AppError::Auth(format!("会话无效: {e}")))?;
        if data.claims.sub.trim().is_empty() {
            return Err(AppError::Auth("会话缺少用户标识".into()));
        }
        Ok(data.claims)
    }

    /// 从请求头取 Bearer 令牌并验签
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<SessionClaims, AppError> {
        let token = extract_bearer_token(headers)?;
        self.decode(&token)
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("缺少 Authorization 头".into()))?
        .trim();
    let token = raw
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Authorization 必须使用 Bearer 方案".into()))?
        .trim();
    if token.is_empty() {
        return Err(AppError::Auth("Bearer token 不能为空".into()));
    }
    Ok(token.to_string())
}
