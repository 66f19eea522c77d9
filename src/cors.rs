use axum::http::{HeaderValue, Method, header};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::CorsConfig;

/// 根据配置构建 CORS 中间件（可视化编辑器与控制台跨域调用 API 时使用）
pub fn build_cors_layer(cors: &CorsConfig) -> Option<CorsLayer> {
    if !cors.enabled {
        return None;
    }

    let (any_origin, origins) = split_wildcard(&cors.allowed_origins, |v| {
        HeaderValue::from_str(v).ok()
    });
    if !any_origin && origins.is_empty() {
        tracing::warn!("CORS 已启用但 allowed_origins 为空，已跳过启用");
        return None;
    }
    let (any_methods, methods) = split_wildcard(&cors.allowed_methods, |v| {
        Method::from_bytes(v.to_ascii_uppercase().as_bytes()).ok()
    });
    let (any_headers, headers) = split_wildcard(&cors.allowed_headers, |v| {
        header::HeaderName::from_bytes(v.to_ascii_lowercase().as_bytes()).ok()
    });

    let mut layer = CorsLayer::new();
    layer = if any_origin {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    };
    layer = if any_methods {
        layer.allow_methods(Any)
    } else if methods.is_empty() {
        layer.allow_methods([Method::GET, Method::POST, Method::DELETE])
    } else {
        layer.allow_methods(methods)
    };
    if any_headers {
        layer = layer.allow_headers(Any);
    } else if !headers.is_empty() {
        layer = layer.allow_headers(headers);
    }
    if let Some(secs) = cors.max_age_secs
        && secs > 0
    {
        layer = layer.max_age(Duration::from_secs(secs));
    }

    Some(layer)
}

/// 拆分 "*" 通配与具体取值；无法解析的值记录告警后忽略。
fn split_wildcard<T>(values: &[String], parse: impl Fn(&str) -> Option<T>) -> (bool, Vec<T>) {
    let mut any = false;
    let mut out = Vec::new();
    for raw in values {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        if value == "*" {
            any = true;
            continue;
        }
        match parse(value) {
            Some(v) => out.push(v),
            None => tracing::warn!("CORS 配置含无效值: {}", value),
        }
    }
    (any, out)
}
