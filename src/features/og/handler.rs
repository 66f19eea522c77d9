use axum::{
    Json, Router,
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use std::time::{Duration, Instant};

use super::catalog::{CatalogResponse, catalog, lookup_theme};
use super::logo_guard::{fetch_logo_data_uri, is_valid_logo_url};
use super::resolver::resolve;
use super::types::{RenderRequest, non_empty};
use crate::error::AppError;
use crate::features::quota::{Admission, admit};
use crate::state::AppState;

/// 成功响应的缓存策略（CDN 可长期缓存，过期后一周内可先返回旧图再后台刷新）
pub const OG_CACHE_CONTROL: &str =
    "public, max-age=86400, s-maxage=86400, stale-while-revalidate=604800";

#[utoipa::path(
    get,
    path = "/og",
    summary = "生成 Open Graph 预览图",
    description = "按模板、主题与显式参数合成 1200x630 PNG。携带 key 时按月度配额计量，否则按客户端 IP 限流。",
    params(
        ("title" = Option<String>, Query, description = "标题，默认 Hello World，最长 200 字符"),
        ("subtitle" = Option<String>, Query, description = "副标题，最长 300 字符"),
        ("theme" = Option<String>, Query, description = "主题名，未知名称回落到 dark"),
        ("template" = Option<String>, Query, description = "模板：blog|github|product|event|docs"),
        ("bg" = Option<String>, Query, description = "背景色，覆盖主题"),
        ("text" = Option<String>, Query, description = "文字色，覆盖主题"),
        ("accent" = Option<String>, Query, description = "强调色，覆盖主题"),
        ("fontSize" = Option<String>, Query, description = "auto|sm|md|lg|xl，默认 auto"),
        ("layout" = Option<String>, Query, description = "center|left，默认 center"),
        ("pattern" = Option<String>, Query, description = "none|dots|grid|diagonal，默认 none"),
        ("logo" = Option<String>, Query, description = "https logo 外链，须在白名单内"),
        ("tag" = Option<String>, Query, description = "顶部标签，最长 40 字符"),
        ("author" = Option<String>, Query, description = "作者，最长 80 字符"),
        ("watermark" = Option<String>, Query, description = "传 false 关闭水印"),
        ("key" = Option<String>, Query, description = "API Key（配额计量）")
    ),
    responses(
        (status = 200, description = "PNG bytes", content_type = "image/png"),
        (status = 400, description = "logo 外链不合法", body = crate::error::ProblemDetails),
        (status = 429, description = "限流/Key 无效/配额用尽", body = crate::error::ProblemDetails),
        (status = 500, description = "Renderer error", body = crate::error::ProblemDetails)
    ),
    tag = "OG"
)]
pub async fn render_og(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, AppError> {
    let req = RenderRequest::from_query(query.as_deref());
    let t_total = Instant::now();
    let label = lookup_theme(non_empty(&req.theme)).name;

    let admission = admit(
        state.rate_limiter.as_ref(),
        &state.tracker,
        &headers,
        req.key.as_deref(),
        Some(label),
    )
    .await?;

    let logo = req.logo.as_deref().unwrap_or_default();
    if !is_valid_logo_url(logo, &state.config.logo.allowed_hosts) {
        return Err(AppError::Validation(
            "logo 必须是白名单主机上的 https 地址".into(),
        ));
    }

    let cfg = resolve(&req);
    let cache_key = serde_json::to_string(&cfg)
        .map_err(|e| AppError::Internal(format!("序列化渲染参数失败: {e}")))?;

    if let Some(cache) = &state.render_cache
        && let Some(png) = cache.get(&cache_key).await
    {
        tracing::debug!(target: "ogpix_backend::og", "OG 缓存命中, 耗时={:?}", t_total.elapsed());
        return Ok(png_response(png));
    }

    let logo_data_uri = if cfg.logo_url.is_empty() {
        None
    } else {
        fetch_logo_data_uri(
            &state.logo_client,
            &cfg.logo_url,
            Duration::from_secs(state.config.logo.fetch_timeout_secs.max(1)),
            state.config.logo.max_bytes,
        )
        .await
    };
    // logo 下载失败的结果不入缓存，下次请求重试
    let cacheable = cfg.logo_url.is_empty() || logo_data_uri.is_some();

    let png = {
        let _permit = state
            .render_semaphore
            .acquire()
            .await
            .map_err(|e| AppError::Internal(format!("获取渲染许可失败: {e}")))?;
        state.renderer.clone().render(cfg, logo_data_uri).await?
    };
    let png = Bytes::from(png);

    if cacheable && let Some(cache) = &state.render_cache {
        cache.insert(cache_key, png.clone()).await;
    }

    match admission {
        Admission::Tracked(d) => tracing::info!(
            target: "ogpix_backend::og",
            "OG 渲染完成 usage={}/{} 耗时={:?}",
            d.usage,
            d.limit,
            t_total.elapsed()
        ),
        Admission::Anonymous => tracing::info!(
            target: "ogpix_backend::og",
            "OG 渲染完成 (匿名) 耗时={:?}",
            t_total.elapsed()
        ),
    }

    Ok(png_response(png))
}

fn png_response(png: Bytes) -> Response {
    let mut res = png.into_response();
    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(OG_CACHE_CONTROL),
    );
    res
}

#[utoipa::path(
    get,
    path = "/og/catalog",
    summary = "主题与模板目录",
    responses((status = 200, description = "全部内置主题与模板", body = CatalogResponse)),
    tag = "OG"
)]
pub async fn get_catalog() -> Json<CatalogResponse> {
    Json(catalog())
}

pub fn create_og_router() -> Router<AppState> {
    Router::new()
        .route("/og", get(render_og))
        .route("/og/catalog", get(get_catalog))
}
