//! 渲染参数解析：清洗后的查询参数 + 模板 + 主题 -> ResolvedConfig。
//!
//! 纯函数，对任何输入都有结果；无法识别的取值一律降级为默认值。
//! 优先级：显式非空参数 > 模板 > 默认值（颜色为 显式 > 主题）。

use super::catalog::{lookup_template, lookup_theme};
use super::sanitize::{
    MAX_AUTHOR_CHARS, MAX_SUBTITLE_CHARS, MAX_TAG_CHARS, MAX_TITLE_CHARS, sanitize,
    sanitize_opt,
};
use super::types::{DEFAULT_TITLE, Layout, Pattern, RenderRequest, ResolvedConfig, non_empty};

/// 全部可能的标题字号（像素）
pub const FONT_SIZES_PX: [u32; 5] = [40, 48, 56, 64, 80];

/// 命名字号；`auto` 及其他取值返回 None
fn named_font_size(raw: &str) -> Option<u32> {
    match raw {
        "sm" => Some(48),
        "md" => Some(56),
        "lg" => Some(64),
        "xl" => Some(80),
        _ => None,
    }
}

/// 按标题长度自动选择字号（阈值为严格大于）。
///
/// 长度按 UTF-16 码元计：emoji 等辅助平面字符计为 2。
pub fn auto_font_size(title: &str) -> u32 {
    match title.encode_utf16().count() {
        n if n > 60 => 40,
        n if n > 40 => 48,
        n if n > 25 => 56,
        _ => 64,
    }
}

pub fn resolve_font_size(font_size: Option<&str>, title: &str) -> u32 {
    font_size
        .and_then(named_font_size)
        .unwrap_or_else(|| auto_font_size(title))
}

/// 水印仅在参数恰为 "false" 时关闭
pub fn watermark_enabled(raw: Option<&str>) -> bool {
    raw != Some("false")
}

pub fn resolve(req: &RenderRequest) -> ResolvedConfig {
    let title = non_empty(&req.title)
        .map(|t| sanitize(t, MAX_TITLE_CHARS))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let subtitle = sanitize_opt(req.subtitle.as_deref(), MAX_SUBTITLE_CHARS);
    let author = sanitize_opt(req.author.as_deref(), MAX_AUTHOR_CHARS);
    let explicit_tag = sanitize_opt(req.tag.as_deref(), MAX_TAG_CHARS);

    let template = lookup_template(non_empty(&req.template));

    let tag = if explicit_tag.is_empty() {
        template.tag.unwrap_or_default().to_string()
    } else {
        explicit_tag
    };
    let layout = non_empty(&req.layout)
        .and_then(Layout::parse)
        .or(template.layout)
        .unwrap_or_default();
    let pattern = non_empty(&req.pattern)
        .and_then(Pattern::parse)
        .or(template.pattern)
        .unwrap_or_default();

    let theme = lookup_theme(non_empty(&req.theme));
    let background_color = non_empty(&req.bg).unwrap_or(theme.background).to_string();
    let text_color = non_empty(&req.text).unwrap_or(theme.text_color).to_string();
    let accent_color = non_empty(&req.accent)
        .unwrap_or(theme.accent_color)
        .to_string();

    let title_font_size_px = resolve_font_size(non_empty(&req.font_size), &title);

    ResolvedConfig {
        title,
        subtitle,
        background_color,
        text_color,
        accent_color,
        title_font_size_px,
        layout,
        pattern,
        tag,
        author,
        logo_url: req.logo.clone().unwrap_or_default(),
        watermark_enabled: watermark_enabled(req.watermark.as_deref()),
    }
}
