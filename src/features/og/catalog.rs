//! 内置主题与模板表。
//!
//! 两张表在编译期确定且不可变；按名称查找永不失败：主题缺省回落到 `dark`，
//! 模板缺省为空覆盖。

use serde::Serialize;

use super::types::{Layout, Pattern};

/// 主题：背景（纯色或 CSS linear-gradient）+ 文字色 + 强调色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeEntry {
    pub name: &'static str,
    pub background: &'static str,
    pub text_color: &'static str,
    pub accent_color: &'static str,
}

/// 模板：对 tag/layout/pattern 的部分覆盖（优先级低于显式参数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemplateEntry {
    pub name: &'static str,
    pub tag: Option<&'static str>,
    pub layout: Option<Layout>,
    pub pattern: Option<Pattern>,
}

pub const DEFAULT_THEME: &str = "dark";

const fn theme(
    name: &'static str,
    background: &'static str,
    text_color: &'static str,
    accent_color: &'static str,
) -> ThemeEntry {
    ThemeEntry {
        name,
        background,
        text_color,
        accent_color,
    }
}

pub static THEMES: &[ThemeEntry] = &[
    theme("dark", "#000000", "#ffffff", "#888888"),
    theme("light", "#ffffff", "#000000", "#666666"),
    theme(
        "gradient",
        "linear-gradient(135deg, #667eea 0%, #764ba2 100%)",
        "#ffffff",
        "#ffffffcc",
    ),
    theme("blue", "#0070f3", "#ffffff", "#ffffffcc"),
    theme("green", "#10b981", "#ffffff", "#ffffffcc"),
    theme("purple", "#8b5cf6", "#ffffff", "#ffffffcc"),
    theme("orange", "#f97316", "#ffffff", "#ffffffcc"),
    theme("pink", "#ec4899", "#ffffff", "#ffffffcc"),
    theme("cyan", "#06b6d4", "#ffffff", "#ffffffcc"),
    theme("slate", "#1e293b", "#f8fafc", "#94a3b8"),
    theme("zinc", "#18181b", "#fafafa", "#71717a"),
    theme(
        "sunset",
        "linear-gradient(135deg, #f97316 0%, #ec4899 100%)",
        "#ffffff",
        "#ffffffcc",
    ),
    theme(
        "ocean",
        "linear-gradient(135deg, #0ea5e9 0%, #8b5cf6 100%)",
        "#ffffff",
        "#ffffffcc",
    ),
    theme(
        "forest",
        "linear-gradient(135deg, #22c55e 0%, #14b8a6 100%)",
        "#ffffff",
        "#ffffffcc",
    ),
    theme(
        "midnight",
        "linear-gradient(135deg, #1e293b 0%, #0f172a 100%)",
        "#f8fafc",
        "#94a3b8",
    ),
];

pub static TEMPLATES: &[TemplateEntry] = &[
    TemplateEntry {
        name: "blog",
        tag: Some("Blog Post"),
        layout: Some(Layout::Left),
        pattern: Some(Pattern::Dots),
    },
    TemplateEntry {
        name: "github",
        tag: Some("Open Source"),
        layout: Some(Layout::Center),
        pattern: Some(Pattern::Grid),
    },
    TemplateEntry {
        name: "product",
        tag: Some("Product"),
        layout: Some(Layout::Center),
        pattern: Some(Pattern::None),
    },
    TemplateEntry {
        name: "event",
        tag: Some("Event"),
        layout: Some(Layout::Center),
        pattern: Some(Pattern::Diagonal),
    },
    TemplateEntry {
        name: "docs",
        tag: Some("Documentation"),
        layout: Some(Layout::Left),
        pattern: Some(Pattern::Grid),
    },
];

/// 按名称查找主题，未知名称回落到 `dark`
pub fn lookup_theme(name: Option<&str>) -> &'static ThemeEntry {
    name.and_then(|n| THEMES.iter().find(|t| t.name == n))
        .unwrap_or(&THEMES[0])
}

/// 按名称查找模板，未知名称返回空覆盖
pub fn lookup_template(name: Option<&str>) -> TemplateEntry {
    name.and_then(|n| TEMPLATES.iter().find(|t| t.name == n))
        .copied()
        .unwrap_or_default()
}

/// 目录接口中的主题项
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThemeInfo {
    pub name: String,
    pub background: String,
    pub text_color: String,
    pub accent_color: String,
}

/// 目录接口中的模板项
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
}

/// 主题与模板目录（供可视化编辑器与文档站使用）
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub default_theme: String,
    pub themes: Vec<ThemeInfo>,
    pub templates: Vec<TemplateInfo>,
}

pub fn catalog() -> CatalogResponse {
    CatalogResponse {
        default_theme: DEFAULT_THEME.to_string(),
        themes: THEMES
            .iter()
            .map(|t| ThemeInfo {
                name: t.name.to_string(),
                background: t.background.to_string(),
                text_color: t.text_color.to_string(),
                accent_color: t.accent_color.to_string(),
            })
            .collect(),
        templates: TEMPLATES
            .iter()
            .map(|t| TemplateInfo {
                name: t.name.to_string(),
                tag: t.tag.map(str::to_string),
                layout: t.layout,
                pattern: t.pattern,
            })
            .collect(),
    }
}
