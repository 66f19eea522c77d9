use serde::{Deserialize, Serialize};

/// 画布尺寸（标准 Open Graph）
pub const OG_WIDTH: u32 = 1200;
pub const OG_HEIGHT: u32 = 630;

/// 未提供 title 时的占位标题
pub const DEFAULT_TITLE: &str = "Hello World";

/// 内容布局
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// 水平垂直居中
    #[default]
    Center,
    /// 左对齐，内容贴底
    Left,
}

impl Layout {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "center" => Some(Self::Center),
            "left" => Some(Self::Left),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Left => "left",
        }
    }
}

/// 背景纹理
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    #[default]
    None,
    Dots,
    Grid,
    Diagonal,
}

impl Pattern {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(Self::None),
            "dots" => Some(Self::Dots),
            "grid" => Some(Self::Grid),
            "diagonal" => Some(Self::Diagonal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Dots => "dots",
            Self::Grid => "grid",
            Self::Diagonal => "diagonal",
        }
    }
}

/// `GET /og` 的全部查询参数。
///
/// 字段均为原始字符串：空串与缺省同义，取值合法性由解析器决定。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderRequest {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub theme: Option<String>,
    pub template: Option<String>,
    pub bg: Option<String>,
    pub text: Option<String>,
    pub accent: Option<String>,
    /// 查询参数名为 `fontSize`
    pub font_size: Option<String>,
    pub layout: Option<String>,
    pub pattern: Option<String>,
    pub logo: Option<String>,
    pub tag: Option<String>,
    pub author: Option<String>,
    pub watermark: Option<String>,
    /// API Key（配额追踪）
    pub key: Option<String>,
}

impl RenderRequest {
    /// 解析原始查询串：同名参数以首次出现为准，未知参数忽略。
    pub fn from_query(raw: Option<&str>) -> Self {
        let mut req = Self::default();
        let Some(raw) = raw else {
            return req;
        };
        for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let slot = match name.as_ref() {
                "title" => &mut req.title,
                "subtitle" => &mut req.subtitle,
                "theme" => &mut req.theme,
                "template" => &mut req.template,
                "bg" => &mut req.bg,
                "text" => &mut req.text,
                "accent" => &mut req.accent,
                "fontSize" => &mut req.font_size,
                "layout" => &mut req.layout,
                "pattern" => &mut req.pattern,
                "logo" => &mut req.logo,
                "tag" => &mut req.tag,
                "author" => &mut req.author,
                "watermark" => &mut req.watermark,
                "key" => &mut req.key,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        req
    }
}

/// 合并模板、主题与显式参数后的最终渲染配置。
///
/// 序列化结果同时作为渲染缓存键。
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub title: String,
    pub subtitle: String,
    pub background_color: String,
    pub text_color: String,
    pub accent_color: String,
    pub title_font_size_px: u32,
    pub layout: Layout,
    pub pattern: Pattern,
    pub tag: String,
    pub author: String,
    pub logo_url: String,
    pub watermark_enabled: bool,
}

/// 取非空字符串
pub(crate) fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::RenderRequest;

    #[test]
    fn repeated_parameters_keep_first_value() {
        let req = RenderRequest::from_query(Some("title=a&title=b&theme=ocean&theme=dark"));
        assert_eq!(req.title.as_deref(), Some("a"));
        assert_eq!(req.theme.as_deref(), Some("ocean"));
    }

    #[test]
    fn decodes_percent_and_plus_and_ignores_unknown() {
        let req = RenderRequest::from_query(Some(
            "title=Launch+Day%21&fontSize=xl&bg=%23112233&utm_source=x&subtitle=",
        ));
        assert_eq!(req.title.as_deref(), Some("Launch Day!"));
        assert_eq!(req.font_size.as_deref(), Some("xl"));
        assert_eq!(req.bg.as_deref(), Some("#112233"));
        assert_eq!(req.subtitle.as_deref(), Some(""));
        assert!(req.key.is_none());
    }

    #[test]
    fn missing_query_is_all_defaults() {
        assert_eq!(RenderRequest::from_query(None), RenderRequest::default());
        assert_eq!(RenderRequest::from_query(Some("")), RenderRequest::default());
    }
}
