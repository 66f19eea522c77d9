//! OG 图合成与栅格化。
//!
//! ResolvedConfig -> SVG 字符串 -> resvg 栅格化 -> PNG。
//! 画面结构：背景（纯色或线性渐变）、可选纹理、内容栈（tag / logo / 标题 / 副标题 / 作者）、右下角水印。

use once_cell::sync::Lazy;
use resvg::render;
use resvg::usvg::{self, Options as UsvgOptions, fontdb};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::{Pixmap, Transform};
use unicode_width::UnicodeWidthChar;

use super::types::{Layout, OG_HEIGHT, OG_WIDTH, Pattern, ResolvedConfig};
use crate::config::{BrandingConfig, ImageRenderConfig};
use crate::error::AppError;

const FONT_FAMILY: &str = "Inter, Noto Sans SC, Noto Sans CJK SC, sans-serif";
const PADDING: f32 = 60.0;

const TAG_FONT_PX: f32 = 18.0;
const TAG_GAP: f32 = 16.0;
const LOGO_SIZE: f32 = 60.0;
const LOGO_GAP: f32 = 24.0;
const TITLE_MAX_WIDTH: f32 = 1000.0;
const TITLE_LINE_HEIGHT: f32 = 1.2;
const SUBTITLE_FONT_PX: f32 = 28.0;
const SUBTITLE_MAX_WIDTH: f32 = 800.0;
const SUBTITLE_LINE_HEIGHT: f32 = 1.4;
const SUBTITLE_GAP: f32 = 20.0;
const AUTHOR_FONT_PX: f32 = 20.0;
const AUTHOR_GAP: f32 = 24.0;
const WATERMARK_FONT_PX: f32 = 16.0;

/// 半角字符的平均字宽（相对字号）
const HALF_WIDTH_EM: f32 = 0.55;

static HEX_COLOR: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"^#?([0-9a-fA-F]{3}|[0-9a-fA-F]{4}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$")
        .expect("valid hex color regex")
});
static NAMED_COLOR: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^[a-zA-Z]{3,20}$").expect("valid named color regex"));

/// OG 图渲染器：持有字体库与渲染参数，可跨线程共享
pub struct OgRenderer {
    font_db: Arc<fontdb::Database>,
    optimize_speed: bool,
    watermark_text: String,
}

impl OgRenderer {
    pub fn new(image: &ImageRenderConfig, branding: &BrandingConfig) -> Self {
        Self {
            font_db: Arc::new(load_font_db(image)),
            optimize_speed: image.optimize_speed,
            watermark_text: branding.watermark_text.clone(),
        }
    }

    /// 构建 SVG 合成。`logo_data_uri` 为已下载并内嵌的 logo（data URI）
    pub fn compose_svg(&self, cfg: &ResolvedConfig, logo_data_uri: Option<&str>) -> String {
        let w = OG_WIDTH as f32;
        let h = OG_HEIGHT as f32;
        let text_color = safe_color(&cfg.text_color, "#ffffff");
        let accent_color = safe_color(&cfg.accent_color, "#888888");

        let mut svg = String::with_capacity(4096);
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="{FONT_FAMILY}">"#
        );

        // 背景
        let mut defs = String::new();
        let bg_fill = match parse_linear_gradient(&cfg.background_color) {
            Some(gradient) => {
                defs.push_str(&gradient.to_svg_def("bg-gradient"));
                "url(#bg-gradient)".to_string()
            }
            None => safe_color(&cfg.background_color, "#000000"),
        };
        if let Some(def) = pattern_def(cfg.pattern, &text_color) {
            defs.push_str(&def);
        }

        // 内容栈：先量高度，再按布局定位
        let center = cfg.layout == Layout::Center;
        let tag_upper = cfg.tag.to_uppercase();
        let title_px = cfg.title_font_size_px as f32;
        let title_lines = wrap_text(&cfg.title, title_px, TITLE_MAX_WIDTH);
        let subtitle_lines = wrap_text(&cfg.subtitle, SUBTITLE_FONT_PX, SUBTITLE_MAX_WIDTH);

        let mut total = title_lines.len() as f32 * title_px * TITLE_LINE_HEIGHT;
        if !tag_upper.is_empty() {
            total += TAG_FONT_PX * TITLE_LINE_HEIGHT + TAG_GAP;
        }
        if logo_data_uri.is_some() {
            total += LOGO_SIZE + LOGO_GAP;
        }
        if !subtitle_lines.is_empty() {
            total += SUBTITLE_GAP
                + subtitle_lines.len() as f32 * SUBTITLE_FONT_PX * SUBTITLE_LINE_HEIGHT;
        }
        if !cfg.author.is_empty() {
            total += AUTHOR_GAP + AUTHOR_FONT_PX * TITLE_LINE_HEIGHT;
        }

        let mut y = if center {
            (h - total) / 2.0
        } else {
            h - PADDING - total
        };
        let (x, anchor) = if center {
            (w / 2.0, "middle")
        } else {
            (PADDING, "start")
        };

        let mut body = String::new();
        if !tag_upper.is_empty() {
            push_text_line(
                &mut body,
                &tag_upper,
                x,
                y,
                TAG_FONT_PX,
                TITLE_LINE_HEIGHT,
                anchor,
                &accent_color,
                r#" font-weight="500" letter-spacing="2""#,
            );
            y += TAG_FONT_PX * TITLE_LINE_HEIGHT + TAG_GAP;
        }
        if let Some(uri) = logo_data_uri {
            let logo_x = if center { x - LOGO_SIZE / 2.0 } else { x };
            let _ = write!(
                defs,
                r#"<clipPath id="logo-clip"><rect x="{logo_x:.1}" y="{y:.1}" width="{LOGO_SIZE}" height="{LOGO_SIZE}" rx="12"/></clipPath>"#
            );
            let _ = write!(
                body,
                r#"<image xlink:href="{}" x="{logo_x:.1}" y="{y:.1}" width="{LOGO_SIZE}" height="{LOGO_SIZE}" preserveAspectRatio="xMidYMid slice" clip-path="url(#logo-clip)"/>"#,
                escape_xml(uri)
            );
            y += LOGO_SIZE + LOGO_GAP;
        }
        for line in &title_lines {
            push_text_line(
                &mut body,
                line,
                x,
                y,
                title_px,
                TITLE_LINE_HEIGHT,
                anchor,
                &text_color,
                r#" font-weight="700""#,
            );
            y += title_px * TITLE_LINE_HEIGHT;
        }
        if !subtitle_lines.is_empty() {
            y += SUBTITLE_GAP;
            for line in &subtitle_lines {
                push_text_line(
                    &mut body,
                    line,
                    x,
                    y,
                    SUBTITLE_FONT_PX,
                    SUBTITLE_LINE_HEIGHT,
                    anchor,
                    &accent_color,
                    "",
                );
                y += SUBTITLE_FONT_PX * SUBTITLE_LINE_HEIGHT;
            }
        }
        if !cfg.author.is_empty() {
            y += AUTHOR_GAP;
            push_text_line(
                &mut body,
                &format!("by {}", cfg.author),
                x,
                y,
                AUTHOR_FONT_PX,
                TITLE_LINE_HEIGHT,
                anchor,
                &accent_color,
                "",
            );
        }

        if !defs.is_empty() {
            let _ = write!(svg, "<defs>{defs}</defs>");
        }
        let _ = write!(svg, r#"<rect width="{w}" height="{h}" fill="{bg_fill}"/>"#);
        if cfg.pattern != Pattern::None {
            let _ = write!(
                svg,
                r#"<rect width="{w}" height="{h}" fill="url(#bg-pattern)"/>"#
            );
        }
        svg.push_str(&body);

        if cfg.watermark_enabled && !self.watermark_text.is_empty() {
            let _ = write!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" font-size="{WATERMARK_FONT_PX}" fill="{accent_color}" fill-opacity="0.6" text-anchor="end">{}</text>"#,
                w - PADDING,
                h - 40.0,
                escape_xml(&self.watermark_text)
            );
        }

        svg.push_str("</svg>");
        svg
    }

    /// SVG -> PNG（同步，CPU 密集）
    pub fn render_png(&self, svg_data: &str) -> Result<Vec<u8>, AppError> {
        let t0 = std::time::Instant::now();
        let speed = self.optimize_speed;
        let opts = UsvgOptions {
            fontdb: self.font_db.clone(),
            font_family: "Inter".to_string(),
            languages: vec!["en".to_string(), "zh-CN".to_string()],
            shape_rendering: if speed {
                usvg::ShapeRendering::OptimizeSpeed
            } else {
                usvg::ShapeRendering::GeometricPrecision
            },
            text_rendering: if speed {
                usvg::TextRendering::OptimizeSpeed
            } else {
                usvg::TextRendering::OptimizeLegibility
            },
            image_rendering: if speed {
                usvg::ImageRendering::OptimizeSpeed
            } else {
                usvg::ImageRendering::OptimizeQuality
            },
            ..Default::default()
        };

        let tree = usvg::Tree::from_data(svg_data.as_bytes(), &opts)
            .map_err(|e| AppError::ImageRendererError(format!("Failed to parse SVG: {e}")))?;
        let size = tree.size().to_int_size();
        let mut pixmap = Pixmap::new(size.width(), size.height())
            .ok_or_else(|| AppError::ImageRendererError("Failed to create pixmap".to_string()))?;
        render(&tree, Transform::default(), &mut pixmap.as_mut());
        let t_raster = t0.elapsed();

        let mut out = Vec::with_capacity((size.width() * size.height()) as usize);
        {
            let mut encoder = png::Encoder::new(&mut out, size.width(), size.height());
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            if speed {
                encoder.set_compression(png::Compression::Fast);
                encoder.set_filter(png::FilterType::NoFilter);
            } else {
                encoder.set_compression(png::Compression::Default);
                encoder.set_filter(png::FilterType::Paeth);
            }
            let mut writer = encoder
                .write_header()
                .map_err(|e| AppError::ImageRendererError(format!("PNG write_header error: {e}")))?;
            writer
                .write_image_data(pixmap.data())
                .map_err(|e| AppError::ImageRendererError(format!("PNG write error: {e}")))?;
            writer
                .finish()
                .map_err(|e| AppError::ImageRendererError(format!("PNG finish error: {e}")))?;
        }

        tracing::debug!(
            target: "ogpix_backend::og",
            "OG 渲染耗时: 栅格化={:?}, 总计={:?}, 大小={}B",
            t_raster,
            t0.elapsed(),
            out.len()
        );
        Ok(out)
    }

    /// 在阻塞线程池中合成并栅格化
    pub async fn render(
        self: Arc<Self>,
        cfg: ResolvedConfig,
        logo_data_uri: Option<String>,
    ) -> Result<Vec<u8>, AppError> {
        tokio::task::spawn_blocking(move || {
            let svg = self.compose_svg(&cfg, logo_data_uri.as_deref());
            self.render_png(&svg)
        })
        .await
        .map_err(|e| AppError::ImageRendererError(format!("渲染任务失败: {e}")))?
    }
}

fn load_font_db(image: &ImageRenderConfig) -> fontdb::Database {
    let mut font_db = fontdb::Database::new();
    if image.load_system_fonts {
        font_db.load_system_fonts();
    }
    let dir = Path::new(&image.fonts_dir);
    if dir.is_dir() {
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for path in entries.flatten().map(|e| e.path()) {
                    let is_font = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"));
                    if is_font && let Err(e) = font_db.load_font_file(&path) {
                        tracing::error!("加载字体文件失败 '{}': {}", path.display(), e);
                    }
                }
            }
            Err(e) => tracing::warn!("读取字体目录失败 '{}': {}", dir.display(), e),
        }
    }
    tracing::info!("字体库已加载: {} 个字体", font_db.len());
    font_db
}

#[allow(clippy::too_many_arguments)]
fn push_text_line(
    out: &mut String,
    text: &str,
    x: f32,
    line_top: f32,
    font_px: f32,
    line_height: f32,
    anchor: &str,
    fill: &str,
    extra_attrs: &str,
) {
    // 基线位于行盒内字形的大致下沿
    let baseline = line_top + font_px * (line_height - 1.0) / 2.0 + font_px * 0.8;
    let _ = write!(
        out,
        r#"<text x="{x:.1}" y="{baseline:.1}" font-size="{font_px}" fill="{fill}" text-anchor="{anchor}"{extra_attrs}>{}</text>"#,
        escape_xml(text)
    );
}

/// 估算文本渲染宽度（像素）：按 unicode 显示宽度折算
fn text_width(text: &str, font_px: f32) -> f32 {
    text.chars()
        .map(|c| c.width().unwrap_or(0) as f32 * HALF_WIDTH_EM * font_px)
        .sum()
}

/// 按最大宽度折行：优先在空白处断开，过长的单词（含 CJK 连续文本）按字符断开
pub fn wrap_text(text: &str, font_px: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if text_width(&candidate, font_px) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        // 单词本身放不下一行时逐字符切分
        for ch in word.chars() {
            let mut next = current.clone();
            next.push(ch);
            if !current.is_empty() && text_width(&next, font_px) > max_width {
                lines.push(std::mem::take(&mut current));
                current.push(ch);
            } else {
                current = next;
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// 颜色值白名单：十六进制（可省略 #）或纯字母的颜色名，否则使用 fallback
pub fn safe_color(raw: &str, fallback: &str) -> String {
    let raw = raw.trim();
    if HEX_COLOR.is_match(raw) {
        if raw.starts_with('#') {
            raw.to_string()
        } else {
            format!("#{raw}")
        }
    } else if NAMED_COLOR.is_match(raw) {
        raw.to_ascii_lowercase()
    } else {
        fallback.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearGradient {
    pub angle_deg: f32,
    pub stops: Vec<(String, f32)>,
}

impl LinearGradient {
    /// 转为 objectBoundingBox 坐标下的 SVG linearGradient（CSS 0deg 指向上方，顺时针）
    fn to_svg_def(&self, id: &str) -> String {
        let rad = self.angle_deg.to_radians();
        let (dx, dy) = (rad.sin(), -rad.cos());
        let (x1, y1) = (0.5 - dx / 2.0, 0.5 - dy / 2.0);
        let (x2, y2) = (0.5 + dx / 2.0, 0.5 + dy / 2.0);
        let mut def = format!(
            r#"<linearGradient id="{id}" x1="{x1:.4}" y1="{y1:.4}" x2="{x2:.4}" y2="{y2:.4}">"#
        );
        for (color, offset) in &self.stops {
            let _ = write!(def, r#"<stop offset="{offset:.4}" stop-color="{color}"/>"#);
        }
        def.push_str("</linearGradient>");
        def
    }
}

/// 解析 `linear-gradient(<angle>deg, <color> [<pct>%], ...)`；非渐变或无法解析时返回 None
pub fn parse_linear_gradient(raw: &str) -> Option<LinearGradient> {
    let inner = raw
        .trim()
        .strip_prefix("linear-gradient(")?
        .strip_suffix(')')?;
    let mut parts = inner.split(',').map(str::trim).peekable();

    let mut angle_deg = 180.0;
    if let Some(deg) = parts.peek().copied().and_then(|p| p.strip_suffix("deg")) {
        angle_deg = deg.trim().parse().ok()?;
        parts.next();
    }

    let raw_stops: Vec<(&str, Option<f32>)> = parts
        .map(|stop| {
            let mut it = stop.split_whitespace();
            let color = it.next().unwrap_or_default();
            let offset = it
                .next()
                .and_then(|p| p.strip_suffix('%'))
                .and_then(|p| p.parse::<f32>().ok())
                .map(|p| (p / 100.0).clamp(0.0, 1.0));
            (color, offset)
        })
        .collect();
    if raw_stops.len() < 2 {
        return None;
    }

    let last = (raw_stops.len() - 1) as f32;
    let stops = raw_stops
        .iter()
        .enumerate()
        .map(|(i, (color, offset))| {
            (
                safe_color(color, "#000000"),
                offset.unwrap_or(i as f32 / last),
            )
        })
        .collect();
    Some(LinearGradient { angle_deg, stops })
}

fn pattern_def(pattern: Pattern, color: &str) -> Option<String> {
    let def = match pattern {
        Pattern::None => return None,
        Pattern::Dots => format!(
            r#"<pattern id="bg-pattern" width="20" height="20" patternUnits="userSpaceOnUse"><circle cx="10" cy="10" r="1.5" fill="{color}" fill-opacity="0.3"/></pattern>"#
        ),
        Pattern::Grid => format!(
            r#"<pattern id="bg-pattern" width="40" height="40" patternUnits="userSpaceOnUse"><path d="M 40 0 L 0 0 0 40" fill="none" stroke="{color}" stroke-width="1" stroke-opacity="0.1"/></pattern>"#
        ),
        Pattern::Diagonal => format!(
            r#"<pattern id="bg-pattern" width="10" height="10" patternUnits="userSpaceOnUse"><path d="M-1,1 l2,-2 M0,10 l10,-10 M9,11 l2,-2" stroke="{color}" stroke-width="1" stroke-opacity="0.1"/></pattern>"#
        ),
    };
    Some(def)
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::og::resolver::resolve;
    use crate::features::og::types::RenderRequest;

    fn renderer() -> OgRenderer {
        let image = ImageRenderConfig {
            load_system_fonts: false,
            optimize_speed: true,
            ..ImageRenderConfig::default()
        };
        OgRenderer::new(&image, &BrandingConfig::default())
    }

    fn cfg(req: RenderRequest) -> ResolvedConfig {
        resolve(&req)
    }

    #[test]
    fn parses_theme_gradients() {
        let g = parse_linear_gradient("linear-gradient(135deg, #667eea 0%, #764ba2 100%)")
            .expect("gradient");
        assert_eq!(g.angle_deg, 135.0);
        assert_eq!(
            g.stops,
            vec![("#667eea".to_string(), 0.0), ("#764ba2".to_string(), 1.0)]
        );
        assert!(parse_linear_gradient("#000000").is_none());
        assert!(parse_linear_gradient("linear-gradient(90deg, #fff)").is_none());
    }

    #[test]
    fn gradient_without_angle_or_offsets_is_spread_evenly() {
        let g = parse_linear_gradient("linear-gradient(red, #00f, green)").expect("gradient");
        assert_eq!(g.angle_deg, 180.0);
        let offsets: Vec<f32> = g.stops.iter().map(|s| s.1).collect();
        assert_eq!(offsets, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn unsafe_colors_fall_back() {
        assert_eq!(safe_color("#ABC", "#000"), "#ABC");
        assert_eq!(safe_color("ff0000", "#000"), "#ff0000");
        assert_eq!(safe_color("#ffffffcc", "#000"), "#ffffffcc");
        assert_eq!(safe_color("Teal", "#000"), "teal");
        assert_eq!(safe_color("red\" onload=\"x", "#000"), "#000");
        assert_eq!(safe_color("#12345", "#000"), "#000");
    }

    #[test]
    fn wraps_on_whitespace_and_long_runs() {
        let lines = wrap_text("hello world", 64.0, 1000.0);
        assert_eq!(lines, vec!["hello world"]);

        let long = "word ".repeat(60);
        let lines = wrap_text(&long, 64.0, 1000.0);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| text_width(l, 64.0) <= 1000.0));

        let cjk = "汉".repeat(40);
        let lines = wrap_text(&cjk, 64.0, 1000.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat(), cjk);
    }

    #[test]
    fn svg_escapes_text_and_hides_disabled_watermark() {
        let r = renderer();
        let svg = r.compose_svg(
            &cfg(RenderRequest {
                title: Some("Tom & \"Jerry\"".into()),
                watermark: Some("false".into()),
                ..RenderRequest::default()
            }),
            None,
        );
        assert!(svg.contains("Tom &amp; &quot;Jerry&quot;"));
        assert!(!svg.contains("ogpix.dev"));

        let svg = r.compose_svg(&cfg(RenderRequest::default()), None);
        assert!(svg.contains("ogpix.dev"));
    }

    #[test]
    fn svg_reflects_layout_pattern_and_gradient() {
        let r = renderer();
        let svg = r.compose_svg(
            &cfg(RenderRequest {
                template: Some("blog".into()),
                theme: Some("sunset".into()),
                author: Some("Ann".into()),
                ..RenderRequest::default()
            }),
            Some("data:image/png;base64,AAAA"),
        );
        assert!(svg.contains("url(#bg-gradient)"));
        assert!(svg.contains("url(#bg-pattern)"));
        assert!(svg.contains(r#"text-anchor="start""#));
        assert!(svg.contains("BLOG POST"));
        assert!(svg.contains("by Ann"));
        assert!(svg.contains("logo-clip"));
    }

    #[test]
    fn renders_png_with_og_dimensions() {
        let r = renderer();
        let svg = r.compose_svg(&cfg(RenderRequest::default()), None);
        let png_bytes = r.render_png(&svg).expect("render png");
        assert!(png_bytes.starts_with(b"\x89PNG"));

        let decoder = png::Decoder::new(std::io::Cursor::new(png_bytes));
        let reader = decoder.read_info().expect("png header");
        assert_eq!(reader.info().width, OG_WIDTH);
        assert_eq!(reader.info().height, OG_HEIGHT);
    }
}
