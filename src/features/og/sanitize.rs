//! 自由文本字段清洗。
//!
//! 只是拒绝名单过滤（去掉 `<` 与 `>`），不是完整的 HTML 清洗；渲染时另行做 XML 转义。
//! 顺序固定为：截断 -> 去除尖括号 -> 去首尾空白。

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_SUBTITLE_CHARS: usize = 300;
pub const MAX_TAG_CHARS: usize = 40;
pub const MAX_AUTHOR_CHARS: usize = 80;

/// 按字符数截断后去除 `<`/`>` 并 trim。
///
/// 截断发生在去除之前，因此边界上的尖括号被移除后结果可能短于 `max_chars`。
pub fn sanitize(input: &str, max_chars: usize) -> String {
    let truncated: String = input.chars().take(max_chars).collect();
    let stripped: String = truncated.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    stripped.trim().to_string()
}

/// 对可选字段做清洗，缺省视为空串
pub fn sanitize_opt(input: Option<&str>, max_chars: usize) -> String {
    input.map(|s| sanitize(s, max_chars)).unwrap_or_default()
}
