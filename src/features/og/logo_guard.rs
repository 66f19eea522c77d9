//! Logo 外链校验（SSRF 防护）与下载。
//!
//! 校验规则按顺序执行，任一失败即拒绝：
//! 1. 可解析为 URL
//! 2. scheme 必须为 `https`
//! 3. 主机不得为本机或内网字面量（`localhost`、`127.0.0.1`、`192.168.`/`10.`/`172.` 前缀、`.local`/`.internal` 后缀）
//! 4. 主机必须等于白名单中的某一项，或为其子域（按 `.` 边界匹配）
//!
//! `172.` 为文本前缀匹配，会误拦 172.16.0.0/12 以外的公网段；这是既有行为，保持不变。

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use std::time::Duration;
use url::Url;

const BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1"];
const BLOCKED_PREFIXES: &[&str] = &["192.168.", "10.", "172."];
const BLOCKED_SUFFIXES: &[&str] = &[".local", ".internal"];

/// 判断 logo 外链是否允许嵌入。空串表示“不使用 logo”，视为合法。
pub fn is_valid_logo_url(candidate: &str, allowed_hosts: &[String]) -> bool {
    if candidate.is_empty() {
        return true;
    }
    let Ok(url) = Url::parse(candidate) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();

    if BLOCKED_HOSTS.contains(&host.as_str())
        || BLOCKED_PREFIXES.iter().any(|p| host.starts_with(p))
        || BLOCKED_SUFFIXES.iter().any(|s| host.ends_with(s))
    {
        return false;
    }

    allowed_hosts.iter().any(|allowed| {
        let allowed = allowed.trim().to_ascii_lowercase();
        !allowed.is_empty()
            && (host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|rest| rest.ends_with('.')))
    })
}

/// 根据魔数判断图片 MIME，无法识别时返回 None
pub fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG") {
        Some("image/png")
    } else if bytes.starts_with(b"\xFF\xD8\xFF") {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP") {
        Some("image/webp")
    } else {
        None
    }
}

/// 下载已通过校验的 logo，并转为 data URI 供 SVG 内嵌。
///
/// 客户端禁止重定向，避免白名单主机 302 到内网地址。任何失败都返回 None，
/// 由调用方降级为无 logo 渲染。
pub async fn fetch_logo_data_uri(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    max_bytes: usize,
) -> Option<String> {
    let mut resp = match client.get(url).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(target: "ogpix_backend::og", "logo 下载失败 url={url}: {e}");
            return None;
        }
    };
    if !resp.status().is_success() {
        tracing::warn!(
            target: "ogpix_backend::og",
            "logo 下载返回非成功状态 url={url} status={}",
            resp.status()
        );
        return None;
    }
    if resp
        .content_length()
        .is_some_and(|len| len > max_bytes as u64)
    {
        tracing::warn!(target: "ogpix_backend::og", "logo 体积超限 url={url}");
        return None;
    }

    let mut body: Vec<u8> = Vec::new();
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                if body.len() + chunk.len() > max_bytes {
                    tracing::warn!(target: "ogpix_backend::og", "logo 体积超限 url={url}");
                    return None;
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(target: "ogpix_backend::og", "logo 读取失败 url={url}: {e}");
                return None;
            }
        }
    }

    let Some(mime) = detect_image_mime(&body) else {
        tracing::warn!(target: "ogpix_backend::og", "logo 不是可识别的图片格式 url={url}");
        return None;
    };
    Some(format!("data:{mime};base64,{}", BASE64.encode(&body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogoConfig;

    fn hosts() -> Vec<String> {
        LogoConfig::default().allowed_hosts
    }

    #[test]
    fn empty_url_means_no_logo() {
        assert!(is_valid_logo_url("", &hosts()));
    }

    #[test]
    fn requires_https() {
        assert!(!is_valid_logo_url(
            "http://avatars.githubusercontent.com/x",
            &hosts()
        ));
        assert!(!is_valid_logo_url("ftp://github.com/logo.png", &hosts()));
    }

    #[test]
    fn rejects_hosts_outside_allow_list() {
        assert!(!is_valid_logo_url("https://evil.com/x", &hosts()));
        // 后缀相同但不在 `.` 边界上
        assert!(!is_valid_logo_url("https://evilgithub.com/x", &hosts()));
        assert!(!is_valid_logo_url("https://github.com.evil.com/x", &hosts()));
    }

    #[test]
    fn accepts_allow_listed_hosts_and_subdomains() {
        assert!(is_valid_logo_url(
            "https://avatars.githubusercontent.com/u/1",
            &hosts()
        ));
        assert!(is_valid_logo_url("https://GitHub.com/logo.png", &hosts()));
        assert!(is_valid_logo_url("https://www.gravatar.com/avatar/abc", &hosts()));
    }

    #[test]
    fn rejects_private_and_local_hosts() {
        assert!(!is_valid_logo_url("https://10.0.0.5/x", &hosts()));
        assert!(!is_valid_logo_url("https://localhost/x", &hosts()));
        assert!(!is_valid_logo_url("https://127.0.0.1/x", &hosts()));
        assert!(!is_valid_logo_url("https://192.168.1.1/x", &hosts()));
        assert!(!is_valid_logo_url("https://printer.local/x", &hosts()));
        assert!(!is_valid_logo_url("https://svc.internal/x", &hosts()));
    }

    #[test]
    fn blocked_prefix_wins_over_allow_list() {
        let allowed = vec!["172.20.0.1".to_string(), "172.64.1.1".to_string()];
        assert!(!is_valid_logo_url("https://172.20.0.1/x", &allowed));
        // 文本前缀匹配同样拦截公网的 172.64.x.x
        assert!(!is_valid_logo_url("https://172.64.1.1/x", &allowed));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(!is_valid_logo_url("not a url", &hosts()));
        assert!(!is_valid_logo_url("https://", &hosts()));
    }

    #[test]
    fn detects_common_image_formats() {
        assert_eq!(detect_image_mime(b"\x89PNG\r\n"), Some("image/png"));
        assert_eq!(detect_image_mime(b"\xFF\xD8\xFF\xE0"), Some("image/jpeg"));
        assert_eq!(detect_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(detect_image_mime(b"<svg"), None);
    }
}
