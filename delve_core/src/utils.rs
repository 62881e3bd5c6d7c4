use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";

static HORIZONTAL_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{00A0}\u{2000}-\u{200B}\u{3000}]+").expect("valid regex"));

/// Parse a web URL, tolerating inputs without a scheme. Schemes other than
/// http(s) yield `None`.
pub fn parse_url_lenient(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("https://{}", trimmed)).ok()?
        }
        Err(_) => return None,
    };
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Host without a leading `www.`, lowercased.
pub fn source_domain(raw: &str) -> String {
    parse_url_lenient(raw)
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|h| h.strip_prefix("www.").map(str::to_string).unwrap_or(h))
        .unwrap_or_default()
}

/// Normalize a URL for duplicate detection.
///
/// Scheme, a leading `www.`, the fragment, default ports and a trailing slash
/// are ignored; the host is lowercased; path and query are kept verbatim.
pub fn normalize_url(raw: &str) -> String {
    let Some(url) = parse_url_lenient(raw) else {
        return raw.trim().to_lowercase();
    };
    let host = source_domain(url.as_str());
    let mut key = host;
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    let path = url.path().trim_end_matches('/');
    key.push_str(path);
    if let Some(query) = url.query() {
        if !query.is_empty() {
            key.push('?');
            key.push_str(query);
        }
    }
    key
}

pub fn strip_multiple_newlines(text: &str) -> String {
    let mut result = String::new();
    let mut consecutive_newlines = 0;

    for line in text.lines() {
        if line.trim().is_empty() {
            consecutive_newlines += 1;
            if consecutive_newlines <= 1 && !result.is_empty() {
                result.push('\n');
            }
        } else {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(line.trim());
            consecutive_newlines = 0;
        }
    }

    result.trim_end().to_string()
}

/// Decode entities once. Only for raw strings; parsed DOM text is already decoded.
pub fn clean_html_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Drop control characters except newlines; tabs become spaces.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\n' => Some('\n'),
            '\t' => Some(' '),
            '\r' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

/// Collapse runs of horizontal whitespace to one space and runs of blank lines to one.
pub fn collapse_whitespace(text: &str) -> String {
    let collapsed = HORIZONTAL_WS.replace_all(text, " ");
    strip_multiple_newlines(&collapsed)
}

/// Truncate to at most `max_chars` characters, marker included.
pub fn truncate_with_marker(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker_len = marker.chars().count();
    if max_chars <= marker_len {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - marker_len).collect();
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out.push_str(marker);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_ignores_scheme_www_and_trailing_slash() {
        let a = normalize_url("https://www.Example.com/news/article/");
        let b = normalize_url("http://example.com/news/article");
        let c = normalize_url("example.com/news/article#comments");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a, "example.com/news/article");
    }

    #[test]
    fn scheme_case_does_not_change_the_key() {
        assert_eq!(
            normalize_url("HTTPS://www.example.com/news"),
            normalize_url("https://example.com/news")
        );
        assert_eq!(normalize_url("Http://Example.com/news"), "example.com/news");
        assert_eq!(source_domain("HTTPS://www.example.com/news"), "example.com");
    }

    #[test]
    fn non_web_schemes_are_rejected() {
        assert!(parse_url_lenient("ftp://example.com/x").is_none());
        assert!(parse_url_lenient("mailto:someone@example.com").is_none());
        assert_eq!(source_domain("ftp://example.com/x"), "");
        assert_eq!(normalize_url("FTP://example.com/x"), "ftp://example.com/x");
        assert!(parse_url_lenient("example.com/x").is_some());
    }

    #[test]
    fn normalize_keeps_query() {
        assert_ne!(
            normalize_url("https://example.com/a?id=1"),
            normalize_url("https://example.com/a?id=2")
        );
    }

    #[test]
    fn domain_strips_www() {
        assert_eq!(source_domain("https://www.reuters.com/markets"), "reuters.com");
        assert_eq!(source_domain("https://blog.rust-lang.org/"), "blog.rust-lang.org");
        assert_eq!(source_domain(""), "");
    }

    #[test]
    fn truncation_respects_limit() {
        let text = "a".repeat(50);
        let out = truncate_with_marker(&text, 20, " [truncated]");
        assert_eq!(out.chars().count(), 20);
        assert!(out.ends_with(" [truncated]"));
        assert_eq!(truncate_with_marker("short", 20, " [truncated]"), "short");
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let text = "é".repeat(30);
        let out = truncate_with_marker(&text, 15, "…");
        assert_eq!(out.chars().count(), 15);
    }

    #[test]
    fn whitespace_and_controls() {
        let raw = "Hello \t\t world\u{0007}\n\n\n\nNext   line\r\n";
        let cleaned = collapse_whitespace(&strip_control_chars(raw));
        assert_eq!(cleaned, "Hello world\n\nNext line");
    }

    #[test]
    fn entities_decode_a_single_level() {
        assert_eq!(clean_html_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(clean_html_entities("&amp;lt;b&amp;gt;"), "&lt;b&gt;");
    }
}
