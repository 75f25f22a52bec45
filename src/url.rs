//! Deriving output filenames from URLs and response headers.

use std::sync::LazyLock;

use regex::Regex;

/// Filename used when neither the URL nor the server offers one.
pub const FALLBACK_FILENAME: &str = "download";

static DISPOSITION_EXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\*\s*=\s*(?:UTF-8|ISO-8859-1)?'[^']*'([^;\s]+)"#).expect("valid regex")
});

static DISPOSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^;\s]+))"#).expect("valid regex")
});

/// Returns the last path segment of `url`, percent-decoded.
///
/// Query strings and fragments are ignored. Returns `None` for URLs that
/// end in `/` or have no path.
#[must_use]
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let after_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let (_, path) = after_scheme.split_once('/')?;
    let segment = path.rsplit('/').next()?;
    let decoded = urlencoding::decode(segment)
        .map_or_else(|_| segment.to_string(), std::borrow::Cow::into_owned);
    sanitize_filename(&decoded)
}

/// Extracts the filename from a `Content-Disposition` header value.
///
/// The RFC 5987 `filename*` form wins over plain `filename` when both are
/// present.
#[must_use]
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    if let Some(caps) = DISPOSITION_EXT_RE.captures(value) {
        let raw = &caps[1];
        if let Ok(decoded) = urlencoding::decode(raw)
            && let Some(name) = sanitize_filename(&decoded)
        {
            return Some(name);
        }
    }
    let caps = DISPOSITION_RE.captures(value)?;
    let raw = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().replace("\\\"", "\""))?;
    sanitize_filename(&raw)
}

/// Strips directory components so a remote name cannot escape the output
/// directory. Returns `None` if nothing usable remains.
#[must_use]
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .trim_matches('\0');
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}
