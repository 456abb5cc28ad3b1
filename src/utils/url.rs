//! Endpoint URL helpers for the API backend.

use crate::core::constants::DEFAULT_API_BASE_URL;

/// Environment variable consulted when the config leaves the base URL unset.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Strips trailing slashes so endpoints can be appended without doubling them.
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Joins a base URL and an endpoint path with exactly one slash.
///
/// ```
/// use parley::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.example.com/v1/", "/chat/completions"),
///     "https://api.example.com/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalize_base_url(base_url), endpoint)
}

/// Picks the base URL: explicit config first, then `OPENAI_BASE_URL`, then
/// the public endpoint. Blank values are skipped.
pub fn resolve_base_url(configured: Option<&str>) -> String {
    let from_env = std::env::var(BASE_URL_ENV).ok();
    pick_base_url(configured, from_env.as_deref())
}

/// Parses a model-supplied address for the web fetch tool. Only http and https
/// are accepted; an address without a scheme is treated as https.
pub fn parse_fetch_url(raw: &str) -> Result<reqwest::Url, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("URL must not be empty".to_string());
    }
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = reqwest::Url::parse(&candidate).map_err(|err| format!("invalid URL '{raw}': {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported URL scheme '{other}', use http or https")),
    }
}

fn pick_base_url(configured: Option<&str>, from_env: Option<&str>) -> String {
    [configured, from_env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(normalize_base_url)
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_api_url_avoids_double_slashes() {
        assert_eq!(
            construct_api_url("https://api.example.com/v1", "chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            construct_api_url("https://api.example.com/v1///", "///chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            construct_api_url("http://localhost:8080/", "chat/completions"),
            "http://localhost:8080/chat/completions"
        );
    }

    #[test]
    fn configured_base_url_wins_over_environment() {
        assert_eq!(
            pick_base_url(Some("http://local:1234/v1/"), Some("https://env.example/v1")),
            "http://local:1234/v1"
        );
    }

    #[test]
    fn blank_values_fall_through_to_default() {
        assert_eq!(pick_base_url(Some("  "), None), DEFAULT_API_BASE_URL);
        assert_eq!(
            pick_base_url(None, Some("https://env.example/v1")),
            "https://env.example/v1"
        );
        assert_eq!(pick_base_url(None, None), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn fetch_urls_must_be_http() {
        assert_eq!(
            parse_fetch_url(" http://127.0.0.1:8080/page ").unwrap().as_str(),
            "http://127.0.0.1:8080/page"
        );
        assert_eq!(
            parse_fetch_url("example.com/docs").unwrap().as_str(),
            "https://example.com/docs"
        );
        assert!(parse_fetch_url("file:///etc/passwd")
            .unwrap_err()
            .contains("unsupported URL scheme 'file'"));
        assert!(parse_fetch_url("ftp://example.com").is_err());
        assert!(parse_fetch_url("   ").is_err());
        assert!(parse_fetch_url("http://").is_err());
    }
}
