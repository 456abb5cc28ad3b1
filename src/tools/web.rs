//! Read-only web fetching for the model.
//!
//! HTML pages are reduced to markdown (or plain text) with a handful of
//! regex passes; other text bodies are returned as they are.

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::{Captures, Regex};
use serde_json::json;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use super::{str_arg, ToolArgs, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};
use crate::core::constants::{MAX_FETCH_BYTES, MAX_READ_CHARS};
use crate::utils::url::parse_fetch_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    Markdown,
    Text,
}

impl PageFormat {
    fn parse(raw: Option<&str>) -> Result<Self, ToolError> {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("markdown") | Some("md") => Ok(PageFormat::Markdown),
            Some("text") | Some("plain") => Ok(PageFormat::Text),
            Some(other) => Err(ToolError::Validation(format!(
                "format must be 'markdown' or 'text', got '{other}'"
            ))),
        }
    }
}

pub fn register(registry: &mut ToolRegistry, timeout: Duration) -> Result<(), ToolError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| ToolError::Execution(format!("cannot build HTTP client: {err}")))?;

    registry.register(ToolDescriptor::new(
        "fetch_url",
        "Fetch a web page over http or https and return its content as markdown or plain text.",
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Address to fetch." },
                "format": { "type": "string", "description": "'markdown' (default) or 'text'." }
            },
            "required": ["url"],
            "additionalProperties": false
        }),
        FetchUrl {
            client,
            max_bytes: MAX_FETCH_BYTES,
        },
    ))
}

struct FetchUrl {
    client: reqwest::Client,
    max_bytes: usize,
}

#[async_trait]
impl ToolHandler for FetchUrl {
    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let raw = str_arg(args, "url")?;
        let format = PageFormat::parse(args.get("format").and_then(|value| value.as_str()))?;
        let url = parse_fetch_url(raw).map_err(ToolError::Validation)?;
        debug!(url = %url, ?format, "Fetching URL");

        let failed = |err: reqwest::Error| ToolError::Execution(format!("Error: fetching {url} failed: {err}"));
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failed)?;

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase().contains("html"));

        let mut body = Vec::new();
        let mut truncated = false;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(failed)?;
            let room = self.max_bytes - body.len();
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&body);
        let is_html = is_html.unwrap_or_else(|| looks_like_html(&text));
        let mut page = if is_html {
            html_to_page(&text, format)
        } else {
            text.trim().to_string()
        };

        if let Some((cut, _)) = page.char_indices().nth(MAX_READ_CHARS) {
            page.truncate(cut);
            truncated = true;
        }
        if truncated {
            page.push_str("\n\n[content truncated]");
        }
        debug!(bytes = body.len(), truncated, "Fetched URL");
        Ok(page)
    }
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.trim_start().chars().take(512).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.contains("<html") || head.contains("<body")
}

static HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<head\b.*?</head>")
        .expect("valid regex")
});
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>").expect("valid regex"));
static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#).expect("valid regex")
});
static STRONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(?:strong|b)\b[^>]*>(.*?)</(?:strong|b)\s*>").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(?:em|i)\b[^>]*>(.*?)</(?:em|i)\s*>").expect("valid regex"));
static CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<code\b[^>]*>(.*?)</code\s*>").expect("valid regex"));
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<li\b[^>]*>").expect("valid regex"));
static BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:p|div|br|hr|ul|ol|tr|table|section|article|header|footer|nav|main|blockquote|pre|h[1-6])\b[^>]*>")
        .expect("valid regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Reduces an HTML document to readable markdown or plain text.
pub fn html_to_page(html: &str, format: PageFormat) -> String {
    let markdown = format == PageFormat::Markdown;
    let text = HIDDEN.replace_all(html, "");
    let text = HEADING.replace_all(&text, |caps: &Captures| {
        let inner = inline_text(&caps[2]);
        if markdown {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("\n\n{} {inner}\n\n", "#".repeat(level))
        } else {
            format!("\n\n{inner}\n\n")
        }
    });
    let text = LINK.replace_all(&text, |caps: &Captures| {
        let label = inline_text(&caps[2]);
        let href = caps[1].trim();
        if markdown && !href.is_empty() && !href.starts_with('#') {
            format!("[{label}]({href})")
        } else {
            label
        }
    });
    let text = if markdown {
        let text = STRONG.replace_all(&text, "**$1**");
        let text = EMPHASIS.replace_all(&text, "*$1*").into_owned();
        CODE.replace_all(&text, "`$1`").into_owned()
    } else {
        text.into_owned()
    };
    let text = LIST_ITEM.replace_all(&text, "\n- ");
    let text = BLOCK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);

    let lines: Vec<String> = text
        .lines()
        .map(|line| SPACES.replace_all(line, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    BLANK_LINES.replace_all(joined.trim(), "\n\n").into_owned()
}

fn inline_text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, "");
    SPACES
        .replace_all(&stripped.replace('\n', " "), " ")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => name
                    .strip_prefix("#x")
                    .or_else(|| name.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| name.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
