//! `web_search` and `web_fetch` tools.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ToolContext;
use crate::registry::{Tool, ToolDefinition};
use crate::tools::truncate_chars;
use crate::{ToolError, required_str};

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; tidebot/0.1)";
const DEFAULT_MAX_CHARS: usize = 50_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// Race a request future against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, reqwest::Error>>,
) -> Result<T, ToolError> {
    tokio::select! {
        result = fut => Ok(result?),
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
    }
}

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: Option<String>,
}

pub struct WebSearchTool {
    api_key: Option<String>,
    max_results: usize,
    client: reqwest::Client,
    definition: ToolDefinition,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, max_results: usize) -> Self {
        let definition = ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web. Returns titles, URLs and snippets.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query."
                    },
                    "count": {
                        "type": "integer",
                        "description": "Number of results (1-10).",
                        "minimum": 1,
                        "maximum": 10
                    }
                },
                "required": ["query"]
            }),
        };
        Self {
            api_key,
            max_results,
            client: http_client(),
            definition,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let query = required_str(&params, "query")?;
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ToolError::Failed(
                "web search is not configured (set tools.web.search_api_key or BRAVE_API_KEY)"
                    .to_string(),
            ));
        };
        let count = params
            .get("count")
            .and_then(|v| v.as_u64())
            .map(|n| n.clamp(1, 10) as usize)
            .unwrap_or(self.max_results);

        debug!(%query, count, "Web search");
        let count_param = count.to_string();
        let request = self
            .client
            .get(BRAVE_SEARCH_URL)
            .query(&[("q", query), ("count", count_param.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send();
        let response = cancellable(&cancel, request).await?.error_for_status()?;
        let body: BraveResponse = cancellable(&cancel, response.json()).await?;

        let results = body.web.map(|w| w.results).unwrap_or_default();
        Ok(format_results(query, &results, count))
    }
}

fn format_results(query: &str, results: &[BraveResult], count: usize) -> String {
    if results.is_empty() {
        return format!("No results for: {query}");
    }
    let mut out = format!("Results for: {query}\n");
    for (i, r) in results.iter().take(count).enumerate() {
        out.push_str(&format!("\n{}. {}\n   {}", i + 1, r.title, r.url));
        if let Some(desc) = r.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!("\n   {}", strip_html_tags(desc)));
        }
    }
    out
}

pub struct WebFetchTool {
    client: reqwest::Client,
    definition: ToolDefinition,
}

impl WebFetchTool {
    pub fn new() -> Self {
        let definition = ToolDefinition {
            name: "web_fetch".to_string(),
            description: "Fetch a URL and return its readable text content.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The http(s) URL to fetch."
                    },
                    "max_chars": {
                        "type": "integer",
                        "description": "Maximum characters to return (default 50000)."
                    }
                },
                "required": ["url"]
            }),
        };
        Self {
            client: http_client(),
            definition,
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        let url = required_str(&params, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidParams(format!(
                "only http and https URLs are supported: {url}"
            )));
        }
        let max_chars = params
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);

        debug!(%url, "Fetching URL");
        let response = cancellable(&cancel, self.client.get(url).send()).await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = cancellable(&cancel, response.text()).await?;

        let text = if content_type.contains("text/html") {
            html_to_text(&body)
        } else if content_type.contains("json") {
            serde_json::from_str::<Value>(&body)
                .and_then(|v| serde_json::to_string_pretty(&v))
                .unwrap_or(body)
        } else {
            body
        };

        let (text, truncated) = truncate_chars(&text, max_chars);
        let mut out = format!("URL: {url}\nStatus: {}\n", status.as_u16());
        if truncated {
            out.push_str(&format!("(truncated to {max_chars} characters)\n"));
        }
        out.push('\n');
        out.push_str(&text);
        Ok(out)
    }
}

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>")
        .expect("script regex should compile")
});
static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|div|br|li|h[1-6]|tr|section|article|header|footer)[^>]*>")
        .expect("block regex should compile")
});
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex should compile"));
static SPACES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\r\f]+").expect("spaces regex should compile"));
static BLANK_LINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n+").expect("blank lines regex should compile"));

fn strip_html_tags(html: &str) -> String {
    decode_entities(&TAG_RE.replace_all(html, "")).trim().to_string()
}

/// Readable text from an HTML page: scripts and styles dropped, block
/// elements turned into line breaks, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_RE.replace_all(html, "");
    let text = BLOCK_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = SPACES_RE.replace_all(&text, " ");
    let text = BLANK_LINES_RE.replace_all(&text, "\n\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><style>p{color:red}</style>\
                    <script>alert('x')</script></head>\
                    <body><h1>Title</h1><p>Hello <b>World</b> &amp; friends</p></body></html>";
        let text = html_to_text(html);
        assert_eq!(text, "Title\n\nHello World & friends");
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_format_results() {
        let results = vec![
            BraveResult {
                title: "Rust".into(),
                url: "https://rust-lang.org".into(),
                description: Some("A <strong>language</strong>".into()),
            },
            BraveResult {
                title: "Tokio".into(),
                url: "https://tokio.rs".into(),
                description: None,
            },
        ];
        let out = format_results("rust", &results, 1);
        assert_eq!(
            out,
            "Results for: rust\n\n1. Rust\n   https://rust-lang.org\n   A language"
        );
        assert_eq!(format_results("x", &[], 5), "No results for: x");
    }

    #[tokio::test]
    async fn test_search_without_key_fails() {
        let tool = WebSearchTool::new(None, 5);
        let err = tool
            .execute(json!({"query": "rust"}), &ToolContext::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_http() {
        let tool = WebFetchTool::new();
        let err = tool
            .execute(
                json!({"url": "file:///etc/passwd"}),
                &ToolContext::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
