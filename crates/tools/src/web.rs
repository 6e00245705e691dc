//! Web collaborators: search and page fetch, plus the registry tools
//! wrapping them.
//!
//! Fetch URLs come from models (the `fetch` action) and from API
//! callers (`ingest_url`), so every outbound request is validated
//! first: http/https only, and hosts that resolve to private or
//! otherwise non-public addresses are refused.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde_json::{json, Value};

use ens_domain::error::{Error, Result};

use crate::registry::{Tool, ToolDefinition};

/// One web search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// External web search.
#[async_trait::async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;
}

/// External page fetch. Returns extracted text, capped at 20 KB.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// URL validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `true` when the IP belongs to a private, loopback, link-local, or
/// otherwise non-public range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()                  // 127.0.0.0/8
                || v4.is_private()            // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()         // 169.254.0.0/16
                || v4.is_broadcast()          // 255.255.255.255
                || v4.is_unspecified()        // 0.0.0.0
                || is_v4_shared(v4)           // 100.64.0.0/10 (CGNAT)
                || is_v4_documentation(v4)    // 192.0.2/24, 198.51.100/24, 203.0.113/24
                || is_v4_benchmarking(v4)     // 198.18.0.0/15
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()                  // ::1
                || v6.is_unspecified()        // ::
                || is_v6_unique_local(v6)     // fc00::/7
                || is_v6_link_local(v6)       // fe80::/10
        }
    }
}

/// 100.64.0.0/10, shared address space (RFC 6598).
fn is_v4_shared(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Documentation ranges: 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24.
fn is_v4_documentation(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
        || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
        || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
}

/// Benchmarking range: 198.18.0.0/15.
fn is_v4_benchmarking(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 198 && (octets[1] & 0xFE) == 18
}

/// Unique-local addresses: fc00::/7.
fn is_v6_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFE00) == 0xFC00
}

/// Link-local addresses: fe80::/10.
fn is_v6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFFC0) == 0xFE80
}

/// Validate a URL before any outbound request is made.
///
/// Rejects non-http(s) schemes, URLs without a host, and hostnames
/// where ANY resolved address is private or internal.
pub fn validate_url(raw_url: &str) -> Result<()> {
    let parsed =
        Url::parse(raw_url).map_err(|e| Error::InputInvalid(format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::InputInvalid(format!(
                "blocked scheme: {other}:// (only http/https allowed)"
            )))
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InputInvalid("URL has no host".into()))?;
    let port = parsed.port_or_known_default().unwrap_or(80);

    let addrs: Vec<_> = format!("{host}:{port}")
        .to_socket_addrs()
        .map_err(|e| Error::TransientExternal(format!("DNS resolution failed for {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::TransientExternal(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for addr in &addrs {
        if is_private_ip(&addr.ip()) {
            return Err(Error::InputInvalid(format!(
                "blocked request to private/internal address: {host} resolves to {}",
                addr.ip()
            )));
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const FETCH_TEXT_CAP: usize = 20_000;

/// Programmable-search (CSE) backed searcher.
pub struct CseSearcher {
    client: reqwest::Client,
    api_key: String,
    engine_id: String,
}

impl CseSearcher {
    pub fn new(api_key: impl Into<String>, engine_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("building search client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            engine_id: engine_id.into(),
        })
    }
}

#[async_trait::async_trait]
impl Searcher for CseSearcher {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get("https://www.googleapis.com/customsearch/v1")
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
            ])
            .send()
            .await
            .map_err(|e| Error::TransientExternal(format!("web search: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::TransientExternal(format!(
                "web search returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::TransientExternal(format!("web search body: {e}")))?;

        let items = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .take(k)
            .map(|item| SearchHit {
                title: item
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                url: item
                    .get("link")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                snippet: item
                    .get("snippet")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            })
            .collect())
    }
}

/// Page fetcher with URL validation, a hard timeout, a redirect
/// limit, and a text cap.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent("ensemble/0.1")
            .build()
            .map_err(|e| Error::Internal(format!("building fetch client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        validate_url(url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::TransientExternal(format!("fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::TransientExternal(format!(
                "fetch {url} returned {}",
                response.status()
            )));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);

        let body = response
            .text()
            .await
            .map_err(|e| Error::TransientExternal(format!("fetch {url} body: {e}")))?;

        let text = if is_html { html_to_text(&body) } else { body };
        Ok(text.chars().take(FETCH_TEXT_CAP).collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTML extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "li"
            | "tr"
            | "article"
            | "section"
            | "header"
            | "footer"
            | "blockquote"
    )
}

/// Tag-stripping HTML-to-text extraction: drops script/style content,
/// turns block boundaries into newlines, decodes common entities, and
/// collapses whitespace.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut tag_buf = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag_buf.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let tag = tag_buf.to_lowercase();
                if tag.starts_with("script") {
                    in_script = true;
                } else if tag.starts_with("/script") {
                    in_script = false;
                } else if tag.starts_with("style") {
                    in_style = true;
                } else if tag.starts_with("/style") {
                    in_style = false;
                }
                let name = tag
                    .trim_start_matches('/')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or("");
                if tag.starts_with('/') && is_block_tag(name) || name == "br" {
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
            _ if in_tag => tag_buf.push(ch),
            _ if in_script || in_style => {}
            _ => out.push(ch),
        }
    }

    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let mut result = String::new();
    let mut prev_blank = false;
    for line in decoded.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !prev_blank && !result.is_empty() {
                result.push('\n');
                prev_blank = true;
            }
        } else {
            result.push_str(&collapsed);
            result.push('\n');
            prev_blank = false;
        }
    }
    result.trim().to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `web.search` over a configured [`Searcher`].
pub struct WebSearchTool {
    searcher: Arc<dyn Searcher>,
}

impl WebSearchTool {
    pub fn new(searcher: Arc<dyn Searcher>) -> Self {
        Self { searcher }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web.search".into(),
            description: "Search the web. Returns titles, URLs, and snippets.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "k": { "type": "integer", "description": "Max results (default 5)" }
                },
                "required": ["query"]
            }),
        }
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InputInvalid("missing required argument: query".into()))?;
        let k = args.get("k").and_then(Value::as_u64).unwrap_or(5) as usize;

        let hits = self.searcher.search(query, k).await?;
        let rendered: Vec<Value> = hits
            .iter()
            .map(|h| json!({ "title": h.title, "url": h.url, "snippet": h.snippet }))
            .collect();
        Ok(serde_json::to_string_pretty(&rendered)?)
    }
}

/// `web.fetch` over a configured [`Fetcher`].
pub struct WebFetchTool {
    fetcher: Arc<dyn Fetcher>,
}

impl WebFetchTool {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl Tool for WebFetchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web.fetch".into(),
            description: "Fetch a URL and return its extracted text.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "URL to fetch" }
                },
                "required": ["url"]
            }),
        }
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InputInvalid("missing required argument: url".into()))?;
        self.fetcher.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        IpAddr::V4(s.parse().unwrap())
    }

    fn v6(s: &str) -> IpAddr {
        IpAddr::V6(s.parse().unwrap())
    }

    #[test]
    fn loopback_and_unspecified_are_private() {
        assert!(is_private_ip(&v4("127.0.0.1")));
        assert!(is_private_ip(&v4("0.0.0.0")));
        assert!(is_private_ip(&v6("::1")));
        assert!(is_private_ip(&v6("::")));
    }

    #[test]
    fn rfc1918_ranges_are_private() {
        assert!(is_private_ip(&v4("10.1.2.3")));
        assert!(is_private_ip(&v4("172.16.0.1")));
        assert!(is_private_ip(&v4("172.31.255.255")));
        assert!(is_private_ip(&v4("192.168.1.1")));
    }

    #[test]
    fn link_local_and_broadcast_are_private() {
        assert!(is_private_ip(&v4("169.254.10.20")));
        assert!(is_private_ip(&v4("255.255.255.255")));
        assert!(is_private_ip(&v6("fe80::1")));
    }

    #[test]
    fn cgnat_shared_range_is_private() {
        assert!(is_private_ip(&v4("100.64.0.1")));
        assert!(is_private_ip(&v4("100.127.255.254")));
        // Just outside 100.64.0.0/10.
        assert!(!is_private_ip(&v4("100.128.0.1")));
    }

    #[test]
    fn documentation_and_benchmarking_ranges_are_private() {
        assert!(is_private_ip(&v4("192.0.2.1")));
        assert!(is_private_ip(&v4("198.51.100.7")));
        assert!(is_private_ip(&v4("203.0.113.200")));
        assert!(is_private_ip(&v4("198.18.0.1")));
        assert!(is_private_ip(&v4("198.19.255.254")));
    }

    #[test]
    fn unique_local_v6_is_private() {
        assert!(is_private_ip(&v6("fd00::1")));
        assert!(is_private_ip(&v6("fc00::1")));
    }

    #[test]
    fn public_addresses_are_not_private() {
        assert!(!is_private_ip(&v4("8.8.8.8")));
        assert!(!is_private_ip(&v4("93.184.216.34")));
        assert!(!is_private_ip(&v6("2606:4700::1111")));
    }

    #[test]
    fn non_http_schemes_are_blocked() {
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("ftp://example.org/file").is_err());
        assert!(validate_url("gopher://example.org").is_err());
    }

    #[test]
    fn urls_without_a_host_are_blocked() {
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("http://").is_err());
    }

    #[test]
    fn literal_private_hosts_are_blocked() {
        assert!(validate_url("http://127.0.0.1/admin").is_err());
        assert!(validate_url("http://10.0.0.5:8080/").is_err());
        assert!(validate_url("http://192.168.1.1/router").is_err());
        assert!(validate_url("http://169.254.169.254/latest/meta-data/").is_err());
        assert!(validate_url("http://[::1]/").is_err());
        assert!(validate_url("http://[fd00::1]/").is_err());
    }

    #[test]
    fn literal_public_hosts_pass() {
        assert!(validate_url("https://93.184.216.34/").is_ok());
        assert!(validate_url("http://8.8.8.8:8080/path").is_ok());
    }

    #[test]
    fn html_extraction_strips_scripts_and_tags() {
        let html = r#"<html><head><style>body { color: red }</style>
<script>alert("no")</script></head>
<body><h1>Title</h1><p>First  paragraph.</p><p>Second &amp; last.</p></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("Title"));
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second & last."));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn html_extraction_breaks_on_blocks() {
        let text = html_to_text("<p>one</p><p>two</p>");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(html_to_text("just words"), "just words");
    }
}
