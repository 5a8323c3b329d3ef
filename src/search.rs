//! Web-search enrichment stage.
//!
//! The stage wrapper [`run_search`] never fails outward: scraping or network
//! errors come back as a bracketed marker string inside the returned text
//! block, which is then spliced ahead of the user prompt. The shipped
//! [`BingSearchProvider`] scrapes the Bing result page with best-effort
//! regex heuristics; anything smarter belongs behind the [`SearchProvider`]
//! trait.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://cn.bing.com";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("search request failed: HTTP {0}")]
    Status(u16),
}

/// Trait for search providers.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        cookie: Option<&str>,
    ) -> Result<String, SearchError>;
}

// =============================================================================
// BING SCRAPING PROVIDER
// =============================================================================

static RESULT_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<li class="b_algo".*?</li>"#).expect("static regex"));
static TITLE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<h2[^>]*>\s*<a[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).expect("static regex")
});
static SNIPPET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<p[^>]*>(.*?)</p>").expect("static regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));

/// Strip markup and decode the handful of entities Bing emits in snippets.
fn strip_tags(html: &str) -> String {
    let text = TAG.replace_all(html, "");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

/// Scraping search provider over the Bing result page.
#[derive(Debug, Clone)]
pub struct BingSearchProvider {
    client: reqwest::Client,
    base_url: String,
}

impl BingSearchProvider {
    pub fn new() -> Result<Self, SearchError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| SearchError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Extract numbered title/link/snippet entries from the result page.
    /// Heuristic by design; when the page markup shifts this degrades to the
    /// "no usable results" marker rather than an error.
    fn extract_results(body: &str, query: &str, max_results: usize) -> String {
        let mut out = format!("[web search results (query: {query})]:\n");
        let mut count = 0usize;

        for item in RESULT_ITEM.find_iter(body) {
            if count >= max_results {
                break;
            }
            let block = item.as_str();

            let Some(caps) = TITLE_LINK.captures(block) else {
                continue;
            };
            let href = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let title = strip_tags(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
            if title.is_empty() {
                continue;
            }

            let snippet = SNIPPET
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|m| strip_tags(m.as_str()))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "no snippet".to_string());

            out.push_str(&format!(
                "{n}. title: {title}\n   link: {href}\n   snippet: {snippet}\n\n",
                n = count + 1
            ));
            count += 1;
        }

        if count == 0 {
            return "[no usable results] check whether the search cookie has expired"
                .to_string();
        }

        out
    }
}

#[async_trait]
impl SearchProvider for BingSearchProvider {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        cookie: Option<&str>,
    ) -> Result<String, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(String::new());
        }

        let url = format!(
            "{}/search?q={}",
            self.base_url,
            urlencoding::encode(query)
        );

        let mut request = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Referer", format!("{}/", self.base_url));
        if let Some(cookie) = cookie {
            request = request.header("Cookie", cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(Self::extract_results(&body, query, max_results))
    }
}

// =============================================================================
// STAGE WRAPPER
// =============================================================================

/// Run the search stage. Never fails: provider errors become a visible
/// bracketed marker in the returned text block.
pub async fn run_search(
    provider: &dyn SearchProvider,
    query: &str,
    max_results: usize,
    cookie: Option<&str>,
) -> String {
    match provider.search(query, max_results, cookie).await {
        Ok(block) => block,
        Err(e) => {
            tracing::warn!(error = %e, "search stage failed");
            format!("[search failed: {e}]")
        }
    }
}

/// Splice the enrichment block ahead of the user prompt.
pub fn compose_prompt(prompt: &str, enrichment: Option<&str>) -> String {
    match enrichment {
        Some(block) if !block.is_empty() => {
            format!("{prompt}\n\n[web search context]\n{block}")
        }
        _ => prompt.to_string(),
    }
}
