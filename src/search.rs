//! Web search capability
//!
//! Research only sees [`SearchProvider`]. [`TavilySearch`] is the production
//! adapter; a static double lives in [`crate::testing`].

use crate::config::Config;
use crate::error::CollaboratorError;
use crate::llm::client::create_http_client;
use crate::util::truncate_str;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Separator between rendered results in the Research prompt.
pub const RESULT_SEPARATOR: &str = "\n\n---\n\n";
/// Rendered in place of results when every query came back empty.
pub const NO_RESULTS: &str = "No search results found.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    /// Provider relevance score, higher is better.
    pub score: f64,
}

impl SearchResult {
    /// `[title](url)` followed by the content on the next line.
    pub fn render(&self) -> String {
        format!("[{}]({})\n{}", self.title, self.url, self.content)
    }
}

/// Note recorded in place of a failed query's results.
pub fn failure_note(query: &str, err: &CollaboratorError) -> String {
    format!("Search for '{}' failed: {}", query, err)
}

/// Join rendered entries for the model, or the empty-result sentinel.
pub fn join_rendered(entries: &[String]) -> String {
    if entries.is_empty() {
        NO_RESULTS.to_string()
    } else {
        entries.join(RESULT_SEPARATOR)
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query. `include_domains` restricts results to the listed sites.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        include_domains: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, CollaboratorError>;
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    max_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_domains: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyItem>,
}

#[derive(Deserialize)]
struct TavilyItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl From<TavilyItem> for SearchResult {
    fn from(item: TavilyItem) -> Self {
        Self {
            title: item.title,
            url: item.url,
            content: item.content,
            score: item.score,
        }
    }
}

fn parse_response(body: &str) -> Result<Vec<SearchResult>, CollaboratorError> {
    let parsed: TavilyResponse = serde_json::from_str(body).map_err(|e| {
        CollaboratorError::Provider(format!(
            "Failed to parse search response: {} ({})",
            e,
            truncate_str(body, 200)
        ))
    })?;
    Ok(parsed.results.into_iter().map(SearchResult::from).collect())
}

/// Tavily search API client. Advanced depth, technical sources.
pub struct TavilySearch {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl TavilySearch {
    /// A client without a key is valid; each search then fails with a
    /// configuration error that Research records per query.
    pub fn new(
        api_key: Option<String>,
        url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            http: create_http_client(timeout_secs)?,
            url: url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, CollaboratorError> {
        let api_key = config.search_api_key();
        if api_key.is_none() {
            tracing::warn!("no search API key configured; research will run without web results");
        }
        Self::new(api_key, config.search_url.clone(), config.request_timeout_secs)
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        include_domains: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, CollaboratorError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            CollaboratorError::Configuration(
                "No search API key configured. Run 'incident --setup' or set TAVILY_API_KEY."
                    .to_string(),
            )
        })?;

        let request = TavilyRequest {
            api_key,
            query,
            search_depth: "advanced",
            max_results,
            include_domains: include_domains.filter(|d| !d.is_empty()),
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Provider("Search request timed out".to_string())
                } else {
                    CollaboratorError::Provider(format!("Search request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Provider(format!("Search read failed: {}", e)))?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => CollaboratorError::Configuration("Invalid search API key".to_string()),
                _ => CollaboratorError::Provider(format!(
                    "Search API error {}: {}",
                    status,
                    truncate_str(&body, 200)
                )),
            });
        }

        let results = parse_response(&body)?;
        tracing::debug!(query, count = results.len(), "search completed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_renders_as_markdown_link() {
        let result = SearchResult {
            title: "Pool exhausted".to_string(),
            url: "https://stackoverflow.com/q/1".to_string(),
            content: "Raise max_connections.".to_string(),
            score: 0.9,
        };
        assert_eq!(
            result.render(),
            "[Pool exhausted](https://stackoverflow.com/q/1)\nRaise max_connections."
        );
    }

    #[test]
    fn joined_results_use_separator_or_sentinel() {
        assert_eq!(join_rendered(&[]), NO_RESULTS);
        assert_eq!(
            join_rendered(&["a".to_string(), "b".to_string()]),
            "a\n\n---\n\nb"
        );
    }

    #[test]
    fn failure_note_names_query_and_cause() {
        let note = failure_note("pg timeout", &CollaboratorError::Provider("502".to_string()));
        assert_eq!(note, "Search for 'pg timeout' failed: provider error: 502");
    }

    #[test]
    fn request_omits_empty_domain_filter() {
        let request = TavilyRequest {
            api_key: "k",
            query: "q",
            search_depth: "advanced",
            max_results: 5,
            include_domains: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("include_domains").is_none());
        assert_eq!(json["search_depth"], "advanced");
    }

    #[test]
    fn response_items_tolerate_missing_fields() {
        let body = r#"{"results":[{"title":"t","url":"u","content":"c","score":0.5},{"title":"only title"}]}"#;
        let results = parse_response(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].url, "");
        assert_eq!(results[1].score, 0.0);
        assert!(parse_response("not json").is_err());
    }

    #[tokio::test]
    async fn missing_key_fails_each_search_with_configuration_error() {
        let search = TavilySearch::new(None, "https://example.invalid/search", 5).unwrap();
        assert!(!search.has_key());
        let err = search.search("q", 5, None).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Configuration(_)));
    }
}
