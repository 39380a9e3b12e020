//! Web search via the DuckDuckGo HTML endpoint.
//!
//! No API key required. Results are scraped from the static HTML page,
//! reduced to title/url/snippet triples, and formatted as plain text for
//! the model context.

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::debug;

use crate::types::WEB_SEARCH_TIMEOUT;

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const MAX_RESULTS: usize = 5;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Run one search and return the formatted top results.
pub async fn execute_web_search(query: &str) -> Result<String> {
    let query = query.trim();
    if query.is_empty() {
        bail!("empty search query");
    }
    debug!(query, "running web search");

    let client = reqwest::Client::builder()
        .timeout(WEB_SEARCH_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build search client")?;

    let url = format!("{}?q={}", SEARCH_URL, urlencoding::encode(query));
    let response = client
        .get(&url)
        .send()
        .await
        .context("search request failed")?;

    if !response.status().is_success() {
        bail!("search returned status {}", response.status());
    }

    let body = response.text().await.context("failed to read search response")?;
    let results = extract_results(&body);
    if results.is_empty() {
        return Ok(format!("No search results found for: {}", query));
    }

    Ok(format_search_results(query, &results))
}

/// Pull result links and snippets out of the HTML page.
fn extract_results(html: &str) -> Vec<SearchResult> {
    let link_re = match Regex::new(
        r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#,
    ) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let snippet_re =
        Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#).ok();

    let snippets: Vec<String> = snippet_re
        .map(|re| {
            re.captures_iter(html)
                .map(|c| clean_html(&c[1]))
                .collect()
        })
        .unwrap_or_default();

    link_re
        .captures_iter(html)
        .take(MAX_RESULTS)
        .enumerate()
        .map(|(i, caps)| SearchResult {
            title: clean_html(&caps[2]),
            url: caps[1].to_string(),
            snippet: snippets.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

fn format_search_results(query: &str, results: &[SearchResult]) -> String {
    let mut out = format!("Search results for '{}':\n", query);
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n   {}\n", i + 1, result.title, result.url));
        if !result.snippet.is_empty() {
            out.push_str(&format!("   {}\n", result.snippet));
        }
    }
    out
}

/// Strip tags and decode the handful of entities DuckDuckGo emits.
fn clean_html(fragment: &str) -> String {
    let tag_stripped = match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(fragment, "").into_owned(),
        Err(_) => fragment.to_string(),
    };
    tag_stripped
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r##"
        <div class="result">
            <a rel="nofollow" class="result__a" href="https://docs.aws.amazon.com/ecs/troubleshooting">
                ECS <b>troubleshooting</b> guide
            </a>
            <a class="result__snippet" href="#">Diagnose &amp; fix task failures.</a>
        </div>
        <div class="result">
            <a rel="nofollow" class="result__a" href="https://example.com/terraform-errors">Terraform error reference</a>
            <a class="result__snippet" href="#">Common <b>plan</b> errors explained.</a>
        </div>
    "##;

    #[test]
    fn test_extract_results() {
        let results = extract_results(SAMPLE_PAGE);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "ECS troubleshooting guide");
        assert_eq!(results[0].url, "https://docs.aws.amazon.com/ecs/troubleshooting");
        assert_eq!(results[0].snippet, "Diagnose & fix task failures.");
        assert_eq!(results[1].title, "Terraform error reference");
    }

    #[test]
    fn test_extract_results_empty_page() {
        assert!(extract_results("<html><body>no results</body></html>").is_empty());
    }

    #[test]
    fn test_extract_caps_result_count() {
        let many: String = (0..10)
            .map(|i| {
                format!(
                    r#"<a class="result__a" href="https://example.com/{i}">r{i}</a>"#
                )
            })
            .collect();
        assert_eq!(extract_results(&many).len(), MAX_RESULTS);
    }

    #[test]
    fn test_format_search_results() {
        let results = vec![SearchResult {
            title: "ECS guide".to_string(),
            url: "https://example.com".to_string(),
            snippet: "snippet text".to_string(),
        }];
        let out = format_search_results("ecs failure", &results);
        assert!(out.starts_with("Search results for 'ecs failure':"));
        assert!(out.contains("1. ECS guide"));
        assert!(out.contains("   https://example.com"));
        assert!(out.contains("   snippet text"));
    }

    #[test]
    fn test_clean_html_strips_tags_and_entities() {
        assert_eq!(clean_html("a <b>bold</b> &amp; quiet"), "a bold & quiet");
        assert_eq!(clean_html("  spaced \n out  "), "spaced out");
    }
}
