//! Scrapes DuckDuckGo's HTML-only results page.

use super::SearchProvider;
use crate::error::{AppError, Result};
use crate::http::{RetryPolicy, send_with_retries};
use crate::models::SearchHit;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

static RESULT_LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__a").unwrap());

pub(crate) struct DuckDuckGoHtml {
    client: Client,
    policy: RetryPolicy,
    endpoint: String,
}

impl DuckDuckGoHtml {
    pub(crate) fn new(client: Client, policy: RetryPolicy) -> Self {
        Self::with_endpoint(client, policy, DEFAULT_ENDPOINT)
    }

    pub(crate) fn with_endpoint(client: Client, policy: RetryPolicy, endpoint: &str) -> Self {
        Self {
            client,
            policy,
            endpoint: endpoint.to_string(),
        }
    }
}

/// Result links are either direct or wrapped in `/l/?uddg=<encoded target>`.
fn unwrap_redirect(href: &str) -> Option<String> {
    let href = href.trim();
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{}", href)
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;
    if parsed.path().starts_with("/l/") {
        return parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned());
    }
    matches!(parsed.scheme(), "http" | "https").then_some(absolute)
}

/// Pulls `(title, url)` pairs out of a results page, in page order.
pub(crate) fn parse_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_LINK_SELECTOR)
        .filter_map(|link| {
            let url = unwrap_redirect(link.value().attr("href")?)?;
            let title = link
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            Some(SearchHit::new(title, url))
        })
        .take(limit)
        .collect()
}

#[async_trait]
impl SearchProvider for DuckDuckGoHtml {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let response = send_with_retries(
            || self.client.get(&self.endpoint).query(&[("q", query)]),
            &self.policy,
        )
        .await?;
        let body = response.text().await?;

        let hits = parse_results(&body, limit);
        if hits.is_empty() && body.contains("anomaly") {
            return Err(AppError::SearchParse(
                "DuckDuckGo served a bot challenge instead of results".to_string(),
            ));
        }
        Ok(hits)
    }
}
