//! A structured JSON search API (Bing-style by default).

use super::SearchProvider;
use crate::config::{HttpMethod, JsonApiSettings, KeyPlacement, read_secret};
use crate::error::{AppError, Result};
use crate::http::{RetryPolicy, send_with_retries};
use crate::models::SearchHit;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

pub(crate) struct JsonApiProvider {
    client: Client,
    policy: RetryPolicy,
    settings: JsonApiSettings,
    endpoint: Url,
    api_key: String,
}

impl JsonApiProvider {
    /// Fails with a configuration error when the endpoint is unusable or the key
    /// is not in the environment.
    pub(crate) fn from_settings(
        client: Client,
        policy: RetryPolicy,
        settings: &JsonApiSettings,
    ) -> Result<Self> {
        let endpoint = Url::parse(&settings.endpoint).map_err(|e| {
            AppError::Config(format!("Invalid search endpoint '{}': {}", settings.endpoint, e))
        })?;
        let api_key = read_secret(&settings.api_key_env)?;
        Ok(Self::with_key(client, policy, settings, endpoint, api_key))
    }

    fn with_key(
        client: Client,
        policy: RetryPolicy,
        settings: &JsonApiSettings,
        endpoint: Url,
        api_key: String,
    ) -> Self {
        Self {
            client,
            policy,
            settings: settings.clone(),
            endpoint,
            api_key,
        }
    }

    pub(crate) fn endpoint_host(&self) -> Option<&str> {
        self.endpoint.host_str()
    }

    fn build_request(&self, query: &str, limit: usize) -> RequestBuilder {
        let count = limit.to_string();
        let mut request = match self.settings.method {
            HttpMethod::Get => self.client.get(self.endpoint.clone()).query(&[
                (self.settings.query_param.as_str(), query),
                (self.settings.count_param.as_str(), count.as_str()),
            ]),
            HttpMethod::Post => {
                let mut body = serde_json::Map::new();
                body.insert(self.settings.query_param.clone(), query.into());
                body.insert(self.settings.count_param.clone(), limit.into());
                self.client.post(self.endpoint.clone()).json(&body)
            }
        };
        request = match self.settings.key_placement {
            KeyPlacement::Header => request.header(self.settings.key_name.as_str(), &self.api_key),
            KeyPlacement::Query => {
                request.query(&[(self.settings.key_name.as_str(), self.api_key.as_str())])
            }
        };
        request
    }
}

#[derive(Deserialize, Debug)]
struct WebPages {
    #[serde(default)]
    value: Vec<Value>,
}

/// The response shapes seen across providers. Items stay as raw values so
/// one malformed entry only drops itself.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum SearchResponse {
    Bing {
        #[serde(rename = "webPages")]
        web_pages: WebPages,
    },
    Results { results: Vec<Value> },
    List(Vec<Value>),
    Other(Value),
}

fn string_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// An individual result: a bare URL string or an object with `url` or `link`.
fn hit_from_item(item: &Value) -> Option<SearchHit> {
    match item {
        Value::String(url) if !url.trim().is_empty() => {
            Some(SearchHit::new(String::new(), url.trim()))
        }
        Value::Object(_) => {
            let url = string_field(item, &["url", "link"])?;
            let title = string_field(item, &["title", "name"]).unwrap_or_default();
            Some(SearchHit::new(title, url))
        }
        _ => {
            tracing::debug!(target: "search_task", "Skipping unusable result item: {}", item);
            None
        }
    }
}

/// Normalizes any supported response body into hits.
pub(crate) fn parse_response(body: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| AppError::SearchParse(format!("Search API returned invalid JSON: {}", e)))?;
    let items = match response {
        SearchResponse::Bing { web_pages } => web_pages.value,
        SearchResponse::Results { results } => results,
        SearchResponse::List(items) => items,
        SearchResponse::Other(value) => {
            if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
                return Err(AppError::SearchParse(format!("Search API error: {}", message)));
            }
            // Bing answers a query without matches with a bare SearchResponse.
            if value.get("_type").is_some() || value.get("queryContext").is_some() {
                return Ok(Vec::new());
            }
            return Err(AppError::SearchParse(
                "Search API response has no recognizable result list".to_string(),
            ));
        }
    };

    Ok(items.iter().filter_map(hit_from_item).take(limit).collect())
}

#[async_trait]
impl SearchProvider for JsonApiProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let response = send_with_retries(|| self.build_request(query, limit), &self.policy).await?;
        let body = response.text().await?;
        parse_response(&body, limit)
    }
}
