//! Search providers and the aggregator that drives them.

mod duckduckgo;
mod json_api;
mod queries;

pub(crate) use duckduckgo::DuckDuckGoHtml;
pub(crate) use json_api::JsonApiProvider;
pub(crate) use queries::{gentle_query, plan_queries};

use crate::classifier::SiteClassifier;
use crate::config::random_delay;
use crate::error::Result;
use crate::models::SearchHit;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A source of organic search results.
#[async_trait]
pub(crate) trait SearchProvider: Send + Sync {
    /// Short name used in cache keys and lead `source` values.
    fn name(&self) -> &str;

    /// Returns at most `limit` raw hits for `query`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// What one aggregated query produced.
#[derive(Debug, Clone, Default)]
pub(crate) struct SearchOutcome {
    /// Classified hits, at most `limit`.
    pub hits: Vec<SearchHit>,
    /// Set when the provider failed; the hits are then empty.
    pub warning: Option<String>,
    pub from_cache: bool,
}

type CacheKey = (String, String, usize);

/// Wraps a provider with gentle-query rewriting, classification, a TTL cache and
/// politeness delays between queries.
pub(crate) struct SearchAggregator {
    provider: Arc<dyn SearchProvider>,
    classifier: Arc<SiteClassifier>,
    gentle: bool,
    cache_ttl: Duration,
    /// Base sleep between network-issued queries (seconds); up to a second of
    /// jitter is added.
    query_delay: f32,
    cache: Mutex<HashMap<CacheKey, (Instant, Vec<SearchHit>)>>,
}

impl SearchAggregator {
    pub(crate) fn new(
        provider: Arc<dyn SearchProvider>,
        classifier: Arc<SiteClassifier>,
        gentle: bool,
        cache_ttl: Duration,
        query_delay: f32,
    ) -> Self {
        Self {
            provider,
            classifier,
            gentle,
            cache_ttl,
            query_delay,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn cached(&self, key: &CacheKey) -> Option<Vec<SearchHit>> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.cache_ttl)
            .map(|(_, hits)| hits.clone())
    }

    fn store(&self, key: CacheKey, hits: &[SearchHit]) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|_, (stored_at, _)| stored_at.elapsed() < self.cache_ttl);
            cache.insert(key, (Instant::now(), hits.to_vec()));
        }
    }

    /// Runs one query. Provider failures become a warning with no hits.
    pub(crate) async fn search(&self, query: &str, limit: usize) -> SearchOutcome {
        let query = if self.gentle {
            gentle_query(query)
        } else {
            query.trim().to_string()
        };
        if query.is_empty() || limit == 0 {
            return SearchOutcome::default();
        }

        let key: CacheKey = (query.clone(), self.provider.name().to_string(), limit);
        if let Some(hits) = self.cached(&key) {
            tracing::debug!(target: "search_task", "Cache hit for '{}' ({} hits)", query, hits.len());
            return SearchOutcome {
                hits,
                warning: None,
                from_cache: true,
            };
        }

        tracing::info!(target: "search_task", "Searching {} for: {}", self.provider.name(), query);
        match self.provider.search(&query, limit).await {
            Ok(raw) => {
                let raw_count = raw.len();
                let hits: Vec<SearchHit> = raw
                    .into_iter()
                    .filter(|hit| self.classifier.is_business_site(&hit.url))
                    .take(limit)
                    .collect();
                tracing::debug!(target: "search_task",
                    "'{}': {} raw results, {} kept after classification",
                    query, raw_count, hits.len()
                );
                self.store(key, &hits);
                SearchOutcome {
                    hits,
                    warning: None,
                    from_cache: false,
                }
            }
            Err(e) => {
                tracing::warn!(target: "search_task", "Search error for '{}': {}", query, e);
                SearchOutcome {
                    hits: Vec::new(),
                    warning: Some(format!("Search error for '{}': {}", query, e)),
                    from_cache: false,
                }
            }
        }
    }

    /// Runs `queries` one at a time, sleeping between queries that went to the
    /// network. Outcomes are returned in query order.
    pub(crate) async fn search_all(&self, queries: &[String], limit: usize) -> Vec<SearchOutcome> {
        let mut outcomes = Vec::with_capacity(queries.len());
        for (i, query) in queries.iter().enumerate() {
            let outcome = self.search(query, limit).await;
            let went_to_network = !outcome.from_cache;
            outcomes.push(outcome);
            if went_to_network && i + 1 < queries.len() && self.query_delay > 0.0 {
                let delay = random_delay((self.query_delay, self.query_delay + 1.0));
                tracing::trace!(target: "search_task", "Sleeping {:?} before next query", delay);
                tokio::time::sleep(delay).await;
            }
        }
        outcomes
    }
}
