//! Probes a fixed, ordered list of pages per site until one yields an email.

use crate::config::{Config, random_delay};
use crate::extractor::extract;
use crate::http::PageFetcher;
use crate::models::{CandidateSite, ProbeResult};
use std::time::Instant;
use url::Url;

/// What probing one site produced.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProbeOutcome {
    /// The page result carrying an email, if any page had one.
    pub result: Option<ProbeResult>,
    pub pages_fetched: usize,
    pub page_failures: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct SiteProber {
    /// Upper bound on fetches per site, root page included.
    max_pages: usize,
    page_delay: (f32, f32),
}

impl SiteProber {
    pub(crate) fn new(max_pages: usize, page_delay: (f32, f32)) -> Self {
        Self {
            max_pages,
            page_delay,
        }
    }

    pub(crate) fn from_config(config: &Config) -> Self {
        Self::new(config.max_pages_per_site, config.page_delay)
    }

    /// Root page first, then each suffix in order. Duplicates and suffixes that
    /// would leave the site are skipped.
    pub(crate) fn page_urls(&self, site: &CandidateSite, page_suffixes: &[String]) -> Vec<Url> {
        let root = match Url::parse(&site.root_url) {
            Ok(root) => root,
            Err(e) => {
                tracing::warn!(target: "probe_task", "Invalid site root {}: {}", site.root_url, e);
                return Vec::new();
            }
        };

        let mut urls = vec![root.clone()];
        for suffix in page_suffixes {
            if urls.len() >= self.max_pages {
                break;
            }
            match root.join(suffix.trim()) {
                Ok(full_url) if full_url.host_str() == root.host_str() => {
                    if !urls.contains(&full_url) {
                        urls.push(full_url);
                    }
                }
                Ok(full_url) => {
                    tracing::debug!(target: "probe_task", "Skipping page off the site: {}", full_url);
                }
                Err(e) => {
                    tracing::warn!(target: "probe_task",
                        "Failed to join {} with page {}: {}", root, suffix, e
                    );
                }
            }
        }
        urls.truncate(self.max_pages.max(1));
        urls
    }

    /// Sleeps for a randomized politeness delay between two page fetches.
    pub(crate) async fn pause(&self) {
        let delay = random_delay(self.page_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Fetches pages in order and stops at the first one that yields an email.
    /// Failed fetches count as pages without contact.
    pub(crate) async fn probe(
        &self,
        site: &CandidateSite,
        page_suffixes: &[String],
        fetcher: &dyn PageFetcher,
    ) -> ProbeOutcome {
        let start_time = Instant::now();
        let urls = self.page_urls(site, page_suffixes);
        tracing::debug!(target: "probe_task",
            "Probing {} ({} pages planned)", site.registrable_domain, urls.len()
        );

        let mut outcome = ProbeOutcome::default();
        let mut earlier_phone: Option<String> = None;

        for (i, page_url) in urls.iter().enumerate() {
            if i > 0 {
                self.pause().await;
            }

            let html = match fetcher.fetch(page_url).await {
                Ok(html) => {
                    outcome.pages_fetched += 1;
                    html
                }
                Err(e) => {
                    outcome.page_failures += 1;
                    tracing::debug!(target: "probe_task", "Fetch failed for {}: {}", page_url, e);
                    continue;
                }
            };

            let mut result = extract(&html, page_url.as_str(), &site.registrable_domain);
            if result.has_email() {
                if result.phone.is_none() {
                    result.phone = earlier_phone;
                }
                tracing::info!(target: "probe_task",
                    "Found contact for {} on {} in {:.2?}",
                    site.registrable_domain, page_url, start_time.elapsed()
                );
                outcome.result = Some(result);
                return outcome;
            }
            if earlier_phone.is_none() {
                earlier_phone = result.phone;
            }
        }

        tracing::debug!(target: "probe_task",
            "No contact found for {} after {} pages ({} failed)",
            site.registrable_domain, outcome.pages_fetched, outcome.page_failures
        );
        outcome
    }
}
