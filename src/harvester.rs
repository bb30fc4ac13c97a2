//! Runs the whole pipeline: search, deduplicate, probe, and merge into the lead set.

use crate::classifier::SiteClassifier;
use crate::config::{Config, ProviderKind};
use crate::dedup::dedupe;
use crate::dns::{DnsMxChecker, MxChecker};
use crate::error::Result;
use crate::http::{DirectFetcher, PageFetcher, RetryPolicy, UnlockerFetcher, build_client};
use crate::leads::{LeadPolicy, LeadStore};
use crate::models::{CandidateSite, RunReport, SearchHit};
use crate::prober::{ProbeOutcome, SiteProber};
use crate::search::{DuckDuckGoHtml, JsonApiProvider, SearchAggregator, SearchProvider};
use indicatif::ProgressBar;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Label used in lead `source` values for sites that came from the seed list.
const SEED_ORIGIN: &str = "seed";

/// Shared clients and capabilities for harvesting runs. Optional capabilities
/// that could not be set up are recorded as warnings and left disabled.
pub(crate) struct Harvester {
    config: Arc<Config>,
    classifier: Arc<SiteClassifier>,
    aggregator: Option<SearchAggregator>,
    fetcher: Arc<dyn PageFetcher>,
    prober: Arc<SiteProber>,
    mx: Option<Arc<dyn MxChecker>>,
    warnings: Vec<String>,
}

impl Harvester {
    /// Builds the HTTP client, search provider, page fetcher and MX checker.
    /// Only an unusable HTTP client is fatal.
    pub(crate) fn from_config(config: Config) -> Result<Self> {
        let client = build_client(&config)?;
        let policy = RetryPolicy::from_config(&config);
        let mut warnings = Vec::new();
        let mut classifier = SiteClassifier::from_config(&config);

        let provider: Option<Arc<dyn SearchProvider>> = match config.provider {
            ProviderKind::DuckDuckGo => Some(Arc::new(DuckDuckGoHtml::new(client.clone(), policy))),
            ProviderKind::Json => {
                match JsonApiProvider::from_settings(client.clone(), policy, &config.json_api) {
                    Ok(provider) => {
                        if let Some(host) = provider.endpoint_host() {
                            classifier = classifier.with_infrastructure_host(host);
                        }
                        Some(Arc::new(provider))
                    }
                    Err(e) => {
                        let message = format!("JSON search provider disabled: {}", e);
                        tracing::warn!(target: "harvest_task", "{}", message);
                        warnings.push(message);
                        None
                    }
                }
            }
        };

        let direct = || -> Arc<dyn PageFetcher> { Arc::new(DirectFetcher::new(client.clone(), policy)) };
        let fetcher: Arc<dyn PageFetcher> = match &config.unlocker {
            Some(settings) => match UnlockerFetcher::from_settings(client.clone(), policy, settings) {
                Ok(unlocker) => Arc::new(unlocker),
                Err(e) => {
                    let message = format!("Unlocker disabled, fetching directly: {}", e);
                    tracing::warn!(target: "harvest_task", "{}", message);
                    warnings.push(message);
                    direct()
                }
            },
            None => direct(),
        };

        let mx: Option<Arc<dyn MxChecker>> = if config.verify_mx {
            match DnsMxChecker::from_config(&config) {
                Ok(checker) => Some(Arc::new(checker)),
                Err(e) => {
                    let message = format!("MX verification disabled: {}", e);
                    tracing::warn!(target: "harvest_task", "{}", message);
                    warnings.push(message);
                    None
                }
            }
        } else {
            None
        };

        let mut harvester = Self::new(config, provider, fetcher, mx, classifier);
        harvester.warnings = warnings;
        Ok(harvester)
    }

    pub(crate) fn new(
        config: Config,
        provider: Option<Arc<dyn SearchProvider>>,
        fetcher: Arc<dyn PageFetcher>,
        mx: Option<Arc<dyn MxChecker>>,
        classifier: SiteClassifier,
    ) -> Self {
        let classifier = Arc::new(classifier);
        let aggregator = provider.map(|provider| {
            SearchAggregator::new(
                provider,
                classifier.clone(),
                config.gentle_queries,
                config.cache_ttl,
                config.query_delay,
            )
        });
        Self {
            prober: Arc::new(SiteProber::from_config(&config)),
            config: Arc::new(config),
            classifier,
            aggregator,
            fetcher,
            mx,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn classifier(&self) -> &SiteClassifier {
        &self.classifier
    }

    /// Capability problems found at startup.
    pub(crate) fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Acceptance rules for this harvester's configuration.
    pub(crate) fn lead_policy(&self) -> LeadPolicy<'_> {
        LeadPolicy::from_config(&self.config, self.mx.as_deref())
    }

    fn source_label(&self, origin: &str) -> String {
        format!("{}/{}", origin, self.fetcher.name())
    }

    /// Runs the queries, appends `seeds`, and returns the deduplicated sites
    /// together with the domains that came from search.
    async fn discover(
        &self,
        queries: &[String],
        seeds: &[String],
        report: &mut RunReport,
    ) -> (Vec<CandidateSite>, HashSet<String>) {
        let mut hits: Vec<SearchHit> = Vec::new();

        if !queries.is_empty() {
            match &self.aggregator {
                Some(aggregator) => {
                    let outcomes = aggregator
                        .search_all(queries, self.config.results_per_query)
                        .await;
                    for outcome in outcomes {
                        if outcome.from_cache {
                            report.queries_from_cache += 1;
                        } else {
                            report.queries_issued += 1;
                        }
                        if let Some(warning) = outcome.warning {
                            report.search_failures += 1;
                            report.warnings.push(warning);
                        }
                        hits.extend(outcome.hits);
                    }
                }
                None => {
                    report
                        .warnings
                        .push(format!("Search is disabled; {} queries skipped", queries.len()));
                }
            }
        }
        report.hits_total = hits.len();

        let searched_domains: HashSet<String> = dedupe(&hits, &self.classifier, usize::MAX)
            .into_iter()
            .map(|site| site.registrable_domain)
            .collect();

        hits.extend(seeds.iter().map(|seed| SearchHit::new(SEED_ORIGIN, seed.as_str())));
        let sites = dedupe(&hits, &self.classifier, self.config.max_sites);
        tracing::info!(target: "harvest_task",
            "{} hits and {} seeds reduced to {} candidate sites",
            report.hits_total, seeds.len(), sites.len()
        );
        (sites, searched_domains)
    }

    /// Runs one harvest into `store`. Individual query, site and page failures
    /// are counted in the returned report, never propagated.
    ///
    /// Sites are probed by up to `site_concurrency` tasks, but results are merged
    /// in site order, so the outcome matches a sequential run.
    pub(crate) async fn harvest(
        &self,
        queries: &[String],
        seeds: &[String],
        store: &mut LeadStore,
        progress_bar: &ProgressBar,
    ) -> RunReport {
        let start_time = Instant::now();
        let mut report = RunReport {
            warnings: self.warnings.clone(),
            ..RunReport::default()
        };

        let (sites, searched_domains) = self.discover(queries, seeds, &mut report).await;
        progress_bar.set_length(sites.len() as u64);

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.site_concurrency.max(1)));
        let suffixes = Arc::new(self.config.page_suffixes.clone());
        let mut tasks = Vec::with_capacity(sites.len());

        for (index, site) in sites.into_iter().enumerate() {
            let semaphore_clone = semaphore.clone();
            let prober = self.prober.clone();
            let fetcher = self.fetcher.clone();
            let suffixes = suffixes.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore_clone.acquire_owned().await else {
                    return (site, ProbeOutcome::default());
                };
                if index > 0 {
                    prober.pause().await;
                }
                let outcome = prober.probe(&site, &suffixes, fetcher.as_ref()).await;
                (site, outcome)
            }));
        }

        let policy = self.lead_policy();
        for task in tasks {
            let (site, outcome) = match task.await {
                Ok(finished) => finished,
                Err(e) => {
                    tracing::error!(target: "harvest_task", "Probe task failed: {}", e);
                    progress_bar.inc(1);
                    continue;
                }
            };

            report.sites_probed += 1;
            report.pages_fetched += outcome.pages_fetched;
            report.page_failures += outcome.page_failures;
            progress_bar.set_message(site.registrable_domain.clone());

            match outcome.result {
                Some(result) => {
                    let origin = if searched_domains.contains(&site.registrable_domain) {
                        self.aggregator
                            .as_ref()
                            .map(|a| a.provider_name())
                            .unwrap_or(SEED_ORIGIN)
                    } else {
                        SEED_ORIGIN
                    };
                    let source = self.source_label(origin);
                    let upserted = store.upsert(&result, &site.root_url, &source, &policy).await;
                    report.record(upserted);
                }
                None => report.sites_without_contact += 1,
            }
            progress_bar.inc(1);
        }

        progress_bar.finish_with_message("Harvest complete");
        tracing::info!(target: "harvest_task",
            "Harvest finished in {:.2?}: {} sites probed, {} leads added, {} rejected, {} warnings",
            start_time.elapsed(),
            report.sites_probed,
            report.leads_added,
            report.rejected_total(),
            report.warnings.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rejection;
    use crate::prober::tests::FakeFetcher;
    use crate::search::tests::CannedProvider;

    fn test_config() -> Config {
        Config {
            page_delay: (0.0, 0.0),
            query_delay: 0.0,
            max_pages_per_site: 10,
            ..Config::default()
        }
    }

    fn harvester(provider: Arc<CannedProvider>, fetcher: Arc<FakeFetcher>, config: Config) -> Harvester {
        let classifier = SiteClassifier::from_config(&config);
        Harvester::new(config, Some(provider), fetcher, None, classifier)
    }

    #[tokio::test]
    async fn test_two_queries_one_lead() {
        let provider = Arc::new(CannedProvider::new(&[
            (
                "home builder doral",
                &[
                    "https://quietbuilders.com/",
                    "https://www.yelp.com/biz/acme",
                    "https://www.acmebuilders.com/projects",
                ],
            ),
            (
                "home builder weston",
                &["https://acmebuilders.com/", "https://www.quietbuilders.com/team"],
            ),
        ]));
        let fetcher = Arc::new(FakeFetcher::new(&[
            ("https://quietbuilders.com/", "<html><body>Quality homes since 1990</body></html>"),
            ("https://quietbuilders.com/contact", "<body>Use the form below</body>"),
            ("https://quietbuilders.com/about", "<body>Family owned</body>"),
            (
                "https://www.acmebuilders.com/",
                "<html><head><title>Acme Builders | Doral</title></head><body>Welcome</body></html>",
            ),
            (
                "https://www.acmebuilders.com/about",
                r#"<html><head><title>Acme Builders - About Us</title></head>
                   <body><p>Call us at (305) 555-0142</p>
                   <a href="mailto:Maria@AcmeBuilders.com">Email Maria</a></body></html>"#,
            ),
        ]));
        let h = harvester(provider, fetcher.clone(), test_config());

        let queries = vec!["home builder doral".to_string(), "home builder weston".to_string()];
        let mut store = LeadStore::new();
        let report = h.harvest(&queries, &[], &mut store, &ProgressBar::hidden()).await;

        assert_eq!(store.len(), 1);
        let lead = store.iter().next().unwrap();
        assert_eq!(lead.email, "maria@acmebuilders.com");
        assert_eq!(lead.company, "Acme Builders");
        assert_eq!(lead.website, "https://www.acmebuilders.com/");
        assert_eq!(lead.phone, "(305) 555-0142");
        assert_eq!(lead.source, "canned/fake-fetch");

        assert_eq!(report.queries_issued, 2);
        assert_eq!(report.hits_total, 4);
        assert_eq!(report.sites_probed, 2);
        assert_eq!(report.sites_without_contact, 1);
        assert_eq!(report.leads_added, 1);
        assert!(
            !fetcher
                .requested()
                .iter()
                .any(|u| u == "https://www.acmebuilders.com/about-us")
        );
    }

    #[tokio::test]
    async fn test_failed_query_is_a_warning() {
        let provider = Arc::new(CannedProvider::new(&[("gc miami", &["https://acme.com/"])]));
        let fetcher = Arc::new(FakeFetcher::new(&[(
            "https://acme.com/",
            r#"<a href="mailto:joe@acme.com">mail</a>"#,
        )]));
        let h = harvester(provider, fetcher, test_config());

        let queries = vec!["unknown query".to_string(), "gc miami".to_string()];
        let mut store = LeadStore::new();
        let report = h.harvest(&queries, &[], &mut store, &ProgressBar::hidden()).await;

        assert_eq!(report.search_failures, 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_seeds_and_existing_leads() {
        let provider = Arc::new(CannedProvider::new(&[]));
        let fetcher = Arc::new(FakeFetcher::new(&[
            ("https://smitharch.net/", r#"<a href="mailto:info@smitharch.net">x</a>"#),
            ("https://acme.com/", r#"<a href="mailto:joe@acme.com">x</a>"#),
        ]));
        let config = Config {
            site_concurrency: 4,
            ..test_config()
        };
        let h = harvester(provider, fetcher, config);

        let prefixes = h.config().generic_prefixes.clone();
        let mut store = LeadStore::new();
        store
            .upsert(
                &crate::models::ProbeResult {
                    company_name: None,
                    email: Some("joe@acme.com".to_string()),
                    phone: None,
                    source_url: String::new(),
                },
                "https://acme.com/",
                "import",
                &LeadPolicy::permissive(&prefixes),
            )
            .await;

        let seeds = vec![
            "smitharch.net".to_string(),
            "https://www.facebook.com/acme".to_string(),
            "acme.com/contact".to_string(),
            "www.smitharch.net".to_string(),
        ];
        let report = h.harvest(&[], &seeds, &mut store, &ProgressBar::hidden()).await;

        assert_eq!(report.sites_probed, 2);
        assert_eq!(report.leads_added, 1);
        assert_eq!(report.rejections[&Rejection::Duplicate], 1);
        let sources: Vec<_> = store.iter().map(|l| l.source.as_str()).collect();
        assert_eq!(sources, vec!["import", "seed/fake-fetch"]);
    }

    #[tokio::test]
    async fn test_delay_between_sites() {
        let provider = Arc::new(CannedProvider::new(&[]));
        let fetcher = Arc::new(FakeFetcher::new(&[]));
        let config = Config {
            page_delay: (0.05, 0.05),
            max_pages_per_site: 2,
            ..test_config()
        };
        let h = harvester(provider, fetcher.clone(), config);

        let seeds = vec!["a.com".to_string(), "b.com".to_string()];
        let mut store = LeadStore::new();
        h.harvest(&[], &seeds, &mut store, &ProgressBar::hidden()).await;

        assert_eq!(
            fetcher.requested(),
            vec!["https://a.com/", "https://a.com/contact", "https://b.com/", "https://b.com/contact"]
        );
        let gaps = fetcher.gaps();
        assert_eq!(gaps.len(), 3);
        assert!(
            gaps.iter().all(|gap| *gap >= std::time::Duration::from_millis(50)),
            "{:?}",
            gaps
        );
    }
}
