//! Defines the configuration settings for the lead-harvester application.

use crate::error::{AppError, Result};
use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration overrides accepted on the command line (and via environment).
#[derive(Args, Debug, Default, Clone)]
pub(crate) struct ConfigArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, global = true, env = "LEAD_HARVESTER_CONFIG")]
    pub config_file: Option<String>,

    /// Search provider: "duckduckgo" or "json"
    #[arg(long, global = true, env = "LEAD_HARVESTER_PROVIDER")]
    pub provider: Option<String>,

    /// Maximum search results kept per query
    #[arg(long, global = true, env = "LEAD_HARVESTER_RESULTS_PER_QUERY")]
    pub results_per_query: Option<usize>,

    /// Maximum number of distinct sites probed per run
    #[arg(long, global = true, env = "LEAD_HARVESTER_MAX_SITES")]
    pub max_sites: Option<usize>,

    /// Maximum pages fetched per site (root page included)
    #[arg(long, global = true, env = "LEAD_HARVESTER_MAX_PAGES")]
    pub max_pages: Option<usize>,

    /// Number of sites probed concurrently
    #[arg(long, global = true, env = "LEAD_HARVESTER_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Comma-separated list of page suffixes probed after the root page
    #[arg(long, global = true, env = "LEAD_HARVESTER_PAGES")]
    pub pages: Option<String>,

    /// Minimum sleep between page fetches (seconds)
    #[arg(long, global = true, env = "LEAD_HARVESTER_MIN_SLEEP")]
    pub min_sleep: Option<f32>,

    /// Maximum sleep between page fetches (seconds)
    #[arg(long, global = true, env = "LEAD_HARVESTER_MAX_SLEEP")]
    pub max_sleep: Option<f32>,

    /// Base sleep between search queries (seconds); up to one second of jitter is added
    #[arg(long, global = true, env = "LEAD_HARVESTER_QUERY_DELAY")]
    pub query_delay: Option<f32>,

    /// HTTP request timeout in seconds
    #[arg(long, global = true, env = "LEAD_HARVESTER_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// Attempts per network call before giving up
    #[arg(long, global = true, env = "LEAD_HARVESTER_RETRY_ATTEMPTS")]
    pub retry_attempts: Option<u32>,

    /// User agent string for HTTP requests
    #[arg(long, global = true, env = "LEAD_HARVESTER_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Reject role inboxes such as info@ or sales@
    #[arg(long, global = true, env = "LEAD_HARVESTER_SKIP_GENERIC")]
    pub skip_generic: bool,

    /// Reject emails whose domain publishes no MX record
    #[arg(long, global = true, env = "LEAD_HARVESTER_VERIFY_MX")]
    pub verify_mx: bool,

    /// DNS resolution timeout in seconds
    #[arg(long, global = true, env = "LEAD_HARVESTER_DNS_TIMEOUT")]
    pub dns_timeout: Option<u64>,

    /// Comma-separated list of DNS servers
    #[arg(long, global = true, env = "LEAD_HARVESTER_DNS_SERVERS")]
    pub dns_servers: Option<String>,

    /// Fetch pages through this unlocker proxy endpoint
    #[arg(long, global = true, env = "LEAD_HARVESTER_UNLOCKER_ENDPOINT")]
    pub unlocker_endpoint: Option<String>,
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    network: Option<NetworkConfig>,
    search: Option<SearchConfig>,
    json_api: Option<JsonApiConfig>,
    fetch: Option<FetchConfig>,
    unlocker: Option<UnlockerConfig>,
    classifier: Option<ClassifierConfig>,
    leads: Option<LeadsConfig>,
    dns: Option<DnsConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct NetworkConfig {
    request_timeout: Option<u64>,
    min_sleep: Option<f32>,
    max_sleep: Option<f32>,
    query_delay: Option<f32>,
    retry_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    user_agent: Option<String>,
    accept_language: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct SearchConfig {
    provider: Option<ProviderKind>,
    results_per_query: Option<usize>,
    max_sites: Option<usize>,
    cache_ttl_secs: Option<u64>,
    gentle_queries: Option<bool>,
    trades: Option<Vec<String>>,
    locations: Option<Vec<String>>,
    extra_terms: Option<String>,
    shuffle_queries: Option<bool>,
    max_queries: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
struct JsonApiConfig {
    name: Option<String>,
    endpoint: Option<String>,
    method: Option<HttpMethod>,
    key_placement: Option<KeyPlacement>,
    key_name: Option<String>,
    api_key_env: Option<String>,
    query_param: Option<String>,
    count_param: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct FetchConfig {
    pages: Option<Vec<String>>,
    max_pages_per_site: Option<usize>,
    site_concurrency: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
struct UnlockerConfig {
    endpoint: Option<String>,
    api_key_env: Option<String>,
    url_param: Option<String>,
    key_param: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ClassifierConfig {
    blocked_domains: Option<Vec<String>>,
    infrastructure_domains: Option<Vec<String>>,
    allowed_suffixes: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct LeadsConfig {
    skip_generic_inboxes: Option<bool>,
    verify_mx: Option<bool>,
    generic_prefixes: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct DnsConfig {
    dns_timeout: Option<u64>,
    dns_servers: Option<Vec<String>>,
}

/// Which search provider drives the run.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ProviderKind {
    #[serde(alias = "ddg")]
    DuckDuckGo,
    Json,
}

impl std::str::FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "duckduckgo" | "ddg" => Ok(ProviderKind::DuckDuckGo),
            "json" | "api" => Ok(ProviderKind::Json),
            other => Err(AppError::Config(format!("Unknown search provider '{}'", other))),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum HttpMethod {
    Get,
    Post,
}

/// Where the JSON search API expects its key.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum KeyPlacement {
    Header,
    Query,
}

/// Settings for a structured JSON search API.
#[derive(Debug, Clone)]
pub(crate) struct JsonApiSettings {
    /// Short provider name, used in lead `source` values and cache keys.
    pub name: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub key_placement: KeyPlacement,
    /// Header name or query parameter name carrying the key.
    pub key_name: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub query_param: String,
    pub count_param: String,
}

/// Settings for an optional fetch proxy.
#[derive(Debug, Clone)]
pub(crate) struct UnlockerSettings {
    pub endpoint: String,
    pub api_key_env: String,
    /// Parameter carrying the target URL.
    pub url_param: String,
    /// Parameter carrying the API key.
    pub key_param: String,
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Timeout for individual HTTP requests.
    pub request_timeout: Duration,
    /// User agent string to use for HTTP requests.
    pub user_agent: String,
    /// Accept-Language header sent with every request.
    pub accept_language: String,
    /// Minimum and maximum sleep between page fetches (seconds).
    pub page_delay: (f32, f32),
    /// Base sleep between search queries (seconds).
    pub query_delay: f32,
    /// Attempts per network call, the first included.
    pub retry_attempts: u32,
    /// First backoff step; doubled on each retry.
    pub retry_base_delay: Duration,

    pub provider: ProviderKind,
    pub results_per_query: usize,
    pub max_sites: usize,
    pub cache_ttl: Duration,
    /// Strip words that make search engines suspicious of scrapers.
    pub gentle_queries: bool,
    pub trades: Vec<String>,
    pub locations: Vec<String>,
    pub extra_terms: String,
    pub shuffle_queries: bool,
    pub max_queries: Option<usize>,
    pub json_api: JsonApiSettings,

    /// Page suffixes probed after the root page, highest priority first.
    pub page_suffixes: Vec<String>,
    pub max_pages_per_site: usize,
    pub site_concurrency: usize,
    pub unlocker: Option<UnlockerSettings>,

    /// Extra entries appended to the built-in social/aggregator blocklist.
    pub blocked_domains: Vec<String>,
    /// Extra entries appended to the built-in infrastructure blocklist.
    pub infrastructure_domains: Vec<String>,
    pub allowed_suffixes: Vec<String>,

    pub skip_generic_inboxes: bool,
    pub verify_mx: bool,
    /// Set of role-inbox local parts (e.g., "info", "contact").
    pub generic_prefixes: HashSet<String>,

    /// Timeout for DNS resolution queries.
    pub dns_timeout: Duration,
    /// DNS servers to use for resolution.
    pub dns_servers: Vec<String>,
}

fn default_trades() -> Vec<String> {
    [
        "general contractor",
        "licensed contractor",
        "building contractor",
        "home builder",
        "construction company",
        "architect",
        "architecture firm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_locations() -> Vec<String> {
    [
        "Miami, Florida",
        "Miami Beach, Florida",
        "Coral Gables, Florida",
        "Doral, Florida",
        "Hialeah, Florida",
        "Homestead, Florida",
        "Fort Lauderdale, Florida",
        "Hollywood, Florida",
        "Pembroke Pines, Florida",
        "Coral Springs, Florida",
        "Pompano Beach, Florida",
        "Weston, Florida",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        let page_suffixes = [
            "/contact",
            "/contact-us",
            "/contactus",
            "/about",
            "/about-us",
            "/team",
        ];

        let generic_prefixes: HashSet<String> = [
            "info", "contact", "sales", "hello", "admin", "support", "office", "team",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Config {
            request_timeout: Duration::from_secs(20),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            page_delay: (0.8, 1.6),
            query_delay: 1.5,
            retry_attempts: 5,
            retry_base_delay: Duration::from_millis(500),

            provider: ProviderKind::DuckDuckGo,
            results_per_query: 8,
            max_sites: 60,
            cache_ttl: Duration::from_secs(3600),
            gentle_queries: true,
            trades: default_trades(),
            locations: default_locations(),
            extra_terms: String::new(),
            shuffle_queries: true,
            max_queries: None,
            json_api: JsonApiSettings {
                name: "bing".to_string(),
                endpoint: "https://api.bing.microsoft.com/v7.0/search".to_string(),
                method: HttpMethod::Get,
                key_placement: KeyPlacement::Header,
                key_name: "Ocp-Apim-Subscription-Key".to_string(),
                api_key_env: "LEAD_HARVESTER_SEARCH_API_KEY".to_string(),
                query_param: "q".to_string(),
                count_param: "count".to_string(),
            },

            page_suffixes: page_suffixes.iter().map(|s| s.to_string()).collect(),
            max_pages_per_site: 3,
            site_concurrency: 1,
            unlocker: None,

            blocked_domains: Vec::new(),
            infrastructure_domains: Vec::new(),
            allowed_suffixes: ["com", "net", "org", "io", "co", "us"]
                .iter()
                .map(|s| s.to_string())
                .collect(),

            skip_generic_inboxes: false,
            verify_mx: false,
            generic_prefixes,

            dns_timeout: Duration::from_secs(5),
            dns_servers: vec![
                "8.8.8.8".to_string(),
                "8.8.4.4".to_string(),
                "1.1.1.1".to_string(),
                "1.0.0.1".to_string(),
            ],
        }
    }
}

impl Config {
    /// Name used in lead `source` values and search cache keys.
    pub(crate) fn provider_name(&self) -> &str {
        match self.provider {
            ProviderKind::DuckDuckGo => "duckduckgo",
            ProviderKind::Json => &self.json_api.name,
        }
    }
}

/// Reads a secret from the named environment variable.
pub(crate) fn read_secret(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(AppError::Config(format!(
            "Environment variable {} is not set",
            env_var
        ))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!("Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config = parse_config_file(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::info!("Loaded configuration from {}", file_path);
    Ok(config)
}

fn parse_config_file(content: &str) -> std::result::Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    if let Some(network) = &file_config.network {
        if let Some(timeout) = network.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(min_sleep) = network.min_sleep {
            config.page_delay.0 = min_sleep;
        }
        if let Some(max_sleep) = network.max_sleep {
            config.page_delay.1 = max_sleep;
        }
        if let Some(delay) = network.query_delay {
            config.query_delay = delay;
        }
        if let Some(attempts) = network.retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(ms) = network.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(user_agent) = &network.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(lang) = &network.accept_language {
            config.accept_language = lang.clone();
        }
    }

    if let Some(search) = &file_config.search {
        if let Some(provider) = search.provider {
            config.provider = provider;
        }
        if let Some(n) = search.results_per_query {
            config.results_per_query = n;
        }
        if let Some(n) = search.max_sites {
            config.max_sites = n;
        }
        if let Some(ttl) = search.cache_ttl_secs {
            config.cache_ttl = Duration::from_secs(ttl);
        }
        if let Some(gentle) = search.gentle_queries {
            config.gentle_queries = gentle;
        }
        if let Some(trades) = &search.trades {
            config.trades = trades.clone();
        }
        if let Some(locations) = &search.locations {
            config.locations = locations.clone();
        }
        if let Some(extra) = &search.extra_terms {
            config.extra_terms = extra.clone();
        }
        if let Some(shuffle) = search.shuffle_queries {
            config.shuffle_queries = shuffle;
        }
        if search.max_queries.is_some() {
            config.max_queries = search.max_queries;
        }
    }

    if let Some(api) = &file_config.json_api {
        let target = &mut config.json_api;
        if let Some(name) = &api.name {
            target.name = name.clone();
        }
        if let Some(endpoint) = &api.endpoint {
            target.endpoint = endpoint.clone();
        }
        if let Some(method) = api.method {
            target.method = method;
        }
        if let Some(placement) = api.key_placement {
            target.key_placement = placement;
        }
        if let Some(key_name) = &api.key_name {
            target.key_name = key_name.clone();
        }
        if let Some(env) = &api.api_key_env {
            target.api_key_env = env.clone();
        }
        if let Some(param) = &api.query_param {
            target.query_param = param.clone();
        }
        if let Some(param) = &api.count_param {
            target.count_param = param.clone();
        }
    }

    if let Some(fetch) = &file_config.fetch {
        if let Some(pages) = &fetch.pages {
            config.page_suffixes = pages.clone();
        }
        if let Some(n) = fetch.max_pages_per_site {
            config.max_pages_per_site = n;
        }
        if let Some(n) = fetch.site_concurrency {
            config.site_concurrency = n;
        }
    }

    if let Some(unlocker) = &file_config.unlocker {
        if let Some(endpoint) = &unlocker.endpoint {
            config.unlocker = Some(UnlockerSettings {
                endpoint: endpoint.clone(),
                api_key_env: unlocker
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| "LEAD_HARVESTER_UNLOCKER_KEY".to_string()),
                url_param: unlocker.url_param.clone().unwrap_or_else(|| "url".to_string()),
                key_param: unlocker
                    .key_param
                    .clone()
                    .unwrap_or_else(|| "token".to_string()),
            });
        }
    }

    if let Some(classifier) = &file_config.classifier {
        if let Some(blocked) = &classifier.blocked_domains {
            config.blocked_domains = blocked.clone();
        }
        if let Some(infra) = &classifier.infrastructure_domains {
            config.infrastructure_domains = infra.clone();
        }
        if let Some(suffixes) = &classifier.allowed_suffixes {
            config.allowed_suffixes = suffixes.clone();
        }
    }

    if let Some(leads) = &file_config.leads {
        if let Some(skip) = leads.skip_generic_inboxes {
            config.skip_generic_inboxes = skip;
        }
        if let Some(verify) = leads.verify_mx {
            config.verify_mx = verify;
        }
        if let Some(prefixes) = &leads.generic_prefixes {
            config.generic_prefixes = prefixes.iter().cloned().collect();
        }
    }

    if let Some(dns) = &file_config.dns {
        if let Some(timeout) = dns.dns_timeout {
            config.dns_timeout = Duration::from_secs(timeout);
        }
        if let Some(servers) = &dns.dns_servers {
            config.dns_servers = servers.clone();
        }
    }
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &ConfigArgs) -> anyhow::Result<()> {
    if let Some(ref provider) = args.provider {
        config.provider = provider.parse()?;
    }
    if let Some(n) = args.results_per_query {
        config.results_per_query = n;
    }
    if let Some(n) = args.max_sites {
        config.max_sites = n;
    }
    if let Some(n) = args.max_pages {
        config.max_pages_per_site = n;
    }
    if let Some(n) = args.concurrency {
        config.site_concurrency = n;
    }
    if let Some(ref pages) = args.pages {
        config.page_suffixes = split_list(pages);
    }
    if let Some(min_sleep) = args.min_sleep {
        config.page_delay.0 = min_sleep;
    }
    if let Some(max_sleep) = args.max_sleep {
        config.page_delay.1 = max_sleep;
    }
    if let Some(delay) = args.query_delay {
        config.query_delay = delay;
    }
    if let Some(timeout) = args.request_timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }
    if let Some(attempts) = args.retry_attempts {
        config.retry_attempts = attempts;
    }
    if let Some(ref agent) = args.user_agent {
        config.user_agent = agent.clone();
    }
    if args.skip_generic {
        config.skip_generic_inboxes = true;
    }
    if args.verify_mx {
        config.verify_mx = true;
    }
    if let Some(timeout) = args.dns_timeout {
        config.dns_timeout = Duration::from_secs(timeout);
    }
    if let Some(ref servers) = args.dns_servers {
        config.dns_servers = split_list(servers);
    }
    if let Some(ref endpoint) = args.unlocker_endpoint {
        match config.unlocker.as_mut() {
            Some(unlocker) => unlocker.endpoint = endpoint.clone(),
            None => {
                config.unlocker = Some(UnlockerSettings {
                    endpoint: endpoint.clone(),
                    api_key_env: "LEAD_HARVESTER_UNLOCKER_KEY".to_string(),
                    url_param: "url".to_string(),
                    key_param: "token".to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Upper bound for any politeness delay, in seconds.
const MAX_DELAY_SECS: f32 = 300.0;

/// Clamps a delay into `0..=MAX_DELAY_SECS`; NaN becomes zero.
fn clamp_delay(secs: f32) -> f32 {
    if secs.is_nan() {
        0.0
    } else {
        secs.clamp(0.0, MAX_DELAY_SECS)
    }
}

fn validate_config(config: &mut Config) {
    let page_delay = (clamp_delay(config.page_delay.0), clamp_delay(config.page_delay.1));
    if page_delay != config.page_delay {
        tracing::warn!(
            "Sleep range {:?} is outside 0..={} seconds. Using {:?}",
            config.page_delay,
            MAX_DELAY_SECS,
            page_delay
        );
        config.page_delay = page_delay;
    }
    if config.page_delay.0 > config.page_delay.1 {
        config.page_delay.1 = config.page_delay.0;
        tracing::warn!(
            "Min sleep was greater than max sleep. Setting both to {}",
            config.page_delay.0
        );
    }

    let query_delay = clamp_delay(config.query_delay);
    if query_delay != config.query_delay {
        tracing::warn!(
            "Query delay {} is outside 0..={} seconds. Using {}",
            config.query_delay,
            MAX_DELAY_SECS,
            query_delay
        );
        config.query_delay = query_delay;
    }

    if config.retry_attempts == 0 {
        config.retry_attempts = 1;
        tracing::warn!("Retry attempts was set to 0. Setting to 1.");
    } else if config.retry_attempts > 6 {
        config.retry_attempts = 6;
        tracing::warn!("Retry attempts exceeded maximum (6). Setting to 6.");
    }

    if config.results_per_query == 0 {
        config.results_per_query = 1;
        tracing::warn!("Results per query was set to 0. Setting to 1.");
    }

    if config.max_pages_per_site == 0 {
        config.max_pages_per_site = 1;
        tracing::warn!("Max pages per site was set to 0. Setting to 1.");
    }

    if config.site_concurrency == 0 {
        config.site_concurrency = 1;
        tracing::warn!("Concurrency was set to 0. Setting to 1.");
    }

    if config.dns_servers.is_empty() {
        config.dns_servers = vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()];
        tracing::warn!("DNS servers list was empty. Setting to default public DNS servers.");
    }

    config.allowed_suffixes = config
        .allowed_suffixes
        .iter()
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if config.allowed_suffixes.is_empty() {
        config.allowed_suffixes = Config::default().allowed_suffixes;
        tracing::warn!("Allowed suffix list was empty. Restoring defaults.");
    }

    config.generic_prefixes = config
        .generic_prefixes
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    config.page_suffixes = config
        .page_suffixes
        .iter()
        .map(|s| {
            let s = s.trim();
            if s.is_empty() || s.starts_with('/') {
                s.to_string()
            } else {
                format!("/{}", s)
            }
        })
        .filter(|s| !s.is_empty())
        .collect();
}

pub(crate) fn build_config(args: &ConfigArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        match load_config_file(file_path) {
            Ok(file_config) => apply_file_config(&mut config, &file_config),
            Err(e) => {
                tracing::error!("Failed to load configuration file: {}", e);
            }
        }
    } else {
        for path in ["./lead-harvester.toml", "./config.toml"] {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args)?;

    validate_config(&mut config);

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}

/// A random duration within `(min, max)` seconds.
pub(crate) fn random_delay((min, max): (f32, f32)) -> Duration {
    use rand::Rng;
    let (min, max) = (clamp_delay(min), clamp_delay(max));
    if min >= max {
        return Duration::from_secs_f32(min);
    }
    let duration_secs = rand::thread_rng().gen_range(min..max);
    Duration::from_secs_f32(duration_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_conservative() {
        let config = Config::default();
        assert!(!config.skip_generic_inboxes);
        assert!(!config.verify_mx);
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.provider, ProviderKind::DuckDuckGo);
        assert_eq!(config.provider_name(), "duckduckgo");
        assert!(config.generic_prefixes.contains("office"));
    }

    #[test]
    fn test_file_config_overrides_defaults() {
        let file = parse_config_file(
            r#"
            [search]
            provider = "json"
            max_sites = 10

            [json_api]
            name = "serpapi"
            method = "POST"
            key_placement = "query"
            key_name = "api_key"

            [fetch]
            pages = ["contact", "/about"]

            [unlocker]
            endpoint = "https://unlocker.example.net/v1"

            [leads]
            skip_generic_inboxes = true
            generic_prefixes = ["Info", "billing"]

            [classifier]
            allowed_suffixes = [".COM", "biz"]
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        apply_file_config(&mut config, &file);
        validate_config(&mut config);

        assert_eq!(config.provider, ProviderKind::Json);
        assert_eq!(config.provider_name(), "serpapi");
        assert_eq!(config.max_sites, 10);
        assert_eq!(config.json_api.method, HttpMethod::Post);
        assert_eq!(config.json_api.key_placement, KeyPlacement::Query);
        assert_eq!(config.page_suffixes, vec!["/contact", "/about"]);
        assert_eq!(config.unlocker.as_ref().unwrap().url_param, "url");
        assert!(config.skip_generic_inboxes);
        assert!(config.generic_prefixes.contains("info"));
        assert!(config.generic_prefixes.contains("billing"));
        assert_eq!(config.allowed_suffixes, vec!["com", "biz"]);
    }

    #[test]
    fn test_cli_args_override_file() {
        let mut config = Config::default();
        let args = ConfigArgs {
            provider: Some("ddg".to_string()),
            pages: Some("/kontakt, /impressum".to_string()),
            verify_mx: true,
            concurrency: Some(0),
            retry_attempts: Some(12),
            ..Default::default()
        };
        apply_cli_args(&mut config, &args).unwrap();
        validate_config(&mut config);

        assert_eq!(config.provider, ProviderKind::DuckDuckGo);
        assert_eq!(config.page_suffixes, vec!["/kontakt", "/impressum"]);
        assert!(config.verify_mx);
        assert_eq!(config.site_concurrency, 1);
        assert_eq!(config.retry_attempts, 6);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let mut config = Config::default();
        let args = ConfigArgs {
            provider: Some("altavista".to_string()),
            ..Default::default()
        };
        assert!(apply_cli_args(&mut config, &args).is_err());
    }

    #[test]
    fn test_sleep_range_is_repaired() {
        let mut config = Config::default();
        config.page_delay = (2.0, 1.0);
        validate_config(&mut config);
        assert_eq!(config.page_delay, (2.0, 2.0));
        assert_eq!(random_delay(config.page_delay), Duration::from_secs_f32(2.0));
    }

    #[test]
    fn test_non_finite_and_huge_delays_are_clamped() {
        let mut config = Config::default();
        config.page_delay = (f32::NAN, 1e12);
        config.query_delay = f32::INFINITY;
        validate_config(&mut config);
        assert_eq!(config.page_delay, (0.0, MAX_DELAY_SECS));
        assert_eq!(config.query_delay, MAX_DELAY_SECS);

        assert_eq!(random_delay((f32::NAN, f32::NAN)), Duration::ZERO);
        assert!(random_delay((f32::INFINITY, f32::INFINITY)) <= Duration::from_secs_f32(MAX_DELAY_SECS));
        assert_eq!(random_delay((-3.0, -1.0)), Duration::ZERO);
    }

    #[test]
    fn test_random_delay_within_range() {
        for _ in 0..20 {
            let d = random_delay((0.1, 0.2));
            assert!(d >= Duration::from_secs_f32(0.1) && d < Duration::from_secs_f32(0.2));
        }
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let err = read_secret("LEAD_HARVESTER_TEST_SECRET_THAT_IS_NEVER_SET").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
