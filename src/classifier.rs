//! Decides whether a URL is plausibly an independent business site.
//!
//! Precision over recall: crawling a directory wastes probe budget and fills the
//! lead list with aggregator staff addresses, while skipping a valid `.biz` site
//! costs one lead.

use crate::config::Config;
use crate::domain::registrable_domain;

/// Social networks, review sites, portfolio aggregators and lead marketplaces.
const SOCIAL_AGGREGATOR_BLOCKLIST: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "twitter.com",
    "x.com",
    "pinterest.com",
    "tiktok.com",
    "youtube.com",
    "reddit.com",
    "nextdoor.com",
    "yelp.com",
    "houzz.com",
    "thumbtack.com",
    "angieslist.com",
    "angi.com",
    "homeadvisor.com",
    "porch.com",
    "buildzoom.com",
    "bbb.org",
    "yellowpages.com",
    "manta.com",
    "mapquest.com",
    "indeed.com",
    "glassdoor.com",
    "wikipedia.org",
];

/// Search engines, their caches, and generic map/support hosts.
const INFRASTRUCTURE_BLOCKLIST: &[&str] = &[
    "duckduckgo.com",
    "google.com",
    "googleusercontent.com",
    "goo.gl",
    "g.page",
    "bing.com",
    "microsoft.com",
    "yahoo.com",
    "apple.com",
    "archive.org",
];

/// Compiled classification rules. Built once per run.
#[derive(Debug, Clone)]
pub(crate) struct SiteClassifier {
    social: Vec<String>,
    infrastructure: Vec<String>,
    allowed_suffixes: Vec<String>,
}

/// True if `domain` is `entry` or a subdomain of it.
fn domain_matches(domain: &str, entry: &str) -> bool {
    domain == entry
        || domain
            .strip_suffix(entry)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn normalize_entries<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for entry in entries {
        let entry = registrable_domain(entry);
        if !entry.is_empty() && !out.contains(&entry) {
            out.push(entry);
        }
    }
    out
}

impl SiteClassifier {
    pub(crate) fn new(
        extra_blocked: &[String],
        extra_infrastructure: &[String],
        allowed_suffixes: &[String],
    ) -> Self {
        Self {
            social: normalize_entries(
                SOCIAL_AGGREGATOR_BLOCKLIST
                    .iter()
                    .copied()
                    .chain(extra_blocked.iter().map(String::as_str)),
            ),
            infrastructure: normalize_entries(
                INFRASTRUCTURE_BLOCKLIST
                    .iter()
                    .copied()
                    .chain(extra_infrastructure.iter().map(String::as_str)),
            ),
            allowed_suffixes: allowed_suffixes
                .iter()
                .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub(crate) fn from_config(config: &Config) -> Self {
        Self::new(
            &config.blocked_domains,
            &config.infrastructure_domains,
            &config.allowed_suffixes,
        )
    }

    /// Also treat `host` (typically a search API endpoint) as infrastructure.
    pub(crate) fn with_infrastructure_host(mut self, host: &str) -> Self {
        let domain = registrable_domain(host);
        if !domain.is_empty() && !self.infrastructure.contains(&domain) {
            self.infrastructure.push(domain);
        }
        self
    }

    /// Applies the rules in order: empty domain, social/aggregator blocklist,
    /// infrastructure blocklist, suffix allow-list.
    pub(crate) fn is_business_site(&self, url: &str) -> bool {
        self.classify_domain(&registrable_domain(url))
    }

    /// Same as [`is_business_site`](Self::is_business_site) for an already
    /// extracted registrable domain.
    pub(crate) fn classify_domain(&self, domain: &str) -> bool {
        if domain.is_empty() {
            return false;
        }
        if self.social.iter().any(|entry| domain_matches(domain, entry)) {
            tracing::trace!("Rejecting {}: social/aggregator host", domain);
            return false;
        }
        if self
            .infrastructure
            .iter()
            .any(|entry| domain_matches(domain, entry))
        {
            tracing::trace!("Rejecting {}: search/infrastructure host", domain);
            return false;
        }
        let suffix = domain.rsplit('.').next().unwrap_or("");
        self.allowed_suffixes.iter().any(|allowed| allowed == suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SiteClassifier {
        SiteClassifier::from_config(&Config::default())
    }

    #[test]
    fn test_rejects_social_and_aggregators() {
        let c = classifier();
        assert!(!c.is_business_site("https://www.facebook.com/somepage"));
        assert!(!c.is_business_site("https://m.facebook.com/acme"));
        assert!(!c.is_business_site("https://www.yelp.com/biz/acme-builders-miami"));
        assert!(!c.is_business_site("https://www.houzz.com/professionals/general-contractors"));
        assert!(!c.is_business_site("https://www.bbb.org/us/fl/miami/profile/acme"));
    }

    #[test]
    fn test_rejects_infrastructure() {
        let c = classifier();
        assert!(!c.is_business_site("https://duckduckgo.com/y.js?ad=1"));
        assert!(!c.is_business_site("https://maps.google.com/?cid=123"));
        assert!(!c.is_business_site("https://webcache.googleusercontent.com/search?q=cache:x"));
    }

    #[test]
    fn test_accepts_business_sites() {
        let c = classifier();
        assert!(c.is_business_site("https://acmebuilders.net"));
        assert!(c.is_business_site("https://www.acme-builders.com/projects"));
        assert!(c.is_business_site("smitharchitects.us"));
    }

    #[test]
    fn test_suffix_allow_list() {
        let c = classifier();
        assert!(!c.is_business_site("https://acme.biz"));
        assert!(!c.is_business_site("https://acme.co.uk"));
        let extended = SiteClassifier::new(&[], &[], &["com".to_string(), ".BIZ".to_string()]);
        assert!(extended.is_business_site("https://acme.biz"));
    }

    #[test]
    fn test_rejects_empty_domain() {
        let c = classifier();
        assert!(!c.is_business_site(""));
        assert!(!c.is_business_site("http://"));
    }

    #[test]
    fn test_suffix_match_needs_label_boundary() {
        let c = classifier();
        // "notfacebook.com" is not a subdomain of facebook.com.
        assert!(c.is_business_site("https://notfacebook.com"));
        assert!(c.is_business_site("https://box.com"));
    }

    #[test]
    fn test_extra_entries_and_endpoint_host() {
        let c = SiteClassifier::new(
            &["https://www.buildersdirectory.com".to_string()],
            &[],
            &["com".to_string()],
        )
        .with_infrastructure_host("https://api.searchvendor.com/v1/search");
        assert!(!c.is_business_site("https://buildersdirectory.com/fl"));
        assert!(!c.is_business_site("https://api.searchvendor.com/cache/1"));
        assert!(c.is_business_site("https://searchvendor.com"));
    }
}
