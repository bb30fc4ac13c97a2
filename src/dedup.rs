//! Collapses search hits into one candidate site per registrable domain.

use crate::classifier::SiteClassifier;
use crate::domain::{normalize_url, registrable_domain, site_root};
use crate::models::{CandidateSite, SearchHit};
use std::collections::HashSet;

/// First occurrence of a domain wins, order is preserved, and the list stops at
/// `max` sites. Hits that fail classification are dropped without counting
/// toward `max`.
pub(crate) fn dedupe(hits: &[SearchHit], classifier: &SiteClassifier, max: usize) -> Vec<CandidateSite> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut sites = Vec::new();

    for hit in hits {
        if sites.len() >= max {
            break;
        }
        let domain = registrable_domain(&hit.url);
        if !classifier.classify_domain(&domain) || seen.contains(&domain) {
            continue;
        }
        let Some(root) = normalize_url(&hit.url).ok().as_ref().and_then(site_root) else {
            tracing::debug!("Dropping hit with unusable URL: {}", hit.url);
            continue;
        };
        seen.insert(domain.clone());
        sites.push(CandidateSite {
            root_url: root.to_string(),
            registrable_domain: domain,
        });
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn classifier() -> SiteClassifier {
        SiteClassifier::from_config(&Config::default())
    }

    fn hits(urls: &[&str]) -> Vec<SearchHit> {
        urls.iter().map(|u| SearchHit::new("", *u)).collect()
    }

    #[test]
    fn test_first_seen_url_wins() {
        let sites = dedupe(
            &hits(&["https://acme-builders.com/", "https://www.acme-builders.com/projects"]),
            &classifier(),
            10,
        );
        assert_eq!(
            sites,
            vec![CandidateSite {
                root_url: "https://acme-builders.com/".to_string(),
                registrable_domain: "acme-builders.com".to_string(),
            }]
        );
    }

    #[test]
    fn test_root_comes_from_first_seen_host() {
        let sites = dedupe(
            &hits(&["http://www.smitharch.net/team?x=1", "https://smitharch.net"]),
            &classifier(),
            10,
        );
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].root_url, "http://www.smitharch.net/");
    }

    #[test]
    fn test_rejected_hits_do_not_count_toward_max() {
        let input = hits(&[
            "https://www.facebook.com/acme",
            "https://www.yelp.com/biz/acme",
            "https://acme.com/contact",
            "not a url",
            "https://bestroof.org",
            "https://third.io",
        ]);
        let sites = dedupe(&input, &classifier(), 2);
        let domains: Vec<_> = sites.iter().map(|s| s.registrable_domain.as_str()).collect();
        assert_eq!(domains, vec!["acme.com", "bestroof.org"]);
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let input = hits(&[
            "https://a.com/x",
            "https://www.a.com/y",
            "https://b.net",
            "https://linkedin.com/company/b",
            "https://c.org/about",
        ]);
        let c = classifier();
        let once = dedupe(&input, &c, 10);
        let as_hits: Vec<SearchHit> = once
            .iter()
            .map(|site| SearchHit::new("", site.root_url.clone()))
            .collect();
        assert_eq!(dedupe(&as_hits, &c, 10), once);
        assert_eq!(dedupe(&input, &c, 10), once);
    }

    #[test]
    fn test_zero_max_yields_nothing() {
        assert!(dedupe(&hits(&["https://a.com"]), &classifier(), 0).is_empty());
    }
}
