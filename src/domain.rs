//! Utility functions for handling domain names and URLs.

use crate::error::{AppError, Result};
use url::Url;

fn with_scheme(url_str: &str) -> String {
    if url_str.starts_with("http://") || url_str.starts_with("https://") {
        url_str.to_string()
    } else {
        format!("https://{}", url_str)
    }
}

/// Extracts the registrable domain (e.g., "acme.com") from a URL string.
/// Handles missing schemes, "www." prefixes, ports, paths and trailing dots.
///
/// This is the dedup key for candidate sites, so `https://acme.com/` and
/// `http://www.acme.com/about?x=1` must map to the same value.
///
/// # Returns
/// The lowercase domain, or an empty string if the input has no parsable host.
/// Never panics on malformed input.
pub(crate) fn registrable_domain(url_str: &str) -> String {
    let trimmed = url_str.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let url = match Url::parse(&with_scheme(trimmed)) {
        Ok(url) => url,
        Err(e) => {
            tracing::debug!("Cannot parse '{}' for domain extraction: {}", trimmed, e);
            return String::new();
        }
    };

    let Some(host) = url.host_str() else {
        return String::new();
    };

    let host = host.trim_end_matches('.').to_lowercase();
    let domain = host.strip_prefix("www.").unwrap_or(&host);
    if domain.is_empty() || domain.starts_with('.') {
        return String::new();
    }
    domain.to_string()
}

/// Parses the input website string into a valid Url object, adding a scheme if necessary.
pub(crate) fn normalize_url(website_url_str: &str) -> Result<Url> {
    let trimmed = website_url_str.trim();
    if trimmed.is_empty() {
        return Err(AppError::Config("Website URL is empty".to_string()));
    }
    Ok(Url::parse(&with_scheme(trimmed))?)
}

/// Returns scheme and host of `url` with path `/`, dropping query and fragment.
pub(crate) fn site_root(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    let mut root = Url::parse(&format!("{}://{}/", url.scheme(), host)).ok()?;
    if let Some(port) = url.port() {
        root.set_port(Some(port)).ok()?;
    }
    Some(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrable_domain_simple() {
        assert_eq!(registrable_domain("https://www.example.com"), "example.com");
        assert_eq!(registrable_domain("http://example.com"), "example.com");
        assert_eq!(registrable_domain("example.com"), "example.com");
    }

    #[test]
    fn test_registrable_domain_edge_cases() {
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(
            registrable_domain("https://EXAMPLE.com/path?query=1"),
            "example.com"
        );
        assert_eq!(registrable_domain("http://example.com:8080"), "example.com");
        assert_eq!(registrable_domain("https://www.example.com./"), "example.com");
        assert_eq!(
            registrable_domain("https://sub.domain.example.co.uk"),
            "sub.domain.example.co.uk"
        );
    }

    #[test]
    fn test_registrable_domain_shared_across_variants() {
        let variants = [
            "https://acme-builders.com/",
            "http://acme-builders.com",
            "https://www.acme-builders.com/projects",
            "https://www.acme-builders.com/contact?ref=ddg#form",
            "acme-builders.com/about",
        ];
        for v in variants {
            assert_eq!(registrable_domain(v), "acme-builders.com", "variant {}", v);
        }
    }

    #[test]
    fn test_registrable_domain_malformed() {
        for bad in ["", "   ", "http://", "https://", "not a url", "http://[::1", "https://exa mple.com"] {
            assert_eq!(registrable_domain(bad), "", "input {:?}", bad);
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("acme.com").unwrap().as_str(),
            "https://acme.com/"
        );
        assert!(normalize_url("").is_err());
    }

    #[test]
    fn test_site_root_drops_path_and_query() {
        let url = Url::parse("https://www.acme.com/projects/kitchen?page=2#top").unwrap();
        assert_eq!(site_root(&url).unwrap().as_str(), "https://www.acme.com/");
        let url = Url::parse("http://acme.com:8080/about").unwrap();
        assert_eq!(site_root(&url).unwrap().as_str(), "http://acme.com:8080/");
    }
}
