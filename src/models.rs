//! Defines the core data structures used in the lead-harvester application.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single organic result returned by a search provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct SearchHit {
    /// The anchor text or result title.
    pub title: String,
    /// The absolute result URL.
    pub url: String,
}

impl SearchHit {
    pub(crate) fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// A site retained for probing after deduplication.
/// `registrable_domain` is unique within one run's candidate list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct CandidateSite {
    /// Scheme and host of the first-seen URL for this domain, with path `/`.
    pub root_url: String,
    /// The dedup key, e.g. "acme-builders.com".
    pub registrable_domain: String,
}

/// What the extractor found on a single page.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ProbeResult {
    pub company_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// The page the values were taken from.
    pub source_url: String,
}

impl ProbeResult {
    pub(crate) fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

/// An accepted contact. Column names match the CSV export header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Lead {
    #[serde(rename = "Company")]
    pub company: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Website")]
    pub website: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Source")]
    pub source: String,
}

/// Why the lead store refused a candidate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Rejection {
    MissingEmail,
    InvalidEmail,
    GenericInbox,
    NoMailExchange,
    Duplicate,
}

impl Rejection {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Rejection::MissingEmail => "missing_email",
            Rejection::InvalidEmail => "invalid_email",
            Rejection::GenericInbox => "generic_inbox",
            Rejection::NoMailExchange => "no_mail_exchange",
            Rejection::Duplicate => "duplicate",
        }
    }
}

/// Result of offering a candidate to the lead store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpsertOutcome {
    Added,
    Rejected(Rejection),
}

/// Summary statistics for one harvesting run. Failures are counted here rather
/// than propagated.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub(crate) struct RunReport {
    pub queries_issued: usize,
    pub queries_from_cache: usize,
    pub search_failures: usize,
    pub hits_total: usize,
    pub sites_probed: usize,
    pub sites_without_contact: usize,
    pub pages_fetched: usize,
    pub page_failures: usize,
    pub leads_added: usize,
    pub rejections: BTreeMap<Rejection, usize>,
    /// Soft warnings: failed queries, disabled capabilities.
    pub warnings: Vec<String>,
}

impl RunReport {
    pub(crate) fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Added => self.leads_added += 1,
            UpsertOutcome::Rejected(reason) => *self.rejections.entry(reason).or_default() += 1,
        }
    }

    pub(crate) fn rejected_total(&self) -> usize {
        self.rejections.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_result_has_email() {
        let mut result = ProbeResult::default();
        assert!(!result.has_email());
        result.email = Some("  ".to_string());
        assert!(!result.has_email());
        result.email = Some("sales@acme.com".to_string());
        assert!(result.has_email());
    }

    #[test]
    fn test_report_counts_rejections_by_reason() {
        let mut report = RunReport::default();
        report.record(UpsertOutcome::Added);
        report.record(UpsertOutcome::Rejected(Rejection::Duplicate));
        report.record(UpsertOutcome::Rejected(Rejection::Duplicate));
        report.record(UpsertOutcome::Rejected(Rejection::GenericInbox));
        assert_eq!(report.leads_added, 1);
        assert_eq!(report.rejections[&Rejection::Duplicate], 2);
        assert_eq!(report.rejected_total(), 3);
    }

    #[test]
    fn test_report_serializes_rejection_keys() {
        let mut report = RunReport::default();
        report.record(UpsertOutcome::Rejected(Rejection::NoMailExchange));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rejections"]["no_mail_exchange"], 1);
    }
}
