//! Query construction.

use crate::config::Config;
use rand::seq::SliceRandom;

/// Words that make search engines more likely to flag the request as scraping.
const TRIGGER_WORDS: &[&str] = &["email", "emails", "e-mail", "e-mails", "scrape", "leads"];

/// Removes trigger words and collapses whitespace. "contact list" is dropped as a
/// phrase; "contact" alone is kept.
pub(crate) fn gentle_query(query: &str) -> String {
    let lowered = query.to_lowercase();
    let without_phrase = lowered.replace("contact list", " ");
    without_phrase
        .split_whitespace()
        .filter(|word| {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
            !TRIGGER_WORDS.contains(&bare)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every trade crossed with every location, with `extra_terms` appended.
/// Duplicates are removed, order is trade-major.
pub(crate) fn build_queries(trades: &[String], locations: &[String], extra_terms: &str) -> Vec<String> {
    let extra = extra_terms.trim();
    let mut queries: Vec<String> = Vec::new();
    for trade in trades.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        for location in locations.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            let mut query = format!("{} {}", trade, location);
            if !extra.is_empty() {
                query.push(' ');
                query.push_str(extra);
            }
            if !queries.contains(&query) {
                queries.push(query);
            }
        }
    }
    queries
}

/// The configured query plan: trades x locations, optionally shuffled and capped.
pub(crate) fn plan_queries(config: &Config) -> Vec<String> {
    let mut queries = build_queries(&config.trades, &config.locations, &config.extra_terms);
    if config.shuffle_queries {
        queries.shuffle(&mut rand::thread_rng());
    }
    if let Some(max) = config.max_queries {
        queries.truncate(max);
    }
    queries
}
