//! The email and phone patterns used for extraction and validation.
//!
//! Obfuscated addresses ("name [at] domain") and non-NANP phone formats are not
//! matched.

use lettre::Address;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::str::FromStr;

/// Email pattern, v1. Word-bounded so it does not swallow surrounding punctuation.
pub(crate) static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("Failed to compile email regex pattern. This should not happen.")
});

/// North American phone pattern, v1: optional +1, area code with or without
/// parentheses, `.`/`-`/space separators.
pub(crate) static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b")
        .expect("Failed to compile phone regex pattern. This should not happen.")
});

/// Substrings marking placeholder addresses or asset filenames picked up by the
/// email pattern (`logo@2x.png` and friends).
const NOISE_MARKERS: &[&str] = &[
    "example.com",
    "domain.com",
    "test@",
    "sentry",
    "wixpress.com",
    ".png",
    ".jpg",
    ".jpeg",
    ".gif",
    ".svg",
    ".webp",
];

/// True if the address looks like a placeholder or an image filename.
pub(crate) fn is_noise_email(email: &str) -> bool {
    let lower = email.to_lowercase();
    NOISE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Syntactic validation: the whole string must match the email pattern and parse
/// as an RFC 5321 address.
pub(crate) fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some(m) = EMAIL_REGEX.find(email) else {
        return false;
    };
    if m.start() != 0 || m.end() != email.len() {
        return false;
    }
    Address::from_str(email).is_ok()
}

/// True if the lowercase local part is one of `generic_prefixes`.
pub(crate) fn is_generic_inbox(email: &str, generic_prefixes: &HashSet<String>) -> bool {
    email
        .split('@')
        .next()
        .map(|local| generic_prefixes.contains(local.trim().to_lowercase().as_str()))
        .unwrap_or(false)
}

/// The domain part of an address, lowercased.
pub(crate) fn email_domain(email: &str) -> Option<String> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_lowercase())
        .filter(|d| !d.is_empty())
}

/// Collapses a matched phone number's internal whitespace.
pub(crate) fn clean_phone(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
