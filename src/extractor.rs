//! Derives a company name, a primary email and a primary phone from page markup.

use crate::models::ProbeResult;
use crate::patterns::{EMAIL_REGEX, PHONE_REGEX, clean_phone, is_noise_email, is_valid_email};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static PHONE_ELEMENT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a[href^='tel:'], a[href^='TEL:'], [itemprop='telephone']").unwrap()
});
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static H1_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Title separators; the company name is whatever precedes the first one.
/// The ASCII hyphen only counts when spaced, so "Smith-Jones Builders" survives.
const TITLE_SEPARATORS: &[&str] = &["|", "\u{2013}", "\u{2014}", " - ", "::", "\u{00b7}"];

/// Runs every extractor over `html`. Never fails; missing values stay `None`.
///
/// # Arguments
/// * `html` - The page markup.
/// * `page_url` - Recorded as the result's `source_url`.
/// * `fallback_name` - Company name used when neither title nor `h1` yields one,
///   usually the site's registrable domain.
pub(crate) fn extract(html: &str, page_url: &str, fallback_name: &str) -> ProbeResult {
    let document = Html::parse_document(html);
    let text = visible_text(&document);

    let email = mailto_email(&document).or_else(|| text_email(&text));
    let phone = marked_phone(&document).or_else(|| text_phone(&text));
    let company_name = company_name(&document).or_else(|| {
        let fallback = fallback_name.trim();
        (!fallback.is_empty()).then(|| fallback.to_string())
    });

    tracing::trace!(target: "probe_task",
        "Extracted from {}: company={:?} email={:?} phone={:?}",
        page_url, company_name, email, phone
    );

    ProbeResult {
        company_name,
        email,
        phone,
        source_url: page_url.to_string(),
    }
}

/// Text of the body (or the whole document), skipping script and style contents.
fn visible_text(document: &Html) -> String {
    let root = document
        .select(&BODY_SELECTOR)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut text_content = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|el| el.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript" | "template"));
        if hidden {
            continue;
        }
        let fragment = text.trim();
        if !fragment.is_empty() {
            text_content.push_str(fragment);
            text_content.push(' ');
        }
    }
    text_content
}

fn accept_email(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.is_empty() || is_noise_email(candidate) || !is_valid_email(candidate) {
        return None;
    }
    Some(candidate.to_lowercase())
}

fn mailto_email(document: &Html) -> Option<String> {
    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if !href.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("mailto:")) {
            continue;
        }
        let target = href[7..].split('?').next().unwrap_or("").replace("%40", "@");
        // "mailto:a@x.com,b@x.com" lists several recipients; take the first.
        let first = target.split(',').next().unwrap_or("");
        match accept_email(first) {
            Some(email) => return Some(email),
            None => {
                tracing::debug!(target: "probe_task", "Mailto content rejected: {}", first);
            }
        }
    }
    None
}

fn text_email(text: &str) -> Option<String> {
    EMAIL_REGEX
        .find_iter(text)
        .find_map(|m| accept_email(m.as_str()))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn marked_phone(document: &Html) -> Option<String> {
    for element in document.select(&PHONE_ELEMENT_SELECTOR) {
        let text = element_text(&element);
        if let Some(m) = PHONE_REGEX.find(&text) {
            return Some(clean_phone(m.as_str()));
        }
        let attr_value = element
            .value()
            .attr("href")
            .and_then(|href| href.get(4..))
            .or_else(|| element.value().attr("content"));
        if let Some(value) = attr_value {
            let value = value.trim();
            if value.chars().filter(|c| c.is_ascii_digit()).count() >= 7 {
                return Some(clean_phone(value));
            }
        }
    }
    None
}

fn text_phone(text: &str) -> Option<String> {
    PHONE_REGEX.find(text).map(|m| clean_phone(m.as_str()))
}

/// Truncates a title before its first separator. Returns `None` when fewer than
/// two characters remain.
pub(crate) fn company_from_title(title: &str) -> Option<String> {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = TITLE_SEPARATORS
        .iter()
        .filter_map(|sep| title.find(sep))
        .min()
        .unwrap_or(title.len());
    let name = title[..cut].trim();
    (name.chars().count() >= 2).then(|| name.to_string())
}

fn company_name(document: &Html) -> Option<String> {
    if let Some(title) = document.select(&TITLE_SELECTOR).next() {
        if let Some(name) = company_from_title(&element_text(&title)) {
            return Some(name);
        }
    }
    document.select(&H1_SELECTOR).next().and_then(|h1| {
        let text = element_text(&h1)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        (!text.is_empty()).then_some(text)
    })
}
