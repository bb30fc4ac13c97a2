//! Defines the custom error types for the lead-harvester application.

use std::io;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// The primary error type for the harvesting pipeline.
///
/// Most of these never reach the top level: the harvester downgrades network and
/// parse failures to skipped items and counts them in the run report.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization or deserialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reading or writing CSV data.
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    /// Error parsing a URL.
    #[error("URL Parsing Error: {0}")]
    UrlParse(#[from] UrlParseError),

    /// Error making HTTP requests via reqwest.
    #[error("HTTP Request Error: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP Status {status} for {url}")]
    HttpStatus {
        /// The status returned by the server.
        status: reqwest::StatusCode,
        /// The URL that was requested.
        url: String,
    },

    /// The response was not an HTML document.
    #[error("Non-HTML content ({content_type}) at {url}")]
    NonHtml {
        /// The reported content type.
        content_type: String,
        /// The URL that was requested.
        url: String,
    },

    /// A search provider returned a body that matches none of the known shapes.
    #[error("Search Response Parse Error: {0}")]
    SearchParse(String),

    /// Error during DNS resolution.
    #[error("DNS Resolution Error: {0}")]
    Dns(#[from] trust_dns_resolver::error::ResolveError),

    /// An underlying error that doesn't fit other categories, using anyhow.
    #[error("Generic Error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a retry of the same request could plausibly succeed.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            AppError::Request(e) => e.is_timeout() || e.is_connect(),
            AppError::HttpStatus { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

/// Statuses worth retrying: rate limiting and the usual gateway/server hiccups.
pub(crate) fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;
