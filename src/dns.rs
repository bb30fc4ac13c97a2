//! Mail-exchange lookups for the optional MX filter.

use crate::config::Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Mutex;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};

/// Outcome of an MX lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MxStatus {
    /// At least one usable MX record.
    Present,
    /// The resolver answered authoritatively: no MX records, a null MX, or no
    /// such domain.
    Absent,
    /// The lookup itself failed (timeout, SERVFAIL, network). Not evidence of
    /// absence.
    Unknown,
}

/// Answers "does this domain accept mail?".
#[async_trait]
pub(crate) trait MxChecker: Send + Sync {
    async fn check(&self, domain: &str) -> MxStatus;
}

/// Creates a configured DNS resolver instance.
pub(crate) fn create_resolver(config: &Config) -> Result<TokioAsyncResolver> {
    let mut resolver_config = ResolverConfig::new();

    for server_str in &config.dns_servers {
        let ip_addr = IpAddr::from_str(server_str.trim()).map_err(|e| {
            tracing::error!(target: "dns_task",
                "Invalid DNS server IP address in config: '{}' - {}", server_str, e
            );
            AppError::Config(format!("Invalid DNS server IP address: {}", server_str))
        })?;
        let socket_addr = SocketAddr::new(ip_addr, 53);
        for protocol in [Protocol::Udp, Protocol::Tcp] {
            resolver_config.add_name_server(NameServerConfig {
                socket_addr,
                protocol,
                tls_dns_name: None,
                trust_negative_responses: true,
                bind_addr: None,
            });
        }
    }
    if config.dns_servers.is_empty() {
        return Err(AppError::Config("No DNS servers configured".to_string()));
    }

    let mut resolver_opts = ResolverOpts::default();
    resolver_opts.timeout = config.dns_timeout;
    resolver_opts.attempts = 2;

    let resolver = TokioAsyncResolver::tokio(resolver_config, resolver_opts);
    tracing::debug!(target: "dns_task",
        "DNS resolver configured with {} servers and {:?} timeout",
        config.dns_servers.len(), config.dns_timeout
    );
    Ok(resolver)
}

/// Maps a resolver error to a status. Only an authoritative "nothing there"
/// counts as absence.
fn status_for_error(error: &ResolveError) -> MxStatus {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => MxStatus::Absent,
        _ => MxStatus::Unknown,
    }
}

/// An RFC 7505 null MX ("0 .") declares that the domain accepts no mail.
fn is_null_exchange(exchange: &str) -> bool {
    exchange.trim_end_matches('.').is_empty()
}

/// MX checks against real nameservers, with a per-domain cache of definitive
/// answers.
pub(crate) struct DnsMxChecker {
    resolver: TokioAsyncResolver,
    cache: Mutex<HashMap<String, MxStatus>>,
}

impl DnsMxChecker {
    pub(crate) fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            resolver: create_resolver(config)?,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn lookup(&self, domain: &str) -> MxStatus {
        tracing::debug!(target: "dns_task", "Performing DNS MX lookup for {}", domain);
        match self.resolver.mx_lookup(domain).await {
            Ok(mx_response) => {
                let usable = mx_response
                    .iter()
                    .filter(|mx| !is_null_exchange(&mx.exchange().to_utf8()))
                    .count();
                if usable > 0 {
                    tracing::debug!(target: "dns_task", "{} has {} MX records", domain, usable);
                    MxStatus::Present
                } else {
                    tracing::info!(target: "dns_task", "{} publishes no usable MX record", domain);
                    MxStatus::Absent
                }
            }
            Err(e) => {
                let status = status_for_error(&e);
                match status {
                    MxStatus::Absent => {
                        tracing::info!(target: "dns_task", "No MX records for {}: {}", domain, e)
                    }
                    _ => tracing::warn!(target: "dns_task",
                        "MX lookup for {} inconclusive: {}", domain, e
                    ),
                }
                status
            }
        }
    }
}

#[async_trait]
impl MxChecker for DnsMxChecker {
    async fn check(&self, domain: &str) -> MxStatus {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        if domain.is_empty() {
            return MxStatus::Unknown;
        }
        if let Some(status) = self.cache.lock().ok().and_then(|c| c.get(&domain).copied()) {
            return status;
        }

        let status = self.lookup(&domain).await;
        if status != MxStatus::Unknown {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(domain, status);
            }
        }
        status
    }
}
