//! The running lead set and the acceptance rules applied before insertion.

use crate::config::Config;
use crate::dns::{MxChecker, MxStatus};
use crate::models::{Lead, ProbeResult, Rejection, UpsertOutcome};
use crate::patterns::{email_domain, is_generic_inbox, is_valid_email};
use std::collections::HashSet;

/// Filters applied by [`LeadStore::upsert`].
#[derive(Clone, Copy)]
pub(crate) struct LeadPolicy<'a> {
    pub skip_generic: bool,
    pub generic_prefixes: &'a HashSet<String>,
    /// `None` disables MX verification.
    pub mx: Option<&'a dyn MxChecker>,
}

impl<'a> LeadPolicy<'a> {
    /// Policy from configuration. MX verification additionally needs a checker;
    /// pass `None` when the resolver is unavailable.
    pub(crate) fn from_config(config: &'a Config, mx: Option<&'a dyn MxChecker>) -> Self {
        Self {
            skip_generic: config.skip_generic_inboxes,
            generic_prefixes: &config.generic_prefixes,
            mx: if config.verify_mx { mx } else { None },
        }
    }

    /// Accepts every syntactically valid, unique address.
    #[cfg(test)]
    pub(crate) fn permissive(generic_prefixes: &'a HashSet<String>) -> Self {
        Self {
            skip_generic: false,
            generic_prefixes,
            mx: None,
        }
    }
}

/// Leads keyed by case-insensitive email, in insertion order.
#[derive(Debug, Default, Clone)]
pub(crate) struct LeadStore {
    leads: Vec<Lead>,
    emails: HashSet<String>,
}

impl LeadStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.leads.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Lead> {
        self.leads.iter()
    }

    /// Removes the lead with `email`, returning it.
    pub(crate) fn remove(&mut self, email: &str) -> Option<Lead> {
        let key = email.trim().to_lowercase();
        if !self.emails.remove(&key) {
            return None;
        }
        let index = self.leads.iter().position(|lead| lead.email == key)?;
        Some(self.leads.remove(index))
    }

    /// Drops every lead.
    pub(crate) fn clear(&mut self) {
        self.leads.clear();
        self.emails.clear();
    }

    /// Offers `candidate` to the store. Rules, first match wins: missing email,
    /// invalid syntax, generic inbox (when enabled), no mail exchange (when
    /// enabled; an inconclusive lookup accepts), duplicate. An existing lead is
    /// never modified.
    pub(crate) async fn upsert(
        &mut self,
        candidate: &ProbeResult,
        website: &str,
        source: &str,
        policy: &LeadPolicy<'_>,
    ) -> UpsertOutcome {
        let email = match candidate.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_lowercase(),
            _ => return UpsertOutcome::Rejected(Rejection::MissingEmail),
        };

        if !is_valid_email(&email) {
            tracing::debug!("Rejecting invalid email: {}", email);
            return UpsertOutcome::Rejected(Rejection::InvalidEmail);
        }

        if policy.skip_generic && is_generic_inbox(&email, policy.generic_prefixes) {
            tracing::debug!("Rejecting generic inbox: {}", email);
            return UpsertOutcome::Rejected(Rejection::GenericInbox);
        }

        if let (Some(mx), Some(domain)) = (policy.mx, email_domain(&email)) {
            if mx.check(&domain).await == MxStatus::Absent {
                tracing::debug!("Rejecting {}: no MX records for {}", email, domain);
                return UpsertOutcome::Rejected(Rejection::NoMailExchange);
            }
        }

        if self.emails.contains(&email) {
            return UpsertOutcome::Rejected(Rejection::Duplicate);
        }

        let lead = Lead {
            company: candidate
                .company_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(website)
                .to_string(),
            email: email.clone(),
            website: website.to_string(),
            phone: candidate.phone.clone().unwrap_or_default(),
            source: source.to_string(),
        };
        tracing::info!("New lead: {} <{}>", lead.company, lead.email);
        self.emails.insert(email);
        self.leads.push(lead);
        UpsertOutcome::Added
    }
}
