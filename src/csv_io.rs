//! CSV export and import of the lead set.

use crate::error::{AppError, Result};
use crate::leads::{LeadPolicy, LeadStore};
use crate::models::{ProbeResult, Rejection, UpsertOutcome};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

pub(crate) const LEAD_COLUMNS: [&str; 5] = ["Company", "Email", "Website", "Phone", "Source"];

/// Source recorded for imported rows that carry none.
const IMPORT_SOURCE: &str = "import";

/// Writes the header row and one row per lead, in insertion order.
pub(crate) fn export_leads<W: Write>(writer: W, store: &LeadStore) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(LEAD_COLUMNS)?;
    for lead in store.iter() {
        csv_writer.write_record([
            lead.company.as_str(),
            lead.email.as_str(),
            lead.website.as_str(),
            lead.phone.as_str(),
            lead.source.as_str(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Counts from merging one CSV file.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ImportSummary {
    pub rows: usize,
    pub added: usize,
    /// Rows that could not be decoded and were skipped.
    pub malformed_rows: usize,
    pub rejections: BTreeMap<Rejection, usize>,
}

/// Maps lowercase header names to column indexes.
fn header_index<R: Read>(reader: &mut csv::Reader<R>) -> Result<HashMap<String, usize>> {
    Ok(reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_lowercase(), i))
        .collect())
}

fn field(record: &csv::StringRecord, columns: &HashMap<String, usize>, name: &str) -> Option<String> {
    columns
        .get(name)
        .and_then(|&i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Merges rows with `Company, Email, Website, Phone, Source` columns (any case,
/// any order) into `store`, applying the same rules as harvested contacts.
pub(crate) async fn import_leads<R: Read>(
    reader: R,
    store: &mut LeadStore,
    policy: &LeadPolicy<'_>,
) -> Result<ImportSummary> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = header_index(&mut csv_reader)?;
    if !columns.contains_key("email") {
        return Err(AppError::Config(
            "CSV import needs an 'Email' column".to_string(),
        ));
    }

    let mut summary = ImportSummary::default();
    for record in csv_reader.records() {
        summary.rows += 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Skipping unreadable CSV row: {}", e);
                summary.malformed_rows += 1;
                continue;
            }
        };

        let website = field(&record, &columns, "website").unwrap_or_default();
        let source = field(&record, &columns, "source").unwrap_or_else(|| IMPORT_SOURCE.to_string());
        let candidate = ProbeResult {
            company_name: field(&record, &columns, "company"),
            email: field(&record, &columns, "email"),
            phone: field(&record, &columns, "phone"),
            source_url: website.clone(),
        };

        match store.upsert(&candidate, &website, &source, policy).await {
            UpsertOutcome::Added => summary.added += 1,
            UpsertOutcome::Rejected(reason) => *summary.rejections.entry(reason).or_default() += 1,
        }
    }
    tracing::info!(
        "Imported {} of {} rows ({} rejected, {} unreadable)",
        summary.added,
        summary.rows,
        summary.rows - summary.added - summary.malformed_rows,
        summary.malformed_rows
    );
    Ok(summary)
}

/// Reads the `website` column (any case) of a seed list.
pub(crate) fn read_seed_websites<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = header_index(&mut csv_reader)?;
    if !columns.contains_key("website") {
        return Err(AppError::Config(
            "Seed file needs a 'Website' column".to_string(),
        ));
    }
    let mut seeds = Vec::new();
    for record in csv_reader.records() {
        match record {
            Ok(record) => {
                if let Some(website) = field(&record, &columns, "website") {
                    seeds.push(website);
                }
            }
            Err(e) => tracing::warn!("Skipping unreadable seed row: {}", e),
        }
    }
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_export_writes_header_and_rows() {
        let prefixes = Config::default().generic_prefixes;
        let policy = LeadPolicy::permissive(&prefixes);
        let mut store = LeadStore::new();
        let candidate = ProbeResult {
            company_name: Some("Acme, Builders".to_string()),
            email: Some("maria@acme.com".to_string()),
            phone: None,
            source_url: "https://acme.com/contact".to_string(),
        };
        store
            .upsert(&candidate, "https://acme.com/", "duckduckgo/direct", &policy)
            .await;

        let mut out = Vec::new();
        export_leads(&mut out, &store).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Company,Email,Website,Phone,Source\n\"Acme, Builders\",maria@acme.com,https://acme.com/,,duckduckgo/direct\n"
        );
    }

    #[test]
    fn test_export_empty_store_has_header() {
        let mut out = Vec::new();
        export_leads(&mut out, &LeadStore::new()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Company,Email,Website,Phone,Source\n");
    }

    #[tokio::test]
    async fn test_import_applies_rules() {
        let data = "\
email,COMPANY,website,phone
Maria@Acme.com,Acme,https://acme.com/,305-555-0142
maria@acme.com,Acme again,https://acme.com/,
not-an-email,Broken,https://broken.com/,
info@smith.net,Smith,https://smith.net/,
,Nobody,https://nobody.org/,
";
        let mut config = Config::default();
        config.skip_generic_inboxes = true;
        let policy = LeadPolicy::from_config(&config, None);
        let mut store = LeadStore::new();

        let summary = import_leads(data.as_bytes(), &mut store, &policy).await.unwrap();
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.rejections[&Rejection::Duplicate], 1);
        assert_eq!(summary.rejections[&Rejection::InvalidEmail], 1);
        assert_eq!(summary.rejections[&Rejection::GenericInbox], 1);
        assert_eq!(summary.rejections[&Rejection::MissingEmail], 1);

        let lead = store.iter().next().unwrap();
        assert_eq!(lead.company, "Acme");
        assert_eq!(lead.phone, "305-555-0142");
        assert_eq!(lead.source, "import");
    }

    #[tokio::test]
    async fn test_import_requires_email_column() {
        let prefixes = Config::default().generic_prefixes;
        let policy = LeadPolicy::permissive(&prefixes);
        let mut store = LeadStore::new();
        let result = import_leads("Company,Website\nAcme,acme.com\n".as_bytes(), &mut store, &policy).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_import_skips_undecodable_rows() {
        let mut data = b"Email,Company\nmaria@acme.com,Acme\njoe@smith.net,Sm".to_vec();
        data.push(0xE9);
        data.extend_from_slice(b"th\nann@bestroof.org,Best Roof\n");
        let prefixes = Config::default().generic_prefixes;
        let policy = LeadPolicy::permissive(&prefixes);
        let mut store = LeadStore::new();

        let summary = import_leads(data.as_slice(), &mut store, &policy).await.unwrap();
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.added, 2);
        assert_eq!(summary.malformed_rows, 1);
        let emails: Vec<_> = store.iter().map(|l| l.email.as_str()).collect();
        assert_eq!(emails, vec!["maria@acme.com", "ann@bestroof.org"]);
    }

    #[test]
    fn test_read_seed_websites() {
        let seeds = read_seed_websites("Name,Website\nAcme, acme.com \nBlank,\nSmith,https://smith.net\n".as_bytes()).unwrap();
        assert_eq!(seeds, vec!["acme.com", "https://smith.net"]);
        assert!(read_seed_websites("Name\nAcme\n".as_bytes()).is_err());

        let mut data = b"Website\nacme.com\nsm".to_vec();
        data.push(0xE9);
        data.extend_from_slice(b"th.net\nbestroof.org\n");
        assert_eq!(read_seed_websites(data.as_slice()).unwrap(), vec!["acme.com", "bestroof.org"]);
    }
}
