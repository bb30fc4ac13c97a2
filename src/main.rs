use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod classifier;
mod config;
mod csv_io;
mod dedup;
mod dns;
mod domain;
mod error;
mod extractor;
mod harvester;
mod http;
mod leads;
mod models;
mod patterns;
mod prober;
mod search;

use config::{Config, ConfigArgs};
use harvester::Harvester;
use leads::LeadStore;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, probe candidate sites and export leads to CSV
    Run(RunArgs),
    /// Merge lead CSV files through the acceptance rules
    Import {
        /// Lead CSV files to merge, in order
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Path to the output CSV file
        #[arg(short, long)]
        output: PathBuf,

        /// Email addresses to drop from the merged set
        #[arg(long = "drop")]
        drop_emails: Vec<String>,
    },
    /// Print the registrable domain and verdict for each URL
    Classify {
        /// URLs to classify
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Start the API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Explicit search query (repeatable). Defaults to trades x locations from the config.
    #[arg(short, long = "query")]
    queries: Vec<String>,

    /// Website to probe in addition to search results (repeatable)
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// CSV file with a Website column of sites to probe
    #[arg(long)]
    seeds_file: Option<PathBuf>,

    /// Probe seeds only, without searching
    #[arg(long)]
    no_search: bool,

    /// Existing lead CSV merged before the run; its leads are never replaced
    #[arg(long)]
    merge: Option<PathBuf>,

    /// Path to the output CSV file
    #[arg(short, long, default_value = "leads.csv")]
    output: PathBuf,

    /// Optional path for the JSON run report
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::build_config(&cli.config)?;

    match cli.command {
        Commands::Run(args) => run_harvest(config, args).await?,
        Commands::Import {
            input,
            output,
            drop_emails,
        } => import_files(config, &input, &output, &drop_emails).await?,
        Commands::Classify { urls } => {
            let classifier = classifier::SiteClassifier::from_config(&config);
            for url in urls {
                let verdict = if classifier.is_business_site(&url) {
                    "business"
                } else {
                    "rejected"
                };
                println!("{}\t{}\t{}", verdict, domain::registrable_domain(&url), url);
            }
        }
        Commands::Serve { port } => {
            let harvester = Arc::new(Harvester::from_config(config)?);
            for warning in harvester.warnings() {
                tracing::warn!("{}", warning);
            }
            api::start_api_server(harvester, port).await;
        }
    }

    Ok(())
}

fn write_leads(output: &Path, store: &LeadStore) -> Result<()> {
    let file = File::create(output)
        .with_context(|| format!("Cannot create output file {}", output.display()))?;
    csv_io::export_leads(BufWriter::new(file), store)?;
    info!("Wrote {} leads to {}", store.len(), output.display());
    Ok(())
}

async fn run_harvest(config: Config, args: RunArgs) -> Result<()> {
    let mut seeds = args.seeds;
    if let Some(path) = &args.seeds_file {
        let file = File::open(path)
            .with_context(|| format!("Cannot open seeds file {}", path.display()))?;
        seeds.extend(csv_io::read_seed_websites(BufReader::new(file))?);
    }

    let queries = if args.no_search {
        Vec::new()
    } else if args.queries.is_empty() {
        search::plan_queries(&config)
    } else {
        args.queries
    };
    info!(
        "Running {} queries against {} with {} seed websites",
        queries.len(),
        config.provider_name(),
        seeds.len()
    );

    let harvester = Harvester::from_config(config)?;
    let policy = harvester.lead_policy();
    let mut store = LeadStore::new();

    if let Some(path) = &args.merge {
        let file = File::open(path)
            .with_context(|| format!("Cannot open lead file {}", path.display()))?;
        let summary = csv_io::import_leads(BufReader::new(file), &mut store, &policy).await?;
        info!("Merged {} existing leads from {}", summary.added, path.display());
    }

    let progress_bar = indicatif::ProgressBar::new(0);
    progress_bar.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    let report = harvester
        .harvest(&queries, &seeds, &mut store, &progress_bar)
        .await;

    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    info!(
        "Queries: {} issued, {} cached, {} failed. Sites: {} probed, {} without contact. Pages: {} fetched, {} failed.",
        report.queries_issued,
        report.queries_from_cache,
        report.search_failures,
        report.sites_probed,
        report.sites_without_contact,
        report.pages_fetched,
        report.page_failures
    );
    for (reason, count) in &report.rejections {
        info!("Rejected {} candidates: {}", count, reason.as_str());
    }

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Cannot write report {}", path.display()))?;
    }

    if store.is_empty() {
        tracing::warn!("No leads collected");
    }
    write_leads(&args.output, &store)
}

async fn import_files(
    config: Config,
    inputs: &[PathBuf],
    output: &Path,
    drop_emails: &[String],
) -> Result<()> {
    let harvester = Harvester::from_config(config)?;
    for warning in harvester.warnings() {
        tracing::warn!("{}", warning);
    }
    let policy = harvester.lead_policy();
    let mut store = LeadStore::new();

    for input in inputs {
        let file = File::open(input)
            .with_context(|| format!("Cannot open lead file {}", input.display()))?;
        let summary = csv_io::import_leads(BufReader::new(file), &mut store, &policy).await?;
        info!(
            "{}: {} rows, {} added, {} unreadable",
            input.display(),
            summary.rows,
            summary.added,
            summary.malformed_rows
        );
        for (reason, count) in &summary.rejections {
            info!("  {} rejected: {}", count, reason.as_str());
        }
    }

    for email in drop_emails {
        match store.remove(email) {
            Some(lead) => info!("Dropped {} <{}>", lead.company, lead.email),
            None => tracing::warn!("No lead with email {}", email),
        }
    }

    write_leads(output, &store)
}
