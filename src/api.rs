//! API server for lead-harvester.
//!
//! The server keeps one lead set for its lifetime. Every harvest merges into
//! it, so repeated runs never return an address twice.

use crate::csv_io::LEAD_COLUMNS;
use crate::domain::registrable_domain;
use crate::harvester::Harvester;
use crate::leads::LeadStore;
use crate::models::{Lead, RunReport};
use crate::search::plan_queries;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::Mutex;
use warp::{Filter, Rejection, Reply, http::StatusCode};

const MAX_BODY_BYTES: u64 = 64 * 1024;

/// The lead set shared by all requests.
pub(crate) type SharedLeads = Arc<Mutex<LeadStore>>;

/// Generic API response structure
#[derive(Serialize, Deserialize)]
struct ApiResponse {
    success: bool,
    message: String,
}

/// Harvest request. With no queries and no seeds, the configured query plan runs.
#[derive(Deserialize, Default)]
#[serde(default)]
struct HarvestRequest {
    queries: Vec<String>,
    seeds: Vec<String>,
}

#[derive(Serialize)]
struct HarvestResponse {
    success: bool,
    message: String,
    columns: [&'static str; 5],
    leads: Vec<Lead>,
    report: RunReport,
}

#[derive(Serialize)]
struct LeadsResponse {
    success: bool,
    columns: [&'static str; 5],
    leads: Vec<Lead>,
}

#[derive(Deserialize)]
struct ClassifyRequest {
    urls: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Classification {
    url: String,
    domain: String,
    business: bool,
}

#[derive(Serialize)]
struct ClassifyResponse {
    success: bool,
    results: Vec<Classification>,
}

/// Builds the route tree. Harvest runs hold the lead set for their whole
/// duration, so concurrent requests run one after another.
pub(crate) fn routes(
    harvester: Arc<Harvester>,
    leads: SharedLeads,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let harvester_filter = warp::any().map(move || harvester.clone());
    let leads_filter = warp::any().map(move || leads.clone());

    // Health check endpoint
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&ApiResponse {
                success: true,
                message: "Lead Harvester API is running".to_string(),
            })
        });

    let harvest = warp::path("harvest")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(harvester_filter.clone())
        .and(leads_filter.clone())
        .and_then(handle_harvest);

    let classify = warp::path("classify")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(harvester_filter)
        .map(handle_classify);

    let list_leads = warp::path!("leads")
        .and(warp::get())
        .and(leads_filter.clone())
        .and_then(handle_list_leads);

    let clear_leads = warp::path!("leads")
        .and(warp::delete())
        .and(leads_filter.clone())
        .and_then(handle_clear_leads);

    let remove_lead = warp::path!("leads" / String)
        .and(warp::delete())
        .and(leads_filter)
        .and_then(handle_remove_lead);

    health
        .or(harvest)
        .or(classify)
        .or(list_leads)
        .or(clear_leads)
        .or(remove_lead)
        .with(warp::cors().allow_any_origin())
        .recover(handle_rejection)
}

/// Start the API server
pub(crate) async fn start_api_server(harvester: Arc<Harvester>, port: u16) {
    tracing::info!("Starting API server on port {}", port);
    let leads: SharedLeads = Arc::new(Mutex::new(LeadStore::new()));
    warp::serve(routes(harvester, leads)).run(([0, 0, 0, 0], port)).await;
}

/// Handle a harvest request
async fn handle_harvest(
    request: HarvestRequest,
    harvester: Arc<Harvester>,
    leads: SharedLeads,
) -> Result<impl Reply, Rejection> {
    let mut store = leads.lock().await;

    let queries = if request.queries.is_empty() && request.seeds.is_empty() {
        plan_queries(harvester.config())
    } else {
        request.queries
    };
    tracing::info!(
        "Processing harvest request: {} queries, {} seeds",
        queries.len(),
        request.seeds.len()
    );

    let report = harvester
        .harvest(&queries, &request.seeds, &mut store, &ProgressBar::hidden())
        .await;

    Ok(warp::reply::json(&HarvestResponse {
        success: true,
        message: format!("Collected {} new leads, {} in total", report.leads_added, store.len()),
        columns: LEAD_COLUMNS,
        leads: store.iter().cloned().collect(),
        report,
    }))
}

async fn handle_list_leads(leads: SharedLeads) -> Result<impl Reply, Rejection> {
    let store = leads.lock().await;
    Ok(warp::reply::json(&LeadsResponse {
        success: true,
        columns: LEAD_COLUMNS,
        leads: store.iter().cloned().collect(),
    }))
}

async fn handle_clear_leads(leads: SharedLeads) -> Result<impl Reply, Rejection> {
    let mut store = leads.lock().await;
    let cleared = store.len();
    store.clear();
    tracing::info!("Cleared {} leads", cleared);
    Ok(warp::reply::json(&ApiResponse {
        success: true,
        message: format!("Cleared {} leads", cleared),
    }))
}

async fn handle_remove_lead(email: String, leads: SharedLeads) -> Result<impl Reply, Rejection> {
    let mut store = leads.lock().await;
    match store.remove(&email) {
        Some(lead) => Ok(warp::reply::json(&ApiResponse {
            success: true,
            message: format!("Removed {} <{}>", lead.company, lead.email),
        })),
        None => Err(warp::reject::custom(LeadNotFound(email))),
    }
}

/// Handle a classification request
fn handle_classify(request: ClassifyRequest, harvester: Arc<Harvester>) -> impl Reply {
    let results = request
        .urls
        .into_iter()
        .map(|url| Classification {
            domain: registrable_domain(&url),
            business: harvester.classifier().is_business_site(&url),
            url,
        })
        .collect();
    warp::reply::json(&ClassifyResponse {
        success: true,
        results,
    })
}

/// Rejection for removing an address that is not in the lead set.
#[derive(Debug)]
struct LeadNotFound(String);

impl warp::reject::Reject for LeadNotFound {}

/// Handle API rejections
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(LeadNotFound(email)) = err.find::<LeadNotFound>() {
        (StatusCode::NOT_FOUND, format!("No lead with email {}", email))
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Bad request: {}", e))
    } else {
        (StatusCode::BAD_REQUEST, "Bad request".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse {
            success: false,
            message,
        }),
        status,
    ))
}
