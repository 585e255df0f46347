use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sitesearch_core::stats::{self, Statistics};
use sitesearch_core::{LemmaExtractor, SearchEngine, SearchHit, SearchRequest, Settings, Store};
use sitesearch_indexer::IndexingService;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub indexing: IndexingService,
    pub search: SearchEngine,
    pub default_limit: usize,
}

impl AppState {
    pub fn new(settings: Settings, store: Store) -> Self {
        let extractor = Arc::new(LemmaExtractor::russian());
        let search = SearchEngine::new(store.clone(), extractor.clone(), settings.search.clone());
        let default_limit = settings.search.default_limit;
        let indexing = IndexingService::new(settings, store, extractor);
        Self { indexing, search, default_limit }
    }
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    fn ok() -> Response {
        Json(Ack { result: true, error: None }).into_response()
    }

    fn fail(status: StatusCode, error: impl Into<String>) -> Response {
        (status, Json(Ack { result: false, error: Some(error.into()) })).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub result: bool,
    pub statistics: Statistics,
}

#[derive(Debug, Deserialize)]
pub struct IndexPageParams {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub site: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub result: bool,
    pub count: usize,
    pub error: Option<String>,
    pub data: Vec<SearchHit>,
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/api/statistics", get(statistics_handler))
        .route("/api/startIndexing", get(start_indexing_handler))
        .route("/api/stopIndexing", get(stop_indexing_handler))
        .route("/api/indexPage", post(index_page_handler))
        .route("/api/search", get(search_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn statistics_handler(State(state): State<AppState>) -> Response {
    match stats::collect(state.indexing.store(), state.indexing.is_running()) {
        Ok(statistics) => Json(StatisticsResponse { result: true, statistics }).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to collect statistics");
            Ack::fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn start_indexing_handler(State(state): State<AppState>) -> Response {
    if state.indexing.start_indexing() {
        Ack::ok()
    } else {
        Ack::fail(StatusCode::BAD_REQUEST, "indexing already running")
    }
}

pub async fn stop_indexing_handler(State(state): State<AppState>) -> Response {
    if state.indexing.stop_indexing().await {
        Ack::ok()
    } else {
        Ack::fail(StatusCode::BAD_REQUEST, "indexing not running")
    }
}

pub async fn index_page_handler(State(state): State<AppState>, Query(params): Query<IndexPageParams>) -> Response {
    let Some(url) = params.url.filter(|u| !u.trim().is_empty()) else {
        return Ack::fail(StatusCode::BAD_REQUEST, "could not index page");
    };
    match state.indexing.index_page(&url).await {
        Ok(()) => Ack::ok(),
        Err(e) => {
            tracing::info!(url = %url, error = %e, "index page rejected");
            Ack::fail(StatusCode::BAD_REQUEST, "could not index page")
        }
    }
}

/// Parses an optional non-negative count; blank means absent.
fn parse_count(name: &str, raw: Option<&str>, default: usize) -> Result<usize, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| format!("{name} must be a non-negative integer, got {value:?}")),
    }
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let query = params.query.unwrap_or_default();
    let paging = parse_count("offset", params.offset.as_deref(), 0)
        .and_then(|offset| parse_count("limit", params.limit.as_deref(), state.default_limit).map(|limit| (offset, limit)));
    let (offset, limit) = match paging {
        Ok(paging) => paging,
        Err(error) => {
            return Json(SearchResponse { result: false, count: 0, error: Some(error), data: Vec::new() });
        }
    };
    let request = SearchRequest {
        query: &query,
        site: params.site.as_deref(),
        offset,
        limit,
    };
    let response = match state.search.search(&request) {
        Ok(results) => SearchResponse { result: true, count: results.count, error: None, data: results.data },
        Err(e) => SearchResponse { result: false, count: 0, error: Some(e.to_string()), data: Vec::new() },
    };
    tracing::debug!(query = %query, count = response.count, took_ms = start.elapsed().as_millis() as u64, "search");
    Json(response)
}
