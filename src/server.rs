//! HTTP API for the agent catalog.
//!
//! Serves search, lookup, filter options and the AI selector over a JSON
//! API built on axum. The catalog is loaded once at startup through the
//! configured [`SearchBackend`] and is read-only afterwards.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/v1/health` | Status, version, corpus size, search cache stats |
//! | `GET`  | `/v1/agents` | Query-string search with filters and pagination |
//! | `POST` | `/v1/search` | Same as above with a JSON body |
//! | `GET`  | `/v1/agents/{id}` | One record |
//! | `GET`  | `/v1/filters` | Distinct filter values |
//! | `POST` | `/v1/ai/select` | LLM-ranked recommendations |
//! | `POST` | `/v1/ai/select/stream` | Same, as server-sent events |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "page_size must be between 1 and 100" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `ai_disabled` (404),
//! `budget_exceeded` (402), `rate_limited` (429, with `Retry-After`),
//! `ai_unavailable` (503), `internal` (500).

use agent_navigator_core::filters::{split_list, SearchFilters};
use agent_navigator_core::search::SearchHit;
use agent_navigator_core::store::SearchBackend;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, FromRequestParts, Path, Query, State,
    },
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_stream::StreamExt;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::ai_select::{AiSelector, Prepared, SelectError, SelectEvent, SelectResponse};
use crate::catalog::open_backend;
use crate::config::Config;
use crate::llm::{AnthropicClient, Usage};
use crate::rate_limit::{Admission, ClientLimiter};

const MAX_QUERY_CHARS: usize = 200;
const MAX_AI_QUERY_CHARS: usize = 2000;
const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_MAX_CANDIDATES: usize = 80;
const MIN_MAX_CANDIDATES: usize = 10;
const MAX_MAX_CANDIDATES: usize = 120;
/// Rate-limit units charged per AI request.
const AI_REQUEST_COST: u32 = 3;

static AGENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("agent id pattern is valid"));

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn SearchBackend>,
    /// `None` when the selector is turned off or no API key is configured.
    selector: Option<Arc<AiSelector>>,
    limiter: Arc<ClientLimiter>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        selector: Option<Arc<AiSelector>>,
        config: &Config,
    ) -> Self {
        Self {
            backend,
            selector,
            limiter: Arc::new(ClientLimiter::new(
                config.server.rate_limit_requests,
                Duration::from_secs(config.server.rate_limit_window_secs),
            )),
        }
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// A missing or corrupt catalog fails startup. The AI selector is wired up
/// only when it is enabled and `ANTHROPIC_API_KEY` is set.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backend = open_backend(config).await?;

    let selector = match (&config.secrets.anthropic_api_key, config.ai.enabled) {
        (Some(key), true) => {
            let client = AnthropicClient::new(
                &config.llm.api_base,
                key,
                Duration::from_secs(config.indexer.llm_timeout_secs),
            )?;
            Some(Arc::new(AiSelector::new(
                Arc::new(client),
                config.llm.model.clone(),
                config.ai.clone(),
            )))
        }
        (None, true) => {
            tracing::warn!("ANTHROPIC_API_KEY is not set; AI selector disabled");
            None
        }
        (_, false) => None,
    };

    let state = AppState::new(backend, selector, config);
    let app = router(state, &config.server.cors_allow_origins);

    tracing::info!(
        bind = %config.server.bind,
        backend = config.search.backend.as_str(),
        "agent navigator API listening"
    );
    println!("Agent Navigator API listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Builds the router with CORS restricted to `cors_origins` (`*` allows any).
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/v1/health", get(handle_health))
        .route("/v1/agents", get(handle_list_agents))
        .route("/v1/search", post(handle_search))
        .route("/v1/agents/{id}", get(handle_get_agent))
        .route("/v1/filters", get(handle_filters))
        .route("/v1/ai/select", post(handle_ai_select))
        .route("/v1/ai/select/stream", post(handle_ai_select_stream))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o.trim()) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Converts into the JSON error envelope.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after_secs: Option<u64>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!("internal error: {:#}", err);
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "Internal server error",
    )
}

fn rate_limited(retry_after_secs: u64) -> AppError {
    let mut e = AppError::new(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        format!("Too many AI requests; retry in {} seconds", retry_after_secs),
    );
    e.retry_after_secs = Some(retry_after_secs);
    e
}

impl From<SelectError> for AppError {
    fn from(err: SelectError) -> Self {
        let message = err.to_string();
        match err {
            SelectError::BudgetExceeded { .. } => {
                AppError::new(StatusCode::PAYMENT_REQUIRED, "budget_exceeded", message)
            }
            SelectError::Upstream(e) => {
                tracing::warn!("AI selector upstream failure: {:#}", e);
                AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ai_unavailable",
                    "The AI selector is temporarily unavailable",
                )
            }
        }
    }
}

// ============ Client identity ============

/// Rate-limit key: the peer address when the server was started with
/// connect info, otherwise a shared `local` bucket.
struct ClientId(String);

impl<S: Send + Sync> FromRequestParts<S> for ClientId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "local".to_string());
        Ok(ClientId(id))
    }
}

// ============ GET /v1/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    agents: usize,
    backend: &'static str,
    search_cache: agent_navigator_core::cache::CacheStats,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        agents: state.backend.count().await.map_err(internal)?,
        backend: state.backend.name(),
        search_cache: state.backend.cache_stats(),
    }))
}

// ============ Search ============

/// A filter given either as `"a,b"` or `["a", "b"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn values(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => split_list(Some(&s)),
            OneOrMany::Many(v) => v,
        }
    }
}

fn values(field: Option<OneOrMany>) -> Vec<String> {
    field.map(OneOrMany::values).unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    q: Option<String>,
    category: Option<String>,
    framework: Option<String>,
    provider: Option<String>,
    complexity: Option<String>,
    local_only: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchBody {
    #[serde(default, alias = "query")]
    q: Option<String>,
    category: Option<OneOrMany>,
    framework: Option<OneOrMany>,
    provider: Option<OneOrMany>,
    complexity: Option<OneOrMany>,
    #[serde(default)]
    local_only: bool,
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub query: String,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub items: Vec<SearchHit>,
}

struct SearchRequest {
    query: String,
    filters: SearchFilters,
    page: usize,
    page_size: usize,
}

fn parse_flag(raw: Option<&str>) -> Result<bool, AppError> {
    match raw.map(|s| s.trim().to_lowercase()) {
        None => Ok(false),
        Some(s) => match s.as_str() {
            "" | "false" | "0" | "no" => Ok(false),
            "true" | "1" | "yes" => Ok(true),
            other => Err(bad_request(format!("local_only must be a boolean, got '{}'", other))),
        },
    }
}

fn parse_number(name: &str, raw: Option<&str>) -> Result<Option<usize>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<usize>()
            .map(Some)
            .map_err(|_| bad_request(format!("{} must be a positive integer", name))),
    }
}

fn validate_search(
    query: Option<String>,
    filters: SearchFilters,
    page: Option<usize>,
    page_size: Option<usize>,
) -> Result<SearchRequest, AppError> {
    let query = query.unwrap_or_default().trim().to_string();
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(bad_request(format!(
            "q must be at most {} characters",
            MAX_QUERY_CHARS
        )));
    }
    let page = page.unwrap_or(1);
    if page < 1 {
        return Err(bad_request("page must be >= 1"));
    }
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(bad_request(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok(SearchRequest {
        query,
        filters: filters.normalized(),
        page,
        page_size,
    })
}

/// Ranks every match so `total` is exact and every page is reachable.
async fn run_search(state: &AppState, req: SearchRequest) -> Result<SearchPage, AppError> {
    let corpus = state.backend.count().await.map_err(internal)?;
    let hits = state
        .backend
        .search(&req.query, &req.filters, corpus.max(1))
        .await
        .map_err(internal)?;
    let total = hits.len();
    let items = hits
        .into_iter()
        .skip((req.page - 1).saturating_mul(req.page_size))
        .take(req.page_size)
        .collect();
    Ok(SearchPage {
        query: req.query,
        total,
        page: req.page,
        page_size: req.page_size,
        items,
    })
}

async fn handle_list_agents(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<SearchPage>, AppError> {
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;
    let filters = SearchFilters {
        categories: split_list(params.category.as_deref()),
        frameworks: split_list(params.framework.as_deref()),
        providers: split_list(params.provider.as_deref()),
        complexities: split_list(params.complexity.as_deref()),
        local_only: parse_flag(params.local_only.as_deref())?,
    };
    let req = validate_search(
        params.q,
        filters,
        parse_number("page", params.page.as_deref())?,
        parse_number("page_size", params.page_size.as_deref())?,
    )?;
    Ok(Json(run_search(&state, req).await?))
}

async fn handle_search(
    State(state): State<AppState>,
    body: Result<Json<SearchBody>, JsonRejection>,
) -> Result<Json<SearchPage>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let filters = SearchFilters {
        categories: values(body.category),
        frameworks: values(body.framework),
        providers: values(body.provider),
        complexities: values(body.complexity),
        local_only: body.local_only,
    };
    let req = validate_search(body.q, filters, body.page, body.page_size)?;
    Ok(Json(run_search(&state, req).await?))
}

// ============ GET /v1/agents/{id} ============

async fn handle_get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    if !AGENT_ID.is_match(&id) {
        return Err(bad_request("invalid agent id"));
    }
    match state.backend.get(&id).await.map_err(internal)? {
        Some(record) => Ok(Json(record).into_response()),
        None => Err(not_found(format!("agent not found: {}", id))),
    }
}

// ============ GET /v1/filters ============

async fn handle_filters(
    State(state): State<AppState>,
) -> Result<Json<agent_navigator_core::models::FilterOptions>, AppError> {
    Ok(Json(state.backend.filter_options().await.map_err(internal)?))
}

// ============ AI selector ============

#[derive(Debug, Deserialize)]
struct AiSelectBody {
    #[serde(default)]
    query: String,
    category: Option<OneOrMany>,
    framework: Option<OneOrMany>,
    provider: Option<OneOrMany>,
    complexity: Option<OneOrMany>,
    #[serde(default)]
    local_only: bool,
    max_candidates: Option<usize>,
}

/// Outcome of the checks shared by both AI routes.
enum AiPlan {
    /// No candidates matched; answered without calling the model.
    Empty(SelectResponse),
    Ready(Arc<AiSelector>, Prepared),
}

async fn plan_ai_request(
    state: &AppState,
    client: &str,
    body: Result<Json<AiSelectBody>, JsonRejection>,
) -> Result<AiPlan, AppError> {
    let Some(selector) = state.selector.clone() else {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            "ai_disabled",
            "The AI selector is disabled",
        ));
    };
    if let Admission::Limited { retry_after_secs } = state.limiter.check(client, AI_REQUEST_COST) {
        return Err(rate_limited(retry_after_secs));
    }

    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let query = body.query.trim().to_string();
    let len = query.chars().count();
    if len == 0 || len > MAX_AI_QUERY_CHARS {
        return Err(bad_request(format!(
            "query must be between 1 and {} characters",
            MAX_AI_QUERY_CHARS
        )));
    }
    let max_candidates = body.max_candidates.unwrap_or(DEFAULT_MAX_CANDIDATES);
    if !(MIN_MAX_CANDIDATES..=MAX_MAX_CANDIDATES).contains(&max_candidates) {
        return Err(bad_request(format!(
            "max_candidates must be between {} and {}",
            MIN_MAX_CANDIDATES, MAX_MAX_CANDIDATES
        )));
    }

    let filters = SearchFilters {
        categories: values(body.category),
        frameworks: values(body.framework),
        providers: values(body.provider),
        complexities: values(body.complexity),
        local_only: body.local_only,
    }
    .normalized();
    let candidates: Vec<_> = state
        .backend
        .search(&query, &filters, max_candidates)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|hit| hit.record)
        .collect();

    if candidates.is_empty() {
        return Ok(AiPlan::Empty(SelectResponse {
            cached: false,
            model: selector.model().to_string(),
            text: "No agents matched the query and filters.".to_string(),
            recommendations: Vec::new(),
            usage: Usage::default(),
            cost_usd: 0.0,
        }));
    }
    let prepared = selector.prepare(&query, &candidates, max_candidates);
    Ok(AiPlan::Ready(selector, prepared))
}

async fn handle_ai_select(
    State(state): State<AppState>,
    ClientId(client): ClientId,
    body: Result<Json<AiSelectBody>, JsonRejection>,
) -> Result<Json<SelectResponse>, AppError> {
    match plan_ai_request(&state, &client, body).await? {
        AiPlan::Empty(response) => Ok(Json(response)),
        AiPlan::Ready(selector, prepared) => Ok(Json(selector.select(&prepared).await?)),
    }
}

fn sse_event(event: SelectEvent) -> Event {
    match event {
        SelectEvent::Delta { text, cached } => Event::default()
            .event("delta")
            .data(serde_json::json!({ "text": text, "cached": cached }).to_string()),
        SelectEvent::Done(response) => Event::default()
            .event("done")
            .data(serde_json::to_string(&response).unwrap_or_default()),
        SelectEvent::Error(message) => Event::default()
            .event("error")
            .data(serde_json::json!({ "message": message }).to_string()),
    }
}

async fn handle_ai_select_stream(
    State(state): State<AppState>,
    ClientId(client): ClientId,
    body: Result<Json<AiSelectBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let (selector, prepared) = match plan_ai_request(&state, &client, body).await? {
        AiPlan::Empty(response) => {
            let events = tokio_stream::iter(vec![
                SelectEvent::Delta {
                    text: response.text.clone(),
                    cached: false,
                },
                SelectEvent::Done(response),
            ]);
            let stream = events.map(|e| Ok::<Event, Infallible>(sse_event(e)));
            return Ok(Sse::new(stream).into_response());
        }
        AiPlan::Ready(selector, prepared) => (selector, prepared),
    };

    if selector.cached(&prepared).is_none() {
        selector.check_budget(&prepared)?;
    }
    let stream = selector
        .stream(prepared)
        .map(|e| Ok::<Event, Infallible>(sse_event(e)));
    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}
