use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use turf_api::{
    parse_item_list, CatalogResponse, ReachRequest, ReachResponse, RunRequest, SequenceRequest,
    SequenceResponse, TurfApi, API_CONTRACT_VERSION,
};
use turf_core::{RunResult, TurfError};
use turf_data::TurfConfig;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: TurfApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error_code: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    respondents: usize,
    items: usize,
}

/// `GET /turf?skus=SKU_1,SKU_5` as served to spreadsheet clients; a missing `skus` is an
/// empty selection.
#[derive(Debug, Clone, Deserialize)]
struct LegacyTurfQuery {
    skus: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "turf-service")]
#[command(about = "Local HTTP service for TURF sequence analysis")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_file: Option<PathBuf>,
    #[arg(long)]
    sheet: Option<String>,
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
}

impl From<TurfError> for ServiceError {
    fn from(err: TurfError) -> Self {
        let status = match &err {
            TurfError::EmptySelection => StatusCode::UNPROCESSABLE_ENTITY,
            TurfError::UnknownItem { .. }
            | TurfError::ForcedStartNotInSelection { .. }
            | TurfError::DuplicateItem { .. }
            | TurfError::Validation(_) => StatusCode::BAD_REQUEST,
            TurfError::RaggedRow { .. }
            | TurfError::ItemIndexOutOfRange { .. }
            | TurfError::CatalogMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error_code: err.code(),
            error: err.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error_code = self.error_code, error = %self.error, "request failed");
        } else {
            tracing::warn!(error_code = self.error_code, error = %self.error, "request rejected");
        }
        (self.status, Json(self)).into_response()
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/catalog", get(catalog))
        .route("/turf", get(turf_legacy))
        .route("/v1/turf/run", post(turf_run))
        .route("/v1/turf/sequence", post(turf_sequence))
        .route("/v1/turf/reach", post(turf_reach))
        .layer(middleware::from_fn(allow_any_origin))
        .with_state(state)
}

/// Browser and spreadsheet clients call from other origins; preflights are answered here.
async fn allow_any_origin(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    response
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = TurfConfig::resolve(
        args.config.as_deref(),
        args.data_file.as_deref(),
        args.sheet.as_deref(),
    )?;
    let state = ServiceState { api: TurfApi::from_config(&config)? };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        bind = %args.bind,
        data_file = %config.data_file.display(),
        "turf service listening"
    );
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    let dataset = state.api.dataset();
    Json(envelope(HealthResponse {
        status: "ok",
        respondents: dataset.matrix.respondent_count(),
        items: dataset.catalog.len(),
    }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn catalog(State(state): State<ServiceState>) -> Json<ServiceEnvelope<CatalogResponse>> {
    Json(envelope(state.api.catalog()))
}

async fn turf_legacy(
    State(state): State<ServiceState>,
    Query(query): Query<LegacyTurfQuery>,
) -> Result<Json<ServiceEnvelope<RunResult>>, ServiceError> {
    let request = RunRequest { items: parse_item_list(query.skus.as_deref().unwrap_or_default()) };
    tracing::info!(items = request.items.len(), "legacy turf request");
    run_selection(&state, &request)
}

async fn turf_run(
    State(state): State<ServiceState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<ServiceEnvelope<RunResult>>, ServiceError> {
    tracing::info!(items = request.items.len(), "turf run request");
    run_selection(&state, &request)
}

fn run_selection(
    state: &ServiceState,
    request: &RunRequest,
) -> Result<Json<ServiceEnvelope<RunResult>>, ServiceError> {
    let run = state.api.run(request)?;
    if run.empty_respondent_set {
        tracing::warn!("turf run over an empty respondent set");
    }
    Ok(Json(envelope(run)))
}

async fn turf_sequence(
    State(state): State<ServiceState>,
    Json(request): Json<SequenceRequest>,
) -> Result<Json<ServiceEnvelope<SequenceResponse>>, ServiceError> {
    let response = state.api.sequence(&request)?;
    Ok(Json(envelope(response)))
}

async fn turf_reach(
    State(state): State<ServiceState>,
    Json(request): Json<ReachRequest>,
) -> Result<Json<ServiceEnvelope<ReachResponse>>, ServiceError> {
    let response = state.api.reach(&request)?;
    Ok(Json(envelope(response)))
}
