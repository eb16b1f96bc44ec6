use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use mediguard_service::llm::OpenRouterBackend;
use mediguard_service::pipeline::{AnalysisPipeline, PipelineResult, ReadinessMode};
use mediguard_service::readiness::ReadinessVerdict;
use mediguard_service::records::{RecordRepository, csv_store};
use mediguard_service::tasks::types::IdentityAssessment;
use mediguard_service::AnalysisError;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<AnalysisPipeline>,
    repository: Arc<dyn RecordRepository>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    patient_id: String,
}

#[derive(Debug, Deserialize)]
struct SampleIdsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SampleIdsResponse {
    ids: Vec<String>,
}

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mediguard_service=debug,stage_flow=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            // Structured JSON logging for production
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    // The identity and billing stages always call the generation backend,
    // so the key is required regardless of readiness mode.
    let backend = match OpenRouterBackend::from_env() {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let records = match csv_store::load(&data_dir) {
        Ok(records) => Arc::new(records),
        Err(e) => {
            error!("failed to load record set: {e}");
            std::process::exit(1);
        }
    };

    let mode: ReadinessMode = std::env::var("READINESS_MODE")
        .ok()
        .map(|raw| match raw.parse() {
            Ok(mode) => mode,
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        })
        .unwrap_or_default();

    info!(mode = mode.as_str(), data_dir = %data_dir, "starting analysis service");

    let repository: Arc<dyn RecordRepository> = records;
    let pipeline = Arc::new(AnalysisPipeline::new(repository.clone(), backend, mode));

    let app_state = AppState {
        pipeline,
        repository,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/analyze", post(analyze_patient))
        .route("/api/analyze/identity", post(analyze_identity_only))
        .route("/api/readiness/{patient_id}", get(readiness))
        .route("/api/sample-ids", get(sample_ids))
        .layer(from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("Server running on http://{bind_addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
        std::process::exit(1);
    }
}

async fn health_check() -> &'static str {
    "OK"
}

fn status_for(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::PatientNotFound(_) => StatusCode::NOT_FOUND,
        AnalysisError::MalformedOutput { .. } | AnalysisError::Backend { .. } => {
            StatusCode::BAD_GATEWAY
        }
        AnalysisError::RepositoryUnavailable { .. } | AnalysisError::Pipeline(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn analyze_patient(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<PipelineResult>, StatusCode> {
    info!(patient_id = %request.patient_id, "processing analyze request");

    match state.pipeline.run(&request.patient_id).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            error!(patient_id = %request.patient_id, error = %e, "analysis failed");
            Err(status_for(&e))
        }
    }
}

async fn analyze_identity_only(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<IdentityAssessment>, StatusCode> {
    info!(patient_id = %request.patient_id, "processing identity-only request");

    match state
        .pipeline
        .analyze_identity_only(&request.patient_id)
        .await
    {
        Ok(assessment) => Ok(Json(assessment)),
        Err(e) => {
            error!(patient_id = %request.patient_id, error = %e, "identity analysis failed");
            Err(status_for(&e))
        }
    }
}

async fn readiness(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Result<Json<ReadinessVerdict>, StatusCode> {
    info!(patient_id = %patient_id, "processing readiness request");

    match state.pipeline.evaluate_readiness(&patient_id) {
        Ok(verdict) => Ok(Json(verdict)),
        Err(e) => {
            error!(patient_id = %patient_id, error = %e, "readiness evaluation failed");
            Err(status_for(&e))
        }
    }
}

async fn sample_ids(
    State(state): State<AppState>,
    Query(query): Query<SampleIdsQuery>,
) -> Json<SampleIdsResponse> {
    let limit = query.limit.unwrap_or(10);
    Json(SampleIdsResponse {
        ids: state.repository.sample_patient_ids(limit),
    })
}
