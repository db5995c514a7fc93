//! HTTP surface over the ingestion pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/process` | Upload a chat log (multipart field `file`) and ingest it |
//! | `GET`  | `/api/dashboard` | Aggregate warehouse summary |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Response envelope
//!
//! Every response, success or failure, has the same outer shape:
//!
//! ```json
//! { "success": false, "code": "duplicate", "message": "...", "data": { "hash": "..." } }
//! ```
//!
//! `code` is omitted on success. Error codes and statuses: `invalid_format`
//! (400), `duplicate` (409), `enrichment_failed` (502), `persistence_failed`
//! and `storage_failed` (500), `bad_request` (400).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser dashboard on
//! another origin can call the API.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::dashboard::{self, Dashboard};
use crate::enrich::Enricher;
use crate::error::IngestError;
use crate::json_stream::JsonArrayReader;
use crate::models::EnrichedSession;
use crate::pipeline::{IngestReport, Pipeline};
use crate::upload::Spool;
use crate::{db, migrate};

/// Multipart field carrying the uploaded chat log.
const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Starts the HTTP server on `[server].bind`.
///
/// Connects to the warehouse (creating the schema if needed) and serves
/// until the process is terminated.
pub async fn run_server(config: &Config, enricher: Arc<dyn Enricher>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let pipeline = Arc::new(Pipeline::new(Arc::new(config.clone()), pool, enricher));
    let app = build_router(pipeline);

    info!(
        bind = %bind_addr,
        upload_dir = %config.upload.dir.display(),
        "session warehouse listening"
    );
    println!("Session warehouse listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router around an existing pipeline.
pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    let body_limit = pipeline.config().server.max_upload_mb * 1024 * 1024;
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/process", post(handle_process))
        .route("/api/dashboard", get(handle_dashboard))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Envelope ============

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        code: None,
        message: message.into(),
        data: Some(data),
    })
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    data: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Envelope {
            success: false,
            code: Some(self.code),
            message: self.message,
            data: self.data,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
        data: None,
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
        data: None,
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let status = match &err {
            IngestError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            IngestError::Duplicate { .. } => StatusCode::CONFLICT,
            IngestError::Enrichment { .. } => StatusCode::BAD_GATEWAY,
            IngestError::Persistence(_) | IngestError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let data = match &err {
            IngestError::Duplicate { fingerprint } => {
                Some(serde_json::json!({ "hash": fingerprint }))
            }
            _ => None,
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "ingestion failed");
        }
        AppError {
            status,
            code: err.code(),
            message: err.to_string(),
            data,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/dashboard ============

async fn handle_dashboard(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Dashboard>>, AppError> {
    let dash = dashboard::summary(state.pipeline.db())
        .await
        .map_err(|e| internal(format!("dashboard query failed: {:#}", e)))?;
    Ok(ok("dashboard summary", dash))
}

// ============ POST /api/process ============

#[derive(Serialize)]
struct ProcessData {
    report: IngestReport,
    sessions: Vec<EnrichedSession>,
}

/// Handler for `POST /api/process`.
///
/// Streams the `file` field to the upload directory chunk by chunk, then
/// runs the batch. Other fields are ignored.
async fn handle_process(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Envelope<ProcessData>>, AppError> {
    let upload_dir = state.pipeline.config().upload.dir.clone();
    let mut stored = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let mut spool = Spool::create(&upload_dir, &name)
            .await
            .map_err(|e| AppError::from(IngestError::Storage(e)))?;

        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = spool.write(&chunk).await {
                        spool.abandon().await;
                        return Err(IngestError::Storage(e).into());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    spool.abandon().await;
                    return Err(bad_request(format!("upload interrupted: {}", e)));
                }
            }
        }

        stored = Some(
            spool
                .finish()
                .await
                .map_err(|e| AppError::from(IngestError::Storage(e)))?,
        );
        break;
    }

    let stored = stored
        .ok_or_else(|| bad_request(format!("missing multipart field '{}'", UPLOAD_FIELD)))?;
    let report = state.pipeline.process(stored).await?;
    let sessions = read_sessions(report.enriched_path.clone()).await?;

    let message = format!(
        "processed {} sessions ({} new, {} updated)",
        report.sessions, report.load.facts_inserted, report.load.facts_updated
    );
    Ok(ok(message, ProcessData { report, sessions }))
}

async fn read_sessions(path: PathBuf) -> Result<Vec<EnrichedSession>, AppError> {
    let rows = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<EnrichedSession>> {
        let file = std::fs::File::open(&path)?;
        JsonArrayReader::new(std::io::BufReader::new(file)).collect()
    })
    .await
    .map_err(|e| internal(format!("reader task failed: {}", e)))?;

    rows.map_err(|e| internal(format!("could not read enriched sessions: {:#}", e)))
}
