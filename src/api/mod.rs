use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::engine::ExecutionEngine;
use crate::error::RunnerError;
use crate::job::{JobId, JobStatus, JobSummary, StatusView};
use crate::workload::nb5::YamlSource;
use crate::workload::{DsbulkOperation, DsbulkWorkload, Nb5Workload, Workload};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(engine: Arc<ExecutionEngine>, config: ServerConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for RunnerError {
    fn into_response(self) -> Response {
        let status = match self {
            RunnerError::NotFound(_) | RunnerError::InvalidId(_) => StatusCode::NOT_FOUND,
            RunnerError::InvalidWorkload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ValidateResponse {
    valid: bool,
    path: String,
}

#[derive(Deserialize)]
struct Nb5CommandRequest {
    yaml_file: String,
    host: String,
    datacenter: String,
    keyspace: String,
    additional_params: Option<String>,
}

#[derive(Serialize)]
struct CommandResponse {
    command: String,
}

#[derive(Deserialize)]
struct Nb5ExecuteRequest {
    yaml_content: String,
    host: String,
    datacenter: String,
    keyspace: String,
    additional_params: Option<String>,
    /// Seconds; `0` disables the limit
    timeout: Option<u64>,
}

#[derive(Deserialize)]
struct DsbulkExecuteRequest {
    #[serde(flatten)]
    operation: DsbulkOperation,
    timeout: Option<u64>,
}

#[derive(Serialize)]
struct DsbulkCommandResponse {
    command: String,
    operation: &'static str,
    description: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ExecuteResponse {
    execution_id: JobId,
    command: String,
    status: JobStatus,
}

#[derive(Serialize)]
struct ListResponse {
    executions: Vec<JobSummary>,
}

/// All routes, with permissive CORS for browser front ends.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/nb5/validate", get(nb5_validate_handler))
        .route("/api/nb5/generate-command", post(nb5_command_handler))
        .route("/api/nb5/download-script", post(nb5_script_handler))
        .route("/api/nb5/execute", post(nb5_execute_handler))
        .route("/api/nb5/status/:id", get(status_handler))
        .route("/api/nb5/terminate/:id", post(terminate_handler))
        .route("/api/nb5/list", get(list_handler))
        .route("/api/dsbulk/validate", get(dsbulk_validate_handler))
        .route("/api/dsbulk/generate-commands", post(dsbulk_command_handler))
        .route("/api/dsbulk/download-script", post(dsbulk_script_handler))
        .route("/api/dsbulk/execute", post(dsbulk_execute_handler))
        .route("/api/jobs", get(list_handler))
        .route("/api/jobs/:id", get(status_handler))
        .route("/api/jobs/:id/terminate", post(terminate_handler))
        .route("/api/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind HTTP server");
        e
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn parse_id(raw: &str) -> Result<JobId, RunnerError> {
    raw.parse()
        .map_err(|_| RunnerError::InvalidId(raw.to_string()))
}

fn timeout_from(secs: Option<u64>, default: Duration) -> Option<Duration> {
    match secs {
        None => Some(default),
        Some(0) => None,
        Some(s) => Some(Duration::from_secs(s)),
    }
}

async fn nb5_validate_handler(State(state): State<AppState>) -> impl IntoResponse {
    let jar = &state.config.nb5_jar;
    Json(ValidateResponse {
        valid: Nb5Workload::jar_exists(jar),
        path: jar.display().to_string(),
    })
}

fn nb5_from_command(state: &AppState, req: Nb5CommandRequest) -> (Nb5Workload, String) {
    let workload = Nb5Workload::new(
        state.config.nb5_jar.clone(),
        YamlSource::File(PathBuf::from(&req.yaml_file)),
        req.host,
        req.datacenter,
        req.keyspace,
    )
    .with_additional_params(req.additional_params.unwrap_or_default());
    (workload, req.yaml_file)
}

async fn nb5_command_handler(
    State(state): State<AppState>,
    Json(req): Json<Nb5CommandRequest>,
) -> impl IntoResponse {
    let (workload, _) = nb5_from_command(&state, req);
    Json(CommandResponse {
        command: workload.display(),
    })
}

async fn nb5_script_handler(
    State(state): State<AppState>,
    Json(req): Json<Nb5CommandRequest>,
) -> impl IntoResponse {
    let (workload, yaml_file) = nb5_from_command(&state, req);
    let disposition = format!(
        "attachment; filename={}",
        Nb5Workload::script_name(&yaml_file)
    );
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        workload.script(&yaml_file),
    )
}

async fn nb5_execute_handler(
    State(state): State<AppState>,
    Json(req): Json<Nb5ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, RunnerError> {
    let workload = Nb5Workload::new(
        state.config.nb5_jar.clone(),
        YamlSource::Inline(req.yaml_content),
        req.host,
        req.datacenter,
        req.keyspace,
    )
    .with_additional_params(req.additional_params.unwrap_or_default());

    let timeout = timeout_from(req.timeout, state.config.default_timeout);
    execute(&state, &workload, timeout).await
}

async fn dsbulk_validate_handler(State(state): State<AppState>) -> impl IntoResponse {
    let jar = &state.config.dsbulk_jar;
    Json(ValidateResponse {
        valid: DsbulkWorkload::jar_exists(jar),
        path: jar.display().to_string(),
    })
}

async fn dsbulk_command_handler(
    State(state): State<AppState>,
    Json(operation): Json<DsbulkOperation>,
) -> Result<Json<DsbulkCommandResponse>, RunnerError> {
    let workload = DsbulkWorkload::new(state.config.dsbulk_jar.clone(), operation);
    workload.check()?;
    Ok(Json(DsbulkCommandResponse {
        command: workload.display(),
        operation: workload.operation.name(),
        description: workload.description(),
    }))
}

async fn dsbulk_script_handler(
    State(state): State<AppState>,
    Json(operation): Json<DsbulkOperation>,
) -> Result<impl IntoResponse, RunnerError> {
    let workload = DsbulkWorkload::new(state.config.dsbulk_jar.clone(), operation);
    workload.check()?;
    let disposition = format!("attachment; filename={}", workload.script_name());
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        workload.script(),
    ))
}

async fn dsbulk_execute_handler(
    State(state): State<AppState>,
    Json(req): Json<DsbulkExecuteRequest>,
) -> Result<Json<ExecuteResponse>, RunnerError> {
    let workload = DsbulkWorkload::new(state.config.dsbulk_jar.clone(), req.operation);
    let timeout = timeout_from(req.timeout, state.config.default_timeout);
    execute(&state, &workload, timeout).await
}

async fn execute<W: Workload>(
    state: &AppState,
    workload: &W,
    timeout: Option<Duration>,
) -> Result<Json<ExecuteResponse>, RunnerError> {
    let launch = workload.prepare(&state.config.scratch_dir)?;
    let command = launch.display.clone();
    let execution_id = state.engine.start_prepared(launch, timeout).await?;
    Ok(Json(ExecuteResponse {
        execution_id,
        command,
        status: JobStatus::Running,
    }))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, RunnerError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_status(&id).await?))
}

async fn terminate_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, RunnerError> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.terminate(&id).await?))
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

async fn list_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ListResponse {
        executions: state.engine.list().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_and_zero_disables() {
        let default = Duration::from_secs(600);
        assert_eq!(timeout_from(None, default), Some(default));
        assert_eq!(timeout_from(Some(0), default), None);
        assert_eq!(timeout_from(Some(5), default), Some(Duration::from_secs(5)));
    }

    #[test]
    fn error_status_codes() {
        let resp = RunnerError::NotFound(JobId::new()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = RunnerError::InvalidWorkload("bad".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = RunnerError::Internal("boom".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn malformed_id_is_not_found() {
        let err = parse_id("nope").unwrap_err();
        assert!(matches!(err, RunnerError::InvalidId(_)));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
        assert!(parse_id(&JobId::new().to_string()).is_ok());
    }
}
