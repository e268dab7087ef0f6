//! REST API Server for the expense query pipeline
//!
//! Serves the pipeline (one-shot and SSE) and the computation service role,
//! so one process can act as the remote compute backend of another.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::{Orchestrator, PipelineRequest};
use crate::analysis::{self, AnalysisOptions};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::execution::remote::{ExecuteRequest, ExecuteResponse, UNKNOWN_DATASET};
use crate::execution::DatasetHandle;
use crate::models::{Dataset, ErrorReport, PipelineEvent};
use crate::state::DatasetStore;
use crate::validation::validate_schema;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(alias = "prompt")]
    pub question: String,
    /// Inline transactions; takes precedence over `dataset_reference`.
    #[serde(default)]
    pub dataset: Option<Dataset>,
    /// Fingerprint of a dataset uploaded with `PUT /datasets/{fingerprint}`.
    #[serde(default)]
    pub dataset_reference: Option<String>,
    /// Replaces the server's pipeline configuration for this request.
    #[serde(default)]
    pub config: Option<PipelineConfig>,
    #[serde(default)]
    pub current_date: Option<NaiveDate>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Error with the structured report as data.
    pub fn failure(report: ErrorReport) -> Self {
        Self {
            success: false,
            error: Some(report.message.clone()),
            data: serde_json::to_value(report).ok(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

fn error_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::RouterMismatch { .. }
        | PipelineError::SpecialistParseError { .. }
        | PipelineError::ValidationFailure { .. }
        | PipelineError::ExecutionError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::InferenceFailed { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::ConfigError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub pipeline: Arc<PipelineConfig>,
    pub datasets: Arc<dyn DatasetStore>,
}

impl ApiState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        pipeline: PipelineConfig,
        datasets: Arc<dyn DatasetStore>,
    ) -> Self {
        Self {
            orchestrator,
            pipeline: Arc::new(pipeline),
            datasets,
        }
    }

    async fn pipeline_request(&self, req: AnalyzeRequest) -> Result<PipelineRequest, PipelineError> {
        let dataset = match (req.dataset, req.dataset_reference) {
            (Some(dataset), _) => DatasetHandle::new(dataset)?,
            (None, Some(reference)) => {
                let stored = self.datasets.get(&reference).await?.ok_or_else(|| {
                    PipelineError::ConfigError(format!("{}: {}", UNKNOWN_DATASET, reference))
                })?;
                DatasetHandle::new(stored.as_ref().clone())?
            }
            (None, None) => {
                return Err(PipelineError::ConfigError(
                    "request needs either `dataset` or `dataset_reference`".to_string(),
                ))
            }
        };

        let config = match req.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => self.pipeline.as_ref().clone(),
        };
        let mut request = PipelineRequest::new(&req.question, dataset, config);
        if let Some(date) = req.current_date {
            request = request.with_current_date(date);
        }
        Ok(request)
    }
}

/// =============================
/// Health & Models
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn list_models(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.providers().list_all().await {
        Ok(statuses) => (StatusCode::OK, Json(ApiResponse::success(statuses))),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::failure(ErrorReport::from_error(None, &e))),
        ),
    }
}

async fn provider_models(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.orchestrator.providers().status(&provider).await {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::success(status))),
        Err(e) => (StatusCode::NOT_FOUND, Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// Pipeline Endpoints
/// =============================

async fn analyze(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received analyze request: {}", req.question);

    let request = match state.pipeline_request(req).await {
        Ok(request) => request,
        Err(e) => return (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    };

    match state.orchestrator.answer(request).await {
        Ok(answer) => (StatusCode::OK, Json(ApiResponse::success(answer))),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::failure(ErrorReport::from_error(None, &e))),
        ),
    }
}

/// Stage events as SSE. Dropping the response stream cancels the run.
async fn analyze_stream(State(state): State<ApiState>, Json(req): Json<AnalyzeRequest>) -> Response {
    info!("Received streaming analyze request: {}", req.question);

    let request = match state.pipeline_request(req).await {
        Ok(request) => request,
        Err(e) => return (error_status(&e), Json(ApiResponse::error(e.to_string()))).into_response(),
    };

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let events = state.orchestrator.spawn(request, cancel);

    let stream = ReceiverStream::new(events).map(move |event| {
        let _held = &guard;
        sse_event(&event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn sse_event(event: &PipelineEvent) -> Result<Event, axum::Error> {
    let named = Event::default().event(event.name());
    match event {
        PipelineEvent::Status(status) => named.json_data(status),
        PipelineEvent::Result(answer) => named.json_data(answer),
        PipelineEvent::Error(report) => named.json_data(report),
    }
}

/// =============================
/// Computation Service Endpoints
/// =============================

async fn execute(
    State(state): State<ApiState>,
    Json(req): Json<ExecuteRequest>,
) -> (StatusCode, Json<ExecuteResponse>) {
    let dataset = match state.datasets.get(&req.dataset_reference).await {
        Ok(Some(dataset)) => dataset,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ExecuteResponse::from_error(format!(
                    "{}: {}",
                    UNKNOWN_DATASET, req.dataset_reference
                ))),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExecuteResponse::from_error(e.to_string())),
            )
        }
    };

    let invocation = match validate_schema(&req.tool_name, req.arguments) {
        Ok(invocation) => invocation,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ExecuteResponse::from_error(e.to_string()))),
    };

    let options = AnalysisOptions {
        today: req.as_of.unwrap_or_else(|| Utc::now().date_naive()),
        currency: req
            .currency
            .unwrap_or_else(|| state.pipeline.currency.clone()),
    };

    match analysis::run(&invocation, &dataset, &options) {
        Ok(output) => {
            info!(tool = %req.tool_name, "Compute request served");
            (StatusCode::OK, Json(ExecuteResponse::from_output(output)))
        }
        Err(e) => {
            warn!(tool = %req.tool_name, error = %e, "Compute request failed");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ExecuteResponse::from_error(e.to_string())),
            )
        }
    }
}

async fn upload_dataset(
    State(state): State<ApiState>,
    Path(fingerprint): Path<String>,
    Json(dataset): Json<Dataset>,
) -> (StatusCode, Json<ApiResponse>) {
    match dataset.fingerprint() {
        Ok(computed) if computed != fingerprint => {
            warn!(claimed = %fingerprint, computed = %computed, "Dataset fingerprint differs after transfer");
        }
        Ok(_) => {}
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }

    let rows = dataset.transactions.len();
    match state.datasets.put(&fingerprint, dataset).await {
        Ok(_) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(serde_json::json!({
                "fingerprint": fingerprint,
                "rows": rows,
            }))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models))
        .route("/models/:provider", get(provider_models))
        .route("/analyze", post(analyze))
        .route("/analyze_stream", post(analyze_stream))
        .route("/execute", post(execute))
        .route("/datasets/:fingerprint", put(upload_dataset))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComputeConfig, StageSelection};
    use crate::execution::HybridExecutor;
    use crate::models::{ArgValue, ExecutionSource, Transaction};
    use crate::provider::{ProviderRegistry, ScriptedProvider};
    use crate::state::InMemoryDatasetStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tower::ServiceExt;

    const MODEL: &str = "qwen2.5:3b";

    fn dataset() -> Dataset {
        let tx = |m, d, amount| Transaction {
            date: NaiveDate::from_ymd_opt(2025, m, d).unwrap(),
            amount,
            category: "grocery".to_string(),
            major_category: Some("Food".to_string()),
            remarks: None,
        };
        Dataset::new(vec![tx(1, 3, 3200.0), tx(1, 17, 4100.0), tx(2, 2, 1800.0)])
    }

    fn state(provider: ScriptedProvider) -> ApiState {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider.with_models(&[MODEL])));
        let orchestrator = Orchestrator::new(Arc::new(registry), Arc::new(HybridExecutor::embedded_only()));
        let pipeline = PipelineConfig::new(
            StageSelection::new("scripted", MODEL),
            StageSelection::new("scripted", MODEL),
        );
        ApiState::new(Arc::new(orchestrator), pipeline, Arc::new(InMemoryDatasetStore::new()))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn total_call(reference: &str) -> serde_json::Value {
        serde_json::json!({
            "tool_name": "calculate_total",
            "arguments": { "category": "grocery", "year": 2025, "month": 1 },
            "dataset_reference": reference,
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state(ScriptedProvider::new("scripted")));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_execute_requires_uploaded_dataset() {
        let app = create_router(state(ScriptedProvider::new("scripted")));
        let data = dataset();
        let fingerprint = data.fingerprint().unwrap();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/execute", total_call(&fingerprint)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"].as_str().unwrap().contains(UNKNOWN_DATASET));

        let upload = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/datasets/{}", fingerprint),
                serde_json::to_value(&data).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(upload.status(), StatusCode::CREATED);

        let response = app
            .oneshot(json_request("POST", "/execute", total_call(&fingerprint)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["scalar"], 7300.0);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_arguments() {
        let state = state(ScriptedProvider::new("scripted"));
        let data = dataset();
        let fingerprint = data.fingerprint().unwrap();
        state.datasets.put(&fingerprint, data).await.unwrap();

        let app = create_router(state);
        let response = app
            .oneshot(json_request(
                "POST",
                "/execute",
                serde_json::json!({
                    "tool_name": "calculate_total",
                    "arguments": { "month": 13, "year": 2025 },
                    "dataset_reference": fingerprint,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_returns_answer() {
        let app = create_router(state(
            ScriptedProvider::new("scripted")
                .reply("calculate_total")
                .reply(r#"calculate_total(category="groceries", year=2025, month=1)"#),
        ));

        let response = app
            .oneshot(json_request(
                "POST",
                "/analyze",
                serde_json::json!({
                    "question": "How much on groceries in January 2025?",
                    "dataset": dataset(),
                    "current_date": "2026-02-01",
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["answer"], "grocery in 2025-01: ¥7,300 (n=2, avg ¥3,650)");
        assert_eq!(body["data"]["corrections"][0], "corrected 'groceries' to 'grocery'");
    }

    #[tokio::test]
    async fn test_analyze_without_dataset_is_bad_request() {
        let app = create_router(state(ScriptedProvider::new("scripted")));
        let response = app
            .oneshot(json_request("POST", "/analyze", serde_json::json!({ "question": "How much?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analyze_rejects_out_of_range_config() {
        let app = create_router(state(ScriptedProvider::new("scripted")));
        let response = app
            .oneshot(json_request(
                "POST",
                "/analyze",
                serde_json::json!({
                    "question": "How much on groceries in January 2025?",
                    "dataset": dataset(),
                    "config": {
                        "router": { "provider": "scripted", "model": MODEL },
                        "specialist": { "provider": "scripted", "model": MODEL },
                        "matcher": { "threshold": 2.0 }
                    },
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("threshold"));
    }

    #[tokio::test]
    async fn test_analyze_stream_emits_named_events() {
        let app = create_router(state(
            ScriptedProvider::new("scripted")
                .reply("calculate_total")
                .reply("calculate_total(year=2025)"),
        ));

        let response = app
            .oneshot(json_request(
                "POST",
                "/analyze_stream",
                serde_json::json!({ "prompt": "Total spend in 2025?", "dataset": dataset() }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = tokio::time::timeout(Duration::from_secs(5), to_bytes(response.into_body(), usize::MAX))
            .await
            .unwrap()
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.matches("event: status").count(), 3);
        assert!(text.contains("event: result"));
        assert!(text.contains("Total in 2025"));
    }

    #[tokio::test]
    async fn test_serves_as_remote_compute_backend() {
        let app = create_router(state(ScriptedProvider::new("scripted")));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let executor = HybridExecutor::new(&ComputeConfig {
            base_url: Some(format!("http://{}", addr)),
            ..ComputeConfig::default()
        })
        .unwrap();

        let args: BTreeMap<String, ArgValue> = [
            ("category".to_string(), ArgValue::Str("grocery".to_string())),
            ("year".to_string(), ArgValue::Int(2025)),
        ]
        .into();
        let invocation = validate_schema("calculate_total", args).unwrap();
        let options = AnalysisOptions {
            today: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            currency: "JPY".to_string(),
        };

        let result = executor
            .execute(&invocation, &DatasetHandle::new(dataset()).unwrap(), &options)
            .await
            .unwrap();
        assert_eq!(result.source, ExecutionSource::Remote);
        assert_eq!(result.scalar, Some(9100.0));
    }
}
