//! Execution engine with hybrid dispatch
//!
//! Validated invocations run on the remote compute service when one is
//! configured and reachable, otherwise on the embedded interpreter.
//! No model calls happen here.

pub mod embedded;
pub mod remote;

use crate::analysis::AnalysisOptions;
use crate::config::ComputeConfig;
use crate::error::PipelineError;
use crate::models::{Dataset, ExecutionResult, ExecutionSource};
use crate::validation::ValidatedInvocation;
use crate::Result;
use embedded::EmbeddedInterpreter;
use remote::RemoteCompute;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A dataset together with its fingerprint, computed once.
#[derive(Debug, Clone)]
pub struct DatasetHandle {
    dataset: Arc<Dataset>,
    fingerprint: String,
}

impl DatasetHandle {
    pub fn new(dataset: Dataset) -> Result<Self> {
        let fingerprint = dataset.fingerprint()?;
        Ok(Self {
            dataset: Arc::new(dataset),
            fingerprint,
        })
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Remote-first executor with an embedded fallback.
pub struct HybridExecutor {
    remote: Option<RemoteCompute>,
    embedded: RwLock<Option<Arc<EmbeddedInterpreter>>>,
}

impl HybridExecutor {
    pub fn new(config: &ComputeConfig) -> Result<Self> {
        let remote = match config.base_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Some(RemoteCompute::new(url, config)?),
            _ => None,
        };

        Ok(Self {
            remote,
            embedded: RwLock::new(None),
        })
    }

    /// Embedded-only executor.
    pub fn embedded_only() -> Self {
        Self {
            remote: None,
            embedded: RwLock::new(None),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub async fn execute(
        &self,
        invocation: &ValidatedInvocation,
        dataset: &DatasetHandle,
        options: &AnalysisOptions,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();

        if let Some(remote) = &self.remote {
            match remote
                .execute(invocation, &dataset.dataset, &dataset.fingerprint, options)
                .await
            {
                Ok(output) => {
                    info!(
                        tool = %invocation.tool(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Executed on compute service"
                    );
                    return Ok(output.into_result(ExecutionSource::Remote));
                }
                Err(PipelineError::RemoteUnavailable(reason)) => {
                    warn!(
                        url = %remote.base_url(),
                        reason = %reason,
                        "Compute service unavailable, falling back to embedded interpreter"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let interpreter = self.interpreter_for(dataset).await;
        let output = interpreter.execute(invocation, options)?;

        info!(
            tool = %invocation.tool(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executed on embedded interpreter"
        );
        Ok(output.into_result(ExecutionSource::Embedded))
    }

    /// Lazily create the interpreter; replace it when the dataset changes.
    async fn interpreter_for(&self, dataset: &DatasetHandle) -> Arc<EmbeddedInterpreter> {
        {
            let current = self.embedded.read().await;
            if let Some(interpreter) = current.as_ref() {
                if interpreter.fingerprint() == dataset.fingerprint {
                    return interpreter.clone();
                }
            }
        }

        let mut slot = self.embedded.write().await;
        if let Some(interpreter) = slot.as_ref() {
            if interpreter.fingerprint() == dataset.fingerprint {
                return interpreter.clone();
            }
        }

        debug!(fingerprint = %dataset.fingerprint, "Initializing embedded interpreter");
        let interpreter = Arc::new(EmbeddedInterpreter::new(
            &dataset.fingerprint,
            dataset.dataset.clone(),
        ));
        *slot = Some(interpreter.clone());
        interpreter
    }

    /// Fingerprint of the live embedded snapshot, if any.
    pub async fn embedded_fingerprint(&self) -> Option<String> {
        self.embedded
            .read()
            .await
            .as_ref()
            .map(|i| i.fingerprint().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArgValue, Transaction};
    use crate::validation::validate_schema;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{post, put};
    use axum::{Json, Router};
    use chrono::NaiveDate;
    use remote::{ExecuteRequest, ExecuteResponse, UNKNOWN_DATASET};
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn handle(amount: f64) -> DatasetHandle {
        DatasetHandle::new(Dataset::new(vec![Transaction {
            date: NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
            amount,
            category: "grocery".to_string(),
            major_category: None,
            remarks: None,
        }]))
        .unwrap()
    }

    fn total_call() -> ValidatedInvocation {
        let args: BTreeMap<String, ArgValue> =
            [("category".to_string(), ArgValue::Str("grocery".to_string()))].into();
        validate_schema("calculate_total", args).unwrap()
    }

    fn options() -> AnalysisOptions {
        AnalysisOptions {
            today: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            currency: "JPY".to_string(),
        }
    }

    fn compute_config(url: String) -> ComputeConfig {
        ComputeConfig {
            base_url: Some(url),
            connect_timeout: Duration::from_millis(300),
            timeout: Duration::from_secs(2),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_refused_remote_falls_back_to_embedded() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let executor = HybridExecutor::new(&compute_config(format!("http://{}", addr))).unwrap();
        let result = executor.execute(&total_call(), &handle(1200.0), &options()).await.unwrap();

        assert_eq!(result.source, ExecutionSource::Embedded);
        assert_eq!(result.scalar, Some(1200.0));
    }

    #[tokio::test]
    async fn test_service_unavailable_falls_back() {
        let app = Router::new().route(
            "/execute",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
        );
        let executor = HybridExecutor::new(&compute_config(serve(app).await)).unwrap();

        let result = executor.execute(&total_call(), &handle(800.0), &options()).await.unwrap();
        assert_eq!(result.source, ExecutionSource::Embedded);
    }

    #[tokio::test]
    async fn test_remote_success_and_dataset_upload() {
        #[derive(Clone, Default)]
        struct Known {
            fingerprints: Arc<Mutex<HashSet<String>>>,
            uploads: Arc<AtomicUsize>,
        }

        let known = Known::default();
        let app = Router::new()
            .route(
                "/execute",
                post(|State(known): State<Known>, Json(req): Json<ExecuteRequest>| async move {
                    if !known.fingerprints.lock().unwrap().contains(&req.dataset_reference) {
                        return (StatusCode::NOT_FOUND, Json(ExecuteResponse::from_error(UNKNOWN_DATASET)));
                    }
                    (
                        StatusCode::OK,
                        Json(ExecuteResponse {
                            value: Some(format!("remote {}", req.tool_name)),
                            scalar: Some(42.0),
                            ..ExecuteResponse::default()
                        }),
                    )
                }),
            )
            .route(
                "/datasets/:fingerprint",
                put(|State(known): State<Known>, Path(fp): Path<String>, Json(_): Json<Dataset>| async move {
                    known.uploads.fetch_add(1, Ordering::SeqCst);
                    known.fingerprints.lock().unwrap().insert(fp);
                    StatusCode::NO_CONTENT
                }),
            )
            .with_state(known.clone());

        let executor = HybridExecutor::new(&compute_config(serve(app).await)).unwrap();
        let dataset = handle(500.0);

        let first = executor.execute(&total_call(), &dataset, &options()).await.unwrap();
        assert_eq!(first.source, ExecutionSource::Remote);
        assert_eq!(first.value, "remote calculate_total");

        executor.execute(&total_call(), &dataset, &options()).await.unwrap();
        assert_eq!(known.uploads.load(Ordering::SeqCst), 1);
        assert!(executor.embedded_fingerprint().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_error_field_is_execution_error() {
        let app = Router::new().route(
            "/execute",
            post(|| async { Json(ExecuteResponse::from_error("division by zero")) }),
        );
        let executor = HybridExecutor::new(&compute_config(serve(app).await)).unwrap();

        match executor.execute(&total_call(), &handle(1.0), &options()).await {
            Err(PipelineError::ExecutionError(msg)) => assert_eq!(msg, "division by zero"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embedded_snapshot_follows_fingerprint() {
        let executor = HybridExecutor::embedded_only();
        assert!(executor.embedded_fingerprint().await.is_none());

        let first = handle(100.0);
        executor.execute(&total_call(), &first, &options()).await.unwrap();
        assert_eq!(executor.embedded_fingerprint().await.as_deref(), Some(first.fingerprint()));

        let second = handle(250.0);
        let result = executor.execute(&total_call(), &second, &options()).await.unwrap();
        assert_eq!(result.scalar, Some(250.0));
        assert_eq!(executor.embedded_fingerprint().await.as_deref(), Some(second.fingerprint()));
    }
}
