//! Client for the remote computation service

use crate::analysis::{AnalysisOptions, AnalysisOutput};
use crate::analysis::chart::ChartSpec;
use crate::config::ComputeConfig;
use crate::error::PipelineError;
use crate::models::{ArgValue, Dataset};
use crate::validation::ValidatedInvocation;
use crate::Result;
use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Error code a compute service returns for a fingerprint it has not seen.
pub const UNKNOWN_DATASET: &str = "unknown_dataset";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub tool_name: String,
    pub arguments: BTreeMap<String, ArgValue>,
    pub dataset_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_spec: Option<ChartSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecuteResponse {
    pub fn from_output(output: AnalysisOutput) -> Self {
        Self {
            value: Some(output.value),
            scalar: output.scalar,
            chart_spec: output.chart_spec,
            error: None,
        }
    }

    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

enum Attempt {
    Done(AnalysisOutput),
    UnknownDataset,
}

pub struct RemoteCompute {
    client: Client,
    base_url: String,
}

impl RemoteCompute {
    pub fn new(base_url: &str, config: &ComputeConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute remotely. `RemoteUnavailable` means the caller should fall back.
    pub async fn execute(
        &self,
        invocation: &ValidatedInvocation,
        dataset: &Dataset,
        fingerprint: &str,
        options: &AnalysisOptions,
    ) -> Result<AnalysisOutput> {
        let request = ExecuteRequest {
            tool_name: invocation.tool().name().to_string(),
            arguments: invocation.arguments().clone(),
            dataset_reference: fingerprint.to_string(),
            as_of: Some(options.today),
            currency: Some(options.currency.clone()),
        };

        if let Attempt::Done(output) = self.attempt(&request).await? {
            return Ok(output);
        }

        info!(fingerprint = %fingerprint, "Compute service lacks dataset, uploading");
        self.upload(fingerprint, dataset).await?;

        match self.attempt(&request).await? {
            Attempt::Done(output) => Ok(output),
            Attempt::UnknownDataset => Err(PipelineError::ExecutionError(format!(
                "compute service still does not know dataset {} after upload",
                fingerprint
            ))),
        }
    }

    async fn attempt(&self, request: &ExecuteRequest) -> Result<Attempt> {
        let url = format!("{}/execute", self.base_url);
        debug!(url = %url, tool = %request.tool_name, "Remote execution");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if is_unavailable_status(status) {
            return Err(PipelineError::RemoteUnavailable(format!(
                "compute service returned {}",
                status
            )));
        }

        let body = read_body(response).await?;

        if matches!(status, StatusCode::NOT_FOUND | StatusCode::CONFLICT)
            && body.error.as_deref().is_some_and(|e| e.contains(UNKNOWN_DATASET))
        {
            return Ok(Attempt::UnknownDataset);
        }

        if let Some(error) = body.error {
            return Err(PipelineError::ExecutionError(error));
        }
        if !status.is_success() {
            return Err(PipelineError::ExecutionError(format!(
                "compute service returned {}",
                status
            )));
        }

        let value = body.value.ok_or_else(|| {
            PipelineError::ExecutionError("compute service returned no value".to_string())
        })?;

        Ok(Attempt::Done(AnalysisOutput {
            value,
            scalar: body.scalar,
            chart_spec: body.chart_spec,
        }))
    }

    async fn upload(&self, fingerprint: &str, dataset: &Dataset) -> Result<()> {
        let url = format!("{}/datasets/{}", self.base_url, fingerprint);
        let response = self
            .client
            .put(&url)
            .json(dataset)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if is_unavailable_status(status) {
            return Err(PipelineError::RemoteUnavailable(format!(
                "dataset upload returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = read_body(response).await?;
            return Err(PipelineError::ExecutionError(
                body.error
                    .unwrap_or_else(|| format!("dataset upload returned {}", status)),
            ));
        }
        Ok(())
    }
}

fn is_unavailable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Transport failures (refused, timed out, reset) mean the service is unreachable.
fn unavailable(e: reqwest::Error) -> PipelineError {
    warn!(error = %e, timeout = e.is_timeout(), connect = e.is_connect(), "Compute service unreachable");
    PipelineError::RemoteUnavailable(e.to_string())
}

/// Error bodies are not always JSON; fall back to the raw text.
async fn read_body(response: Response) -> Result<ExecuteResponse> {
    let text = response.text().await.map_err(unavailable)?;
    if text.trim().is_empty() {
        return Ok(ExecuteResponse::default());
    }
    match serde_json::from_str::<ExecuteResponse>(&text) {
        Ok(body) => Ok(body),
        Err(_) => Ok(ExecuteResponse::from_error(text)),
    }
}
