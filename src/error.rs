//! Error types for the expense query pipeline

use crate::models::Stage;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Stage Failures (user-visible)
    // =============================

    #[error("Router returned '{raw}', which is not a registered tool")]
    RouterMismatch { raw: String },

    #[error("Could not parse specialist output ({reason}): {raw}")]
    SpecialistParseError { raw: String, reason: String },

    #[error("Invalid argument '{argument}': {reason}{}", format_candidates(.candidates))]
    ValidationFailure {
        argument: String,
        reason: String,
        candidates: Vec<String>,
    },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("No reachable provider{} (tried: {})", format_stage(.stage), .tried.join(", "))]
    ProviderUnavailable {
        stage: Option<Stage>,
        tried: Vec<String>,
    },

    #[error("Inference failed during the {stage} stage: {reason}")]
    InferenceFailed { stage: Stage, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    // =============================
    // Internal
    // =============================

    /// Compute service unreachable; the engine falls back instead of surfacing this.
    #[error("Compute service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Stable machine-readable kind, used in the event stream and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::RouterMismatch { .. } => "router_mismatch",
            PipelineError::SpecialistParseError { .. } => "specialist_parse_error",
            PipelineError::ValidationFailure { .. } => "validation_failure",
            PipelineError::ExecutionError(_) => "execution_error",
            PipelineError::ProviderUnavailable { .. } => "provider_unavailable",
            PipelineError::InferenceFailed { .. } => "inference_failed",
            PipelineError::Cancelled => "cancelled",
            PipelineError::RemoteUnavailable(_) => "remote_unavailable",
            PipelineError::ProviderError(_) => "provider_error",
            PipelineError::ConfigError(_) => "config_error",
            PipelineError::SerializationError(_) => "serialization_error",
            PipelineError::HttpError(_) => "http_error",
            PipelineError::IoError(_) => "io_error",
        }
    }

    /// Raw model output attached to the error, if any.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            PipelineError::RouterMismatch { raw } => Some(raw),
            PipelineError::SpecialistParseError { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Nearest valid candidates, for validation failures.
    pub fn candidates(&self) -> &[String] {
        match self {
            PipelineError::ValidationFailure { candidates, .. } => candidates,
            _ => &[],
        }
    }

    pub(crate) fn validation(argument: &str, reason: impl Into<String>) -> Self {
        PipelineError::ValidationFailure {
            argument: argument.to_string(),
            reason: reason.into(),
            candidates: Vec::new(),
        }
    }
}

fn format_stage(stage: &Option<Stage>) -> String {
    match stage {
        Some(stage) => format!(" for the {} stage", stage),
        None => String::new(),
    }
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", candidates.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failure_lists_candidates() {
        let err = PipelineError::ValidationFailure {
            argument: "category".to_string(),
            reason: "'fod' is not a known category".to_string(),
            candidates: vec!["Food".to_string(), "food court".to_string()],
        };

        let message = err.to_string();
        assert!(message.contains("'category'"));
        assert!(message.contains("did you mean: Food, food court?"));
        assert_eq!(err.kind(), "validation_failure");
    }

    #[test]
    fn test_router_mismatch_keeps_raw_output() {
        let err = PipelineError::RouterMismatch {
            raw: "I think plot_time_series".to_string(),
        };
        assert_eq!(err.raw_output(), Some("I think plot_time_series"));
        assert!(err.candidates().is_empty());
    }

    #[test]
    fn test_provider_unavailable_message() {
        let err = PipelineError::ProviderUnavailable {
            stage: Some(Stage::Router),
            tried: vec!["ollama".to_string(), "mlx".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No reachable provider for the router stage (tried: ollama, mlx)"
        );
    }
}
