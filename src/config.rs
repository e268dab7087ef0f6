//! Pipeline and engine configuration
//!
//! `PipelineConfig` travels with every run; `EngineConfig` is read once from
//! the environment by the binaries.

use crate::error::PipelineError;
use crate::models::Stage;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

//
// ================= Sampling =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            top_k: 40,
            max_tokens: 256,
        }
    }
}

//
// ================= Stage Selection =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderModel {
    pub provider: String,
    pub model: String,
}

/// Which backend and model serve one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSelection {
    pub provider: String,
    pub model: String,
    /// Used when the primary backend is unreachable, and for summarizing
    /// results the embedded interpreter produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<ProviderModel>,
    /// Overrides the shared sampling defaults for this stage only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingConfig>,
}

impl StageSelection {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            fallback: None,
            sampling: None,
        }
    }

    pub fn with_fallback(mut self, provider: &str, model: &str) -> Self {
        self.fallback = Some(ProviderModel {
            provider: provider.to_string(),
            model: model.to_string(),
        });
        self
    }

    pub fn primary(&self) -> ProviderModel {
        ProviderModel {
            provider: self.provider.clone(),
            model: self.model.clone(),
        }
    }

    /// Primary first, then the fallback if one is configured.
    pub fn candidates(&self) -> Vec<ProviderModel> {
        std::iter::once(self.primary())
            .chain(self.fallback.clone())
            .collect()
    }
}

//
// ================= Matcher =================
//

/// What to do when two categories score the same best similarity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Fail validation and list both candidates.
    #[default]
    Reject,
    /// Prefer a broad group over a specific category, then alphabetical order.
    PreferGroup,
    /// Alphabetically first candidate.
    Alphabetical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum similarity (0.0..=1.0) for a fuzzy category match.
    pub threshold: f64,
    pub tie_break: TieBreak,
    /// How many near misses to list on failure.
    pub max_candidates: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            tie_break: TieBreak::Reject,
            max_candidates: 3,
        }
    }
}

//
// ================= Pipeline =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub router: StageSelection,
    pub specialist: StageSelection,
    /// `None` disables the summarizer stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarizer: Option<StageSelection>,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_inference_timeout_secs() -> u64 {
    60
}

fn default_currency() -> String {
    "JPY".to_string()
}

impl PipelineConfig {
    pub fn new(router: StageSelection, specialist: StageSelection) -> Self {
        Self {
            router,
            specialist,
            summarizer: None,
            sampling: SamplingConfig::default(),
            inference_timeout_secs: default_inference_timeout_secs(),
            matcher: MatcherConfig::default(),
            currency: default_currency(),
        }
    }

    pub fn with_summarizer(mut self, summarizer: StageSelection) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn selection(&self, stage: Stage) -> Option<&StageSelection> {
        match stage {
            Stage::Router => Some(&self.router),
            Stage::Specialist => Some(&self.specialist),
            Stage::Summarizing => self.summarizer.as_ref(),
            Stage::Executing => None,
        }
    }

    pub fn sampling_for(&self, stage: Stage) -> &SamplingConfig {
        self.selection(stage)
            .and_then(|s| s.sampling.as_ref())
            .unwrap_or(&self.sampling)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs.max(1))
    }

    /// Range checks for values that arrive from the environment or a request body.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.matcher.threshold) {
            return Err(PipelineError::ConfigError(format!(
                "matcher.threshold must be within 0..=1, got {}",
                self.matcher.threshold
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(PipelineError::ConfigError("currency must not be empty".to_string()));
        }

        check_sampling("sampling", &self.sampling)?;
        for stage in [Stage::Router, Stage::Specialist, Stage::Summarizing] {
            let Some(selection) = self.selection(stage) else {
                continue;
            };
            if selection.provider.trim().is_empty() || selection.model.trim().is_empty() {
                return Err(PipelineError::ConfigError(format!(
                    "{:?} stage needs a provider and a model",
                    stage
                )));
            }
            if let Some(sampling) = &selection.sampling {
                check_sampling(&format!("{:?} sampling", stage), sampling)?;
            }
        }
        Ok(())
    }
}

//
// ================= Engine (process-wide) =================
//

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeConfig {
    pub base_url: Option<String>,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: Duration::from_millis(500),
            timeout: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ollama_base_url: Option<String>,
    pub mlx_base_url: Option<String>,
    pub compute: ComputeConfig,
    pub pipeline: PipelineConfig,
    pub port: u16,
}

impl EngineConfig {
    /// Reads the process environment. Call `dotenv::dotenv()` first if a
    /// `.env` file should be honoured.
    pub fn from_env() -> Result<Self> {
        let ollama_base_url =
            Some(env_or("OLLAMA_BASE_URL", "http://localhost:11434")).filter(|s| !s.is_empty());
        let mlx_base_url = env::var("MLX_BASE_URL").ok().filter(|s| !s.is_empty());

        let compute = ComputeConfig {
            base_url: env::var("COMPUTE_SERVICE_URL").ok().filter(|s| !s.is_empty()),
            connect_timeout: Duration::from_millis(parse_env("COMPUTE_CONNECT_TIMEOUT_MS", 500)?),
            timeout: Duration::from_millis(parse_env("COMPUTE_TIMEOUT_MS", 10_000)?),
        };

        let default_model = env_or("DEFAULT_MODEL", "qwen2.5:3b");
        let router = stage_from_env("ROUTER", &default_model);
        let specialist = stage_from_env("SPECIALIST", &default_model);

        let summarizer_enabled: bool = parse_env("SUMMARIZER_ENABLED", true)?;
        let summarizer = summarizer_enabled.then(|| stage_from_env("SUMMARIZER", &default_model));

        let mut pipeline = PipelineConfig::new(router, specialist);
        pipeline.summarizer = summarizer;
        pipeline.inference_timeout_secs = parse_env("INFERENCE_TIMEOUT_SECS", 60)?;
        pipeline.matcher.threshold = parse_env("MATCH_THRESHOLD", 0.8)?;
        pipeline.currency = env_or("CURRENCY", "JPY");

        pipeline.validate()?;

        let port = parse_env(
            "PORT",
            parse_env::<u16>("API_PORT", 8080)?,
        )?;

        Ok(Self {
            ollama_base_url,
            mlx_base_url,
            compute,
            pipeline,
            port,
        })
    }
}

fn check_sampling(name: &str, sampling: &SamplingConfig) -> Result<()> {
    if !(sampling.temperature.is_finite() && sampling.temperature >= 0.0) {
        return Err(PipelineError::ConfigError(format!(
            "{}.temperature must be a non-negative number, got {}",
            name, sampling.temperature
        )));
    }
    if !(sampling.top_p > 0.0 && sampling.top_p <= 1.0) {
        return Err(PipelineError::ConfigError(format!(
            "{}.top_p must be within (0, 1], got {}",
            name, sampling.top_p
        )));
    }
    if sampling.max_tokens == 0 {
        return Err(PipelineError::ConfigError(format!("{}.max_tokens must be positive", name)));
    }
    Ok(())
}

fn stage_from_env(prefix: &str, default_model: &str) -> StageSelection {
    let provider = env_or(&format!("{}_PROVIDER", prefix), "ollama");
    let model = env_or(&format!("{}_MODEL", prefix), default_model);
    let mut selection = StageSelection::new(&provider, &model);

    if let (Ok(provider), Ok(model)) = (
        env::var(format!("{}_FALLBACK_PROVIDER", prefix)),
        env::var(format!("{}_FALLBACK_MODEL", prefix)),
    ) {
        selection = selection.with_fallback(&provider, &model);
    }

    selection
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::ConfigError(format!("{} has an invalid value '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}
