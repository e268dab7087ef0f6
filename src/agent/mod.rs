//! Pipeline orchestrator - drives one question through the stages
//!
//! PRE-FLIGHT → ROUTE → SPECIALIZE → VALIDATE → EXECUTE → SUMMARIZE → DONE
//!
//! Strictly forward. Every suspension point races the cancellation token,
//! and each stage emits one status event before it begins.

use crate::agents::summarizer::SkipReason;
use crate::agents::{InferenceCall, Route, RouterAgent, SpecialistAgent, SummarizerAgent};
use crate::analysis::AnalysisOptions;
use crate::config::{PipelineConfig, StageSelection};
use crate::error::PipelineError;
use crate::execution::{DatasetHandle, HybridExecutor};
use crate::models::{
    ChosenProvider, ErrorReport, ExecutionSource, PipelineAnswer, PipelineEvent, PipelineRun,
    QueryContext, RunStatus, Stage, StageEvent,
};
use crate::provider::{ProviderRegistry, ResolvedProvider};
use crate::validation::Validator;
use crate::Result;
use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 16;

/// Answer given when the router finds no suitable tool.
pub const NO_TOOL_ANSWER: &str =
    "I can't answer that with the available analysis tools. Try asking about totals, trends, distributions, comparisons or top expenses.";

/// One question to answer.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub question: String,
    pub dataset: DatasetHandle,
    pub config: PipelineConfig,
    pub current_date: NaiveDate,
}

impl PipelineRequest {
    pub fn new(question: &str, dataset: DatasetHandle, config: PipelineConfig) -> Self {
        Self {
            question: question.to_string(),
            dataset,
            config,
            current_date: Utc::now().date_naive(),
        }
    }

    pub fn with_current_date(mut self, current_date: NaiveDate) -> Self {
        self.current_date = current_date;
        self
    }
}

/// Providers chosen by the pre-flight check.
struct Resolved {
    router: ResolvedProvider,
    specialist: ResolvedProvider,
    summarizer: Option<ResolvedProvider>,
}

/// Event sink for one run. Nothing is sent once the run is cancelled.
struct EventSink<'a> {
    run: PipelineRun,
    events: Option<&'a mpsc::Sender<PipelineEvent>>,
    cancel: &'a CancellationToken,
}

impl<'a> EventSink<'a> {
    async fn status(
        &mut self,
        stage: Stage,
        message: &str,
        provider: Option<&ResolvedProvider>,
        tool: Option<&str>,
    ) -> Result<()> {
        let event = StageEvent {
            stage,
            message: message.to_string(),
            model: provider.map(|p| p.choice.model.clone()),
            provider: provider.map(|p| p.choice.provider.clone()),
            tool: tool.map(str::to_string),
            timestamp: Utc::now(),
        };

        if let Some(provider) = provider {
            self.run.chosen_providers.insert(
                stage,
                ChosenProvider {
                    provider: provider.choice.provider.clone(),
                    model: provider.choice.model.clone(),
                },
            );
        }

        let event = self.run.push_event(event).clone();
        debug!(run_id = %self.run.id, stage = %stage, "{}", message);
        self.send(PipelineEvent::Status(event)).await
    }

    async fn send(&self, event: PipelineEvent) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if let Some(events) = self.events {
            // A dropped receiver means nobody is listening any more.
            if events.send(event).await.is_err() {
                self.cancel.cancel();
                return Err(PipelineError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Main orchestrator; cheap to share between concurrent runs.
pub struct Orchestrator {
    providers: Arc<ProviderRegistry>,
    executor: Arc<HybridExecutor>,
}

impl Orchestrator {
    pub fn new(providers: Arc<ProviderRegistry>, executor: Arc<HybridExecutor>) -> Self {
        Self {
            providers,
            executor,
        }
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn executor(&self) -> &Arc<HybridExecutor> {
        &self.executor
    }

    /// Run to completion without an event consumer.
    pub async fn answer(&self, request: PipelineRequest) -> Result<PipelineAnswer> {
        let cancel = CancellationToken::new();
        self.run(request, None, &cancel).await
    }

    /// Spawn a run; events arrive on the returned receiver, terminated by
    /// a `result` or `error` event (nothing after cancellation).
    pub fn spawn(
        self: &Arc<Self>,
        request: PipelineRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            let _ = orchestrator.run(request, Some(&tx), &cancel).await;
        });

        rx
    }

    /// Drive one run. The terminal event is sent here as well as returned.
    pub async fn run(
        &self,
        request: PipelineRequest,
        events: Option<&mpsc::Sender<PipelineEvent>>,
        cancel: &CancellationToken,
    ) -> Result<PipelineAnswer> {
        let mut sink = EventSink {
            run: PipelineRun::new(),
            events,
            cancel,
        };
        let run_id = sink.run.id;
        let start = Instant::now();

        info!(run_id = %run_id, question = %request.question, "Pipeline: starting run");

        let outcome = self.drive(&request, &mut sink).await;

        match outcome {
            Ok(answer) => {
                sink.run.status = RunStatus::Completed;
                info!(
                    run_id = %run_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Pipeline: run completed"
                );
                sink.send(PipelineEvent::Result(answer.clone())).await?;
                Ok(answer)
            }
            Err(PipelineError::Cancelled) => {
                sink.run.status = RunStatus::Cancelled;
                info!(run_id = %run_id, "Pipeline: run cancelled");
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                sink.run.status = RunStatus::Failed;
                warn!(run_id = %run_id, kind = e.kind(), error = %e, "Pipeline: run failed");
                // Best effort; the caller gets the error either way.
                let _ = sink
                    .send(PipelineEvent::Error(ErrorReport::from_error(Some(run_id), &e)))
                    .await;
                Err(e)
            }
        }
    }

    async fn drive(&self, request: &PipelineRequest, sink: &mut EventSink<'_>) -> Result<PipelineAnswer> {
        let config = &request.config;
        let cancel = sink.cancel;
        let dataset = request.dataset.dataset();
        let context =
            QueryContext::from_dataset(&request.question, dataset, request.current_date, &config.currency);

        // === PRE-FLIGHT ===
        let resolved = guarded(cancel, self.preflight(config)).await?;

        // === ROUTE ===
        sink.status(Stage::Router, "Selecting analysis tool...", Some(&resolved.router), None)
            .await?;
        let route = guarded(
            cancel,
            RouterAgent.route(&context, &self.call(config, Stage::Router, &resolved.router)),
        )
        .await?;

        let tool = match route {
            Route::Tool(tool) => tool,
            Route::NoTool => {
                info!(run_id = %sink.run.id, "Router found no suitable tool");
                return Ok(self.finish(sink, NO_TOOL_ANSWER.to_string(), None, None, Vec::new()));
            }
        };

        // === SPECIALIZE ===
        sink.status(
            Stage::Specialist,
            &format!("Extracting parameters for {}...", tool),
            Some(&resolved.specialist),
            Some(tool.name()),
        )
        .await?;
        let raw = guarded(
            cancel,
            SpecialistAgent.extract(tool, &context, &self.call(config, Stage::Specialist, &resolved.specialist)),
        )
        .await?;

        // === VALIDATE + EXECUTE ===
        sink.status(Stage::Executing, "Running analysis...", None, Some(tool.name()))
            .await?;
        let validated = Validator::new(config.matcher.clone()).validate(raw, &context)?;
        for note in validated.corrections() {
            info!(run_id = %sink.run.id, correction = %note, "Validation corrected an argument");
        }

        let options = AnalysisOptions {
            today: request.current_date,
            currency: config.currency.clone(),
        };
        let result = guarded(
            cancel,
            self.executor.execute(&validated, &request.dataset, &options),
        )
        .await?;

        let invocation = Some(validated.to_string());
        let corrections = validated.corrections().to_vec();
        let source = Some(result.source);

        // === SUMMARIZE ===
        let summarizer = match &resolved.summarizer {
            Some(primary) => Some(self.summarizer_for(config, primary, result.source).await),
            None => None,
        };

        let answer = match SummarizerAgent::skip_reason(&result, summarizer.is_some()) {
            Some(reason) => {
                if reason != SkipReason::Disabled {
                    debug!(run_id = %sink.run.id, reason = ?reason, "Skipping summarizer");
                }
                SummarizerAgent::skipped_answer(&result, reason)
            }
            None => {
                let provider = match &summarizer {
                    Some(provider) => provider,
                    None => return Err(PipelineError::ConfigError("summarizer not configured".to_string())),
                };
                sink.status(Stage::Summarizing, "Summarizing results...", Some(provider), Some(tool.name()))
                    .await?;
                guarded(
                    cancel,
                    SummarizerAgent.summarize(
                        &request.question,
                        &result.value,
                        &config.currency,
                        &self.call(config, Stage::Summarizing, provider),
                    ),
                )
                .await?
            }
        };

        let mut answer = self.finish(sink, answer, invocation, source, corrections);
        answer.chart = result.chart_spec;
        Ok(answer)
    }

    /// Resolve every configured stage before any inference runs.
    async fn preflight(&self, config: &PipelineConfig) -> Result<Resolved> {
        let router = self.providers.resolve(Stage::Router, &config.router).await?;
        let specialist = self.providers.resolve(Stage::Specialist, &config.specialist).await?;
        let summarizer = match &config.summarizer {
            Some(selection) => Some(self.providers.resolve(Stage::Summarizing, selection).await?),
            None => None,
        };

        Ok(Resolved {
            router,
            specialist,
            summarizer,
        })
    }

    /// Embedded execution means the compute host is unreachable; prefer the
    /// stage's offline fallback provider then.
    async fn summarizer_for(
        &self,
        config: &PipelineConfig,
        primary: &ResolvedProvider,
        source: ExecutionSource,
    ) -> ResolvedProvider {
        let fallback = config.summarizer.as_ref().and_then(|s| s.fallback.as_ref());
        match (source, fallback) {
            (ExecutionSource::Embedded, Some(fallback)) if fallback != &primary.choice => {
                let selection = StageSelection::new(&fallback.provider, &fallback.model);
                match self.providers.resolve(Stage::Summarizing, &selection).await {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        warn!(error = %e, "Offline summarizer unavailable, keeping primary");
                        primary.clone()
                    }
                }
            }
            _ => primary.clone(),
        }
    }

    fn call<'a>(&self, config: &'a PipelineConfig, stage: Stage, provider: &'a ResolvedProvider) -> InferenceCall<'a> {
        InferenceCall {
            provider,
            sampling: config.sampling_for(stage),
            timeout: config.inference_timeout(),
        }
    }

    fn finish(
        &self,
        sink: &EventSink<'_>,
        answer: String,
        invocation: Option<String>,
        source: Option<ExecutionSource>,
        corrections: Vec<String>,
    ) -> PipelineAnswer {
        let run: &PipelineRun = &sink.run;
        PipelineAnswer {
            run_id: run.id,
            answer,
            chart: None,
            invocation,
            source,
            stage_timings: run.stage_timings(Utc::now()),
            corrections,
            chosen_providers: run.chosen_providers.clone(),
        }
    }
}

/// Race a stage future against cancellation.
async fn guarded<T>(cancel: &CancellationToken, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = work => result,
    }
}
