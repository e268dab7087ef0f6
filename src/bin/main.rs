use expense_query_pipeline::{
    agent::{Orchestrator, PipelineRequest},
    config::EngineConfig,
    execution::{DatasetHandle, HybridExecutor},
    models::{Dataset, PipelineEvent, Transaction},
    provider::ProviderRegistry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: orchestrator <dataset.json> <question...>";

/// Accepts a full dataset object or a bare array of transactions.
fn load_dataset(path: &str) -> Result<Dataset, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Dataset>(&raw) {
        Ok(dataset) => Ok(dataset),
        Err(_) => Ok(Dataset::new(serde_json::from_str::<Vec<Transaction>>(&raw)?)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or(USAGE)?;
    let question = args.collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        return Err(USAGE.into());
    }

    let config = EngineConfig::from_env()?;
    let dataset = load_dataset(&path)?;
    info!(rows = dataset.transactions.len(), path = %path, "Dataset loaded");

    let registry = ProviderRegistry::from_config(&config)?;
    let executor = HybridExecutor::new(&config.compute)?;
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(registry), Arc::new(executor)));

    let request = PipelineRequest::new(&question, DatasetHandle::new(dataset)?, config.pipeline.clone());
    let mut events = orchestrator.spawn(request, CancellationToken::new());

    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Status(status) => {
                let model = status.model.as_deref().unwrap_or("-");
                println!("[{:?}] {} ({})", status.stage, status.message, model);
            }
            PipelineEvent::Result(answer) => {
                println!("\n=== ANSWER ===");
                println!("{}", answer.answer);
                if let Some(invocation) = &answer.invocation {
                    println!("\nInvocation: {}", invocation);
                }
                for note in &answer.corrections {
                    println!("Note: {}", note);
                }
                if let Some(chart) = &answer.chart {
                    println!("\nChart:\n{}", serde_json::to_string_pretty(chart)?);
                }
                return Ok(());
            }
            PipelineEvent::Error(report) => {
                eprintln!("\nPipeline failed ({}): {}", report.kind, report.message);
                if let Some(raw) = &report.raw_output {
                    eprintln!("Model output: {}", raw);
                }
                if !report.candidates.is_empty() {
                    eprintln!("Did you mean: {}", report.candidates.join(", "));
                }
                return Err(report.message.into());
            }
        }
    }

    Ok(())
}
