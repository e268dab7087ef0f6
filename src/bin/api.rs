use expense_query_pipeline::{
    agent::Orchestrator,
    api::{start_server, ApiState},
    config::EngineConfig,
    execution::HybridExecutor,
    provider::ProviderRegistry,
    state::InMemoryDatasetStore,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env()?;

    info!("🚀 Expense Query Pipeline - API Server");
    info!("📍 Port: {}", config.port);

    let registry = ProviderRegistry::from_config(&config)?;
    info!(providers = ?registry.ids(), "Inference providers registered");

    let executor = HybridExecutor::new(&config.compute)?;
    match &config.compute.base_url {
        Some(url) => info!("🧮 Remote compute service: {}", url),
        None => info!("🧮 No remote compute service, executing embedded"),
    }

    let orchestrator = Arc::new(Orchestrator::new(Arc::new(registry), Arc::new(executor)));
    let state = ApiState::new(
        orchestrator,
        config.pipeline.clone(),
        Arc::new(InMemoryDatasetStore::new()),
    );

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    start_server(state, config.port).await?;

    Ok(())
}
