//! Dataset storage for the compute service role
//!
//! Datasets are addressed by fingerprint. Currently in-memory.

use crate::models::Dataset;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait::async_trait]
pub trait DatasetStore: Send + Sync {
    async fn put(&self, fingerprint: &str, dataset: Dataset) -> Result<Arc<Dataset>>;
    async fn get(&self, fingerprint: &str) -> Result<Option<Arc<Dataset>>>;
    async fn len(&self) -> usize;
}

/// In-memory dataset store
pub struct InMemoryDatasetStore {
    datasets: Arc<RwLock<HashMap<String, Arc<Dataset>>>>,
}

impl InMemoryDatasetStore {
    pub fn new() -> Self {
        Self {
            datasets: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryDatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatasetStore for InMemoryDatasetStore {
    async fn put(&self, fingerprint: &str, dataset: Dataset) -> Result<Arc<Dataset>> {
        let dataset = Arc::new(dataset);
        let mut datasets = self.datasets.write().await;
        datasets.insert(fingerprint.to_string(), dataset.clone());
        debug!(fingerprint = %fingerprint, rows = dataset.transactions.len(), "Dataset stored");
        Ok(dataset)
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<Arc<Dataset>>> {
        let datasets = self.datasets.read().await;
        Ok(datasets.get(fingerprint).cloned())
    }

    async fn len(&self) -> usize {
        self.datasets.read().await.len()
    }
}
