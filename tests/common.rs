//! Common test utilities for integration tests
//!
//! Integration tests cannot reach the crate's `test_utils` module, so this
//! module carries its own scripted chain and setup helpers.

use async_trait::async_trait;
use federated_search::{
    Chain, ChainId, ChainRegistry, FederationConfig, FederationError, FederationSearcher, Hit, Query, SearchResult,
    SourceSelector, WorkerPool,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Error messages for consistent test error reporting
pub mod test_error_messages {
    pub const FAILED_TO_CREATE_TEMP_DIR: &str = "Failed to create test temporary directory";
    #[allow(dead_code)]
    pub const FAILED_TO_BUILD_SEARCHER: &str = "Failed to build federation searcher";
}

/// Creates a temporary directory for test use
#[allow(dead_code)]
pub fn create_temp_dir_for_test() -> TempDir {
    TempDir::new().expect(test_error_messages::FAILED_TO_CREATE_TEMP_DIR)
}

/// A chain answering after a fixed latency with a fixed number of hits
#[derive(Clone)]
pub struct ScriptedChain {
    id: ChainId,
    hits: usize,
    latency: Duration,
    fill_latency: Duration,
    failure: Option<String>,
    seen: Arc<Mutex<Vec<Query>>>,
    finished: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedChain {
    pub fn new(id: &str) -> Self {
        Self {
            id: ChainId::new(id),
            hits: 0,
            latency: Duration::ZERO,
            fill_latency: Duration::ZERO,
            failure: None,
            seen: Arc::new(Mutex::new(Vec::new())),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hits(mut self, hits: usize) -> Self {
        self.hits = hits;
        self
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency = Duration::from_millis(ms);
        self
    }

    pub fn fill_latency_ms(mut self, ms: u64) -> Self {
        self.fill_latency = Duration::from_millis(ms);
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// Queries this chain was executed with
    pub fn seen(&self) -> Vec<Query> {
        self.seen.lock().clone()
    }

    /// Executions that ran to the end, including detached ones
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Chain for ScriptedChain {
    fn id(&self) -> &ChainId {
        &self.id
    }

    async fn execute(&self, query: Query) -> federated_search::Result<SearchResult> {
        self.seen.lock().push(query.clone());
        tokio::time::sleep(self.latency).await;
        self.finished.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = &self.failure {
            return Err(FederationError::chain_error(self.id.as_str(), reason.clone()));
        }
        let mut result = SearchResult::new(query);
        for n in 0..self.hits {
            result.add_hit(Hit::new(format!("{}-{}", self.id, n), 1.0 / (n as f64 + 1.0)));
        }
        result.set_total_hit_count(self.hits as u64);
        Ok(result)
    }

    async fn fill(&self, result: &mut SearchResult, summary_class: &str) -> federated_search::Result<()> {
        tokio::time::sleep(self.fill_latency).await;
        result.hits_mut().for_each_hit_mut(&mut |hit| {
            hit.set_field("title", format!("Title of {}", hit.id));
            hit.set_filled(summary_class);
        });
        Ok(())
    }
}

/// Register chains and build a searcher on the current runtime
pub fn build_searcher(config: FederationConfig, chains: &[&ScriptedChain]) -> FederationSearcher<SourceSelector> {
    let mut registry = ChainRegistry::new();
    for chain in chains {
        registry
            .register(Arc::new((*chain).clone()))
            .expect("chain ids must be unique");
    }
    let selector = SourceSelector::new(config.clone(), &registry).expect("valid federation config");
    let pool = WorkerPool::from_current(&config.worker_pool).expect("running inside a tokio runtime");
    FederationSearcher::with_pool(selector, &config, pool)
}
