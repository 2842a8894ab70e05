//! Test utilities for federation testing
//!
//! Provides an RAII temporary directory for persistence tests and
//! [`MockChain`], a configurable chain used throughout the unit tests. A mock
//! chain can be slow, fail, return error results, panic, mutate the query it
//! receives, and records every query it sees so tests can assert on what a
//! target actually got.

use crate::chain::Chain;
use crate::error::{ErrorMessage, FederationError};
use crate::identifiers::ChainId;
use crate::properties::Properties;
use crate::query::Query;
use crate::structures::{Hit, SearchResult};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// RAII-based test environment for isolated testing
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub test_name: String,
}

impl TestEnvironment {
    /// Create a new test environment with the given test name
    ///
    /// # Panics
    /// Panics if unable to create temporary directory
    pub fn new(test_name: &str) -> Self {
        let temp_dir = TempDir::new()
            .unwrap_or_else(|e| panic!("Failed to create temp dir for test {}: {}", test_name, e));

        Self {
            temp_dir,
            test_name: test_name.to_string(),
        }
    }

    /// Get the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get a PathBuf to the temporary directory
    pub fn path_buf(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Get the test name
    pub fn name(&self) -> &str {
        &self.test_name
    }
}

/// What a [`MockChain`] does when executed
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return the configured hits
    Succeed,
    /// Return `Err` from `execute`
    Fail(String),
    /// Return a result carrying only this error
    ErrorResult(ErrorMessage),
    /// Panic inside `execute`
    Panic(String),
}

/// Snapshot of a query as a mock chain received it
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub text: String,
    pub properties: Properties,
    pub offset: usize,
    pub hits: usize,
    pub time_left: Duration,
}

/// Configurable chain for unit tests
#[derive(Clone)]
pub struct MockChain {
    id: ChainId,
    hits: Vec<Hit>,
    total_hit_count: u64,
    latency: Duration,
    behavior: MockBehavior,
    fill_latency: Duration,
    fill_error: Option<String>,
    rewrite_to: Option<String>,
    received: Arc<Mutex<Vec<RecordedQuery>>>,
    completed: Arc<AtomicUsize>,
    fills: Arc<AtomicUsize>,
}

impl MockChain {
    /// A chain returning no hits immediately
    pub fn new(id: &str) -> Self {
        Self {
            id: ChainId::new(id),
            hits: Vec::new(),
            total_hit_count: 0,
            latency: Duration::ZERO,
            behavior: MockBehavior::Succeed,
            fill_latency: Duration::ZERO,
            fill_error: None,
            rewrite_to: None,
            received: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(AtomicUsize::new(0)),
            fills: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Return `count` hits named `<id>-<n>` with falling relevance
    pub fn with_hit_count(mut self, count: usize) -> Self {
        self.hits = (0..count)
            .map(|n| Hit::new(format!("{}-{}", self.id, n), 1.0 - n as f64 / (count as f64 + 1.0)))
            .collect();
        self.total_hit_count = count as u64;
        self
    }

    /// Return the given hits
    pub fn with_hits(mut self, hits: Vec<Hit>) -> Self {
        self.total_hit_count = hits.len() as u64;
        self.hits = hits;
        self
    }

    /// Report a total hit count different from the number of hits
    pub fn with_total_hit_count(mut self, total: u64) -> Self {
        self.total_hit_count = total;
        self
    }

    /// Sleep this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the execution behavior
    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Sleep this long before filling
    pub fn with_fill_latency(mut self, latency: Duration) -> Self {
        self.fill_latency = latency;
        self
    }

    /// Fail every fill with this reason
    pub fn with_fill_error(mut self, reason: &str) -> Self {
        self.fill_error = Some(reason.to_string());
        self
    }

    /// Rewrite the received query tree and properties before answering
    pub fn rewriting_query(mut self, new_root: &str) -> Self {
        self.rewrite_to = Some(new_root.to_string());
        self
    }

    /// Queries received so far
    pub fn received(&self) -> Vec<RecordedQuery> {
        self.received.lock().clone()
    }

    /// Executions that ran to completion (including detached ones)
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Fill calls that ran to completion
    pub fn fills(&self) -> usize {
        self.fills.load(Ordering::SeqCst)
    }

    /// Share as a chain trait object
    pub fn into_arc(self) -> Arc<dyn Chain> {
        Arc::new(self)
    }
}

#[async_trait]
impl Chain for MockChain {
    fn id(&self) -> &ChainId {
        &self.id
    }

    async fn execute(&self, mut query: Query) -> Result<SearchResult> {
        self.received.lock().push(RecordedQuery {
            text: query.tree().root().to_string(),
            properties: query.properties().clone(),
            offset: query.offset(),
            hits: query.hits(),
            time_left: query.time_left(),
        });
        query.trace().trace(format!("{} executing", self.id), 1);

        if let Some(root) = &self.rewrite_to {
            query.tree_mut().set_root(root.clone());
            query.properties_mut().set("rewritten.by", self.id.as_str());
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Succeed => {
                let mut result = SearchResult::new(query);
                for hit in &self.hits {
                    result.add_hit(hit.clone());
                }
                result.set_total_hit_count(self.total_hit_count);
                result.set_deep_hit_count(self.total_hit_count);
                Ok(result)
            }
            MockBehavior::Fail(reason) => Err(FederationError::chain_error(self.id.as_str(), reason.clone())),
            MockBehavior::ErrorResult(error) => Ok(SearchResult::with_error(query, error.clone())),
            MockBehavior::Panic(message) => panic!("{}", message),
        }
    }

    async fn fill(&self, result: &mut SearchResult, summary_class: &str) -> Result<()> {
        if !self.fill_latency.is_zero() {
            tokio::time::sleep(self.fill_latency).await;
        }
        if let Some(reason) = &self.fill_error {
            return Err(FederationError::fill_error(self.id.as_str(), reason.clone()));
        }
        result.hits_mut().for_each_hit_mut(&mut |hit| {
            hit.set_field("summary", format!("summary of {}", hit.id));
            hit.set_filled(summary_class);
        });
        self.fills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creation() {
        let test_env = TestEnvironment::new("test_environment_creation");

        assert_eq!(test_env.name(), "test_environment_creation");
        assert!(test_env.path().exists());
        assert_eq!(test_env.path(), test_env.path_buf().as_path());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_chain_records_queries() {
        let chain = MockChain::new("news").with_hit_count(3);
        let query = Query::builder().text("q").property("a", "1").hits(5).build();

        let result = chain.execute(query).await.unwrap();

        assert_eq!(result.concrete_hit_count(), 3);
        assert_eq!(result.total_hit_count(), 3);
        let received = chain.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].hits, 5);
        assert_eq!(received[0].properties.get("a"), Some("1"));
        assert_eq!(chain.completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_chain_fill() {
        let chain = MockChain::new("news").with_hit_count(2);
        let mut result = chain.execute(Query::new("q")).await.unwrap();

        chain.fill(&mut result, "default").await.unwrap();

        assert!(result.hits().hits().all(|h| h.is_filled("default")));
        assert_eq!(chain.fills(), 1);

        let failing = MockChain::new("web").with_fill_error("down");
        assert!(failing.fill(&mut result, "default").await.is_err());
    }
}
