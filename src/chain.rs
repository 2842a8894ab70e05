//! Executable search chains
//!
//! A chain is the unit of work a federation target points at: given its own
//! copy of the query it produces a [`SearchResult`], and it can later fill
//! summary fields of hits it produced. Chains are registered once in a
//! [`ChainRegistry`] under a stable [`ChainId`] and resolved when targets are
//! selected, never per call.

use crate::error::FederationError;
use crate::identifiers::ChainId;
use crate::query::Query;
use crate::structures::SearchResult;
use crate::Result;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// A search chain that can be federated to
///
/// Implementations run on the federation worker pool. A chain that misses its
/// deadline is not interrupted; it keeps running until it returns, and its
/// result is discarded. Chains doing blocking work should move it off the
/// async workers (for example with `tokio::task::spawn_blocking`).
#[async_trait]
pub trait Chain: Send + Sync {
    /// Stable id of this chain
    fn id(&self) -> &ChainId;

    /// Execute the chain against the query
    ///
    /// Cooperative failures should be reported as errors inside the returned
    /// result; `Err` is treated as a failed execution of the whole chain.
    async fn execute(&self, query: Query) -> Result<SearchResult>;

    /// Fill summary fields of the hits in `result`
    ///
    /// The default implementation has no summaries to fetch and only marks
    /// hits as filled.
    async fn fill(&self, result: &mut SearchResult, summary_class: &str) -> Result<()> {
        result.hits_mut().for_each_hit_mut(&mut |hit| hit.set_filled(summary_class));
        Ok(())
    }
}

/// Registry of chains keyed by id
#[derive(Clone, Default)]
pub struct ChainRegistry {
    chains: FxHashMap<ChainId, Arc<dyn Chain>>,
}

impl ChainRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain under its own id
    pub fn register(&mut self, chain: Arc<dyn Chain>) -> Result<()> {
        let id = chain.id().clone();
        if self.chains.contains_key(&id) {
            return Err(FederationError::config_error(
                format!("chain '{}'", id),
                "is already registered",
                "Give every chain a unique id",
            ));
        }
        self.chains.insert(id, chain);
        Ok(())
    }

    /// Register a chain, returning the registry for chaining
    pub fn with_chain(mut self, chain: Arc<dyn Chain>) -> Result<Self> {
        self.register(chain)?;
        Ok(self)
    }

    /// Look up a chain
    pub fn get(&self, id: &ChainId) -> Option<Arc<dyn Chain>> {
        self.chains.get(id).cloned()
    }

    /// Look up a chain, failing if it is not registered
    pub fn resolve(&self, id: &ChainId) -> Result<Arc<dyn Chain>> {
        self.get(id)
            .ok_or_else(|| FederationError::UnknownChain(id.to_string()))
    }

    /// Whether a chain is registered
    pub fn contains(&self, id: &ChainId) -> bool {
        self.chains.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self.chains.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered chains
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Whether no chains are registered
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainRegistry").field("chains", &self.ids()).finish()
    }
}
