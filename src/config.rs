//! Configuration structures for federation
//!
//! This module provides the static federation configuration: which providers
//! (chains) exist, which sources are built from them, per-target federation
//! options and the worker pool. Every structure follows the same pattern of
//! defaults, consuming builder setters and a `validate()` step; configuration
//! errors are fatal and reported when the searcher is constructed, never per
//! query.

use crate::error::FederationError;
use crate::identifiers::ChainId;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of queued or running target invocations per pool
const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Default worker thread name
const DEFAULT_THREAD_NAME: &str = "federation-worker";

/// Per-target federation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationOptions {
    /// Whether the target is queried when a query does not name targets
    pub use_by_default: bool,
    /// Target timeout in milliseconds; `None` inherits the query timeout
    pub timeout_ms: Option<u64>,
    /// Optional targets that time out are dropped without an error
    pub optional: bool,
}

impl Default for FederationOptions {
    fn default() -> Self {
        Self {
            use_by_default: true,
            timeout_ms: None,
            optional: false,
        }
    }
}

impl FederationOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the target is used by default
    pub fn use_by_default(mut self, use_by_default: bool) -> Self {
        self.use_by_default = use_by_default;
        self
    }

    /// Set the target timeout in milliseconds
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Inherit the query timeout
    pub fn inherit_timeout(mut self) -> Self {
        self.timeout_ms = None;
        self
    }

    /// Set whether the target is optional
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Target timeout as a duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Validate the options of the named target
    pub fn validate(&self, target: &str) -> Result<(), FederationError> {
        if self.timeout_ms == Some(0) {
            return Err(FederationError::config_error(
                format!("{}.timeout_ms", target),
                "must be greater than 0",
                "Remove timeout_ms to inherit the query timeout, or set a positive number of milliseconds",
            ));
        }
        Ok(())
    }
}

/// A provider: one chain that can be federated to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider id
    pub id: String,
    /// Chain executing this provider
    pub chain: ChainId,
    /// Federation options used when the provider is targeted directly
    #[serde(default)]
    pub options: FederationOptions,
}

impl ProviderConfig {
    /// Create a provider executed by `chain`
    pub fn new(id: impl Into<String>, chain: impl Into<ChainId>) -> Self {
        Self {
            id: id.into(),
            chain: chain.into(),
            options: FederationOptions::default(),
        }
    }

    /// Set the federation options
    pub fn options(mut self, options: FederationOptions) -> Self {
        self.options = options;
        self
    }
}

/// A source: a named federation target implemented by one of its providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source id
    pub id: String,
    /// Ids of the providers implementing this source; the first is the default
    pub providers: Vec<String>,
    /// Federation options of the source
    #[serde(default)]
    pub options: FederationOptions,
}

impl SourceConfig {
    /// Create a source implemented by the given providers
    pub fn new(id: impl Into<String>, providers: &[&str]) -> Self {
        Self {
            id: id.into(),
            providers: providers.iter().map(|p| p.to_string()).collect(),
            options: FederationOptions::default(),
        }
    }

    /// Set the federation options
    pub fn options(mut self, options: FederationOptions) -> Self {
        self.options = options;
        self
    }

    /// Id of the default provider
    pub fn default_provider(&self) -> Option<&str> {
        self.providers.first().map(String::as_str)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of pre-started worker threads
    pub worker_threads: usize,
    /// Maximum number of target invocations executing at once
    pub max_in_flight: usize,
    /// Name of the worker threads
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let worker_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            worker_threads,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a pool configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the maximum number of concurrently executing invocations
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Set the worker thread name
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate the pool configuration
    pub fn validate(&self) -> Result<(), FederationError> {
        if self.worker_threads == 0 {
            return Err(FederationError::config_error(
                "worker_pool.worker_threads",
                "must be greater than 0",
                "Set worker_threads to at least 1 (recommended: number of CPU cores)",
            ));
        }

        if self.max_in_flight == 0 {
            return Err(FederationError::config_error(
                "worker_pool.max_in_flight",
                "must be greater than 0",
                "Set max_in_flight high enough for the expected fan-out (recommended: 256)",
            ));
        }

        if self.thread_name.is_empty() {
            return Err(FederationError::config_error(
                "worker_pool.thread_name",
                "cannot be empty",
                "Set thread_name to identify pool threads in stack dumps",
            ));
        }

        Ok(())
    }
}

/// Configuration of a federation searcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Configured sources, in federation order
    pub sources: Vec<SourceConfig>,
    /// Configured providers
    pub providers: Vec<ProviderConfig>,
    /// Worker pool used for target invocations
    pub worker_pool: WorkerPoolConfig,
    /// Execute a lone target directly instead of on the pool
    pub single_target_inline: bool,
    /// Abort timed-out invocations at their next await point
    pub abort_timed_out: bool,
    /// Run targets with `offset = 0, hits = offset + hits`
    pub redistribute_window: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            providers: Vec::new(),
            worker_pool: WorkerPoolConfig::default(),
            single_target_inline: true,
            abort_timed_out: false,
            redistribute_window: true,
        }
    }
}

impl FederationConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source
    pub fn source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a provider
    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    /// Set the worker pool configuration
    pub fn worker_pool(mut self, worker_pool: WorkerPoolConfig) -> Self {
        self.worker_pool = worker_pool;
        self
    }

    /// Set whether a lone target executes inline
    pub fn single_target_inline(mut self, inline: bool) -> Self {
        self.single_target_inline = inline;
        self
    }

    /// Set whether timed-out invocations are aborted
    pub fn abort_timed_out(mut self, abort: bool) -> Self {
        self.abort_timed_out = abort;
        self
    }

    /// Set whether the hit window is redistributed to targets
    pub fn redistribute_window(mut self, redistribute: bool) -> Self {
        self.redistribute_window = redistribute;
        self
    }

    /// Find a provider by id
    pub fn find_provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Find a source by id
    pub fn find_source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Whether a provider implements at least one source
    pub fn is_source_provider(&self, provider_id: &str) -> bool {
        self.sources
            .iter()
            .any(|s| s.providers.iter().any(|p| p == provider_id))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), FederationError> {
        self.worker_pool.validate()?;

        let mut ids = FxHashSet::default();
        for provider in &self.providers {
            if provider.id.is_empty() {
                return Err(FederationError::config_error(
                    "providers[].id",
                    "cannot be empty",
                    "Give every provider a non-empty id",
                ));
            }
            if !ids.insert(provider.id.as_str()) {
                return Err(FederationError::config_error(
                    format!("provider '{}'", provider.id),
                    "is defined more than once",
                    "Provider and source ids must be unique",
                ));
            }
            provider.options.validate(&format!("provider '{}'", provider.id))?;
        }

        for source in &self.sources {
            if source.id.is_empty() {
                return Err(FederationError::config_error(
                    "sources[].id",
                    "cannot be empty",
                    "Give every source a non-empty id",
                ));
            }
            if !ids.insert(source.id.as_str()) {
                return Err(FederationError::config_error(
                    format!("source '{}'", source.id),
                    "is defined more than once or clashes with a provider id",
                    "Provider and source ids must be unique",
                ));
            }
            if source.providers.is_empty() {
                return Err(FederationError::config_error(
                    format!("source '{}'.providers", source.id),
                    "cannot be empty",
                    "List at least one provider implementing the source",
                ));
            }
            for provider in &source.providers {
                if self.find_provider(provider).is_none() {
                    return Err(FederationError::config_error(
                        format!("source '{}'.providers", source.id),
                        format!("references unknown provider '{}'", provider),
                        "Define the provider in the providers list",
                    ));
                }
            }
            source.options.validate(&format!("source '{}'", source.id))?;
        }

        Ok(())
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<Self, FederationError> {
        self.validate()?;
        Ok(self)
    }
}
