//! Federated search execution core
//!
//! Fans one query out to many search chains ("targets"), bounds each target
//! by its own deadline, and merges whatever comes back into a single result.
//! Slow or failing targets degrade the answer rather than fail it: mandatory
//! targets that miss their deadline contribute an error, optional ones are
//! dropped silently. When the query asks for summaries, a bounded fill phase
//! fetches them through the chains that produced the hits.
//!
//! The main entry point is [`FederationSearcher`], built either from a
//! [`FederationConfig`] of sources and providers or from a custom
//! [`TargetSelector`].

pub mod chain;
pub mod config;
pub mod config_persistence;
pub mod error;
pub mod federation;
pub mod federation_result;
pub mod fill;
pub mod identifiers;
pub mod invoker;
pub mod monitoring;
pub mod properties;
pub mod query;
pub mod source_selector;
pub mod structures;
pub mod target;
pub mod trace;
pub mod worker_pool;

#[cfg(test)]
pub mod test_utils;

pub use chain::{Chain, ChainRegistry};
pub use config::{FederationConfig, FederationOptions, ProviderConfig, SourceConfig, WorkerPoolConfig};
pub use config_persistence::{ConfigurationManager, PersistedConfig};
pub use error::{ErrorCode, ErrorMessage, FederationError};
pub use federation::{FederationSearcher, FederationState};
pub use federation_result::{FederationResult, TargetOutcome, TargetResult};
pub use fill::{FillCoordinator, FillReport, FillStatus, FillTarget};
pub use identifiers::{ChainId, QueryId, TargetId};
pub use invoker::{ExecutionMode, Invocation, Invoker};
pub use monitoring::{FederationMetrics, MetricsSnapshot};
pub use properties::Properties;
pub use query::{Query, QueryBuilder};
pub use source_selector::SourceSelector;
pub use structures::{Hit, HitGroup, HitNode, SearchResult};
pub use target::{Target, TargetSelection, TargetSelector};
pub use trace::Trace;
pub use worker_pool::{PoolStats, WorkerPool};

/// Type alias for Results using FederationError
pub type Result<T> = std::result::Result<T, FederationError>;
