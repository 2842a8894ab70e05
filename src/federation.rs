//! Federation searcher
//!
//! [`FederationSearcher::federate`] runs one query against every target the
//! selector picks and returns a single merged [`SearchResult`]:
//!
//! ```text
//! STARTED -> AGGREGATING -> MERGED -> (FILLING ->) DONE
//! ```
//!
//! Each target contributes one child group of the result root, in the order
//! targets were selected. Successful targets contribute their hits tagged
//! with the target id; failed and timed-out mandatory targets contribute a
//! group holding only an error; optional targets that did not produce a
//! result contribute nothing. Per-target problems never fail the call.

use crate::chain::ChainRegistry;
use crate::config::FederationConfig;
use crate::config_persistence::ConfigurationManager;
use crate::error::{ErrorCode, ErrorMessage, FederationError};
use crate::federation_result::{FederationResult, TargetOutcome};
use crate::fill::{FillCoordinator, FillTarget};
use crate::invoker::{ExecutionMode, Invoker};
use crate::monitoring::{FederationMetrics, TargetEvent};
use crate::query::Query;
use crate::source_selector::SourceSelector;
use crate::structures::{source_group_id, HitGroup, SearchResult};
use crate::target::{Target, TargetSelector};
use crate::worker_pool::WorkerPool;
use crate::Result;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Source attributed to errors that do not belong to a single target
pub const FEDERATION_SOURCE: &str = "federation";

/// Phase of one federation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederationState {
    Started,
    Aggregating,
    Merged,
    Filling,
    Done,
}

impl fmt::Display for FederationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "STARTED",
            Self::Aggregating => "AGGREGATING",
            Self::Merged => "MERGED",
            Self::Filling => "FILLING",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Fans queries out to targets and merges what comes back
pub struct FederationSearcher<S: TargetSelector> {
    selector: S,
    invoker: Invoker,
    filler: FillCoordinator,
    single_target_inline: bool,
    metrics: FederationMetrics,
}

impl FederationSearcher<SourceSelector> {
    /// Build a searcher over the configured sources and providers
    ///
    /// Starts a dedicated worker pool as configured.
    pub fn from_config(config: FederationConfig, registry: &ChainRegistry) -> Result<Self> {
        let pool = WorkerPool::new(&config.worker_pool)?;
        let selector = SourceSelector::new(config.clone(), registry)?;
        Ok(Self::with_pool(selector, &config, pool))
    }

    /// Build a searcher from the configuration saved in `directory`
    pub fn open<P: AsRef<Path>>(directory: P, registry: &ChainRegistry) -> Result<Self> {
        let manager = ConfigurationManager::new(directory);
        let config = manager.load_config()?;
        info!(path = %manager.config_path().display(), "Loaded federation configuration");
        Self::from_config(config, registry)
    }
}

impl<S: TargetSelector> FederationSearcher<S> {
    /// Build a searcher with a custom selector and a dedicated worker pool
    ///
    /// Only the execution options and worker pool settings of `config` are
    /// used; sources and providers are the selector's business.
    pub fn new(selector: S, config: &FederationConfig) -> Result<Self> {
        let pool = WorkerPool::new(&config.worker_pool)?;
        Ok(Self::with_pool(selector, config, pool))
    }

    /// Build a searcher submitting to an existing pool
    pub fn with_pool(selector: S, config: &FederationConfig, pool: WorkerPool) -> Self {
        let pool = Arc::new(pool);
        let metrics = FederationMetrics::new();
        Self {
            selector,
            invoker: Invoker::new(Arc::clone(&pool))
                .redistribute_window(config.redistribute_window)
                .abort_timed_out(config.abort_timed_out),
            filler: FillCoordinator::new(pool, metrics.clone()).abort_timed_out(config.abort_timed_out),
            single_target_inline: config.single_target_inline,
            metrics,
        }
    }

    /// The target selector
    pub fn selector(&self) -> &S {
        &self.selector
    }

    /// Shared metrics
    pub fn metrics(&self) -> &FederationMetrics {
        &self.metrics
    }

    /// The worker pool targets run on
    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.invoker.pool()
    }

    /// Run `query` against all selected targets and merge the results
    pub async fn federate(&self, query: Query) -> SearchResult {
        let started = Instant::now();
        let mut state = FederationState::Started;
        query.trace().trace(format!("Federation {}", state), 4);

        let mut selection = self.selector.select_targets(&query);
        for duplicate in selection.remove_duplicates() {
            warn!(target_id = %duplicate, "Selector returned duplicate target, keeping the first");
            query
                .trace()
                .trace(format!("Ignoring duplicate federation target '{}'", duplicate), 1);
        }
        self.metrics
            .record_query_start(selection.targets.len(), selection.errors.len());

        let mut result = SearchResult::new(query);
        for error in &selection.errors {
            result.add_error(error.to_error_message(FEDERATION_SOURCE));
        }

        if selection.targets.is_empty() {
            if selection.errors.is_empty() {
                result.query().trace().trace("No federation targets selected", 1);
            }
            self.enter(result.query(), &mut state, FederationState::Done);
            self.metrics.record_latency(started.elapsed());
            return result;
        }

        let mode = if selection.targets.len() == 1 && self.single_target_inline {
            ExecutionMode::Inline
        } else {
            ExecutionMode::Pooled
        };
        let invocations: Vec<_> = selection
            .targets
            .into_iter()
            .map(|target| self.invoker.invoke(&self.selector, target, result.query(), mode))
            .collect();

        self.enter(result.query(), &mut state, FederationState::Aggregating);
        let outcomes = FederationResult::aggregate(invocations).await;

        let fill_targets = self.merge(&mut result, outcomes);
        self.enter(result.query(), &mut state, FederationState::Merged);

        if let Some(summary_class) = result.query().summary().map(str::to_string) {
            self.enter(result.query(), &mut state, FederationState::Filling);
            let report = self.filler.fill(&mut result, &summary_class, &fill_targets).await;
            if report.hits_removed() > 0 {
                debug!(hits_removed = report.hits_removed(), "Fill phase removed unfilled hits");
            }
        }

        self.enter(result.query(), &mut state, FederationState::Done);
        let elapsed = started.elapsed();
        self.metrics.record_latency(elapsed);
        info!(
            query_id = %result.query().id(),
            elapsed_ms = elapsed.as_millis() as u64,
            hits = result.concrete_hit_count(),
            errors = result.errors().len(),
            "Federation completed"
        );
        result
    }

    fn enter(&self, query: &Query, state: &mut FederationState, next: FederationState) {
        debug!(query_id = %query.id(), from = %state, to = %next, "Federation state change");
        *state = next;
        query.trace().trace(format!("Federation {}", next), 4);
    }

    /// Append one group per target to the result root, returning the
    /// targets whose hits can be filled
    fn merge(&self, result: &mut SearchResult, outcomes: FederationResult<S::Data>) -> Vec<FillTarget> {
        let mut total_hits = 0u64;
        let mut deep_hits = 0u64;
        let mut fill_targets = Vec::new();

        for target_result in outcomes {
            let elapsed = target_result.elapsed().unwrap_or_default();
            let (target, outcome) = target_result.into_parts();
            let id = target.id().as_str();

            match outcome {
                TargetOutcome::Succeeded(target_search) => {
                    self.metrics.record_target(TargetEvent::Succeeded);
                    total_hits += target_search.total_hit_count();
                    deep_hits += target_search.deep_hit_count();

                    let (_, group) = target_search.into_parts();
                    result.hits_mut().add_group(target_group(&target, group));
                    fill_targets.push(FillTarget {
                        id: target.id().clone(),
                        chain: Arc::clone(target.chain()),
                    });
                    result.query().trace().trace(
                        format!("{} succeeded after {} ms", id, elapsed.as_millis()),
                        2,
                    );
                }
                TargetOutcome::TimedOut if target.is_optional() => {
                    self.metrics.record_target(TargetEvent::OptionalDropped);
                    result
                        .query()
                        .trace()
                        .trace(format!("Optional target {} timed out; dropped", id), 2);
                }
                TargetOutcome::TimedOut => {
                    self.metrics.record_target(TargetEvent::TimedOut);
                    let error = FederationError::timeout(target.chain_id().as_str(), elapsed.as_millis() as u64);
                    result
                        .query()
                        .trace()
                        .trace(format!("{} timed out after {} ms", id, elapsed.as_millis()), 1);
                    result
                        .hits_mut()
                        .add_group(HitGroup::error_only(id, error.to_error_message(id)));
                }
                TargetOutcome::Failed(error) if target.is_optional() => {
                    self.metrics.record_target(TargetEvent::OptionalDropped);
                    debug!(target_id = %id, error = %error, "Optional target failed; dropped");
                    result
                        .query()
                        .trace()
                        .trace(format!("Optional target {} failed: {}", id, error), 2);
                }
                TargetOutcome::Failed(error) => {
                    self.metrics.record_target(TargetEvent::Failed);
                    warn!(target_id = %id, error = %error, "Federation target failed");
                    result.query().trace().trace(format!("{} failed: {}", id, error), 1);
                    result
                        .hits_mut()
                        .add_group(HitGroup::error_only(id, error.to_error_message(id)));
                }
                TargetOutcome::Pending => {
                    // aggregation resolves every target
                    self.metrics.record_target(TargetEvent::Failed);
                    let error = ErrorMessage::new(ErrorCode::InternalServerError, "Target not resolved")
                        .with_source(id);
                    result.hits_mut().add_group(HitGroup::error_only(id, error));
                }
            }
        }

        result.set_total_hit_count(total_hits);
        result.set_deep_hit_count(deep_hits);
        fill_targets
    }
}

/// Turn a target's root group into its child group of the merged result
fn target_group<D>(target: &Target<D>, mut group: HitGroup) -> HitGroup {
    let id = target.id().as_str();
    group.set_id(source_group_id(id));
    group.tag_source(id);
    for error in group.errors_mut() {
        if error.source.is_none() {
            error.source = Some(id.to_string());
        }
    }
    group
}

impl<S: TargetSelector + fmt::Debug> fmt::Debug for FederationSearcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederationSearcher")
            .field("selector", &self.selector)
            .field("invoker", &self.invoker)
            .field("single_target_inline", &self.single_target_inline)
            .finish()
    }
}
