//! Per-target invocation
//!
//! For every selected target the invoker:
//!
//! 1. forks the parent query into a copy owned by the target, with its own
//!    trace node,
//! 2. optionally redistributes the hit window (`offset = 0`,
//!    `hits = offset + hits`) so the merged result can be windowed globally,
//! 3. propagates `provider.<p>.*` and then `source.<s>.*` properties onto the
//!    copy with the scope stripped, mapping `hits`, `offset` and `timeout`,
//! 4. lets the selector adjust the copy,
//! 5. computes the effective deadline `min(parent deadline, now + timeout)`,
//! 6. launches the chain on the worker pool, or keeps it as an inline future
//!    when the target is the only one.
//!
//! None of this touches the parent query or sibling copies. Failures while
//! preparing a target become a failed outcome for that target only.

use crate::chain::Chain;
use crate::error::FederationError;
use crate::federation_result::TargetOutcome;
use crate::properties::{names, parse_timeout};
use crate::query::Query;
use crate::structures::SearchResult;
use crate::target::{Target, TargetSelector};
use crate::worker_pool::WorkerPool;
use crate::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// How a target's chain is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Submitted to the worker pool
    Pooled,
    /// Polled directly by the aggregating task
    Inline,
}

enum Execution {
    Pooled(JoinHandle<Result<SearchResult>>),
    Inline(BoxFuture<'static, std::thread::Result<Result<SearchResult>>>),
    Rejected(FederationError),
}

/// Launches target executions
#[derive(Debug, Clone)]
pub struct Invoker {
    pool: Arc<WorkerPool>,
    redistribute_window: bool,
    abort_timed_out: bool,
}

impl Invoker {
    /// Create an invoker submitting to `pool`
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            redistribute_window: true,
            abort_timed_out: false,
        }
    }

    /// Set whether targets run with `offset = 0, hits = offset + hits`
    pub fn redistribute_window(mut self, redistribute: bool) -> Self {
        self.redistribute_window = redistribute;
        self
    }

    /// Set whether timed-out executions are aborted instead of detached
    pub fn abort_timed_out(mut self, abort: bool) -> Self {
        self.abort_timed_out = abort;
        self
    }

    /// The worker pool executions are submitted to
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Whether timed-out executions are aborted
    pub fn aborts_timed_out(&self) -> bool {
        self.abort_timed_out
    }

    /// Build the query a target executes with, returning it and the
    /// effective deadline
    pub fn prepare_query<S: TargetSelector>(
        &self,
        selector: &S,
        target: &Target<S::Data>,
        parent: &Query,
    ) -> Result<(Query, Instant)> {
        let now = Instant::now();
        let mut query = parent.fork(target.id().as_str());

        if self.redistribute_window {
            query.set_hits(parent.offset().saturating_add(parent.hits()));
            query.set_offset(0);
        }

        let timeout_override = propagate_scoped_properties(target, &mut query)?;
        selector.modify_target_query(target, &mut query);

        let deadline = match timeout_override.or_else(|| target.timeout()) {
            Some(timeout) => parent.deadline().min(now + timeout),
            None => parent.deadline(),
        };

        query.trace().trace(
            format!(
                "Federating to {} (chain {}, hits {}, offset {}, time budget {} ms)",
                target.id(),
                target.chain_id(),
                query.hits(),
                query.offset(),
                deadline.saturating_duration_since(now).as_millis()
            ),
            2,
        );

        Ok((query, deadline))
    }

    /// Start executing one target
    pub fn invoke<S: TargetSelector>(
        &self,
        selector: &S,
        target: Target<S::Data>,
        parent: &Query,
        mode: ExecutionMode,
    ) -> Invocation<S::Data> {
        let launched_at = Instant::now();

        let (execution, deadline) = match self.prepare_query(selector, &target, parent) {
            Ok((query, deadline)) => {
                let chain = Arc::clone(target.chain());
                let execution = match mode {
                    ExecutionMode::Pooled => Execution::Pooled(self.pool.spawn(execute(chain, query))),
                    ExecutionMode::Inline => {
                        Execution::Inline(AssertUnwindSafe(execute(chain, query)).catch_unwind().boxed())
                    }
                };
                (execution, deadline)
            }
            Err(e) => {
                warn!(target_id = %target.id(), error = %e, "Could not prepare federation target");
                (Execution::Rejected(e), launched_at)
            }
        };

        debug!(target_id = %target.id(), ?mode, "Launched federation target");

        let chain_id = target.chain_id().to_string();
        Invocation {
            target,
            pending: PendingExecution {
                chain_id,
                execution,
                deadline,
                launched_at,
                abort_timed_out: self.abort_timed_out,
            },
        }
    }
}

async fn execute(chain: Arc<dyn Chain>, query: Query) -> Result<SearchResult> {
    chain.execute(query).await
}

/// Copy scoped properties onto a target query, returning a timeout override
fn propagate_scoped_properties<D>(target: &Target<D>, query: &mut Query) -> Result<Option<Duration>> {
    let mut scoped: Vec<(String, String, String)> = Vec::new();
    for scope in target.property_scopes() {
        for (name, value) in query.properties().scoped(&scope) {
            scoped.push((format!("{}.{}", scope, name), name.to_string(), value.to_string()));
        }
    }

    let mut timeout = None;
    for (full_name, name, value) in scoped {
        match name.as_str() {
            names::PROVIDER => continue,
            names::HITS => {
                if let Some(hits) = query.properties().get_usize(&full_name)? {
                    query.set_hits(hits);
                }
            }
            names::OFFSET => {
                if let Some(offset) = query.properties().get_usize(&full_name)? {
                    query.set_offset(offset);
                }
            }
            names::TIMEOUT => {
                let parsed = parse_timeout(&value)
                    .map_err(|reason| FederationError::invalid_property(full_name.as_str(), value.as_str(), reason))?;
                timeout = Some(parsed);
            }
            _ => {}
        }
        query.properties_mut().set(name, value);
    }

    Ok(timeout)
}

/// A launched target together with its pending execution
pub struct Invocation<D> {
    target: Target<D>,
    pending: PendingExecution,
}

impl<D> Invocation<D> {
    /// The target being executed
    pub fn target(&self) -> &Target<D> {
        &self.target
    }

    /// Effective deadline of this target
    pub fn deadline(&self) -> Instant {
        self.pending.deadline
    }

    /// Separate the target from its execution
    pub fn into_parts(self) -> (Target<D>, PendingExecution) {
        (self.target, self.pending)
    }
}

/// An execution that can be awaited once, up to its own deadline
pub struct PendingExecution {
    chain_id: String,
    execution: Execution,
    deadline: Instant,
    launched_at: Instant,
    abort_timed_out: bool,
}

impl PendingExecution {
    /// Effective deadline
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait until the execution finishes or its deadline passes
    ///
    /// A result that is already available is taken even when the deadline
    /// has just passed. On timeout the execution is detached (or aborted when
    /// configured) and its eventual result is discarded.
    pub async fn wait(self) -> (TargetOutcome, Duration) {
        let PendingExecution {
            chain_id,
            execution,
            deadline,
            launched_at,
            abort_timed_out,
        } = self;

        let outcome = match execution {
            Execution::Rejected(e) => TargetOutcome::Failed(e),
            Execution::Pooled(mut handle) => match timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => outcome_of(result),
                Ok(Err(join_error)) => TargetOutcome::Failed(join_error_to_federation(&chain_id, join_error)),
                Err(_) => {
                    if abort_timed_out {
                        handle.abort();
                    }
                    TargetOutcome::TimedOut
                }
            },
            Execution::Inline(mut future) => match timeout_at(deadline, &mut future).await {
                Ok(Ok(result)) => outcome_of(result),
                Ok(Err(payload)) => TargetOutcome::Failed(FederationError::Panicked {
                    chain: chain_id.clone(),
                    message: panic_message(payload.as_ref()),
                }),
                Err(_) => {
                    if !abort_timed_out {
                        tokio::spawn(future);
                    }
                    TargetOutcome::TimedOut
                }
            },
        };

        let elapsed = launched_at.elapsed();
        if matches!(outcome, TargetOutcome::TimedOut) {
            debug!(chain = %chain_id, elapsed_ms = elapsed.as_millis() as u64, "Federation target timed out");
        }
        (outcome, elapsed)
    }
}

fn outcome_of(result: Result<SearchResult>) -> TargetOutcome {
    match result {
        Ok(result) => TargetOutcome::Succeeded(result),
        Err(e) => TargetOutcome::Failed(e),
    }
}

fn join_error_to_federation(chain: &str, error: JoinError) -> FederationError {
    if error.is_panic() {
        let payload = error.into_panic();
        FederationError::Panicked {
            chain: chain.to_string(),
            message: panic_message(payload.as_ref()),
        }
    } else {
        FederationError::chain_error(chain, "execution was cancelled")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
