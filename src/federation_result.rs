//! Per-target outcomes and the aggregation loop
//!
//! [`FederationResult::aggregate`] waits for every launched target, each up
//! to its own deadline. Executions are awaited in ascending deadline order:
//! when one is awaited, every target with an earlier deadline has already
//! been classified, so the whole loop never waits past the latest deadline
//! and a target with a long timeout never holds up the classification of the
//! others. Targets that finished early are picked up without waiting.
//!
//! The resulting [`FederationResult`] keeps submission order regardless of
//! the order targets completed in.

use crate::error::FederationError;
use crate::invoker::{Invocation, PendingExecution};
use crate::structures::SearchResult;
use crate::target::Target;
use std::time::Duration;
use tracing::warn;

/// Outcome of one target
#[derive(Debug)]
pub enum TargetOutcome {
    /// Not classified yet
    Pending,
    /// The chain produced a result before the deadline
    Succeeded(SearchResult),
    /// The deadline passed first
    TimedOut,
    /// The chain failed, panicked or could not be prepared
    Failed(FederationError),
}

impl TargetOutcome {
    /// Whether this is the `Pending` state
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Short name of the state, used in traces and logs
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded(_) => "succeeded",
            Self::TimedOut => "timed out",
            Self::Failed(_) => "failed",
        }
    }
}

/// A target paired with its outcome
#[derive(Debug)]
pub struct TargetResult<D = ()> {
    target: Target<D>,
    outcome: TargetOutcome,
    elapsed: Option<Duration>,
}

impl<D> TargetResult<D> {
    /// A pending result for `target`
    pub fn pending(target: Target<D>) -> Self {
        Self {
            target,
            outcome: TargetOutcome::Pending,
            elapsed: None,
        }
    }

    /// Classify this target
    ///
    /// Only the first classification counts: resolving an already resolved
    /// result, or resolving to `Pending`, is ignored and returns `false`.
    pub fn resolve(&mut self, outcome: TargetOutcome, elapsed: Duration) -> bool {
        if !self.outcome.is_pending() || outcome.is_pending() {
            warn!(
                target_id = %self.target.id(),
                current = self.outcome.state_name(),
                attempted = outcome.state_name(),
                "Ignoring repeated classification of federation target"
            );
            return false;
        }
        self.outcome = outcome;
        self.elapsed = Some(elapsed);
        true
    }

    /// The target
    pub fn target(&self) -> &Target<D> {
        &self.target
    }

    /// The outcome
    pub fn outcome(&self) -> &TargetOutcome {
        &self.outcome
    }

    /// Time from launch to classification
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Whether the target has not been classified yet
    pub fn is_pending(&self) -> bool {
        self.outcome.is_pending()
    }

    /// Whether the target produced a result
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TargetOutcome::Succeeded(_))
    }

    /// Whether the target timed out
    pub fn is_timed_out(&self) -> bool {
        matches!(self.outcome, TargetOutcome::TimedOut)
    }

    /// Whether the target failed
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, TargetOutcome::Failed(_))
    }

    /// The produced result, if any
    pub fn result(&self) -> Option<&SearchResult> {
        match &self.outcome {
            TargetOutcome::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    /// The failure, if any
    pub fn error(&self) -> Option<&FederationError> {
        match &self.outcome {
            TargetOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Split into target and outcome
    pub fn into_parts(self) -> (Target<D>, TargetOutcome) {
        (self.target, self.outcome)
    }
}

/// Outcomes of all targets of one federation call, in submission order
#[derive(Debug)]
pub struct FederationResult<D = ()> {
    results: Vec<TargetResult<D>>,
}

impl<D> FederationResult<D> {
    /// Wait for all invocations and classify each exactly once
    pub async fn aggregate(invocations: Vec<Invocation<D>>) -> Self {
        let mut results = Vec::with_capacity(invocations.len());
        let mut pending: Vec<(usize, PendingExecution)> = Vec::with_capacity(invocations.len());

        for (index, invocation) in invocations.into_iter().enumerate() {
            let (target, execution) = invocation.into_parts();
            results.push(TargetResult::pending(target));
            pending.push((index, execution));
        }

        // Stable, so equal deadlines keep submission order
        pending.sort_by_key(|(_, execution)| execution.deadline());

        for (index, execution) in pending {
            let (outcome, elapsed) = execution.wait().await;
            results[index].resolve(outcome, elapsed);
        }

        Self { results }
    }

    /// Wrap already classified results
    pub fn from_results(results: Vec<TargetResult<D>>) -> Self {
        Self { results }
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no target was submitted
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Result of the target submitted at `index`
    pub fn get(&self, index: usize) -> Option<&TargetResult<D>> {
        self.results.get(index)
    }

    /// Iterate in submission order
    pub fn iter(&self) -> std::slice::Iter<'_, TargetResult<D>> {
        self.results.iter()
    }

    /// Targets that produced a result
    pub fn successes(&self) -> impl Iterator<Item = &TargetResult<D>> {
        self.results.iter().filter(|r| r.is_success())
    }

    /// Whether every target has been classified
    pub fn all_resolved(&self) -> bool {
        self.results.iter().all(|r| !r.is_pending())
    }
}

impl<D> IntoIterator for FederationResult<D> {
    type Item = TargetResult<D>;
    type IntoIter = std::vec::IntoIter<TargetResult<D>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
