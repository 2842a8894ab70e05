//! Bounded fill phase
//!
//! After merging, hits that the caller wants hydrated with a summary class
//! are filled through the chain of the target that produced them. Each
//! target group is moved out of the merged tree and handed to its own fill
//! task, so a group is owned by exactly one task while it is being filled and
//! is only put back by the coordinator. All fills share the query deadline.
//!
//! When a fill misses the deadline or fails, the group keeps only the hits
//! that were already filled. If that leaves the group without hits, an error
//! takes their place, whether or not the target was optional; otherwise the
//! loss is recorded in the trace.

use crate::chain::Chain;
use crate::error::{ErrorMessage, FederationError};
use crate::identifiers::TargetId;
use crate::monitoring::{FederationMetrics, FillEvent};
use crate::query::Query;
use crate::structures::{source_group_id, HitGroup, HitNode, SearchResult};
use crate::worker_pool::WorkerPool;
use crate::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// A target whose hits can be filled
#[derive(Clone)]
pub struct FillTarget {
    pub id: TargetId,
    pub chain: Arc<dyn Chain>,
}

/// What happened to one target group during the fill phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillStatus {
    Filled,
    TimedOut { hits_removed: usize },
    Failed { hits_removed: usize },
}

/// Per-target fill statuses, in tree order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    pub statuses: Vec<(TargetId, FillStatus)>,
}

impl FillReport {
    /// Total hits removed because they could not be filled
    pub fn hits_removed(&self) -> usize {
        self.statuses
            .iter()
            .map(|(_, status)| match status {
                FillStatus::Filled => 0,
                FillStatus::TimedOut { hits_removed } | FillStatus::Failed { hits_removed } => *hits_removed,
            })
            .sum()
    }

    /// Status of one target, if its group was filled
    pub fn status(&self, id: &str) -> Option<&FillStatus> {
        self.statuses.iter().find(|(t, _)| t.as_str() == id).map(|(_, s)| s)
    }
}

struct PendingFill {
    child_index: usize,
    target: FillTarget,
    fallback: HitGroup,
    hits_removed: usize,
    handle: JoinHandle<Result<HitGroup>>,
}

/// Runs the fill phase of a merged result
#[derive(Debug, Clone)]
pub struct FillCoordinator {
    pool: Arc<WorkerPool>,
    abort_timed_out: bool,
    metrics: FederationMetrics,
}

impl FillCoordinator {
    /// Create a coordinator submitting fills to `pool`
    pub fn new(pool: Arc<WorkerPool>, metrics: FederationMetrics) -> Self {
        Self {
            pool,
            abort_timed_out: false,
            metrics,
        }
    }

    /// Set whether timed-out fills are aborted instead of detached
    pub fn abort_timed_out(mut self, abort: bool) -> Self {
        self.abort_timed_out = abort;
        self
    }

    /// Fill the unfilled hits of every target group in `result`
    ///
    /// Only direct child groups of the root that belong to one of `targets`
    /// and contain hits not yet filled with `summary_class` are filled. The
    /// phase ends at the deadline of the result's query at the latest.
    pub async fn fill(&self, result: &mut SearchResult, summary_class: &str, targets: &[FillTarget]) -> FillReport {
        let deadline = result.query().deadline();
        let parent_query = result.query().clone();
        let pending = self.launch(&parent_query, result.hits_mut(), summary_class, targets);

        let mut report = FillReport::default();
        for fill in pending {
            let status = self.complete(fill, result.hits_mut(), &parent_query, deadline).await;
            if let Some((id, status)) = status {
                report.statuses.push((id, status));
            }
        }
        report
    }

    fn launch(
        &self,
        parent: &Query,
        root: &mut HitGroup,
        summary_class: &str,
        targets: &[FillTarget],
    ) -> Vec<PendingFill> {
        let mut pending = Vec::new();

        for (child_index, child) in root.children_mut().iter_mut().enumerate() {
            let HitNode::Group(group) = child else { continue };
            let Some(target) = targets.iter().find(|t| source_group_id(t.id.as_str()) == group.id()) else {
                continue;
            };
            if group.all_hits().iter().all(|hit| hit.is_filled(summary_class)) {
                continue;
            }

            let mut fallback = group.clone();
            let hits_removed = fallback.retain_hits(&mut |hit| hit.is_filled(summary_class));
            let placeholder = HitGroup::new(group.id().to_string());
            let owned = std::mem::replace(group, placeholder);

            let chain = Arc::clone(&target.chain);
            let query = parent.fork(format!("fill:{}", target.id));
            let class = summary_class.to_string();
            let handle = self.pool.spawn(async move {
                let mut fill_result = SearchResult::new(query);
                *fill_result.hits_mut() = owned;
                let filled: Result<()> = chain.fill(&mut fill_result, &class).await;
                filled.map(|_| fill_result.into_parts().1)
            });

            debug!(target_id = %target.id, "Started fill");
            pending.push(PendingFill {
                child_index,
                target: target.clone(),
                fallback,
                hits_removed,
                handle,
            });
        }

        pending
    }

    async fn complete(
        &self,
        fill: PendingFill,
        root: &mut HitGroup,
        parent: &Query,
        deadline: Instant,
    ) -> Option<(TargetId, FillStatus)> {
        let PendingFill {
            child_index,
            target,
            mut fallback,
            hits_removed,
            mut handle,
        } = fill;

        let (group, status) = match timeout_at(deadline, &mut handle).await {
            Ok(Ok(Ok(filled))) => (filled, FillStatus::Filled),
            Ok(Ok(Err(e))) => {
                self.degrade(&mut fallback, &target, parent, hits_removed, Some(e));
                (fallback, FillStatus::Failed { hits_removed })
            }
            Ok(Err(join_error)) => {
                let error = FederationError::fill_error(target.chain.id().as_str(), join_error.to_string());
                self.degrade(&mut fallback, &target, parent, hits_removed, Some(error));
                (fallback, FillStatus::Failed { hits_removed })
            }
            Err(_) => {
                if self.abort_timed_out {
                    handle.abort();
                }
                self.degrade(&mut fallback, &target, parent, hits_removed, None);
                (fallback, FillStatus::TimedOut { hits_removed })
            }
        };

        self.metrics.record_fill(match status {
            FillStatus::Filled => FillEvent::Filled,
            FillStatus::TimedOut { hits_removed } => FillEvent::TimedOut { hits_removed },
            FillStatus::Failed { hits_removed } => FillEvent::Failed { hits_removed },
        });

        let slot = root.children_mut().get_mut(child_index)?;
        *slot = HitNode::Group(group);
        Some((target.id, status))
    }

    /// Record a failed fill on a group that already lost its unfilled hits
    fn degrade(
        &self,
        group: &mut HitGroup,
        target: &FillTarget,
        parent: &Query,
        hits_removed: usize,
        error: Option<FederationError>,
    ) {
        let chain = target.chain.id();
        let description = match &error {
            Some(e) => format!("Could not fill hits from {}: {}", target.id, e),
            None => format!("Timed out filling hits from {} (chain '{}')", target.id, chain),
        };
        warn!(target_id = %target.id, hits_removed, "{}", description);
        parent
            .trace()
            .trace(format!("{}; removed {} unfilled hits", description, hits_removed), 1);

        if group.hit_count() > 0 || hits_removed == 0 {
            return;
        }

        let message = match error {
            Some(e) => e.to_error_message(target.id.as_str()),
            None => ErrorMessage::timeout(
                target.id.as_str(),
                format!("Error filling hits through chain '{}': Fill timed out", chain),
            ),
        };
        group.add_error(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerPoolConfig;
    use crate::error::ErrorCode;
    use crate::structures::Hit;
    use crate::test_utils::MockChain;
    use std::time::Duration;

    fn coordinator() -> FillCoordinator {
        let pool = Arc::new(WorkerPool::from_current(&WorkerPoolConfig::new()).unwrap());
        FillCoordinator::new(pool, FederationMetrics::new())
    }

    fn fill_target(id: &str, chain: &MockChain) -> FillTarget {
        FillTarget {
            id: TargetId::new(id),
            chain: chain.clone().into_arc(),
        }
    }

    fn merged(query: Query, groups: &[(&str, usize)]) -> SearchResult {
        let mut result = SearchResult::new(query);
        for (id, count) in groups {
            let mut group = HitGroup::new(source_group_id(id));
            group.set_source(*id);
            for n in 0..*count {
                group.add_hit(Hit::new(format!("{}-{}", id, n), 1.0).with_source(*id));
            }
            result.hits_mut().add_group(group);
        }
        result
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_success() {
        let chain = MockChain::new("a");
        let mut result = merged(Query::new("q"), &[("a", 3)]);

        let report = coordinator()
            .fill(&mut result, "default", &[fill_target("a", &chain)])
            .await;

        assert_eq!(report.status("a"), Some(&FillStatus::Filled));
        assert!(result.hits().all_hits().iter().all(|h| h.is_filled("default")));
        assert_eq!(result.concrete_hit_count(), 3);
        assert_eq!(chain.fills(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filled_groups_are_skipped() {
        let chain = MockChain::new("a");
        let mut result = merged(Query::new("q"), &[("a", 2)]);
        result.hits_mut().for_each_hit_mut(&mut |h| h.set_filled("default"));

        let report = coordinator()
            .fill(&mut result, "default", &[fill_target("a", &chain)])
            .await;

        assert!(report.statuses.is_empty());
        assert_eq!(chain.fills(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_timeout_removes_hits_and_adds_error() {
        let query = Query::builder().timeout(Duration::from_millis(100)).summary("default").build();
        let slow = MockChain::new("slow").with_fill_latency(Duration::from_millis(500));
        let fast = MockChain::new("fast");
        let mut result = merged(query, &[("slow", 2), ("fast", 2)]);

        let report = coordinator()
            .fill(
                &mut result,
                "default",
                &[fill_target("slow", &slow), fill_target("fast", &fast)],
            )
            .await;

        assert_eq!(report.status("slow"), Some(&FillStatus::TimedOut { hits_removed: 2 }));
        assert_eq!(report.status("fast"), Some(&FillStatus::Filled));
        assert_eq!(report.hits_removed(), 2);

        let slow_group = result.hits().group("source:slow").unwrap();
        assert_eq!(slow_group.hit_count(), 0);
        assert_eq!(slow_group.errors().len(), 1);
        assert_eq!(slow_group.errors()[0].code, ErrorCode::Timeout);
        assert_eq!(slow_group.errors()[0].source.as_deref(), Some("slow"));

        // group order is kept
        let ids: Vec<_> = result.hits().groups().map(|g| g.id().to_string()).collect();
        assert_eq!(ids, vec!["source:slow", "source:fast"]);
        assert_eq!(result.hits().group("source:fast").unwrap().hit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_group_keeps_filled_hits_without_error() {
        let query = Query::builder().timeout(Duration::from_millis(100)).trace_level(1).build();
        let chain = MockChain::new("a").with_fill_latency(Duration::from_millis(500));
        let mut result = merged(query, &[("a", 3)]);
        if let Some(HitNode::Group(group)) = result.hits_mut().children_mut().first_mut() {
            group.for_each_hit_mut(&mut |h| {
                if h.id == "a-0" {
                    h.set_filled("default");
                }
            });
        }

        let report = coordinator()
            .fill(&mut result, "default", &[fill_target("a", &chain)])
            .await;

        assert_eq!(report.hits_removed(), 2);
        let group = result.hits().group("source:a").unwrap();
        assert_eq!(group.hit_count(), 1);
        assert!(group.errors().is_empty());
        assert!(result
            .query()
            .trace()
            .all_messages()
            .iter()
            .any(|m| m.contains("removed 2 unfilled hits")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emptied_group_reports_error_for_any_target() {
        let failing = MockChain::new("opt").with_fill_error("backend gone");
        let slow = MockChain::new("late").with_fill_latency(Duration::from_millis(500));
        let query = Query::builder().timeout(Duration::from_millis(100)).build();
        let mut result = merged(query, &[("opt", 2), ("late", 1)]);

        let report = coordinator()
            .fill(
                &mut result,
                "default",
                &[fill_target("opt", &failing), fill_target("late", &slow)],
            )
            .await;

        assert_eq!(report.status("opt"), Some(&FillStatus::Failed { hits_removed: 2 }));
        let group = result.hits().group("source:opt").unwrap();
        assert_eq!(group.hit_count(), 0);
        assert_eq!(group.errors().len(), 1);
        assert_eq!(group.errors()[0].code, ErrorCode::ErrorInPlugin);
        assert_eq!(group.errors()[0].source.as_deref(), Some("opt"));

        let late = result.hits().group("source:late").unwrap();
        assert_eq!(late.hit_count(), 0);
        assert_eq!(late.errors()[0].code, ErrorCode::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_failure_of_mandatory_target_reports_error() {
        let chain = MockChain::new("a").with_fill_error("backend gone");
        let mut result = merged(Query::new("q"), &[("a", 1)]);

        coordinator()
            .fill(&mut result, "default", &[fill_target("a", &chain)])
            .await;

        let errors = result.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::ErrorInPlugin);
        assert!(errors[0].detailed_message.as_deref().unwrap().contains("backend gone"));
    }
}
