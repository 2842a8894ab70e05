//! Federation targets and target selection
//!
//! A [`Target`] describes one destination of a federated query: the chain to
//! execute, its [`FederationOptions`] and whatever opaque data the selector
//! that produced it wants to carry along. Targets are created per query by a
//! [`TargetSelector`] and never mutated afterwards.

use crate::chain::Chain;
use crate::error::FederationError;
use crate::identifiers::{ChainId, TargetId};
use crate::properties::names;
use crate::query::Query;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::FederationOptions;

/// One destination of a federated query
#[derive(Clone)]
pub struct Target<D = ()> {
    id: TargetId,
    chain: Arc<dyn Chain>,
    options: FederationOptions,
    source: Option<String>,
    provider: Option<String>,
    data: D,
}

impl Target<()> {
    /// Create a target without custom data
    pub fn new(id: impl Into<TargetId>, chain: Arc<dyn Chain>, options: FederationOptions) -> Self {
        Target::with_data(id, chain, options, ())
    }
}

impl<D> Target<D> {
    /// Create a target carrying selector-specific data
    pub fn with_data(id: impl Into<TargetId>, chain: Arc<dyn Chain>, options: FederationOptions, data: D) -> Self {
        Self {
            id: id.into(),
            chain,
            options,
            source: None,
            provider: None,
            data,
        }
    }

    /// Record the source this target implements
    pub fn for_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Record the provider executing this target
    pub fn for_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Target id; also the source tagged onto its hits and errors
    pub fn id(&self) -> &TargetId {
        &self.id
    }

    /// The chain executing this target
    pub fn chain(&self) -> &Arc<dyn Chain> {
        &self.chain
    }

    /// Id of the chain executing this target
    pub fn chain_id(&self) -> &ChainId {
        self.chain.id()
    }

    /// Federation options
    pub fn options(&self) -> &FederationOptions {
        &self.options
    }

    /// Configured timeout, `None` when the query timeout is inherited
    pub fn timeout(&self) -> Option<Duration> {
        self.options.timeout()
    }

    /// Whether the target is optional
    pub fn is_optional(&self) -> bool {
        self.options.optional
    }

    /// Source name, if the target implements a configured source
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Provider name, if the target is executed by a configured provider
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Selector-specific data
    pub fn data(&self) -> &D {
        &self.data
    }

    /// Property scopes propagated onto this target's query, lowest precedence first
    ///
    /// Provider scopes come before source scopes so that `source.<s>.*`
    /// overrides `provider.<p>.*`. A target that is neither a configured
    /// source nor a provider is addressed as `source.<id>`.
    pub fn property_scopes(&self) -> Vec<String> {
        let mut scopes = Vec::with_capacity(2);
        if let Some(provider) = &self.provider {
            scopes.push(format!("{}.{}", names::PROVIDER_PREFIX, provider));
        }
        match (&self.source, &self.provider) {
            (Some(source), _) => scopes.push(format!("{}.{}", names::SOURCE_PREFIX, source)),
            (None, None) => scopes.push(format!("{}.{}", names::SOURCE_PREFIX, self.id)),
            (None, Some(_)) => {}
        }
        scopes
    }
}

impl<D: fmt::Debug> fmt::Debug for Target<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("chain", self.chain.id())
            .field("options", &self.options)
            .field("source", &self.source)
            .field("provider", &self.provider)
            .field("data", &self.data)
            .finish()
    }
}

/// Targets selected for one query, plus selection errors
pub struct TargetSelection<D = ()> {
    pub targets: Vec<Target<D>>,
    pub errors: Vec<FederationError>,
}

impl<D> Default for TargetSelection<D> {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<D> TargetSelection<D> {
    /// A selection of the given targets without errors
    pub fn of(targets: Vec<Target<D>>) -> Self {
        Self {
            targets,
            errors: Vec::new(),
        }
    }

    /// Add a target
    pub fn push(&mut self, target: Target<D>) {
        self.targets.push(target);
    }

    /// Add a selection error
    pub fn push_error(&mut self, error: FederationError) {
        self.errors.push(error);
    }

    /// Remove targets whose id was already selected, keeping the first
    ///
    /// Returns the ids of removed duplicates in the order they were found.
    pub fn remove_duplicates(&mut self) -> Vec<TargetId> {
        let mut seen = FxHashSet::default();
        let mut removed = Vec::new();
        self.targets.retain(|target| {
            if seen.insert(target.id().clone()) {
                true
            } else {
                removed.push(target.id().clone());
                false
            }
        });
        removed
    }

    /// Whether nothing was selected
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Strategy deciding which targets a query federates to
///
/// `select_targets` runs once per query before any target is launched.
/// `modify_target_query` runs once per target on that target's own query
/// copy, after scoped properties have been propagated onto it.
pub trait TargetSelector: Send + Sync + 'static {
    /// Opaque per-target data only this selector interprets
    type Data: Send + Sync + 'static;

    /// Select the ordered targets for `query`
    fn select_targets(&self, query: &Query) -> TargetSelection<Self::Data>;

    /// Adjust a target's query copy before it is executed
    fn modify_target_query(&self, _target: &Target<Self::Data>, _query: &mut Query) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockChain;

    fn target(id: &str) -> Target {
        Target::new(id, MockChain::new(id).into_arc(), FederationOptions::default())
    }

    #[test]
    fn test_target_accessors() {
        let target = Target::with_data(
            "news",
            MockChain::new("news-chain").into_arc(),
            FederationOptions::new().timeout_ms(240).optional(true),
            42u32,
        );

        assert_eq!(target.id().as_str(), "news");
        assert_eq!(target.chain_id().as_str(), "news-chain");
        assert_eq!(target.timeout(), Some(Duration::from_millis(240)));
        assert!(target.is_optional());
        assert_eq!(*target.data(), 42);
    }

    #[test]
    fn test_property_scopes() {
        assert_eq!(target("custom").property_scopes(), vec!["source.custom"]);

        let source = target("news").for_source("news").for_provider("news-backend");
        assert_eq!(source.property_scopes(), vec!["provider.news-backend", "source.news"]);

        let provider = target("web-backend").for_provider("web-backend");
        assert_eq!(provider.property_scopes(), vec!["provider.web-backend"]);
    }

    #[test]
    fn test_remove_duplicates_keeps_first() {
        let first = Target::with_data("a", MockChain::new("a").into_arc(), FederationOptions::default(), 1);
        let second = Target::with_data("b", MockChain::new("b").into_arc(), FederationOptions::default(), 2);
        let duplicate = Target::with_data("a", MockChain::new("a2").into_arc(), FederationOptions::default(), 3);

        let mut selection = TargetSelection::of(vec![first, second, duplicate]);
        let removed = selection.remove_duplicates();

        assert_eq!(removed, vec![TargetId::new("a")]);
        let data: Vec<_> = selection.targets.iter().map(|t| *t.data()).collect();
        assert_eq!(data, vec![1, 2]);
    }
}
