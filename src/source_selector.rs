//! Configuration driven target selection
//!
//! [`SourceSelector`] is the default [`TargetSelector`]. It turns the static
//! [`FederationConfig`] into targets for each query:
//!
//! - Without `sources`/`providers` properties every source and every
//!   standalone provider with `use_by_default` is selected, sources first, in
//!   configuration order.
//! - With either property only the named sources and providers are selected,
//!   in the order named. Repeated names collapse to their first occurrence.
//!   A standalone provider is a source of its own, so `sources` accepts it too.
//! - `source.<name>.provider=<p>` executes a source through another of its
//!   providers instead of the default (first) one.
//!
//! Unknown names become selection errors on the query result; they never
//! prevent the remaining targets from running.

use crate::chain::{Chain, ChainRegistry};
use crate::config::{FederationConfig, FederationOptions, SourceConfig};
use crate::error::FederationError;
use crate::properties::{names, Properties};
use crate::query::Query;
use crate::target::{Target, TargetSelection, TargetSelector};
use crate::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::debug;

/// Selects targets from configured sources and providers
pub struct SourceSelector {
    config: FederationConfig,
    chains: FxHashMap<String, Arc<dyn Chain>>,
}

impl SourceSelector {
    /// Validate `config` and resolve every provider chain in `registry`
    ///
    /// Any configuration problem, including a provider pointing at an
    /// unregistered chain, is reported here rather than per query.
    pub fn new(config: FederationConfig, registry: &ChainRegistry) -> Result<Self> {
        config.validate()?;

        let mut chains = FxHashMap::default();
        for provider in &config.providers {
            let chain = registry.resolve(&provider.chain).map_err(|_| {
                FederationError::config_error(
                    format!("provider '{}'.chain", provider.id),
                    format!("references unregistered chain '{}'", provider.chain),
                    "Register the chain before building the selector",
                )
            })?;
            chains.insert(provider.id.clone(), chain);
        }

        Ok(Self { config, chains })
    }

    /// The validated configuration
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    fn source_target(&self, source: &SourceConfig, properties: &Properties) -> Result<Target> {
        let provider_key = Properties::source_key(&source.id, names::PROVIDER);
        let provider_id = match properties.get(&provider_key).map(str::trim) {
            Some(requested) if !requested.is_empty() => {
                if !source.providers.iter().any(|p| p == requested) {
                    return Err(FederationError::UnknownProvider {
                        name: requested.to_string(),
                        valid: format_names(source.providers.iter().map(String::as_str)),
                    });
                }
                requested
            }
            _ => source.default_provider().unwrap_or_default(),
        };

        let provider = self
            .config
            .find_provider(provider_id)
            .ok_or_else(|| FederationError::UnknownChain(provider_id.to_string()))?;
        let chain = self
            .chains
            .get(provider_id)
            .cloned()
            .ok_or_else(|| FederationError::UnknownChain(provider.chain.to_string()))?;

        let options = FederationOptions {
            timeout_ms: source.options.timeout_ms.or(provider.options.timeout_ms),
            ..source.options.clone()
        };

        Ok(Target::new(source.id.as_str(), chain, options)
            .for_source(source.id.as_str())
            .for_provider(provider_id))
    }

    fn provider_target(&self, provider_id: &str) -> Result<Target> {
        let provider = self.config.find_provider(provider_id).ok_or_else(|| FederationError::UnknownProvider {
            name: provider_id.to_string(),
            valid: format_names(self.config.providers.iter().map(|p| p.id.as_str())),
        })?;
        let chain = self
            .chains
            .get(provider_id)
            .cloned()
            .ok_or_else(|| FederationError::UnknownChain(provider.chain.to_string()))?;

        Ok(Target::new(provider_id, chain, provider.options.clone()).for_provider(provider_id))
    }

    fn is_standalone_provider(&self, id: &str) -> bool {
        self.config.find_provider(id).is_some() && !self.config.is_source_provider(id)
    }

    /// Names accepted in the `sources` property: sources and standalone providers
    fn source_refs(&self) -> impl Iterator<Item = &str> {
        let standalone = self
            .config
            .providers
            .iter()
            .filter(|p| !self.config.is_source_provider(&p.id))
            .map(|p| p.id.as_str());
        self.config.sources.iter().map(|s| s.id.as_str()).chain(standalone)
    }

    fn select_defaults(&self, properties: &Properties, selection: &mut TargetSelection) {
        for source in self.config.sources.iter().filter(|s| s.options.use_by_default) {
            match self.source_target(source, properties) {
                Ok(target) => selection.push(target),
                Err(e) => selection.push_error(e),
            }
        }

        let standalone = self
            .config
            .providers
            .iter()
            .filter(|p| p.options.use_by_default && !self.config.is_source_provider(&p.id));
        for provider in standalone {
            match self.provider_target(&provider.id) {
                Ok(target) => selection.push(target),
                Err(e) => selection.push_error(e),
            }
        }
    }

    fn select_named(
        &self,
        sources: Option<Vec<String>>,
        providers: Option<Vec<String>>,
        properties: &Properties,
        selection: &mut TargetSelection,
    ) {
        let mut seen = FxHashSet::default();

        for name in sources.unwrap_or_default() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let target = match self.config.find_source(&name) {
                Some(source) => self.source_target(source, properties),
                None if self.is_standalone_provider(&name) => self.provider_target(&name),
                None => Err(FederationError::UnknownSource {
                    valid: format_names(self.source_refs()),
                    name,
                }),
            };
            match target {
                Ok(target) => selection.push(target),
                Err(e) => selection.push_error(e),
            }
        }

        for name in providers.unwrap_or_default() {
            if !seen.insert(name.clone()) {
                continue;
            }
            match self.provider_target(&name) {
                Ok(target) => selection.push(target),
                Err(e) => selection.push_error(e),
            }
        }
    }
}

impl TargetSelector for SourceSelector {
    type Data = ();

    fn select_targets(&self, query: &Query) -> TargetSelection {
        let properties = query.properties();
        let sources = properties.get_list(names::SOURCES);
        let providers = properties.get_list(names::PROVIDERS);

        let mut selection = TargetSelection::default();
        if sources.is_none() && providers.is_none() {
            self.select_defaults(properties, &mut selection);
        } else {
            self.select_named(sources, providers, properties, &mut selection);
        }

        debug!(
            query_id = %query.id(),
            targets = selection.targets.len(),
            errors = selection.errors.len(),
            "Selected federation targets"
        );
        selection
    }
}

fn format_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let mut names: Vec<&str> = names.collect();
    names.sort_unstable();
    format!("[{}]", names.join(", "))
}
