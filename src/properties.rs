//! Hierarchical query properties
//!
//! Properties are string key/value pairs whose keys use dotted paths for
//! namespacing. Keys of the form `source.<name>.<property>` and
//! `provider.<name>.<property>` scope a property to one federation target;
//! the invoker strips the scope prefix when it propagates them onto that
//! target's query clone.

use crate::error::FederationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Well-known property names
pub mod names {
    /// Comma separated list of sources to federate to
    pub const SOURCES: &str = "sources";
    /// Comma separated list of providers to federate to
    pub const PROVIDERS: &str = "providers";
    /// Number of hits to return
    pub const HITS: &str = "hits";
    /// Offset of the first hit to return
    pub const OFFSET: &str = "offset";
    /// Query or per-target timeout
    pub const TIMEOUT: &str = "timeout";
    /// Provider selection for a source (used as `source.<name>.provider`)
    pub const PROVIDER: &str = "provider";
    /// Trace level of the query
    pub const TRACE_LEVEL: &str = "trace.level";
    /// Scope prefix for source-level overrides
    pub const SOURCE_PREFIX: &str = "source";
    /// Scope prefix for provider-level overrides
    pub const PROVIDER_PREFIX: &str = "provider";
}

/// Mutable key/value bag with dotted-path keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    /// Create an empty property bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(name.into(), value.into())
    }

    /// Get the raw value of a property
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Remove a property, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    /// Whether a property is set
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no properties are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all properties in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a property as an unsigned integer
    pub fn get_usize(&self, name: &str) -> Result<Option<usize>> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|e| FederationError::invalid_property(name, value, e.to_string())),
        }
    }

    /// Parse a property as a boolean (`true`/`false`/`1`/`0`)
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name).map(str::trim) {
            None => Ok(None),
            Some("true") | Some("1") => Ok(Some(true)),
            Some("false") | Some("0") => Ok(Some(false)),
            Some(value) => Err(FederationError::invalid_property(
                name,
                value,
                "expected true or false",
            )),
        }
    }

    /// Parse a property as a timeout, see [`parse_timeout`]
    pub fn get_timeout(&self, name: &str) -> Result<Option<Duration>> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => parse_timeout(value)
                .map(Some)
                .map_err(|reason| FederationError::invalid_property(name, value, reason)),
        }
    }

    /// Parse a comma separated list, skipping empty elements
    pub fn get_list(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    /// All properties under `prefix.`, with the prefix stripped
    ///
    /// `scoped("source.news")` yields `("hits", "13")` for a property
    /// `source.news.hits=13`.
    pub fn scoped<'a>(&'a self, prefix: &str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let full_prefix = format!("{}.", prefix);
        let stripped_len = full_prefix.len();
        self.values
            .range(full_prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&full_prefix))
            .filter_map(move |(k, v)| {
                let stripped = &k[stripped_len..];
                (!stripped.is_empty()).then_some((stripped, v.as_str()))
            })
    }

    /// Key for a property scoped to a source
    pub fn source_key(source: &str, property: &str) -> String {
        format!("{}.{}.{}", names::SOURCE_PREFIX, source, property)
    }

    /// Key for a property scoped to a provider
    pub fn provider_key(provider: &str, property: &str) -> String {
        format!("{}.{}.{}", names::PROVIDER_PREFIX, provider, property)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Parse a timeout value
///
/// Accepts plain milliseconds (`"250"`), milliseconds with unit (`"250ms"`)
/// and seconds (`"1.5s"`). Negative and non-finite values are rejected.
pub fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    let (number, millis_per_unit) = if let Some(number) = value.strip_suffix("ms") {
        (number, 1.0)
    } else if let Some(number) = value.strip_suffix('s') {
        (number, 1000.0)
    } else {
        (value, 1.0)
    };

    let parsed: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", number.trim()))?;

    if !parsed.is_finite() || parsed < 0.0 {
        return Err("timeout must be a non-negative finite number".to_string());
    }

    Ok(Duration::from_micros((parsed * millis_per_unit * 1000.0).round() as u64))
}
