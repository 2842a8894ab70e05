//! Query model
//!
//! A [`Query`] is the request object handed to every chain. The federation
//! layer never shares a query between targets: each target receives its own
//! [`Query::fork`], which starts identical to the parent but owns its
//! properties, window and query tree, and writes to its own trace node.
//!
//! The deadline is fixed when the query is built (`start + timeout`) and is
//! inherited unchanged by every fork.

use crate::identifiers::QueryId;
use crate::properties::Properties;
use crate::trace::Trace;
use std::time::Duration;
use tokio::time::Instant;

/// Timeout used when a query is built without one
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of hits requested when a query is built without a hit count
pub const DEFAULT_HITS: usize = 10;

/// Parsed query representation
///
/// Query parsing lives outside this crate; chains only need something they
/// can read and rewrite, so the tree is carried as its serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTree {
    root: String,
}

impl QueryTree {
    /// Create a tree from its serialized form
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// Serialized form of the root
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Replace the root
    pub fn set_root(&mut self, root: impl Into<String>) {
        self.root = root.into();
    }

    /// Whether the tree is empty
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

/// A search request
///
/// `Clone` shares the trace node with the original; use [`Query::fork`] to
/// create a per-target copy with an isolated trace node.
#[derive(Debug, Clone)]
pub struct Query {
    id: QueryId,
    tree: QueryTree,
    properties: Properties,
    offset: usize,
    hits: usize,
    start: Instant,
    timeout: Duration,
    summary: Option<String>,
    trace: Trace,
}

impl Query {
    /// Create a query for the given query text with default settings
    pub fn new(text: impl Into<String>) -> Self {
        Self::builder().text(text).build()
    }

    /// Create a new query builder
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// Unique id of this query (shared by all forks)
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// The query tree
    pub fn tree(&self) -> &QueryTree {
        &self.tree
    }

    /// Mutable access to the query tree
    pub fn tree_mut(&mut self) -> &mut QueryTree {
        &mut self.tree
    }

    /// The property bag
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Mutable access to the property bag
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Offset of the first requested hit
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Set the offset of the first requested hit
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Number of requested hits
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Set the number of requested hits
    pub fn set_hits(&mut self, hits: usize) {
        self.hits = hits;
    }

    /// Summary class to fill hits with, if filling was requested
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Request (or cancel) filling of hits with a summary class
    pub fn set_summary(&mut self, summary: Option<String>) {
        self.summary = summary;
    }

    /// Time this query was created
    pub fn start_time(&self) -> Instant {
        self.start
    }

    /// Timeout relative to the start time
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute deadline of this query
    pub fn deadline(&self) -> Instant {
        self.start + self.timeout
    }

    /// Time elapsed since the query was created
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.start)
    }

    /// Time remaining until the deadline, zero once it has passed
    pub fn time_left(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    pub fn is_timed_out(&self) -> bool {
        Instant::now() >= self.deadline()
    }

    /// The trace node of this query
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Create an independent copy for a nested execution
    ///
    /// The fork gets a new child node in this query's trace, labelled with
    /// `trace_label`. Everything else, including the deadline, is copied.
    pub fn fork(&self, trace_label: impl Into<String>) -> Query {
        Query {
            id: self.id,
            tree: self.tree.clone(),
            properties: self.properties.clone(),
            offset: self.offset,
            hits: self.hits,
            start: self.start,
            timeout: self.timeout,
            summary: self.summary.clone(),
            trace: self.trace.child(trace_label),
        }
    }
}

/// Builder for [`Query`]
#[derive(Debug, Default)]
pub struct QueryBuilder {
    text: Option<String>,
    properties: Properties,
    offset: Option<usize>,
    hits: Option<usize>,
    timeout: Option<Duration>,
    summary: Option<String>,
    trace_level: u32,
}

impl QueryBuilder {
    /// Set the query text
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set a property
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.set(name, value);
        self
    }

    /// Set the offset
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Set the number of hits
    pub fn hits(mut self, hits: usize) -> Self {
        self.hits = Some(hits);
        self
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Request hit filling with a summary class
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Set the trace level
    pub fn trace_level(mut self, level: u32) -> Self {
        self.trace_level = level;
        self
    }

    /// Build the query; the deadline clock starts now
    pub fn build(self) -> Query {
        Query {
            id: QueryId::new(),
            tree: QueryTree::new(self.text.unwrap_or_default()),
            properties: self.properties,
            offset: self.offset.unwrap_or(0),
            hits: self.hits.unwrap_or(DEFAULT_HITS),
            start: Instant::now(),
            timeout: self.timeout.unwrap_or(DEFAULT_QUERY_TIMEOUT),
            summary: self.summary,
            trace: Trace::new(self.trace_level),
        }
    }
}
