//! Result data structures
//!
//! A [`SearchResult`] wraps the query it answers, a root [`HitGroup`] and the
//! total/deep hit counts. Hit groups form a tree of groups and leaf hits.
//! Groups do not keep their children sorted; ordering across federated
//! target groups is decided by the federation searcher, and relevance order
//! is applied only on request ([`HitGroup::sort_by_relevance`],
//! [`SearchResult::window`]).

use crate::error::ErrorMessage;
use crate::query::Query;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Id of the root group of every result
pub const ROOT_GROUP_ID: &str = "toplevel";

/// Id of the group holding the hits (or errors) of one federation target
pub fn source_group_id(source: &str) -> String {
    format!("source:{}", source)
}

/// A single document hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Document identifier, unique within its source
    pub id: String,
    /// Relevance score (higher means more relevant)
    pub relevance: f64,
    /// Id of the target this hit came from
    pub source: Option<String>,
    /// Field values
    pub fields: BTreeMap<String, Value>,
    /// Summary classes this hit has been filled with
    filled: BTreeSet<String>,
}

impl Hit {
    /// Create an unfilled hit
    pub fn new(id: impl Into<String>, relevance: f64) -> Self {
        Self {
            id: id.into(),
            relevance,
            source: None,
            fields: BTreeMap::new(),
            filled: BTreeSet::new(),
        }
    }

    /// Set the source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field value
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field value
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Whether this hit has been filled with the given summary class
    pub fn is_filled(&self, summary_class: &str) -> bool {
        self.filled.contains(summary_class)
    }

    /// Whether this hit has been filled with any summary class
    pub fn is_filled_any(&self) -> bool {
        !self.filled.is_empty()
    }

    /// Mark this hit as filled with a summary class
    pub fn set_filled(&mut self, summary_class: impl Into<String>) {
        self.filled.insert(summary_class.into());
    }
}

/// A node of the hit tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HitNode {
    Hit(Hit),
    Group(HitGroup),
}

impl HitNode {
    fn sort_key(&self) -> f64 {
        match self {
            HitNode::Hit(hit) => relevance_key(hit.relevance),
            HitNode::Group(group) => group
                .all_hits()
                .iter()
                .map(|h| relevance_key(h.relevance))
                .fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// A group of hits and nested groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitGroup {
    id: String,
    source: Option<String>,
    children: Vec<HitNode>,
    errors: Vec<ErrorMessage>,
}

impl HitGroup {
    /// Create an empty group
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: None,
            children: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Create a source group holding only an error, attributed to `source`
    pub fn error_only(source: impl Into<String>, error: ErrorMessage) -> Self {
        let source = source.into();
        let mut group = Self::new(source_group_id(&source));
        group.source = Some(source);
        group.errors.push(error);
        group
    }

    /// Group id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Change the group id
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Source of this group
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Set the source of this group
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(source.into());
    }

    /// Tag this group and every hit below it that has no source yet
    pub fn tag_source(&mut self, source: &str) {
        self.source = Some(source.to_string());
        self.for_each_hit_mut(&mut |hit| {
            if hit.source.is_none() {
                hit.source = Some(source.to_string());
            }
        });
    }

    /// Append a hit
    pub fn add_hit(&mut self, hit: Hit) {
        self.children.push(HitNode::Hit(hit));
    }

    /// Append a nested group
    pub fn add_group(&mut self, group: HitGroup) {
        self.children.push(HitNode::Group(group));
    }

    /// Attach an error to this group
    pub fn add_error(&mut self, error: ErrorMessage) {
        self.errors.push(error);
    }

    /// Errors attached directly to this group
    pub fn errors(&self) -> &[ErrorMessage] {
        &self.errors
    }

    /// Mutable access to the errors attached directly to this group
    pub fn errors_mut(&mut self) -> &mut Vec<ErrorMessage> {
        &mut self.errors
    }

    /// Errors in this group and all nested groups, depth first
    pub fn all_errors(&self) -> Vec<&ErrorMessage> {
        let mut out: Vec<&ErrorMessage> = self.errors.iter().collect();
        for child in &self.children {
            if let HitNode::Group(group) = child {
                out.extend(group.all_errors());
            }
        }
        out
    }

    /// Direct children
    pub fn children(&self) -> &[HitNode] {
        &self.children
    }

    /// Mutable direct children
    pub fn children_mut(&mut self) -> &mut Vec<HitNode> {
        &mut self.children
    }

    /// Take the children out, leaving the group empty
    pub fn take_children(&mut self) -> Vec<HitNode> {
        std::mem::take(&mut self.children)
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether this group has no children
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Direct child groups
    pub fn groups(&self) -> impl Iterator<Item = &HitGroup> {
        self.children.iter().filter_map(|c| match c {
            HitNode::Group(group) => Some(group),
            HitNode::Hit(_) => None,
        })
    }

    /// Direct child groups, mutable
    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut HitGroup> {
        self.children.iter_mut().filter_map(|c| match c {
            HitNode::Group(group) => Some(group),
            HitNode::Hit(_) => None,
        })
    }

    /// Find a direct child group by id
    pub fn group(&self, id: &str) -> Option<&HitGroup> {
        self.groups().find(|g| g.id == id)
    }

    /// Direct child hits
    pub fn hits(&self) -> impl Iterator<Item = &Hit> {
        self.children.iter().filter_map(|c| match c {
            HitNode::Hit(hit) => Some(hit),
            HitNode::Group(_) => None,
        })
    }

    /// All hits in this subtree, depth first
    pub fn all_hits(&self) -> Vec<&Hit> {
        let mut out = Vec::new();
        for child in &self.children {
            match child {
                HitNode::Hit(hit) => out.push(hit),
                HitNode::Group(group) => out.extend(group.all_hits()),
            }
        }
        out
    }

    /// Number of hits in this subtree
    pub fn hit_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| match c {
                HitNode::Hit(_) => 1,
                HitNode::Group(group) => group.hit_count(),
            })
            .sum()
    }

    /// Visit every hit in this subtree
    pub fn for_each_hit_mut(&mut self, f: &mut dyn FnMut(&mut Hit)) {
        for child in &mut self.children {
            match child {
                HitNode::Hit(hit) => f(hit),
                HitNode::Group(group) => group.for_each_hit_mut(f),
            }
        }
    }

    /// Keep only hits matching `keep`, returning how many were removed
    ///
    /// Nested groups are kept even when they become empty.
    pub fn retain_hits(&mut self, keep: &mut dyn FnMut(&Hit) -> bool) -> usize {
        let before = self.hit_count();
        self.children.retain_mut(|child| match child {
            HitNode::Hit(hit) => keep(&*hit),
            HitNode::Group(group) => {
                group.retain_hits(&mut *keep);
                true
            }
        });
        before - self.hit_count()
    }

    /// Sort children by descending relevance
    ///
    /// The sort is stable; a group sorts by its best hit, and nested groups
    /// are sorted recursively.
    pub fn sort_by_relevance(&mut self) {
        for group in self.groups_mut() {
            group.sort_by_relevance();
        }
        self.children
            .sort_by(|a, b| b.sort_key().partial_cmp(&a.sort_key()).unwrap_or(Ordering::Equal));
    }
}

/// NaN relevance sorts last
fn relevance_key(relevance: f64) -> f64 {
    if relevance.is_nan() {
        f64::NEG_INFINITY
    } else {
        relevance
    }
}

/// The answer to one query
#[derive(Debug, Clone)]
pub struct SearchResult {
    query: Query,
    hits: HitGroup,
    total_hit_count: u64,
    deep_hit_count: u64,
}

impl SearchResult {
    /// Create an empty result for a query
    pub fn new(query: Query) -> Self {
        Self {
            query,
            hits: HitGroup::new(ROOT_GROUP_ID),
            total_hit_count: 0,
            deep_hit_count: 0,
        }
    }

    /// Create a result holding only an error
    pub fn with_error(query: Query, error: ErrorMessage) -> Self {
        let mut result = Self::new(query);
        result.hits.add_error(error);
        result
    }

    /// The query this result answers
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Mutable access to the query
    pub fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }

    /// The root hit group
    pub fn hits(&self) -> &HitGroup {
        &self.hits
    }

    /// Mutable access to the root hit group
    pub fn hits_mut(&mut self) -> &mut HitGroup {
        &mut self.hits
    }

    /// Split into query and root hit group
    pub fn into_parts(self) -> (Query, HitGroup) {
        (self.query, self.hits)
    }

    /// Append a hit to the root group
    pub fn add_hit(&mut self, hit: Hit) {
        self.hits.add_hit(hit);
    }

    /// Attach an error to the root group
    pub fn add_error(&mut self, error: ErrorMessage) {
        self.hits.add_error(error);
    }

    /// All errors in the hit tree
    pub fn errors(&self) -> Vec<&ErrorMessage> {
        self.hits.all_errors()
    }

    /// First error on the root group, if any
    pub fn error(&self) -> Option<&ErrorMessage> {
        self.hits.errors().first()
    }

    /// Total number of matches reported by the backends
    pub fn total_hit_count(&self) -> u64 {
        self.total_hit_count
    }

    /// Set the total number of matches
    pub fn set_total_hit_count(&mut self, count: u64) {
        self.total_hit_count = count;
    }

    /// Number of matches including those not grouped into top-level hits
    pub fn deep_hit_count(&self) -> u64 {
        self.deep_hit_count
    }

    /// Set the deep hit count
    pub fn set_deep_hit_count(&mut self, count: u64) {
        self.deep_hit_count = count;
    }

    /// Number of concrete hits in the tree
    pub fn concrete_hit_count(&self) -> usize {
        self.hits.hit_count()
    }

    /// The requested window over all hits in relevance order
    ///
    /// Flattens every group, sorts hits by descending relevance (stable, so
    /// equal scores keep tree order) and applies `offset`/`count`. The tree
    /// itself is left untouched.
    pub fn window(&self, offset: usize, count: usize) -> Vec<&Hit> {
        let mut all = self.hits.all_hits();
        all.sort_by(|a, b| {
            relevance_key(b.relevance)
                .partial_cmp(&relevance_key(a.relevance))
                .unwrap_or(Ordering::Equal)
        });
        all.into_iter().skip(offset).take(count).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn group_with(id: &str, hits: &[(&str, f64)]) -> HitGroup {
        let mut group = HitGroup::new(id);
        for (hit_id, relevance) in hits {
            group.add_hit(Hit::new(*hit_id, *relevance));
        }
        group
    }

    #[test]
    fn test_hit_fill_state() {
        let mut hit = Hit::new("doc1", 0.5).with_field("title", "hello");
        assert!(!hit.is_filled_any());
        hit.set_filled("default");
        assert!(hit.is_filled("default"));
        assert!(!hit.is_filled("attributes"));
        assert_eq!(hit.field("title"), Some(&Value::from("hello")));
    }

    #[test]
    fn test_group_keeps_insertion_order() {
        let group = group_with("g", &[("low", 0.1), ("high", 0.9), ("mid", 0.5)]);
        let ids: Vec<_> = group.hits().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["low", "high", "mid"]);
    }

    #[test]
    fn test_sort_by_relevance_is_stable_and_recursive() {
        let mut root = HitGroup::new("root");
        root.add_hit(Hit::new("a", 0.5));
        root.add_group(group_with("inner", &[("x", 0.1), ("y", 0.8)]));
        root.add_hit(Hit::new("b", 0.5));
        root.add_hit(Hit::new("nan", f64::NAN));

        root.sort_by_relevance();

        let order: Vec<String> = root
            .children()
            .iter()
            .map(|c| match c {
                HitNode::Hit(h) => h.id.clone(),
                HitNode::Group(g) => g.id().to_string(),
            })
            .collect();
        assert_eq!(order, vec!["inner", "a", "b", "nan"]);

        let inner: Vec<_> = root.group("inner").unwrap().hits().map(|h| h.id.as_str()).collect();
        assert_eq!(inner, vec!["y", "x"]);
    }

    #[test]
    fn test_tag_source_keeps_existing_sources() {
        let mut group = group_with("g", &[("a", 1.0)]);
        group.add_hit(Hit::new("b", 1.0).with_source("other"));
        group.tag_source("news");

        assert_eq!(group.source(), Some("news"));
        let sources: Vec<_> = group.hits().map(|h| h.source.as_deref().unwrap()).collect();
        assert_eq!(sources, vec!["news", "other"]);
    }

    #[test]
    fn test_retain_hits_is_deep() {
        let mut root = group_with("root", &[("a", 1.0), ("b", 0.5)]);
        root.add_group(group_with("inner", &[("c", 0.2), ("d", 0.9)]));

        let removed = root.retain_hits(&mut |h| h.relevance >= 0.5);
        assert_eq!(removed, 1);
        assert_eq!(root.hit_count(), 3);
        assert_eq!(root.len(), 3);
        assert!(root.group("inner").unwrap().hits().all(|h| h.id == "d"));

        let removed = root.retain_hits(&mut |h| h.relevance > 0.5);
        assert_eq!(removed, 1);
        assert_eq!(root.hit_count(), 2);
    }

    #[test]
    fn test_all_errors_collects_nested() {
        let mut root = HitGroup::new("root");
        root.add_error(ErrorMessage::new(ErrorCode::Unspecified, "top"));
        root.add_group(HitGroup::error_only("web", ErrorMessage::timeout("web", "slow")));

        let errors = root.all_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].source.as_deref(), Some("web"));
        assert_eq!(root.group("source:web").unwrap().source(), Some("web"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_flattens_and_slices() {
        let mut result = SearchResult::new(Query::new("q"));
        result.hits_mut().add_group(group_with("a", &[("a1", 0.9), ("a2", 0.3)]));
        result.hits_mut().add_group(group_with("b", &[("b1", 0.7), ("b2", 0.3)]));

        let window: Vec<_> = result.window(1, 2).iter().map(|h| h.id.clone()).collect();
        assert_eq!(window, vec!["b1", "a2"]);
        assert_eq!(result.window(10, 5).len(), 0);
        assert_eq!(result.concrete_hit_count(), 4);
        // the tree itself keeps group order
        assert_eq!(result.hits().groups().next().unwrap().id(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_counts_and_errors() {
        let mut result = SearchResult::with_error(
            Query::new("q"),
            ErrorMessage::new(ErrorCode::InvalidQueryParameter, "bad"),
        );
        result.set_total_hit_count(42);
        result.set_deep_hit_count(50);

        assert_eq!(result.total_hit_count(), 42);
        assert_eq!(result.deep_hit_count(), 50);
        assert_eq!(result.error().unwrap().code, ErrorCode::InvalidQueryParameter);
        assert_eq!(result.errors().len(), 1);
    }
}
