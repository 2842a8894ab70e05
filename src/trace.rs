//! Per-query execution trace
//!
//! A trace is a tree mirroring the execution call graph. Every federation
//! target gets its own child node, so targets running concurrently only ever
//! write to their own node and their entries never interleave. Each node
//! owns its own lock; creating a child locks the parent only briefly to link
//! the child in, which keeps child order equal to creation order.
//!
//! Properties can be stored in the tree and are looked up in reverse
//! depth-first order, so the most recently written value (including values
//! written by nested executions) wins.

use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;

/// Handle to one node of a trace tree
///
/// Cloning a handle shares the node; use [`Trace::child`] to get an isolated
/// node for a nested execution.
#[derive(Debug, Clone)]
pub struct Trace {
    node: Arc<TraceNode>,
    level: u32,
}

#[derive(Debug)]
struct TraceNode {
    label: Option<String>,
    entries: Mutex<Vec<TraceEntry>>,
}

#[derive(Debug, Clone)]
enum TraceEntry {
    Message { level: u32, text: String },
    Property { key: String, value: String },
    Child(Arc<TraceNode>),
}

impl TraceNode {
    fn new(label: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            label,
            entries: Mutex::new(Vec::new()),
        })
    }

    fn find_property(&self, key: &str) -> Option<String> {
        // Snapshot under the lock, recurse without it
        let entries: Vec<TraceEntry> = self.entries.lock().clone();
        for entry in entries.iter().rev() {
            match entry {
                TraceEntry::Property { key: k, value } if k == key => return Some(value.clone()),
                TraceEntry::Child(child) => {
                    if let Some(value) = child.find_property(key) {
                        return Some(value);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn collect_messages(&self, out: &mut Vec<String>) {
        let entries: Vec<TraceEntry> = self.entries.lock().clone();
        for entry in entries {
            match entry {
                TraceEntry::Message { text, .. } => out.push(text),
                TraceEntry::Child(child) => child.collect_messages(out),
                TraceEntry::Property { .. } => {}
            }
        }
    }

    fn render_into(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        if let Some(label) = &self.label {
            let _ = writeln!(out, "{}[{}]", indent, label);
        }
        let entries: Vec<TraceEntry> = self.entries.lock().clone();
        for entry in entries {
            match entry {
                TraceEntry::Message { text, .. } => {
                    let _ = writeln!(out, "{}  {}", indent, text);
                }
                TraceEntry::Property { key, value } => {
                    let _ = writeln!(out, "{}  {}={}", indent, key, value);
                }
                TraceEntry::Child(child) => child.render_into(depth + 1, out),
            }
        }
    }
}

impl Trace {
    /// Create the root of a new trace tree
    pub fn new(level: u32) -> Self {
        Self {
            node: TraceNode::new(None),
            level,
        }
    }

    /// Trace level; messages above this level are discarded
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Change the trace level of this handle
    pub fn set_level(&mut self, level: u32) {
        self.level = level;
    }

    /// Whether a message at `level` would be recorded
    pub fn is_enabled(&self, level: u32) -> bool {
        level <= self.level
    }

    /// Label of this node, if any
    pub fn label(&self) -> Option<&str> {
        self.node.label.as_deref()
    }

    /// Record a message at the given level
    pub fn trace(&self, message: impl Into<String>, level: u32) {
        if self.is_enabled(level) {
            self.node.entries.lock().push(TraceEntry::Message {
                level,
                text: message.into(),
            });
        }
    }

    /// Create a labelled child node and return a handle to it
    pub fn child(&self, label: impl Into<String>) -> Trace {
        let child = TraceNode::new(Some(label.into()));
        self.node.entries.lock().push(TraceEntry::Child(Arc::clone(&child)));
        Trace {
            node: child,
            level: self.level,
        }
    }

    /// Store a property in this node
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.node.entries.lock().push(TraceEntry::Property {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Look up a property in this subtree, newest and deepest first
    pub fn property(&self, key: &str) -> Option<String> {
        self.node.find_property(key)
    }

    /// Messages recorded directly in this node
    pub fn messages(&self) -> Vec<String> {
        self.node
            .entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                TraceEntry::Message { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages in this subtree, depth first in recording order
    pub fn all_messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.node.collect_messages(&mut out);
        out
    }

    /// Handles to the direct children of this node, in creation order
    pub fn children(&self) -> Vec<Trace> {
        self.node
            .entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                TraceEntry::Child(child) => Some(Trace {
                    node: Arc::clone(child),
                    level: self.level,
                }),
                _ => None,
            })
            .collect()
    }

    /// Number of message entries recorded at exactly `level` in this node
    pub fn message_count_at(&self, level: u32) -> usize {
        self.node
            .entries
            .lock()
            .iter()
            .filter(|entry| matches!(entry, TraceEntry::Message { level: l, .. } if *l == level))
            .count()
    }

    /// Indented textual dump of this subtree
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.node.render_into(0, &mut out);
        out
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_messages_respect_level() {
        let trace = Trace::new(2);
        trace.trace("shown", 1);
        trace.trace("also shown", 2);
        trace.trace("hidden", 3);

        assert_eq!(trace.messages(), vec!["shown", "also shown"]);
        assert_eq!(trace.message_count_at(2), 1);
    }

    #[test]
    fn test_children_keep_creation_order() {
        let root = Trace::new(5);
        let a = root.child("a");
        let b = root.child("b");
        b.trace("from b", 1);
        a.trace("from a", 1);

        let labels: Vec<_> = root.children().iter().map(|c| c.label().unwrap().to_string()).collect();
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(root.all_messages(), vec!["from a", "from b"]);
    }

    #[test]
    fn test_property_lookup_is_reverse_depth_first() {
        let root = Trace::new(1);
        root.set_property("k", "root");
        let child = root.child("child");
        child.set_property("k", "child");

        assert_eq!(root.property("k").as_deref(), Some("child"));

        root.set_property("k", "root-later");
        assert_eq!(root.property("k").as_deref(), Some("root-later"));

        let grandchild = child.child("grandchild");
        grandchild.set_property("k", "deepest");
        // the child node is still older than the later root entry
        assert_eq!(root.property("k").as_deref(), Some("root-later"));
        assert_eq!(child.property("k").as_deref(), Some("deepest"));
        assert!(root.property("missing").is_none());
    }

    #[test]
    fn test_concurrent_children_do_not_interleave() {
        let root = Trace::new(1);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let child = root.child(format!("target-{}", i));
                thread::spawn(move || {
                    for n in 0..100 {
                        child.trace(format!("{}:{}", i, n), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for (i, child) in root.children().iter().enumerate() {
            let messages = child.messages();
            assert_eq!(messages.len(), 100);
            for (n, message) in messages.iter().enumerate() {
                assert_eq!(message, &format!("{}:{}", i, n));
            }
        }
    }

    #[test]
    fn test_render() {
        let root = Trace::new(1);
        root.trace("start", 1);
        let child = root.child("news");
        child.trace("done", 1);

        assert_eq!(root.render(), "  start\n  [news]\n    done\n");
    }
}
