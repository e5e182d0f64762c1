// ============================================================================
// Atomic Frame Undo Log
// ============================================================================
//
// Every mutation made while an atomic frame is open is recorded as an Undo
// entry. Replaying the entries in reverse restores the tree to the state it
// had when the frame opened. The same log tells the aggregator which touches
// belong to the frame when it flushes.
//
// ============================================================================

use super::TrackedEntry;
use crate::core::{NodeId, RequestId};
use crate::document::ArrayRequest;
use serde_json::Value;
use std::collections::BTreeSet;

/// A single reversible mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Undo {
    /// A field was written or removed
    Field {
        node: NodeId,
        field: String,
        previous: Option<Value>,
        tracked: TrackedEntry,
        unset_pending: bool,
        /// Queued array requests the write superseded
        requests: Vec<ArrayRequest>,
    },

    /// A new child was attached under a relation
    Attached {
        parent: NodeId,
        relation: String,
        child: NodeId,
        displaced: Option<NodeId>,
    },

    /// An embeds-many relation was replaced wholesale
    Replaced {
        parent: NodeId,
        relation: String,
        previous: Vec<NodeId>,
        was_deferred: bool,
    },

    /// A child was flagged for destruction
    DestroyFlagged { node: NodeId },

    /// An explicit array operation was queued
    Request {
        node: NodeId,
        request: RequestId,
        field: String,
        previous: Option<Value>,
    },
}

impl Undo {
    /// Node whose own state this entry touched
    pub fn node(&self) -> NodeId {
        match self {
            Undo::Field { node, .. } => *node,
            Undo::Attached { parent, .. } => *parent,
            Undo::Replaced { parent, .. } => *parent,
            Undo::DestroyFlagged { node } => *node,
            Undo::Request { node, .. } => *node,
        }
    }
}

/// The touches recorded by one atomic frame.
///
/// Restricts aggregation so that a frame only flushes what happened inside
/// it, never pending state left by an enclosing frame or by earlier code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushScope {
    fields: BTreeSet<(NodeId, String)>,
    nodes: BTreeSet<NodeId>,
    relations: BTreeSet<(NodeId, String)>,
    requests: BTreeSet<RequestId>,
    /// Every node whose own state an entry changed
    touched: BTreeSet<NodeId>,
}

impl FlushScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_log(log: &[Undo]) -> Self {
        let mut scope = Self::new();
        for entry in log {
            scope.touched.insert(entry.node());
            match entry {
                Undo::Field { node, field, .. } => {
                    scope.fields.insert((*node, field.clone()));
                }
                Undo::Attached { child, .. } => {
                    scope.nodes.insert(*child);
                }
                Undo::Replaced {
                    parent, relation, ..
                } => {
                    scope.relations.insert((*parent, relation.clone()));
                }
                Undo::DestroyFlagged { node } => {
                    scope.nodes.insert(*node);
                }
                Undo::Request { request, .. } => {
                    scope.requests.insert(*request);
                }
            }
        }
        scope
    }

    /// Scope covering a single attached or flagged node
    pub fn for_node(node: NodeId) -> Self {
        let mut scope = Self::new();
        scope.nodes.insert(node);
        scope
    }

    pub fn covers_field(&self, node: NodeId, field: &str) -> bool {
        self.fields.contains(&(node, field.to_string()))
    }

    pub fn covers_node(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Whether any entry changed the node's own state.
    pub fn touches_node(&self, node: NodeId) -> bool {
        self.touched.contains(&node)
    }

    pub fn covers_relation(&self, node: NodeId, relation: &str) -> bool {
        self.relations.contains(&(node, relation.to_string()))
    }

    pub fn covers_request(&self, request: RequestId) -> bool {
        self.requests.contains(&request)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.nodes.is_empty()
            && self.relations.is_empty()
            && self.requests.is_empty()
    }
}
