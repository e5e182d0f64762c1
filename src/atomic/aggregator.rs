// ============================================================================
// Operation Aggregation
// ============================================================================
//
// Walks a node and its descendants in pre-order and collects each node's
// local contributions into one OperatorMap. Alongside the operators it
// builds a FlushPlan: the exact list of pending state the operators write,
// which is what gets committed once the database accepts the update.
//
// Per node, contributions are gathered in this order:
//   1. $unset     removed fields
//   2. $pull      persisted children flagged for destruction
//   3. $set       dirty fields, new embeds-one children, replaced arrays
//   4. $push      new embeds-many children, explicit appends
//   5. $addToSet  explicit set insertions
//   6. $pull      explicit value removals
//
// ============================================================================

use super::operators::OperatorMap;
use super::path;
use crate::changes::FlushScope;
use crate::core::{DocError, Fields, NodeId, RelationKind, RequestId, Result};
use crate::document::{ArrayOp, Children, Document};
use serde_json::Value;

/// Pending state written by an aggregated update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushPlan {
    /// Dirty or removed fields that were written
    pub fields: Vec<(NodeId, String)>,
    /// New subtrees written in full
    pub inserted: Vec<NodeId>,
    /// Children flagged for destruction
    pub removed: Vec<NodeId>,
    pub requests: Vec<(NodeId, RequestId)>,
    /// Relations written as a full array
    pub deferred: Vec<(NodeId, String)>,
}

impl FlushPlan {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.inserted.is_empty()
            && self.removed.is_empty()
            && self.requests.is_empty()
            && self.deferred.is_empty()
    }
}

/// Aggregated operators plus the state they flush.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub operations: OperatorMap,
    pub plan: FlushPlan,
}

/// Collects the updates for `from` and its persisted descendants.
///
/// With a scope, only touches recorded in that scope contribute.
pub fn atomic_updates(
    doc: &Document,
    from: NodeId,
    scope: Option<&FlushScope>,
) -> Result<Aggregation> {
    if !doc.is_chain_persisted(from)? {
        // A new node is written by its parent, restricted to that node.
        let Some(parent) = doc.parent(from)? else {
            return Ok(Aggregation::default());
        };
        if !doc.is_chain_persisted(parent)? {
            return Ok(Aggregation::default());
        }
        let only = FlushScope::for_node(from);
        let mut aggregator = Aggregator {
            doc,
            scope: Some(&only),
            out: Aggregation::default(),
        };
        aggregator.contribute(parent)?;
        return Ok(aggregator.out);
    }

    let mut aggregator = Aggregator {
        doc,
        scope,
        out: Aggregation::default(),
    };
    aggregator.visit(from)?;
    Ok(aggregator.out)
}

struct Aggregator<'a> {
    doc: &'a Document,
    scope: Option<&'a FlushScope>,
    out: Aggregation,
}

impl Aggregator<'_> {
    fn visit(&mut self, id: NodeId) -> Result<()> {
        self.contribute(id)?;
        for child in self.doc.children(id)? {
            let node = self.doc.node(child)?;
            if node.is_new_record() || node.is_flagged_for_destroy() {
                continue;
            }
            self.visit(child)?;
        }
        Ok(())
    }

    fn field_in_scope(&self, id: NodeId, field: &str) -> bool {
        self.scope.is_none_or(|scope| scope.covers_field(id, field))
    }

    fn node_in_scope(&self, id: NodeId) -> bool {
        self.scope.is_none_or(|scope| scope.covers_node(id))
    }

    /// A new child is written when it was attached in scope, or when
    /// anything inside it was touched in scope.
    fn new_child_in_scope(&self, id: NodeId) -> bool {
        self.scope
            .is_none_or(|scope| scope.covers_node(id) || scope.touches_node(id))
    }

    fn relation_in_scope(&self, id: NodeId, relation: &str) -> bool {
        self.scope
            .is_none_or(|scope| scope.covers_relation(id, relation))
    }

    /// A replaced relation is rewritten when it was replaced in scope, or
    /// when one of its children was attached, flagged or edited in scope.
    fn deferred_in_scope(&self, id: NodeId, relation: &str, children: &[NodeId]) -> bool {
        self.relation_in_scope(id, relation)
            || children.iter().any(|child| self.new_child_in_scope(*child))
    }

    fn request_in_scope(&self, request: RequestId) -> bool {
        self.scope.is_none_or(|scope| scope.covers_request(request))
    }

    fn contribute(&mut self, id: NodeId) -> Result<()> {
        self.unsets(id)?;
        self.destroyed_children(id)?;
        self.sets(id)?;
        self.pushes(id)?;
        self.requests(id, ArrayOp::AddToSet)?;
        self.requests(id, ArrayOp::Pull)?;
        Ok(())
    }

    fn unsets(&mut self, id: NodeId) -> Result<()> {
        let node = self.doc.node(id)?;
        for field in node.pending_unsets() {
            if !self.field_in_scope(id, field) {
                continue;
            }
            self.out
                .operations
                .unset(path::field_key(self.doc, id, field)?);
            self.out.plan.fields.push((id, field.clone()));
        }
        Ok(())
    }

    fn destroyed_children(&mut self, id: NodeId) -> Result<()> {
        let node = self.doc.node(id)?;
        let model = self.doc.model(id)?;
        for relation in &model.relations {
            let deferred = node.deferred_sets.contains(&relation.name);
            for child in node.relation(&relation.name).map(Children::ids).unwrap_or_default() {
                let child_node = self.doc.node(child)?;
                if !child_node.is_flagged_for_destroy() || !self.node_in_scope(child) {
                    continue;
                }
                self.out.plan.removed.push(child);
                if child_node.is_new_record() || deferred {
                    continue;
                }
                match relation.kind {
                    RelationKind::EmbedsMany => {
                        let key = path::array_path(self.doc, child)?;
                        let stored = self.doc.stored_wire(child)?;
                        self.out.operations.pull(key, vec![stored]);
                    }
                    RelationKind::EmbedsOne => {
                        self.out.operations.unset(path::position(self.doc, child)?);
                    }
                }
            }
        }
        Ok(())
    }

    fn sets(&mut self, id: NodeId) -> Result<()> {
        let node = self.doc.node(id)?;
        let model = self.doc.model(id)?;

        let setters = node
            .changes
            .setters(node.fields(), |field| model.is_resizable(field));
        for (field, value) in setters {
            if node.pending_unsets().contains(&field) || !self.field_in_scope(id, &field) {
                continue;
            }
            self.out
                .operations
                .set(path::field_key(self.doc, id, &field)?, value);
            self.out.plan.fields.push((id, field));
        }

        for relation in &model.relations {
            match (relation.kind, node.relation(&relation.name)) {
                (RelationKind::EmbedsOne, Some(Children::One(Some(child)))) => {
                    let child = *child;
                    let child_node = self.doc.node(child)?;
                    if child_node.is_new_record()
                        && !child_node.is_flagged_for_destroy()
                        && self.new_child_in_scope(child)
                    {
                        self.out
                            .operations
                            .set(path::position(self.doc, child)?, self.doc.wire(child)?);
                        self.out.plan.inserted.push(child);
                    }
                }
                (RelationKind::EmbedsMany, Some(Children::Many(children))) => {
                    if !node.deferred_sets.contains(&relation.name)
                        || !self.deferred_in_scope(id, &relation.name, children)
                    {
                        continue;
                    }
                    let mut items = Vec::with_capacity(children.len());
                    for child in children {
                        if self.doc.node(*child)?.is_flagged_for_destroy() {
                            if !self.out.plan.removed.contains(child) {
                                self.out.plan.removed.push(*child);
                            }
                            continue;
                        }
                        items.push(self.doc.wire(*child)?);
                        self.out.plan.inserted.push(*child);
                    }
                    let key = path::field_key(self.doc, id, &relation.name)?;
                    self.out.operations.set(key, Value::Array(items));
                    self.out.plan.deferred.push((id, relation.name.clone()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn pushes(&mut self, id: NodeId) -> Result<()> {
        let node = self.doc.node(id)?;
        let model = self.doc.model(id)?;
        for relation in &model.relations {
            if relation.kind != RelationKind::EmbedsMany
                || node.deferred_sets.contains(&relation.name)
            {
                continue;
            }
            let Some(Children::Many(children)) = node.relation(&relation.name) else {
                continue;
            };
            for child in children {
                let child_node = self.doc.node(*child)?;
                if !child_node.is_new_record()
                    || child_node.is_flagged_for_destroy()
                    || !self.new_child_in_scope(*child)
                {
                    continue;
                }
                let key = path::array_path(self.doc, *child)?;
                self.out.operations.push(key, vec![self.doc.wire(*child)?]);
                self.out.plan.inserted.push(*child);
            }
        }
        self.requests(id, ArrayOp::Push)
    }

    fn requests(&mut self, id: NodeId, op: ArrayOp) -> Result<()> {
        let node = self.doc.node(id)?;
        for request in node.pending_requests() {
            if request.op != op || !self.request_in_scope(request.id) {
                continue;
            }
            let key = path::field_key(self.doc, id, &request.field)?;
            let values = request.values.clone();
            match op {
                ArrayOp::Push => self.out.operations.push(key, values),
                ArrayOp::AddToSet => self.out.operations.add_to_set(key, values),
                ArrayOp::Pull => self.out.operations.pull(key, values),
            }
            self.out.plan.requests.push((id, request.id));
        }
        Ok(())
    }
}

/// Whole-document form of a new root, for the insert path.
pub fn insert_document(doc: &Document) -> Result<Fields> {
    match doc.wire(doc.root())? {
        Value::Object(fields) => Ok(fields),
        other => Err(DocError::InvalidDocument(format!(
            "serializer produced a non-object root: {}",
            other
        ))),
    }
}
