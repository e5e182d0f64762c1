// ============================================================================
// Document Mutations
// ============================================================================
//
// Every mutation updates the in-memory tree immediately and, when an atomic
// frame is open, records an Undo entry so the frame can be rolled back.
//
// ============================================================================

use super::Document;
use super::node::{ArrayOp, ArrayRequest, Children};
use crate::changes::Undo;
use crate::core::{DocError, Embedding, Fields, ID_FIELD, NodeId, RelationKind, Result};
use serde_json::Value;
use tracing::{Level, event};

impl Document {
    /// Writes a field. Writing the live value again changes nothing.
    pub fn set(&mut self, id: NodeId, field: &str, value: Value) -> Result<()> {
        self.check_field(id, field)?;
        let node = self.node(id)?;
        if field == ID_FIELD && !node.new_record {
            return Err(DocError::ReservedField(field.to_string()));
        }
        if node.fields.get(field) == Some(&value) {
            return Ok(());
        }
        self.write_field(id, field, Some(value))
    }

    /// Removes a field; a persisted node writes it as `$unset`.
    pub fn unset(&mut self, id: NodeId, field: &str) -> Result<()> {
        self.check_field(id, field)?;
        if field == ID_FIELD {
            return Err(DocError::ReservedField(field.to_string()));
        }
        if !self.node(id)?.fields.contains_key(field) {
            return Ok(());
        }
        self.write_field(id, field, None)
    }

    /// Applies a whole-field write. Array requests still queued on the field
    /// are superseded: the snapshot is taken from before the oldest of them,
    /// so the write carries their effect.
    fn write_field(&mut self, id: NodeId, field: &str, value: Option<Value>) -> Result<()> {
        let node = self.node(id)?;
        let superseded: Vec<ArrayRequest> = node.requests_for(field).cloned().collect();
        let entry = Undo::Field {
            node: id,
            field: field.to_string(),
            previous: node.fields.get(field).cloned(),
            tracked: node.changes.entry(field),
            unset_pending: node.unsets.contains(field),
            requests: superseded.clone(),
        };
        self.context.record(entry);

        let node = self.node_mut(id)?;
        let stored = match superseded.first() {
            Some(oldest) => oldest.stored.clone(),
            None => node.fields.get(field).cloned(),
        };
        node.changes.will_change(field, stored.as_ref());
        node.requests.retain(|request| request.field != field);
        match value {
            Some(value) => {
                node.fields.insert(field.to_string(), value);
                node.unsets.remove(field);
            }
            None => {
                node.fields.remove(field);
                if !node.new_record {
                    node.unsets.insert(field.to_string());
                }
            }
        }
        Ok(())
    }

    /// Embeds a new child under an embeds-one relation, replacing any
    /// existing child.
    pub fn embed_one(&mut self, parent: NodeId, relation: &str, fields: Fields) -> Result<NodeId> {
        let declared = self.relation(parent, relation)?;
        if declared.kind != RelationKind::EmbedsOne {
            return Err(DocError::RelationKindMismatch(declared.name, RelationKind::EmbedsOne.label()));
        }

        let embedding = Embedding::One {
            relation: relation.to_string(),
        };
        let child = self.build_node(&declared.model, fields, Some(parent), embedding, false)?;
        let node = self.node_mut(parent)?;
        let displaced = match node.children.insert(relation.to_string(), Children::One(Some(child))) {
            Some(Children::One(previous)) => previous,
            _ => None,
        };

        self.context.record(Undo::Attached {
            parent,
            relation: relation.to_string(),
            child,
            displaced,
        });
        Ok(child)
    }

    /// Appends a new child to an embeds-many relation.
    pub fn push_child(&mut self, parent: NodeId, relation: &str, fields: Fields) -> Result<NodeId> {
        let declared = self.relation(parent, relation)?;
        if declared.kind != RelationKind::EmbedsMany {
            return Err(DocError::RelationKindMismatch(declared.name, RelationKind::EmbedsMany.label()));
        }

        let embedding = Embedding::Many {
            relation: relation.to_string(),
        };
        let child = self.build_node(&declared.model, fields, Some(parent), embedding, false)?;
        let node = self.node_mut(parent)?;
        match node
            .children
            .entry(relation.to_string())
            .or_insert_with(|| Children::Many(Vec::new()))
        {
            Children::Many(children) => children.push(child),
            Children::One(_) => {
                return Err(DocError::RelationKindMismatch(
                    relation.to_string(),
                    RelationKind::EmbedsMany.label(),
                ));
            }
        }

        self.context.record(Undo::Attached {
            parent,
            relation: relation.to_string(),
            child,
            displaced: None,
        });
        Ok(child)
    }

    /// Replaces every child of an embeds-many relation. The relation is
    /// written as one `$set` of the full array on the next flush.
    pub fn replace_children(
        &mut self,
        parent: NodeId,
        relation: &str,
        items: Vec<Fields>,
    ) -> Result<Vec<NodeId>> {
        let declared = self.relation(parent, relation)?;
        if declared.kind != RelationKind::EmbedsMany {
            return Err(DocError::RelationKindMismatch(declared.name, RelationKind::EmbedsMany.label()));
        }

        let mut ids = Vec::with_capacity(items.len());
        for fields in items {
            let embedding = Embedding::Many {
                relation: relation.to_string(),
            };
            ids.push(self.build_node(&declared.model, fields, Some(parent), embedding, false)?);
        }

        let node = self.node_mut(parent)?;
        let previous = match node
            .children
            .insert(relation.to_string(), Children::Many(ids.clone()))
        {
            Some(children) => children.ids(),
            None => Vec::new(),
        };
        let was_deferred = !node.deferred_sets.insert(relation.to_string());

        self.context.record(Undo::Replaced {
            parent,
            relation: relation.to_string(),
            previous,
            was_deferred,
        });
        Ok(ids)
    }

    /// Flags an embedded node for removal on the next flush.
    pub fn flag_for_destroy(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.parent.is_none() {
            return Err(DocError::InvalidDocument(
                "the root cannot be flagged for destruction".to_string(),
            ));
        }
        if node.destroy_flagged {
            return Ok(());
        }
        node.destroy_flagged = true;
        self.context.record(Undo::DestroyFlagged { node: id });
        Ok(())
    }

    /// Appends values to an array field (`$push`).
    pub fn push_values(&mut self, id: NodeId, field: &str, values: Vec<Value>) -> Result<()> {
        self.array_operation(id, field, ArrayOp::Push, values)
    }

    /// Adds values not already present to an array field (`$addToSet`).
    pub fn add_to_set(&mut self, id: NodeId, field: &str, values: Vec<Value>) -> Result<()> {
        self.array_operation(id, field, ArrayOp::AddToSet, values)
    }

    /// Removes every occurrence of the values from an array field (`$pull`).
    pub fn pull_values(&mut self, id: NodeId, field: &str, values: Vec<Value>) -> Result<()> {
        self.array_operation(id, field, ArrayOp::Pull, values)
    }

    fn array_operation(
        &mut self,
        id: NodeId,
        field: &str,
        op: ArrayOp,
        values: Vec<Value>,
    ) -> Result<()> {
        self.check_writable()?;
        self.check_field(id, field)?;
        if values.is_empty() {
            return Ok(());
        }

        let node = self.node(id)?;
        let previous = node.fields.get(field).cloned();
        let mut items = match &previous {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(DocError::NotAnArray(field.to_string())),
        };
        match op {
            ArrayOp::Push => items.extend(values.iter().cloned()),
            ArrayOp::AddToSet => {
                for value in &values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
            ArrayOp::Pull => items.retain(|item| !values.contains(item)),
        }

        // A tracked field is already written whole by `$set`, and two array
        // operators may not target one path in a single update.
        let mixed = node.requests_for(field).any(|request| request.op != op);
        if node.changes.is_tracked(field) || mixed {
            return self.set(id, field, Value::Array(items));
        }

        let queue = self.is_chain_persisted(id)?;
        let request = self.next_request_id();
        let node = self.node_mut(id)?;
        node.fields.insert(field.to_string(), Value::Array(items));
        node.unsets.remove(field);
        if queue {
            node.requests.push(ArrayRequest {
                id: request,
                op,
                field: field.to_string(),
                values,
                stored: previous.clone(),
            });
        }

        self.context.record(Undo::Request {
            node: id,
            request,
            field: field.to_string(),
            previous,
        });
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.readonly {
            let model = &self.node(self.root)?.model;
            return Err(DocError::ReadonlyDocument(model.clone()));
        }
        Ok(())
    }

    fn check_field(&self, id: NodeId, field: &str) -> Result<()> {
        if self.model(id)?.is_relation(field) {
            return Err(DocError::ReservedField(field.to_string()));
        }
        Ok(())
    }

    /// Replays undo entries newest first.
    pub(crate) fn rollback(&mut self, log: Vec<Undo>) {
        let count = log.len();
        for entry in log.into_iter().rev() {
            if let Err(err) = self.undo(entry) {
                event!(Level::WARN, error = %err, "undo entry skipped");
            }
        }
        event!(Level::DEBUG, entries = count, "atomic frame rolled back");
    }

    fn undo(&mut self, entry: Undo) -> Result<()> {
        match entry {
            Undo::Field {
                node,
                field,
                previous,
                tracked,
                unset_pending,
                requests,
            } => {
                let node = self.node_mut(node)?;
                if !requests.is_empty() {
                    node.requests.extend(requests);
                    node.requests.sort_by_key(|request| request.id);
                }
                match previous {
                    Some(value) => node.fields.insert(field.clone(), value),
                    None => node.fields.remove(&field),
                };
                node.changes.restore_entry(&field, tracked);
                if unset_pending {
                    node.unsets.insert(field);
                } else {
                    node.unsets.remove(&field);
                }
            }
            Undo::Attached {
                parent,
                relation,
                child,
                displaced,
            } => {
                let node = self.node_mut(parent)?;
                match node.children.get_mut(&relation) {
                    Some(Children::One(slot)) => *slot = displaced,
                    Some(Children::Many(children)) => children.retain(|id| *id != child),
                    None => {}
                }
                self.free(child);
            }
            Undo::Replaced {
                parent,
                relation,
                previous,
                was_deferred,
            } => {
                let node = self.node_mut(parent)?;
                let current = node
                    .children
                    .insert(relation.clone(), Children::Many(previous))
                    .map(|children| children.ids())
                    .unwrap_or_default();
                if !was_deferred {
                    node.deferred_sets.remove(&relation);
                }
                for child in current {
                    self.free(child);
                }
            }
            Undo::DestroyFlagged { node } => {
                self.node_mut(node)?.destroy_flagged = false;
            }
            Undo::Request {
                node,
                request,
                field,
                previous,
            } => {
                let node = self.node_mut(node)?;
                match previous {
                    Some(value) => node.fields.insert(field, value),
                    None => node.fields.remove(&field),
                };
                node.requests.retain(|queued| queued.id != request);
            }
        }
        Ok(())
    }
}
