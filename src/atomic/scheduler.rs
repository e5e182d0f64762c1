// ============================================================================
// Atomic Scheduling
// ============================================================================
//
// `atomically` runs a body against the document inside a frame of the
// document's AtomicContext:
//
//   1. open a frame (joined or independent)
//   2. run the body, catching errors and panics
//   3. failure: replay the frame's undo log and re-raise
//   4. joined success: hand the undo log to the enclosing frame
//   5. independent success: aggregate the frame's touches, issue one
//      update_one and commit exactly what it wrote
//
// `save` and `save_node` flush outside of any frame.
//
// ============================================================================

use super::aggregator::{Aggregation, FlushPlan, atomic_updates, insert_document};
use super::operators::OperatorMap;
use super::path;
use super::positional::positionally;
use crate::changes::FlushScope;
use crate::core::{DocError, Fields, NodeId, Result};
use crate::document::Document;
use crate::storage::{Collection, UpdateOptions};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{Level, event, info_span};

/// What a flush did against the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Nothing to write, or the root is not persisted yet
    Skipped,
    /// Merged into the enclosing frame
    Joined,
    /// A new root was inserted
    Inserted,
    Updated { matched: u64, modified: u64 },
    /// The selector matched no document; dirty state was kept
    NothingUpdated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtomicOutcome<T> {
    pub value: T,
    pub flush: Flush,
}

impl Document {
    /// Runs `body` as one atomic unit.
    ///
    /// `join` picks between joining an enclosing frame and flushing
    /// independently; `None` uses the document's configured default. A body
    /// error or panic, or a failed update, rolls back every mutation made
    /// inside the frame. Errors are returned unchanged; panics resume after
    /// the rollback.
    pub fn atomically<T, E, F>(
        &mut self,
        collection: &dyn Collection,
        join: Option<bool>,
        body: F,
    ) -> std::result::Result<AtomicOutcome<T>, E>
    where
        F: FnOnce(&mut Document) -> std::result::Result<T, E>,
        E: From<DocError>,
    {
        self.check_writable()?;
        let join = join.unwrap_or(self.config.join_contexts);
        let id = self.context.open(join);
        let span = info_span!(
            "nestdoc.atomically",
            frame = %id,
            depth = self.context.depth(),
            collection = collection.name()
        );
        let _enter = span.enter();
        event!(Level::DEBUG, join, "atomic frame opened");

        let result = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *self)));
        let frame = self.context.close(id)?;

        let value = match result {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                self.rollback(frame.undo);
                self.settle();
                return Err(err);
            }
            Err(payload) => {
                event!(Level::ERROR, "atomic body panicked");
                self.rollback(frame.undo);
                self.settle();
                panic::resume_unwind(payload);
            }
        };

        if frame.joined {
            event!(
                Level::DEBUG,
                entries = frame.undo.len(),
                "atomic frame joined enclosing frame"
            );
            self.context.absorb(frame.undo);
            return Ok(AtomicOutcome {
                value,
                flush: Flush::Joined,
            });
        }

        let scope = FlushScope::from_log(&frame.undo);
        let flushed = if scope.is_empty() {
            Ok(Flush::Skipped)
        } else {
            self.flush_root(collection, Some(&scope))
        };
        match flushed {
            Ok(flush) => {
                self.settle();
                Ok(AtomicOutcome { value, flush })
            }
            Err(err) => {
                event!(Level::ERROR, error = %err, "atomic flush failed");
                self.rollback(frame.undo);
                self.settle();
                Err(err.into())
            }
        }
    }

    /// Persists the whole tree: an insert for a new root, otherwise one
    /// update carrying every pending change.
    pub fn save(&mut self, collection: &dyn Collection) -> Result<Flush> {
        self.check_writable()?;
        let span = info_span!("nestdoc.save", collection = collection.name());
        let _enter = span.enter();

        let root = self.root;
        if self.is_persisted(root)? {
            let flush = self.flush_root(collection, None)?;
            self.settle();
            return Ok(flush);
        }

        for id in self.descendants(root)? {
            if self.node(id).is_ok_and(|node| node.is_flagged_for_destroy()) {
                self.detach(id)?;
            }
        }
        let document = insert_document(self)?;
        collection.insert_one(&document)?;
        self.mark_persisted(root)?;
        self.settle();
        event!(Level::DEBUG, "document inserted");
        Ok(Flush::Inserted)
    }

    /// Persists one embedded node and its subtree against the node's own
    /// selector, with array indices rewritten to `$` where the selector
    /// pins the element.
    pub fn save_node(&mut self, collection: &dyn Collection, id: NodeId) -> Result<Flush> {
        if id == self.root {
            return self.save(collection);
        }
        self.check_writable()?;
        let span = info_span!("nestdoc.save_node", node = %id, collection = collection.name());
        let _enter = span.enter();

        if !self.is_persisted(self.root)? {
            event!(Level::DEBUG, "root not persisted, embedded save skipped");
            return Ok(Flush::Skipped);
        }

        // A new node is written by its parent.
        let target = if self.is_chain_persisted(id)? {
            id
        } else {
            self.parent(id)?.ok_or(DocError::NodeNotFound(id))?
        };
        let Aggregation { operations, plan } = atomic_updates(self, id, None)?;
        let flush = self.write(collection, target, operations, plan)?;
        self.settle();
        Ok(flush)
    }

    fn flush_root(
        &mut self,
        collection: &dyn Collection,
        scope: Option<&FlushScope>,
    ) -> Result<Flush> {
        let root = self.root;
        if !self.is_persisted(root)? {
            event!(Level::DEBUG, "root not persisted, flush skipped");
            return Ok(Flush::Skipped);
        }
        let Aggregation { operations, plan } = atomic_updates(self, root, scope)?;
        self.write(collection, root, operations, plan)
    }

    /// Issues one update addressed at `target` and commits the plan once the
    /// collection accepts it.
    fn write(
        &mut self,
        collection: &dyn Collection,
        target: NodeId,
        operations: OperatorMap,
        plan: FlushPlan,
    ) -> Result<Flush> {
        if operations.is_empty() {
            self.apply_plan(plan)?;
            return Ok(Flush::Skipped);
        }

        let selector = path::selector(self, target)?;
        if self.config.warn_on_conflicts {
            for conflict in operations.conflicts() {
                event!(
                    Level::WARN,
                    first = %conflict.first.1,
                    first_operator = %conflict.first.0,
                    second = %conflict.second.1,
                    second_operator = %conflict.second.0,
                    "conflicting update paths"
                );
            }
        }
        let update = positionally(&selector, operations).to_document();

        self.context.begin_flush();
        let result = collection.update_one(&selector, &update, &UpdateOptions::default());
        self.context.end_flush();
        let result = result?;

        if result.matched_count == 0 {
            event!(
                Level::WARN,
                selector = %serde_json::Value::Object(selector),
                "update matched no document"
            );
            return Ok(Flush::NothingUpdated);
        }

        self.apply_plan(plan)?;
        event!(
            Level::DEBUG,
            matched = result.matched_count,
            modified = result.modified_count,
            "update flushed"
        );
        Ok(Flush::Updated {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    /// Clears the pending state an accepted update wrote.
    fn apply_plan(&mut self, plan: FlushPlan) -> Result<()> {
        let mut fields: BTreeMap<NodeId, Vec<String>> = BTreeMap::new();
        for (id, field) in plan.fields {
            fields.entry(id).or_default().push(field);
        }
        for (id, names) in fields {
            let node = self.node_mut(id)?;
            node.changes
                .commit_fields(names.iter().map(String::as_str), &node.fields);
            for name in &names {
                node.unsets.remove(name);
            }
        }

        for id in plan.inserted {
            self.mark_persisted(id)?;
        }
        for (id, request) in plan.requests {
            self.node_mut(id)?
                .requests
                .retain(|queued| queued.id != request);
        }
        for (id, relation) in plan.deferred {
            self.node_mut(id)?.deferred_sets.remove(&relation);
        }
        for id in plan.removed {
            self.detach(id)?;
        }
        Ok(())
    }

    /// Frees unreachable nodes once no frame can refer to them any more.
    fn settle(&mut self) {
        if !self.context.is_open() {
            self.sweep();
        }
    }
}

/// Update document and filter `save_node` would send, without sending it.
pub fn preview_node(doc: &Document, id: NodeId) -> Result<(Fields, Fields)> {
    let target = if doc.is_chain_persisted(id)? {
        id
    } else {
        doc.parent(id)?.ok_or(DocError::NodeNotFound(id))?
    };
    let Aggregation { operations, .. } = atomic_updates(doc, id, None)?;
    let selector = path::selector(doc, target)?;
    let update = positionally(&selector, operations).to_document();
    Ok((selector, update))
}
