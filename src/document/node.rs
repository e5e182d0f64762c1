use crate::changes::ChangeSet;
use crate::core::{Embedding, Fields, ID_FIELD, NodeId, RequestId};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Children held under one embedded relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Children {
    One(Option<NodeId>),
    Many(Vec<NodeId>),
}

impl Children {
    pub fn ids(&self) -> Vec<NodeId> {
        match self {
            Children::One(child) => child.iter().copied().collect(),
            Children::Many(children) => children.clone(),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        match self {
            Children::One(child) => *child == Some(id),
            Children::Many(children) => children.contains(&id),
        }
    }
}

/// Array operator requested explicitly on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    Push,
    AddToSet,
    Pull,
}

/// A queued explicit array operation, waiting for the next flush.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRequest {
    pub id: RequestId,
    pub op: ArrayOp,
    pub field: String,
    pub values: Vec<Value>,
    /// Field value before this request was applied in memory
    pub stored: Option<Value>,
}

/// One record in a document tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) model: String,
    pub(crate) fields: Fields,
    pub(crate) parent: Option<NodeId>,
    pub(crate) embedding: Embedding,
    pub(crate) children: BTreeMap<String, Children>,
    pub(crate) changes: ChangeSet,
    pub(crate) new_record: bool,
    pub(crate) destroy_flagged: bool,
    /// Fields removed since the last flush
    pub(crate) unsets: BTreeSet<String>,
    pub(crate) requests: Vec<ArrayRequest>,
    /// Relations replaced wholesale; written as one `$set` of the full array
    pub(crate) deferred_sets: BTreeSet<String>,
}

impl Node {
    pub(crate) fn new(
        model: impl Into<String>,
        fields: Fields,
        parent: Option<NodeId>,
        embedding: Embedding,
        new_record: bool,
    ) -> Self {
        Self {
            model: model.into(),
            fields,
            parent,
            embedding,
            children: BTreeMap::new(),
            changes: ChangeSet::new(),
            new_record,
            destroy_flagged: false,
            unsets: BTreeSet::new(),
            requests: Vec::new(),
            deferred_sets: BTreeSet::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_new_record(&self) -> bool {
        self.new_record
    }

    pub fn is_flagged_for_destroy(&self) -> bool {
        self.destroy_flagged
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn has_changes(&self) -> bool {
        self.changes.has_changes(&self.fields)
    }

    pub fn pending_unsets(&self) -> &BTreeSet<String> {
        &self.unsets
    }

    pub fn pending_requests(&self) -> &[ArrayRequest] {
        &self.requests
    }

    /// Requests queued on one field, oldest first.
    pub fn requests_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ArrayRequest> {
        self.requests.iter().filter(move |request| request.field == field)
    }

    /// The field map as last written to the database.
    ///
    /// Tracked fields carry their snapshot; fields changed only by queued
    /// array requests carry their value from before the oldest request.
    pub fn stored_fields(&self) -> Fields {
        let mut fields = self.fields.clone();
        let mut restored = BTreeSet::new();
        let requested = self
            .requests
            .iter()
            .map(|request| (request.field.as_str(), request.stored.as_ref()));
        for (field, stored) in self.changes.snapshots().chain(requested) {
            if !restored.insert(field) {
                continue;
            }
            match stored {
                Some(value) => fields.insert(field.to_string(), value.clone()),
                None => fields.remove(field),
            };
        }
        fields
    }

    pub(crate) fn relation(&self, name: &str) -> Option<&Children> {
        self.children.get(name)
    }
}
