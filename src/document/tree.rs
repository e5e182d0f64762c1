use super::node::{Children, Node};
use super::serialize::{PlainSerializer, WireSerializer};
use crate::atomic::AtomicContext;
use crate::changes::ChangeRecord;
use crate::config::EngineConfig;
use crate::core::{
    DocError, Embedding, EmbeddingKind, Fields, ID_FIELD, Model, NodeId, Relation, RelationKind,
    RequestId, Result, Schema,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// A root record and its embedded descendants.
///
/// Nodes live in an arena. A parent lists its children by `NodeId` and a
/// child names its parent by `NodeId`, so the tree never holds an ownership
/// cycle. Everything positional (paths, indices, selectors) is derived from
/// the arena on demand.
#[derive(Debug)]
pub struct Document {
    pub(crate) schema: Schema,
    pub(crate) config: EngineConfig,
    pub(crate) serializer: Arc<dyn WireSerializer>,
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) root: NodeId,
    pub(crate) readonly: bool,
    pub(crate) context: AtomicContext,
    next_request: u64,
}

impl Document {
    /// Builds a new, not yet persisted document.
    pub fn new(schema: Schema, model: &str, fields: Fields) -> Result<Self> {
        Self::build(schema, model, fields, EngineConfig::global(), false)
    }

    pub fn new_with_config(
        schema: Schema,
        model: &str,
        fields: Fields,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::build(schema, model, fields, config, false)
    }

    /// Builds a document from its stored form. Every node counts as persisted.
    pub fn load(schema: Schema, model: &str, fields: Fields) -> Result<Self> {
        Self::build(schema, model, fields, EngineConfig::global(), true)
    }

    pub fn load_with_config(
        schema: Schema,
        model: &str,
        fields: Fields,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::build(schema, model, fields, config, true)
    }

    /// Loads a persisted document from a JSON object.
    pub fn from_json(schema: Schema, model: &str, json: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(fields) => Self::load(schema, model, fields),
            other => Err(DocError::InvalidDocument(format!(
                "Expected a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn WireSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    fn build(
        schema: Schema,
        model: &str,
        fields: Fields,
        config: EngineConfig,
        persisted: bool,
    ) -> Result<Self> {
        let mut doc = Self {
            schema,
            config,
            serializer: Arc::new(PlainSerializer),
            nodes: Vec::new(),
            root: NodeId(0),
            readonly: false,
            context: AtomicContext::new(),
            next_request: 0,
        };
        doc.root = doc.build_node(model, fields, None, Embedding::Root, persisted)?;
        Ok(doc)
    }

    /// Allocates a node and, recursively, the children found under its
    /// declared relations.
    pub(crate) fn build_node(
        &mut self,
        model: &str,
        mut fields: Fields,
        parent: Option<NodeId>,
        embedding: Embedding,
        persisted: bool,
    ) -> Result<NodeId> {
        let relations = self.schema.model(model)?.relations.clone();
        if !persisted && self.config.generate_ids && !fields.contains_key(ID_FIELD) {
            fields.insert(
                ID_FIELD.to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }

        let id = self.alloc(Node::new(model, Fields::new(), parent, embedding, !persisted));
        let mut children = BTreeMap::new();
        for relation in &relations {
            let raw = fields.remove(&relation.name);
            let slot = self.build_relation(id, relation, raw, persisted)?;
            children.insert(relation.name.clone(), slot);
        }

        let node = self.node_mut(id)?;
        node.fields = fields;
        node.children = children;
        Ok(id)
    }

    fn build_relation(
        &mut self,
        parent: NodeId,
        relation: &Relation,
        raw: Option<Value>,
        persisted: bool,
    ) -> Result<Children> {
        match relation.kind {
            RelationKind::EmbedsOne => match raw {
                None | Some(Value::Null) => Ok(Children::One(None)),
                Some(Value::Object(child)) => {
                    let embedding = Embedding::One {
                        relation: relation.name.clone(),
                    };
                    let id =
                        self.build_node(&relation.model, child, Some(parent), embedding, persisted)?;
                    Ok(Children::One(Some(id)))
                }
                Some(other) => Err(DocError::InvalidDocument(format!(
                    "Relation '{}' expects an object, got {}",
                    relation.name, other
                ))),
            },
            RelationKind::EmbedsMany => match raw {
                None | Some(Value::Null) => Ok(Children::Many(Vec::new())),
                Some(Value::Array(items)) => {
                    let mut ids = Vec::with_capacity(items.len());
                    for item in items {
                        let Value::Object(child) = item else {
                            return Err(DocError::InvalidDocument(format!(
                                "Relation '{}' expects an array of objects",
                                relation.name
                            )));
                        };
                        let embedding = Embedding::Many {
                            relation: relation.name.clone(),
                        };
                        ids.push(self.build_node(
                            &relation.model,
                            child,
                            Some(parent),
                            embedding,
                            persisted,
                        )?);
                    }
                    Ok(Children::Many(ids))
                }
                Some(other) => Err(DocError::InvalidDocument(format!(
                    "Relation '{}' expects an array, got {}",
                    relation.name, other
                ))),
            },
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(Some(node));
        NodeId(self.nodes.len() - 1)
    }

    /// Releases a node and its whole subtree.
    pub(crate) fn free(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        for children in node.children.values() {
            for child in children.ids() {
                self.free(child);
            }
        }
    }

    /// Releases every node no longer reachable from the root.
    pub(crate) fn sweep(&mut self) {
        let mut reachable = BTreeSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(Some(node)) = self.nodes.get(id.0) {
                for children in node.children.values() {
                    stack.extend(children.ids());
                }
            }
        }
        for (slot, node) in self.nodes.iter_mut().enumerate() {
            if node.is_some() && !reachable.contains(&NodeId(slot)) {
                *node = None;
            }
        }
    }

    pub(crate) fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(DocError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(DocError::NodeNotFound(id))
    }

    pub fn model(&self, id: NodeId) -> Result<&Model> {
        self.schema.model(&self.node(id)?.model)
    }

    pub fn get(&self, id: NodeId, field: &str) -> Result<Option<&Value>> {
        Ok(self.node(id)?.get(field))
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    pub(crate) fn relation(&self, id: NodeId, relation: &str) -> Result<Relation> {
        let node = self.node(id)?;
        self.schema.relation(&node.model, relation).cloned()
    }

    /// The child under an embeds-one relation.
    pub fn child(&self, id: NodeId, relation: &str) -> Result<Option<NodeId>> {
        let declared = self.relation(id, relation)?;
        if declared.kind != RelationKind::EmbedsOne {
            return Err(DocError::RelationKindMismatch(declared.name, RelationKind::EmbedsOne.label()));
        }
        match self.node(id)?.relation(relation) {
            Some(Children::One(child)) => Ok(*child),
            _ => Ok(None),
        }
    }

    /// The children under an embeds-many relation, in array order.
    pub fn children_of(&self, id: NodeId, relation: &str) -> Result<Vec<NodeId>> {
        let declared = self.relation(id, relation)?;
        if declared.kind != RelationKind::EmbedsMany {
            return Err(DocError::RelationKindMismatch(declared.name, RelationKind::EmbedsMany.label()));
        }
        match self.node(id)?.relation(relation) {
            Some(Children::Many(children)) => Ok(children.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// All direct children, relations in declaration order.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let node = self.node(id)?;
        let model = self.schema.model(&node.model)?;
        let mut ids = Vec::new();
        for relation in &model.relations {
            if let Some(children) = node.relation(&relation.name) {
                ids.extend(children.ids());
            }
        }
        Ok(ids)
    }

    /// All descendants in pre-order.
    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        for child in self.children(id)? {
            out.push(child);
            out.extend(self.descendants(child)?);
        }
        Ok(out)
    }

    /// Position of a node in its parent's current array.
    pub fn index_in_parent(&self, id: NodeId) -> Result<Option<usize>> {
        let node = self.node(id)?;
        let (Some(parent), Embedding::Many { relation }) = (node.parent, &node.embedding) else {
            return Ok(None);
        };
        match self.node(parent)?.relation(relation) {
            Some(Children::Many(children)) => {
                let index = children.iter().position(|child| *child == id);
                index.map(Some).ok_or_else(|| {
                    DocError::InvalidDocument(format!("{} is detached from '{}'", id, relation))
                })
            }
            _ => Err(DocError::InvalidDocument(format!(
                "{} is detached from '{}'",
                id, relation
            ))),
        }
    }

    pub fn embedding_kind(&self, id: NodeId) -> Result<EmbeddingKind> {
        match self.node(id)?.embedding {
            Embedding::Root => Ok(EmbeddingKind::Root),
            Embedding::One { .. } => Ok(EmbeddingKind::EmbeddedOne),
            Embedding::Many { .. } => {
                let index = self.index_in_parent(id)?.unwrap_or_default();
                Ok(EmbeddingKind::EmbeddedMany(index))
            }
        }
    }

    pub fn is_persisted(&self, id: NodeId) -> Result<bool> {
        Ok(!self.node(id)?.new_record)
    }

    /// True when the node and all of its ancestors are persisted.
    pub fn is_chain_persisted(&self, id: NodeId) -> Result<bool> {
        let mut current = Some(id);
        while let Some(id) = current {
            let node = self.node(id)?;
            if node.new_record {
                return Ok(false);
            }
            current = node.parent;
        }
        Ok(true)
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }

    // ------------------------------------------------------------------
    // Dirty state
    // ------------------------------------------------------------------

    pub fn changes(&self, id: NodeId) -> Result<BTreeMap<String, ChangeRecord>> {
        let node = self.node(id)?;
        Ok(node.changes.changes(&node.fields))
    }

    pub fn is_changed(&self, id: NodeId, field: &str) -> Result<bool> {
        let node = self.node(id)?;
        Ok(node.changes.is_changed(field, node.fields.get(field)))
    }

    pub fn is_changed_with(
        &self,
        id: NodeId,
        field: &str,
        from: Option<&Value>,
        to: Option<&Value>,
    ) -> Result<bool> {
        let node = self.node(id)?;
        Ok(node
            .changes
            .is_changed_with(field, node.fields.get(field), from, to))
    }

    pub fn previous_changes(&self, id: NodeId) -> Result<&BTreeMap<String, ChangeRecord>> {
        Ok(self.node(id)?.changes.previous_changes())
    }

    /// True when anything in the tree is waiting to be written.
    pub fn is_dirty(&self) -> Result<bool> {
        for id in std::iter::once(self.root).chain(self.descendants(self.root)?) {
            let node = self.node(id)?;
            if node.new_record
                || node.destroy_flagged
                || node.has_changes()
                || !node.unsets.is_empty()
                || !node.requests.is_empty()
                || !node.deferred_sets.is_empty()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// The node's fields with its live children inlined, unserialized.
    pub fn as_document(&self, id: NodeId) -> Result<Fields> {
        self.inline(id, false)
    }

    /// The node in wire form, as written by whole-document operators.
    pub fn wire(&self, id: NodeId) -> Result<Value> {
        let fields = self.inline(id, true)?;
        Ok(self.serializer.serialize(self.model(id)?, fields))
    }

    /// The node in wire form as the database currently holds it.
    ///
    /// Pending field writes are undone and only persisted children are
    /// inlined, so the result matches the stored array element a whole-child
    /// `$pull` has to name.
    pub fn stored_wire(&self, id: NodeId) -> Result<Value> {
        let node = self.node(id)?;
        let model = self.schema.model(&node.model)?;
        let mut fields = node.stored_fields();
        for relation in &model.relations {
            match node.relation(&relation.name) {
                Some(Children::One(Some(child))) => {
                    if !self.node(*child)?.new_record {
                        fields.insert(relation.name.clone(), self.stored_wire(*child)?);
                    }
                }
                Some(Children::Many(children)) => {
                    let mut items = Vec::with_capacity(children.len());
                    for child in children {
                        if !self.node(*child)?.new_record {
                            items.push(self.stored_wire(*child)?);
                        }
                    }
                    fields.insert(relation.name.clone(), Value::Array(items));
                }
                _ => {}
            }
        }
        Ok(self.serializer.serialize(model, fields))
    }

    fn inline(&self, id: NodeId, wire: bool) -> Result<Fields> {
        let node = self.node(id)?;
        let model = self.schema.model(&node.model)?;
        let mut fields = node.fields.clone();
        for relation in &model.relations {
            match node.relation(&relation.name) {
                Some(Children::One(Some(child))) => {
                    if !self.node(*child)?.destroy_flagged {
                        fields.insert(relation.name.clone(), self.render(*child, wire)?);
                    }
                }
                Some(Children::Many(children)) => {
                    let mut items = Vec::with_capacity(children.len());
                    for child in children {
                        if !self.node(*child)?.destroy_flagged {
                            items.push(self.render(*child, wire)?);
                        }
                    }
                    fields.insert(relation.name.clone(), Value::Array(items));
                }
                _ => {}
            }
        }
        Ok(fields)
    }

    fn render(&self, id: NodeId, wire: bool) -> Result<Value> {
        if wire {
            self.wire(id)
        } else {
            Ok(Value::Object(self.inline(id, false)?))
        }
    }

    /// Marks a node and its subtree as persisted with nothing pending.
    pub(crate) fn mark_persisted(&mut self, id: NodeId) -> Result<()> {
        for child in self.children(id)? {
            self.mark_persisted(child)?;
        }
        let node = self.node_mut(id)?;
        node.new_record = false;
        node.changes.commit(&node.fields);
        node.unsets.clear();
        node.requests.clear();
        node.deferred_sets.clear();
        Ok(())
    }

    /// Removes a node from its parent's relation and frees it.
    pub(crate) fn detach(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        let relation = node.embedding.relation().map(str::to_string);
        if let (Some(parent), Some(relation)) = (node.parent, relation) {
            let parent = self.node_mut(parent)?;
            match parent.children.get_mut(&relation) {
                Some(Children::One(slot)) if *slot == Some(id) => *slot = None,
                Some(Children::Many(children)) => children.retain(|child| *child != id),
                _ => {}
            }
        }
        self.free(id);
        Ok(())
    }
}
