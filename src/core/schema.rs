use super::{DocError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Cardinality of an embedded relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    EmbedsOne,
    EmbedsMany,
}

impl RelationKind {
    pub fn label(&self) -> &'static str {
        match self {
            RelationKind::EmbedsOne => "one",
            RelationKind::EmbedsMany => "many",
        }
    }
}

/// An embedded relation declared on a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    /// Model of the embedded child documents
    pub model: String,
}

/// Static description of one document shape.
///
/// Relations are kept in declaration order; traversal of a node's children
/// follows that order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Array-typed fields whose non-array writes are normalized
    #[serde(default)]
    pub resizable: BTreeSet<String>,
    #[serde(default)]
    pub shard_key: Vec<String>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn embeds_one(mut self, relation: impl Into<String>, model: impl Into<String>) -> Self {
        self.relations.push(Relation {
            name: relation.into(),
            kind: RelationKind::EmbedsOne,
            model: model.into(),
        });
        self
    }

    pub fn embeds_many(mut self, relation: impl Into<String>, model: impl Into<String>) -> Self {
        self.relations.push(Relation {
            name: relation.into(),
            kind: RelationKind::EmbedsMany,
            model: model.into(),
        });
        self
    }

    pub fn resizable(mut self, field: impl Into<String>) -> Self {
        self.resizable.insert(field.into());
        self
    }

    pub fn shard_key(mut self, field: impl Into<String>) -> Self {
        self.shard_key.push(field.into());
        self
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|rel| rel.name == name)
    }

    pub fn is_relation(&self, name: &str) -> bool {
        self.relation(name).is_some()
    }

    pub fn is_resizable(&self, field: &str) -> bool {
        self.resizable.contains(field)
    }
}

/// Registry of models a document tree may use.
///
/// Immutable once built; cloning only bumps the `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: Arc<HashMap<String, Model>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model, returning a new schema. Duplicate names are rejected.
    pub fn with_model(self, model: Model) -> Result<Self> {
        if self.models.contains_key(&model.name) {
            return Err(DocError::InvalidDocument(format!(
                "Model '{}' already registered",
                model.name
            )));
        }

        let mut models = (*self.models).clone();
        models.insert(model.name.clone(), model);
        Ok(Self {
            models: Arc::new(models),
        })
    }

    /// Parses a JSON array of model definitions.
    pub fn from_json(json: &str) -> Result<Self> {
        let models: Vec<Model> = serde_json::from_str(json)?;
        models
            .into_iter()
            .try_fold(Self::new(), |schema, model| schema.with_model(model))
    }

    pub fn model(&self, name: &str) -> Result<&Model> {
        self.models
            .get(name)
            .ok_or_else(|| DocError::UnknownModel(name.to_string()))
    }

    pub fn relation(&self, model: &str, relation: &str) -> Result<&Relation> {
        self.model(model)?
            .relation(relation)
            .ok_or_else(|| DocError::UnknownRelation(relation.to_string(), model.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
