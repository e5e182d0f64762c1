use crate::core::{Fields, Model};
use serde_json::Value;

/// Turns a node's field map, children already inlined, into the form written
/// by whole-document `$set`, `$push` and `$pull` entries.
pub trait WireSerializer: Send + Sync + std::fmt::Debug {
    fn serialize(&self, model: &Model, fields: Fields) -> Value;
}

/// Writes field maps unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSerializer;

impl WireSerializer for PlainSerializer {
    fn serialize(&self, _model: &Model, fields: Fields) -> Value {
        Value::Object(fields)
    }
}

/// Drops `null` fields before writing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactSerializer;

impl WireSerializer for CompactSerializer {
    fn serialize(&self, _model: &Model, fields: Fields) -> Value {
        Value::Object(
            fields
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .collect(),
        )
    }
}
