// ============================================================================
// Path Resolution
// ============================================================================
//
// Paths, positions and selectors are derived from the tree each time they are
// asked for. Nothing here is cached: an index is only meaningful against the
// parent's array as it is right now.
//
// ============================================================================

use crate::core::{Embedding, Fields, ID_FIELD, NodeId, Result, join_path};
use crate::document::Document;
use serde_json::Value;

/// Dot path from the root to the node, without array indices.
///
/// `""` for the root, `"addresses"` for an address,
/// `"addresses.locations"` for a location nested in an address.
pub fn path(doc: &Document, id: NodeId) -> Result<String> {
    let node = doc.node(id)?;
    match (node.parent(), node.embedding().relation()) {
        (Some(parent), Some(relation)) => Ok(join_path(&path(doc, parent)?, relation)),
        _ => Ok(String::new()),
    }
}

/// Dot path with the current index of every embeds-many node on the chain,
/// e.g. `"addresses.2"` or `"addresses.2.locations.0"`.
pub fn position(doc: &Document, id: NodeId) -> Result<String> {
    let node = doc.node(id)?;
    let Some(parent) = node.parent() else {
        return Ok(String::new());
    };
    let base = join_path(&position(doc, parent)?, node.embedding().relation().unwrap_or_default());
    match doc.index_in_parent(id)? {
        Some(index) => Ok(format!("{}.{}", base, index)),
        None => Ok(base),
    }
}

/// Path of the array holding an embeds-many node, with the parent's indices
/// resolved. For any other node this is its position.
pub fn array_path(doc: &Document, id: NodeId) -> Result<String> {
    let node = doc.node(id)?;
    match (node.parent(), node.embedding()) {
        (Some(parent), Embedding::Many { relation }) => {
            Ok(join_path(&position(doc, parent)?, relation))
        }
        _ => position(doc, id),
    }
}

/// Update key of one of the node's own fields.
pub fn field_key(doc: &Document, id: NodeId, field: &str) -> Result<String> {
    Ok(join_path(&position(doc, id)?, field))
}

/// Filter matching exactly the document holding the node.
///
/// The root contributes its identity and shard key fields; every
/// embeds-many node between the root and `id` (inclusive) contributes a
/// `<path>._id` constraint. Shard key values are taken as stored, so a dirty
/// shard key field contributes its snapshot.
pub fn selector(doc: &Document, id: NodeId) -> Result<Fields> {
    let mut selector = root_selector(doc)?;
    let mut current = Some(id);
    while let Some(node_id) = current {
        let node = doc.node(node_id)?;
        if matches!(node.embedding(), Embedding::Many { .. }) {
            let key = format!("{}.{}", path(doc, node_id)?, ID_FIELD);
            selector.insert(key, node.id().cloned().unwrap_or(Value::Null));
        }
        current = node.parent();
    }
    Ok(selector)
}

fn root_selector(doc: &Document) -> Result<Fields> {
    let root = doc.node(doc.root())?;
    let model = doc.model(doc.root())?;

    let mut selector = Fields::new();
    selector.insert(
        ID_FIELD.to_string(),
        root.id().cloned().unwrap_or(Value::Null),
    );
    for field in &model.shard_key {
        let stored = match root.changes().entry(field) {
            Some(original) => original,
            None => root.get(field).cloned(),
        };
        selector.insert(field.clone(), stored.unwrap_or(Value::Null));
    }
    Ok(selector)
}
