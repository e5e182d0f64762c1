use serde_json::{Map, Value};

/// Field holding a node's identity.
pub const ID_FIELD: &str = "_id";

/// A node's field map, in wire form.
pub type Fields = Map<String, Value>;

/// Index of a node inside its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Get the raw arena slot
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// Identity of a queued array operation (`$push`, `$addToSet`, `$pull`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

/// How a node hangs off its parent, as stored on the node.
///
/// An `EmbeddedMany` node stores no array index; it is
/// looked up in the parent's current array whenever it is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embedding {
    Root,
    One { relation: String },
    Many { relation: String },
}

impl Embedding {
    pub fn relation(&self) -> Option<&str> {
        match self {
            Embedding::Root => None,
            Embedding::One { relation } | Embedding::Many { relation } => Some(relation),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Embedding::Root)
    }
}

/// Embedding kind resolved against the current tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Root,
    EmbeddedOne,
    EmbeddedMany(usize),
}

/// Joins two dot-path segments, treating an empty prefix as the document root.
pub fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}
