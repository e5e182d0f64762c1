use super::NodeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocError {
    #[error("Document '{0}' is read-only")]
    ReadonlyDocument(String),

    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Model '{0}' not found in schema")]
    UnknownModel(String),

    #[error("Relation '{0}' not declared on model '{1}'")]
    UnknownRelation(String, String),

    #[error("Relation '{0}' is not an embeds_{1} relation")]
    RelationKindMismatch(String, &'static str),

    #[error("Field '{0}' does not hold an array")]
    NotAnArray(String),

    #[error("Field '{0}' is reserved")]
    ReservedField(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Atomic context error: {0}")]
    Context(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, DocError>;

impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for DocError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
