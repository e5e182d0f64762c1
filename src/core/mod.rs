pub mod error;
pub mod schema;
pub mod types;

pub use error::{DocError, Result};
pub use schema::{Model, Relation, RelationKind, Schema};
pub use types::{Embedding, EmbeddingKind, Fields, ID_FIELD, NodeId, RequestId, join_path};
