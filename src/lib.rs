// ============================================================================
// nestdoc Library
// ============================================================================
//
// Change tracking and atomic persistence for trees of embedded documents.
//
// A `Document` holds a root record and its embedded children in memory.
// Mutations are tracked per field; `atomically`, `save` and `save_node`
// turn the pending changes into minimal update operators and send them to
// a `Collection` in as few round trips as possible.
//
// ============================================================================

pub mod atomic;
pub mod changes;
pub mod config;
pub mod core;
pub mod document;
pub mod storage;

pub use atomic::{AtomicOutcome, Flush, Operator, OperatorMap};
pub use changes::ChangeRecord;
pub use config::EngineConfig;
pub use crate::core::{DocError, EmbeddingKind, Fields, Model, NodeId, RelationKind, Result, Schema};
pub use document::{CompactSerializer, Document, PlainSerializer, WireSerializer};
pub use storage::{Collection, CollectionCall, RecordingCollection, UpdateOptions, UpdateResult};
