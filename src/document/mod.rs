//! In-memory document trees
//!
//! - `tree.rs` - the `Document` arena: construction, navigation, serialization
//! - `node.rs` - a single record and its pending state
//! - `mutation.rs` - field writes, child attachment and array operations
//! - `serialize.rs` - wire serializers for whole-document writes

mod mutation;
pub mod node;
pub mod serialize;
mod tree;

pub use node::{ArrayOp, ArrayRequest, Children, Node};
pub use serialize::{CompactSerializer, PlainSerializer, WireSerializer};
pub use tree::Document;
