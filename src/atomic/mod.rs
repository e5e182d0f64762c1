// ============================================================================
// Atomic Persistence Module
// ============================================================================
//
// - path.rs: paths, positions and selectors derived from the tree
// - operators.rs: operator → path → value buckets and their wire form
// - aggregator.rs: per-node contributions folded into one update
// - positional.rs: `$` rewriting of array indices pinned by the selector
// - context.rs: per-document stack of atomic frames
// - scheduler.rs: atomically / save / save_node
//
// ============================================================================

pub mod aggregator;
pub mod context;
pub mod operators;
pub mod path;
pub mod positional;
pub mod scheduler;

pub use aggregator::{Aggregation, FlushPlan, atomic_updates, insert_document};
pub use context::{AtomicContext, AtomicFrame, ContextState, FrameId};
pub use operators::{Operator, OperatorMap, PathConflict};
pub use path::{array_path, field_key, path, position, selector};
pub use positional::{base_keys, positionally, replace_index};
pub use scheduler::{AtomicOutcome, Flush, preview_node};
