// ============================================================================
// Change Tracking Module
// ============================================================================
//
// - change_set.rs: per-node dirty tracking (snapshots, setters, commit)
// - undo.rs: reversible record of everything an atomic frame touched
//
// ============================================================================

pub mod change_set;
pub mod undo;

pub use change_set::{ChangeRecord, ChangeSet, TrackedEntry, normalize_resizable};
pub use undo::{FlushScope, Undo};
