// ============================================================================
// Atomic Context Stack
// ============================================================================
//
// One stack per document. Each atomically() call pushes a frame and pops it
// again on every exit path. Frames follow the lifecycle:
//
//   Idle ──open──> Open ──close──> Flushing ──flushed──> Idle
//                   │  ▲
//                   └──┘ nested open/close
//
// A joined frame hands its undo log to the frame below it on success, so a
// whole nest of joined blocks flushes once. An independent frame flushes by
// itself.
//
// ============================================================================

use crate::changes::Undo;
use crate::core::{DocError, Result};

/// Identifier of one frame on a document's stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// No open frame
    Idle,
    /// At least one frame is accumulating
    Open,
    /// A frame is being written to storage
    Flushing,
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextState::Idle => write!(f, "IDLE"),
            ContextState::Open => write!(f, "OPEN"),
            ContextState::Flushing => write!(f, "FLUSHING"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AtomicFrame {
    pub(crate) id: FrameId,
    pub(crate) joined: bool,
    pub(crate) undo: Vec<Undo>,
}

impl AtomicFrame {
    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn undo_log(&self) -> &[Undo] {
        &self.undo
    }
}

#[derive(Debug)]
pub struct AtomicContext {
    frames: Vec<AtomicFrame>,
    state: ContextState,
    next_frame: u64,
}

impl Default for AtomicContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicContext {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            state: ContextState::Idle,
            next_frame: 0,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Number of open frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_open(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Pushes a frame. `join` only takes effect when a frame is already open.
    pub fn open(&mut self, join: bool) -> FrameId {
        self.next_frame += 1;
        let id = FrameId(self.next_frame);
        let joined = join && self.is_open();
        self.frames.push(AtomicFrame {
            id,
            joined,
            undo: Vec::new(),
        });
        self.state = ContextState::Open;
        id
    }

    /// Pops the top frame, which must be `id`.
    pub fn close(&mut self, id: FrameId) -> Result<AtomicFrame> {
        match self.frames.last() {
            Some(top) if top.id == id => {}
            Some(top) => {
                return Err(DocError::Context(format!(
                    "expected {} on top of the stack, found {}",
                    id, top.id
                )));
            }
            None => {
                return Err(DocError::Context(format!("{} closed on an empty stack", id)));
            }
        }
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| DocError::Context(format!("{} vanished", id)))?;
        if self.frames.is_empty() {
            self.state = ContextState::Idle;
        }
        Ok(frame)
    }

    /// Records a mutation in the top frame. Outside any frame this does nothing.
    pub fn record(&mut self, entry: Undo) {
        if let Some(top) = self.frames.last_mut() {
            top.undo.push(entry);
        }
    }

    /// Hands a finished joined frame's log to the frame below it.
    pub fn absorb(&mut self, undo: Vec<Undo>) {
        if let Some(top) = self.frames.last_mut() {
            top.undo.extend(undo);
        }
    }

    pub(crate) fn begin_flush(&mut self) {
        self.state = ContextState::Flushing;
    }

    pub(crate) fn end_flush(&mut self) {
        self.state = if self.frames.is_empty() {
            ContextState::Idle
        } else {
            ContextState::Open
        };
    }
}
