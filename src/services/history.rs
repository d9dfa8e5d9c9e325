//! History manager — shared per-board undo/redo stacks.
//!
//! DESIGN
//! ======
//! Linear history: recording a new entry clears the redo stack. Undo pops
//! from undo onto redo; redo pops from redo onto undo. The manager only moves
//! entries between stacks; the board applies the inverse (or forward) effect
//! to the primitive store.
//!
//! The undo stack is bounded; when full, the oldest entry is dropped.

use std::collections::VecDeque;

use crate::frame::ErrorCode;
use crate::primitive::{Primitive, PrimitiveId, Shape};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("history target missing: {0}")]
    TargetMissing(PrimitiveId),
}

impl ErrorCode for HistoryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NothingToUndo | Self::NothingToRedo => "E_EMPTY_HISTORY",
            Self::TargetMissing(_) => "E_NOT_FOUND",
        }
    }
}

/// One reversible mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Create(PrimitiveId),
    Delete(Primitive),
    Update { id: PrimitiveId, before: Shape, after: Shape },
}

impl HistoryEntry {
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Create(id) | Self::Update { id, .. } => id.as_str(),
            Self::Delete(snapshot) => snapshot.id.as_str(),
        }
    }
}

#[derive(Debug)]
pub struct HistoryManager {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    limit: usize,
}

impl HistoryManager {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { undo: VecDeque::new(), redo: Vec::new(), limit: limit.max(1) }
    }

    /// Push an applied mutation and invalidate any pending redo chain.
    pub fn record(&mut self, entry: HistoryEntry) {
        if self.undo.len() == self.limit {
            self.undo.pop_front();
        }
        self.undo.push_back(entry);
        self.redo.clear();
    }

    /// Move the most recent entry onto the redo stack and return it.
    pub fn undo(&mut self) -> Option<HistoryEntry> {
        let entry = self.undo.pop_back()?;
        self.redo.push(entry.clone());
        Some(entry)
    }

    /// Move the most recently undone entry back onto the undo stack and return it.
    pub fn redo(&mut self) -> Option<HistoryEntry> {
        let entry = self.redo.pop()?;
        if self.undo.len() == self.limit {
            self.undo.pop_front();
        }
        self.undo.push_back(entry.clone());
        Some(entry)
    }

    /// Put back the entry taken by the last `undo` when it could not be
    /// applied.
    pub fn rollback_undo(&mut self) {
        if let Some(entry) = self.redo.pop() {
            self.undo.push_back(entry);
        }
    }

    /// Put back the entry taken by the last `redo` when it could not be
    /// applied.
    pub fn rollback_redo(&mut self) {
        if let Some(entry) = self.undo.pop_back() {
            self.redo.push(entry);
        }
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }
}
