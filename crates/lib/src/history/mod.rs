//! Undo and redo stacks.
//!
//! The history stores reverse batches: the operations that undo one user
//! action. Applying a batch through the reconciler with
//! [`Provenance::UndoRedo`](crate::reconciler::Provenance::UndoRedo) yields a
//! new reverse batch, which goes on the opposite stack.
//!
//! Both stacks are bounded; the oldest entry is dropped when a stack is full.
//! While paused, recorded batches are coalesced into a single entry that is
//! committed on resume, so a burst of changes (a drag) undoes in one step.

pub mod errors;

use std::collections::VecDeque;

pub use errors::HistoryError;

use crate::constants::HISTORY_LIMIT;
use crate::crdt::{JsonObject, Op};

/// One reversible step inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryItem {
    /// A storage operation.
    Storage(Op),
    /// Presence fields to restore.
    Presence(JsonObject),
}

/// A unit of undo: items applied together, in order.
pub type HistoryBatch = Vec<HistoryItem>;

/// The undo and redo stacks of one session.
#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<HistoryBatch>,
    redo: VecDeque<HistoryBatch>,
    paused: Option<HistoryBatch>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl History {
    /// Creates empty stacks holding at most `limit` entries each.
    pub fn new(limit: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            paused: None,
            limit: limit.max(1),
        }
    }

    /// Records the reverse of a new user action.
    ///
    /// A new action invalidates everything that could be redone.
    pub fn record(&mut self, reverse: HistoryBatch) {
        if reverse.is_empty() {
            return;
        }
        self.redo.clear();
        self.push_undo(reverse);
    }

    /// Pushes an entry on the undo stack without touching the redo stack.
    ///
    /// While paused the entry is prepended to the pending batch, as later
    /// changes must be undone first.
    pub fn push_undo(&mut self, reverse: HistoryBatch) {
        if let Some(paused) = &mut self.paused {
            paused.splice(0..0, reverse);
            return;
        }
        push_bounded(&mut self.undo, reverse, self.limit);
    }

    pub fn push_redo(&mut self, reverse: HistoryBatch) {
        push_bounded(&mut self.redo, reverse, self.limit);
    }

    pub fn pop_undo(&mut self) -> Option<HistoryBatch> {
        self.undo.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryBatch> {
        self.redo.pop_back()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Starts coalescing recorded batches into one entry.
    ///
    /// Pausing an already paused history keeps the pending batch.
    pub fn pause(&mut self) {
        if self.paused.is_none() {
            self.paused = Some(Vec::new());
        }
    }

    /// Commits the coalesced batch, if anything was recorded while paused.
    pub fn resume(&mut self) -> Result<(), HistoryError> {
        let batch = self.paused.take().ok_or(HistoryError::NotPaused)?;
        if !batch.is_empty() {
            push_bounded(&mut self.undo, batch, self.limit);
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }

    /// Drops both stacks.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

fn push_bounded(stack: &mut VecDeque<HistoryBatch>, batch: HistoryBatch, limit: usize) {
    if stack.len() >= limit {
        stack.pop_front();
    }
    stack.push_back(batch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::NodeId;

    fn batch(id: &str) -> HistoryBatch {
        vec![HistoryItem::Storage(Op::DeleteCrdt {
            op_id: None,
            id: NodeId::from(id),
        })]
    }

    #[test]
    fn test_stack_is_bounded() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.record(batch(&format!("1:{i}")));
        }
        assert_eq!(history.undo_len(), 3);
        assert_eq!(history.pop_undo(), Some(batch("1:4")));
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = History::default();
        history.record(batch("1:0"));
        let entry = history.pop_undo().unwrap();
        history.push_redo(entry);
        assert!(history.can_redo());
        history.record(batch("1:1"));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_pause_coalesces_latest_first() {
        let mut history = History::default();
        history.pause();
        history.record(batch("1:0"));
        history.record(batch("1:1"));
        assert!(!history.can_undo());
        history.resume().unwrap();
        assert_eq!(history.undo_len(), 1);
        let entry = history.pop_undo().unwrap();
        assert_eq!(entry, [batch("1:1"), batch("1:0")].concat());
    }

    #[test]
    fn test_resume_without_pause() {
        let mut history = History::default();
        assert!(matches!(history.resume(), Err(HistoryError::NotPaused)));
    }
}
