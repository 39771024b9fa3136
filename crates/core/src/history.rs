use std::collections::VecDeque;

use crate::model::Task;

pub const DEFAULT_CAPACITY: usize = 50;

/// A recorded reversible task mutation, with enough payload to apply the
/// inverse without consulting the store.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Created(Task),
    Updated { before: Task, after: Task },
    Deleted(Task),
}

impl HistoryEntry {
    pub fn task_id(&self) -> &str {
        match self {
            HistoryEntry::Created(task) | HistoryEntry::Deleted(task) => &task.id,
            HistoryEntry::Updated { after, .. } => &after.id,
        }
    }
}

/// Bounded command log for single-step undo/redo. One shared instance per
/// session; capacity eviction drops the oldest entry silently.
#[derive(Debug)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl History {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push a completed action. Any redoable future is discarded.
    pub fn record(&mut self, entry: HistoryEntry) {
        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(entry);
        self.redo.clear();
    }

    /// Pop the most recent action for inversion. The caller applies the
    /// inverse; on success the entry lands on the redo stack via
    /// [`History::confirm_undo`], on failure it goes back with
    /// [`History::revert_undo`].
    pub fn take_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop_back()
    }

    pub fn confirm_undo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    pub fn revert_undo(&mut self, entry: HistoryEntry) {
        self.undo.push_back(entry);
    }

    pub fn take_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    pub fn confirm_redo(&mut self, entry: HistoryEntry) {
        self.undo.push_back(entry);
        if self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
    }

    pub fn revert_redo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }
}
