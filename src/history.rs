//! Edit history — a bounded linear undo/redo stack.
//!
//! DESIGN
//! ======
//! A single list of (forward, reverse) pairs with a cursor pointing at the
//! most recently applied edit (`-1` when empty). Recording truncates the
//! redo tail, appends, and caps length by dropping the oldest entries.
//! The stack only hands out descriptors; the session replays them through
//! the dispatcher (marked as replays so they do not re-enter history) and
//! moves the cursor after a successful replay.

use crate::edit::EditPair;

/// Bounded undo/redo list of edit pairs made by the local user.
#[derive(Debug)]
pub struct EditStack {
    entries: Vec<EditPair>,
    /// Index of the edit to undo next; `-1` means nothing to undo.
    cursor: isize,
    max_len: usize,
}

impl EditStack {
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self { entries: Vec::new(), cursor: -1, max_len }
    }

    /// Record a new edit: drop everything after the cursor, append, cap.
    pub fn record(&mut self, pair: EditPair) {
        let keep = usize::try_from(self.cursor + 1).unwrap_or(0);
        self.entries.truncate(keep);
        self.entries.push(pair);
        if self.entries.len() > self.max_len {
            let excess = self.entries.len() - self.max_len;
            self.entries.drain(..excess);
        }
        self.cursor = isize::try_from(self.entries.len()).unwrap_or(0) - 1;
    }

    /// The pair whose reverse an undo would replay, if any.
    #[must_use]
    pub fn undo_entry(&self) -> Option<&EditPair> {
        usize::try_from(self.cursor)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    /// The pair whose forward a redo would replay, if any.
    #[must_use]
    pub fn redo_entry(&self) -> Option<&EditPair> {
        usize::try_from(self.cursor + 1)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    /// Move the cursor back after a successful undo replay.
    pub fn retreat(&mut self) {
        if self.cursor >= 0 {
            self.cursor -= 1;
        }
    }

    /// Move the cursor forward after a successful redo replay.
    pub fn advance(&mut self) {
        if self.cursor + 1 < isize::try_from(self.entries.len()).unwrap_or(0) {
            self.cursor += 1;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
