//! Undo/redo over the collection patch feed.
//!
//! [`History`] records every collection-level patch and can walk the
//! stack in both directions: `undo` applies the inverse of the patch
//! at the cursor, `redo` reapplies the patch itself. A fresh organic
//! mutation while undone steps exist truncates the redo branch.

use crate::collection::Collection;
use crate::error::StoreResult;
use crate::patch::Patch;
use std::sync::mpsc::Receiver;

/// Undo/redo stack for a collection.
///
/// The history observes mutations through the collection's own patch
/// subscription; it records nothing until patches are actually
/// emitted, so batched operations arrive as their flushed patch
/// sequence.
pub struct History {
    collection: Collection,
    rx: Receiver<Patch>,
    entries: Vec<Patch>,
    /// Number of undone steps; 0 means the cursor is at the newest
    /// entry.
    undone: usize,
}

impl History {
    /// Starts recording the collection's patches.
    #[must_use]
    pub fn new(collection: &Collection) -> Self {
        Self {
            rx: collection.subscribe(),
            collection: collection.clone(),
            entries: Vec::new(),
            undone: 0,
        }
    }

    /// Number of recorded steps.
    pub fn len(&mut self) -> usize {
        self.drain();
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Whether a step is available to undo.
    pub fn can_undo(&mut self) -> bool {
        self.drain();
        self.undone < self.entries.len()
    }

    /// Whether a step is available to redo.
    pub fn can_redo(&mut self) -> bool {
        self.drain();
        self.undone > 0
    }

    /// Reverts the most recent not-yet-undone step.
    ///
    /// Returns `false` when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Fails when replaying the inverse patch fails.
    pub fn undo(&mut self) -> StoreResult<bool> {
        self.drain();
        if self.undone >= self.entries.len() {
            return Ok(false);
        }
        let patch = self.entries[self.entries.len() - 1 - self.undone].clone();
        if let Some(inverse) = patch.inverse() {
            self.collection.apply_patch(&inverse)?;
            self.swallow_echo();
        }
        self.undone += 1;
        Ok(true)
    }

    /// Reapplies the most recently undone step.
    ///
    /// Returns `false` when there is nothing to redo.
    ///
    /// # Errors
    ///
    /// Fails when replaying the patch fails.
    pub fn redo(&mut self) -> StoreResult<bool> {
        self.drain();
        if self.undone == 0 {
            return Ok(false);
        }
        let patch = self.entries[self.entries.len() - self.undone].clone();
        self.collection.apply_patch(&patch)?;
        self.swallow_echo();
        self.undone -= 1;
        Ok(true)
    }

    /// Records pending patches. An organic mutation recorded while
    /// undone steps exist discards the redo branch first.
    fn drain(&mut self) {
        while let Ok(patch) = self.rx.try_recv() {
            if self.undone > 0 {
                let keep = self.entries.len() - self.undone;
                self.entries.truncate(keep);
                self.undone = 0;
            }
            self.entries.push(patch);
        }
    }

    /// Drops the patches emitted by our own replay so they are not
    /// recorded as new steps.
    fn swallow_echo(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("entries", &self.entries.len())
            .field("undone", &self.undone)
            .finish_non_exhaustive()
    }
}
