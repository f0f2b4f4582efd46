//! Undo/redo storage: two append-only logs of compact reversible ops,
//! group-terminator markers, and the arena holding displaced expression
//! trees.
//!
//! The logic that *executes* an op's inverse lives on [`crate::Sheet`],
//! because inversion runs back through the normal insert/delete paths.

use ahash::AHashSet;
use gridlet_model::Pos;

use crate::error::SheetError;
use crate::expr::Expr;

/// Stable identifier of an archived expression in the [`Arena`].
pub type AstHandle = u32;

/// An expression displaced from the grid, together with its string pool.
#[derive(Debug)]
pub struct Archived {
    pub expr: Expr,
    pub pool: String,
}

/// Free-list slot arena for [`Archived`] expressions.
///
/// Log entries carry handles instead of the trees themselves, which keeps an
/// entry a few bytes and makes bulk log clearing cheap.
#[derive(Debug, Default)]
pub struct Arena {
    slots: Vec<Option<Archived>>,
    free: Vec<AstHandle>,
}

impl Arena {
    /// Make sure the next [`Arena::archive`] cannot allocate. Callers
    /// reserve up front so the archive happens after every fallible step.
    pub fn reserve(&mut self, additional: usize) -> Result<(), SheetError> {
        let needed = additional.saturating_sub(self.free.len());
        self.slots.try_reserve(needed)?;
        self.free.try_reserve(additional)?;
        Ok(())
    }

    /// Store `archived`, reusing a free slot when one exists. Capacity must
    /// have been set aside with [`Arena::reserve`].
    pub fn archive(&mut self, archived: Archived) -> AstHandle {
        if let Some(handle) = self.free.pop() {
            self.slots[handle as usize] = Some(archived);
            return handle;
        }
        let handle = self.slots.len() as AstHandle;
        self.slots.push(Some(archived));
        handle
    }

    /// Take the archived expression out, freeing the slot.
    pub fn take(&mut self, handle: AstHandle) -> Option<Archived> {
        let archived = self.slots.get_mut(handle as usize)?.take();
        if archived.is_some() {
            // Capacity was reserved when the slot was created.
            self.free.push(handle);
        }
        archived
    }

    /// Drop the archived expression without returning it.
    pub fn release(&mut self, handle: AstHandle) {
        drop(self.take(handle));
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// One reversible operation. Inversion semantics are on [`crate::Sheet`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UndoOp {
    /// Re-install the archived expression at `pos`.
    SetCell { pos: Pos, handle: AstHandle },
    /// Delete the cell at `pos`.
    DeleteCell { pos: Pos },
    /// Restore a column's previous width.
    SetColumnWidth { col: u16, old: u16 },
    /// Restore a column's previous precision.
    SetColumnPrecision { col: u16, old: u8 },
}

/// Which of the two logs an entry is appended to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Undo,
    Redo,
}

#[derive(Debug, Default)]
pub struct Log {
    ops: Vec<UndoOp>,
    /// Indexes whose entry terminates an undo/redo group.
    group_ends: AHashSet<u32>,
}

impl Log {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether the top entry terminates a group.
    pub fn top_is_group_end(&self) -> bool {
        match self.ops.len().checked_sub(1) {
            Some(top) => self.group_ends.contains(&(top as u32)),
            None => false,
        }
    }

    pub fn mark_group_end(&mut self) {
        if let Some(top) = self.ops.len().checked_sub(1) {
            self.group_ends.insert(top as u32);
        }
    }

    pub fn unmark_top(&mut self) {
        if let Some(top) = self.ops.len().checked_sub(1) {
            self.group_ends.remove(&(top as u32));
        }
    }

    pub fn pop(&mut self) -> Option<UndoOp> {
        let op = self.ops.pop();
        if op.is_some() {
            // A popped index may carry a marker from a long-gone group.
            self.group_ends.remove(&(self.ops.len() as u32));
        }
        op
    }
}

/// The paired undo/redo logs plus the shared arena.
#[derive(Debug, Default)]
pub struct History {
    pub undo: Log,
    pub redo: Log,
    pub arena: Arena,
}

impl History {
    /// Reserve room for one entry (and its possible group marker) on the
    /// target log, so the matching [`History::push`] cannot fail.
    pub fn reserve(&mut self, target: Target) -> Result<(), SheetError> {
        let log = self.log_mut(target);
        log.ops.try_reserve(1)?;
        log.group_ends.try_reserve(1)?;
        Ok(())
    }

    /// Append `op` to the target log. Capacity comes from a prior
    /// [`History::reserve`].
    ///
    /// Pushing to the undo log with `clear_redos` frees the redo log and
    /// every arena slot it still references; this is the default for fresh
    /// user edits, while inversion pushes keep the opposite log intact.
    pub fn push(&mut self, op: UndoOp, target: Target, clear_redos: bool) {
        if target == Target::Undo && clear_redos {
            self.clear_redo();
        }
        self.log_mut(target).ops.push(op);
    }

    pub fn log_mut(&mut self, target: Target) -> &mut Log {
        match target {
            Target::Undo => &mut self.undo,
            Target::Redo => &mut self.redo,
        }
    }

    fn clear_redo(&mut self) {
        for op in self.redo.ops.drain(..) {
            if let UndoOp::SetCell { handle, .. } = op {
                self.arena.release(handle);
            }
        }
        self.redo.group_ends.clear();
    }

    /// Drop both logs and the arena (after a file load).
    pub fn clear(&mut self) {
        self.undo.ops.clear();
        self.undo.group_ends.clear();
        self.redo.ops.clear();
        self.redo.group_ends.clear();
        self.arena.clear();
    }
}
