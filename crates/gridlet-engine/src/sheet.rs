//! The sheet: cell store, column metadata, the evaluation queue, and the
//! mutation paths that keep the spatial indexes and the undo log in sync.

use std::collections::{BTreeMap, VecDeque};
use std::mem;

use gridlet_model::{Column, ErrorKind, Pos, Range, Value};

use crate::error::SheetError;
use crate::expr::{evaluate, EvalContext, Expr, ParsedExpr};
use crate::graph::{DependentIndex, LiveIndex};
use crate::undo::{Archived, History, Target, UndoOp};

/// Where a cell is in the evaluation lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CellState {
    /// Cached value is consistent with the current snapshot.
    UpToDate,
    /// A dependency changed; must be recomputed if reached.
    Dirty,
    /// Scheduled on the evaluation queue.
    Enqueued,
    /// On the evaluation stack right now. Resolving a `Computing` cell is
    /// what a reference cycle looks like.
    Computing,
}

/// One stored cell: its expression, its cached value, and its state.
#[derive(Debug)]
pub struct Cell {
    expr: Expr,
    value: Value,
    state: CellState,
}

impl Cell {
    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn state(&self) -> CellState {
        self.state
    }
}

/// A sparse spreadsheet with incremental re-evaluation and grouped
/// undo/redo.
///
/// Cells are keyed by [`Pos`] and iterate in ascending `hash` order, which
/// is canonical row-major order. The dependent index answers "who depends
/// on this cell", the live index answers "does a cell exist here" without
/// touching the store.
#[derive(Debug, Default)]
pub struct Sheet {
    cells: BTreeMap<Pos, Cell>,
    /// Out-of-line string pools, parallel to `cells`. No entry ≡ empty.
    strings: BTreeMap<Pos, String>,
    columns: BTreeMap<u16, Column>,
    deps: DependentIndex,
    live: LiveIndex,
    queue: VecDeque<Pos>,
    history: History,
    has_changes: bool,
}

impl Sheet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn cell_at(&self, pos: Pos) -> Option<&Cell> {
        self.cells.get(&pos)
    }

    #[must_use]
    pub fn value_at(&self, pos: Pos) -> Option<&Value> {
        self.cells.get(&pos).map(|c| &c.value)
    }

    /// The cell's string pool; empty when the expression has no literals.
    #[must_use]
    pub fn pool_at(&self, pos: Pos) -> &str {
        self.strings.get(&pos).map(String::as_str).unwrap_or("")
    }

    /// The expression's printable text.
    #[must_use]
    pub fn expr_text(&self, pos: Pos) -> Option<String> {
        self.cells
            .get(&pos)
            .map(|c| c.expr.display(self.pool_at(pos)).to_string())
    }

    /// Cells in canonical row-major order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (Pos, &Cell)> {
        self.cells.iter().map(|(p, c)| (*p, c))
    }

    /// Whether anything changed since the last load/save.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    pub(crate) fn mark_saved(&mut self) {
        self.has_changes = false;
    }

    pub(crate) fn reset_history(&mut self) {
        self.history.clear();
    }

    // ------------------------------------------------------------------
    // Assignment and deletion
    // ------------------------------------------------------------------

    /// Assign an expression to `pos`. The single entry point for creating
    /// and mutating cells; always leaves a symmetric entry on the undo log
    /// and schedules `pos` for re-evaluation.
    pub fn insert(&mut self, pos: Pos, parsed: ParsedExpr) -> Result<(), SheetError> {
        self.insert_impl(pos, parsed.expr, parsed.pool, Target::Undo, true)
    }

    fn insert_impl(
        &mut self,
        pos: Pos,
        expr: Expr,
        pool: String,
        target: Target,
        clear_redos: bool,
    ) -> Result<(), SheetError> {
        // Reserve everything the infallible tail will need.
        self.queue.try_reserve(1)?;
        self.history.reserve(target)?;
        self.history.arena.reserve(1)?;
        let new_ranges = distinct_ranges(&expr)?;
        let me = Range::point(pos);

        let was_live = self.live.contains(pos);
        if !was_live {
            self.live.insert(pos)?;
        }

        // One dependent entry per distinct referenced range.
        for (done, r) in new_ranges.iter().enumerate() {
            if let Err(e) = self.deps.put(*r, me) {
                self.rollback_puts(&new_ranges[..done], me, was_live, pos);
                return Err(e);
            }
        }

        if self.cells.contains_key(&pos) {
            if let Err(e) = self.replace_existing(pos, expr, pool, target, clear_redos) {
                self.rollback_puts(&new_ranges, me, was_live, pos);
                return Err(e);
            }
        } else {
            self.cells.insert(
                pos,
                Cell {
                    expr,
                    value: Value::default(),
                    state: CellState::Enqueued,
                },
            );
            if !pool.is_empty() {
                self.strings.insert(pos, pool);
            }
            self.history.push(UndoOp::DeleteCell { pos }, target, clear_redos);
        }

        self.queue.push_back(pos);
        self.has_changes = true;
        Ok(())
    }

    fn rollback_puts(&mut self, done: &[Range], me: Range, was_live: bool, pos: Pos) {
        for r in done {
            let _ = self.deps.remove_value(*r, me);
        }
        if !was_live {
            let _ = self.live.remove(pos);
        }
    }

    /// Steps for assigning over an existing cell: detach the old
    /// expression's dependent entries, archive it, and push the restoring
    /// undo entry. Internally all-or-nothing.
    fn replace_existing(
        &mut self,
        pos: Pos,
        expr: Expr,
        pool: String,
        target: Target,
        clear_redos: bool,
    ) -> Result<(), SheetError> {
        let me = Range::point(pos);
        let old_ranges = distinct_ranges(&self.cells[&pos].expr)?;

        for (done, r) in old_ranges.iter().enumerate() {
            if let Err(e) = self.deps.remove_value(*r, me) {
                for undone in &old_ranges[..done] {
                    let _ = self.deps.put(*undone, me);
                }
                return Err(e);
            }
        }

        // From here on nothing can fail: history and arena capacity were
        // reserved by the caller.
        let cell = self.cells.get_mut(&pos).expect("cell exists");
        let old_expr = mem::replace(&mut cell.expr, expr);
        cell.state = CellState::Enqueued;
        let old_pool = self.strings.remove(&pos).unwrap_or_default();
        if !pool.is_empty() {
            self.strings.insert(pos, pool);
        }
        let handle = self.history.arena.archive(Archived {
            expr: old_expr,
            pool: old_pool,
        });
        self.history
            .push(UndoOp::SetCell { pos, handle }, target, clear_redos);
        Ok(())
    }

    /// Remove the cell at `pos`. A no-op when no cell exists there.
    pub fn delete(&mut self, pos: Pos) -> Result<(), SheetError> {
        self.delete_impl(pos, Target::Undo, true)
    }

    fn delete_impl(
        &mut self,
        pos: Pos,
        target: Target,
        clear_redos: bool,
    ) -> Result<(), SheetError> {
        if !self.cells.contains_key(&pos) {
            return Ok(());
        }
        self.queue.try_reserve(1)?;
        self.history.reserve(target)?;
        self.history.arena.reserve(1)?;

        let me = Range::point(pos);
        let old_ranges = distinct_ranges(&self.cells[&pos].expr)?;
        for (done, r) in old_ranges.iter().enumerate() {
            if let Err(e) = self.deps.remove_value(*r, me) {
                for undone in &old_ranges[..done] {
                    let _ = self.deps.put(*undone, me);
                }
                return Err(e);
            }
        }
        if let Err(e) = self.live.remove(pos) {
            for r in &old_ranges {
                let _ = self.deps.put(*r, me);
            }
            return Err(e);
        }

        let cell = self.cells.remove(&pos).expect("cell exists");
        let pool = self.strings.remove(&pos).unwrap_or_default();
        let handle = self.history.arena.archive(Archived {
            expr: cell.expr,
            pool,
        });
        self.history
            .push(UndoOp::SetCell { pos, handle }, target, clear_redos);

        self.queue.push_back(pos);
        self.has_changes = true;
        Ok(())
    }

    /// Delete every cell inside `range`. All deletions share the caller's
    /// undo group.
    pub fn delete_in_range(&mut self, range: Range) -> Result<(), SheetError> {
        let victims: Vec<Pos> = self
            .cells
            .range(range.tl..=range.br)
            .map(|(p, _)| *p)
            .filter(|p| range.contains_pos(*p))
            .collect();
        for pos in victims {
            self.delete_impl(pos, Target::Undo, true)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Column metadata
    // ------------------------------------------------------------------

    #[must_use]
    pub fn column_at(&self, col: u16) -> Column {
        self.columns.get(&col).copied().unwrap_or_default()
    }

    pub fn set_width(&mut self, col: u16, width: u16) -> Result<(), SheetError> {
        self.set_column_width_impl(col, width, Target::Undo, true)
    }

    pub fn inc_width(&mut self, col: u16) -> Result<(), SheetError> {
        let cur = self.column_at(col).width;
        self.set_width(col, cur.saturating_add(1))
    }

    pub fn dec_width(&mut self, col: u16) -> Result<(), SheetError> {
        let cur = self.column_at(col).width;
        self.set_width(col, cur.saturating_sub(1))
    }

    pub fn set_precision(&mut self, col: u16, precision: u8) -> Result<(), SheetError> {
        self.set_column_precision_impl(col, precision, Target::Undo, true)
    }

    pub fn inc_precision(&mut self, col: u16) -> Result<(), SheetError> {
        let cur = self.column_at(col).precision;
        self.set_precision(col, cur.saturating_add(1))
    }

    pub fn dec_precision(&mut self, col: u16) -> Result<(), SheetError> {
        let cur = self.column_at(col).precision;
        self.set_precision(col, cur.saturating_sub(1))
    }

    fn set_column_width_impl(
        &mut self,
        col: u16,
        width: u16,
        target: Target,
        clear_redos: bool,
    ) -> Result<(), SheetError> {
        let width = width.max(Column::MIN_WIDTH);
        let old = self.column_at(col).width;
        if width == old {
            return Ok(());
        }
        self.history.reserve(target)?;
        self.columns.entry(col).or_default().width = width;
        self.history
            .push(UndoOp::SetColumnWidth { col, old }, target, clear_redos);
        self.has_changes = true;
        Ok(())
    }

    fn set_column_precision_impl(
        &mut self,
        col: u16,
        precision: u8,
        target: Target,
        clear_redos: bool,
    ) -> Result<(), SheetError> {
        let old = self.column_at(col).precision;
        if precision == old {
            return Ok(());
        }
        self.history.reserve(target)?;
        self.columns.entry(col).or_default().precision = precision;
        self.history.push(
            UndoOp::SetColumnPrecision { col, old },
            target,
            clear_redos,
        );
        self.has_changes = true;
        Ok(())
    }

    /// The display width column `col` needs so no cached value is
    /// truncated, rendered at `precision` decimals, capped at `cap`.
    #[must_use]
    pub fn width_needed_for_column(&self, col: u16, precision: u8, cap: u16) -> u16 {
        let band = Range::new(Pos::new(col, 0), Pos::new(col, u16::MAX));
        let mut needed = Column::MIN_WIDTH;
        for pos in self.live.live_in(band) {
            let Some(cell) = self.cells.get(&pos) else {
                continue;
            };
            let chars = match &cell.value {
                Value::Number(n) => format!("{:.*}", precision as usize, n).chars().count(),
                Value::Text(s) => s.chars().count(),
                Value::Error(e) => e.as_code().len(),
            };
            needed = needed.max(chars.min(cap as usize) as u16);
        }
        needed.min(cap.max(Column::MIN_WIDTH))
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Re-evaluate everything affected by the queued assignments and
    /// deletions. Runs iff the queue is non-empty.
    ///
    /// Phase one marks every transitive dependent of the queued positions
    /// dirty; phase two drains the queue, evaluating on demand and feeding
    /// newly-satisfied dirty dependents back onto it. Afterwards no cell is
    /// `Dirty`, `Enqueued`, or `Computing`.
    pub fn update(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        tracing::debug!(queued = self.queue.len(), "update");

        let roots: Vec<Pos> = self.queue.iter().copied().collect();
        for pos in roots {
            self.mark_dependents_dirty(pos);
        }

        while let Some(pos) = self.queue.pop_front() {
            self.eval_cell(pos);
        }
    }

    /// All live positions that directly depend on `of`.
    fn dependent_positions(&self, of: Pos) -> Vec<Pos> {
        let mut out = Vec::new();
        for (_, dependents) in self.deps.search_point(of) {
            for dep_range in dependents.iter() {
                out.extend(self.live.live_in(*dep_range));
            }
        }
        out
    }

    fn mark_dependents_dirty(&mut self, origin: Pos) {
        let mut work = vec![origin];
        while let Some(p) = work.pop() {
            for q in self.dependent_positions(p) {
                if let Some(cell) = self.cells.get_mut(&q) {
                    // Dirty cells were already walked; enqueued cells are
                    // roots of their own propagation.
                    if cell.state == CellState::UpToDate {
                        cell.state = CellState::Dirty;
                        work.push(q);
                    }
                }
            }
        }
    }

    /// Evaluate the cell at `pos`, memoized through its state field.
    ///
    /// Returns `None` when no cell exists there (the dependents still get
    /// woken, which is how deletions ripple). A `Computing` cell resolves
    /// to `CyclicalReference` without touching its state; the cells on the
    /// cycle cache the error as their own evaluation fails.
    fn eval_cell(&mut self, pos: Pos) -> Option<Value> {
        let Some(cell) = self.cells.get_mut(&pos) else {
            self.enqueue_dirty_dependents(pos);
            return None;
        };
        match cell.state {
            CellState::UpToDate => return Some(cell.value.clone()),
            CellState::Computing => {
                return Some(Value::Error(ErrorKind::CyclicalReference))
            }
            CellState::Dirty | CellState::Enqueued => {}
        }
        cell.state = CellState::Computing;
        let expr = cell.expr.clone();
        let pool = self.strings.get(&pos).cloned().unwrap_or_default();

        let result = evaluate(&expr, &pool, &mut Resolver { sheet: self });
        let value = match result {
            Ok(v) => v,
            Err(e) => Value::Error(e),
        };

        let cell = self
            .cells
            .get_mut(&pos)
            .expect("cells are not removed during evaluation");
        cell.value = value.clone();
        cell.state = CellState::UpToDate;
        self.enqueue_dirty_dependents(pos);
        Some(value)
    }

    fn enqueue_dirty_dependents(&mut self, pos: Pos) {
        for q in self.dependent_positions(pos) {
            if let Some(cell) = self.cells.get_mut(&q) {
                if cell.state == CellState::Dirty {
                    cell.state = CellState::Enqueued;
                    self.queue.push_back(q);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Undo / redo
    // ------------------------------------------------------------------

    /// Mark the end of the current undo group. Idempotent; every user
    /// action ends with exactly one terminator.
    pub fn end_undo_group(&mut self) {
        self.history.undo.mark_group_end();
    }

    /// Roll back the most recent undo group. No-op on an empty log.
    pub fn undo(&mut self) -> Result<(), SheetError> {
        if self.history.undo.is_empty() {
            return Ok(());
        }
        tracing::debug!("undo");
        self.history.undo.unmark_top();

        let mut result = Ok(());
        while !self.history.undo.is_empty() && !self.history.undo.top_is_group_end() {
            let op = self.history.undo.pop().expect("log is non-empty");
            if let Err(e) = self.apply_inverse(op, Target::Redo) {
                result = Err(e);
                break;
            }
        }
        self.history.redo.mark_group_end();
        result
    }

    /// Re-apply the most recently undone group. No-op on an empty log.
    pub fn redo(&mut self) -> Result<(), SheetError> {
        if self.history.redo.is_empty() {
            return Ok(());
        }
        tracing::debug!("redo");
        self.history.redo.unmark_top();

        let mut result = Ok(());
        while !self.history.redo.is_empty() && !self.history.redo.top_is_group_end() {
            let op = self.history.redo.pop().expect("log is non-empty");
            if let Err(e) = self.apply_inverse(op, Target::Undo) {
                result = Err(e);
                break;
            }
        }
        self.history.undo.mark_group_end();
        result
    }

    /// Execute an entry's inverse, emitting the symmetric entries onto
    /// `target` through the normal mutation paths.
    fn apply_inverse(&mut self, op: UndoOp, target: Target) -> Result<(), SheetError> {
        match op {
            UndoOp::SetCell { pos, handle } => {
                let Some(archived) = self.history.arena.take(handle) else {
                    debug_assert!(false, "dangling arena handle");
                    return Ok(());
                };
                self.insert_impl(pos, archived.expr, archived.pool, target, false)
            }
            UndoOp::DeleteCell { pos } => self.delete_impl(pos, target, false),
            UndoOp::SetColumnWidth { col, old } => {
                self.set_column_width_impl(col, old, target, false)
            }
            UndoOp::SetColumnPrecision { col, old } => {
                self.set_column_precision_impl(col, old, target, false)
            }
        }
    }

    // ------------------------------------------------------------------
    // Consistency checks (exercised by the test suite)
    // ------------------------------------------------------------------

    /// Asserts the cross-structure invariants: store key order, exact
    /// dependent-index membership, and live-index mirroring.
    pub fn verify_integrity(&self) {
        let mut prev: Option<u32> = None;
        for pos in self.cells.keys() {
            let h = pos.hash();
            if let Some(p) = prev {
                assert!(h > p, "cell store keys out of order");
            }
            prev = Some(h);
        }

        for (pos, cell) in &self.cells {
            let me = Range::point(*pos);
            let mut seen: Vec<Range> = Vec::new();
            for r in cell.expr.referenced_ranges() {
                if seen.contains(&r) {
                    continue;
                }
                seen.push(r);
                let deps = self
                    .deps
                    .get(r)
                    .unwrap_or_else(|| panic!("missing dependent entry for {r}"));
                let occurrences = deps.iter().filter(|d| **d == me).count();
                assert_eq!(occurrences, 1, "dependent entry for {pos} under {r}");
            }
        }

        assert_eq!(self.live.len(), self.cells.len(), "live index size");
        for pos in self.cells.keys() {
            assert!(self.live.contains(*pos), "cell {pos} missing from live index");
        }
    }
}

fn distinct_ranges(expr: &Expr) -> Result<Vec<Range>, SheetError> {
    let mut out: Vec<Range> = Vec::new();
    out.try_reserve(expr.referenced_ranges().count())?;
    for r in expr.referenced_ranges() {
        if !out.contains(&r) {
            out.push(r);
        }
    }
    Ok(out)
}

/// The evaluation context handed to expressions: resolution recurses into
/// [`Sheet::eval_cell`], which is the on-demand half of the engine.
struct Resolver<'a> {
    sheet: &'a mut Sheet,
}

impl EvalContext for Resolver<'_> {
    fn resolve(&mut self, pos: Pos) -> Option<Value> {
        self.sheet.eval_cell(pos)
    }

    fn live_in(&mut self, range: Range) -> Vec<Pos> {
        self.sheet.live.live_in(range).collect()
    }
}
