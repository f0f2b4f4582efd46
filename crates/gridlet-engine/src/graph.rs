//! The two spatial views the evaluation engine runs on: which cells depend
//! on a given range, and which cells exist at all.

use gridlet_model::{Pos, Range};
use smallvec::SmallVec;

use crate::error::SheetError;
use crate::rtree::{RTree, Search};

/// Node fan-out minimum shared by both indexes.
const FANOUT_MIN: usize = 4;

/// Ordered sequence of ranges depending on one precedent range.
///
/// Most precedent ranges have a handful of dependents, so the sequence is
/// inline up to four before spilling.
pub type Dependents = SmallVec<[Range; 4]>;

/// Maps a precedent range to the ordered sequence of ranges that must be
/// recomputed when any cell inside it changes.
///
/// One range key accumulates many distinct consumers: `put` on an existing
/// key appends rather than replaces, and removal is by `(key, value)` pair.
/// A key with no remaining dependents is dropped from the tree entirely.
#[derive(Debug, Default)]
pub struct DependentIndex {
    tree: RTree<Dependents, FANOUT_MIN>,
}

impl DependentIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct precedent ranges currently indexed.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }

    /// Register `dependent` as depending on `key`.
    pub fn put(&mut self, key: Range, dependent: Range) -> Result<(), SheetError> {
        if let Some(deps) = self.tree.get_mut(key) {
            deps.try_reserve(1)?;
            deps.push(dependent);
            return Ok(());
        }
        let mut deps = Dependents::new();
        deps.try_reserve(1)?;
        deps.push(dependent);
        self.tree.insert(key, deps)?;
        Ok(())
    }

    /// Bulk form of [`DependentIndex::put`].
    pub fn put_slice(&mut self, key: Range, dependents: &[Range]) -> Result<(), SheetError> {
        if dependents.is_empty() {
            return Ok(());
        }
        if let Some(deps) = self.tree.get_mut(key) {
            deps.try_reserve(dependents.len())?;
            deps.extend_from_slice(dependents);
            return Ok(());
        }
        let mut deps = Dependents::new();
        deps.try_reserve(dependents.len())?;
        deps.extend_from_slice(dependents);
        self.tree.insert(key, deps)?;
        Ok(())
    }

    /// Remove one occurrence of `dependent` under `key`; the key itself is
    /// removed once its sequence empties.
    ///
    /// Returns whether the pair was present.
    pub fn remove_value(&mut self, key: Range, dependent: Range) -> Result<bool, SheetError> {
        let Some(deps) = self.tree.get_mut(key) else {
            return Ok(false);
        };
        let Some(i) = deps.iter().position(|d| *d == dependent) else {
            return Ok(false);
        };
        deps.swap_remove(i);
        if deps.is_empty() {
            self.tree.remove(key)?;
        }
        Ok(true)
    }

    /// The dependents registered under exactly this key.
    #[must_use]
    pub fn get(&self, key: Range) -> Option<&Dependents> {
        self.tree.get(key)
    }

    /// Unordered scan of every `(precedent, dependents)` entry whose key
    /// intersects `query`.
    pub fn search(&self, query: Range) -> Search<'_, Dependents, FANOUT_MIN> {
        self.tree.search(query)
    }

    /// Entries whose precedent range covers the position `p`.
    pub fn search_point(&self, p: Pos) -> Search<'_, Dependents, FANOUT_MIN> {
        self.tree.search_point(p)
    }
}

/// Unit-payload index of the cell positions that currently exist.
///
/// Dependency propagation walks candidate positions produced by range-shaped
/// dependents; this index lets it skip the (possibly enormous) empty parts
/// of those ranges.
#[derive(Debug, Default)]
pub struct LiveIndex {
    tree: RTree<(), FANOUT_MIN>,
}

impl LiveIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn insert(&mut self, pos: Pos) -> Result<(), SheetError> {
        self.tree.insert(Range::point(pos), ())?;
        Ok(())
    }

    pub fn remove(&mut self, pos: Pos) -> Result<(), SheetError> {
        self.tree.remove(Range::point(pos))?;
        Ok(())
    }

    /// Whether a cell exists at `pos`.
    #[must_use]
    pub fn contains(&self, pos: Pos) -> bool {
        self.tree.get(Range::point(pos)).is_some()
    }

    /// The live positions inside `query`, in index (unordered) order.
    pub fn live_in(&self, query: Range) -> impl Iterator<Item = Pos> + '_ {
        self.tree.search(query).map(|(key, _)| key.tl)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn p(x: u16, y: u16) -> Pos {
        Pos::new(x, y)
    }

    fn r(x0: u16, y0: u16, x1: u16, y1: u16) -> Range {
        Range::new(p(x0, y0), p(x1, y1))
    }

    #[test]
    fn put_appends_to_an_existing_key() {
        let mut index = DependentIndex::new();
        let key = r(0, 0, 4, 0);
        index.put(key, Range::point(p(9, 0))).unwrap();
        index.put(key, Range::point(p(9, 1))).unwrap();
        index.put_slice(key, &[Range::point(p(9, 2))]).unwrap();

        assert_eq!(index.key_count(), 1);
        let (_, deps) = index.search_point(p(2, 0)).next().unwrap();
        assert_eq!(deps.len(), 3);
    }

    #[test]
    fn remove_value_drops_emptied_keys() {
        let mut index = DependentIndex::new();
        let key = r(0, 0, 4, 0);
        let a = Range::point(p(9, 0));
        let b = Range::point(p(9, 1));
        index.put(key, a).unwrap();
        index.put(key, b).unwrap();

        assert!(index.remove_value(key, a).unwrap());
        assert_eq!(index.key_count(), 1);
        assert!(index.remove_value(key, b).unwrap());
        assert_eq!(index.key_count(), 0);
        assert!(!index.remove_value(key, b).unwrap());
        assert_eq!(index.search_point(p(2, 0)).count(), 0);
    }

    #[test]
    fn search_sees_every_covering_key() {
        let mut index = DependentIndex::new();
        index.put(r(0, 0, 9, 9), Range::point(p(50, 0))).unwrap();
        index.put(r(5, 5, 5, 5), Range::point(p(51, 0))).unwrap();
        index.put(r(20, 20, 30, 30), Range::point(p(52, 0))).unwrap();

        let hits: Vec<Range> = index.search_point(p(5, 5)).map(|(k, _)| k).collect();
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&r(0, 0, 9, 9)));
        assert!(hits.contains(&r(5, 5, 5, 5)));
    }

    #[test]
    fn live_index_mirrors_membership() {
        let mut live = LiveIndex::new();
        for y in 0..10 {
            live.insert(p(0, y)).unwrap();
        }
        assert_eq!(live.len(), 10);
        assert!(live.contains(p(0, 3)));
        assert!(!live.contains(p(1, 3)));

        live.remove(p(0, 3)).unwrap();
        assert!(!live.contains(p(0, 3)));

        let mut inside: Vec<Pos> = live.live_in(r(0, 0, 0, 4)).collect();
        inside.sort();
        assert_eq!(inside, vec![p(0, 0), p(0, 1), p(0, 2), p(0, 4)]);
    }
}
