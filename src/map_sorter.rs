//! Scratch space for deterministic serialization.
//!
//! Nested maps are sorted on one shared stack: each map pushes its entries,
//! sorts just that range, and pops it when done, so the stack only ever
//! holds the maps on the current path through the message tree.

use crate::base::{Extension, MessageValue};
use crate::map::{Map, compare_keys};

/// A sorted run of entries on the sorter's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SortedRange {
    start: usize,
    end: usize,
}

impl SortedRange {
    pub(crate) fn len(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Default)]
pub(crate) struct MapSorter {
    entries: Vec<(MessageValue, MessageValue)>,
    exts: Vec<&'static Extension>,
}

impl MapSorter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pushes the entries of `map` sorted by key.
    pub(crate) fn push_map(&mut self, map: &Map) -> SortedRange {
        let start = self.entries.len();
        self.entries.extend(map.iter());
        self.entries[start..].sort_unstable_by(|a, b| compare_keys(&a.0, &b.0));
        SortedRange {
            start,
            end: self.entries.len(),
        }
    }

    pub(crate) fn entries(&self, range: SortedRange) -> &[(MessageValue, MessageValue)] {
        &self.entries[range.start..range.end]
    }

    /// Pushes extension records sorted by field number.
    pub(crate) fn push_extensions(&mut self, exts: &'static [Extension]) -> SortedRange {
        let start = self.exts.len();
        self.exts.extend(exts.iter());
        self.exts[start..].sort_unstable_by_key(|e| e.extension().number());
        SortedRange {
            start,
            end: self.exts.len(),
        }
    }

    pub(crate) fn extensions(&self, range: SortedRange) -> &[&'static Extension] {
        &self.exts[range.start..range.end]
    }

    pub(crate) fn pop_map(&mut self, range: SortedRange) {
        debug_assert_eq!(range.end, self.entries.len());
        self.entries.truncate(range.start);
    }

    pub(crate) fn pop_extensions(&mut self, range: SortedRange) {
        debug_assert_eq!(range.end, self.exts.len());
        self.exts.truncate(range.start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::mini_table::CType;

    #[test]
    fn nested_ranges() {
        let arena = Arena::default();
        let outer = Map::new(&arena, CType::Int32, CType::Int32).unwrap();
        let inner = Map::new(&arena, CType::UInt64, CType::Bool).unwrap();
        for k in [5, -3, 9, 0] {
            outer.set(MessageValue::Int32(k), MessageValue::Int32(k * 2), &arena);
        }
        for k in [7u64, 1, 3] {
            inner.set(MessageValue::UInt64(k), MessageValue::Bool(true), &arena);
        }
        let mut sorter = MapSorter::new();
        let a = sorter.push_map(outer);
        let b = sorter.push_map(inner);
        let keys: Vec<_> = sorter.entries(b).iter().map(|e| e.0.as_u64().unwrap()).collect();
        assert_eq!(keys, vec![1, 3, 7]);
        sorter.pop_map(b);
        let keys: Vec<_> = sorter.entries(a).iter().map(|e| e.0.as_i32().unwrap()).collect();
        assert_eq!(keys, vec![-3, 0, 5, 9]);
        assert_eq!(a.len(), 4);
        sorter.pop_map(a);
        assert!(sorter.entries.is_empty());
    }
}
