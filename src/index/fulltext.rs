//! Full-text 2 index driver (spec.md §4.5): inverted lists with optional
//! position data, external score calculators (a narrow trait boundary —
//! the actual ranking functions are an out-of-scope collaborator loaded by
//! dynamic library per spec.md §1), and a white-list filter that
//! intersects a list iterator with a `BitSet` of permitted doc ids.
//!
//! No direct teacher counterpart (small-db has no text index); grounded on
//! the shared `Compare`/sorted-merge style already used by `index::engine`
//! and on the white-list iterator semantics spelled out verbatim in
//! spec.md §4.5 and tested against end-to-end scenario 5 (§8).

use std::collections::HashMap;

pub type DocId = u32;

/// Sentinel terminating a white list; guarantees `next()`/`lower_bound()`
/// terminate without explicit bounds checks (spec.md glossary).
pub const UNDEFINED_DOCUMENT_ID: DocId = DocId::MAX;

/// A narrow boundary onto the out-of-scope ranking-function plugin (spec.md
/// §1 "External score-calculator plugins"). The full-text driver calls this
/// to rank a hit; it never implements scoring itself.
pub trait ScoreCalculator: Send + Sync {
    fn score(&self, doc_id: DocId, positions: &[u32]) -> f64;
}

/// Forward iteration over a sorted sequence of doc ids, with optional
/// position data (spec.md §4.5 "inverted lists with optional position
/// data"). `current()` is `None` until the first `advance()`.
pub trait ListIterator {
    fn current(&self) -> Option<DocId>;
    /// Step to the next id; returns the new current (or `None` at the end).
    fn advance(&mut self) -> Option<DocId>;
    /// Advance to the first id `>= target`, without stepping past it.
    fn seek(&mut self, target: DocId) -> Option<DocId>;
    fn positions(&self) -> &[u32];
}

/// An in-memory posting list: one word's sorted doc ids, each optionally
/// carrying the word's positions within that document.
pub struct PostingList {
    ids: Vec<DocId>,
    positions: Vec<Vec<u32>>,
    pos: isize,
}

impl PostingList {
    pub fn new(entries: Vec<(DocId, Vec<u32>)>) -> Self {
        let mut entries = entries;
        entries.sort_by_key(|(id, _)| *id);
        let (ids, positions) = entries.into_iter().unzip();
        Self { ids, positions, pos: -1 }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl ListIterator for PostingList {
    fn current(&self) -> Option<DocId> {
        if self.pos < 0 {
            return None;
        }
        self.ids.get(self.pos as usize).copied()
    }

    fn advance(&mut self) -> Option<DocId> {
        self.pos += 1;
        self.current()
    }

    fn seek(&mut self, target: DocId) -> Option<DocId> {
        if self.pos < 0 {
            self.pos = 0;
        }
        while let Some(id) = self.current() {
            if id >= target {
                break;
            }
            self.pos += 1;
        }
        self.current()
    }

    fn positions(&self) -> &[u32] {
        if self.pos < 0 {
            &[]
        } else {
            self.positions.get(self.pos as usize).map(Vec::as_slice).unwrap_or(&[])
        }
    }
}

/// An inverted index: one `PostingList`-producing entry per distinct word.
#[derive(Default)]
pub struct InvertedIndex {
    lists: HashMap<String, Vec<(DocId, Vec<u32>)>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, word: &str, doc: DocId, position: u32) {
        let entries = self.lists.entry(word.to_string()).or_insert_with(Vec::new);
        match entries.iter_mut().find(|(id, _)| *id == doc) {
            Some((_, positions)) => positions.push(position),
            None => entries.push((doc, vec![position])),
        }
    }

    pub fn list(&self, word: &str) -> PostingList {
        PostingList::new(self.lists.get(word).cloned().unwrap_or_default())
    }
}

/// Filters a list iterator down to doc ids present in a permitted set
/// (spec.md §4.5 "White-list iterator semantics"). The set must be sorted
/// ascending and end with `UNDEFINED_DOCUMENT_ID`; `new` appends it if
/// missing.
pub struct WhiteListIterator<L: ListIterator> {
    list: L,
    set: Vec<DocId>,
    set_pos: usize,
}

impl<L: ListIterator> WhiteListIterator<L> {
    pub fn new(list: L, mut set: Vec<DocId>) -> Self {
        set.sort_unstable();
        if set.last().copied() != Some(UNDEFINED_DOCUMENT_ID) {
            set.push(UNDEFINED_DOCUMENT_ID);
        }
        Self { list, set, set_pos: 0 }
    }

    fn set_current(&self) -> DocId {
        self.set[self.set_pos]
    }

    /// Advance to ≥ `id`, then advance the set to ≥ the resulting list id;
    /// if the set skipped past, re-seek the list from the new position and
    /// repeat. At least one side strictly advances every iteration, so
    /// this always terminates (spec.md §4.5).
    pub fn lower_bound(&mut self, id: DocId) -> Option<DocId> {
        let mut list_id = self.list.seek(id)?;
        loop {
            while self.set_current() < list_id {
                self.set_pos += 1;
            }
            if self.set_current() == list_id {
                return Some(list_id);
            }
            if self.set_current() == UNDEFINED_DOCUMENT_ID {
                return None;
            }
            list_id = self.list.seek(self.set_current())?;
        }
    }

    /// Step the list forward; skip until the list id matches a set id. The
    /// sentinel guarantees termination without an explicit end-of-set
    /// check (spec.md §4.5).
    pub fn next(&mut self) -> Option<DocId> {
        let mut list_id = self.list.advance()?;
        loop {
            while self.set_current() < list_id {
                self.set_pos += 1;
            }
            if self.set_current() == list_id {
                return Some(list_id);
            }
            if self.set_current() == UNDEFINED_DOCUMENT_ID {
                return None;
            }
            list_id = self.list.advance()?;
        }
    }

    /// Deliberately does **not** consult the set (spec.md §4.5): the
    /// surrounding word-boundary probe this backs is only reached after a
    /// hit, by which point set filtering has already occurred upstream.
    /// Verify that precondition before reusing this in a new context
    /// (spec.md §9 Open Questions).
    pub fn find(&mut self, id: DocId) -> bool {
        self.list.seek(id) == Some(id)
    }

    pub fn current_positions(&self) -> &[u32] {
        self.list.positions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[u32]) -> PostingList {
        PostingList::new(ids.iter().map(|&id| (id, vec![])).collect())
    }

    // Scenario 5 (spec.md §8): list = [1,3,5,7,9], whiteList = {3,7,inf}.
    #[test]
    fn white_list_filters_to_permitted_ids_in_order() {
        let mut it = WhiteListIterator::new(list(&[1, 3, 5, 7, 9]), vec![3, 7]);
        assert_eq!(it.next(), Some(3));
        assert_eq!(it.next(), Some(7));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn lower_bound_finds_nearest_permitted_id_at_or_above_target() {
        let mut it = WhiteListIterator::new(list(&[1, 3, 5, 7, 9]), vec![3, 7]);
        assert_eq!(it.lower_bound(4), Some(7));
        assert_eq!(it.lower_bound(8), None);
    }

    #[test]
    fn find_does_not_consult_the_set() {
        let mut it = WhiteListIterator::new(list(&[1, 3, 5, 7, 9]), vec![3]);
        // 5 is absent from the white list, but find() only asks the
        // underlying list.
        assert!(it.find(5));
        assert!(!it.find(4));
    }

    #[test]
    fn next_emits_every_permitted_id_present_in_the_list() {
        let mut it = WhiteListIterator::new(list(&[2, 4, 6, 8, 10]), vec![4, 6, 8]);
        let mut seen = Vec::new();
        while let Some(id) = it.next() {
            seen.push(id);
        }
        assert_eq!(seen, vec![4, 6, 8]);
    }

    #[test]
    fn posting_list_tracks_positions_per_document() {
        let mut idx = InvertedIndex::new();
        idx.add("rust", 1, 0);
        idx.add("rust", 1, 5);
        idx.add("rust", 2, 1);

        let mut list = idx.list("rust");
        assert_eq!(list.advance(), Some(1));
        assert_eq!(list.positions(), &[0, 5]);
        assert_eq!(list.advance(), Some(2));
        assert_eq!(list.positions(), &[1]);
    }
}
