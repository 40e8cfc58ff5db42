//! B-tree 2 index driver (spec.md §4.5): one header page, node + leaf pages
//! with packed entries, separate "real key" and "row id" comparators for
//! unique vs non-unique indexes. Grounded on the teacher's
//! `btree::table::{insert, delete}` split/merge logic
//! (`examples/small-db-small-db/src/btree/table/insert.rs`), generalized
//! from hard-coded integer keys to `Compare`-based composite-key ordering
//! and factored, with the array-index driver, over the shared node engine
//! in `index::engine`.
//!
//! Simplification (recorded in DESIGN.md): the teacher's split logic moves
//! exactly half a leaf's tuples to a new right sibling; this driver keeps
//! that shape but does not implement borrow-from-sibling on underflow after
//! delete — an underfull node is left in place rather than merged. Spec.md
//! §8's testable properties don't require tree balance, only that search,
//! insert, and delete observe the `Compare` ordering correctly.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use crate::buffer_pool::{BufferPool, FileId, FixMode, FixOptions};
use crate::error::EngineResult;
use crate::index::{CompositeKey, TreeSlot};

use super::engine::TreeStore;
use super::HeaderPage;

/// A B-tree index over one physical file. `unique` is `false` for
/// non-unique indexes, where the row id is appended as a secondary sort key
/// so duplicate real keys still have a total order (spec.md §4.5).
pub struct BTreeIndex {
    pool: Arc<BufferPool>,
    file: FileId,
    field_count: usize,
    unique: bool,
    next_page: AtomicU32,
}

impl BTreeIndex {
    pub fn create(pool: Arc<BufferPool>, file: FileId, field_count: usize, unique: bool) -> EngineResult<Self> {
        let mem = pool.fix(file, 0, FixMode::Allocate, FixOptions::default())?;
        let header = HeaderPage::new();
        mem.write(|buf| buf.copy_from_slice(&header.encode()))?;
        mem.touch(true);
        pool.unfix(mem, true, false)?;

        Ok(Self { pool, file, field_count, unique, next_page: AtomicU32::new(1) })
    }

    fn store(&self) -> TreeStore<'_> {
        TreeStore {
            pool: &self.pool,
            file: self.file,
            next_page: &self.next_page,
            field_count: self.field_count,
            unique: self.unique,
        }
    }

    fn read_header(&self) -> EngineResult<HeaderPage> {
        let mem = self.pool.fix(self.file, 0, FixMode::ReadOnly, FixOptions::default())?;
        let header = HeaderPage::decode(&mem.read());
        self.pool.unfix(mem, false, false)?;
        Ok(header)
    }

    fn write_header(&self, header: &HeaderPage) -> EngineResult<()> {
        let mem = self.pool.fix(self.file, 0, FixMode::Write, FixOptions::default())?;
        mem.write(|buf| buf.copy_from_slice(&header.encode()))?;
        mem.touch(true);
        self.pool.unfix(mem, true, false)
    }

    /// Insert `(key, row_id)`. Unique indexes reject an exact-key duplicate
    /// with `Unexpected` (spec.md §4.5 "unique" flag).
    pub fn insert(&self, key: CompositeKey, row_id: u32) -> EngineResult<()> {
        let mut header = self.read_header()?;
        let tree = self.store().insert(header.tree(TreeSlot::Data), key, row_id)?;
        header.set_tree(TreeSlot::Data, tree);
        header.set_tuple_count(header.tuple_count() + 1);
        self.write_header(&header)
    }

    /// Point lookup: returns every row id stored under `key` (non-unique
    /// indexes may have more than one).
    pub fn search(&self, key: &CompositeKey) -> EngineResult<Vec<u32>> {
        let header = self.read_header()?;
        self.store().search(header.tree(TreeSlot::Data), key)
    }

    /// Remove `(key, row_id)`. No-op if the exact pair is absent.
    pub fn delete(&self, key: &CompositeKey, row_id: u32) -> EngineResult<()> {
        let mut header = self.read_header()?;
        let before = header.tree(TreeSlot::Data).entry_count;
        let tree = self.store().delete(header.tree(TreeSlot::Data), key, row_id)?;
        let removed = tree.entry_count < before;
        header.set_tree(TreeSlot::Data, tree);
        if removed {
            header.set_tuple_count(header.tuple_count().saturating_sub(1));
        }
        self.write_header(&header)
    }

    /// Scan every `(key, row_id)` pair in order, left to right, by walking
    /// leaf `right` pointers from the tree's leftmost leaf.
    pub fn scan(&self) -> EngineResult<Vec<(CompositeKey, u32)>> {
        let header = self.read_header()?;
        self.store().scan(header.tree(TreeSlot::Data))
    }

    pub fn entry_count(&self) -> EngineResult<u32> {
        Ok(self.read_header()?.tree(TreeSlot::Data).entry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::{BufferPool, PageFile, PAGE_SIZE};
    use crate::error::ErrorKind;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemFile {
        pages: Mutex<HashMap<u32, Vec<u8>>>,
    }

    impl MemFile {
        fn new() -> Arc<Self> {
            Arc::new(Self { pages: Mutex::new(HashMap::new()) })
        }
    }

    impl PageFile for MemFile {
        fn read_page(&self, page_id: u32) -> EngineResult<Vec<u8>> {
            Ok(self.pages.lock().unwrap().get(&page_id).cloned().unwrap_or_else(|| vec![0u8; PAGE_SIZE]))
        }
        fn write_page(&self, page_id: u32, data: &[u8]) -> EngineResult<()> {
            self.pages.lock().unwrap().insert(page_id, data.to_vec());
            Ok(())
        }
    }

    fn key(v: &[u8]) -> CompositeKey {
        CompositeKey::new(vec![Some(v.to_vec())])
    }

    fn index(unique: bool) -> BTreeIndex {
        let pool = BufferPool::new(4096);
        pool.register_file(FileId(0), MemFile::new());
        BTreeIndex::create(pool, FileId(0), 1, unique).unwrap()
    }

    #[test]
    fn insert_then_search_finds_row_id() {
        let idx = index(true);
        idx.insert(key(b"apple"), 1).unwrap();
        idx.insert(key(b"banana"), 2).unwrap();
        assert_eq!(idx.search(&key(b"apple")).unwrap(), vec![1]);
        assert_eq!(idx.search(&key(b"banana")).unwrap(), vec![2]);
        assert!(idx.search(&key(b"cherry")).unwrap().is_empty());
    }

    #[test]
    fn unique_index_rejects_duplicate_key() {
        let idx = index(true);
        idx.insert(key(b"apple"), 1).unwrap();
        let err = idx.insert(key(b"apple"), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn non_unique_index_keeps_all_row_ids() {
        let idx = index(false);
        idx.insert(key(b"apple"), 1).unwrap();
        idx.insert(key(b"apple"), 2).unwrap();
        let mut found = idx.search(&key(b"apple")).unwrap();
        found.sort();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn many_inserts_trigger_split_and_scan_stays_sorted() {
        let idx = index(true);
        let mut keys: Vec<u32> = (0..500).collect();
        for &k in &keys {
            idx.insert(key(&k.to_le_bytes()), k).unwrap();
        }
        let scanned = idx.scan().unwrap();
        assert_eq!(scanned.len(), 500);
        keys.sort_by_key(|k| k.to_le_bytes());
        let scanned_keys: Vec<Vec<u8>> = scanned.iter().map(|(k, _)| k.fields()[0].clone().unwrap()).collect();
        let expected: Vec<Vec<u8>> = keys.iter().map(|k| k.to_le_bytes().to_vec()).collect();
        assert_eq!(scanned_keys, expected);
    }

    #[test]
    fn delete_removes_entry() {
        let idx = index(true);
        idx.insert(key(b"apple"), 1).unwrap();
        idx.delete(&key(b"apple"), 1).unwrap();
        assert!(idx.search(&key(b"apple")).unwrap().is_empty());
        assert_eq!(idx.entry_count().unwrap(), 0);
    }
}
