//! Array index driver (spec.md §4.5): one header page, three independent
//! tree headers, and a global tuple counter (spec.md §3.6). Unlike the
//! B-tree driver, which only ever touches `TreeSlot::Data`, the array index
//! routes each inserted value to one of three trees depending on its shape:
//! a plain scalar goes to `Data`, an explicit SQL NULL goes to `NullData`,
//! and an array-typed value goes to `NullArray` (the naming `spec.md` §3.6
//! gives as an example of why a header page owns *up to three* trees).
//! Shares the node-page engine with `btree.rs` (`index::engine`); the
//! three trees interleave pages in one file behind one page-id allocator,
//! since page ids only need to be unique, not grouped by tree.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use crate::buffer_pool::{BufferPool, FileId, FixMode, FixOptions};
use crate::error::EngineResult;
use crate::index::CompositeKey;

use super::engine::TreeStore;
use super::{HeaderPage, TreeSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayValueKind {
    Scalar,
    Null,
    Array,
}

impl ArrayValueKind {
    fn slot(self) -> TreeSlot {
        match self {
            ArrayValueKind::Scalar => TreeSlot::Data,
            ArrayValueKind::Null => TreeSlot::NullData,
            ArrayValueKind::Array => TreeSlot::NullArray,
        }
    }
}

pub struct ArrayIndex {
    pool: Arc<BufferPool>,
    file: FileId,
    field_count: usize,
    unique: bool,
    next_page: AtomicU32,
}

impl ArrayIndex {
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

    pub fn insert(&self, key: CompositeKey, row_id: u32, kind: ArrayValueKind) -> EngineResult<()> {
        let mut header = self.read_header()?;
        let slot = kind.slot();
        let tree = self.store().insert(header.tree(slot), key, row_id)?;
        header.set_tree(slot, tree);
        header.set_tuple_count(header.tuple_count() + 1);
        self.write_header(&header)
    }

    pub fn search(&self, key: &CompositeKey, kind: ArrayValueKind) -> EngineResult<Vec<u32>> {
        let header = self.read_header()?;
        self.store().search(header.tree(kind.slot()), key)
    }

    /// Search across all three trees — used when the caller doesn't know
    /// (or doesn't care) which shape produced a given key.
    pub fn search_any(&self, key: &CompositeKey) -> EngineResult<Vec<u32>> {
        let header = self.read_header()?;
        let store = self.store();
        let mut out = store.search(header.tree(TreeSlot::Data), key)?;
        out.extend(store.search(header.tree(TreeSlot::NullData), key)?);
        out.extend(store.search(header.tree(TreeSlot::NullArray), key)?);
        Ok(out)
    }

    pub fn delete(&self, key: &CompositeKey, row_id: u32, kind: ArrayValueKind) -> EngineResult<()> {
        let mut header = self.read_header()?;
        let slot = kind.slot();
        let before = header.tree(slot).entry_count;
        let tree = self.store().delete(header.tree(slot), key, row_id)?;
        let removed = tree.entry_count < before;
        header.set_tree(slot, tree);
        if removed {
            header.set_tuple_count(header.tuple_count().saturating_sub(1));
        }
        self.write_header(&header)
    }

    pub fn tuple_count(&self) -> EngineResult<u64> {
        Ok(self.read_header()?.tuple_count())
    }

    pub fn entry_count(&self, kind: ArrayValueKind) -> EngineResult<u32> {
        Ok(self.read_header()?.tree(kind.slot()).entry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::{BufferPool, PageFile, PAGE_SIZE};
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

    fn index() -> ArrayIndex {
        let pool = BufferPool::new(4096);
        pool.register_file(FileId(0), MemFile::new());
        ArrayIndex::create(pool, FileId(0), 1, false).unwrap()
    }

    #[test]
    fn scalar_and_null_values_land_in_separate_trees() {
        let idx = index();
        idx.insert(key(b"x"), 1, ArrayValueKind::Scalar).unwrap();
        idx.insert(key(b"x"), 2, ArrayValueKind::Null).unwrap();

        assert_eq!(idx.search(&key(b"x"), ArrayValueKind::Scalar).unwrap(), vec![1]);
        assert_eq!(idx.search(&key(b"x"), ArrayValueKind::Null).unwrap(), vec![2]);
        assert_eq!(idx.entry_count(ArrayValueKind::Scalar).unwrap(), 1);
        assert_eq!(idx.entry_count(ArrayValueKind::Null).unwrap(), 1);
    }

    #[test]
    fn search_any_merges_all_three_trees() {
        let idx = index();
        idx.insert(key(b"x"), 1, ArrayValueKind::Scalar).unwrap();
        idx.insert(key(b"x"), 2, ArrayValueKind::Array).unwrap();
        let mut found = idx.search_any(&key(b"x")).unwrap();
        found.sort();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn tuple_count_tracks_inserts_across_trees() {
        let idx = index();
        idx.insert(key(b"a"), 1, ArrayValueKind::Scalar).unwrap();
        idx.insert(key(b"b"), 2, ArrayValueKind::Null).unwrap();
        idx.insert(key(b"c"), 3, ArrayValueKind::Array).unwrap();
        assert_eq!(idx.tuple_count().unwrap(), 3);
    }

    #[test]
    fn delete_decrements_tuple_count() {
        let idx = index();
        idx.insert(key(b"a"), 1, ArrayValueKind::Scalar).unwrap();
        idx.delete(&key(b"a"), 1, ArrayValueKind::Scalar).unwrap();
        assert_eq!(idx.tuple_count().unwrap(), 0);
        assert!(idx.search(&key(b"a"), ArrayValueKind::Scalar).unwrap().is_empty());
    }
}
