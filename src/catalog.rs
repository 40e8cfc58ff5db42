//! Schema-object catalog (spec.md §4.6), merged from the teacher's
//! `common::catalog::Catalog` (table/schema lookup by id and name) and
//! `btree::catalog::Catalog` (the ObjectID-as-u32 convention), generalized
//! to an object-kind-agnostic registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer_pool::{BufferPool, FileId, PageKey};
use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};
use crate::sequence::{Sequence, SequenceHeader};

/// IDs below this are reserved for system catalog objects (the catalog's
/// own sequence page, the system schema table, ...); never minted to user
/// schema.
pub const SYSTEM_ID_BAND: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub const INVALID: ObjectId = ObjectId(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn is_system(self) -> bool {
        self.0 < SYSTEM_ID_BAND
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    BTreeIndex,
    ArrayIndex,
    FullTextIndex,
    Sequence,
}

#[derive(Debug, Clone)]
pub struct SchemaObject {
    pub id: ObjectId,
    pub name: String,
    pub kind: ObjectKind,
    pub root_page: PageKey,
}

/// The page the catalog's own id-minting sequence lives on. Reserved by
/// convention: file 0, page 0, inside whatever physical file backs the
/// database's system catalog.
const ID_SEQUENCE_PAGE: PageKey = PageKey { file: FileId(0), page_id: 0 };

pub struct Catalog {
    objects: HashMap<ObjectId, SchemaObject>,
    by_name: HashMap<String, ObjectId>,
    id_sequence: Sequence,
}

impl Catalog {
    pub fn new(pool: Arc<BufferPool>) -> EngineResult<Self> {
        let id_sequence = Sequence::open(
            pool,
            ID_SEQUENCE_PAGE,
            SequenceHeader {
                current: SYSTEM_ID_BAND as i64 - 1,
                min: 0,
                max: (u32::MAX - 1) as i64,
                step: 1,
                cycle: false,
                get_max: false,
            },
        )?;

        Ok(Self {
            objects: HashMap::new(),
            by_name: HashMap::new(),
            id_sequence,
        })
    }

    /// Mint the next never-reused object id (spec.md §4.6).
    pub fn mint_id(&mut self) -> EngineResult<ObjectId> {
        let value = self.id_sequence.next()?;
        Ok(ObjectId(value as u32))
    }

    /// After replaying the catalog from the log, push the minting sequence
    /// past the highest id ever seen, so no id is reused.
    pub fn reconcile_ids(&mut self, max_used: ObjectId) -> EngineResult<()> {
        if max_used.is_valid() {
            self.id_sequence.next_reconciled(max_used.0 as i64)?;
        }
        Ok(())
    }

    pub fn register(&mut self, object: SchemaObject) -> EngineResult<()> {
        if self.objects.contains_key(&object.id) {
            return Err(engine_err!(ErrorKind::Unexpected, "object id {:?} already registered", object.id));
        }
        if self.by_name.contains_key(&object.name) {
            return Err(engine_err!(ErrorKind::Unexpected, "object name '{}' already registered", object.name));
        }
        self.by_name.insert(object.name.clone(), object.id);
        self.objects.insert(object.id, object);
        Ok(())
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<SchemaObject> {
        let object = self.objects.remove(&id)?;
        self.by_name.remove(&object.name);
        Some(object)
    }

    pub fn get(&self, id: ObjectId) -> Option<&SchemaObject> {
        self.objects.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&SchemaObject> {
        self.by_name.get(name).and_then(|id| self.objects.get(id))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn persist(&self) -> EngineResult<()> {
        self.id_sequence.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::{BufferPool, FileId, PageFile, PAGE_SIZE};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex;

    struct MemFile {
        pages: Mutex<StdHashMap<u32, Vec<u8>>>,
    }

    impl MemFile {
        fn new() -> Arc<Self> {
            Arc::new(Self { pages: Mutex::new(StdHashMap::new()) })
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

    fn catalog() -> Catalog {
        let pool = BufferPool::new(8);
        pool.register_file(FileId(0), MemFile::new());
        Catalog::new(pool).unwrap()
    }

    #[test]
    fn minted_ids_start_past_system_band() {
        let mut cat = catalog();
        let id = cat.mint_id().unwrap();
        assert!(!id.is_system());
        assert_eq!(id.0, SYSTEM_ID_BAND);
    }

    #[test]
    fn minted_ids_never_repeat() {
        let mut cat = catalog();
        let a = cat.mint_id().unwrap();
        let b = cat.mint_id().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn register_and_lookup_by_name_and_id() {
        let mut cat = catalog();
        let id = cat.mint_id().unwrap();
        cat.register(SchemaObject {
            id,
            name: "users".into(),
            kind: ObjectKind::Table,
            root_page: PageKey { file: FileId(1), page_id: 0 },
        })
        .unwrap();

        assert!(cat.get(id).is_some());
        assert_eq!(cat.get_by_name("users").unwrap().id, id);
    }

    #[test]
    fn duplicate_name_registration_fails() {
        let mut cat = catalog();
        let id1 = cat.mint_id().unwrap();
        let id2 = cat.mint_id().unwrap();
        let root = PageKey { file: FileId(1), page_id: 0 };
        cat.register(SchemaObject { id: id1, name: "t".into(), kind: ObjectKind::Table, root_page: root }).unwrap();
        let err = cat.register(SchemaObject { id: id2, name: "t".into(), kind: ObjectKind::Table, root_page: root });
        assert!(err.is_err());
    }

    #[test]
    fn reconcile_jumps_past_max_used() {
        let mut cat = catalog();
        cat.reconcile_ids(ObjectId(5000)).unwrap();
        let id = cat.mint_id().unwrap();
        assert_eq!(id.0, 5001);
    }
}
