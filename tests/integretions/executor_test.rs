//! End-to-end: a B-tree-backed table scan, filtered and projected through
//! a `Program`, inside a committed transaction. Mirrors the teacher's
//! `tests/integretions/btree_test.rs` style (a fresh tempdir-rooted
//! `Database` per test, real buffer pool, real index driver).

use std::sync::Arc;

use tempfile::tempdir;

use storage_core::buffer_pool::FileId;
use storage_core::config::EngineConfig;
use storage_core::database::Database;
use storage_core::executor::{
    Action, CompareOp, FilterIterator, IteratorNode, Predicate, Program, Row, RowSource, TableScanIterator,
};
use storage_core::index::{BTreeIndex, CompositeKey};
use storage_core::storage::PhysicalFile;
use storage_core::txn::Transaction;
use storage_core::EngineResult;

const ROWS_FILE: FileId = FileId(50);

struct BTreeRowSource {
    index: Arc<BTreeIndex>,
}

impl RowSource for BTreeRowSource {
    fn scan(&self) -> EngineResult<Vec<Row>> {
        Ok(self.index.scan()?.into_iter().map(|(key, _row_id)| key).collect())
    }
}

#[test]
fn scan_filter_project_over_a_committed_btree_index() {
    let dir = tempdir().unwrap();
    let db = Database::init_at(dir.path().to_path_buf(), EngineConfig::default()).unwrap();

    let rows_file = Arc::new(PhysicalFile::open(dir.path().join("rows.idx")).unwrap());
    db.buffer_pool().register_file(ROWS_FILE, rows_file);

    let index = Arc::new(BTreeIndex::create(Arc::clone(db.buffer_pool()), ROWS_FILE, 2, false).unwrap());

    let tx = Transaction::begin().unwrap();
    for age in [15u8, 22, 30, 41, 58] {
        let key = CompositeKey::new(vec![Some(vec![age]), Some(format!("person-{}", age).into_bytes())]);
        index.insert(key, age as u32).unwrap();
    }

    let mut program = Program::new(tx);
    let scan = TableScanIterator::new(Arc::new(BTreeRowSource { index: Arc::clone(&index) }));
    let adult_only = FilterIterator::new(
        Box::new(scan),
        Predicate::Compare { field: 0, op: CompareOp::Ge, value: Some(vec![18]) },
    );
    program.add_node(
        0,
        IteratorNode {
            iterator: Box::new(adult_only),
            children: Vec::new(),
            actions: vec![Action::CheckCancel, Action::Project { fields: vec![1] }],
        },
    );
    program.add_root(0);
    program.initialize().unwrap();

    let out = program.execute_v2(0).unwrap();
    let names: Vec<Vec<u8>> = out.into_iter().map(|row| row.fields()[0].clone().unwrap()).collect();
    assert_eq!(
        names,
        vec![
            b"person-22".to_vec(),
            b"person-30".to_vec(),
            b"person-41".to_vec(),
            b"person-58".to_vec(),
        ]
    );

    program.tx().commit().unwrap();
}
