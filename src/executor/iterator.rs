//! Iterator nodes (spec.md §3.7, §4.8). The variant set here is open — new
//! index drivers contribute their own scan/probe iterators — so this is a
//! trait object boundary rather than a tagged enum (spec.md §9 Design
//! Notes), grounded on the teacher's `SequentialScan`
//! (`src/sequential_scan.rs`) generalized from a hard-coded heap-page walk
//! to a pluggable `RowSource`, and on `sql::executor::join`/`from.rs` for
//! the filter/probe shapes layered on top.

use std::sync::{Arc, Mutex};

use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};
use crate::index::{BTreeIndex, CompositeKey};
use crate::txn::Transaction;

use super::archive::{ArchiveReader, ArchiveWriter};
use super::class_id::{ClassId, CLASS_FILTER, CLASS_INDEX_PROBE, CLASS_TABLE_SCAN};
use super::predicate::Predicate;

pub type Row = CompositeKey;

/// Execution context threaded through every iterator call: the owning
/// transaction (for `CheckCancel`) and the V2 shared row buffers later
/// iterators read from (spec.md §4.8: "iterators publish rows to shared
/// buffers referenced by later iterators").
pub struct ExecContext<'a> {
    pub tx: &'a Transaction,
    pub buffers: &'a RowBuffers,
}

/// Named shared buffers a V2 program's iterators publish into and read
/// from, keyed by the publishing iterator's id.
#[derive(Default)]
pub struct RowBuffers {
    slots: Mutex<std::collections::HashMap<u32, Vec<Row>>>,
}

impl RowBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, iterator_id: u32, row: Row) {
        self.slots.lock().unwrap().entry(iterator_id).or_insert_with(Vec::new).push(row);
    }

    pub fn take(&self, iterator_id: u32) -> Vec<Row> {
        self.slots.lock().unwrap().remove(&iterator_id).unwrap_or_default()
    }
}

/// Provides rows to a `TableScanIterator`; implemented by whatever storage
/// backs a table (an index scan, a heap file, a materialized batch).
/// Trait boundary rather than a concrete type because the executor must
/// not know which index driver produced the rows (spec.md §4.8).
pub trait RowSource: Send + Sync {
    fn scan(&self) -> EngineResult<Vec<Row>>;
}

/// The V2 node contract: `start_up` runs once, `next` drives the iteration
/// loop, `finish` runs once (spec.md §4.8 table). V1's relation-tree wraps
/// the same trait recursively (see `program.rs`).
pub trait ExecIterator: Send {
    fn class_id(&self) -> ClassId;
    fn start_up(&mut self, ctx: &ExecContext) -> EngineResult<()>;
    fn next(&mut self, ctx: &ExecContext) -> EngineResult<Option<Row>>;
    fn finish(&mut self, ctx: &ExecContext) -> EngineResult<()>;

    /// Writes this node's per-class payload, following its class ID
    /// (written by the caller — `Program::serialize`) per spec.md §4.8
    /// "Serialization". Implementors that wrap another iterator recurse by
    /// writing the child's class ID followed by its own payload.
    fn serialize_payload(&self, out: &mut ArchiveWriter) -> EngineResult<()>;
}

/// A `RowSource` that simply replays a fixed, already-materialized row set.
/// Reconstructed table scans deserialize into this rather than the original
/// (unserializable) source, since the scan was already baked into the
/// payload at serialization time.
struct MaterializedRows(Vec<Row>);

impl RowSource for MaterializedRows {
    fn scan(&self) -> EngineResult<Vec<Row>> {
        Ok(self.0.clone())
    }
}

fn write_rows(out: &mut ArchiveWriter, rows: &[Row]) {
    out.put_u32(rows.len() as u32);
    for row in rows {
        let fields = row.fields();
        out.put_u32(fields.len() as u32);
        for field in fields {
            out.put_opt_bytes(field.as_deref());
        }
    }
}

fn read_rows(reader: &mut ArchiveReader) -> EngineResult<Vec<Row>> {
    let row_count = reader.get_u32()?;
    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let field_count = reader.get_u32()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(reader.get_opt_bytes()?);
        }
        rows.push(CompositeKey::new(fields));
    }
    Ok(rows)
}

/// Reconstructs an iterator node from a class ID and its payload (spec.md
/// §9: "a per-iterator class ID table supports serialization; dispatch on
/// the ID resolves the constructor"). `TableScanIterator` and
/// `FilterIterator` are self-contained and always reconstructible;
/// `IndexProbeIterator` closes over a live index handle that only the
/// catalog can resolve, so this default dispatcher rejects it.
pub fn build_iterator(class_id: ClassId, reader: &mut ArchiveReader) -> EngineResult<Box<dyn ExecIterator>> {
    match class_id {
        CLASS_TABLE_SCAN => {
            let rows = read_rows(reader)?;
            Ok(Box::new(TableScanIterator::new(Arc::new(MaterializedRows(rows)))))
        }
        CLASS_FILTER => {
            let inner_class = ClassId(reader.get_u16()?);
            let inner = build_iterator(inner_class, reader)?;
            let predicate = Predicate::deserialize(reader)?;
            Ok(Box::new(FilterIterator::new(inner, predicate)))
        }
        CLASS_INDEX_PROBE => Err(engine_err!(
            ErrorKind::Unexpected,
            "index-probe iterators close over a live index handle and cannot be reconstructed from a payload alone"
        )),
        other => Err(engine_err!(ErrorKind::Unexpected, "no constructor registered for iterator class id {}", other.0)),
    }
}

/// Wraps a `RowSource` (spec.md's "file accesses" action), fully
/// materializing on `start_up` — matching the teacher's
/// `SequentialScan::new`, which loads a page's rows up front.
pub struct TableScanIterator {
    source: Arc<dyn RowSource>,
    rows: Vec<Row>,
    index: usize,
}

impl TableScanIterator {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self { source, rows: Vec::new(), index: 0 }
    }
}

impl ExecIterator for TableScanIterator {
    fn class_id(&self) -> ClassId {
        CLASS_TABLE_SCAN
    }

    fn start_up(&mut self, _ctx: &ExecContext) -> EngineResult<()> {
        self.rows = self.source.scan()?;
        self.index = 0;
        Ok(())
    }

    fn next(&mut self, _ctx: &ExecContext) -> EngineResult<Option<Row>> {
        if self.index >= self.rows.len() {
            return Ok(None);
        }
        let row = self.rows[self.index].clone();
        self.index += 1;
        Ok(Some(row))
    }

    fn finish(&mut self, _ctx: &ExecContext) -> EngineResult<()> {
        self.rows.clear();
        Ok(())
    }

    /// Re-runs the source scan and bakes the resulting rows straight into
    /// the payload, since an arbitrary `RowSource` is not itself
    /// serializable (spec.md §4.8: the scan "fully materializes on
    /// `start_up`" — serialization just captures that same snapshot).
    fn serialize_payload(&self, out: &mut ArchiveWriter) -> EngineResult<()> {
        let rows = self.source.scan()?;
        write_rows(out, &rows);
        Ok(())
    }
}

/// Filters an inner iterator's rows through a predicate (spec.md's
/// "predicates" action, wired as an iterator stage per the V2 model).
pub struct FilterIterator {
    inner: Box<dyn ExecIterator>,
    predicate: Predicate,
}

impl FilterIterator {
    pub fn new(inner: Box<dyn ExecIterator>, predicate: Predicate) -> Self {
        Self { inner, predicate }
    }
}

impl ExecIterator for FilterIterator {
    fn class_id(&self) -> ClassId {
        CLASS_FILTER
    }

    fn start_up(&mut self, ctx: &ExecContext) -> EngineResult<()> {
        self.inner.start_up(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> EngineResult<Option<Row>> {
        while let Some(row) = self.inner.next(ctx)? {
            if self.predicate.eval(&row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn finish(&mut self, ctx: &ExecContext) -> EngineResult<()> {
        self.inner.finish(ctx)
    }

    fn serialize_payload(&self, out: &mut ArchiveWriter) -> EngineResult<()> {
        out.put_u16(self.inner.class_id().0);
        self.inner.serialize_payload(out)?;
        self.predicate.serialize(out);
        Ok(())
    }
}

/// Probes a B-tree index for an exact key (spec.md §4.8 "index accesses"),
/// grounded on `sql::executor::join`'s nested-loop probe but retargeted at
/// this engine's `BTreeIndex::search`.
pub struct IndexProbeIterator {
    index: Arc<BTreeIndex>,
    key: CompositeKey,
    row_ids: std::vec::IntoIter<u32>,
    started: bool,
}

impl IndexProbeIterator {
    pub fn new(index: Arc<BTreeIndex>, key: CompositeKey) -> Self {
        Self { index, key, row_ids: Vec::new().into_iter(), started: false }
    }
}

impl ExecIterator for IndexProbeIterator {
    fn class_id(&self) -> ClassId {
        CLASS_INDEX_PROBE
    }

    fn start_up(&mut self, _ctx: &ExecContext) -> EngineResult<()> {
        let ids = self.index.search(&self.key)?;
        self.row_ids = ids.into_iter();
        self.started = true;
        Ok(())
    }

    fn next(&mut self, _ctx: &ExecContext) -> EngineResult<Option<Row>> {
        Ok(self.row_ids.next().map(|row_id| CompositeKey::new(vec![Some(row_id.to_le_bytes().to_vec())])))
    }

    fn finish(&mut self, _ctx: &ExecContext) -> EngineResult<()> {
        self.started = false;
        Ok(())
    }

    /// Only the probe key is self-contained; the index handle itself must
    /// be resolved by a catalog-aware caller on deserialize (see
    /// `build_iterator`).
    fn serialize_payload(&self, out: &mut ArchiveWriter) -> EngineResult<()> {
        write_rows(out, std::slice::from_ref(&self.key));
        Ok(())
    }
}
