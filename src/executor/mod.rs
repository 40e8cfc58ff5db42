//! Executor (spec.md §3.7, §4.8, layer G): a `Program` of id-addressed
//! iterator/action nodes, executed either as a flat list (V2, primary) or
//! a recursive relation tree (V1), with a cooperative worker pool for
//! parallel sections and a stable class-ID table for serialization.
//! Grounded on the teacher's `sql::executor::{from, join, select,
//! expr_state}` and `sequential_scan.rs`/top-level `operator.rs`/
//! `predicate.rs` — the only layer with no single teacher module to
//! generalize directly, since the teacher's executor is a fixed SQL
//! pipeline rather than a serializable program.

pub mod action;
pub mod archive;
pub mod class_id;
pub mod iterator;
pub mod predicate;
pub mod program;
pub mod worker_pool;

pub use action::{Action, Flow};
pub use archive::{ArchiveReader, ArchiveWriter};
pub use class_id::ClassId;
pub use iterator::{
    build_iterator, ExecContext, ExecIterator, FilterIterator, IndexProbeIterator, Row, RowBuffers, RowSource, TableScanIterator,
};
pub use predicate::{CompareOp, Predicate};
pub use program::{IteratorId, IteratorNode, Program};
pub use worker_pool::{parallel, row_channel};
