//! Transaction status and dirty-page bookkeeping (spec.md §4.3), generalized
//! from the teacher's `ConcurrentStatus`. Owns the `LockTable` so lock
//! acquisition, dirty-page tracking, and transaction status all serialize
//! through one `Database`-held mutex.

use std::collections::{HashMap, HashSet};

use crate::buffer_pool::PageKey;

use super::lock_table::{LockTable, Mode, ResourceId};
use super::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    Aborted,
}

pub struct TransactionManager {
    lock_table: LockTable,
    status: HashMap<TransactionId, TransactionStatus>,
    dirty_pages: HashMap<TransactionId, HashSet<PageKey>>,
    cancelled: HashSet<TransactionId>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            lock_table: LockTable::new(),
            status: HashMap::new(),
            dirty_pages: HashMap::new(),
            cancelled: HashSet::new(),
        }
    }

    pub fn begin(&mut self, tx: TransactionId) {
        self.status.insert(tx, TransactionStatus::Active);
    }

    pub fn status(&self, tx: TransactionId) -> Option<TransactionStatus> {
        self.status.get(&tx).copied()
    }

    pub fn set_status(&mut self, tx: TransactionId, status: TransactionStatus) {
        self.status.insert(tx, status);
    }

    pub fn mark_dirty(&mut self, tx: TransactionId, page: PageKey) {
        self.dirty_pages.entry(tx).or_insert_with(HashSet::new).insert(page);
    }

    pub fn dirty_pages(&self, tx: TransactionId) -> HashSet<PageKey> {
        self.dirty_pages.get(&tx).cloned().unwrap_or_default()
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.lock_table
    }

    pub fn lock_table_mut(&mut self) -> &mut LockTable {
        &mut self.lock_table
    }

    /// Remove every trace of `tx`: locks, dirty-page set. Called at commit
    /// and abort once pages have been flushed or discarded.
    pub fn forget(&mut self, tx: TransactionId) {
        self.lock_table.release_all(tx);
        self.dirty_pages.remove(&tx);
        self.cancelled.remove(&tx);
    }

    pub fn clear(&mut self) {
        self.lock_table = LockTable::new();
        self.status.clear();
        self.dirty_pages.clear();
        self.cancelled.clear();
    }

    /// `Transaction::cancel()` (spec.md §5): subsequent `CheckCancel`
    /// actions observe this and return `Break`, dropping iterators via RAII
    /// guards. There is no forced interrupt; in-flight blocking calls run
    /// to completion.
    pub fn cancel(&mut self, tx: TransactionId) {
        self.cancelled.insert(tx);
    }

    pub fn is_cancelled(&self, tx: TransactionId) -> bool {
        self.cancelled.contains(&tx)
    }

    /// `expungeConstraintLockEntry` (spec.md §4.3): try to take an
    /// exclusive, pulse-duration lock on every resource in `resources`
    /// without blocking. If *all* succeed, the caller may clear the
    /// sub-file; the locks are Pulse-duration, so the caller releases them
    /// right after. On any failure, every lock already taken here is
    /// released immediately and the operation aborts with no side effects.
    pub fn try_clear_subfile(&mut self, tx: TransactionId, resources: &[ResourceId]) -> bool {
        let mut acquired = Vec::new();
        for &resource in resources {
            if self.lock_table.try_acquire(tx, resource, Mode::Exclusive) {
                acquired.push(resource);
            } else {
                for r in &acquired {
                    self.lock_table.release(tx, r);
                }
                return false;
            }
        }
        true
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
