//! Transaction handle (spec.md §4.3), grounded on the teacher's
//! `transaction::tx::Transaction` commit/abort sequencing.

use core::fmt;

use super::lock_table::{acquire_blocking, LockTimeout, Mode, PollResult, ResourceId};
use super::manager::TransactionStatus;
use super::{next_transaction_id, TransactionId};
use crate::database::Database;
use crate::error::EngineResult;

/// Read/write semantics a transaction was opened with (spec.md §4.3). The
/// default build enables `ReadCommitted` per the teacher's Cargo feature
/// flags; the others are reachable via `Transaction::with_isolation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::ReadCommitted
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: TransactionId,
    isolation: IsolationLevel,
    /// Write transactions always read the latest version of a page;
    /// read-only transactions under `RepeatableRead`/`Serializable` read a
    /// snapshot instead (spec.md §4.3).
    update: bool,
}

impl Transaction {
    pub fn begin() -> EngineResult<Self> {
        Self::begin_with(IsolationLevel::default(), true)
    }

    pub fn begin_with(isolation: IsolationLevel, update: bool) -> EngineResult<Self> {
        let id = next_transaction_id();
        let tx = Self { id, isolation, update };

        Database::global().mut_log_manager().log_start(&tx)?;
        Database::global().mut_txn_manager().begin(id);

        Ok(tx)
    }

    /// Detached handle for log-format tests: skips `Database` registration
    /// entirely so the log manager can be exercised on its own.
    #[cfg(test)]
    pub fn begin_detached() -> Self {
        Self {
            id: next_transaction_id(),
            isolation: IsolationLevel::default(),
            update: true,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Readers in non-update transactions see a stable snapshot; updaters
    /// always see the latest version. `is_no_version` mirrors the source's
    /// `isNoVersion()`: true for `ReadUncommitted`, where index drivers must
    /// call an explicit page-level check instead of relying on MVCC.
    pub fn is_no_version(&self) -> bool {
        self.isolation == IsolationLevel::ReadUncommitted
    }

    pub fn sees_snapshot(&self) -> bool {
        !self.update && self.isolation != IsolationLevel::ReadUncommitted
    }

    /// Request cancellation (spec.md §5). Does not interrupt in-flight
    /// work; subsequent `CheckCancel` polls observe it.
    pub fn cancel(&self) {
        Database::global().mut_txn_manager().cancel(self.id);
    }

    pub fn is_cancelled(&self) -> bool {
        Database::global().txn_manager().is_cancelled(self.id)
    }

    /// Acquire a lock, blocking with polling up to `timeout`, checking for a
    /// wait-for cycle before every sleep (spec.md §4.2/§4.3/§5).
    pub fn lock(&self, resource: ResourceId, mode: Mode, timeout: LockTimeout) -> EngineResult<()> {
        acquire_blocking(
            || {
                let mut mgr = Database::global().mut_txn_manager();
                let table = mgr.lock_table_mut();
                if table.try_acquire(self.id, resource, mode) {
                    PollResult::Granted
                } else if let Some(cycle) = table.would_deadlock(self.id) {
                    PollResult::Deadlock(cycle)
                } else {
                    PollResult::Blocked
                }
            },
            timeout,
        )
    }

    pub fn mark_dirty(&self, page: crate::buffer_pool::PageKey) {
        Database::global().mut_txn_manager().mark_dirty(self.id, page);
    }

    pub fn commit(&self) -> EngineResult<()> {
        let db = Database::global();

        // Step 1: flush dirty pages to disk (UPDATE records already written
        // by callers as they mutated pages), synchronously, before the
        // COMMIT record is written.
        db.buffer_pool().flush_all_pages()?;

        // Step 2: write the COMMIT log record.
        db.mut_log_manager().log_commit(self)?;

        // Step 3: release locks; this is a memory-only operation and can
        // happen after the COMMIT record is durable.
        db.mut_txn_manager().forget(self.id);
        db.mut_txn_manager().set_status(self.id, TransactionStatus::Committed);

        Ok(())
    }

    pub fn abort(&self) -> EngineResult<()> {
        let db = Database::global();

        // Step 1: write the ABORT record and roll back via the log.
        db.mut_log_manager().log_abort(self, db.buffer_pool())?;

        // Step 2: discard every page this transaction dirtied.
        let dirty = db.txn_manager().dirty_pages(self.id);
        for page in dirty {
            db.buffer_pool().discard_page(&page);
        }

        // Step 3: release locks.
        db.mut_txn_manager().forget(self.id);
        db.mut_txn_manager().set_status(self.id, TransactionStatus::Aborted);

        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
