//! Transaction and lock manager (spec.md §4.2/§4.3): strict two-phase
//! locking over a wait-for-graph deadlock detector, grounded on the
//! teacher's `transaction` module.

mod lock_table;
mod manager;
mod transaction;
mod wait_for_graph;

use std::sync::atomic::{AtomicU32, Ordering};

pub type TransactionId = u32;

static NEXT_TRANSACTION_ID: AtomicU32 = AtomicU32::new(1);

fn next_transaction_id() -> TransactionId {
    NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed)
}

pub use lock_table::{LockDuration, LockTimeout, Mode, ResourceId};
pub use manager::{TransactionManager, TransactionStatus};
pub use transaction::{IsolationLevel, Transaction};
