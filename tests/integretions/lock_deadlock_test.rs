//! End-to-end scenario 1 (spec.md §8) driven through the transaction/lock
//! layer rather than the raw `OsMutex` primitive (already covered by
//! `sync::deadlock::tests::cross_lock_deadlock_is_detected`): two
//! transactions lock two page resources in opposite order. The second
//! transaction's conflicting attempt registers the wait-for edge that
//! closes the cycle, so it is the one that observes `DeadLock`; the first
//! transaction's own attempt, made before the cycle existed, only ever
//! times out.

use tempfile::tempdir;

use storage_core::buffer_pool::{FileId, PageKey};
use storage_core::config::EngineConfig;
use storage_core::database::Database;
use storage_core::txn::{LockTimeout, Mode, ResourceId};
use storage_core::ErrorKind;
use storage_core::Transaction;

#[test]
fn cross_resource_lock_order_is_detected_as_a_cycle() {
    let dir = tempdir().unwrap();
    Database::init_at(dir.path().to_path_buf(), EngineConfig::default()).unwrap();

    let page_a = ResourceId::Page(PageKey { file: FileId(2), page_id: 0 });
    let page_b = ResourceId::Page(PageKey { file: FileId(2), page_id: 1 });

    let tx_a = Transaction::begin().unwrap();
    let tx_b = Transaction::begin().unwrap();

    tx_a.lock(page_a, Mode::Exclusive, LockTimeout::Infinite).unwrap();
    tx_b.lock(page_b, Mode::Exclusive, LockTimeout::Infinite).unwrap();

    // tx_a reaches for page_b first: no cycle exists yet, so this only
    // ever times out.
    let first_attempt = tx_a.lock(page_b, Mode::Exclusive, LockTimeout::Immediate);
    assert_eq!(first_attempt.unwrap_err().kind(), ErrorKind::LockTimeout);

    // tx_b reaches for page_a: this closes the cycle A->B->A, so the
    // detector raises DeadLock on tx_b's attempt.
    let second_attempt = tx_b.lock(page_a, Mode::Exclusive, LockTimeout::Immediate);
    assert_eq!(second_attempt.unwrap_err().kind(), ErrorKind::DeadLock);

    tx_a.abort().unwrap();
    tx_b.abort().unwrap();
}
