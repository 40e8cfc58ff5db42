//! Cooperative worker pool for parallel executor sections (spec.md §4.8,
//! §5). Grounded on the teacher's otherwise-unused `crossbeam` dependency
//! (no parallel execution existed in the sampled teacher source to copy
//! from) — `crossbeam::thread::scope` supplies the scoped, panic-safe
//! thread fan-out and `crossbeam::channel::bounded` the backpressured
//! inter-worker row channel spec.md §5 calls for.

use std::sync::Mutex;

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{error, info};

use crate::engine_err;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::executor::iterator::Row;

/// A bounded FIFO for rows passed from one worker to the next (spec.md §5:
/// "Executor `next()` may block on worker-to-worker channels (bounded
/// FIFO, backpressure by blocking producer)"). `send` blocks once
/// `capacity` rows are in flight; `recv` blocks until a row (or channel
/// close) is available.
pub fn row_channel(capacity: usize) -> (Sender<Row>, Receiver<Row>) {
    bounded(capacity)
}

/// Runs `work` on `worker_count` threads, with `prepare`/`dispose` run
/// once each on a single designated worker, bracketing the parallel
/// section (spec.md §4.8: "`prepare()` and `dispose()` on one designated
/// worker"). Exceptions raised in any worker are captured — first wins —
/// and re-raised on the invoking thread once every worker has finished.
///
/// `UserLevel` errors are logged at `Info`; everything else at `Error`
/// (spec.md §4.8 "All user-level exceptions are logged at Info, all
/// others at Error" — `EngineError::new` already does this at
/// construction, so this only re-logs the *choice* of first-error, not
/// duplicate log lines).
pub fn parallel<F>(worker_count: usize, prepare: impl FnOnce() -> EngineResult<()>, work: F, dispose: impl FnOnce() -> EngineResult<()>) -> EngineResult<()>
where
    F: Fn(usize) -> EngineResult<()> + Sync,
{
    prepare()?;

    let first_error: Mutex<Option<EngineError>> = Mutex::new(None);
    let record = |err: EngineError| {
        match err.kind() {
            ErrorKind::UserLevel => info!("worker raised user-level error: {}", err),
            _ => error!("worker raised error: {}", err),
        }
        let mut slot = first_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    };

    crossbeam::thread::scope(|scope| {
        for worker_id in 0..worker_count.max(1) {
            let work = &work;
            let record = &record;
            scope.spawn(move |_| {
                if let Err(err) = work(worker_id) {
                    record(err);
                }
            });
        }
    })
    .map_err(|_| engine_err!(ErrorKind::Unexpected, "a worker thread panicked"))?;

    dispose()?;

    match first_error.into_inner().unwrap() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CompositeKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn row_channel_passes_rows_between_workers_in_order() {
        let (tx, rx) = row_channel(2);
        let row = |v: u8| CompositeKey::new(vec![Some(vec![v])]);

        crossbeam::thread::scope(|scope| {
            scope.spawn(move |_| {
                for v in 0..5u8 {
                    tx.send(row(v)).unwrap();
                }
            });
            let mut received = Vec::new();
            for _ in 0..5 {
                received.push(rx.recv().unwrap());
            }
            assert_eq!(received, (0..5u8).map(row).collect::<Vec<_>>());
        })
        .unwrap();
    }

    #[test]
    fn runs_prepare_work_dispose_in_order_and_succeeds() {
        let prepared = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));

        let p = Arc::clone(&prepared);
        let d = Arc::clone(&disposed);
        let r = Arc::clone(&ran);

        let result = parallel(
            4,
            move || {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            move |_worker_id| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            move || {
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        assert!(result.is_ok());
        assert_eq!(prepared.load(Ordering::SeqCst), 1);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn first_worker_error_is_reraised_on_the_invoking_thread() {
        let result: EngineResult<()> = parallel(
            3,
            || Ok(()),
            |worker_id| {
                if worker_id == 1 {
                    Err(engine_err!(ErrorKind::Unexpected, "boom"))
                } else {
                    Ok(())
                }
            },
            || Ok(()),
        );

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }
}
