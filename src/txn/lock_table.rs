//! Two-phase lock manager with a wait-for-graph deadlock detector (spec.md
//! §4.3). Generalizes the page-only S/X-latch maps the teacher code used
//! into a single table keyed by `ResourceId`, so page-duration and
//! row-duration (`Tuple`) locks share one wait-for graph and one
//! timeout/deadlock path.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::debug;

use super::wait_for_graph::WaitForGraph;
use super::TransactionId;
use crate::buffer_pool::PageKey;
use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Shared,
    Exclusive,
}

impl Mode {
    fn conflicts(self, other: Mode) -> bool {
        matches!((self, other), (Mode::Exclusive, _) | (_, Mode::Exclusive))
    }
}

/// How long a granted lock is held. `Pulse` locks are released by the
/// caller immediately after the single operation that requested them;
/// `Transaction` locks live until commit/abort (strict 2PL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockDuration {
    Pulse,
    Transaction,
}

/// Millisecond timeout for a lock request. `0` = non-blocking, `None` =
/// infinite (spec.md §5).
#[derive(Debug, Clone, Copy)]
pub enum LockTimeout {
    Immediate,
    Millis(u64),
    Infinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Page(PageKey),
    Tuple(PageKey, u32),
}

struct Holder {
    tx: TransactionId,
    mode: Mode,
}

#[derive(Default)]
pub struct LockTable {
    granted: HashMap<ResourceId, Vec<Holder>>,
    held_by_tx: HashMap<TransactionId, HashSet<ResourceId>>,
    wait_for: WaitForGraph,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            granted: HashMap::new(),
            held_by_tx: HashMap::new(),
            wait_for: WaitForGraph::new(),
        }
    }

    fn compatible(&self, resource: &ResourceId, tx: TransactionId, mode: Mode) -> bool {
        match self.granted.get(resource) {
            None => true,
            Some(holders) => holders
                .iter()
                .all(|h| h.tx == tx || !h.mode.conflicts(mode)),
        }
    }

    fn conflicting_owners(&self, resource: &ResourceId, tx: TransactionId) -> Vec<TransactionId> {
        match self.granted.get(resource) {
            None => Vec::new(),
            Some(holders) => holders.iter().filter(|h| h.tx != tx).map(|h| h.tx).collect(),
        }
    }

    fn grant(&mut self, resource: ResourceId, tx: TransactionId, mode: Mode) {
        let holders = self.granted.entry(resource).or_insert_with(Vec::new);
        if !holders.iter().any(|h| h.tx == tx) {
            holders.push(Holder { tx, mode });
        } else if mode == Mode::Exclusive {
            for h in holders.iter_mut() {
                if h.tx == tx {
                    h.mode = Mode::Exclusive;
                }
            }
        }
        self.held_by_tx.entry(tx).or_insert_with(HashSet::new).insert(resource);
        self.wait_for.remove_waiter(tx);
    }

    /// Non-blocking attempt. On failure, records the wait-for edges so the
    /// caller's retry loop can detect a deadlock before sleeping again.
    pub fn try_acquire(&mut self, tx: TransactionId, resource: ResourceId, mode: Mode) -> bool {
        if self.compatible(&resource, tx, mode) {
            self.grant(resource, tx, mode);
            true
        } else {
            for owner in self.conflicting_owners(&resource, tx) {
                self.wait_for.add_edge(tx, owner);
            }
            false
        }
    }

    pub fn would_deadlock(&self, tx: TransactionId) -> Option<Vec<TransactionId>> {
        self.wait_for.find_cycle_from(tx)
    }

    pub fn release(&mut self, tx: TransactionId, resource: &ResourceId) {
        if let Some(holders) = self.granted.get_mut(resource) {
            holders.retain(|h| h.tx != tx);
            if holders.is_empty() {
                self.granted.remove(resource);
            }
        }
        if let Some(set) = self.held_by_tx.get_mut(&tx) {
            set.remove(resource);
        }
    }

    pub fn release_all(&mut self, tx: TransactionId) {
        if let Some(resources) = self.held_by_tx.remove(&tx) {
            for resource in resources {
                if let Some(holders) = self.granted.get_mut(&resource) {
                    holders.retain(|h| h.tx != tx);
                    if holders.is_empty() {
                        self.granted.remove(&resource);
                    }
                }
            }
        }
        self.wait_for.remove_waiter(tx);
    }

    pub fn holds(&self, tx: TransactionId, resource: &ResourceId) -> bool {
        self.granted
            .get(resource)
            .map(|holders| holders.iter().any(|h| h.tx == tx))
            .unwrap_or(false)
    }
}

/// Blocking acquisition loop shared by page- and row-level locks. Owns no
/// state itself; callers pass a closure that takes the `Database`-wide
/// table lock for one poll at a time so other transactions can make
/// progress between polls (spec.md §4.3/§5).
pub fn acquire_blocking(
    mut poll: impl FnMut() -> PollResult,
    timeout: LockTimeout,
) -> EngineResult<()> {
    let deadline = match timeout {
        LockTimeout::Immediate => Some(Instant::now()),
        LockTimeout::Millis(ms) => Some(Instant::now() + Duration::from_millis(ms)),
        LockTimeout::Infinite => None,
    };

    loop {
        match poll() {
            PollResult::Granted => return Ok(()),
            PollResult::Deadlock(cycle) => {
                debug!("deadlock detected: {:?}", cycle);
                return Err(engine_err!(
                    ErrorKind::DeadLock,
                    "deadlock detected: cycle {:?}",
                    cycle
                ));
            }
            PollResult::Blocked => {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Err(engine_err!(ErrorKind::LockTimeout, "lock acquisition timed out"));
                    }
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

pub enum PollResult {
    Granted,
    Blocked,
    Deadlock(Vec<TransactionId>),
}
