//! Wait-for graph used by the lock manager's deadlock detector (spec.md
//! §3.4). Keyed by transaction id rather than thread id: a `Transaction` is
//! only ever driven by a single thread at a time, so this graph is simpler
//! than the mutex-level one in `sync::deadlock`.

use std::collections::{HashMap, HashSet};

use super::TransactionId;

#[derive(Default)]
pub(crate) struct WaitForGraph {
    graph: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: HashMap::new(),
        }
    }

    pub(crate) fn add_edge(&mut self, from: TransactionId, to: TransactionId) {
        if from == to {
            return;
        }
        self.graph.entry(from).or_insert_with(HashSet::new).insert(to);
    }

    pub(crate) fn remove_waiter(&mut self, tid: TransactionId) {
        self.graph.remove(&tid);
    }

    /// Depth-first search for a cycle reachable from `start`. Returns the
    /// cycle (as a path of transaction ids, first == last) if one exists.
    pub(crate) fn find_cycle_from(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        let mut path = vec![start];
        let mut visited = HashSet::new();
        visited.insert(start);

        self.search(start, start, &mut path, &mut visited)
    }

    fn search(
        &self,
        start: TransactionId,
        current: TransactionId,
        path: &mut Vec<TransactionId>,
        visited: &mut HashSet<TransactionId>,
    ) -> Option<Vec<TransactionId>> {
        let neighbors = self.graph.get(&current)?;
        for &next in neighbors {
            if next == start {
                let mut cycle = path.clone();
                cycle.push(start);
                return Some(cycle);
            }
            if visited.insert(next) {
                path.push(next);
                if let Some(cycle) = self.search(start, next, path, visited) {
                    return Some(cycle);
                }
                path.pop();
            }
        }
        None
    }
}
