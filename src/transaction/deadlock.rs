use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::common::types::TxnId;
use crate::transaction::lock_manager::{compatible, LockManager, LockManagerConfig};
use crate::transaction::transaction::TransactionState;

impl LockManager {
    /// Build the current wait-for graph: each waiting request contributes an
    /// edge to every granted request on the same queue that is incompatible
    /// with it. Adjacency lists are sorted for deterministic traversal.
    pub(crate) fn build_wait_graph(&self) -> BTreeMap<TxnId, Vec<TxnId>> {
        let row_map = self.row_locks.lock();
        let table_map = self.table_locks.lock();

        let mut edges: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
        for queue in row_map.values().chain(table_map.values()) {
            let state = queue.state.lock();
            for waiting in state.requests.iter().filter(|r| !r.granted) {
                for granted in state.requests.iter().filter(|r| r.granted) {
                    if !compatible(granted.mode, waiting.mode) {
                        edges.entry(waiting.txn_id).or_default().push(granted.txn_id);
                    }
                }
            }
        }
        for targets in edges.values_mut() {
            targets.sort_unstable();
            targets.dedup();
        }
        edges
    }

    /// Current wait-for edges, for inspection in tests.
    pub fn wait_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        self.build_wait_graph()
            .into_iter()
            .flat_map(|(from, tos)| tos.into_iter().map(move |to| (from, to)))
            .collect()
    }

    /// Iterative depth-first search from every vertex in ascending id order.
    /// On a cycle, returns the highest transaction id on the cycle
    /// (youngest-aborts).
    fn find_cycle_victim(graph: &BTreeMap<TxnId, Vec<TxnId>>) -> Option<TxnId> {
        let empty: Vec<TxnId> = Vec::new();
        let mut visited: HashSet<TxnId> = HashSet::new();

        for &start in graph.keys() {
            if visited.contains(&start) {
                continue;
            }
            // (vertex, next edge index) stack; `path` mirrors the gray set
            let mut stack: Vec<(TxnId, usize)> = vec![(start, 0)];
            let mut path: Vec<TxnId> = vec![start];
            let mut on_path: HashSet<TxnId> = HashSet::new();
            on_path.insert(start);
            visited.insert(start);

            while let Some(&mut (vertex, ref mut edge)) = stack.last_mut() {
                let targets = graph.get(&vertex).unwrap_or(&empty);
                if *edge < targets.len() {
                    let next = targets[*edge];
                    *edge += 1;
                    if on_path.contains(&next) {
                        // cycle: everything on the path from `next` onward
                        let cycle_start = path.iter().position(|&t| t == next).unwrap_or(0);
                        return path[cycle_start..].iter().copied().max();
                    }
                    if !visited.contains(&next) {
                        visited.insert(next);
                        on_path.insert(next);
                        path.push(next);
                        stack.push((next, 0));
                    }
                } else {
                    stack.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(&done);
                    }
                }
            }
        }
        None
    }

    /// One full detection pass: abort deadlock victims until the wait-for
    /// graph is acyclic. Returns the aborted transaction ids.
    pub fn detect_and_break_cycles(&self) -> Vec<TxnId> {
        let mut victims = Vec::new();
        loop {
            let graph = self.build_wait_graph();
            let victim = match Self::find_cycle_victim(&graph) {
                Some(victim) => victim,
                None => break,
            };
            let txn = { self.active_txns.lock().get(&victim).cloned() };
            let txn = match txn {
                Some(txn) => txn,
                None => break,
            };
            log::debug!("deadlock detected, aborting txn {}", victim);
            txn.set_state(TransactionState::Aborted);
            self.release_all(&txn);
            victims.push(victim);
        }
        victims
    }
}

/// Background deadlock detection task. Runs a detection pass on every
/// interval until shut down.
pub struct DeadlockDetector {
    enabled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeadlockDetector {
    pub fn spawn(lock_manager: Arc<LockManager>, config: LockManagerConfig) -> Self {
        let enabled = Arc::new(AtomicBool::new(true));
        let running = enabled.clone();
        let handle = thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(config.detection_interval);
                lock_manager.detect_and_break_cycles();
            }
        });
        Self {
            enabled,
            handle: Some(handle),
        }
    }

    pub fn shutdown(&mut self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeadlockDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(TxnId, TxnId)]) -> BTreeMap<TxnId, Vec<TxnId>> {
        let mut g: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
        for &(from, to) in edges {
            g.entry(from).or_default().push(to);
        }
        for targets in g.values_mut() {
            targets.sort_unstable();
        }
        g
    }

    #[test]
    fn test_no_cycle() {
        let g = graph(&[(1, 2), (2, 3), (1, 3)]);
        assert_eq!(LockManager::find_cycle_victim(&g), None);
    }

    #[test]
    fn test_simple_cycle_picks_youngest() {
        let g = graph(&[(1, 2), (2, 1)]);
        assert_eq!(LockManager::find_cycle_victim(&g), Some(2));
    }

    #[test]
    fn test_cycle_victim_is_max_of_cycle_only() {
        // 5 waits into the cycle {1,2} but is not on it
        let g = graph(&[(5, 1), (1, 2), (2, 1)]);
        assert_eq!(LockManager::find_cycle_victim(&g), Some(2));
    }

    #[test]
    fn test_longer_cycle() {
        let g = graph(&[(1, 2), (2, 3), (3, 4), (4, 1)]);
        assert_eq!(LockManager::find_cycle_victim(&g), Some(4));
    }
}
