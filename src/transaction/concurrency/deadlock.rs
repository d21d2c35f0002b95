use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, ShutdownSignal};
use crate::transaction::concurrency::transaction::{Transaction, TransactionState};

/// Waits-for graph rebuilt from the request queues on every detection pass.
/// Nodes are visited in ascending transaction-id order and adjacency lists
/// are kept sorted, so detection is deterministic.
#[derive(Debug, Default)]
pub struct WaitsForGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the edge `waiter -> holder` (waiter waits for holder)
    pub fn add_edge(&mut self, waiter: TxnId, holder: TxnId) {
        self.edges.entry(waiter).or_default().insert(holder);
    }

    pub fn remove_edge(&mut self, waiter: TxnId, holder: TxnId) {
        if let Some(targets) = self.edges.get_mut(&waiter) {
            targets.remove(&holder);
            if targets.is_empty() {
                self.edges.remove(&waiter);
            }
        }
    }

    /// All edges as (waiter, holder) pairs, in deterministic order
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.edges
            .iter()
            .flat_map(|(&from, targets)| targets.iter().map(move |&to| (from, to)))
            .collect()
    }

    /// Find a cycle by DFS and return its youngest member (the largest
    /// transaction id), the victim to abort.
    pub fn find_victim(&self) -> Option<TxnId> {
        self.find_cycle().map(|cycle| {
            *cycle.iter().max().expect("a cycle has at least one node")
        })
    }

    /// The members of some cycle, if the graph has one
    pub fn find_cycle(&self) -> Option<Vec<TxnId>> {
        let mut colors: BTreeMap<TxnId, DfsColor> = BTreeMap::new();
        for &start in self.edges.keys() {
            if colors.contains_key(&start) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = self.dfs(start, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        colors: &mut BTreeMap<TxnId, DfsColor>,
        path: &mut Vec<TxnId>,
    ) -> Option<Vec<TxnId>> {
        colors.insert(node, DfsColor::InProgress);
        path.push(node);

        if let Some(targets) = self.edges.get(&node) {
            for &next in targets {
                match colors.get(&next) {
                    Some(DfsColor::InProgress) => {
                        let pos = path
                            .iter()
                            .position(|&n| n == next)
                            .expect("in-progress node is on the path");
                        return Some(path[pos..].to_vec());
                    }
                    Some(DfsColor::Done) => {}
                    None => {
                        if let Some(cycle) = self.dfs(next, colors, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        path.pop();
        colors.insert(node, DfsColor::Done);
        None
    }
}

#[derive(Clone, Copy, PartialEq)]
enum DfsColor {
    InProgress,
    Done,
}

/// Background worker loop: wake every `interval`, run one detection pass,
/// exit when the manager is dropped.
pub(super) fn run_detector(
    manager: Weak<LockManager>,
    shutdown: Arc<ShutdownSignal>,
    interval: Duration,
) {
    loop {
        if shutdown.wait_timeout(interval) {
            return;
        }
        let Some(manager) = manager.upgrade() else {
            return;
        };
        manager.run_cycle_detection();
    }
}

impl LockManager {
    /// One full deadlock-detection pass: rebuild the waits-for graph from
    /// the queues, abort the youngest member of each cycle found, and repeat
    /// until no cycle remains.
    ///
    /// Both lock-map mutexes are held for the whole pass so no queue can
    /// appear or vanish mid-scan.
    pub fn run_cycle_detection(&self) {
        let table_map = self.table_locks.lock();
        let row_map = self.row_locks.lock();
        let queues: Vec<_> = table_map
            .values()
            .chain(row_map.values())
            .map(Arc::clone)
            .collect();

        loop {
            let mut graph = WaitsForGraph::new();
            let mut members: HashMap<TxnId, Arc<Transaction>> = HashMap::new();

            for queue in &queues {
                let state = queue.state.lock();
                for (i, waiter) in state.requests.iter().enumerate() {
                    if waiter.granted || waiter.txn.state() == TransactionState::Aborted {
                        continue;
                    }
                    for earlier in state.requests.iter().take(i) {
                        if earlier.txn.state() == TransactionState::Aborted
                            || earlier.txn.id() == waiter.txn.id()
                            || earlier.mode.compatible_with(waiter.mode)
                        {
                            continue;
                        }
                        graph.add_edge(waiter.txn.id(), earlier.txn.id());
                        members.insert(waiter.txn.id(), Arc::clone(&waiter.txn));
                        members.insert(earlier.txn.id(), Arc::clone(&earlier.txn));
                    }
                }
            }

            let Some(victim_id) = graph.find_victim() else {
                break;
            };
            let victim = Arc::clone(&members[&victim_id]);
            log::warn!("deadlock detected; aborting youngest transaction {}", victim_id);

            victim.set_state(TransactionState::Aborted);
            for queue in &queues {
                let mut state = queue.state.lock();
                let before = state.requests.len();
                state.requests.retain(|r| {
                    if r.txn.id() == victim_id {
                        log::trace!(
                            "stripping {:?} request of txn {} on table {} row {:?}",
                            r.mode,
                            victim_id,
                            r.oid,
                            r.rid
                        );
                        false
                    } else {
                        true
                    }
                });
                if state.upgrading == Some(victim_id) {
                    state.upgrading = None;
                }
                if state.requests.len() != before {
                    queue.cv.notify_all();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cycle() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(1, 3);
        assert_eq!(graph.find_cycle(), None);
        assert_eq!(graph.find_victim(), None);
    }

    #[test]
    fn test_two_node_cycle_aborts_youngest() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        assert_eq!(graph.find_victim(), Some(2));
    }

    #[test]
    fn test_larger_cycle() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 1);
        graph.add_edge(4, 1);
        assert_eq!(graph.find_victim(), Some(3));
    }

    #[test]
    fn test_remove_edge_breaks_cycle() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        graph.remove_edge(2, 1);
        assert_eq!(graph.find_cycle(), None);
        assert_eq!(graph.edge_list(), vec![(1, 2)]);
    }

    #[test]
    fn test_edge_list_is_sorted() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(3, 1);
        graph.add_edge(1, 2);
        graph.add_edge(1, 4);
        assert_eq!(graph.edge_list(), vec![(1, 2), (1, 4), (3, 1)]);
    }

    #[test]
    fn test_self_loops_are_possible_to_detect() {
        // The builder never adds self-edges, but the graph handles them
        let mut graph = WaitsForGraph::new();
        graph.add_edge(5, 5);
        assert_eq!(graph.find_victim(), Some(5));
    }
}
