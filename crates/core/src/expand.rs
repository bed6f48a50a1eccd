//! Thread-start expansion.
//!
//! Every thread start node is replaced by the callpath that was current at
//! its creation point, so each thread's measurements end up below the
//! regions that forked it:
//!
//! ```text
//!   thread 1                        thread 1 (expanded)
//!   └─ thread start ─▶ main/par     └─ main
//!      └─ foo                          └─ par
//!         └─ bar                          └─ foo
//!                                            └─ bar
//! ```

use crate::calltree::Calltree;
use crate::error::ProfileResult;
use crate::node::{NodeId, NodeKind};

impl Calltree {
    /// Expand the thread starts of every thread root. Running it twice is
    /// harmless: no thread start survives the first run.
    pub fn expand_threads(&mut self) -> ProfileResult<()> {
        let roots = self.roots.clone();
        for root in roots {
            if matches!(self.node(root).map(|n| n.kind), Some(NodeKind::ThreadRoot(_))) {
                self.expand_thread_root(root)?;
            }
        }
        tracing::debug!(threads = self.roots.len(), "expanded thread starts");
        Ok(())
    }

    /// Expand the thread starts directly below `root`, then recompute the
    /// root's metrics from its children.
    pub fn expand_thread_root(&mut self, root: NodeId) -> ProfileResult<()> {
        // Expansion unlinks nodes, so take the sibling list up front.
        let starts: Vec<NodeId> = self
            .children(root)
            .filter(|c| {
                matches!(
                    self.node(*c).map(|n| n.kind),
                    Some(NodeKind::ThreadStart { .. })
                )
            })
            .collect();
        for start in starts {
            self.expand_thread_start(start)?;
        }
        if let Some(store) = self.store_mut(root.store) {
            store.sum_children(root.index);
        }
        Ok(())
    }

    /// Replace one thread start by the callpath of its creation point.
    pub fn expand_thread_start(&mut self, start: NodeId) -> ProfileResult<()> {
        let Some(node) = self.node(start).copied() else {
            return Ok(());
        };
        let NodeKind::ThreadStart { fork_node } = node.kind else {
            return Ok(());
        };
        let Some(root) = node.parent() else {
            tracing::error!(store = start.store, node = start.index, "thread start without thread root");
            return Ok(());
        };
        let path = fork_node.and_then(|fork| self.creation_path(fork));

        let Some(store) = self.store_mut(start.store) else {
            return Ok(());
        };
        if !matches!(store.node(root).kind, NodeKind::ThreadRoot(_)) {
            tracing::error!(
                store = start.store,
                node = start.index,
                "thread start is not a child of a thread root"
            );
            return Ok(());
        }

        store.remove_node(start.index);
        if store.node(start.index).first_child().is_none() {
            return Ok(());
        }
        match path {
            None => store.move_children(root, start.index),
            Some(path) => {
                store.sum_children(start.index);
                let leaf = store.add_callpath(root, &path, start.index)?;
                store.move_children(leaf, start.index)
            }
        }
    }

    /// Callpath of a creation point, read from whichever store holds it.
    fn creation_path(&self, fork: NodeId) -> Option<Vec<NodeKind>> {
        match self.store(fork.store) {
            Some(store) if store.get(fork.index).is_some() => Some(store.callpath_kinds(fork.index)),
            _ => {
                tracing::warn!(
                    store = fork.store,
                    node = fork.index,
                    "creation point is not part of the calltree; thread attached to its root"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use calltree_protocol::{LocationId, RegionHandle};

    use crate::arena::PageBudget;
    use crate::calltree::{Calltree, CalltreeMeta};
    use crate::node::{NodeId, NodeKind, NodeType, ThreadRootData};
    use crate::store::NodeStore;

    fn region(id: u32) -> NodeKind {
        NodeKind::RegularRegion(RegionHandle(id))
    }

    fn new_store(id: u32, budget: &std::sync::Arc<PageBudget>) -> (NodeStore, u32) {
        let mut store = NodeStore::new(id, budget.clone(), 0);
        let kind = NodeKind::ThreadRoot(ThreadRootData {
            location: LocationId(u64::from(id)),
            parent: None,
        });
        let root = store.create_node(None, kind, 0).unwrap_or(u32::MAX);
        store.node_mut(root).count = 1;
        (store, root)
    }

    fn timed(store: &mut NodeStore, parent: u32, kind: NodeKind, start: u64, end: u64) -> u32 {
        let node = store
            .find_or_create_child(parent, kind, start)
            .unwrap_or(u32::MAX);
        store.node_mut(node).count += 1;
        store.start_values(node, start, &[]);
        store.exit_values(node, end, &[]);
        node
    }

    fn meta() -> CalltreeMeta {
        CalltreeMeta {
            num_dense_metrics: 0,
            has_collapse_node: false,
            reached_depth: 0,
            max_callpath_depth: 30,
            max_callpath_num: 1000,
        }
    }

    #[test]
    fn thread_start_without_creation_point_moves_to_root() {
        let budget = PageBudget::with_limit(64, 4096);
        let (mut s, root) = new_store(0, &budget);
        let start = s
            .create_node(Some(root), NodeKind::ThreadStart { fork_node: None }, 0)
            .unwrap_or(u32::MAX);
        let _ = timed(&mut s, start, region(1), 0, 40);
        let _ = timed(&mut s, root, region(1), 50, 60);

        let mut tree = Calltree::new(vec![Some(s)], vec![NodeId::new(0, root)], meta());
        assert!(tree.expand_threads().is_ok());
        assert_eq!(tree.count_type(NodeType::ThreadStart), 0);

        let r = NodeId::new(0, root);
        let main = tree.find_path(r, &[region(1)]);
        let merged = main.and_then(|m| tree.node(m)).map(|n| (n.count, n.implicit_time.sum));
        assert_eq!(merged, Some((2, 50)));
        assert_eq!(tree.node(r).map(|n| n.implicit_time.sum), Some(50));
        assert_eq!(tree.node(r).map(|n| n.count), Some(1));
    }

    #[test]
    fn empty_thread_start_is_dropped() {
        let budget = PageBudget::with_limit(64, 4096);
        let (mut s, root) = new_store(0, &budget);
        let _ = s.create_node(Some(root), NodeKind::ThreadStart { fork_node: None }, 0);
        let mut tree = Calltree::new(vec![Some(s)], vec![NodeId::new(0, root)], meta());
        assert!(tree.expand_threads().is_ok());
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn creation_point_in_another_store_is_rebuilt() {
        let budget = PageBudget::with_limit(64, 4096);
        let (mut a, root_a) = new_store(0, &budget);
        let main = timed(&mut a, root_a, region(1), 0, 500);
        let par = timed(&mut a, main, region(2), 10, 300);

        let (mut b, root_b) = new_store(1, &budget);
        let fork = NodeKind::ThreadStart {
            fork_node: Some(NodeId::new(0, par)),
        };
        let start = b.create_node(Some(root_b), fork, 0).unwrap_or(u32::MAX);
        b.node_mut(start).count = 1;
        let foo = timed(&mut b, start, region(3), 20, 120);
        let _ = timed(&mut b, foo, region(4), 30, 130);

        let roots = vec![NodeId::new(0, root_a), NodeId::new(1, root_b)];
        let mut tree = Calltree::new(vec![Some(a), Some(b)], roots, meta());
        assert!(tree.expand_threads().is_ok());
        assert!(tree.expand_threads().is_ok());

        let rb = NodeId::new(1, root_b);
        let path = [region(1), region(2), region(3), region(4)];
        let bar = tree.find_path(rb, &path);
        assert_eq!(bar.and_then(|n| tree.node(n)).map(|n| n.implicit_time.sum), Some(100));
        let par_b = tree.find_path(rb, &path[..2]);
        assert_eq!(par_b.and_then(|n| tree.node(n)).map(|n| n.implicit_time.sum), Some(100));
        assert_eq!(tree.count_type(NodeType::ThreadStart), 0);
        // The forking thread is untouched.
        assert_eq!(tree.node(NodeId::new(0, par)).map(|n| n.implicit_time.sum), Some(290));
    }
}
