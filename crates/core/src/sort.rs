//! Canonical ordering of thread roots.

use crate::calltree::Calltree;
use crate::node::NodeId;

impl Calltree {
    /// Order thread roots by logical thread id (low 32 bits of the location
    /// id). The ids must form a permutation of `0..roots`; otherwise the
    /// creation order is kept. Returns whether the roots were sorted.
    pub fn sort_threads(&mut self) -> bool {
        let mut slots: Vec<Option<NodeId>> = vec![None; self.roots.len()];
        for root in &self.roots {
            let Some(location) = self.root_location(*root) else {
                tracing::warn!(store = root.store, "root list holds a non-root node; threads not sorted");
                return false;
            };
            let index = location.logical_thread() as usize;
            match slots.get_mut(index) {
                Some(slot) if slot.is_none() => *slot = Some(*root),
                Some(_) => {
                    tracing::warn!(location = %location, index, "duplicate thread index; threads not sorted");
                    return false;
                }
                None => {
                    tracing::warn!(location = %location, index, "thread index out of range; threads not sorted");
                    return false;
                }
            }
        }
        self.roots = slots.into_iter().flatten().collect();
        true
    }
}
