//! Collapse-node substitution before writing.

use calltree_protocol::RegionHandle;

use crate::calltree::Calltree;
use crate::node::NodeKind;

impl Calltree {
    /// Turn every collapse node into a regular region node of `region`
    /// (typically a region named `COLLAPSE`) so writers only see regions.
    /// Returns the number of substituted nodes.
    pub fn process_collapse(&mut self, region: RegionHandle) -> usize {
        if !self.meta.has_collapse_node {
            return 0;
        }
        tracing::warn!(
            max_callpath_depth = self.meta.max_callpath_depth,
            max_callpath_num = self.meta.max_callpath_num,
            reached_depth = self.meta.reached_depth,
            "calltree limits exceeded; deeper or further callpaths were collapsed"
        );

        let collapsed: Vec<_> = self
            .roots
            .iter()
            .flat_map(|r| self.preorder(*r))
            .map(|(id, _)| id)
            .filter(|id| matches!(self.node(*id).map(|n| n.kind), Some(NodeKind::Collapse { .. })))
            .collect();
        for id in &collapsed {
            if let Some(store) = self.store_mut(id.store) {
                store.node_mut(id.index).kind = NodeKind::RegularRegion(region);
            }
        }
        collapsed.len()
    }
}
