//! The unified calltree: every location's store plus the thread-root list.

use calltree_protocol::LocationId;

use crate::metric::{DenseMetric, SparseDouble, SparseInt};
use crate::node::{CalltreeNode, NodeId, NodeKind, NodeType};
use crate::store::NodeStore;

/// Profile-level facts a writer reports alongside the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalltreeMeta {
    pub num_dense_metrics: usize,
    pub has_collapse_node: bool,
    pub reached_depth: u64,
    pub max_callpath_depth: u64,
    pub max_callpath_num: u64,
}

#[derive(Debug)]
pub struct Calltree {
    stores: Vec<Option<NodeStore>>,
    /// Thread roots in output order; each root is the next sibling of the
    /// one before it.
    pub(crate) roots: Vec<NodeId>,
    pub(crate) meta: CalltreeMeta,
}

impl Calltree {
    /// `stores` is indexed by store id.
    pub fn new(stores: Vec<Option<NodeStore>>, roots: Vec<NodeId>, meta: CalltreeMeta) -> Self {
        Self {
            stores,
            roots,
            meta,
        }
    }

    pub fn meta(&self) -> &CalltreeMeta {
        &self.meta
    }

    pub fn first_root_node(&self) -> Option<NodeId> {
        self.roots.first().copied()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn store(&self, store: u32) -> Option<&NodeStore> {
        self.stores.get(store as usize)?.as_ref()
    }

    pub(crate) fn store_mut(&mut self, store: u32) -> Option<&mut NodeStore> {
        self.stores.get_mut(store as usize)?.as_mut()
    }

    pub fn node(&self, id: NodeId) -> Option<&CalltreeNode> {
        self.store(id.store)?.get(id.index)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.node(id)?.parent()?;
        Some(NodeId::new(id.store, parent))
    }

    /// Next sibling; for thread roots, the next root.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id)?;
        if node.parent().is_none() {
            let pos = self.roots.iter().position(|r| *r == id)?;
            return self.roots.get(pos + 1).copied();
        }
        node.next_sibling().map(|s| NodeId::new(id.store, s))
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.store(id.store)
            .filter(|s| s.get(id.index).is_some())
            .into_iter()
            .flat_map(move |s| s.children(id.index).map(move |c| NodeId::new(id.store, c)))
    }

    /// Pre-order walk from `start`, yielding each node with its depth below
    /// `start`.
    pub fn preorder(&self, start: NodeId) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.store(start.store)
            .filter(|s| s.get(start.index).is_some())
            .into_iter()
            .flat_map(move |s| {
                s.preorder(start.index)
                    .map(move |(n, depth)| (NodeId::new(start.store, n), depth))
            })
    }

    pub fn dense_metrics(&self, id: NodeId) -> &[DenseMetric] {
        match self.store(id.store) {
            Some(store) if store.get(id.index).is_some() => store.dense_metrics(id.index),
            _ => &[],
        }
    }

    pub fn sparse_int(&self, id: NodeId) -> Vec<&SparseInt> {
        match self.store(id.store) {
            Some(store) if store.get(id.index).is_some() => store.sparse_int(id.index).collect(),
            _ => Vec::new(),
        }
    }

    pub fn sparse_double(&self, id: NodeId) -> Vec<&SparseDouble> {
        match self.store(id.store) {
            Some(store) if store.get(id.index).is_some() => store.sparse_double(id.index).collect(),
            _ => Vec::new(),
        }
    }

    pub fn root_location(&self, root: NodeId) -> Option<LocationId> {
        match self.node(root)?.kind {
            NodeKind::ThreadRoot(data) => Some(data.location),
            _ => None,
        }
    }

    pub fn root_of(&self, location: LocationId) -> Option<NodeId> {
        self.roots
            .iter()
            .copied()
            .find(|r| self.root_location(*r) == Some(location))
    }

    /// Nodes reachable from the thread roots, roots included.
    pub fn node_count(&self) -> usize {
        self.roots.iter().map(|r| self.preorder(*r).count()).sum()
    }

    pub fn count_type(&self, node_type: NodeType) -> usize {
        self.roots
            .iter()
            .flat_map(|r| self.preorder(*r))
            .filter(|(n, _)| self.node(*n).map(CalltreeNode::node_type) == Some(node_type))
            .count()
    }

    /// Follow `path` down from `start`, matching node kinds.
    pub fn find_path(&self, start: NodeId, path: &[NodeKind]) -> Option<NodeId> {
        path.iter().try_fold(start, |parent, kind| {
            let store = self.store(parent.store)?;
            let child = store.find_child(parent.index, kind)?;
            Some(NodeId::new(parent.store, child))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calltree_protocol::RegionHandle;

    use crate::arena::PageBudget;
    use crate::node::ThreadRootData;

    fn meta() -> CalltreeMeta {
        CalltreeMeta {
            num_dense_metrics: 0,
            has_collapse_node: false,
            reached_depth: 0,
            max_callpath_depth: 30,
            max_callpath_num: 100,
        }
    }

    fn tree(locations: &[u64]) -> Calltree {
        let budget = PageBudget::with_limit(64, 4096);
        let mut stores = Vec::new();
        let mut roots = Vec::new();
        for (i, loc) in locations.iter().enumerate() {
            let mut store = NodeStore::new(i as u32, budget.clone(), 0);
            let kind = NodeKind::ThreadRoot(ThreadRootData {
                location: LocationId(*loc),
                parent: None,
            });
            let root = store.create_node(None, kind, 0).unwrap_or(u32::MAX);
            let main = store
                .create_node(Some(root), NodeKind::RegularRegion(RegionHandle(1)), 0)
                .unwrap_or(u32::MAX);
            let _ = store.create_node(Some(main), NodeKind::RegularRegion(RegionHandle(2)), 0);
            roots.push(NodeId::new(i as u32, root));
            stores.push(Some(store));
        }
        Calltree::new(stores, roots, meta())
    }

    #[test]
    fn roots_are_linked_as_siblings() {
        let t = tree(&[4, 5, 6]);
        let first = t.first_root_node();
        assert_eq!(first, Some(NodeId::new(0, 0)));
        let second = first.and_then(|r| t.next_sibling(r));
        assert_eq!(second.and_then(|r| t.root_location(r)), Some(LocationId(5)));
        assert_eq!(t.next_sibling(NodeId::new(2, 0)), None);
        assert_eq!(t.root_of(LocationId(6)), Some(NodeId::new(2, 0)));
    }

    #[test]
    fn walk_and_lookup() {
        let t = tree(&[0]);
        let root = NodeId::new(0, 0);
        assert_eq!(t.node_count(), 3);
        assert_eq!(t.count_type(NodeType::RegularRegion), 2);
        let leaf = t.find_path(
            root,
            &[
                NodeKind::RegularRegion(RegionHandle(1)),
                NodeKind::RegularRegion(RegionHandle(2)),
            ],
        );
        assert!(leaf.is_some());
        assert_eq!(leaf.and_then(|l| t.parent(l)).and_then(|p| t.parent(p)), Some(root));
        assert!(t.node(NodeId::new(7, 0)).is_none());
        assert_eq!(t.children(NodeId::new(7, 0)).count(), 0);
        assert!(t.dense_metrics(root).is_empty());
    }
}
