//! Per-location node storage and the structural tree operations.
//!
//! A [`NodeStore`] owns every node of one location together with the dense
//! and sparse metrics hanging off them. Nodes are addressed by `u32` slots;
//! parent, child and sibling links never leave the store. Children form a
//! singly linked list: new children are prepended, moved children appended.

use std::sync::Arc;

use calltree_protocol::MetricHandle;

use crate::arena::{Arena, PageBudget};
use crate::error::ProfileResult;
use crate::metric::sparse;
use crate::metric::{DenseMetric, SparseDouble, SparseInt};
use crate::node::{CalltreeNode, NodeKind};

/// Owned copy of everything a node measured.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMetrics {
    pub count: u64,
    pub first_enter_time: u64,
    pub last_exit_time: u64,
    pub implicit_time: DenseMetric,
    pub dense: Vec<DenseMetric>,
    pub sparse_int: Vec<SparseInt>,
    pub sparse_double: Vec<SparseDouble>,
}

#[derive(Debug)]
pub struct NodeStore {
    id: u32,
    /// Width of every node's dense slice, location-specific metrics included.
    num_dense_metrics: usize,
    num_location_metrics: usize,
    nodes: Arena<CalltreeNode>,
    dense: Arena<DenseMetric>,
    sparse_int: Arena<SparseInt>,
    sparse_double: Arena<SparseDouble>,
}

/// Iterator over the direct children of a node, in list order.
pub struct Children<'a> {
    store: &'a NodeStore,
    next: Option<u32>,
}

impl Iterator for Children<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.next?;
        self.next = self.store.nodes[current].next_sibling;
        Some(current)
    }
}

/// Pre-order walk yielding `(slot, depth below the start node)`.
pub struct Preorder<'a> {
    store: &'a NodeStore,
    stack: Vec<(u32, u32)>,
}

impl Iterator for Preorder<'_> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        let (node, depth) = self.stack.pop()?;
        let children: Vec<u32> = self.store.children(node).collect();
        self.stack
            .extend(children.into_iter().rev().map(|c| (c, depth + 1)));
        Some((node, depth))
    }
}

impl NodeStore {
    pub fn new(id: u32, budget: Arc<PageBudget>, num_dense_metrics: usize) -> Self {
        Self {
            id,
            num_dense_metrics,
            num_location_metrics: 0,
            nodes: Arena::new(budget.clone()),
            dense: Arena::with_min_run(budget.clone(), num_dense_metrics),
            sparse_int: Arena::new(budget.clone()),
            sparse_double: Arena::new(budget),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn num_dense_metrics(&self) -> usize {
        self.num_dense_metrics
    }

    /// Dense metrics added for this location alone, after the profile-wide ones.
    pub fn num_location_metrics(&self) -> usize {
        self.num_location_metrics
    }

    /// Widen every node's dense slice by `extra` metrics. Existing values
    /// are kept, the new ones start untouched. Nodes are only repointed
    /// once all new slices are allocated.
    pub fn add_location_metrics(&mut self, extra: usize) -> ProfileResult<()> {
        if extra == 0 {
            return Ok(());
        }
        let width = self.num_dense_metrics + extra;
        let mut dense = Arena::with_min_run(self.dense.budget().clone(), width);
        let mut slots = Vec::with_capacity(self.nodes.len());
        for node in 0..self.nodes.len() as u32 {
            let mut values = self.dense_metrics(node).to_vec();
            values.resize(width, DenseMetric::new());
            slots.push(dense.alloc_slice(values)?);
        }
        for (node, slot) in slots.into_iter().enumerate() {
            self.nodes[node as u32].dense = slot;
        }
        self.dense = dense;
        self.num_dense_metrics = width;
        self.num_location_metrics += extra;
        Ok(())
    }

    /// Number of nodes ever created in this store, detached ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node: u32) -> &CalltreeNode {
        &self.nodes[node]
    }

    pub fn get(&self, node: u32) -> Option<&CalltreeNode> {
        self.nodes.get(node)
    }

    pub(crate) fn node_mut(&mut self, node: u32) -> &mut CalltreeNode {
        &mut self.nodes[node]
    }

    pub fn children(&self, parent: u32) -> Children<'_> {
        Children {
            store: self,
            next: self.nodes[parent].first_child,
        }
    }

    pub fn preorder(&self, start: u32) -> Preorder<'_> {
        Preorder {
            store: self,
            stack: vec![(start, 0)],
        }
    }

    pub fn dense_metrics(&self, node: u32) -> &[DenseMetric] {
        self.dense
            .slice(self.nodes[node].dense, self.num_dense_metrics)
    }

    pub fn sparse_int(&self, node: u32) -> impl Iterator<Item = &SparseInt> + '_ {
        sparse::iter(&self.sparse_int, self.nodes[node].sparse_int)
    }

    pub fn sparse_double(&self, node: u32) -> impl Iterator<Item = &SparseDouble> + '_ {
        sparse::iter(&self.sparse_double, self.nodes[node].sparse_double)
    }

    pub fn metrics(&self, node: u32) -> NodeMetrics {
        let n = &self.nodes[node];
        NodeMetrics {
            count: n.count,
            first_enter_time: n.first_enter_time,
            last_exit_time: n.last_exit_time,
            implicit_time: n.implicit_time,
            dense: self.dense_metrics(node).to_vec(),
            sparse_int: sparse::collect(&self.sparse_int, n.sparse_int),
            sparse_double: sparse::collect(&self.sparse_double, n.sparse_double),
        }
    }

    /// Allocate a node with zeroed metrics; prepends it to `parent`'s children.
    pub fn create_node(
        &mut self,
        parent: Option<u32>,
        kind: NodeKind,
        timestamp: u64,
    ) -> ProfileResult<u32> {
        let dense = self
            .dense
            .alloc_slice(vec![DenseMetric::new(); self.num_dense_metrics])?;
        let node = self.nodes.alloc(CalltreeNode::new(kind, timestamp, dense))?;
        if let Some(parent) = parent {
            self.link_first(parent, node);
        }
        Ok(node)
    }

    /// Duplicate payload and metrics of `source` into fresh storage. The
    /// copy is not linked into any tree.
    pub fn copy_node(&mut self, source: u32) -> ProfileResult<u32> {
        let src = self.nodes[source];
        let values = self.dense_metrics(source).to_vec();
        let dense = self.dense.alloc_slice(values)?;

        let mut ints = sparse::collect(&self.sparse_int, src.sparse_int);
        let mut doubles = sparse::collect(&self.sparse_double, src.sparse_double);
        // merge_into prepends, so feed it back to front to keep list order.
        ints.reverse();
        doubles.reverse();
        let mut int_head = None;
        let mut double_head = None;
        sparse::merge_into(&mut self.sparse_int, &mut int_head, &ints)?;
        sparse::merge_into(&mut self.sparse_double, &mut double_head, &doubles)?;

        self.nodes.alloc(CalltreeNode {
            parent: None,
            first_child: None,
            next_sibling: None,
            dense,
            sparse_int: int_head,
            sparse_double: double_head,
            ..src
        })
    }

    pub fn find_child(&self, parent: u32, kind: &NodeKind) -> Option<u32> {
        self.children(parent)
            .find(|c| self.nodes[*c].kind.matches(kind))
    }

    pub fn find_or_create_child(
        &mut self,
        parent: u32,
        kind: NodeKind,
        timestamp: u64,
    ) -> ProfileResult<u32> {
        match self.find_child(parent, &kind) {
            Some(child) => Ok(child),
            None => self.create_node(Some(parent), kind, timestamp),
        }
    }

    fn link_first(&mut self, parent: u32, child: u32) {
        let head = self.nodes[parent].first_child;
        let c = &mut self.nodes[child];
        c.parent = Some(parent);
        c.next_sibling = head;
        self.nodes[parent].first_child = Some(child);
    }

    fn link_last(&mut self, parent: u32, child: u32) {
        let last = self.children(parent).last();
        let c = &mut self.nodes[child];
        c.parent = Some(parent);
        c.next_sibling = None;
        match last {
            Some(last) => self.nodes[last].next_sibling = Some(child),
            None => self.nodes[parent].first_child = Some(child),
        }
    }

    /// Unlink `node` from its parent's child list. The node keeps its own
    /// children.
    pub fn remove_node(&mut self, node: u32) {
        let Some(parent) = self.nodes[node].parent else {
            self.nodes[node].next_sibling = None;
            return;
        };
        let next = self.nodes[node].next_sibling;
        if self.nodes[parent].first_child == Some(node) {
            self.nodes[parent].first_child = next;
        } else {
            let prev = self
                .children(parent)
                .find(|c| self.nodes[*c].next_sibling == Some(node));
            match prev {
                Some(prev) => self.nodes[prev].next_sibling = next,
                None => tracing::error!(
                    store = self.id,
                    node,
                    parent,
                    "node is missing from its parent's child list"
                ),
            }
        }
        let n = &mut self.nodes[node];
        n.parent = None;
        n.next_sibling = None;
    }

    /// Append all children of `source` to `destination`.
    ///
    /// A child that matches an existing child of `destination` is merged
    /// into it (metrics added, grandchildren moved recursively) so no two
    /// siblings ever match.
    pub fn move_children(&mut self, destination: u32, source: u32) -> ProfileResult<()> {
        let mut child = self.nodes[source].first_child.take();
        while let Some(c) = child {
            child = self.nodes[c].next_sibling.take();
            self.nodes[c].parent = None;
            self.adopt(destination, c)?;
        }
        Ok(())
    }

    fn adopt(&mut self, parent: u32, child: u32) -> ProfileResult<()> {
        let kind = self.nodes[child].kind;
        match self.find_child(parent, &kind) {
            Some(existing) => {
                self.merge_node_inclusive(existing, child);
                self.merge_node_sparse(existing, child)?;
                self.move_children(existing, child)?;
                // Keeps callpath lookups from the merged-away node working.
                self.nodes[child].parent = Some(parent);
            }
            None => self.link_last(parent, child),
        }
        Ok(())
    }

    fn merge_dense(&mut self, destination: u32, source: u32) {
        let src = self.nodes[source];
        let dst = &mut self.nodes[destination];
        dst.first_enter_time = dst.first_enter_time.min(src.first_enter_time);
        dst.last_exit_time = dst.last_exit_time.max(src.last_exit_time);
        dst.implicit_time.merge(&src.implicit_time);
        let dst_dense = dst.dense;
        for i in 0..self.num_dense_metrics as u32 {
            let value = self.dense[src.dense + i];
            self.dense[dst_dense + i].merge(&value);
        }
    }

    /// `destination += source` for visit count, timestamps and dense metrics.
    pub fn merge_node_inclusive(&mut self, destination: u32, source: u32) {
        self.nodes[destination].count += self.nodes[source].count;
        self.merge_dense(destination, source);
    }

    pub fn merge_node_sparse(&mut self, destination: u32, source: u32) -> ProfileResult<()> {
        let src = self.nodes[source];
        let ints = sparse::collect(&self.sparse_int, src.sparse_int);
        let doubles = sparse::collect(&self.sparse_double, src.sparse_double);

        let mut int_head = self.nodes[destination].sparse_int;
        let mut double_head = self.nodes[destination].sparse_double;
        sparse::merge_into(&mut self.sparse_int, &mut int_head, &ints)?;
        sparse::merge_into(&mut self.sparse_double, &mut double_head, &doubles)?;
        let dst = &mut self.nodes[destination];
        dst.sparse_int = int_head;
        dst.sparse_double = double_head;
        Ok(())
    }

    /// Recompute timestamps and dense metrics of `node` as the sum over its
    /// children. The node's own visit count is kept.
    pub fn sum_children(&mut self, node: u32) {
        let mut children = self.children(node);
        let Some(first) = children.next() else {
            return;
        };
        let rest: Vec<u32> = children.collect();

        let src = self.nodes[first];
        let dst = &mut self.nodes[node];
        dst.first_enter_time = src.first_enter_time;
        dst.last_exit_time = src.last_exit_time;
        dst.implicit_time.copy_from(&src.implicit_time);
        let dst_dense = dst.dense;
        for i in 0..self.num_dense_metrics as u32 {
            let value = self.dense[src.dense + i];
            self.dense[dst_dense + i].copy_from(&value);
        }

        for child in rest {
            self.merge_dense(node, child);
        }
    }

    /// Find or create the child of `parent` matching `kind` and add the
    /// inclusive metrics of `source` to it.
    pub fn merge_child(&mut self, parent: u32, kind: NodeKind, source: u32) -> ProfileResult<u32> {
        let timestamp = self.nodes[source].first_enter_time;
        let child = self.find_or_create_child(parent, kind, timestamp)?;
        self.merge_node_inclusive(child, source);
        Ok(child)
    }

    /// Rebuild `path` (top-down) below `root`, merging `source` into every
    /// node on it. Returns the leaf, or `root` for an empty path.
    pub fn add_callpath(&mut self, root: u32, path: &[NodeKind], source: u32) -> ProfileResult<u32> {
        path.iter()
            .try_fold(root, |parent, kind| self.merge_child(parent, *kind, source))
    }

    /// Node kinds from the nearest thread root or thread start down to `leaf`.
    pub fn callpath_kinds(&self, leaf: u32) -> Vec<NodeKind> {
        let mut path: Vec<NodeKind> = std::iter::successors(Some(leaf), |n| self.nodes[*n].parent)
            .map(|n| self.nodes[n].kind)
            .take_while(|kind| !kind.is_thread_boundary())
            .collect();
        path.reverse();
        path
    }

    pub(crate) fn start_values(&mut self, node: u32, timestamp: u64, samples: &[u64]) {
        let n = &mut self.nodes[node];
        n.implicit_time.start(timestamp);
        let dense = n.dense;
        for (i, value) in samples.iter().take(self.num_dense_metrics).enumerate() {
            self.dense[dense + i as u32].start(*value);
        }
    }

    /// Parameter nodes measure from the enter of their enclosing region.
    pub(crate) fn inherit_start_values(&mut self, node: u32, from: u32) {
        let src = self.nodes[from];
        let dst = &mut self.nodes[node];
        dst.implicit_time.start(src.implicit_time.start_value);
        let dst_dense = dst.dense;
        for i in 0..self.num_dense_metrics as u32 {
            let start = self.dense[src.dense + i].start_value;
            self.dense[dst_dense + i].start(start);
        }
    }

    pub(crate) fn exit_values(&mut self, node: u32, timestamp: u64, samples: &[u64]) {
        let n = &mut self.nodes[node];
        n.last_exit_time = timestamp;
        n.implicit_time.update(timestamp);
        let dense = n.dense;
        for (i, value) in samples.iter().take(self.num_dense_metrics).enumerate() {
            self.dense[dense + i as u32].update(*value);
        }
    }

    pub fn trigger_int(&mut self, node: u32, metric: MetricHandle, value: u64) -> ProfileResult<()> {
        let mut head = self.nodes[node].sparse_int;
        sparse::add_or_accumulate(&mut self.sparse_int, &mut head, metric, value)?;
        self.nodes[node].sparse_int = head;
        Ok(())
    }

    pub fn trigger_double(
        &mut self,
        node: u32,
        metric: MetricHandle,
        value: f64,
    ) -> ProfileResult<()> {
        let mut head = self.nodes[node].sparse_double;
        sparse::add_or_accumulate(&mut self.sparse_double, &mut head, metric, value)?;
        self.nodes[node].sparse_double = head;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calltree_protocol::{LocationId, RegionHandle};

    use crate::node::ThreadRootData;

    fn store(num_dense: usize) -> NodeStore {
        NodeStore::new(0, PageBudget::with_limit(256, 4096), num_dense)
    }

    fn region(id: u32) -> NodeKind {
        NodeKind::RegularRegion(RegionHandle(id))
    }

    fn root(store: &mut NodeStore) -> u32 {
        let kind = NodeKind::ThreadRoot(ThreadRootData {
            location: LocationId(0),
            parent: None,
        });
        store.create_node(None, kind, 0).unwrap_or(u32::MAX)
    }

    /// Create a child of `parent` that ran once from `start` to `end`.
    fn timed(store: &mut NodeStore, parent: u32, kind: NodeKind, start: u64, end: u64) -> u32 {
        let node = store
            .find_or_create_child(parent, kind, start)
            .unwrap_or(u32::MAX);
        store.node_mut(node).count += 1;
        store.start_values(node, start, &[start * 2]);
        store.exit_values(node, end, &[end * 2]);
        node
    }

    fn child_regions(store: &NodeStore, parent: u32) -> Vec<u32> {
        store
            .children(parent)
            .filter_map(|c| store.node(c).kind.region())
            .map(|r| r.0)
            .collect()
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let mut s = store(0);
        let r = root(&mut s);
        let a = s.find_or_create_child(r, region(1), 5).unwrap_or(0);
        let b = s.find_or_create_child(r, region(1), 9).unwrap_or(1);
        assert_eq!(a, b);
        assert_eq!(s.children(r).count(), 1);
        // New children go to the front.
        let _ = s.find_or_create_child(r, region(2), 9);
        assert_eq!(child_regions(&s, r), vec![2, 1]);
        assert_eq!(s.node(a).parent(), Some(r));
    }

    #[test]
    fn copy_keeps_metrics_and_drops_links() {
        let mut s = store(2);
        let r = root(&mut s);
        let n = timed(&mut s, r, region(3), 10, 25);
        let _ = timed(&mut s, n, region(4), 11, 12);
        assert!(s.trigger_int(n, MetricHandle(0), 7).is_ok());
        assert!(s.trigger_int(n, MetricHandle(1), 8).is_ok());
        assert!(s.trigger_double(n, MetricHandle(2), 0.5).is_ok());

        let copy = s.copy_node(n).unwrap_or(u32::MAX);
        assert_ne!(copy, n);
        assert_eq!(s.metrics(copy), s.metrics(n));
        assert!(s.node(copy).is_detached());
        assert_eq!(s.node(copy).kind, region(3));

        // Independent storage.
        assert!(s.trigger_int(copy, MetricHandle(0), 1).is_ok());
        assert_eq!(s.metrics(n).sparse_int.iter().map(|e| e.sum).sum::<u64>(), 15);
        assert_eq!(s.metrics(copy).sparse_int.iter().map(|e| e.sum).sum::<u64>(), 16);
    }

    #[test]
    fn remove_node_unlinks_from_middle() {
        let mut s = store(0);
        let r = root(&mut s);
        let ids: Vec<u32> = (1..=3)
            .map(|i| s.create_node(Some(r), region(i), 0).unwrap_or(u32::MAX))
            .collect();
        assert_eq!(child_regions(&s, r), vec![3, 2, 1]);
        s.remove_node(ids[1]);
        assert_eq!(child_regions(&s, r), vec![3, 1]);
        assert!(s.node(ids[1]).parent().is_none());
        assert!(s.node(ids[1]).next_sibling().is_none());
    }

    #[test]
    fn move_children_merges_matching_siblings() {
        let mut s = store(1);
        let r = root(&mut s);
        let dst = s.create_node(Some(r), region(1), 0).unwrap_or(u32::MAX);
        let src = s.create_node(Some(r), region(2), 0).unwrap_or(u32::MAX);
        let a = timed(&mut s, dst, region(10), 0, 4);
        let _ = timed(&mut s, a, region(20), 1, 2);
        let b = timed(&mut s, src, region(10), 10, 16);
        let _ = timed(&mut s, b, region(21), 11, 12);
        let _ = timed(&mut s, src, region(11), 20, 21);

        assert!(s.move_children(dst, src).is_ok());
        assert!(s.node(src).first_child().is_none());
        assert_eq!(child_regions(&s, dst), vec![10, 11]);

        let merged = s.metrics(a);
        assert_eq!(merged.count, 2);
        assert_eq!(merged.implicit_time.sum, 10);
        assert_eq!(merged.implicit_time.min, 4);
        assert_eq!(merged.last_exit_time, 16);
        assert_eq!(merged.dense[0].sum, 20);
        let mut grand = child_regions(&s, a);
        grand.sort_unstable();
        assert_eq!(grand, vec![20, 21]);
    }

    #[test]
    fn sum_children_is_order_independent() {
        let runs = [(0, 30), (5, 6), (40, 52)];
        let build = |order: &[usize]| {
            let mut s = store(1);
            let r = root(&mut s);
            let p = s.create_node(Some(r), region(0), 0).unwrap_or(u32::MAX);
            s.node_mut(p).count = 4;
            for i in order {
                let (start, end) = runs[*i];
                let _ = timed(&mut s, p, region(*i as u32 + 1), start, end);
            }
            s.sum_children(p);
            s.metrics(p)
        };
        let forward = build(&[0, 1, 2]);
        let backward = build(&[2, 1, 0]);
        assert_eq!(forward.implicit_time.sum, 43);
        assert_eq!(forward.implicit_time.sum, backward.implicit_time.sum);
        assert_eq!(forward.implicit_time.min, backward.implicit_time.min);
        assert_eq!(forward.implicit_time.max, backward.implicit_time.max);
        assert_eq!(forward.implicit_time.squares, backward.implicit_time.squares);
        assert_eq!(forward.dense[0].sum, backward.dense[0].sum);
        assert_eq!((forward.first_enter_time, forward.last_exit_time), (0, 52));
        assert_eq!(forward.count, 4);
    }

    #[test]
    fn add_callpath_merges_along_the_path() {
        let mut s = store(0);
        let r = root(&mut s);
        let source = timed(&mut s, r, region(9), 0, 100);
        let path = [region(1), region(2)];
        let leaf = s.add_callpath(r, &path, source).unwrap_or(u32::MAX);
        let again = s.add_callpath(r, &path, source).unwrap_or(u32::MAX);
        assert_eq!(leaf, again);
        assert_eq!(s.callpath_kinds(leaf), path.to_vec());
        assert_eq!(s.node(leaf).implicit_time.sum, 200);
        assert_eq!(s.node(leaf).count, 2);
        assert_eq!(s.add_callpath(r, &[], source).unwrap_or(u32::MAX), r);
    }

    #[test]
    fn preorder_reports_depth() {
        let mut s = store(0);
        let r = root(&mut s);
        let main = timed(&mut s, r, region(1), 0, 50);
        let _ = timed(&mut s, main, region(2), 10, 30);
        let order: Vec<(u32, u32)> = s.preorder(r).collect();
        assert_eq!(order.len(), 3);
        assert_eq!(order[2].1, 2);
    }

    #[test]
    fn location_metrics_widen_existing_nodes() {
        let mut s = store(1);
        let r = root(&mut s);
        let main = timed(&mut s, r, region(1), 0, 50);
        assert!(s.add_location_metrics(2).is_ok());
        assert_eq!((s.num_dense_metrics(), s.num_location_metrics()), (3, 2));

        let dense = s.dense_metrics(main);
        assert_eq!(dense.len(), 3);
        assert_eq!(dense[0].sum, 100);
        assert!(dense[1].is_untouched() && dense[2].is_untouched());

        let work = s.find_or_create_child(main, region(2), 60).unwrap_or(u32::MAX);
        s.start_values(work, 60, &[0, 10, 20]);
        s.exit_values(work, 70, &[5, 17, 40]);
        let sums: Vec<u64> = s.dense_metrics(work).iter().map(|m| m.sum).collect();
        assert_eq!(sums, vec![5, 7, 20]);
        assert_eq!(s.dense_metrics(r).len(), 3);
    }
}
