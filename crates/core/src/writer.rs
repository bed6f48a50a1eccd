//! Conversion of a finished calltree into the writer-facing snapshot.

use calltree_protocol::{
    Definitions, DenseValue, NodeKindSnapshot, NodeSnapshot, ProfileSnapshot, SnapshotMeta,
    SparseDoubleValue, SparseIntValue, ThreadSnapshot,
};

use crate::calltree::Calltree;
use crate::metric::{DenseMetric, SparseDouble, SparseInt};
use crate::node::{NodeId, NodeKind};

fn dense_value(m: &DenseMetric) -> DenseValue {
    DenseValue {
        sum: m.sum,
        // Never-updated metrics report 0 rather than the u64::MAX sentinel.
        min: if m.is_untouched() { 0 } else { m.min },
        max: m.max,
        squares: m.squares,
    }
}

fn sparse_int_value(e: &SparseInt) -> SparseIntValue {
    SparseIntValue {
        metric: e.metric,
        count: e.count,
        sum: e.sum,
        min: e.min,
        max: e.max,
        squares: e.squares,
    }
}

fn sparse_double_value(e: &SparseDouble) -> SparseDoubleValue {
    SparseDoubleValue {
        metric: e.metric,
        count: e.count,
        sum: e.sum,
        min: e.min,
        max: e.max,
        squares: e.squares,
    }
}

fn kind_snapshot(kind: &NodeKind, defs: Option<&Definitions>) -> NodeKindSnapshot {
    match *kind {
        NodeKind::RegularRegion(region) => NodeKindSnapshot::RegularRegion {
            region,
            name: defs.and_then(|d| d.region_name(region)).cloned(),
        },
        NodeKind::ParameterString { parameter, value } => NodeKindSnapshot::ParameterString {
            parameter,
            value,
            name: defs.and_then(|d| d.parameter_name(parameter)).cloned(),
        },
        NodeKind::ParameterInteger { parameter, value } => NodeKindSnapshot::ParameterInteger {
            parameter,
            value,
            name: defs.and_then(|d| d.parameter_name(parameter)).cloned(),
        },
        NodeKind::ThreadRoot(data) => NodeKindSnapshot::ThreadRoot {
            location: data.location,
        },
        NodeKind::ThreadStart { .. } => NodeKindSnapshot::ThreadStart,
        NodeKind::Collapse { depth } => NodeKindSnapshot::Collapse { depth },
    }
}

impl Calltree {
    fn node_snapshot(
        &self,
        id: NodeId,
        index: usize,
        parent: Option<usize>,
        depth: u32,
        defs: Option<&Definitions>,
    ) -> Option<NodeSnapshot> {
        let node = self.node(id)?;
        Some(NodeSnapshot {
            id: index,
            parent,
            depth,
            kind: kind_snapshot(&node.kind, defs),
            count: node.count,
            first_enter_time: node.first_enter_time,
            last_exit_time: node.last_exit_time,
            implicit_time: dense_value(&node.implicit_time),
            dense: self.dense_metrics(id).iter().map(dense_value).collect(),
            sparse_int: self
                .sparse_int(id)
                .into_iter()
                .map(sparse_int_value)
                .collect(),
            sparse_double: self
                .sparse_double(id)
                .into_iter()
                .map(sparse_double_value)
                .collect(),
        })
    }

    fn thread_snapshot(&self, root: NodeId, defs: Option<&Definitions>) -> Option<ThreadSnapshot> {
        let location = self.root_location(root)?;
        let root_snapshot = self.node_snapshot(root, 0, None, 0, defs)?;

        // Pre-order below the root; a stack of (node, parent index, depth).
        let mut nodes = Vec::new();
        let mut stack: Vec<(NodeId, Option<usize>, u32)> =
            self.children(root).map(|c| (c, None, 1)).collect();
        stack.reverse();
        while let Some((id, parent, depth)) = stack.pop() {
            let index = nodes.len();
            if let Some(snapshot) = self.node_snapshot(id, index, parent, depth, defs) {
                nodes.push(snapshot);
                let children: Vec<NodeId> = self.children(id).collect();
                stack.extend(children.into_iter().rev().map(|c| (c, Some(index), depth + 1)));
            }
        }
        Some(ThreadSnapshot {
            location,
            num_location_metrics: self.store(root.store)?.num_location_metrics(),
            root: root_snapshot,
            nodes,
        })
    }

    /// Flatten the tree for writers. Names are filled in from `defs` when
    /// given.
    pub fn snapshot(&self, defs: Option<&Definitions>) -> ProfileSnapshot {
        ProfileSnapshot {
            meta: SnapshotMeta {
                num_dense_metrics: self.meta.num_dense_metrics,
                has_collapse_node: self.meta.has_collapse_node,
                reached_depth: self.meta.reached_depth,
                max_callpath_depth: self.meta.max_callpath_depth,
                max_callpath_num: self.meta.max_callpath_num,
            },
            threads: self
                .roots
                .iter()
                .filter_map(|r| self.thread_snapshot(*r, defs))
                .collect(),
        }
    }
}
