//! Calltree node: type tag, payload and the per-type identity rules.

use calltree_protocol::{LocationId, ParameterHandle, RegionHandle, StringHandle};

use crate::metric::DenseMetric;

/// Address of a node: the store (one per location) and the slot inside it.
///
/// Only valid while the store it points into is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub store: u32,
    pub index: u32,
}

impl NodeId {
    pub const fn new(store: u32, index: u32) -> Self {
        Self { store, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    RegularRegion,
    ParameterString,
    ParameterInteger,
    ThreadRoot,
    ThreadStart,
    Collapse,
}

impl NodeType {
    pub fn name(self) -> &'static str {
        match self {
            Self::RegularRegion => "regular region",
            Self::ParameterString => "parameter string",
            Self::ParameterInteger => "parameter integer",
            Self::ThreadRoot => "thread root",
            Self::ThreadStart => "thread start",
            Self::Collapse => "collapse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadRootData {
    pub location: LocationId,
    pub parent: Option<LocationId>,
}

/// Node type together with its type-specific payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    RegularRegion(RegionHandle),
    ParameterString {
        parameter: ParameterHandle,
        value: StringHandle,
    },
    ParameterInteger {
        parameter: ParameterHandle,
        value: i64,
    },
    ThreadRoot(ThreadRootData),
    /// Entry point of a thread activation; `fork_node` is the creation point
    /// in the forking location's tree, if one was tracked.
    ThreadStart {
        fork_node: Option<NodeId>,
    },
    Collapse {
        depth: u64,
    },
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::RegularRegion(_) => NodeType::RegularRegion,
            Self::ParameterString { .. } => NodeType::ParameterString,
            Self::ParameterInteger { .. } => NodeType::ParameterInteger,
            Self::ThreadRoot(_) => NodeType::ThreadRoot,
            Self::ThreadStart { .. } => NodeType::ThreadStart,
            Self::Collapse { .. } => NodeType::Collapse,
        }
    }

    /// Sibling identity. Two children of one parent must never match.
    ///
    /// Collapse nodes match each other whatever their depth: the depth is
    /// kept for diagnostics only.
    pub fn matches(&self, other: &NodeKind) -> bool {
        match (self, other) {
            (Self::RegularRegion(a), Self::RegularRegion(b)) => a == b,
            (
                Self::ParameterString {
                    parameter: pa,
                    value: va,
                },
                Self::ParameterString {
                    parameter: pb,
                    value: vb,
                },
            ) => pa == pb && va == vb,
            (
                Self::ParameterInteger {
                    parameter: pa,
                    value: va,
                },
                Self::ParameterInteger {
                    parameter: pb,
                    value: vb,
                },
            ) => pa == pb && va == vb,
            (Self::ThreadRoot(a), Self::ThreadRoot(b)) => a.location == b.location,
            (Self::ThreadStart { fork_node: a }, Self::ThreadStart { fork_node: b }) => a == b,
            (Self::Collapse { .. }, Self::Collapse { .. }) => true,
            _ => false,
        }
    }

    pub fn is_parameter(&self) -> bool {
        matches!(
            self,
            Self::ParameterString { .. } | Self::ParameterInteger { .. }
        )
    }

    /// Thread roots and thread starts end a callpath.
    pub fn is_thread_boundary(&self) -> bool {
        matches!(self, Self::ThreadRoot(_) | Self::ThreadStart { .. })
    }

    pub fn region(&self) -> Option<RegionHandle> {
        match self {
            Self::RegularRegion(region) => Some(*region),
            _ => None,
        }
    }
}

/// One calltree node. Links are slots in the same store.
#[derive(Debug, Clone, Copy)]
pub struct CalltreeNode {
    pub kind: NodeKind,
    pub(crate) parent: Option<u32>,
    pub(crate) first_child: Option<u32>,
    pub(crate) next_sibling: Option<u32>,
    pub count: u64,
    pub first_enter_time: u64,
    pub last_exit_time: u64,
    pub implicit_time: DenseMetric,
    /// First slot of this node's dense metrics in the store's dense arena.
    pub(crate) dense: u32,
    pub(crate) sparse_int: Option<u32>,
    pub(crate) sparse_double: Option<u32>,
}

impl CalltreeNode {
    pub(crate) fn new(kind: NodeKind, timestamp: u64, dense: u32) -> Self {
        Self {
            kind,
            parent: None,
            first_child: None,
            next_sibling: None,
            count: 0,
            first_enter_time: timestamp,
            last_exit_time: timestamp,
            implicit_time: DenseMetric::new(),
            dense,
            sparse_int: None,
            sparse_double: None,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    pub fn first_child(&self) -> Option<u32> {
        self.first_child
    }

    pub fn next_sibling(&self) -> Option<u32> {
        self.next_sibling
    }

    /// True if the node hangs in no tree and owns no children.
    pub fn is_detached(&self) -> bool {
        self.parent.is_none() && self.first_child.is_none() && self.next_sibling.is_none()
    }
}
