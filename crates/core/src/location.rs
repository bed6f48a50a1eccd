//! Measurement state of one location (thread or task).
//!
//! A [`Location`] is owned and mutated by exactly one thread. The few bits
//! other threads need to see, the fork points and the last thread-creation
//! point, live behind a cloneable [`LocationHandle`].

use std::sync::{Arc, Mutex, PoisonError};

use calltree_protocol::LocationId;

use crate::node::{NodeId, NodeKind};
use crate::store::NodeStore;

/// Node (and callpath depth) a thread team or a created thread starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkPoint {
    pub node: NodeId,
    pub depth: u64,
}

#[derive(Debug)]
struct Shared {
    id: LocationId,
    fork_points: Mutex<Vec<ForkPoint>>,
    creation_point: Mutex<Option<ForkPoint>>,
}

#[derive(Debug, Clone)]
pub struct LocationHandle(Arc<Shared>);

impl LocationHandle {
    fn new(id: LocationId) -> Self {
        Self(Arc::new(Shared {
            id,
            fork_points: Mutex::new(Vec::new()),
            creation_point: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> LocationId {
        self.0.id
    }

    pub(crate) fn push_fork_point(&self, point: ForkPoint) {
        self.0
            .fork_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(point);
    }

    pub(crate) fn pop_fork_point(&self) -> Option<ForkPoint> {
        self.0
            .fork_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    /// Innermost fork that has not been joined yet.
    pub fn current_fork_point(&self) -> Option<ForkPoint> {
        self.0
            .fork_points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }

    pub(crate) fn set_creation_point(&self, point: ForkPoint) {
        *self
            .0
            .creation_point
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(point);
    }

    /// Where this location last created a thread.
    pub fn creation_point(&self) -> Option<ForkPoint> {
        *self
            .0
            .creation_point
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cursor and depth saved by a thread activation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Activation {
    pub cursor: u32,
    pub depth: u64,
}

#[derive(Debug)]
pub struct Location {
    pub(crate) handle: LocationHandle,
    pub(crate) parent: Option<LocationId>,
    pub(crate) store: NodeStore,
    pub(crate) root: Option<u32>,
    /// The current node. The tree itself is the call stack: enter descends,
    /// exit ascends.
    pub(crate) cursor: Option<u32>,
    pub(crate) depth: u64,
    pub(crate) activations: Vec<Activation>,
    pub(crate) generation: u64,
}

impl Location {
    pub(crate) fn new(
        id: LocationId,
        parent: Option<LocationId>,
        store: NodeStore,
        generation: u64,
    ) -> Self {
        Self {
            handle: LocationHandle::new(id),
            parent,
            store,
            root: None,
            cursor: None,
            depth: 0,
            activations: Vec::new(),
            generation,
        }
    }

    pub fn id(&self) -> LocationId {
        self.handle.id()
    }

    pub fn parent(&self) -> Option<LocationId> {
        self.parent
    }

    pub fn handle(&self) -> &LocationHandle {
        &self.handle
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// The thread root, `None` if the location never got one.
    pub fn root(&self) -> Option<u32> {
        self.root
    }

    pub fn current_node(&self) -> Option<u32> {
        self.cursor
    }

    pub fn current_node_id(&self) -> Option<NodeId> {
        self.cursor.map(|c| NodeId::new(self.store.id(), c))
    }

    pub fn current_kind(&self) -> Option<NodeKind> {
        self.cursor.map(|c| self.store.node(c).kind)
    }

    /// Current callpath depth; thread roots sit at depth 0.
    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub(crate) fn descend(&mut self, child: u32) {
        self.cursor = Some(child);
    }

    pub(crate) fn ascend(&mut self) {
        if let Some(cursor) = self.cursor {
            self.cursor = self.store.node(cursor).parent().or(self.root);
        }
    }

    pub(crate) fn fork_point(&self) -> Option<ForkPoint> {
        self.current_node_id().map(|node| ForkPoint {
            node,
            depth: self.depth,
        })
    }
}
