//! The calltree engine.
//!
//! [`Profile`] is the context object every event goes through. It is shared
//! by all measurement threads (wrap it in an `Arc`); each thread passes its
//! own [`Location`] by `&mut`, so tree mutation needs no locking. The only
//! shared mutable state is the root registry, the pending configuration and
//! a handful of atomics.
//!
//! Event entry points never fail: an allocation failure disables the whole
//! profile once and for all and every later call returns immediately.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use calltree_protocol::{LocationId, MetricHandle, ParameterHandle, RegionHandle, StringHandle};

use crate::arena::PageBudget;
use crate::calltree::{Calltree, CalltreeMeta};
use crate::config::ProfileConfig;
use crate::debug;
use crate::error::{ProfileError, ProfileResult};
use crate::location::{Activation, Location, LocationHandle};
use crate::node::{NodeId, NodeKind, ThreadRootData};
use crate::store::NodeStore;

/// A registered thread root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootEntry {
    pub location: LocationId,
    pub store: u32,
}

#[derive(Debug)]
pub struct Profile {
    config: ProfileConfig,
    num_dense_metrics: usize,
    budget: Arc<PageBudget>,

    is_initialized: AtomicBool,
    stopped: AtomicBool,
    reinitialize: AtomicBool,
    has_collapse_node: AtomicBool,
    reached_depth: AtomicU64,
    node_count: AtomicU64,
    generation: AtomicU64,
    max_callpath_depth: AtomicU64,
    max_callpath_num: AtomicU64,

    pending_limits: Mutex<Option<(u64, u64)>>,
    roots: Mutex<Vec<RootEntry>>,
}

impl Profile {
    /// A profile with `num_dense_metrics` dense metrics on every node.
    /// Measurement starts with [`Profile::initialize`].
    pub fn new(config: ProfileConfig, num_dense_metrics: usize) -> ProfileResult<Self> {
        config.validate()?;
        Ok(Self::with_budget(
            PageBudget::new(&config),
            config,
            num_dense_metrics,
        ))
    }

    /// Like [`Profile::new`] but drawing pages from the given budget.
    pub fn with_budget(
        budget: Arc<PageBudget>,
        config: ProfileConfig,
        num_dense_metrics: usize,
    ) -> Self {
        Self {
            max_callpath_depth: AtomicU64::new(config.max_callpath_depth),
            max_callpath_num: AtomicU64::new(config.max_callpath_num),
            config,
            num_dense_metrics,
            budget,
            is_initialized: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            reinitialize: AtomicBool::new(false),
            has_collapse_node: AtomicBool::new(false),
            reached_depth: AtomicU64::new(0),
            node_count: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            pending_limits: Mutex::new(None),
            roots: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    pub fn num_dense_metrics(&self) -> usize {
        self.num_dense_metrics
    }

    pub fn budget(&self) -> &Arc<PageBudget> {
        &self.budget
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized.load(Ordering::Acquire)
    }

    /// True once the profile was initialized a second time.
    pub fn is_reinitialized(&self) -> bool {
        self.reinitialize.load(Ordering::Acquire)
    }

    pub fn has_collapse_node(&self) -> bool {
        self.has_collapse_node.load(Ordering::Acquire)
    }

    pub fn reached_depth(&self) -> u64 {
        self.reached_depth.load(Ordering::Acquire)
    }

    /// Nodes created in the current phase, collapse nodes excluded.
    pub fn node_count(&self) -> u64 {
        self.node_count.load(Ordering::Acquire)
    }

    pub fn max_callpath_depth(&self) -> u64 {
        self.max_callpath_depth.load(Ordering::Acquire)
    }

    pub fn max_callpath_num(&self) -> u64 {
        self.max_callpath_num.load(Ordering::Acquire)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Locations with a thread root, in creation order.
    pub fn root_entries(&self) -> Vec<RootEntry> {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True after [`Profile::stop`]; a stopped profile never restarts.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Start a measurement phase. Locations of earlier phases become inert.
    pub fn initialize(&self) {
        if self.is_stopped() {
            tracing::warn!("profiling was stopped after an error; not reinitializing");
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if generation > 1 {
            self.reinitialize.store(true, Ordering::Release);
        }
        let pending = self
            .pending_limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((depth, num)) = pending {
            self.max_callpath_depth.store(depth, Ordering::Release);
            self.max_callpath_num.store(num, Ordering::Release);
        }
        self.has_collapse_node.store(false, Ordering::Release);
        self.reached_depth.store(0, Ordering::Release);
        self.node_count.store(0, Ordering::Release);
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.is_initialized.store(true, Ordering::Release);
        tracing::debug!(
            generation,
            max_callpath_depth = self.max_callpath_depth(),
            max_callpath_num = self.max_callpath_num(),
            "profile initialized"
        );
    }

    /// Limits to use from the next [`Profile::initialize`] on.
    pub fn set_calltree_configuration(&self, max_callpath_depth: u64, max_callpath_num: u64) {
        *self
            .pending_limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((max_callpath_depth, max_callpath_num));
    }

    /// End the measurement phase. Event calls become no-ops.
    pub fn finalize(&self) {
        self.is_initialized.store(false, Ordering::Release);
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::debug!(generation = self.generation(), "profile finalized");
    }

    /// Disable profiling for good after an unrecoverable error on `location`.
    pub fn stop(&self, location: &Location, err: &ProfileError) {
        self.stopped.store(true, Ordering::Release);
        let was_running = self.is_initialized.swap(false, Ordering::AcqRel);
        tracing::error!(location = %location.id(), error = %err, "profiling disabled");
        if was_running && self.config.core_files {
            match debug::write_core_file(&self.config, location, &err.to_string()) {
                Ok(path) => tracing::info!(path = %path.display(), "wrote core file"),
                Err(err) => tracing::error!(error = %err, "failed to write core file"),
            }
        }
    }

    /// The location's current node, if events for it are accepted.
    fn active_cursor(&self, location: &Location) -> Option<u32> {
        if !self.is_initialized() || location.generation != self.generation() {
            return None;
        }
        location.cursor
    }

    /// Count a new node against `max_callpath_num`.
    fn reserve_node(&self) -> bool {
        let limit = self.max_callpath_num();
        self.node_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn note_collapse(&self, depth: u64) {
        self.reached_depth.fetch_max(depth, Ordering::AcqRel);
        if !self.has_collapse_node.swap(true, Ordering::AcqRel) {
            tracing::debug!(depth, "calltree limit reached, collapsing");
        }
    }

    pub fn on_location_creation(&self, id: LocationId, parent: Option<LocationId>) -> Location {
        let generation = self.generation();
        if !self.is_initialized() {
            let store = NodeStore::new(u32::MAX, self.budget.clone(), self.num_dense_metrics);
            return Location::new(id, parent, store, generation);
        }

        let mut roots = self.roots.lock().unwrap_or_else(PoisonError::into_inner);
        let store_id = roots.len() as u32;
        let store = NodeStore::new(store_id, self.budget.clone(), self.num_dense_metrics);
        let mut location = Location::new(id, parent, store, generation);
        let kind = NodeKind::ThreadRoot(ThreadRootData {
            location: id,
            parent,
        });
        match location.store.create_node(None, kind, 0) {
            Ok(root) => {
                location.store.node_mut(root).count = 1;
                location.root = Some(root);
                location.descend(root);
                roots.push(RootEntry {
                    location: id,
                    store: store_id,
                });
                self.node_count.fetch_add(1, Ordering::AcqRel);
                tracing::debug!(location = %id, store = store_id, "location created");
            }
            Err(err) => {
                drop(roots);
                self.stop(&location, &err);
            }
        }
        location
    }

    /// Move into the child of `cursor` matching `kind`, creating it if
    /// needed. Returns `None` when a collapse node absorbs the step.
    fn step_into(
        &self,
        location: &mut Location,
        cursor: u32,
        kind: NodeKind,
        timestamp: u64,
    ) -> ProfileResult<Option<u32>> {
        let depth = location.depth;
        if let NodeKind::Collapse { .. } = location.store.node(cursor).kind {
            self.reached_depth.fetch_max(depth, Ordering::AcqRel);
            return Ok(None);
        }

        let collapse = NodeKind::Collapse { depth };
        let kind = if depth > self.max_callpath_depth() {
            self.note_collapse(depth);
            collapse
        } else {
            kind
        };
        if let Some(child) = location.store.find_child(cursor, &kind) {
            return Ok(Some(child));
        }

        let is_collapse = matches!(kind, NodeKind::Collapse { .. });
        let kind = if !is_collapse && !self.reserve_node() {
            self.note_collapse(depth);
            if let Some(child) = location.store.find_child(cursor, &collapse) {
                return Ok(Some(child));
            }
            collapse
        } else {
            kind
        };
        location
            .store
            .create_node(Some(cursor), kind, timestamp)
            .map(Some)
    }

    pub fn enter(
        &self,
        location: &mut Location,
        region: RegionHandle,
        timestamp: u64,
        metrics: &[u64],
    ) {
        let Some(cursor) = self.active_cursor(location) else {
            return;
        };
        location.depth += 1;
        match self.step_into(location, cursor, NodeKind::RegularRegion(region), timestamp) {
            Ok(Some(node)) => {
                location.store.node_mut(node).count += 1;
                location.store.start_values(node, timestamp, metrics);
                location.descend(node);
            }
            Ok(None) => {}
            Err(err) => self.stop(location, &err),
        }
    }

    pub fn exit(
        &self,
        location: &mut Location,
        region: RegionHandle,
        timestamp: u64,
        metrics: &[u64],
    ) {
        let Some(cursor) = self.active_cursor(location) else {
            return;
        };
        self.exit_node(location, cursor, Some(region), timestamp, metrics);
    }

    /// Close the region the cursor is in. With `expected` set, the exit is
    /// dropped unless it names that region.
    fn exit_node(
        &self,
        location: &mut Location,
        cursor: u32,
        expected: Option<RegionHandle>,
        timestamp: u64,
        metrics: &[u64],
    ) {
        if let NodeKind::Collapse { depth } = location.store.node(cursor).kind {
            if location.depth > depth {
                location.depth -= 1;
                return;
            }
            location.store.exit_values(cursor, timestamp, metrics);
            location.depth = location.depth.saturating_sub(1);
            location.ascend();
            return;
        }

        let region_node = match enclosing_region(&location.store, cursor) {
            Ok(node) => node,
            Err(node) => {
                tracing::error!(
                    location = %location.id(),
                    found = location.store.node(node).node_type().name(),
                    "exit without a matching enter; event ignored"
                );
                return;
            }
        };
        let found = location.store.node(region_node).kind.region();
        if let Some(expected) = expected.filter(|e| found != Some(*e)) {
            tracing::error!(
                location = %location.id(),
                expected = expected.0,
                found = ?found,
                "exit does not match the current region; event ignored"
            );
            return;
        }

        let mut node = cursor;
        loop {
            location.store.exit_values(node, timestamp, metrics);
            if node == region_node {
                break;
            }
            match location.store.node(node).parent() {
                Some(parent) => node = parent,
                None => break,
            }
        }
        location.cursor = location.store.node(region_node).parent().or(location.root);
        location.depth = location.depth.saturating_sub(1);
    }

    pub fn trigger_integer(&self, location: &mut Location, metric: MetricHandle, value: u64) {
        let Some(cursor) = self.active_cursor(location) else {
            return;
        };
        if let Err(err) = location.store.trigger_int(cursor, metric, value) {
            self.stop(location, &err);
        }
    }

    pub fn trigger_double(&self, location: &mut Location, metric: MetricHandle, value: f64) {
        let Some(cursor) = self.active_cursor(location) else {
            return;
        };
        if let Err(err) = location.store.trigger_double(cursor, metric, value) {
            self.stop(location, &err);
        }
    }

    pub fn parameter_string(
        &self,
        location: &mut Location,
        parameter: ParameterHandle,
        value: StringHandle,
    ) {
        self.enter_parameter(location, NodeKind::ParameterString { parameter, value });
    }

    pub fn parameter_integer(&self, location: &mut Location, parameter: ParameterHandle, value: i64) {
        self.enter_parameter(location, NodeKind::ParameterInteger { parameter, value });
    }

    /// Parameter nodes open a sub-scope of the current region without
    /// changing the depth; the region's exit closes them.
    fn enter_parameter(&self, location: &mut Location, kind: NodeKind) {
        let Some(cursor) = self.active_cursor(location) else {
            return;
        };
        let parent = location.store.node(cursor);
        if let NodeKind::Collapse { .. } = parent.kind {
            return;
        }
        let timestamp = parent.implicit_time.start_value;

        let child = match location.store.find_child(cursor, &kind) {
            Some(child) => child,
            None => {
                if !self.reserve_node() {
                    self.note_collapse(location.depth);
                    return;
                }
                match location.store.create_node(Some(cursor), kind, timestamp) {
                    Ok(child) => child,
                    Err(err) => {
                        self.stop(location, &err);
                        return;
                    }
                }
            }
        };
        location.store.node_mut(child).count += 1;
        location.store.inherit_start_values(child, cursor);
        location.descend(child);
    }

    /// Give `location` `count` dense metrics of its own. They follow the
    /// profile-wide metrics, so enter/exit samples of this location carry
    /// the profile-wide values first.
    pub fn add_location_specific_metrics(&self, location: &mut Location, count: usize) {
        if self.active_cursor(location).is_none() || count == 0 {
            return;
        }
        match location.store.add_location_metrics(count) {
            Ok(()) => tracing::debug!(
                location = %location.id(),
                count,
                total = location.store.num_dense_metrics(),
                "location specific metrics added"
            ),
            Err(err) => self.stop(location, &err),
        }
    }

    pub fn on_fork(&self, location: &Location, max_child_threads: usize, nesting_level: u32) {
        if self.active_cursor(location).is_none() {
            return;
        }
        if let Some(point) = location.fork_point() {
            location.handle.push_fork_point(point);
            tracing::trace!(
                location = %location.id(),
                max_child_threads,
                nesting_level,
                depth = point.depth,
                "fork"
            );
        }
    }

    pub fn on_join(&self, location: &Location) {
        if self.active_cursor(location).is_none() {
            return;
        }
        if location.handle.pop_fork_point().is_none() {
            tracing::error!(location = %location.id(), "join without a matching fork");
        }
    }

    /// `parent` creates the thread that will run on location `created`.
    pub fn on_thread_creation(&self, created: LocationId, parent: &Location) {
        if self.active_cursor(parent).is_none() {
            return;
        }
        if let Some(point) = parent.fork_point() {
            parent.handle.set_creation_point(point);
            tracing::trace!(location = %created, parent = %parent.id(), "thread created");
        }
    }

    /// `location` starts executing work handed over by `parent`.
    ///
    /// A location already inside a region (the forking thread joining its
    /// own team) keeps measuring where it is.
    pub fn on_thread_activation(
        &self,
        location: &mut Location,
        parent: Option<&LocationHandle>,
        nesting_level: u32,
    ) {
        let Some(cursor) = self.active_cursor(location) else {
            return;
        };
        let Some(root) = location.root else {
            return;
        };
        let creation_point =
            parent.and_then(|p| p.current_fork_point().or_else(|| p.creation_point()));
        location.activations.push(Activation {
            cursor,
            depth: location.depth,
        });
        if cursor != root {
            return;
        }

        let kind = NodeKind::ThreadStart {
            fork_node: creation_point.map(|p| p.node),
        };
        let start = match location.store.find_child(root, &kind) {
            Some(start) => start,
            None => {
                self.node_count.fetch_add(1, Ordering::AcqRel);
                match location.store.create_node(Some(root), kind, 0) {
                    Ok(start) => start,
                    Err(err) => {
                        self.stop(location, &err);
                        return;
                    }
                }
            }
        };
        location.store.node_mut(start).count += 1;
        location.depth = creation_point.map_or(0, |p| p.depth);
        location.descend(start);
        tracing::trace!(
            location = %location.id(),
            nesting_level,
            tracked = creation_point.is_some(),
            "thread activated"
        );
    }

    pub fn on_thread_deactivation(&self, location: &mut Location, parent: Option<&LocationHandle>) {
        if self.active_cursor(location).is_none() {
            return;
        }
        match location.activations.pop() {
            Some(saved) => {
                location.cursor = Some(saved.cursor);
                location.depth = saved.depth;
            }
            None => tracing::error!(
                location = %location.id(),
                parent = ?parent.map(LocationHandle::id),
                "thread deactivation without activation"
            ),
        }
    }

    /// Per-location flush before unification: regions still open are
    /// exited at `timestamp` and the cursor returns to the thread root.
    /// Dense metrics of force-closed nodes are left as they are.
    pub fn process(&self, location: &mut Location, timestamp: u64) {
        let Some(root) = location.root else {
            return;
        };
        if self.active_cursor(location).is_none() {
            return;
        }
        let mut closed = 0_usize;
        while let Some(cursor) = location.cursor {
            if cursor == root {
                break;
            }
            match location.store.node(cursor).kind {
                NodeKind::ThreadRoot(_) => break,
                NodeKind::ThreadStart { .. } => match location.activations.pop() {
                    Some(saved) => {
                        location.cursor = Some(saved.cursor);
                        location.depth = saved.depth;
                    }
                    None => {
                        location.cursor = Some(root);
                        location.depth = 0;
                    }
                },
                NodeKind::Collapse { depth } => {
                    location.depth = depth;
                    self.exit_node(location, cursor, None, timestamp, &[]);
                    closed += 1;
                }
                _ => match enclosing_region(&location.store, cursor) {
                    Ok(_) => {
                        self.exit_node(location, cursor, None, timestamp, &[]);
                        closed += 1;
                    }
                    Err(boundary) if location.store.node(boundary).kind.is_thread_boundary() => {
                        location.cursor = Some(boundary);
                    }
                    Err(_) => {
                        location.cursor = Some(root);
                        location.depth = 0;
                    }
                },
            }
        }
        location.activations.clear();
        location.depth = 0;
        if closed > 0 {
            tracing::warn!(
                location = %location.id(),
                closed,
                "regions still open at process time were exited"
            );
        }
    }

    /// Stitch the locations' trees into one calltree and post-process it:
    /// thread-start expansion, collapse substitution (if `collapse_region`
    /// is given) and thread sorting.
    pub fn unify(
        &self,
        locations: Vec<Location>,
        collapse_region: Option<RegionHandle>,
    ) -> ProfileResult<Calltree> {
        let generation = self.generation();
        let mut locations = locations;
        locations.sort_by_key(|l| l.store.id());

        let mut stores: Vec<Option<NodeStore>> = Vec::new();
        let mut roots = Vec::new();
        for location in locations {
            if location.generation != generation {
                return Err(ProfileError::StaleLocation(location.id()));
            }
            let Some(root) = location.root else {
                tracing::debug!(location = %location.id(), "skipping location without thread root");
                continue;
            };
            let slot = location.store.id() as usize;
            if stores.len() <= slot {
                stores.resize_with(slot + 1, || None);
            }
            roots.push(NodeId::new(slot as u32, root));
            stores[slot] = Some(location.store);
        }

        for entry in self.root_entries() {
            if stores.get(entry.store as usize).is_none_or(Option::is_none) {
                tracing::warn!(
                    location = %entry.location,
                    "location was not handed over for unification; its calltree is missing"
                );
            }
        }

        let meta = CalltreeMeta {
            num_dense_metrics: self.num_dense_metrics,
            has_collapse_node: self.has_collapse_node(),
            reached_depth: self.reached_depth(),
            max_callpath_depth: self.max_callpath_depth(),
            max_callpath_num: self.max_callpath_num(),
        };
        let mut tree = Calltree::new(stores, roots, meta);
        tree.expand_threads()?;
        if let Some(region) = collapse_region {
            tree.process_collapse(region);
        }
        tree.sort_threads();
        Ok(tree)
    }
}

/// Walk up from `node` through parameter nodes. `Ok` is the enclosing
/// region node, `Err` the first node that is neither.
fn enclosing_region(store: &NodeStore, node: u32) -> Result<u32, u32> {
    let mut current = node;
    loop {
        let n = store.node(current);
        match n.kind {
            NodeKind::RegularRegion(_) => return Ok(current),
            kind if kind.is_parameter() => match n.parent() {
                Some(parent) => current = parent,
                None => return Err(current),
            },
            _ => return Err(current),
        }
    }
}
