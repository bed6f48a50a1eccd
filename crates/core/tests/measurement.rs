//! Integration test: drive a profile through the event API the way a
//! measurement system would, then unify and inspect the result.

use std::sync::Arc;

use calltree_core::{Location, NodeKind, NodeType, PageBudget, Profile, ProfileConfig};
use calltree_protocol::{LocationId, MetricHandle, RegionHandle};

fn profile(config: ProfileConfig, num_dense_metrics: usize) -> Profile {
    let profile = Profile::with_budget(PageBudget::with_limit(256, 4096), config, num_dense_metrics);
    profile.initialize();
    profile
}

fn region(id: u32) -> NodeKind {
    NodeKind::RegularRegion(RegionHandle(id))
}

#[test]
fn fork_join_expands_worker_callpaths() {
    let p = profile(ProfileConfig::default(), 0);
    let mut master = p.on_location_creation(LocationId(0), None);
    let mut worker = p.on_location_creation(LocationId(1), Some(LocationId(0)));

    p.enter(&mut master, RegionHandle(0), 0, &[]);
    p.enter(&mut master, RegionHandle(1), 10, &[]);
    p.on_fork(&master, 2, 1);

    let handle = master.handle().clone();
    p.on_thread_activation(&mut worker, Some(&handle), 1);
    p.enter(&mut worker, RegionHandle(2), 20, &[]);
    p.enter(&mut worker, RegionHandle(3), 30, &[]);
    p.exit(&mut worker, RegionHandle(3), 130, &[]);
    p.exit(&mut worker, RegionHandle(2), 140, &[]);
    p.on_thread_deactivation(&mut worker, Some(&handle));

    p.on_join(&master);
    p.exit(&mut master, RegionHandle(1), 300, &[]);
    p.exit(&mut master, RegionHandle(0), 500, &[]);

    let tree = p.unify(vec![worker, master], None).expect("unify");
    assert_eq!(tree.count_type(NodeType::ThreadStart), 0);
    assert_eq!(tree.roots().len(), 2);

    let worker_root = tree.root_of(LocationId(1)).expect("worker root");
    let bar = tree
        .find_path(worker_root, &[region(0), region(1), region(2), region(3)])
        .and_then(|n| tree.node(n))
        .expect("bar below the forking callpath");
    assert_eq!(bar.implicit_time.sum, 100);
    let par = tree
        .find_path(worker_root, &[region(0), region(1)])
        .and_then(|n| tree.node(n))
        .expect("parallel region on the worker");
    assert_eq!(par.implicit_time.sum, 120);

    let master_root = tree.first_root_node().expect("master root");
    assert_eq!(tree.root_location(master_root), Some(LocationId(0)));
    assert_eq!(tree.next_sibling(master_root), Some(worker_root));
    let master_par = tree
        .find_path(master_root, &[region(0), region(1)])
        .and_then(|n| tree.node(n))
        .expect("parallel region on the master");
    assert_eq!(master_par.implicit_time.sum, 290);
}

#[test]
fn callpath_limit_folds_everything_into_one_collapse_node() {
    // The thread root already uses up the only node.
    let config = ProfileConfig {
        max_callpath_num: 1,
        ..ProfileConfig::default()
    };
    let p = profile(config, 0);
    let mut loc = p.on_location_creation(LocationId(0), None);
    for r in 0..5 {
        p.enter(&mut loc, RegionHandle(r), u64::from(r) * 10, &[]);
        p.exit(&mut loc, RegionHandle(r), u64::from(r) * 10 + 4, &[]);
    }
    assert!(p.has_collapse_node());

    let tree = p.unify(vec![loc], Some(RegionHandle(99))).expect("unify");
    let root = tree.first_root_node().expect("root");
    let children: Vec<_> = tree.children(root).collect();
    assert_eq!(children.len(), 1);
    let collapsed = tree.node(children[0]).expect("collapse node");
    assert_eq!(collapsed.kind, region(99));
    assert_eq!(collapsed.count, 5);
    assert_eq!(collapsed.implicit_time.sum, 20);
    assert_eq!(tree.count_type(NodeType::Collapse), 0);
    assert!(tree.meta().has_collapse_node);
}

#[test]
fn threads_keep_creation_order_without_a_permutation() {
    let p = profile(ProfileConfig::default(), 0);
    let a = p.on_location_creation(LocationId(2), None);
    let b = p.on_location_creation(LocationId(0), None);
    let tree = p.unify(vec![b, a], None).expect("unify");
    let order: Vec<_> = tree
        .roots()
        .iter()
        .filter_map(|r| tree.root_location(*r))
        .collect();
    assert_eq!(order, vec![LocationId(2), LocationId(0)]);
}

#[test]
fn memory_exhaustion_disables_profiling() {
    // One page for nodes, one for each sparse list.
    let p = Profile::with_budget(PageBudget::with_limit(3, 4096), ProfileConfig::default(), 0);
    p.initialize();
    let mut loc = p.on_location_creation(LocationId(0), None);
    let mut r = 0;
    while p.is_initialized() && r < 10_000 {
        p.enter(&mut loc, RegionHandle(r), u64::from(r), &[]);
        if r == 0 {
            p.trigger_integer(&mut loc, MetricHandle(0), 64);
            p.trigger_double(&mut loc, MetricHandle(1), 0.5);
        }
        p.exit(&mut loc, RegionHandle(r), u64::from(r) + 1, &[]);
        r += 1;
    }
    assert!(!p.is_initialized());
    assert!(p.is_stopped());

    let nodes = loc.store().len();
    let root = loc.root().expect("root");
    let first = loc.store().children(root).last().expect("first region");
    let before = loc.store().metrics(first);
    let root_before = loc.store().metrics(root);
    assert_eq!(before.sparse_int.len(), 1);
    assert_eq!(before.sparse_double.len(), 1);

    p.trigger_integer(&mut loc, MetricHandle(0), 1);
    p.enter(&mut loc, RegionHandle(0), 50_000, &[]);
    p.trigger_integer(&mut loc, MetricHandle(0), 128);
    p.trigger_double(&mut loc, MetricHandle(1), 2.0);
    p.trigger_integer(&mut loc, MetricHandle(7), 3);
    p.exit(&mut loc, RegionHandle(0), 50_010, &[]);
    assert_eq!(loc.store().len(), nodes);
    assert_eq!(loc.store().metrics(first), before);
    assert_eq!(loc.store().metrics(root), root_before);

    // Stopping is permanent.
    p.initialize();
    assert!(!p.is_initialized());
    let late = p.on_location_creation(LocationId(1), None);
    assert!(late.root().is_none());
}

#[test]
fn repeated_enters_share_one_node() {
    let p = profile(ProfileConfig::default(), 1);
    let mut loc = p.on_location_creation(LocationId(0), None);
    p.enter(&mut loc, RegionHandle(7), 0, &[100]);
    p.exit(&mut loc, RegionHandle(7), 5, &[150]);
    p.enter(&mut loc, RegionHandle(7), 10, &[200]);
    p.exit(&mut loc, RegionHandle(7), 12, &[260]);

    let root = loc.root().expect("root");
    assert_eq!(loc.store().children(root).count(), 1);
    let node = loc.store().find_child(root, &region(7)).expect("region node");
    let m = loc.store().metrics(node);
    assert_eq!(m.count, 2);
    assert_eq!(m.implicit_time.sum, 7);
    assert_eq!(m.implicit_time.min, 2);
    assert_eq!(m.implicit_time.max, 5);
    assert_eq!(m.dense[0].sum, 110);
    assert_eq!((m.first_enter_time, m.last_exit_time), (0, 12));
}

fn measure_thread(p: &Profile, id: u64) -> Location {
    let mut loc = p.on_location_creation(LocationId(id), None);
    p.enter(&mut loc, RegionHandle(0), 0, &[]);
    for i in 0..10 {
        let t = 10 + i * 10;
        p.enter(&mut loc, RegionHandle(1), t, &[]);
        p.exit(&mut loc, RegionHandle(1), t + id + 1, &[]);
    }
    p.exit(&mut loc, RegionHandle(0), 1_000, &[]);
    loc
}

#[test]
fn locations_measure_concurrently() {
    let p = Arc::new(profile(ProfileConfig::default(), 0));
    let locations: Vec<Location> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4_u64)
            .map(|id| {
                let p = Arc::clone(&p);
                scope.spawn(move || measure_thread(&p, id))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("measurement thread panicked"))
            .collect()
    });
    assert_eq!(p.root_entries().len(), 4);

    let tree = p.unify(locations, None).expect("unify");
    let order: Vec<_> = tree
        .roots()
        .iter()
        .filter_map(|r| tree.root_location(*r))
        .collect();
    assert_eq!(order, (0..4).map(LocationId).collect::<Vec<_>>());

    for (id, root) in tree.roots().iter().enumerate() {
        let inner = tree
            .find_path(*root, &[region(0), region(1)])
            .and_then(|n| tree.node(n))
            .expect("inner region");
        assert_eq!(inner.count, 10);
        assert_eq!(inner.implicit_time.sum, 10 * (id as u64 + 1));
    }
    assert_eq!(p.node_count(), 4 * 3);
}
