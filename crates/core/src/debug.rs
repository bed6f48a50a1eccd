//! Human-readable dumps of calltree state, and core files for failures.

use std::fmt::Write as _;
use std::path::PathBuf;

use calltree_protocol::Definitions;

use crate::calltree::Calltree;
use crate::config::ProfileConfig;
use crate::error::ProfileResult;
use crate::location::Location;
use crate::node::NodeKind;
use crate::store::NodeStore;

/// One-line description of a node kind: type name plus payload.
pub fn describe(kind: &NodeKind, defs: Option<&Definitions>) -> String {
    let name = kind.node_type().name();
    match kind {
        NodeKind::RegularRegion(region) => {
            match defs.and_then(|d| d.region_name(*region)) {
                Some(n) => format!("type: {name}\tname: {n}"),
                None => format!("type: {name}\tregion: {}", region.0),
            }
        }
        NodeKind::ParameterString { parameter, value } => {
            let param = defs
                .and_then(|d| d.parameter_name(*parameter))
                .map_or_else(|| format!("param#{}", parameter.0), ToString::to_string);
            let value = defs
                .and_then(|d| d.string_value(*value))
                .map_or_else(|| format!("string#{}", value.0), ToString::to_string);
            format!("type: {name}\t{param}={value}")
        }
        NodeKind::ParameterInteger { parameter, value } => {
            let param = defs
                .and_then(|d| d.parameter_name(*parameter))
                .map_or_else(|| format!("param#{}", parameter.0), ToString::to_string);
            format!("type: {name}\t{param}={value}")
        }
        NodeKind::ThreadRoot(data) => format!("type: {name}\tlocation: {}", data.location),
        NodeKind::ThreadStart { fork_node } => match fork_node {
            Some(f) => format!("type: {name}\tfork node: {}:{}", f.store, f.index),
            None => format!("type: {name}\tfork node: none"),
        },
        NodeKind::Collapse { depth } => format!("type: {name}\tdepth: {depth}"),
    }
}

/// Indented dump of `start` and everything below it.
pub fn dump_subtree(store: &NodeStore, start: u32, defs: Option<&Definitions>) -> String {
    let mut out = String::new();
    for (node, depth) in store.preorder(start) {
        let n = store.node(node);
        let _ = writeln!(
            out,
            "{:>6} {}+ {}\tcount: {}\ttime: {}",
            node,
            "| ".repeat(depth as usize),
            describe(&n.kind, defs),
            n.count,
            n.implicit_time.sum
        );
    }
    out
}

/// The location's current callpath, innermost node first.
pub fn dump_stack(location: &Location, defs: Option<&Definitions>) -> String {
    let mut out = String::new();
    let store = location.store();
    let stack = std::iter::successors(location.current_node(), |n| store.node(*n).parent());
    for (level, node) in stack.enumerate() {
        let _ = writeln!(
            out,
            "{level} {node}\t{}",
            describe(&store.node(node).kind, defs)
        );
    }
    out
}

/// Write `<output_dir>/<basename>.<location>.core` with the failing
/// location's stack and tree.
pub fn write_core_file(
    config: &ProfileConfig,
    location: &Location,
    reason: &str,
) -> ProfileResult<PathBuf> {
    let path = config.core_file_path(location.id().0);
    let mut out = String::new();
    let _ = writeln!(out, "Error in profiling on location {}: {reason}", location.id());
    let _ = writeln!(out);
    let _ = writeln!(out, "Current stack of failing thread:");
    out.push_str(&dump_stack(location, None));
    let _ = writeln!(out);
    let _ = writeln!(out, "Current status of failing profile:");
    if let Some(root) = location.root() {
        out.push_str(&dump_subtree(location.store(), root, None));
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, out)?;
    Ok(path)
}

impl Calltree {
    /// Dump of all threads, in root order.
    pub fn dump(&self, defs: Option<&Definitions>) -> String {
        self.roots()
            .iter()
            .filter_map(|r| Some(dump_subtree(self.store(r.store)?, r.index, defs)))
            .collect()
    }
}
