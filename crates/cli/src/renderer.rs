use std::io::{self, Write};

use calltree_protocol::{Definitions, MetricHandle, NodeSnapshot, ProfileSnapshot, ThreadSnapshot};

/// Time spent in `node` itself, excluding its children. Metric sums wrap
/// at 64 bits, so the children are added the same way.
fn exclusive_time(thread: &ThreadSnapshot, node: &NodeSnapshot) -> u64 {
    let children = thread
        .children(Some(node.id))
        .iter()
        .map(|c| c.implicit_time.sum)
        .fold(0, u64::wrapping_add);
    node.implicit_time.sum.saturating_sub(children)
}

fn metric_label(metric: MetricHandle, defs: Option<&Definitions>) -> String {
    defs.and_then(|d| d.metric_name(metric))
        .map_or_else(|| format!("metric#{}", metric.0), ToString::to_string)
}

fn render_node(
    out: &mut impl Write,
    thread: &ThreadSnapshot,
    node: &NodeSnapshot,
    depth: usize,
    defs: Option<&Definitions>,
) -> io::Result<()> {
    write!(
        out,
        "{}{}  count={} incl={} excl={}",
        "  ".repeat(depth),
        node.label(),
        node.count,
        node.implicit_time.sum,
        exclusive_time(thread, node)
    )?;
    for (i, dense) in node.dense.iter().enumerate() {
        write!(out, " m{i}={}", dense.sum)?;
    }
    for sparse in &node.sparse_int {
        let name = metric_label(sparse.metric, defs);
        write!(out, " {name}={}x{}", sparse.count, sparse.sum)?;
    }
    for sparse in &node.sparse_double {
        let name = metric_label(sparse.metric, defs);
        write!(out, " {name}={}x{}", sparse.count, sparse.sum)?;
    }
    writeln!(out)?;
    for child in thread.children(Some(node.id)) {
        render_node(out, thread, child, depth + 1, defs)?;
    }
    Ok(())
}

/// Indented text rendering of every thread of `snapshot`. Trigger metrics
/// are named from `defs` when given.
pub fn render_text(
    out: &mut impl Write,
    snapshot: &ProfileSnapshot,
    defs: Option<&Definitions>,
) -> io::Result<()> {
    for thread in &snapshot.threads {
        writeln!(
            out,
            "thread {}  incl={}",
            thread.location, thread.root.implicit_time.sum
        )?;
        for node in thread.children(None) {
            render_node(out, thread, node, 1, defs)?;
        }
    }
    if snapshot.meta.has_collapse_node {
        writeln!(
            out,
            "note: callpaths beyond depth {} or {} nodes were collapsed (reached depth {})",
            snapshot.meta.max_callpath_depth,
            snapshot.meta.max_callpath_num,
            snapshot.meta.reached_depth
        )?;
    }
    Ok(())
}
