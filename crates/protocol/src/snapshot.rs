use serde::{Deserialize, Serialize};

use crate::handles::{LocationId, MetricHandle, ParameterHandle, RegionHandle, StringHandle};
use crate::shared_str::SharedStr;

/// Writer-facing image of a finished, post-processed calltree.
///
/// Profile writers (Cube-like files, online consumers, the CLI) read this
/// instead of walking the engine's arenas.
///
/// ```text
///   per-location stores ─▶ unify + expand ─▶ Calltree ─▶ ProfileSnapshot ─▶ writer
/// ```
///
/// Nodes are flat, in pre-order, with parent indices, so both tree traversal
/// and flat iteration are cheap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub meta: SnapshotMeta,
    pub threads: Vec<ThreadSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Length of every node's `dense` array.
    pub num_dense_metrics: usize,
    /// True if callpaths were truncated by the depth or node-count limit.
    pub has_collapse_node: bool,
    /// Deepest callpath seen while collapsing.
    pub reached_depth: u64,
    pub max_callpath_depth: u64,
    pub max_callpath_num: u64,
}

/// All nodes below one thread root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub location: LocationId,
    /// Dense metrics this location measures on top of the profile-wide
    /// ones; they trail the profile-wide values in every `dense` vector.
    #[serde(default)]
    pub num_location_metrics: usize,
    /// Visit count and inclusive metrics of the thread root itself.
    pub root: NodeSnapshot,
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKindSnapshot {
    RegularRegion {
        region: RegionHandle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<SharedStr>,
    },
    ParameterString {
        parameter: ParameterHandle,
        value: StringHandle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<SharedStr>,
    },
    ParameterInteger {
        parameter: ParameterHandle,
        value: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<SharedStr>,
    },
    ThreadRoot {
        location: LocationId,
    },
    ThreadStart,
    Collapse {
        depth: u64,
    },
}

/// Statistics of one dense metric on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseValue {
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub squares: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseIntValue {
    pub metric: MetricHandle,
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub squares: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseDoubleValue {
    pub metric: MetricHandle,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub squares: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Index within the thread's `nodes`.
    pub id: usize,
    /// Parent index, `None` for direct children of the thread root.
    pub parent: Option<usize>,
    /// Callpath depth (1 = direct child of the thread root).
    pub depth: u32,
    pub kind: NodeKindSnapshot,
    pub count: u64,
    pub first_enter_time: u64,
    pub last_exit_time: u64,
    pub implicit_time: DenseValue,
    pub dense: Vec<DenseValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sparse_int: Vec<SparseIntValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sparse_double: Vec<SparseDoubleValue>,
}

impl NodeSnapshot {
    /// Display label: region/parameter name when known, otherwise the handle.
    pub fn label(&self) -> String {
        match &self.kind {
            NodeKindSnapshot::RegularRegion { region, name } => match name {
                Some(n) => n.to_string(),
                None => format!("region#{}", region.0),
            },
            NodeKindSnapshot::ParameterString {
                parameter,
                value,
                name,
            } => match name {
                Some(n) => format!("{n}=string#{}", value.0),
                None => format!("param#{}=string#{}", parameter.0, value.0),
            },
            NodeKindSnapshot::ParameterInteger {
                parameter,
                value,
                name,
            } => match name {
                Some(n) => format!("{n}={value}"),
                None => format!("param#{}={value}", parameter.0),
            },
            NodeKindSnapshot::ThreadRoot { location } => format!("thread {location}"),
            NodeKindSnapshot::ThreadStart => "thread start".to_string(),
            NodeKindSnapshot::Collapse { depth } => format!("COLLAPSE(depth {depth})"),
        }
    }
}

impl ThreadSnapshot {
    /// Direct children of the given node (or of the thread root if `None`).
    pub fn children(&self, parent: Option<usize>) -> Vec<&NodeSnapshot> {
        self.nodes.iter().filter(|n| n.parent == parent).collect()
    }

    /// Follow a callpath of labels from the thread root.
    pub fn find_path(&self, labels: &[&str]) -> Option<&NodeSnapshot> {
        let mut parent = None;
        let mut found = None;
        for label in labels {
            let next = self
                .children(parent)
                .into_iter()
                .find(|n| n.label() == *label)?;
            parent = Some(next.id);
            found = Some(next);
        }
        found
    }
}

impl ProfileSnapshot {
    /// Total number of nodes below all thread roots.
    pub fn node_count(&self) -> usize {
        self.threads.iter().map(|t| t.nodes.len()).sum()
    }

    pub fn thread(&self, location: LocationId) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|t| t.location == location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: usize, parent: Option<usize>, depth: u32, name: &str) -> NodeSnapshot {
        NodeSnapshot {
            id,
            parent,
            depth,
            kind: NodeKindSnapshot::RegularRegion {
                region: RegionHandle(id as u32),
                name: Some(name.into()),
            },
            count: 1,
            first_enter_time: 0,
            last_exit_time: 10,
            implicit_time: DenseValue {
                sum: 10,
                min: 10,
                max: 10,
                squares: 100,
            },
            dense: vec![],
            sparse_int: vec![],
            sparse_double: vec![],
        }
    }

    fn sample() -> ProfileSnapshot {
        let mut root = node(0, None, 0, "root");
        root.kind = NodeKindSnapshot::ThreadRoot {
            location: LocationId(0),
        };
        ProfileSnapshot {
            meta: SnapshotMeta {
                num_dense_metrics: 0,
                has_collapse_node: false,
                reached_depth: 0,
                max_callpath_depth: 30,
                max_callpath_num: 1000,
            },
            threads: vec![ThreadSnapshot {
                location: LocationId(0),
                num_location_metrics: 0,
                root,
                nodes: vec![
                    node(0, None, 1, "main"),
                    node(1, Some(0), 2, "foo"),
                    node(2, Some(1), 3, "bar"),
                    node(3, Some(0), 2, "baz"),
                ],
            }],
        }
    }

    #[test]
    fn find_path_follows_labels() {
        let snap = sample();
        let thread = &snap.threads[0];
        assert_eq!(thread.find_path(&["main", "foo", "bar"]).map(|n| n.id), Some(2));
        assert!(thread.find_path(&["main", "bar"]).is_none());
        assert_eq!(thread.children(Some(0)).len(), 2);
    }

    #[test]
    fn labels_fall_back_to_handles() {
        let mut n = node(4, None, 1, "x");
        n.kind = NodeKindSnapshot::ParameterInteger {
            parameter: ParameterHandle(2),
            value: -3,
            name: None,
        };
        assert_eq!(n.label(), "param#2=-3");
        n.kind = NodeKindSnapshot::Collapse { depth: 7 };
        assert_eq!(n.label(), "COLLAPSE(depth 7)");
    }

    #[test]
    fn serialization_keeps_structure() {
        let snap = sample();
        let json = serde_json::to_string(&snap).unwrap_or_default();
        assert!(json.contains("\"type\":\"regular_region\""));
        let back: Option<ProfileSnapshot> = serde_json::from_str(&json).ok();
        assert_eq!(back.map(|s| s.node_count()), Some(4));
    }
}
