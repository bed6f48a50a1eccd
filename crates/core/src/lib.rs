//! Calltree profiling engine.
//!
//! Each location (thread) records enter/exit, parameter and trigger events
//! into its own [`NodeStore`] without locking. At the end of a measurement
//! phase [`Profile::unify`] stitches the per-location trees into one
//! [`Calltree`]: thread starts are expanded into the callpaths that forked
//! them, collapse nodes are renamed and threads are sorted.

pub mod arena;
pub mod calltree;
pub mod collapse;
pub mod config;
pub mod debug;
pub mod error;
pub mod expand;
pub mod location;
pub mod metric;
pub mod node;
pub mod profile;
pub mod replay;
pub mod sort;
pub mod store;
pub mod writer;

pub use arena::PageBudget;
pub use calltree::{Calltree, CalltreeMeta};
pub use config::ProfileConfig;
pub use error::{ProfileError, ProfileResult};
pub use location::{Location, LocationHandle};
pub use node::{CalltreeNode, NodeId, NodeKind, NodeType};
pub use profile::Profile;
pub use replay::{Replay, load_event_log, replay};
pub use store::{NodeMetrics, NodeStore};
