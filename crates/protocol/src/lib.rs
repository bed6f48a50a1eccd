pub mod definitions;
pub mod events;
pub mod handles;
pub mod shared_str;
pub mod snapshot;

pub use definitions::Definitions;
pub use events::{EventLog, ProfileEvent};
pub use handles::{LocationId, MetricHandle, ParameterHandle, RegionHandle, StringHandle};
pub use shared_str::SharedStr;
pub use snapshot::{
    DenseValue, NodeKindSnapshot, NodeSnapshot, ProfileSnapshot, SnapshotMeta,
    SparseDoubleValue, SparseIntValue, ThreadSnapshot,
};
