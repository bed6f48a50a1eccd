use serde::{Deserialize, Serialize};

use crate::definitions::Definitions;
use crate::handles::{LocationId, MetricHandle, ParameterHandle, RegionHandle, StringHandle};

/// A single measurement event as delivered by instrumentation or the
/// threading adapter.
///
/// Events carry everything the engine needs; a recorded stream can be
/// replayed into a fresh profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProfileEvent {
    /// A new location (thread/task) became known to the measurement system.
    LocationCreation {
        location: LocationId,
        #[serde(default)]
        parent: Option<LocationId>,
    },

    /// `location` measures `count` dense metrics of its own, appended to
    /// the profile-wide samples of its enter/exit events from now on.
    AddLocationSpecificMetrics { location: LocationId, count: usize },

    /// A region was entered. `metrics` holds one sample per dense metric.
    Enter {
        location: LocationId,
        region: RegionHandle,
        timestamp: u64,
        #[serde(default)]
        metrics: Vec<u64>,
    },

    /// A region was left.
    Exit {
        location: LocationId,
        region: RegionHandle,
        timestamp: u64,
        #[serde(default)]
        metrics: Vec<u64>,
    },

    TriggerInteger {
        location: LocationId,
        metric: MetricHandle,
        value: u64,
    },

    TriggerDouble {
        location: LocationId,
        metric: MetricHandle,
        value: f64,
    },

    ParameterString {
        location: LocationId,
        parameter: ParameterHandle,
        value: StringHandle,
    },

    ParameterInteger {
        location: LocationId,
        parameter: ParameterHandle,
        value: i64,
    },

    /// The location is about to fork a team of threads.
    Fork {
        location: LocationId,
        #[serde(default)]
        max_child_threads: usize,
        #[serde(default)]
        nesting_level: u32,
    },

    /// The team forked by the matching `Fork` has joined.
    Join { location: LocationId },

    /// `parent` created the thread that will run on `location`.
    ThreadCreation {
        location: LocationId,
        parent: LocationId,
    },

    /// `location` starts executing work handed over by `parent`.
    ThreadActivation {
        location: LocationId,
        #[serde(default)]
        parent: Option<LocationId>,
        #[serde(default)]
        nesting_level: u32,
    },

    /// `location` finished the work of the matching activation.
    ThreadDeactivation {
        location: LocationId,
        #[serde(default)]
        parent: Option<LocationId>,
    },
}

impl ProfileEvent {
    /// The location that executed the event.
    pub fn location(&self) -> LocationId {
        match self {
            Self::LocationCreation { location, .. }
            | Self::AddLocationSpecificMetrics { location, .. }
            | Self::Enter { location, .. }
            | Self::Exit { location, .. }
            | Self::TriggerInteger { location, .. }
            | Self::TriggerDouble { location, .. }
            | Self::ParameterString { location, .. }
            | Self::ParameterInteger { location, .. }
            | Self::Fork { location, .. }
            | Self::Join { location }
            | Self::ThreadCreation { location, .. }
            | Self::ThreadActivation { location, .. }
            | Self::ThreadDeactivation { location, .. } => *location,
        }
    }

    /// Timestamp carried by the event, if it has one.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Self::Enter { timestamp, .. } | Self::Exit { timestamp, .. } => Some(*timestamp),
            _ => None,
        }
    }
}

/// A recorded measurement: definitions plus the ordered event stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    #[serde(default)]
    pub definitions: Definitions,
    /// Number of dense metric samples carried by every enter/exit.
    #[serde(default)]
    pub num_dense_metrics: usize,
    pub events: Vec<ProfileEvent>,
}

impl EventLog {
    /// Latest timestamp in the stream (0 for a stream without timestamps).
    pub fn last_timestamp(&self) -> u64 {
        self.events
            .iter()
            .filter_map(ProfileEvent::timestamp)
            .max()
            .unwrap_or(0)
    }
}
