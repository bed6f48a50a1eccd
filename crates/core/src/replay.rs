//! Feeding a recorded event stream through a profile.

use std::collections::HashMap;
use std::io::BufReader;
use std::path::Path;

use calltree_protocol::{Definitions, EventLog, LocationId, ProfileEvent};

use crate::calltree::Calltree;
use crate::error::{ProfileError, ProfileResult};
use crate::location::Location;
use crate::profile::Profile;

/// Name given to the region that replaces collapse nodes.
pub const COLLAPSE_REGION: &str = "COLLAPSE";

/// Result of a replay: the unified tree and the definitions naming it.
#[derive(Debug)]
pub struct Replay {
    pub calltree: Calltree,
    pub definitions: Definitions,
}

pub fn load_event_log(path: &Path) -> ProfileResult<EventLog> {
    let file = std::fs::File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn location_mut(
    locations: &mut HashMap<LocationId, Location>,
    id: LocationId,
) -> ProfileResult<&mut Location> {
    locations
        .get_mut(&id)
        .ok_or(ProfileError::UnknownLocation(id))
}

fn location(locations: &HashMap<LocationId, Location>, id: LocationId) -> ProfileResult<&Location> {
    locations.get(&id).ok_or(ProfileError::UnknownLocation(id))
}

/// Apply every event of `log` in order, process all locations at the last
/// timestamp and unify. `profile` must be initialized.
pub fn replay(profile: &Profile, log: &EventLog) -> ProfileResult<Replay> {
    if !profile.is_initialized() {
        return Err(ProfileError::NotInitialized);
    }
    if log.num_dense_metrics != profile.num_dense_metrics() {
        return Err(ProfileError::Config(format!(
            "event log carries {} dense metrics, profile expects {}",
            log.num_dense_metrics,
            profile.num_dense_metrics()
        )));
    }

    let mut locations: HashMap<LocationId, Location> = HashMap::new();
    for event in &log.events {
        match event {
            ProfileEvent::LocationCreation { location, parent } => {
                if locations.contains_key(location) {
                    tracing::warn!(location = %location, "location created twice; ignored");
                    continue;
                }
                let created = profile.on_location_creation(*location, *parent);
                locations.insert(*location, created);
            }
            ProfileEvent::AddLocationSpecificMetrics { location, count } => profile
                .add_location_specific_metrics(location_mut(&mut locations, *location)?, *count),
            ProfileEvent::Enter {
                location,
                region,
                timestamp,
                metrics,
            } => profile.enter(
                location_mut(&mut locations, *location)?,
                *region,
                *timestamp,
                metrics,
            ),
            ProfileEvent::Exit {
                location,
                region,
                timestamp,
                metrics,
            } => profile.exit(
                location_mut(&mut locations, *location)?,
                *region,
                *timestamp,
                metrics,
            ),
            ProfileEvent::TriggerInteger {
                location,
                metric,
                value,
            } => profile.trigger_integer(location_mut(&mut locations, *location)?, *metric, *value),
            ProfileEvent::TriggerDouble {
                location,
                metric,
                value,
            } => profile.trigger_double(location_mut(&mut locations, *location)?, *metric, *value),
            ProfileEvent::ParameterString {
                location,
                parameter,
                value,
            } => profile.parameter_string(
                location_mut(&mut locations, *location)?,
                *parameter,
                *value,
            ),
            ProfileEvent::ParameterInteger {
                location,
                parameter,
                value,
            } => profile.parameter_integer(
                location_mut(&mut locations, *location)?,
                *parameter,
                *value,
            ),
            ProfileEvent::Fork {
                location: id,
                max_child_threads,
                nesting_level,
            } => profile.on_fork(location(&locations, *id)?, *max_child_threads, *nesting_level),
            ProfileEvent::Join { location: id } => profile.on_join(location(&locations, *id)?),
            ProfileEvent::ThreadCreation {
                location: id,
                parent,
            } => profile.on_thread_creation(*id, location(&locations, *parent)?),
            ProfileEvent::ThreadActivation {
                location: id,
                parent,
                nesting_level,
            } => {
                let parent = parent
                    .map(|p| location(&locations, p).map(|l| l.handle().clone()))
                    .transpose()?;
                profile.on_thread_activation(
                    location_mut(&mut locations, *id)?,
                    parent.as_ref(),
                    *nesting_level,
                );
            }
            ProfileEvent::ThreadDeactivation {
                location: id,
                parent,
            } => {
                let parent = parent
                    .map(|p| location(&locations, p).map(|l| l.handle().clone()))
                    .transpose()?;
                profile.on_thread_deactivation(location_mut(&mut locations, *id)?, parent.as_ref());
            }
        }
    }

    let end = log.last_timestamp();
    for location in locations.values_mut() {
        profile.process(location, end);
    }

    let mut definitions = log.definitions.clone();
    let collapse_region = profile
        .has_collapse_node()
        .then(|| definitions.new_region(COLLAPSE_REGION));
    let calltree = profile.unify(locations.into_values().collect(), collapse_region)?;
    tracing::debug!(
        events = log.events.len(),
        nodes = calltree.node_count(),
        "replay finished"
    );
    Ok(Replay {
        calltree,
        definitions,
    })
}
