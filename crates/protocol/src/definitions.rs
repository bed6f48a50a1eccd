use serde::{Deserialize, Serialize};

use crate::handles::{MetricHandle, ParameterHandle, RegionHandle, StringHandle};
use crate::shared_str::SharedStr;

/// Minimal definitions registry: interns names and hands out handles.
///
/// A handle is the index of its name in the matching table, so the tables
/// serialize as plain name lists and a recorded event log stays readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Definitions {
    #[serde(default)]
    pub regions: Vec<SharedStr>,
    #[serde(default)]
    pub metrics: Vec<SharedStr>,
    #[serde(default)]
    pub parameters: Vec<SharedStr>,
    #[serde(default)]
    pub strings: Vec<SharedStr>,
}

fn intern(table: &mut Vec<SharedStr>, name: &str) -> u32 {
    if let Some(pos) = table.iter().position(|n| n == name) {
        return pos as u32;
    }
    table.push(SharedStr::from(name));
    (table.len() - 1) as u32
}

impl Definitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(&mut self, name: &str) -> RegionHandle {
        RegionHandle(intern(&mut self.regions, name))
    }

    /// Always a fresh handle, even if a region of that name exists.
    pub fn new_region(&mut self, name: &str) -> RegionHandle {
        self.regions.push(SharedStr::from(name));
        RegionHandle((self.regions.len() - 1) as u32)
    }

    pub fn metric(&mut self, name: &str) -> MetricHandle {
        MetricHandle(intern(&mut self.metrics, name))
    }

    pub fn parameter(&mut self, name: &str) -> ParameterHandle {
        ParameterHandle(intern(&mut self.parameters, name))
    }

    pub fn string(&mut self, value: &str) -> StringHandle {
        StringHandle(intern(&mut self.strings, value))
    }

    pub fn region_name(&self, handle: RegionHandle) -> Option<&SharedStr> {
        self.regions.get(handle.0 as usize)
    }

    pub fn metric_name(&self, handle: MetricHandle) -> Option<&SharedStr> {
        self.metrics.get(handle.0 as usize)
    }

    pub fn parameter_name(&self, handle: ParameterHandle) -> Option<&SharedStr> {
        self.parameters.get(handle.0 as usize)
    }

    pub fn string_value(&self, handle: StringHandle) -> Option<&SharedStr> {
        self.strings.get(handle.0 as usize)
    }
}
