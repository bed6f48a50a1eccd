use serde::{Deserialize, Serialize};

/// Interned region (function, loop, user block) identifier.
///
/// Handles are handed out by a definitions registry; two equal values always
/// denote the same region, so identity comparison is enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionHandle(pub u32);

/// Interned user metric identifier (sparse integer/double metrics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricHandle(pub u32);

/// Interned parameter identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterHandle(pub u32);

/// Interned string value of a string parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringHandle(pub u32);

/// Identifier of a measurement location (thread or task).
///
/// The threading system encodes the logical thread number in the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub u64);

impl LocationId {
    /// Logical thread number (low 32 bits), used to order thread roots.
    pub fn logical_thread(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_thread_uses_low_bits() {
        let id = LocationId((7_u64 << 32) | 3);
        assert_eq!(id.logical_thread(), 3);
        assert_eq!(LocationId(5).logical_thread(), 5);
    }

    #[test]
    fn handles_serialize_as_plain_integers() {
        let json = serde_json::to_string(&RegionHandle(12)).unwrap_or_default();
        assert_eq!(json, "12");
        let back: LocationId = serde_json::from_str("42").unwrap_or(LocationId(0));
        assert_eq!(back, LocationId(42));
    }
}
