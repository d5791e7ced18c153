use serde::{Deserialize, Serialize};

/// Reserved bit patterns that mean "value not available".
///
/// The mapping comes from captured sessions rather than documentation, so it
/// is versioned and can be overridden per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelPolicy {
    pub version: u16,
    /// High nibble of the gear byte when no gear is suggested.
    pub no_suggested_gear: u8,
    /// Best/last lap time when no lap has been recorded.
    pub unset_lap_time_ms: i32,
    pub unset_time_of_day_ms: i32,
    /// Lap counter outside of a session (menus, loading).
    pub unset_lap: i16,
}

impl SentinelPolicy {
    pub const V1: SentinelPolicy = SentinelPolicy {
        version: 1,
        no_suggested_gear: 0xF,
        unset_lap_time_ms: -1,
        unset_time_of_day_ms: -1,
        unset_lap: -1,
    };

    pub fn suggested_gear(&self, nibble: u8) -> Option<u8> {
        (nibble != self.no_suggested_gear).then_some(nibble)
    }

    pub fn lap_time(&self, raw: i32) -> Option<i32> {
        (raw != self.unset_lap_time_ms).then_some(raw)
    }

    pub fn time_of_day(&self, raw: i32) -> Option<i32> {
        (raw != self.unset_time_of_day_ms).then_some(raw)
    }

    pub fn lap(&self, raw: i16) -> Option<i16> {
        (raw != self.unset_lap).then_some(raw)
    }
}

impl Default for SentinelPolicy {
    fn default() -> Self {
        Self::V1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_maps_reserved_values_to_none() {
        let p = SentinelPolicy::V1;
        assert_eq!(p.suggested_gear(0xF), None);
        assert_eq!(p.suggested_gear(3), Some(3));
        assert_eq!(p.lap_time(-1), None);
        assert_eq!(p.lap_time(0), Some(0));
        assert_eq!(p.lap(-1), None);
        assert_eq!(p.lap(0), Some(0));
    }

    #[test]
    fn policy_can_be_overridden() {
        let p = SentinelPolicy {
            unset_lap_time_ms: 0,
            ..SentinelPolicy::V1
        };
        assert_eq!(p.lap_time(0), None);
        assert_eq!(p.lap_time(-1), Some(-1));
    }
}
