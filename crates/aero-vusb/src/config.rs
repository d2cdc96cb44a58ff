use serde::{Deserialize, Serialize};

use crate::port_table::MAX_PORTS;

/// One step of the idle frame-rate back-off: after `idle_frames` consecutive frames without
/// activity the frame rate drops to `rate_hz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleBackoffStep {
    pub idle_frames: u32,
    pub rate_hz: u32,
}

/// Tunables of a [`crate::RootHub`].
///
/// Every field has a default, so a partial configuration (for example from JSON) only needs to
/// name the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootHubConfig {
    /// Used as the log prefix for everything this hub emits.
    pub name: String,
    /// Ports exposed by the hub. Clamped to `1..=128`.
    pub port_count: u8,
    /// Maximum number of URBs that may be allocated at once.
    pub max_urbs_in_flight: usize,
    /// Minimum wall-clock duration of an asynchronous device reset.
    pub reset_floor_ms: u64,
    /// A device reset taking longer than this is treated as a failure.
    pub reset_timeout_ms: u64,
    /// The idle back-off ladder, ordered by `idle_frames`.
    pub frame_idle_backoff: Vec<IdleBackoffStep>,
    /// Frame requests arriving closer than this to the previous frame are coalesced.
    pub min_frame_spacing_us: u64,
    /// Upper bound of a single blocking wait inside `reap_async_urbs`.
    pub reap_slice_ms: u64,
    /// Cancellation waits longer than this get a warning logged.
    pub cancel_warn_ms: u64,
}

impl RootHubConfig {
    pub const DEFAULT_PORT_COUNT: u8 = MAX_PORTS as u8;
    pub const DEFAULT_MAX_URBS_IN_FLIGHT: usize = 4096;
    pub const MIN_RESET_FLOOR_MS: u64 = 10;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_port_count(mut self, port_count: u8) -> Self {
        self.port_count = port_count;
        self
    }

    pub(crate) fn effective_port_count(&self) -> u8 {
        self.port_count.clamp(1, MAX_PORTS as u8)
    }

    pub(crate) fn effective_reset_floor_ms(&self) -> u64 {
        self.reset_floor_ms.max(Self::MIN_RESET_FLOOR_MS)
    }

    pub(crate) fn sorted_backoff(&self) -> Vec<IdleBackoffStep> {
        let mut steps: Vec<_> = self
            .frame_idle_backoff
            .iter()
            .copied()
            .filter(|s| s.rate_hz != 0)
            .collect();
        steps.sort_by_key(|s| s.idle_frames);
        steps
    }
}

impl Default for RootHubConfig {
    fn default() -> Self {
        Self {
            name: "RootHub#0".to_string(),
            port_count: Self::DEFAULT_PORT_COUNT,
            max_urbs_in_flight: Self::DEFAULT_MAX_URBS_IN_FLIGHT,
            reset_floor_ms: Self::MIN_RESET_FLOOR_MS,
            reset_timeout_ms: 5000,
            frame_idle_backoff: vec![
                IdleBackoffStep {
                    idle_frames: 4,
                    rate_hz: 500,
                },
                IdleBackoffStep {
                    idle_frames: 16,
                    rate_hz: 125,
                },
                IdleBackoffStep {
                    idle_frames: 24,
                    rate_hz: 50,
                },
            ],
            min_frame_spacing_us: 750,
            reap_slice_ms: 10,
            cancel_warn_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: RootHubConfig =
            serde_json::from_str(r#"{"name":"ehci","port_count":4}"#).unwrap();
        assert_eq!(cfg.name, "ehci");
        assert_eq!(cfg.port_count, 4);
        assert_eq!(cfg.max_urbs_in_flight, RootHubConfig::DEFAULT_MAX_URBS_IN_FLIGHT);
        assert_eq!(cfg.frame_idle_backoff.len(), 3);
    }

    #[test]
    fn port_count_and_reset_floor_are_clamped() {
        let mut cfg = RootHubConfig::default().with_port_count(0);
        cfg.reset_floor_ms = 1;
        assert_eq!(cfg.effective_port_count(), 1);
        assert_eq!(cfg.effective_reset_floor_ms(), 10);

        let cfg = RootHubConfig::default().with_port_count(200);
        assert_eq!(cfg.effective_port_count(), 128);
    }

    #[test]
    fn backoff_is_sorted_and_drops_zero_rates() {
        let mut cfg = RootHubConfig::default();
        cfg.frame_idle_backoff = vec![
            IdleBackoffStep {
                idle_frames: 10,
                rate_hz: 100,
            },
            IdleBackoffStep {
                idle_frames: 2,
                rate_hz: 0,
            },
            IdleBackoffStep {
                idle_frames: 1,
                rate_hz: 200,
            },
        ];
        let steps = cfg.sorted_backoff();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].idle_frames, 1);
        assert_eq!(steps[1].rate_hz, 100);
    }
}
