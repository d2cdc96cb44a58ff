//! Periodic frame processing.
//!
//! The scheduler is driven by the caller's clock: [`FrameScheduler::tick`] gets the current time
//! and reports how long to sleep until the next frame. A run of idle frames steps the rate down
//! the configured back-off ladder; the first active frame restores the rate the host controller
//! asked for.

use std::time::{Duration, Instant};

use crate::config::IdleBackoffStep;

/// Full/low speed bus clock.
pub const USB_BUS_CLOCK_HZ: u32 = 12_000_000;

/// Frame rate of a full speed bus (1 ms frames).
pub const USB_FRAME_RATE_HZ: u32 = 1000;

const NS_PER_SEC: u64 = 1_000_000_000;

/// The idle counter is wound back to `IDLE_CLAMP_RESET` once it passes `IDLE_CLAMP_HIGH`, so it
/// never wraps while staying above every back-off threshold.
const IDLE_CLAMP_HIGH: u32 = 60_000;
const IDLE_CLAMP_RESET: u32 = 20_000;

/// Bit times in one frame at `rate_hz`.
pub const fn bit_times_per_frame(rate_hz: u32) -> u32 {
    if rate_hz == 0 {
        0
    } else {
        USB_BUS_CLOCK_HZ / rate_hz
    }
}

/// Frames elapsed between `previous` and `new_frame` on a counter `bits` wide, or 0 when there is
/// no previous frame.
pub fn isoc_frame_delta(previous: Option<u32>, new_frame: u32, bits: u8) -> u32 {
    let Some(previous) = previous else {
        return 0;
    };
    let mask = if bits == 0 || bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    };
    new_frame.wrapping_sub(previous) & mask
}

/// Outcome of one [`FrameScheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTick {
    /// False when the tick was coalesced with the previous frame.
    pub ran: bool,
    pub active: bool,
    /// New rate to announce through `frame_rate_changed`.
    pub rate_changed: Option<u32>,
    /// Time left until the next frame is due, less what this frame spent in `start_frame`.
    pub next_in: Duration,
}

#[derive(Debug, Clone)]
pub struct FrameScheduler {
    default_rate: u32,
    rate: u32,
    ns_per_frame: u64,
    idle_frames: u32,
    backoff: Vec<IdleBackoffStep>,
    min_spacing_ns: u64,
    last_frame_ns: Option<u64>,
    frame_number: u32,
}

impl FrameScheduler {
    /// `backoff` must be sorted by `idle_frames`.
    pub fn new(backoff: Vec<IdleBackoffStep>, min_spacing: Duration) -> Self {
        Self {
            default_rate: 0,
            rate: 0,
            ns_per_frame: 0,
            idle_frames: 0,
            backoff,
            min_spacing_ns: min_spacing.as_nanos() as u64,
            last_frame_ns: None,
            frame_number: 0,
        }
    }

    /// The rate last requested through [`FrameScheduler::set_rate`]; 0 when disabled.
    pub fn rate(&self) -> u32 {
        self.default_rate
    }

    /// The rate frames are currently produced at, after idle back-off.
    pub fn current_rate(&self) -> u32 {
        self.rate
    }

    pub fn is_enabled(&self) -> bool {
        self.default_rate != 0
    }

    pub fn idle_frames(&self) -> u32 {
        self.idle_frames
    }

    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(self.ns_per_frame)
    }

    /// Sets the target rate; 0 disables frame processing. Returns the rate to announce.
    pub fn set_rate(&mut self, hz: u32) -> Option<u32> {
        self.default_rate = hz;
        self.idle_frames = 0;
        if hz == 0 {
            self.rate = 0;
            self.ns_per_frame = 0;
            self.last_frame_ns = None;
            return None;
        }
        self.apply_rate(hz);
        Some(hz)
    }

    fn apply_rate(&mut self, hz: u32) {
        self.rate = hz;
        self.ns_per_frame = NS_PER_SEC / u64::from(hz);
        tracing::debug!(rate_hz = hz, "frame rate changed");
    }

    /// Runs a frame at `now_ns` unless it falls within the coalescing window of the previous one.
    /// `start_frame` does the frame's work and reports whether there was any.
    ///
    /// Returns `None` while disabled.
    pub fn tick(&mut self, now_ns: u64, start_frame: impl FnOnce(u32) -> bool) -> Option<FrameTick> {
        if !self.is_enabled() {
            return None;
        }
        if let Some(last) = self.last_frame_ns {
            if now_ns.saturating_sub(last) < self.min_spacing_ns {
                let due = last.saturating_add(self.ns_per_frame);
                return Some(FrameTick {
                    ran: false,
                    active: false,
                    rate_changed: None,
                    next_in: Duration::from_nanos(due.saturating_sub(now_ns)),
                });
            }
        }

        let frame = self.frame_number;
        let began = Instant::now();
        let active = start_frame(frame);
        let spent = began.elapsed();
        tracing::trace!(frame, active, "frame");
        self.frame_number = frame.wrapping_add(1);
        self.last_frame_ns = Some(now_ns);
        let rate_changed = self.adapt(active);
        Some(FrameTick {
            ran: true,
            active,
            rate_changed,
            next_in: Duration::from_nanos(self.ns_per_frame).saturating_sub(spent),
        })
    }

    fn adapt(&mut self, active: bool) -> Option<u32> {
        if active {
            self.idle_frames = 0;
            if self.rate != self.default_rate {
                self.apply_rate(self.default_rate);
                return Some(self.default_rate);
            }
            return None;
        }

        self.idle_frames += 1;
        if self.idle_frames > IDLE_CLAMP_HIGH {
            self.idle_frames = IDLE_CLAMP_RESET;
        }
        let target = self
            .backoff
            .iter()
            .rev()
            .find(|step| self.idle_frames >= step.idle_frames)?
            .rate_hz;
        if target < self.rate {
            self.apply_rate(target);
            return Some(target);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RootHubConfig;

    const MS: u64 = 1_000_000;

    fn scheduler() -> FrameScheduler {
        let cfg = RootHubConfig::default();
        FrameScheduler::new(
            cfg.sorted_backoff(),
            Duration::from_micros(cfg.min_frame_spacing_us),
        )
    }

    #[test]
    fn delta_wraps_at_counter_width() {
        assert_eq!(isoc_frame_delta(Some(2046), 2, 11), 4);
        assert_eq!(isoc_frame_delta(Some(4094), 2, 12), 4);
        assert_eq!(isoc_frame_delta(Some(10), 15, 11), 5);
        assert_eq!(isoc_frame_delta(Some(u32::MAX), 1, 32), 2);
    }

    #[test]
    fn delta_without_history_is_zero() {
        assert_eq!(isoc_frame_delta(None, 1234, 11), 0);
    }

    #[test]
    fn bit_times() {
        assert_eq!(bit_times_per_frame(USB_FRAME_RATE_HZ), 12_000);
        assert_eq!(bit_times_per_frame(8000), 1_500);
        assert_eq!(bit_times_per_frame(0), 0);
    }

    #[test]
    fn disabled_scheduler_never_runs() {
        let mut s = scheduler();
        assert!(s.tick(0, |_| panic!("frame while disabled")).is_none());
        assert_eq!(s.set_rate(1000), Some(1000));
        assert_eq!(s.frame_interval(), Duration::from_millis(1));
        assert_eq!(s.set_rate(0), None);
        assert!(!s.is_enabled());
        assert!(s.tick(MS, |_| true).is_none());
    }

    #[test]
    fn idle_frames_step_down_and_activity_restores() {
        let mut s = scheduler();
        s.set_rate(1000);
        let mut now = 0;
        let mut changes = Vec::new();
        for _ in 0..30 {
            let tick = s.tick(now, |_| false).unwrap();
            assert!(tick.ran);
            changes.extend(tick.rate_changed);
            now += 5 * MS;
        }
        assert_eq!(changes, vec![500, 125, 50]);
        assert_eq!(s.current_rate(), 50);
        assert_eq!(s.rate(), 1000);

        let tick = s.tick(now, |_| true).unwrap();
        assert_eq!(tick.rate_changed, Some(1000));
        assert_eq!(s.idle_frames(), 0);
        assert!(tick.next_in <= Duration::from_millis(1));
    }

    #[test]
    fn frame_work_is_taken_off_the_wait() {
        let mut s = scheduler();
        s.set_rate(1000);
        let tick = s
            .tick(0, |_| {
                std::thread::sleep(Duration::from_micros(400));
                true
            })
            .unwrap();
        assert!(tick.next_in <= Duration::from_micros(600));

        // A frame that overruns its slot asks for the next one straight away.
        let tick = s
            .tick(2 * MS, |_| {
                std::thread::sleep(Duration::from_millis(2));
                true
            })
            .unwrap();
        assert_eq!(tick.next_in, Duration::ZERO);
    }

    #[test]
    fn close_frames_are_coalesced() {
        let mut s = scheduler();
        s.set_rate(1000);
        assert!(s.tick(10 * MS, |n| {
            assert_eq!(n, 0);
            true
        })
        .unwrap()
        .ran);
        let tick = s.tick(10 * MS + 500_000, |_| panic!("coalesced")).unwrap();
        assert!(!tick.ran);
        assert_eq!(tick.next_in, Duration::from_micros(500));

        let tick = s.tick(10 * MS + 800_000, |n| {
            assert_eq!(n, 1);
            false
        });
        assert!(tick.unwrap().ran);
    }

    #[test]
    fn idle_counter_is_clamped() {
        let mut s = scheduler();
        s.set_rate(1000);
        s.idle_frames = IDLE_CLAMP_HIGH;
        s.tick(0, |_| false);
        assert_eq!(s.idle_frames(), IDLE_CLAMP_RESET);
        assert_eq!(s.current_rate(), 50);
    }
}
