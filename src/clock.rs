//! Sample timestamping
//!
//! Every stream (RR, ECG, tap) owns a [`SampleClock`] that latches its own epoch
//! on the first sample. Elapsed time is measured on a monotonic source; the wall
//! clock is only read for time-of-day stamps and never subtracted.

use crate::types::{TimeBase, Timestamp};
use chrono::{Local, NaiveTime};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Source of "now" for sample clocks
pub trait TimeSource: Send + Sync {
    /// Seconds on a monotonic scale with an arbitrary origin
    fn monotonic_secs(&self) -> f64;

    /// Local time of day
    fn time_of_day(&self) -> NaiveTime;
}

/// Host clock: `Instant` for elapsed time, local time for time of day
#[derive(Debug, Clone)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn monotonic_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn time_of_day(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Manually driven time source for tests and replays.
///
/// Clones share the same clock, so a test can hold one handle while the pipeline
/// owns another.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    secs: f64,
    start_of_day: NaiveTime,
}

impl ManualTimeSource {
    pub fn new(start_of_day: NaiveTime) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                secs: 0.0,
                start_of_day,
            })),
        }
    }

    /// Move the clock to an absolute position (may go backwards)
    pub fn set(&self, secs: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.secs = secs;
        }
    }

    pub fn advance(&self, secs: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.secs += secs;
        }
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new(NaiveTime::MIN)
    }
}

impl TimeSource for ManualTimeSource {
    fn monotonic_secs(&self) -> f64 {
        self.state.lock().map(|s| s.secs).unwrap_or_default()
    }

    fn time_of_day(&self) -> NaiveTime {
        match self.state.lock() {
            Ok(state) => {
                let offset = chrono::Duration::microseconds((state.secs * 1e6) as i64);
                state.start_of_day.overflowing_add_signed(offset).0
            }
            Err(_) => NaiveTime::MIN,
        }
    }
}

/// Timestamp pair produced for one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamp {
    /// Seconds since the stream's first sample
    pub elapsed: f64,
    /// Time of day, present only in wall-clock mode
    pub wall_clock: Option<NaiveTime>,
}

/// Per-stream clock with a first-sample epoch latch
pub struct SampleClock {
    mode: TimeBase,
    epoch: Option<f64>,
    source: Arc<dyn TimeSource>,
}

impl SampleClock {
    pub fn new(mode: TimeBase, source: Arc<dyn TimeSource>) -> Self {
        Self {
            mode,
            epoch: None,
            source,
        }
    }

    /// Clock backed by the host's monotonic and local clocks
    pub fn system(mode: TimeBase) -> Self {
        Self::new(mode, Arc::new(SystemTimeSource::default()))
    }

    pub fn mode(&self) -> TimeBase {
        self.mode
    }

    /// Whether the first sample has been stamped
    pub fn is_latched(&self) -> bool {
        self.epoch.is_some()
    }

    /// Stamp a sample.
    ///
    /// The first call latches the epoch and reports 0 elapsed seconds. Elapsed time
    /// is only as monotonic as the source; a source that steps backwards before the
    /// epoch is clamped to 0.
    pub fn stamp(&mut self) -> Stamp {
        let now = self.source.monotonic_secs();
        let elapsed = match self.epoch {
            Some(epoch) => (now - epoch).max(0.0),
            None => {
                self.epoch = Some(now);
                0.0
            }
        };

        let wall_clock = match self.mode {
            TimeBase::Relative => None,
            TimeBase::WallClock => Some(self.source.time_of_day()),
        };

        Stamp {
            elapsed,
            wall_clock,
        }
    }

    /// Timestamp the next sample in this clock's time base
    pub fn next_timestamp(&mut self) -> Timestamp {
        let stamp = self.stamp();
        match stamp.wall_clock {
            Some(time) => Timestamp::WallClock(time),
            None => Timestamp::Relative(stamp.elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_clock(mode: TimeBase) -> (ManualTimeSource, SampleClock) {
        let source = ManualTimeSource::new(NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        source.set(1000.0);
        let clock = SampleClock::new(mode, Arc::new(source.clone()));
        (source, clock)
    }

    #[test]
    fn test_first_sample_latches_epoch() {
        let (source, mut clock) = manual_clock(TimeBase::Relative);
        assert!(!clock.is_latched());

        assert_eq!(clock.next_timestamp(), Timestamp::Relative(0.0));
        assert!(clock.is_latched());

        source.advance(2.5);
        assert_eq!(clock.next_timestamp(), Timestamp::Relative(2.5));

        source.advance(0.5);
        assert_eq!(clock.next_timestamp(), Timestamp::Relative(3.0));
    }

    #[test]
    fn test_wall_clock_mode_reports_time_of_day() {
        let (source, mut clock) = manual_clock(TimeBase::WallClock);

        source.set(0.0);
        assert_eq!(
            clock.next_timestamp(),
            Timestamp::WallClock(NaiveTime::from_hms_opt(9, 30, 0).unwrap())
        );

        source.advance(61.0);
        let stamp = clock.stamp();
        assert_eq!(stamp.wall_clock, NaiveTime::from_hms_opt(9, 31, 1));
        assert_eq!(stamp.elapsed, 61.0);
    }

    #[test]
    fn test_independent_epochs_per_stream() {
        let source = ManualTimeSource::default();
        let shared: Arc<dyn TimeSource> = Arc::new(source.clone());
        let mut rr = SampleClock::new(TimeBase::Relative, Arc::clone(&shared));
        let mut ecg = SampleClock::new(TimeBase::Relative, shared);

        rr.stamp();
        source.advance(5.0);
        assert_eq!(ecg.stamp().elapsed, 0.0);

        source.advance(1.0);
        assert_eq!(rr.stamp().elapsed, 6.0);
        assert_eq!(ecg.stamp().elapsed, 1.0);
    }

    #[test]
    fn test_backwards_source_is_clamped() {
        let (source, mut clock) = manual_clock(TimeBase::Relative);
        clock.stamp();
        source.advance(-3.0);
        assert_eq!(clock.stamp().elapsed, 0.0);
    }

    #[test]
    fn test_system_clock_is_non_decreasing() {
        let mut clock = SampleClock::system(TimeBase::Relative);
        let mut last = clock.stamp().elapsed;
        for _ in 0..100 {
            let next = clock.stamp().elapsed;
            assert!(next >= last);
            last = next;
        }
    }
}
