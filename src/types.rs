//! Core types for the Synheart Pulse pipeline
//!
//! This module defines the data that flows through each stage of the pipeline:
//! raw notifications, timestamped samples and the classifier state.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Notification channel a raw payload arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Standard Heart Rate Measurement characteristic (0x2A37)
    HeartRate,
    /// Polar PMD data characteristic carrying ECG frames
    EcgStream,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::HeartRate => "heart_rate",
            Channel::EcgStream => "ecg_stream",
        }
    }
}

/// A notification as pushed by the GATT collaborator, consumed immediately by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl RawNotification {
    pub fn new(channel: Channel, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

/// Time base used to stamp samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBase {
    /// Seconds since the first sample of the stream
    #[default]
    Relative,
    /// Local time of day, no epoch subtraction
    WallClock,
}

/// A sample timestamp in one of the two time bases
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timestamp {
    Relative(f64),
    WallClock(NaiveTime),
}

/// Format used for time-of-day cells in recorded files
pub const WALL_CLOCK_FORMAT: &str = "%H:%M:%S%.6f";

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timestamp::Relative(secs) => write!(f, "{}", secs),
            Timestamp::WallClock(time) => write!(f, "{}", time.format(WALL_CLOCK_FORMAT)),
        }
    }
}

/// Two-state physiological regime tracked by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrvState {
    /// State 0: sdNN at or below the decision boundary
    #[default]
    Low,
    /// State 1: sdNN above the decision boundary
    High,
}

impl HrvState {
    pub fn index(&self) -> usize {
        match self {
            HrvState::Low => 0,
            HrvState::High => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(HrvState::Low),
            1 => Some(HrvState::High),
            _ => None,
        }
    }
}

/// A timestamped sample carrying a per-channel payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample<P> {
    /// Seconds since the stream's first sample
    pub t: f64,
    /// Local time of day, captured only when wall-clock stamping is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_clock: Option<NaiveTime>,
    pub payload: P,
}

impl<P> Sample<P> {
    pub fn new(t: f64, wall_clock: Option<NaiveTime>, payload: P) -> Self {
        Self {
            t,
            wall_clock,
            payload,
        }
    }

    /// Timestamp in the time base the sample was collected with
    pub fn timestamp(&self) -> Timestamp {
        match self.wall_clock {
            Some(time) => Timestamp::WallClock(time),
            None => Timestamp::Relative(self.t),
        }
    }
}

/// Heart rate and RR interval from one HR notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RrPayload {
    /// Heart rate (bpm)
    pub hr: u16,
    /// RR interval (ms)
    pub rr: u16,
}

/// One ECG value from a PMD frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcgPayload {
    /// Sensor clock at the start of the frame (device ticks)
    pub device_timestamp: u64,
    /// Raw ADC units
    pub ecg: i32,
}

/// A tap marker; the timestamp is the whole event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TapPayload;

pub type HeartRateSample = Sample<RrPayload>;
pub type EcgSample = Sample<EcgPayload>;
pub type TapSample = Sample<TapPayload>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_index_roundtrip() {
        assert_eq!(HrvState::from_index(HrvState::Low.index()), Some(HrvState::Low));
        assert_eq!(HrvState::from_index(HrvState::High.index()), Some(HrvState::High));
        assert_eq!(HrvState::from_index(2), None);
    }

    #[test]
    fn test_sample_timestamp_follows_time_base() {
        let relative = Sample::new(1.5, None, TapPayload);
        assert_eq!(relative.timestamp(), Timestamp::Relative(1.5));

        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let wall = Sample::new(1.5, Some(noon), TapPayload);
        assert_eq!(wall.timestamp(), Timestamp::WallClock(noon));
        assert_eq!(wall.timestamp().to_string(), "12:00:00.000000");
    }
}
