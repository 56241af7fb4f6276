//! Synheart Pulse - chest-strap telemetry collection and HRV state tracking
//!
//! Pulse turns BLE notifications from a Polar H10 class sensor into recorded
//! sessions through a deterministic pipeline: frame decoding → sample stamping →
//! sdNN window → hysteresis state classification → CSV recording.
//!
//! ## Modules
//!
//! - **Collection**: [`collector`] drives a session over any [`gatt::GattClient`]
//! - **Analysis**: [`boundary`] searches a decision boundary in a recorded session

pub mod boundary;
pub mod classifier;
pub mod clock;
pub mod collector;
pub mod config;
pub mod decoder;
pub mod error;
pub mod gatt;
pub mod hrv;
pub mod pipeline;
pub mod recorder;
pub mod simulated;
pub mod types;

pub use boundary::{BoundaryOptimizer, BoundaryResult, ScoreTarget};
pub use classifier::StateClassifier;
pub use clock::SampleClock;
pub use collector::{stop_signal, Collector, CompletedSession, LiveFeed, SessionReport, StopHandle, StopSignal};
pub use config::{CollectorConfig, SessionOptions};
pub use decoder::FrameDecoder;
pub use error::{ConfigError, ConnectionError, DecodeError, PulseError};
pub use hrv::HrvWindow;
pub use pipeline::{PlotPoint, SessionPipeline};
pub use recorder::SessionRecorder;

/// Pulse version reported by the CLI
pub const PULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name written into session reports
pub const PRODUCER_NAME: &str = "synheart-pulse";
