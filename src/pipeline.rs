//! Pipeline orchestration
//!
//! [`SessionPipeline`] is the synchronous core of a collection session. It takes raw
//! notifications in arrival order and runs each through the stages:
//!
//! 1. FrameDecoder - parse the payload
//! 2. SampleClock - stamp it on its stream's clock
//! 3. HrvWindow - update sdNN (RR only)
//! 4. StateClassifier - re-evaluate the state (RR only)
//! 5. SessionRecorder - append the row
//!
//! It never awaits and never blocks; the async collector owns the I/O around it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::classifier::{StateClassifier, Transition};
use crate::clock::{SampleClock, SystemTimeSource, TimeSource};
use crate::config::{CollectorConfig, SessionOptions};
use crate::decoder::{EcgFrame, FrameDecoder, HeartRateFrame};
use crate::error::PulseError;
use crate::hrv::HrvWindow;
use crate::recorder::SessionRecorder;
use crate::types::{
    Channel, EcgPayload, HrvState, RawNotification, RrPayload, Sample, TapPayload, TimeBase,
    Timestamp,
};

/// One point of the live heart rate view
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotPoint {
    /// Seconds since the first RR sample, or the sample index in wall-clock mode
    pub x: f64,
    pub hr: u16,
    pub rr: u16,
    pub sdnn: Option<f64>,
    pub state: HrvState,
}

/// Frame counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub heart_rate_frames: usize,
    pub ecg_frames: usize,
    /// Well-formed frames that carry nothing to record (no RR, non-ECG PMD)
    pub ignored_frames: usize,
    /// Frames that failed to decode
    pub dropped_frames: usize,
    pub transitions: usize,
}

/// Stateful per-session processor
pub struct SessionPipeline {
    window: HrvWindow,
    classifier: StateClassifier,
    rr_clock: SampleClock,
    ecg_clock: SampleClock,
    tap_clock: SampleClock,
    recorder: SessionRecorder,
    stats: PipelineStats,
    last_transition: Option<Transition>,
}

impl SessionPipeline {
    /// Create a pipeline stamped by the host clock
    pub fn new(config: &CollectorConfig, options: &SessionOptions) -> Self {
        Self::with_time_source(config, options, Arc::new(SystemTimeSource::default()))
    }

    /// Create a pipeline whose stream clocks all read from `source`
    pub fn with_time_source(
        config: &CollectorConfig,
        options: &SessionOptions,
        source: Arc<dyn TimeSource>,
    ) -> Self {
        let mode = options.time_base();
        Self {
            window: HrvWindow::new(config.rr_window),
            classifier: StateClassifier::new(config.dwell_secs(), config.decision_boundary),
            rr_clock: SampleClock::new(mode, Arc::clone(&source)),
            ecg_clock: SampleClock::new(mode, Arc::clone(&source)),
            tap_clock: SampleClock::new(mode, source),
            recorder: SessionRecorder::new(options.record_options()),
            stats: PipelineStats::default(),
            last_transition: None,
        }
    }

    /// Process one notification.
    ///
    /// Returns a plot point for every recorded RR sample. Decode failures are
    /// logged and cost only this frame.
    pub fn handle(&mut self, notification: &RawNotification) -> Option<PlotPoint> {
        match notification.channel {
            Channel::HeartRate => match FrameDecoder::decode_heart_rate(&notification.payload) {
                Ok(Some(frame)) => Some(self.on_heart_rate(frame)),
                Ok(None) => {
                    self.stats.ignored_frames += 1;
                    log::debug!("Heart rate frame without RR interval ignored");
                    None
                }
                Err(e) => {
                    self.stats.dropped_frames += 1;
                    log::warn!("Dropping {} frame: {}", notification.channel.as_str(), e);
                    None
                }
            },
            Channel::EcgStream => {
                match FrameDecoder::decode_ecg(&notification.payload) {
                    Ok(Some(frame)) => self.on_ecg(frame),
                    Ok(None) => {
                        self.stats.ignored_frames += 1;
                        log::debug!("Non-ECG PMD frame ignored");
                    }
                    Err(e) => {
                        self.stats.dropped_frames += 1;
                        log::warn!("Dropping {} frame: {}", notification.channel.as_str(), e);
                    }
                }
                None
            }
        }
    }

    fn on_heart_rate(&mut self, frame: HeartRateFrame) -> PlotPoint {
        let stamp = self.rr_clock.stamp();

        self.window.push(frame.rr);
        let sdnn = self.window.sdnn();

        if let Some(transition) = self.classifier.update(stamp.elapsed, sdnn) {
            log::info!(
                "State {} -> {} at {:.1}s",
                transition.from.index(),
                transition.to.index(),
                transition.at
            );
            self.stats.transitions += 1;
            self.last_transition = Some(transition);
        }
        let state = self.classifier.state();

        log::debug!(
            "RR sample t={:.3} hr={} rr={} sdnn={:?}",
            stamp.elapsed,
            frame.hr,
            frame.rr,
            sdnn
        );

        let x = match self.rr_clock.mode() {
            TimeBase::Relative => stamp.elapsed,
            TimeBase::WallClock => self.recorder.rr_records().len() as f64,
        };

        self.recorder.record_rr(
            Sample::new(
                stamp.elapsed,
                stamp.wall_clock,
                RrPayload {
                    hr: frame.hr,
                    rr: frame.rr,
                },
            ),
            sdnn,
            state,
        );
        self.stats.heart_rate_frames += 1;

        PlotPoint {
            x,
            hr: frame.hr,
            rr: frame.rr,
            sdnn,
            state,
        }
    }

    fn on_ecg(&mut self, frame: EcgFrame) {
        // All samples of a frame share the frame's arrival stamp
        let stamp = self.ecg_clock.stamp();
        log::debug!(
            "ECG frame t={:.3} device_ts={} samples={}",
            stamp.elapsed,
            frame.device_timestamp,
            frame.samples.len()
        );

        for ecg in frame.samples {
            self.recorder.record_ecg(Sample::new(
                stamp.elapsed,
                stamp.wall_clock,
                EcgPayload {
                    device_timestamp: frame.device_timestamp,
                    ecg,
                },
            ));
        }
        self.stats.ecg_frames += 1;
    }

    /// Record a tap marker on the tap stream's own clock
    pub fn record_tap(&mut self) -> Timestamp {
        let stamp = self.tap_clock.stamp();
        let sample = Sample::new(stamp.elapsed, stamp.wall_clock, TapPayload);
        let timestamp = sample.timestamp();
        self.recorder.record_tap(sample);
        log::info!("Tap at {}", timestamp);
        timestamp
    }

    pub fn state(&self) -> HrvState {
        self.classifier.state()
    }

    pub fn sdnn(&self) -> Option<f64> {
        self.window.sdnn()
    }

    pub fn last_transition(&self) -> Option<Transition> {
        self.last_transition
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    /// Write the recorded streams next to `base`
    pub fn flush(&self, base: &Path) -> Result<Vec<PathBuf>, PulseError> {
        self.recorder.flush(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::simulated::{ecg_frame, heart_rate_frame};
    use chrono::NaiveTime;
    use pretty_assertions::assert_eq;

    fn pipeline(config: CollectorConfig, options: SessionOptions) -> (ManualTimeSource, SessionPipeline) {
        let source = ManualTimeSource::new(NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let pipeline = SessionPipeline::with_time_source(&config, &options, Arc::new(source.clone()));
        (source, pipeline)
    }

    fn hr(bpm: u8, rr: u16) -> RawNotification {
        RawNotification::new(Channel::HeartRate, heart_rate_frame(bpm, rr))
    }

    #[test]
    fn test_rr_samples_feed_window_and_recorder() {
        let (source, mut pipeline) = pipeline(CollectorConfig::default(), SessionOptions::default());

        for rr in [500, 520, 480, 510, 505] {
            pipeline.handle(&hr(120, rr));
            source.advance(0.5);
        }

        let records = pipeline.recorder().rr_records();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].sample.t, 0.0);
        assert_eq!(records[4].sample.t, 2.0);
        assert_eq!(records[0].sdnn, None);
        assert!((records[4].sdnn.unwrap() - 220f64.sqrt()).abs() < 1e-9);
        assert_eq!(pipeline.stats().heart_rate_frames, 5);
    }

    #[test]
    fn test_frames_without_rr_produce_no_sample() {
        let (_, mut pipeline) = pipeline(CollectorConfig::default(), SessionOptions::default());

        let point = pipeline.handle(&RawNotification::new(Channel::HeartRate, vec![0x00, 72]));

        assert_eq!(point, None);
        assert!(pipeline.recorder().is_empty());
        assert_eq!(pipeline.stats().ignored_frames, 1);
    }

    #[test]
    fn test_decode_errors_drop_only_that_frame() {
        let (_, mut pipeline) = pipeline(CollectorConfig::default(), SessionOptions::default());

        pipeline.handle(&RawNotification::new(Channel::HeartRate, Vec::new()));
        pipeline.handle(&RawNotification::new(Channel::HeartRate, vec![0x10, 60, 0xE8]));
        pipeline.handle(&RawNotification::new(Channel::EcgStream, vec![0x00, 1, 2]));
        pipeline.handle(&hr(60, 1000));

        assert_eq!(pipeline.stats().dropped_frames, 3);
        assert_eq!(pipeline.recorder().rr_records().len(), 1);
    }

    #[test]
    fn test_ecg_frame_shares_one_stamp() {
        let (source, mut pipeline) = pipeline(CollectorConfig::default(), SessionOptions::default());

        pipeline.handle(&RawNotification::new(Channel::EcgStream, ecg_frame(7, &[1, -2, 3])));
        source.advance(0.56);
        pipeline.handle(&RawNotification::new(Channel::EcgStream, ecg_frame(8, &[4])));
        // Acceleration frame
        pipeline.handle(&RawNotification::new(Channel::EcgStream, vec![0x02, 0, 0]));

        let samples = pipeline.recorder().ecg_samples();
        assert_eq!(samples.len(), 4);
        assert!(samples[..3].iter().all(|s| s.t == 0.0 && s.payload.device_timestamp == 7));
        assert_eq!(samples[3].t, 0.56);
        assert_eq!(pipeline.stats().ecg_frames, 2);
        assert_eq!(pipeline.stats().ignored_frames, 1);
    }

    #[test]
    fn test_state_follows_hysteresis() {
        let config = CollectorConfig {
            rr_window: 2,
            time_in_state_0: 3,
            time_in_state_1: 3,
            decision_boundary: 100.0,
            ..CollectorConfig::default()
        };
        let (source, mut pipeline) = pipeline(config, SessionOptions::default());

        // Alternating 600/900 gives sdNN ≈ 212 from the second sample on
        let mut states = Vec::new();
        for (i, rr) in [600, 900, 600, 900, 600, 900].into_iter().enumerate() {
            source.set(i as f64);
            states.push(pipeline.handle(&hr(80, rr)).unwrap().state);
        }

        assert_eq!(
            states,
            vec![
                HrvState::Low,
                HrvState::Low,
                HrvState::Low,
                HrvState::High,
                HrvState::High,
                HrvState::High
            ]
        );
        assert_eq!(pipeline.last_transition().unwrap().at, 3.0);
        assert_eq!(pipeline.stats().transitions, 1);
    }

    #[test]
    fn test_streams_latch_their_own_epoch() {
        let options = SessionOptions {
            save_current_time: true,
            ..SessionOptions::default()
        };
        let (source, mut pipeline) = pipeline(CollectorConfig::default(), options);

        source.set(10.0);
        pipeline.handle(&hr(60, 1000));
        source.set(12.0);
        let tap = pipeline.record_tap();
        pipeline.handle(&hr(60, 1000));

        assert_eq!(
            tap,
            Timestamp::WallClock(NaiveTime::from_hms_opt(8, 0, 12).unwrap())
        );
        assert_eq!(pipeline.recorder().taps()[0].t, 0.0);
        assert_eq!(pipeline.recorder().rr_records()[1].sample.t, 2.0);
        assert_eq!(
            pipeline.recorder().rr_records()[1].sample.wall_clock,
            NaiveTime::from_hms_opt(8, 0, 12)
        );
    }

    #[test]
    fn test_wall_clock_plot_uses_sample_index() {
        let options = SessionOptions {
            save_current_time: true,
            ..SessionOptions::default()
        };
        let (source, mut pipeline) = pipeline(CollectorConfig::default(), options);

        let first = pipeline.handle(&hr(60, 1000)).unwrap();
        source.advance(1.0);
        let second = pipeline.handle(&hr(61, 990)).unwrap();

        assert_eq!((first.x, second.x), (0.0, 1.0));
        assert_eq!(second.sdnn, Some(50f64.sqrt()));
    }
}
