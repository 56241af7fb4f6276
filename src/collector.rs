//! Async collection session
//!
//! The collector wires a [`GattClient`] to a [`SessionPipeline`]: it reads the
//! device status, subscribes to the heart rate (and optionally ECG) notifications
//! through one bounded channel, and pumps frames and taps into the pipeline until
//! the [`StopSignal`] fires or the sensor stops sending.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::clock::{SystemTimeSource, TimeSource};
use crate::config::{CollectorConfig, SessionOptions};
use crate::error::PulseError;
use crate::gatt::{channel_uuid, read_device_status, start_ecg_stream, DeviceStatus, GattClient};
use crate::pipeline::{PipelineStats, PlotPoint, SessionPipeline};
use crate::types::{Channel, HrvState, RawNotification};

/// Notifications buffered between the GATT callback side and the pipeline
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Plot points a [`LiveFeed`] retains (about an hour of beats)
pub const DEFAULT_LIVE_POINTS: usize = 4096;

/// Create a linked stop handle and signal
pub fn stop_signal() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Requests a running session to stop
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the collector loop. Dropping the [`StopHandle`] also counts as a stop.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop has been requested
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Most recent plot points shared with a live view.
///
/// Keeps at most `capacity` points; older ones are evicted. Readers pull with a
/// cursor counting every point ever published, so a slow reader skips the evicted
/// points instead of seeing them twice. Readers never see the session state itself.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    inner: Arc<Mutex<FeedBuffer>>,
}

#[derive(Debug)]
struct FeedBuffer {
    points: VecDeque<PlotPoint>,
    capacity: usize,
    published: usize,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LIVE_POINTS)
    }
}

impl LiveFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(FeedBuffer {
                points: VecDeque::with_capacity(capacity.min(DEFAULT_LIVE_POINTS)),
                capacity,
                published: 0,
            })),
        }
    }

    pub fn push(&self, point: PlotPoint) {
        if let Ok(mut buf) = self.inner.lock() {
            if buf.points.len() == buf.capacity {
                buf.points.pop_front();
            }
            buf.points.push_back(point);
            buf.published += 1;
        }
    }

    /// Retained points published after the first `cursor` ones, and the cursor
    /// to pass next time
    pub fn snapshot_since(&self, cursor: usize) -> (Vec<PlotPoint>, usize) {
        match self.inner.lock() {
            Ok(buf) => {
                let first_retained = buf.published - buf.points.len();
                let skip = cursor.saturating_sub(first_retained);
                let points = buf.points.iter().skip(skip).copied().collect();
                (points, buf.published)
            }
            Err(_) => (Vec::new(), cursor),
        }
    }

    /// Points ever pushed, including evicted ones
    pub fn published(&self) -> usize {
        self.inner.lock().map(|b| b.published).unwrap_or(0)
    }

    /// Points currently retained
    pub fn len(&self) -> usize {
        self.inner.lock().map(|b| b.points.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<PlotPoint> {
        self.inner.lock().ok().and_then(|b| b.points.back().copied())
    }
}

/// Why the notification loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Stopped,
    /// Every subscription closed its sender
    StreamEnded,
}

/// Summary of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub device: DeviceStatus,
    pub end_reason: EndReason,
    pub stats: PipelineStats,
    pub rr_rows: usize,
    pub ecg_rows: usize,
    pub taps: usize,
    pub final_state: HrvState,
    /// Files written by the last successful save
    pub files: Vec<PathBuf>,
}

/// A finished session whose data has not necessarily been saved yet
pub struct CompletedSession {
    pub pipeline: SessionPipeline,
    pub report: SessionReport,
}

impl CompletedSession {
    /// Flush the recorded streams. May be retried after a failure.
    pub fn save(&mut self, base: &Path) -> Result<&[PathBuf], PulseError> {
        self.report.files = self.pipeline.flush(base)?;
        Ok(&self.report.files)
    }
}

/// Runs collection sessions with a fixed configuration
pub struct Collector {
    config: CollectorConfig,
    options: SessionOptions,
    time_source: Arc<dyn TimeSource>,
    channel_capacity: usize,
    live: LiveFeed,
}

impl Collector {
    pub fn new(config: CollectorConfig, options: SessionOptions) -> Self {
        Self {
            config,
            options,
            time_source: Arc::new(SystemTimeSource::default()),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            live: LiveFeed::new(),
        }
    }

    pub fn with_time_source(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.time_source = source;
        self
    }

    /// Notifications that may queue ahead of the pipeline before the sensor side waits
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Feed that receives a point per RR sample when `display_graph` is set
    pub fn live_feed(&self) -> LiveFeed {
        self.live.clone()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Collect from `client` until `stop` fires or every subscription ends.
    ///
    /// `taps` delivers tap markers; pass `None` when there is no tap source.
    /// Connection failures abort the attempt. On stop the subscriptions are
    /// cancelled and frames already queued are still processed.
    pub async fn run(
        &self,
        client: &dyn GattClient,
        mut stop: StopSignal,
        mut taps: Option<mpsc::Receiver<()>>,
    ) -> Result<CompletedSession, PulseError> {
        let started_at = Utc::now();
        let session_id = Uuid::new_v4();

        let device = read_device_status(client).await?;
        let mut pipeline = SessionPipeline::with_time_source(
            &self.config,
            &self.options,
            Arc::clone(&self.time_source),
        );

        let (tx, mut rx) = mpsc::channel(self.channel_capacity);
        let mut subscriptions = Vec::new();

        if self.options.capture_ecg {
            start_ecg_stream(client).await?;
            let uuid = channel_uuid(Channel::EcgStream);
            client.subscribe(uuid, Channel::EcgStream, tx.clone()).await?;
            subscriptions.push(uuid);
        }
        let uuid = channel_uuid(Channel::HeartRate);
        client.subscribe(uuid, Channel::HeartRate, tx).await?;
        subscriptions.push(uuid);

        log::info!(
            "Session {} started ({} subscription(s))",
            session_id,
            subscriptions.len()
        );

        let end_reason = loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break EndReason::Stopped,
                frame = rx.recv() => match frame {
                    Some(notification) => self.process(&mut pipeline, &notification),
                    None => break EndReason::StreamEnded,
                },
                tap = next_tap(&mut taps), if taps.is_some() => match tap {
                    Some(()) => {
                        pipeline.record_tap();
                    }
                    None => taps = None,
                },
            }
        };

        for uuid in &subscriptions {
            if let Err(e) = client.unsubscribe(*uuid).await {
                log::warn!("Failed to unsubscribe from {}: {}", uuid, e);
            }
        }

        let mut drained = 0;
        while let Ok(notification) = rx.try_recv() {
            self.process(&mut pipeline, &notification);
            drained += 1;
        }
        if drained > 0 {
            log::debug!("Drained {} queued frame(s) after stop", drained);
        }

        let stats = pipeline.stats();
        let recorder = pipeline.recorder();
        let report = SessionReport {
            session_id,
            started_at,
            ended_at: Utc::now(),
            device,
            end_reason,
            stats,
            rr_rows: recorder.rr_records().len(),
            ecg_rows: recorder.ecg_samples().len(),
            taps: recorder.taps().len(),
            final_state: pipeline.state(),
            files: Vec::new(),
        };

        log::info!(
            "Session {} ended ({:?}): {} RR, {} ECG, {} taps, {} dropped frame(s)",
            session_id,
            end_reason,
            report.rr_rows,
            report.ecg_rows,
            report.taps,
            stats.dropped_frames
        );

        Ok(CompletedSession { pipeline, report })
    }

    fn process(&self, pipeline: &mut SessionPipeline, notification: &RawNotification) {
        if let Some(point) = pipeline.handle(notification) {
            if self.options.display_graph {
                self.live.push(point);
            }
        }
    }
}

async fn next_tap(taps: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match taps {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
