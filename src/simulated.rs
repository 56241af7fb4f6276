//! In-process chest-strap simulator
//!
//! [`SimulatedSensor`] implements [`GattClient`] without any BLE hardware. It either
//! replays scripted payloads (tests) or synthesizes a plausible heart rate and ECG
//! stream (demos). Synthetic ECG frames only flow after the PMD start request has
//! been written, like on a real sensor.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::decoder::{HR_RR_PRESENT, PMD_ECG_TAG};
use crate::error::ConnectionError;
use crate::gatt::{
    GattCentral, GattClient, BATTERY_LEVEL_UUID, ECG_START_REQUEST, HEART_RATE_UUID,
    MANUFACTURER_NAME_UUID, MODEL_NUMBER_UUID, PMD_CONTROL_UUID, PMD_DATA_UUID,
};
use crate::types::{Channel, RawNotification};

/// ECG samples per synthetic PMD frame
const SYNTHETIC_ECG_SAMPLES: usize = 73;
/// Synthetic ECG sample rate (Hz)
const SYNTHETIC_ECG_RATE_HZ: f64 = 130.0;

/// Encode a UINT8 Heart Rate Measurement frame carrying one RR interval
pub fn heart_rate_frame(hr: u8, rr_ms: u16) -> Vec<u8> {
    let [lo, hi] = rr_ms.to_le_bytes();
    vec![HR_RR_PRESENT, hr, lo, hi]
}

/// Encode a PMD ECG frame
pub fn ecg_frame(device_timestamp: u64, samples: &[i32]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(10 + samples.len() * 3);
    payload.push(PMD_ECG_TAG);
    payload.extend_from_slice(&device_timestamp.to_le_bytes());
    payload.push(0x00);
    for &sample in samples {
        let bytes = sample.to_le_bytes();
        payload.extend_from_slice(&bytes[..3]);
    }
    payload
}

/// How the simulator produces notifications
#[derive(Debug, Clone)]
enum Feed {
    /// Replay these payloads per channel, `gap` apart, then end the subscription
    Scripted {
        frames: HashMap<Channel, Vec<Vec<u8>>>,
        gap: Duration,
    },
    /// Generate frames until unsubscribed
    Synthetic { heart_rate_period: Duration },
}

/// Simulated Polar-style chest strap
pub struct SimulatedSensor {
    model_number: String,
    manufacturer_name: String,
    battery_level: u8,
    feed: Feed,
    connected: AtomicBool,
    ecg_requested: AtomicBool,
    subscriptions: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
}

impl SimulatedSensor {
    fn with_feed(feed: Feed) -> Self {
        Self {
            model_number: "H10".to_string(),
            manufacturer_name: "Polar Electro Oy".to_string(),
            battery_level: 87,
            feed,
            connected: AtomicBool::new(true),
            ecg_requested: AtomicBool::new(false),
            subscriptions: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Sensor that synthesizes one heart rate frame per `heart_rate_period`
    pub fn synthetic(heart_rate_period: Duration) -> Self {
        Self::with_feed(Feed::Synthetic { heart_rate_period })
    }

    /// Sensor that replays the given payloads and then closes each subscription.
    ///
    /// With no gap, payloads are queued into the subscription's channel before
    /// `subscribe` returns.
    pub fn scripted(heart_rate: Vec<Vec<u8>>, ecg: Vec<Vec<u8>>) -> Self {
        let mut frames = HashMap::new();
        frames.insert(Channel::HeartRate, heart_rate);
        frames.insert(Channel::EcgStream, ecg);
        Self::with_feed(Feed::Scripted {
            frames,
            gap: Duration::ZERO,
        })
    }

    /// Delay between scripted payloads
    pub fn with_gap(mut self, gap: Duration) -> Self {
        if let Feed::Scripted { gap: ref mut g, .. } = self.feed {
            *g = gap;
        }
        self
    }

    pub fn with_battery_level(mut self, level: u8) -> Self {
        self.battery_level = level;
        self
    }

    /// Every characteristic write received so far
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .map(|s| s.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::Disconnected)
        }
    }
}

#[async_trait]
impl GattClient for SimulatedSensor {
    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, ConnectionError> {
        self.ensure_connected()?;
        match uuid {
            MODEL_NUMBER_UUID => Ok(self.model_number.as_bytes().to_vec()),
            MANUFACTURER_NAME_UUID => Ok(self.manufacturer_name.as_bytes().to_vec()),
            BATTERY_LEVEL_UUID => Ok(vec![self.battery_level]),
            // Feature response: ECG and ACC supported
            PMD_CONTROL_UUID => Ok(vec![0x0F, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00]),
            other => Err(ConnectionError::UnknownCharacteristic(other)),
        }
    }

    async fn write_characteristic(&self, uuid: Uuid, data: &[u8]) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        if uuid != PMD_CONTROL_UUID {
            return Err(ConnectionError::UnknownCharacteristic(uuid));
        }
        if data == ECG_START_REQUEST {
            self.ecg_requested.store(true, Ordering::SeqCst);
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((uuid, data.to_vec()));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        uuid: Uuid,
        channel: Channel,
        sink: mpsc::Sender<RawNotification>,
    ) -> Result<(), ConnectionError> {
        self.ensure_connected()?;
        if uuid != HEART_RATE_UUID && uuid != PMD_DATA_UUID {
            return Err(ConnectionError::UnknownCharacteristic(uuid));
        }

        let handle = match &self.feed {
            Feed::Scripted { frames, gap } => {
                let mut payloads: VecDeque<Vec<u8>> =
                    frames.get(&channel).cloned().unwrap_or_default().into();
                // Without a gap the script is already in flight when subscribe returns,
                // up to the channel's free capacity
                if gap.is_zero() {
                    while let Some(payload) = payloads.pop_front() {
                        match sink.try_send(RawNotification::new(channel, payload)) {
                            Ok(()) => {}
                            Err(TrySendError::Full(n)) | Err(TrySendError::Closed(n)) => {
                                payloads.push_front(n.payload);
                                break;
                            }
                        }
                    }
                }
                tokio::spawn(replay(channel, payloads.into(), *gap, sink))
            }
            Feed::Synthetic { heart_rate_period } => match channel {
                Channel::HeartRate => tokio::spawn(synthesize_heart_rate(*heart_rate_period, sink)),
                Channel::EcgStream => {
                    if !self.ecg_requested.load(Ordering::SeqCst) {
                        return Err(ConnectionError::Gatt(
                            "PMD stream not started".to_string(),
                        ));
                    }
                    tokio::spawn(synthesize_ecg(sink))
                }
            },
        };

        let mut subscriptions = self
            .subscriptions
            .lock()
            .map_err(|_| ConnectionError::Gatt("subscription table poisoned".to_string()))?;
        if let Some(previous) = subscriptions.insert(uuid, handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), ConnectionError> {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            if let Some(handle) = subscriptions.remove(&uuid) {
                handle.abort();
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            for (_, handle) in subscriptions.drain() {
                handle.abort();
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn replay(
    channel: Channel,
    payloads: Vec<Vec<u8>>,
    gap: Duration,
    sink: mpsc::Sender<RawNotification>,
) {
    for payload in payloads {
        if sink.send(RawNotification::new(channel, payload)).await.is_err() {
            return;
        }
        if !gap.is_zero() {
            tokio::time::sleep(gap).await;
        }
    }
}

async fn synthesize_heart_rate(period: Duration, sink: mpsc::Sender<RawNotification>) {
    let mut ticker = tokio::time::interval(period);
    let mut beat: u32 = 0;
    loop {
        ticker.tick().await;
        // Slow respiratory modulation around 800 ms with a gentle drift
        let phase = f64::from(beat) * 0.35;
        let rr = 800.0 + 45.0 * phase.sin() + 20.0 * (phase / 7.0).cos();
        let rr_ms = rr.round() as u16;
        let hr = (60_000.0 / rr).round() as u8;

        let notification = RawNotification::new(Channel::HeartRate, heart_rate_frame(hr, rr_ms));
        if sink.send(notification).await.is_err() {
            return;
        }
        beat = beat.wrapping_add(1);
    }
}

async fn synthesize_ecg(sink: mpsc::Sender<RawNotification>) {
    let frame_secs = SYNTHETIC_ECG_SAMPLES as f64 / SYNTHETIC_ECG_RATE_HZ;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(frame_secs));
    let mut sample_index: u64 = 0;
    let tick_ns = (1e9 / SYNTHETIC_ECG_RATE_HZ) as u64;

    loop {
        ticker.tick().await;
        let samples: Vec<i32> = (0..SYNTHETIC_ECG_SAMPLES as u64)
            .map(|i| synthetic_ecg_value(sample_index + i))
            .collect();
        let device_timestamp = 599_000_000_000 + sample_index * tick_ns;
        sample_index += SYNTHETIC_ECG_SAMPLES as u64;

        let notification = RawNotification::new(Channel::EcgStream, ecg_frame(device_timestamp, &samples));
        if sink.send(notification).await.is_err() {
            return;
        }
    }
}

/// Crude PQRST shape: narrow R spike once per ~0.8 s on a small baseline wave
fn synthetic_ecg_value(index: u64) -> i32 {
    let t = index as f64 / SYNTHETIC_ECG_RATE_HZ;
    let beat_phase = (t % 0.8) / 0.8;
    let r_wave = 1200.0 * (-((beat_phase - 0.3) / 0.015).powi(2)).exp();
    let t_wave = 250.0 * (-((beat_phase - 0.6) / 0.06).powi(2)).exp();
    let baseline = 40.0 * (2.0 * std::f64::consts::PI * 0.25 * t).sin();
    (r_wave + t_wave + baseline).round() as i32
}

/// Central that hands out a fresh synthetic sensor for any address
pub struct SimulatedCentral {
    heart_rate_period: Duration,
}

impl SimulatedCentral {
    pub fn new(heart_rate_period: Duration) -> Self {
        Self { heart_rate_period }
    }
}

#[async_trait]
impl GattCentral for SimulatedCentral {
    async fn connect(&self, address: &str) -> Result<Box<dyn GattClient>, ConnectionError> {
        if address.trim().is_empty() {
            return Err(ConnectionError::Unreachable("<empty address>".to_string()));
        }
        log::info!("Connecting to simulated sensor at {}", address);
        Ok(Box::new(SimulatedSensor::synthetic(self.heart_rate_period)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FrameDecoder;
    use crate::gatt::{read_device_status, start_ecg_stream};

    #[test]
    fn test_encoders_match_decoder() {
        let hr = FrameDecoder::decode_heart_rate(&heart_rate_frame(64, 937))
            .unwrap()
            .unwrap();
        assert_eq!((hr.hr, hr.rr), (64, 937));

        let ecg = FrameDecoder::decode_ecg(&ecg_frame(42, &[-3, 0, 1500]))
            .unwrap()
            .unwrap();
        assert_eq!(ecg.device_timestamp, 42);
        assert_eq!(ecg.samples, vec![-3, 0, 1500]);
    }

    #[tokio::test]
    async fn test_device_status() {
        let sensor = SimulatedSensor::scripted(vec![], vec![]).with_battery_level(55);
        let status = read_device_status(&sensor).await.unwrap();

        assert_eq!(status.model_number, "H10");
        assert_eq!(status.manufacturer_name, "Polar Electro Oy");
        assert_eq!(status.battery_level, 55);
    }

    #[tokio::test]
    async fn test_scripted_replay_then_close() {
        let sensor = SimulatedSensor::scripted(vec![heart_rate_frame(60, 1000), vec![0x00, 60]], vec![]);
        let (tx, mut rx) = mpsc::channel(8);

        sensor.subscribe(HEART_RATE_UUID, Channel::HeartRate, tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, heart_rate_frame(60, 1000));
        assert_eq!(rx.recv().await.unwrap().payload, vec![0x00, 60]);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_ecg_requires_start_request() {
        let sensor = SimulatedSensor::synthetic(Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(8);

        assert!(sensor.subscribe(PMD_DATA_UUID, Channel::EcgStream, tx.clone()).await.is_err());

        start_ecg_stream(&sensor).await.unwrap();
        assert_eq!(sensor.writes(), vec![(PMD_CONTROL_UUID, ECG_START_REQUEST.to_vec())]);

        sensor.subscribe(PMD_DATA_UUID, Channel::EcgStream, tx).await.unwrap();
        let frame = rx.recv().await.unwrap();
        let decoded = FrameDecoder::decode_ecg(&frame.payload).unwrap().unwrap();
        assert_eq!(decoded.samples.len(), SYNTHETIC_ECG_SAMPLES);

        sensor.unsubscribe(PMD_DATA_UUID).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_heart_rate_is_plausible() {
        let sensor = SimulatedSensor::synthetic(Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(8);
        sensor.subscribe(HEART_RATE_UUID, Channel::HeartRate, tx).await.unwrap();

        for _ in 0..5 {
            let frame = rx.recv().await.unwrap();
            let decoded = FrameDecoder::decode_heart_rate(&frame.payload).unwrap().unwrap();
            assert!((700..=900).contains(&decoded.rr));
            assert!((60..=90).contains(&decoded.hr));
        }

        sensor.disconnect().await.unwrap();
        assert!(!sensor.is_connected());
        assert!(read_device_status(&sensor).await.is_err());
    }
}
