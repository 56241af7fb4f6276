//! Notification frame decoding
//!
//! This module parses raw BLE notification payloads:
//! - Heart Rate Measurement frames (Bluetooth SIG characteristic 0x2A37)
//! - Polar PMD ECG frames (measurement type 0x00 on the PMD data characteristic)
//!
//! Decoding is pure and never panics on short input; malformed frames produce a
//! [`DecodeError`] that the caller logs and drops.

use crate::error::DecodeError;
use serde::Serialize;

/// Flag bit 0: heart rate value is UINT16 instead of UINT8
pub const HR_FORMAT_UINT16: u8 = 0b0000_0001;
/// Flag bits 1-2: sensor contact status
pub const HR_SENSOR_CONTACT_MASK: u8 = 0b0000_0110;
/// Flag bit 3: energy expended field present
pub const HR_ENERGY_EXPENDED: u8 = 0b0000_1000;
/// Flag bit 4: one or more RR intervals present
pub const HR_RR_PRESENT: u8 = 0b0001_0000;

/// PMD measurement type tag for ECG frames
pub const PMD_ECG_TAG: u8 = 0x00;
/// Offset of the device timestamp in a PMD frame
pub const PMD_TIMESTAMP_OFFSET: usize = 1;
/// Offset of the first sample in a PMD frame (after the frame-type byte)
pub const PMD_SAMPLES_OFFSET: usize = 10;
/// Width of one packed ECG sample
pub const ECG_SAMPLE_BYTES: usize = 3;

/// Sensor contact status from flag bits 1-2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorContact {
    NotSupported,
    NotDetected,
    Detected,
}

/// Decoded Heart Rate Measurement frame that carried at least one RR interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartRateFrame {
    /// Heart rate (bpm)
    pub hr: u16,
    /// First RR interval in the frame (ms)
    pub rr: u16,
    /// Every RR interval in the frame, in order (ms)
    pub rr_intervals: Vec<u16>,
    pub sensor_contact: SensorContact,
    /// Energy expended (kJ), when the sensor reports it
    pub energy_expended: Option<u16>,
}

/// Decoded PMD ECG frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EcgFrame {
    /// Sensor clock for the frame (device ticks)
    pub device_timestamp: u64,
    /// Raw ECG samples (ADC units)
    pub samples: Vec<i32>,
}

/// Stateless decoder for sensor notification frames
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decode a Heart Rate Measurement payload.
    ///
    /// Returns `Ok(None)` when the RR-present flag is clear: such frames do not
    /// produce a sample.
    pub fn decode_heart_rate(payload: &[u8]) -> Result<Option<HeartRateFrame>, DecodeError> {
        const FRAME: &str = "heart rate";

        let flags = *payload.first().ok_or(DecodeError::Empty { frame: FRAME })?;
        if flags & HR_RR_PRESENT == 0 {
            return Ok(None);
        }

        let mut offset = 1;

        let hr = if flags & HR_FORMAT_UINT16 != 0 {
            let value = read_u16_le(payload, offset, FRAME)?;
            offset += 2;
            value
        } else {
            let value = *payload.get(offset).ok_or(DecodeError::Truncated {
                frame: FRAME,
                needed: offset + 1,
                actual: payload.len(),
            })?;
            offset += 1;
            u16::from(value)
        };

        let energy_expended = if flags & HR_ENERGY_EXPENDED != 0 {
            let value = read_u16_le(payload, offset, FRAME)?;
            offset += 2;
            Some(value)
        } else {
            None
        };

        // At least one RR interval must follow when the flag says so
        let rr = read_u16_le(payload, offset, FRAME)?;
        let rr_intervals: Vec<u16> = payload[offset..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Some(HeartRateFrame {
            hr,
            rr,
            rr_intervals,
            sensor_contact: sensor_contact(flags),
            energy_expended,
        }))
    }

    /// Decode a PMD data payload.
    ///
    /// Frames whose tag is not the ECG tag (acceleration, PPG, ...) are ignored and
    /// return `Ok(None)`. A trailing partial sample is dropped.
    pub fn decode_ecg(payload: &[u8]) -> Result<Option<EcgFrame>, DecodeError> {
        const FRAME: &str = "ECG";

        let tag = *payload.first().ok_or(DecodeError::Empty { frame: FRAME })?;
        if tag != PMD_ECG_TAG {
            return Ok(None);
        }

        if payload.len() < PMD_SAMPLES_OFFSET {
            return Err(DecodeError::Truncated {
                frame: FRAME,
                needed: PMD_SAMPLES_OFFSET,
                actual: payload.len(),
            });
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&payload[PMD_TIMESTAMP_OFFSET..PMD_TIMESTAMP_OFFSET + 8]);
        let device_timestamp = u64::from_le_bytes(timestamp);

        let samples = payload[PMD_SAMPLES_OFFSET..]
            .chunks_exact(ECG_SAMPLE_BYTES)
            .map(|chunk| i24_from_le_bytes([chunk[0], chunk[1], chunk[2]]))
            .collect();

        Ok(Some(EcgFrame {
            device_timestamp,
            samples,
        }))
    }
}

/// Sign-extend a little-endian 24-bit integer
pub fn i24_from_le_bytes(bytes: [u8; 3]) -> i32 {
    // Place the value in the top three bytes, then arithmetic-shift back down
    i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8
}

fn read_u16_le(payload: &[u8], offset: usize, frame: &'static str) -> Result<u16, DecodeError> {
    match payload.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(DecodeError::Truncated {
            frame,
            needed: offset + 2,
            actual: payload.len(),
        }),
    }
}

fn sensor_contact(flags: u8) -> SensorContact {
    match (flags & HR_SENSOR_CONTACT_MASK) >> 1 {
        0b11 => SensorContact::Detected,
        0b10 => SensorContact::NotDetected,
        _ => SensorContact::NotSupported,
    }
}
