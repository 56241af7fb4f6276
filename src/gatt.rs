//! GATT collaborator interface
//!
//! The BLE stack itself lives outside this crate. These traits describe what the
//! collector needs from it: characteristic reads and writes, and notification
//! subscriptions delivered into a bounded channel.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ConnectionError;
use crate::types::{Channel, RawNotification};

/// Model Number String (0x2A24)
pub const MODEL_NUMBER_UUID: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
/// Manufacturer Name String (0x2A29)
pub const MANUFACTURER_NAME_UUID: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);
/// Battery Level (0x2A19)
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
/// Heart Rate Measurement (0x2A37)
pub const HEART_RATE_UUID: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
/// PMD control point (stream settings and start requests)
pub const PMD_CONTROL_UUID: Uuid = Uuid::from_u128(0xfb005c81_02e7_f387_1cad_8acd2d8df0c8);
/// PMD data characteristic (ECG, acceleration, ... frames)
pub const PMD_DATA_UUID: Uuid = Uuid::from_u128(0xfb005c82_02e7_f387_1cad_8acd2d8df0c8);

/// PMD request: start ECG measurement, 130 Hz sample rate, 14-bit resolution
pub const ECG_START_REQUEST: [u8; 10] = [0x02, 0x00, 0x00, 0x01, 0x82, 0x00, 0x01, 0x01, 0x0E, 0x00];

/// Characteristic that carries a notification channel
pub fn channel_uuid(channel: Channel) -> Uuid {
    match channel {
        Channel::HeartRate => HEART_RATE_UUID,
        Channel::EcgStream => PMD_DATA_UUID,
    }
}

/// An established GATT connection
#[async_trait]
pub trait GattClient: Send + Sync {
    /// Read a characteristic value
    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, ConnectionError>;

    /// Write a characteristic value (with response)
    async fn write_characteristic(&self, uuid: Uuid, data: &[u8]) -> Result<(), ConnectionError>;

    /// Start notifications on `uuid`, tagging each payload with `channel` and pushing
    /// it into `sink` in arrival order.
    async fn subscribe(
        &self,
        uuid: Uuid,
        channel: Channel,
        sink: mpsc::Sender<RawNotification>,
    ) -> Result<(), ConnectionError>;

    /// Stop notifications on `uuid`
    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), ConnectionError>;

    /// Close the connection
    async fn disconnect(&self) -> Result<(), ConnectionError>;

    fn is_connected(&self) -> bool;
}

/// BLE central role: turns an address into a connection
#[async_trait]
pub trait GattCentral: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn GattClient>, ConnectionError>;
}

/// Device information read once after connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub model_number: String,
    pub manufacturer_name: String,
    /// Battery level (percent)
    pub battery_level: u8,
}

/// Read model, manufacturer and battery level from the standard characteristics
pub async fn read_device_status(client: &dyn GattClient) -> Result<DeviceStatus, ConnectionError> {
    if !client.is_connected() {
        return Err(ConnectionError::Disconnected);
    }

    let model = client.read_characteristic(MODEL_NUMBER_UUID).await?;
    let manufacturer = client.read_characteristic(MANUFACTURER_NAME_UUID).await?;
    let battery = client.read_characteristic(BATTERY_LEVEL_UUID).await?;

    let status = DeviceStatus {
        model_number: decode_text(&model),
        manufacturer_name: decode_text(&manufacturer),
        battery_level: battery
            .first()
            .copied()
            .ok_or_else(|| ConnectionError::Gatt("empty battery level".to_string()))?,
    };

    log::info!(
        "Connected to {} {} (battery {}%)",
        status.manufacturer_name,
        status.model_number,
        status.battery_level
    );

    Ok(status)
}

/// Request the PMD ECG stream. Notifications still need a subscription on
/// [`PMD_DATA_UUID`].
pub async fn start_ecg_stream(client: &dyn GattClient) -> Result<(), ConnectionError> {
    let features = client.read_characteristic(PMD_CONTROL_UUID).await?;
    log::debug!("PMD control point features: {:02x?}", features);
    client
        .write_characteristic(PMD_CONTROL_UUID, &ECG_START_REQUEST)
        .await
}

/// GATT strings are UTF-8, often NUL padded
fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_strings() {
        assert_eq!(
            HEART_RATE_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            PMD_DATA_UUID.to_string(),
            "fb005c82-02e7-f387-1cad-8acd2d8df0c8"
        );
        assert_eq!(channel_uuid(Channel::EcgStream), PMD_DATA_UUID);
    }

    #[test]
    fn test_decode_text_strips_padding() {
        assert_eq!(decode_text(b"H10\0\0"), "H10");
        assert_eq!(decode_text(b"Polar Electro Oy"), "Polar Electro Oy");
    }
}
