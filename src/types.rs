//! Core device data types for devtk-rs
//!
//! This module contains the data structures shared by every transport:
//! discovered devices, their services and characteristics, serial line
//! settings and the connection state of a session.
//!
//! # Main Types
//!
//! - [`ConnectionState`] - Lifecycle state of a device session
//! - [`DeviceInfo`] - A discovered or enumerated device
//! - [`Endpoint`] - How to reach a device (BLE address or serial port)
//! - [`LineConfig`] - Serial line parameters (baud rate, parity, ...)
//! - [`ServiceInfo`] / [`CharacteristicInfo`] - GATT layout of a BLE device

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Lifecycle state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    /// No link and no scan in progress
    #[default]
    Disconnected = 0,
    /// Discovering nearby devices
    Scanning = 1,
    /// Handshake in progress
    Connecting = 2,
    /// Link established, channel operations allowed
    Connected = 3,
    /// Tearing the link down
    Disconnecting = 4,
}

impl ConnectionState {
    /// Decode the value stored in an atomic state cell
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Scanning,
            2 => ConnectionState::Connecting,
            3 => ConnectionState::Connected,
            4 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Scanning => write!(f, "Scanning"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting..."),
        }
    }
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Serial flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial line parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Baud rate in bits per second
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits per character (5-8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub flow_control: FlowControl,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_data_bits() -> u8 {
    8
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl LineConfig {
    /// Line settings with the given baud rate and 8N1 framing
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }
}

/// How to reach a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    /// Bluetooth Low Energy peripheral
    Ble,
    /// Serial port with its line settings
    Serial(LineConfig),
}

/// A device found during a scan or enumerated from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Identity: BLE address or serial port name
    pub address: String,
    /// Advertised or descriptive name
    pub name: Option<String>,
    /// Received signal strength (BLE only)
    pub rssi: Option<i16>,
    /// Advertised service UUIDs (BLE only)
    #[serde(default)]
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer specific advertisement data (BLE only)
    #[serde(default)]
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// How to reach the device
    pub endpoint: Endpoint,
    /// When the device was last seen
    pub discovered_at: DateTime<Utc>,
}

impl DeviceInfo {
    /// Describe a BLE peripheral
    pub fn ble(address: impl Into<String>, name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            address: address.into(),
            name,
            rssi,
            service_uuids: Vec::new(),
            manufacturer_data: HashMap::new(),
            endpoint: Endpoint::Ble,
            discovered_at: Utc::now(),
        }
    }

    /// Describe a serial port
    pub fn serial(port: impl Into<String>, line: LineConfig) -> Self {
        let port = port.into();
        Self {
            name: Some(port.clone()),
            address: port,
            rssi: None,
            service_uuids: Vec::new(),
            manufacturer_data: HashMap::new(),
            endpoint: Endpoint::Serial(line),
            discovered_at: Utc::now(),
        }
    }

    /// Add advertised service UUIDs
    pub fn with_services(mut self, uuids: impl IntoIterator<Item = Uuid>) -> Self {
        self.service_uuids.extend(uuids);
        self
    }

    /// Name for display, falling back to the address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// Whether this device is reached over a serial line
    pub fn is_serial(&self) -> bool {
        matches!(self.endpoint, Endpoint::Serial(_))
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, self.rssi) {
            (Some(name), Some(rssi)) => write!(f, "{} [{}] ({} dBm)", name, self.address, rssi),
            (Some(name), None) if name != &self.address => write!(f, "{} [{}]", name, self.address),
            _ => write!(f, "{}", self.address),
        }
    }
}

/// Operation supported by a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharProperty {
    Read,
    Write,
    WriteWithoutResponse,
    Notify,
    Indicate,
}

/// A readable/writable/notifiable endpoint of a connected BLE device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: Vec<CharProperty>,
}

impl CharacteristicInfo {
    pub fn new(uuid: Uuid, properties: impl IntoIterator<Item = CharProperty>) -> Self {
        Self {
            uuid,
            properties: properties.into_iter().collect(),
        }
    }

    /// Whether the characteristic supports `property`
    pub fn supports(&self, property: CharProperty) -> bool {
        self.properties.contains(&property)
    }

    /// Whether notifications or indications can be subscribed to
    pub fn can_notify(&self) -> bool {
        self.supports(CharProperty::Notify) || self.supports(CharProperty::Indicate)
    }
}

/// A GATT service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Find a characteristic of this service
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicInfo> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

/// Find a characteristic across a list of services
pub fn find_characteristic<'a>(
    services: &'a [ServiceInfo],
    uuid: &Uuid,
) -> Option<&'a CharacteristicInfo> {
    services.iter().find_map(|s| s.characteristic(uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_roundtrip_through_u8() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Scanning,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Disconnected);
    }

    #[test]
    fn test_line_config_defaults() {
        let line = LineConfig::default();
        assert_eq!(line.baud_rate, 9600);
        assert_eq!(line.data_bits, 8);
        assert_eq!(line.parity, Parity::None);

        let parsed: LineConfig = serde_json::from_str(r#"{"baud_rate": 115200}"#).unwrap();
        assert_eq!(parsed, LineConfig::with_baud_rate(115_200));
    }

    #[test]
    fn test_device_display() {
        let dev = DeviceInfo::ble("AA:BB", Some("sensor".into()), Some(-60));
        assert_eq!(dev.to_string(), "sensor [AA:BB] (-60 dBm)");
        assert_eq!(dev.display_name(), "sensor");

        let port = DeviceInfo::serial("/dev/ttyUSB0", LineConfig::default());
        assert!(port.is_serial());
        assert_eq!(port.to_string(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_find_characteristic() {
        let uuid = Uuid::from_u128(0x1234);
        let services = vec![ServiceInfo {
            uuid: Uuid::from_u128(1),
            characteristics: vec![CharacteristicInfo::new(uuid, [CharProperty::Notify])],
        }];
        let found = find_characteristic(&services, &uuid).unwrap();
        assert!(found.can_notify());
        assert!(!found.supports(CharProperty::Read));
        assert!(find_characteristic(&services, &Uuid::from_u128(9)).is_none());
    }
}
