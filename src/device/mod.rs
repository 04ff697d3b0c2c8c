//! Device communication
//!
//! # Module Organization
//!
//! - [`transport`] - The capability trait every link implements
//! - [`session`] - Connection state machine over one transport
//! - [`mock`] - Simulated devices for tests and demos
//! - `serial` - Serial ports via `serialport` (feature `serial`)
//! - `ble` - BLE peripherals via `btleplug` (feature `ble`)

#[cfg(feature = "ble")]
pub mod ble;
pub mod mock;
#[cfg(feature = "serial")]
pub mod serial;
pub mod session;
pub mod transport;

#[cfg(feature = "ble")]
pub use ble::BleTransport;
pub use mock::{MockDataPattern, MockDevice, MockSignal, MockTransport};
#[cfg(feature = "serial")]
pub use serial::SerialTransport;
pub use session::{DeviceSession, StateCallback};
pub use transport::{DataCallback, DeviceCallback, DeviceTransport, LinkLostCallback, TransportStats};
