//! Mock Transport Implementation for Testing
//!
//! This module provides a simulated transport that can be used to run the
//! toolkit without real hardware. It advertises a configurable set of
//! devices and streams generated samples as CSV lines.
//!
//! Devices are BLE peripherals with a sensor service, or serial ports.
//! Failures can be injected: unreachable devices, queued transport errors
//! and link loss.
//!
//! # Signals
//!
//! - [`MockDataPattern::Sine`] (default): `offset + amplitude * sin(2 pi f t)`
//! - [`MockDataPattern::Constant`]: a fixed value
//! - [`MockDataPattern::Counter`]: steps from `min` to `max`, then wraps
//!
//! # Stream format
//!
//! Every sample is emitted as `"<seconds>,<value>\n"`. Lines are split into
//! two chunks at a pseudo-random position so consumers exercise partial line
//! buffering, just like real notifications.
//!
//! # Example
//!
//! ```ignore
//! use devtk_rs::device::{DeviceSession, MockDevice, MockTransport, MockDataPattern};
//!
//! let transport = MockTransport::new()
//!     .with_device(MockDevice::ble("AA:BB:CC:DD:EE:01", "Thermo"))
//!     .with_pattern(MockDataPattern::Sine { frequency: 1.0, amplitude: 10.0, offset: 20.0 });
//! let session = DeviceSession::new(transport);
//! ```

use crate::device::transport::{
    DataCallback, DeviceCallback, DeviceTransport, LinkLostCallback, TransportStats,
};
use crate::error::{DevtkError, Result, TransportErrorKind};
use crate::types::{CharProperty, CharacteristicInfo, DeviceInfo, LineConfig, ServiceInfo};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Environmental Sensing service
pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_181a_0000_1000_8000_0080_5f9b_34fb);

/// Sample characteristic: read returns the latest line, notify streams lines
pub const SAMPLE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_2a6e_0000_1000_8000_0080_5f9b_34fb);

/// Control characteristic: write only
pub const CONTROL_CHAR_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);

const SCAN_THREAD_NAME: &str = "devtk-mock-scan";
const STREAM_THREAD_NAME: &str = "devtk-mock-stream";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Waveform of the generated samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockDataPattern {
    Constant(f64),
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Adds `step` per sample and wraps around within `[min, max]`
    Counter { step: f64, min: f64, max: f64 },
}

impl Default for MockDataPattern {
    fn default() -> Self {
        MockDataPattern::Sine {
            frequency: 1.0,
            amplitude: 100.0,
            offset: 0.0,
        }
    }
}

/// A pattern plus the counter it advances
#[derive(Debug, Clone)]
pub struct MockSignal {
    pub pattern: MockDataPattern,
    counter: f64,
}

impl MockSignal {
    pub fn new(pattern: MockDataPattern) -> Self {
        Self {
            pattern,
            counter: 0.0,
        }
    }

    /// Value of the next sample, `elapsed_secs` after the stream started
    pub fn generate_value(&mut self, elapsed_secs: f64) -> f64 {
        match self.pattern {
            MockDataPattern::Constant(value) => value,
            MockDataPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (std::f64::consts::TAU * frequency * elapsed_secs).sin(),
            MockDataPattern::Counter { step, min, max } => {
                self.counter += step;
                if self.counter > max {
                    self.counter = min;
                } else if self.counter < min {
                    self.counter = max;
                }
                self.counter
            }
        }
    }
}

/// Simple xorshift generator; the mock needs variation, not quality
fn rand_simple() -> f64 {
    use std::cell::Cell;
    thread_local! {
        static SEED: Cell<u64> = const { Cell::new(12345) };
    }
    SEED.with(|seed| {
        let mut s = seed.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        seed.set(s);
        (s as f64) / (u64::MAX as f64)
    })
}

/// Format one sample the way the stream emits it
pub fn format_sample(elapsed_secs: f64, value: f64) -> String {
    format!("{:.3},{:.4}\n", elapsed_secs, value)
}

/// A simulated device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub info: DeviceInfo,
    pub services: Vec<ServiceInfo>,
    /// Unreachable devices still advertise but refuse connections
    pub reachable: bool,
    /// Whether the device shows up in scans (serial ports never do)
    pub advertises: bool,
}

impl MockDevice {
    /// A BLE peripheral exposing the sensor service
    pub fn ble(address: impl Into<String>, name: impl Into<String>) -> Self {
        let info = DeviceInfo::ble(address, Some(name.into()), Some(-60))
            .with_services([SENSOR_SERVICE_UUID]);
        Self {
            info,
            services: vec![sensor_service()],
            reachable: true,
            advertises: true,
        }
    }

    /// A serial port with a raw byte stream
    pub fn serial(port: impl Into<String>, line: LineConfig) -> Self {
        Self {
            info: DeviceInfo::serial(port, line),
            services: Vec::new(),
            reachable: true,
            advertises: false,
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn with_service(mut self, service: ServiceInfo) -> Self {
        self.services.push(service);
        self
    }
}

/// The service every simulated BLE device exposes
pub fn sensor_service() -> ServiceInfo {
    ServiceInfo {
        uuid: SENSOR_SERVICE_UUID,
        characteristics: vec![
            CharacteristicInfo::new(SAMPLE_CHAR_UUID, [CharProperty::Read, CharProperty::Notify]),
            CharacteristicInfo::new(
                CONTROL_CHAR_UUID,
                [CharProperty::Write, CharProperty::WriteWithoutResponse],
            ),
        ],
    }
}

/// Link state shared with the helper threads
struct MockShared {
    devices: Mutex<Vec<MockDevice>>,
    connected: Mutex<Option<MockDevice>>,
    /// Whether the connected device currently answers
    reachable: AtomicBool,
    start_time: Mutex<Instant>,
    signal: Mutex<MockSignal>,
    scan: Mutex<Option<Arc<AtomicBool>>>,
    streams: Mutex<HashMap<Option<Uuid>, Arc<AtomicBool>>>,
    link_lost: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    failures: Mutex<VecDeque<TransportErrorKind>>,
    written: Mutex<Vec<(Option<Uuid>, Vec<u8>)>>,
    stats: Mutex<TransportStats>,
}

impl MockShared {
    fn next_line(&self) -> String {
        let elapsed = lock(&self.start_time).elapsed().as_secs_f64();
        let value = lock(&self.signal).generate_value(elapsed);
        format_sample(elapsed, value)
    }

    fn take_failure(&self) -> Option<TransportErrorKind> {
        lock(&self.failures).pop_front()
    }

    fn stop_streams(&self) {
        for (_, flag) in lock(&self.streams).drain() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

/// Transport backed by simulated devices
pub struct MockTransport {
    shared: Arc<MockShared>,
    advertise_interval: Duration,
    stream_interval: Duration,
    read_delay_us: u64,
    ports: Vec<DeviceInfo>,
}

impl MockTransport {
    /// An empty environment: scans find nothing
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MockShared {
                devices: Mutex::new(Vec::new()),
                connected: Mutex::new(None),
                reachable: AtomicBool::new(true),
                start_time: Mutex::new(Instant::now()),
                signal: Mutex::new(MockSignal::new(MockDataPattern::default())),
                scan: Mutex::new(None),
                streams: Mutex::new(HashMap::new()),
                link_lost: Mutex::new(None),
                failures: Mutex::new(VecDeque::new()),
                written: Mutex::new(Vec::new()),
                stats: Mutex::new(TransportStats::default()),
            }),
            advertise_interval: Duration::from_millis(50),
            stream_interval: Duration::from_millis(20),
            read_delay_us: 100,
            ports: Vec::new(),
        }
    }

    /// Add a simulated device
    pub fn with_device(mut self, device: MockDevice) -> Self {
        if device.info.is_serial() {
            self.ports.push(device.info.clone());
        }
        lock(&self.shared.devices).push(device);
        self
    }

    /// Set the pattern streamed by every device
    pub fn with_pattern(self, pattern: MockDataPattern) -> Self {
        *lock(&self.shared.signal) = MockSignal::new(pattern);
        self
    }

    pub fn with_signal(self, signal: MockSignal) -> Self {
        *lock(&self.shared.signal) = signal;
        self
    }

    /// How often each device re-advertises during a scan
    pub fn with_advertise_interval(mut self, interval: Duration) -> Self {
        self.advertise_interval = interval;
        self
    }

    /// Time between two streamed samples
    pub fn with_stream_interval(mut self, interval: Duration) -> Self {
        self.stream_interval = interval;
        self
    }

    /// Set the simulated read delay
    pub fn with_read_delay(mut self, delay_us: u64) -> Self {
        self.read_delay_us = delay_us;
        self
    }

    /// Make the connected device stop (or resume) answering
    ///
    /// Operations fail with a timeout while unreachable, but the link stays up.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next I/O operation with `kind`
    pub fn inject_failure(&self, kind: TransportErrorKind) {
        lock(&self.shared.failures).push_back(kind);
    }

    /// Drop the link as if the device went away
    pub fn simulate_link_loss(&self) {
        if lock(&self.shared.connected).take().is_none() {
            return;
        }
        self.shared.stop_streams();
        tracing::info!("Mock link dropped");
        let callback = lock(&self.shared.link_lost).clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Bytes written so far, with their target characteristic
    pub fn written(&self) -> Vec<(Option<Uuid>, Vec<u8>)> {
        lock(&self.shared.written).clone()
    }

    /// Whether a scan is currently reporting devices
    pub fn is_scanning(&self) -> bool {
        lock(&self.shared.scan).is_some()
    }

    /// Number of active notification streams
    pub fn active_streams(&self) -> usize {
        lock(&self.shared.streams).len()
    }

    fn check_io(&self) -> Result<()> {
        if lock(&self.shared.connected).is_none() {
            return Err(DevtkError::transport(
                TransportErrorKind::LinkLost,
                "Mock device not connected",
            ));
        }
        if let Some(kind) = self.shared.take_failure() {
            return Err(DevtkError::transport(kind, "Injected failure"));
        }
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(DevtkError::transport(
                TransportErrorKind::Timeout,
                "Mock device does not answer",
            ));
        }
        Ok(())
    }

    fn check_characteristic(&self, characteristic: Option<Uuid>) -> Result<()> {
        let Some(uuid) = characteristic else {
            return Ok(());
        };
        let connected = lock(&self.shared.connected);
        let known = connected
            .as_ref()
            .is_some_and(|d| crate::types::find_characteristic(&d.services, &uuid).is_some());
        if known {
            Ok(())
        } else {
            Err(DevtkError::transport(
                TransportErrorKind::Nack,
                format!("Unknown characteristic {}", uuid),
            ))
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTransport for MockTransport {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn start_scan(&self, on_device: DeviceCallback) -> Result<()> {
        let active = Arc::new(AtomicBool::new(true));
        if let Some(previous) = lock(&self.shared.scan).replace(Arc::clone(&active)) {
            previous.store(false, Ordering::SeqCst);
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.advertise_interval;
        std::thread::Builder::new()
            .name(SCAN_THREAD_NAME.to_string())
            .spawn(move || {
                while active.load(Ordering::SeqCst) {
                    let advertising: Vec<DeviceInfo> = lock(&shared.devices)
                        .iter()
                        .filter(|d| d.advertises)
                        .map(|d| d.info.clone())
                        .collect();
                    for mut info in advertising {
                        if !active.load(Ordering::SeqCst) {
                            break;
                        }
                        info.rssi = info.rssi.map(|r| r - (rand_simple() * 6.0) as i16);
                        info.discovered_at = chrono::Utc::now();
                        on_device(info);
                    }
                    std::thread::sleep(interval);
                }
            })?;
        Ok(())
    }

    fn stop_scan(&self) -> Result<()> {
        if let Some(active) = lock(&self.shared.scan).take() {
            active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn connect(&self, device: &DeviceInfo, _timeout: Duration) -> Result<()> {
        let found = lock(&self.shared.devices)
            .iter()
            .find(|d| d.info.address == device.address)
            .cloned();
        let Some(found) = found else {
            return Err(DevtkError::transport(
                TransportErrorKind::DeviceAbsent,
                format!("No mock device at {}", device.address),
            ));
        };
        if !found.reachable {
            return Err(DevtkError::transport(
                TransportErrorKind::Timeout,
                format!("{} did not answer the handshake", device.address),
            ));
        }

        *lock(&self.shared.connected) = Some(found);
        *lock(&self.shared.start_time) = Instant::now();
        self.shared.reachable.store(true, Ordering::SeqCst);
        tracing::info!("Mock device connected: {}", device);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.shared.stop_streams();
        if lock(&self.shared.connected).take().is_some() {
            tracing::info!("Mock device disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.shared.connected).is_some()
    }

    fn services(&self) -> Result<Vec<ServiceInfo>> {
        Ok(lock(&self.shared.connected)
            .as_ref()
            .map(|d| d.services.clone())
            .unwrap_or_default())
    }

    fn read(&self, characteristic: Option<Uuid>, _timeout: Duration) -> Result<Vec<u8>> {
        let start = Instant::now();
        let result = self
            .check_io()
            .and_then(|_| self.check_characteristic(characteristic))
            .map(|_| {
                if self.read_delay_us > 0 {
                    std::thread::sleep(Duration::from_micros(self.read_delay_us));
                }
                self.shared.next_line().into_bytes()
            });
        // Ensure minimum 1us so rates stay finite
        let elapsed = start.elapsed().as_micros().max(1) as u64;

        let mut stats = lock(&self.shared.stats);
        match &result {
            Ok(bytes) => stats.record_read(elapsed, bytes.len()),
            Err(_) => stats.record_read_failure(),
        }
        result
    }

    fn write(&self, characteristic: Option<Uuid>, data: &[u8], _with_response: bool) -> Result<()> {
        let start = Instant::now();
        let result = self
            .check_io()
            .and_then(|_| self.check_characteristic(characteristic));
        let elapsed = start.elapsed().as_micros().max(1) as u64;

        let mut stats = lock(&self.shared.stats);
        match &result {
            Ok(()) => {
                stats.record_write(elapsed, data.len());
                lock(&self.shared.written).push((characteristic, data.to_vec()));
            }
            Err(_) => stats.record_write_failure(),
        }
        result
    }

    fn subscribe(&self, characteristic: Option<Uuid>, on_data: DataCallback) -> Result<()> {
        self.check_io()?;
        self.check_characteristic(characteristic)?;

        let active = Arc::new(AtomicBool::new(true));
        if let Some(previous) = lock(&self.shared.streams).insert(characteristic, Arc::clone(&active)) {
            previous.store(false, Ordering::SeqCst);
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.stream_interval;
        std::thread::Builder::new()
            .name(STREAM_THREAD_NAME.to_string())
            .spawn(move || {
                while active.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    if !active.load(Ordering::SeqCst) {
                        break;
                    }
                    if !shared.reachable.load(Ordering::SeqCst) {
                        continue;
                    }
                    let line = shared.next_line().into_bytes();
                    let split = 1 + (rand_simple() * (line.len() - 1) as f64) as usize;
                    let (head, tail) = line.split_at(split.min(line.len()));
                    for chunk in [head, tail] {
                        if chunk.is_empty() || !active.load(Ordering::SeqCst) {
                            continue;
                        }
                        on_data(chunk);
                        lock(&shared.stats).record_notification(chunk.len());
                    }
                }
            })?;
        Ok(())
    }

    fn unsubscribe(&self, characteristic: Option<Uuid>) -> Result<()> {
        if let Some(active) = lock(&self.shared.streams).remove(&characteristic) {
            active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn on_link_lost(&self, callback: LinkLostCallback) {
        *lock(&self.shared.link_lost) = Some(Arc::from(callback));
    }

    fn available_ports(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.ports.clone())
    }

    fn stats(&self) -> TransportStats {
        lock(&self.shared.stats).clone()
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if let Some(active) = lock(&self.shared.scan).take() {
            active.store(false, Ordering::SeqCst);
        }
        self.shared.stop_streams();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_signal_patterns() {
        let mut constant = MockSignal::new(MockDataPattern::Constant(42.0));
        assert_eq!(constant.generate_value(0.0), 42.0);
        assert_eq!(constant.generate_value(1.0), 42.0);

        let mut counter = MockSignal::new(MockDataPattern::Counter {
            step: 1.0,
            min: 0.0,
            max: 2.0,
        });
        assert_eq!(counter.generate_value(0.0), 1.0);
        assert_eq!(counter.generate_value(0.0), 2.0);
        assert_eq!(counter.generate_value(0.0), 0.0);

        let mut sine = MockSignal::new(MockDataPattern::Sine {
            frequency: 1.0,
            amplitude: 2.0,
            offset: 5.0,
        });
        assert!((sine.generate_value(0.0) - 5.0).abs() < 1e-9);
        assert!((sine.generate_value(0.25) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_sample() {
        assert_eq!(format_sample(1.5, 2.25), "1.500,2.2500\n");
    }

    #[test]
    fn test_connect_unknown_and_unreachable() {
        let transport = MockTransport::new()
            .with_device(MockDevice::ble("AA", "Near"))
            .with_device(MockDevice::ble("BB", "Far").unreachable());

        let err = transport
            .connect(&DeviceInfo::ble("CC", None, None), Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::DeviceAbsent));

        let err = transport
            .connect(&DeviceInfo::ble("BB", None, None), Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));

        transport
            .connect(&DeviceInfo::ble("AA", None, None), Duration::from_millis(10))
            .unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.services().unwrap(), vec![sensor_service()]);
    }

    #[test]
    fn test_read_failure_injection() {
        let transport = MockTransport::new()
            .with_read_delay(0)
            .with_device(MockDevice::ble("AA", "Near"));
        transport
            .connect(&DeviceInfo::ble("AA", None, None), Duration::from_millis(10))
            .unwrap();

        assert!(transport.read(Some(SAMPLE_CHAR_UUID), Duration::ZERO).is_ok());

        transport.inject_failure(TransportErrorKind::Nack);
        let err = transport.read(Some(SAMPLE_CHAR_UUID), Duration::ZERO).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Nack));

        transport.set_reachable(false);
        let err = transport.read(Some(SAMPLE_CHAR_UUID), Duration::ZERO).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));

        let stats = transport.stats();
        assert_eq!(stats.successful_reads, 1);
        assert_eq!(stats.failed_reads, 2);
    }

    #[test]
    fn test_serial_ports_are_listed_not_advertised() {
        let transport =
            MockTransport::new().with_device(MockDevice::serial("/dev/ttyMOCK0", LineConfig::default()));
        let ports = transport.available_ports().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].address, "/dev/ttyMOCK0");
    }
}
