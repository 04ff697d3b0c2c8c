//! Serial port transport
//!
//! Wraps a `serialport` handle. A serial link has no characteristics: every
//! channel operation targets the raw byte stream (`characteristic == None`).
//! Streaming clones the port handle and reads it on a dedicated thread.

use crate::device::transport::{
    DataCallback, DeviceCallback, DeviceTransport, LinkLostCallback, TransportStats,
};
use crate::error::{DevtkError, Result, TransportErrorKind};
use crate::types::{DeviceInfo, Endpoint, FlowControl, LineConfig, Parity, ServiceInfo, StopBits};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

const READER_THREAD_NAME: &str = "devtk-serial-rx";

/// Poll timeout of the streaming reader
const STREAM_POLL_TIMEOUT: Duration = Duration::from_millis(50);

const READ_BUFFER_SIZE: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl From<Parity> for serialport::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(value: FlowControl) -> Self {
        match value {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

fn data_bits(bits: u8) -> Result<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(DevtkError::Configuration(format!(
            "Unsupported data bits: {} (expected 5-8)",
            other
        ))),
    }
}

fn map_serial_error(port: &str, error: serialport::Error) -> DevtkError {
    let kind = match error.kind() {
        serialport::ErrorKind::NoDevice => TransportErrorKind::DeviceAbsent,
        serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut) => TransportErrorKind::Timeout,
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => TransportErrorKind::PortBusy,
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => TransportErrorKind::DeviceAbsent,
        serialport::ErrorKind::Io(_) => TransportErrorKind::Io,
        serialport::ErrorKind::InvalidInput | serialport::ErrorKind::Unknown => {
            TransportErrorKind::Backend
        }
    };
    DevtkError::transport(kind, format!("{}: {}", port, error))
}

fn map_io_error(error: std::io::Error) -> DevtkError {
    use std::io::ErrorKind as Io;
    let kind = match error.kind() {
        Io::TimedOut | Io::WouldBlock => TransportErrorKind::Timeout,
        Io::BrokenPipe | Io::NotConnected | Io::UnexpectedEof | Io::ConnectionAborted => {
            TransportErrorKind::LinkLost
        }
        _ => TransportErrorKind::Io,
    };
    DevtkError::transport(kind, error.to_string())
}

/// Describe a host port for listings
fn describe_port(info: serialport::SerialPortInfo) -> DeviceInfo {
    let mut device = DeviceInfo::serial(info.port_name.clone(), LineConfig::default());
    let description = match info.port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            let parts: Vec<String> = [usb.manufacturer, usb.product].into_iter().flatten().collect();
            if parts.is_empty() {
                format!("{}: USB Serial", info.port_name)
            } else {
                format!("{}: {}", info.port_name, parts.join(" "))
            }
        }
        serialport::SerialPortType::BluetoothPort => format!("{}: Bluetooth", info.port_name),
        serialport::SerialPortType::PciPort => format!("{}: PCI", info.port_name),
        serialport::SerialPortType::Unknown => info.port_name.clone(),
    };
    device.name = Some(description);
    device
}

struct Reader {
    active: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Transport for a wired serial link
pub struct SerialTransport {
    port: Mutex<Option<(String, Box<dyn SerialPort>)>>,
    reader: Mutex<Option<Reader>>,
    link_lost: Arc<Mutex<Option<Arc<dyn Fn() + Send + Sync>>>>,
    stats: Arc<Mutex<TransportStats>>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self {
            port: Mutex::new(None),
            reader: Mutex::new(None),
            link_lost: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(TransportStats::default())),
        }
    }

    fn no_characteristics(characteristic: Option<Uuid>) -> Result<()> {
        match characteristic {
            None => Ok(()),
            Some(uuid) => Err(DevtkError::Configuration(format!(
                "Serial links have no characteristics (got {})",
                uuid
            ))),
        }
    }

    fn stop_reader(&self) {
        let Some(reader) = lock(&self.reader).take() else {
            return;
        };
        reader.active.store(false, Ordering::SeqCst);
        // Link-loss teardown runs on the reader itself; it is already exiting
        if reader.thread.thread().id() == std::thread::current().id() {
            return;
        }
        // The reader wakes up within one poll timeout
        if reader.thread.join().is_err() {
            tracing::warn!("[serial] Reader thread panicked");
        }
    }

    fn is_streaming(&self) -> bool {
        lock(&self.reader).is_some()
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTransport for SerialTransport {
    fn kind(&self) -> &'static str {
        "serial"
    }

    /// Serial "scanning" reports the host's ports once
    fn start_scan(&self, on_device: DeviceCallback) -> Result<()> {
        for device in self.available_ports()? {
            on_device(device);
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<()> {
        Ok(())
    }

    fn connect(&self, device: &DeviceInfo, timeout: Duration) -> Result<()> {
        let Endpoint::Serial(line) = device.endpoint else {
            return Err(DevtkError::Configuration(format!(
                "{} is not a serial device",
                device.address
            )));
        };

        let port = serialport::new(&device.address, line.baud_rate)
            .timeout(timeout)
            .data_bits(data_bits(line.data_bits)?)
            .parity(line.parity.into())
            .stop_bits(line.stop_bits.into())
            .flow_control(line.flow_control.into())
            .open()
            .map_err(|e| map_serial_error(&device.address, e))?;

        tracing::info!(
            "[serial] Opened {} at {} baud",
            device.address,
            line.baud_rate
        );
        *lock(&self.port) = Some((device.address.clone(), port));
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.stop_reader();
        if let Some((name, _port)) = lock(&self.port).take() {
            tracing::info!("[serial] Closed {}", name);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.port).is_some()
    }

    fn services(&self) -> Result<Vec<ServiceInfo>> {
        Ok(Vec::new())
    }

    fn read(&self, characteristic: Option<Uuid>, timeout: Duration) -> Result<Vec<u8>> {
        Self::no_characteristics(characteristic)?;
        if self.is_streaming() {
            return Err(DevtkError::Configuration(
                "Raw reads are unavailable while streaming".to_string(),
            ));
        }

        let mut guard = lock(&self.port);
        let Some((_, port)) = guard.as_mut() else {
            return Err(DevtkError::transport(TransportErrorKind::LinkLost, "Port is closed"));
        };

        let start = Instant::now();
        port.set_timeout(timeout)
            .map_err(|e| DevtkError::transport(TransportErrorKind::Backend, e.to_string()))?;
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let result = match port.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            // No pending bytes
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(map_io_error(e)),
        };

        let elapsed = start.elapsed().as_micros().max(1) as u64;
        let mut stats = lock(&self.stats);
        match &result {
            Ok(bytes) => stats.record_read(elapsed, bytes.len()),
            Err(_) => stats.record_read_failure(),
        }
        result
    }

    fn write(&self, characteristic: Option<Uuid>, data: &[u8], _with_response: bool) -> Result<()> {
        Self::no_characteristics(characteristic)?;
        let mut guard = lock(&self.port);
        let Some((_, port)) = guard.as_mut() else {
            return Err(DevtkError::transport(TransportErrorKind::LinkLost, "Port is closed"));
        };

        let start = Instant::now();
        let result = port
            .write_all(data)
            .and_then(|_| port.flush())
            .map_err(map_io_error);

        let elapsed = start.elapsed().as_micros().max(1) as u64;
        let mut stats = lock(&self.stats);
        match &result {
            Ok(()) => stats.record_write(elapsed, data.len()),
            Err(_) => stats.record_write_failure(),
        }
        result
    }

    fn subscribe(&self, characteristic: Option<Uuid>, on_data: DataCallback) -> Result<()> {
        Self::no_characteristics(characteristic)?;
        self.stop_reader();

        let mut port = {
            let guard = lock(&self.port);
            let Some((_, port)) = guard.as_ref() else {
                return Err(DevtkError::transport(TransportErrorKind::LinkLost, "Port is closed"));
            };
            port.try_clone()
                .map_err(|e| DevtkError::transport(TransportErrorKind::Backend, e.to_string()))?
        };
        port.set_timeout(STREAM_POLL_TIMEOUT)
            .map_err(|e| DevtkError::transport(TransportErrorKind::Backend, e.to_string()))?;

        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let link_lost = Arc::clone(&self.link_lost);
        let stats = Arc::clone(&self.stats);

        let thread = std::thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut buffer = [0u8; READ_BUFFER_SIZE];
                while flag.load(Ordering::SeqCst) {
                    match port.read(&mut buffer) {
                        Ok(0) => continue,
                        Ok(n) => {
                            lock(&stats).record_notification(n);
                            on_data(&buffer[..n]);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            tracing::error!("[serial] Read failed: {}", e);
                            flag.store(false, Ordering::SeqCst);
                            let callback = lock(&link_lost).clone();
                            if let Some(callback) = callback {
                                callback();
                            }
                            break;
                        }
                    }
                }
                tracing::debug!("[serial] Reader exited");
            })?;

        *lock(&self.reader) = Some(Reader { active, thread });
        Ok(())
    }

    fn unsubscribe(&self, characteristic: Option<Uuid>) -> Result<()> {
        Self::no_characteristics(characteristic)?;
        self.stop_reader();
        Ok(())
    }

    fn on_link_lost(&self, callback: LinkLostCallback) {
        *lock(&self.link_lost) = Some(Arc::from(callback));
    }

    fn available_ports(&self) -> Result<Vec<DeviceInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| DevtkError::transport(TransportErrorKind::Backend, e.to_string()))?;
        let mut devices: Vec<DeviceInfo> = ports.into_iter().map(describe_port).collect();
        devices.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(devices)
    }

    fn stats(&self) -> TransportStats {
        lock(&self.stats).clone()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_bits_mapping() {
        assert_eq!(data_bits(8).unwrap(), serialport::DataBits::Eight);
        assert_eq!(data_bits(5).unwrap(), serialport::DataBits::Five);
        assert!(data_bits(9).is_err());
    }

    #[test]
    fn test_line_settings_convert() {
        assert_eq!(serialport::Parity::from(Parity::Even), serialport::Parity::Even);
        assert_eq!(serialport::StopBits::from(StopBits::Two), serialport::StopBits::Two);
        assert_eq!(
            serialport::FlowControl::from(FlowControl::Hardware),
            serialport::FlowControl::Hardware
        );
    }

    #[test]
    fn test_rejects_characteristics_and_ble_devices() {
        let transport = SerialTransport::new();
        assert!(transport
            .read(Some(Uuid::nil()), Duration::from_millis(1))
            .is_err());

        let ble = DeviceInfo::ble("AA:BB", None, None);
        let err = transport.connect(&ble, Duration::from_millis(1)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_io_error_mapping() {
        let err = map_io_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::LinkLost));
        let err = map_io_error(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
    }
}
