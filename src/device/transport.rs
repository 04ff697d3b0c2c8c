//! DeviceTransport trait for a unified device link interface
//!
//! This module provides a common trait for every communication channel a
//! [`DeviceSession`](super::DeviceSession) can drive: BLE peripherals, serial
//! ports and the simulated devices used in tests.
//!
//! Transports are capability providers only. They do not track the session
//! state machine; the session calls them in a valid order and owns the
//! connection state.

use crate::error::Result;
use crate::types::{DeviceInfo, ServiceInfo};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Size of the rolling window for recent operation times
const RECENT_WINDOW_SIZE: usize = 100;

/// Called once per device report during a scan
pub type DeviceCallback = Box<dyn Fn(DeviceInfo) + Send + Sync>;

/// Called with every chunk of notification or stream data
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Called when the transport notices the link is gone
pub type LinkLostCallback = Box<dyn Fn() + Send + Sync>;

/// Statistics for transport operations
///
/// Tracks success rates, throughput and latency of reads and writes.
#[derive(Debug, Clone)]
pub struct TransportStats {
    /// Total number of successful reads
    pub successful_reads: u64,
    /// Total number of failed reads
    pub failed_reads: u64,
    /// Total number of successful writes
    pub successful_writes: u64,
    /// Total number of failed writes
    pub failed_writes: u64,
    /// Total bytes received (reads and notifications)
    pub bytes_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Number of notification chunks delivered
    pub notifications: u64,
    /// Minimum operation time observed (microseconds)
    pub min_op_time_us: u64,
    /// Maximum operation time observed (microseconds)
    pub max_op_time_us: u64,
    /// Rolling window of recent operation times
    pub recent_op_times: VecDeque<u64>,
}

impl Default for TransportStats {
    fn default() -> Self {
        Self {
            successful_reads: 0,
            failed_reads: 0,
            successful_writes: 0,
            failed_writes: 0,
            bytes_received: 0,
            bytes_sent: 0,
            notifications: 0,
            min_op_time_us: u64::MAX,
            max_op_time_us: 0,
            recent_op_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl TransportStats {
    fn record_time(&mut self, time_us: u64) {
        self.min_op_time_us = self.min_op_time_us.min(time_us);
        self.max_op_time_us = self.max_op_time_us.max(time_us);
        self.recent_op_times.push_back(time_us);
        if self.recent_op_times.len() > RECENT_WINDOW_SIZE {
            self.recent_op_times.pop_front();
        }
    }

    /// Record a successful read with its latency
    pub fn record_read(&mut self, time_us: u64, bytes: usize) {
        self.successful_reads += 1;
        self.bytes_received += bytes as u64;
        self.record_time(time_us);
    }

    /// Record a successful write with its latency
    pub fn record_write(&mut self, time_us: u64, bytes: usize) {
        self.successful_writes += 1;
        self.bytes_sent += bytes as u64;
        self.record_time(time_us);
    }

    pub fn record_read_failure(&mut self) {
        self.failed_reads += 1;
    }

    pub fn record_write_failure(&mut self) {
        self.failed_writes += 1;
    }

    /// Record a delivered notification chunk
    pub fn record_notification(&mut self, bytes: usize) {
        self.notifications += 1;
        self.bytes_received += bytes as u64;
    }

    /// Success rate of reads and writes as a percentage
    pub fn success_rate(&self) -> f64 {
        let ok = self.successful_reads + self.successful_writes;
        let total = ok + self.failed_reads + self.failed_writes;
        if total == 0 {
            100.0
        } else {
            (ok as f64 / total as f64) * 100.0
        }
    }

    /// Jitter (max - min) over the recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        let min = self.recent_op_times.iter().min().copied().unwrap_or(0);
        let max = self.recent_op_times.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Unified interface for device links
///
/// Methods take `&self` so a transport can be shared between the caller's
/// thread, the scan timer and notification threads. Implementations must
/// be `Send + Sync`.
///
/// `characteristic` is `Some` for BLE GATT operations and `None` for the
/// raw byte stream of a serial port.
pub trait DeviceTransport: Send + Sync {
    /// Short name for logs (e.g. "ble", "serial")
    fn kind(&self) -> &'static str;

    /// Start reporting nearby devices to `on_device`
    ///
    /// The same device may be reported more than once.
    fn start_scan(&self, on_device: DeviceCallback) -> Result<()>;

    /// Stop reporting devices
    fn stop_scan(&self) -> Result<()>;

    /// Open a link to `device` within `timeout`
    fn connect(&self, device: &DeviceInfo, timeout: Duration) -> Result<()>;

    /// Close the link; a no-op if there is none
    fn disconnect(&self) -> Result<()>;

    /// Check if the link is up
    fn is_connected(&self) -> bool;

    /// Services and characteristics of the connected device
    fn services(&self) -> Result<Vec<ServiceInfo>>;

    /// Read a characteristic value, or pending stream bytes
    fn read(&self, characteristic: Option<Uuid>, timeout: Duration) -> Result<Vec<u8>>;

    /// Write a characteristic value, or bytes to the stream
    fn write(&self, characteristic: Option<Uuid>, data: &[u8], with_response: bool) -> Result<()>;

    /// Deliver notifications (or incoming stream bytes) to `on_data`
    fn subscribe(&self, characteristic: Option<Uuid>, on_data: DataCallback) -> Result<()>;

    /// Stop delivering notifications
    fn unsubscribe(&self, characteristic: Option<Uuid>) -> Result<()>;

    /// Register a callback for unexpected link loss
    ///
    /// Default implementation ignores it; transports that can observe a
    /// dropped link override this.
    fn on_link_lost(&self, _callback: LinkLostCallback) {}

    /// Enumerate host serial ports
    fn available_ports(&self) -> Result<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }

    /// Snapshot of operation statistics
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

impl<T: DeviceTransport + ?Sized> DeviceTransport for Box<T> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn start_scan(&self, on_device: DeviceCallback) -> Result<()> {
        (**self).start_scan(on_device)
    }

    fn stop_scan(&self) -> Result<()> {
        (**self).stop_scan()
    }

    fn connect(&self, device: &DeviceInfo, timeout: Duration) -> Result<()> {
        (**self).connect(device, timeout)
    }

    fn disconnect(&self) -> Result<()> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn services(&self) -> Result<Vec<ServiceInfo>> {
        (**self).services()
    }

    fn read(&self, characteristic: Option<Uuid>, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read(characteristic, timeout)
    }

    fn write(&self, characteristic: Option<Uuid>, data: &[u8], with_response: bool) -> Result<()> {
        (**self).write(characteristic, data, with_response)
    }

    fn subscribe(&self, characteristic: Option<Uuid>, on_data: DataCallback) -> Result<()> {
        (**self).subscribe(characteristic, on_data)
    }

    fn unsubscribe(&self, characteristic: Option<Uuid>) -> Result<()> {
        (**self).unsubscribe(characteristic)
    }

    fn on_link_lost(&self, callback: LinkLostCallback) {
        (**self).on_link_lost(callback)
    }

    fn available_ports(&self) -> Result<Vec<DeviceInfo>> {
        (**self).available_ports()
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_rates_and_jitter() {
        let mut stats = TransportStats::default();
        assert_eq!(stats.success_rate(), 100.0);

        stats.record_read(100, 4);
        stats.record_write(300, 2);
        stats.record_read_failure();
        stats.record_notification(8);

        assert_eq!(stats.bytes_received, 12);
        assert_eq!(stats.bytes_sent, 2);
        assert_eq!(stats.jitter_us(), 200);
        assert!((stats.success_rate() - 66.666).abs() < 0.01);

        stats.reset();
        assert_eq!(stats.successful_reads, 0);
    }
}
