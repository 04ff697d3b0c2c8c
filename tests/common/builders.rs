//! Test data builders for creating test objects

use devtk_rs::config::PlotConfig;
use devtk_rs::device::{MockDevice, MockTransport};
use std::time::Duration;

/// Plot configuration that never opens a window and stops quickly
pub fn headless_config() -> PlotConfig {
    PlotConfig {
        stop_timeout_ms: 2_000,
        tick_interval_ms: 1,
        ..PlotConfig::headless()
    }
}

/// Builder for mock transports with fast timings
pub struct MockTransportBuilder {
    devices: Vec<MockDevice>,
    advertise_interval: Duration,
    stream_interval: Duration,
}

impl MockTransportBuilder {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            advertise_interval: Duration::from_millis(5),
            stream_interval: Duration::from_millis(5),
        }
    }

    pub fn ble(mut self, address: &str, name: &str) -> Self {
        self.devices.push(MockDevice::ble(address, name));
        self
    }

    pub fn unreachable_ble(mut self, address: &str, name: &str) -> Self {
        self.devices.push(MockDevice::ble(address, name).unreachable());
        self
    }

    pub fn device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn build(self) -> MockTransport {
        self.devices.into_iter().fold(
            MockTransport::new()
                .with_read_delay(0)
                .with_advertise_interval(self.advertise_interval)
                .with_stream_interval(self.stream_interval),
            |transport, device| transport.with_device(device),
        )
    }
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devtk_rs::device::DeviceTransport;

    #[test]
    fn test_mock_transport_builder() {
        let transport = MockTransportBuilder::new()
            .device(MockDevice::serial("/dev/ttyMOCK0", Default::default()))
            .build();
        assert_eq!(transport.available_ports().unwrap().len(), 1);
    }
}
