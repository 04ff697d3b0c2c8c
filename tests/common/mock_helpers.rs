//! Mock construction helpers

use devtk_rs::device::{DataCallback, DeviceCallback, DeviceTransport, LinkLostCallback};
use devtk_rs::types::{CharProperty, CharacteristicInfo, DeviceInfo, ServiceInfo};
use devtk_rs::Result;
use mockall::mock;
use std::time::Duration;
use uuid::Uuid;

mock! {
    /// Scripted transport for exact call expectations
    pub Transport {}

    impl DeviceTransport for Transport {
        fn kind(&self) -> &'static str;
        fn start_scan(&self, on_device: DeviceCallback) -> Result<()>;
        fn stop_scan(&self) -> Result<()>;
        fn connect(&self, device: &DeviceInfo, timeout: Duration) -> Result<()>;
        fn disconnect(&self) -> Result<()>;
        fn is_connected(&self) -> bool;
        fn services(&self) -> Result<Vec<ServiceInfo>>;
        fn read(&self, characteristic: Option<Uuid>, timeout: Duration) -> Result<Vec<u8>>;
        fn write(&self, characteristic: Option<Uuid>, data: &[u8], with_response: bool) -> Result<()>;
        fn subscribe(&self, characteristic: Option<Uuid>, on_data: DataCallback) -> Result<()>;
        fn unsubscribe(&self, characteristic: Option<Uuid>) -> Result<()>;
        fn on_link_lost(&self, callback: LinkLostCallback);
    }
}

/// A characteristic used by mock expectations
pub const TEMPERATURE_UUID: Uuid = Uuid::from_u128(0x0000_2a1c_0000_1000_8000_0080_5f9b_34fb);

pub fn temperature_service() -> ServiceInfo {
    ServiceInfo {
        uuid: Uuid::from_u128(0x0000_1809_0000_1000_8000_0080_5f9b_34fb),
        characteristics: vec![CharacteristicInfo::new(
            TEMPERATURE_UUID,
            [CharProperty::Read, CharProperty::Indicate],
        )],
    }
}

/// A mock that accepts the calls every session makes on creation and teardown
pub fn permissive_transport() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_kind().return_const("scripted");
    transport.expect_on_link_lost().return_const(());
    transport.expect_is_connected().return_const(false);
    transport
}
