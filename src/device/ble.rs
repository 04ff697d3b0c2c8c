//! Bluetooth Low Energy transport
//!
//! `btleplug` is async; this transport owns a small tokio runtime and blocks
//! on it for request/response operations. Scan reports, notifications and
//! disconnect events are pumped by tasks spawned on the same runtime, so
//! callbacks run on runtime worker threads.
//!
//! Do not call blocking transport methods from inside a notification
//! callback: they would block a runtime worker on itself.

use crate::config::DeviceConfig;
use crate::device::transport::{
    DataCallback, DeviceCallback, DeviceTransport, LinkLostCallback, TransportStats,
};
use crate::error::{DevtkError, Result, TransportErrorKind};
use crate::types::{CharProperty, CharacteristicInfo, DeviceInfo, ServiceInfo};
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn map_ble_error(error: btleplug::Error) -> DevtkError {
    let kind = match &error {
        btleplug::Error::DeviceNotFound => TransportErrorKind::DeviceAbsent,
        btleplug::Error::NotConnected => TransportErrorKind::LinkLost,
        btleplug::Error::TimedOut(_) => TransportErrorKind::Timeout,
        btleplug::Error::NotSupported(_) | btleplug::Error::PermissionDenied => {
            TransportErrorKind::Nack
        }
        _ => TransportErrorKind::Backend,
    };
    DevtkError::transport(kind, error.to_string())
}

/// Run a btleplug request, failing with a timeout error once `timeout` elapses
async fn within<F, T>(timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, btleplug::Error>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(map_ble_error),
        Err(_) => Err(DevtkError::transport(
            TransportErrorKind::Timeout,
            format!("No answer within {:?}", timeout),
        )),
    }
}

fn properties_of(flags: CharPropFlags) -> Vec<CharProperty> {
    [
        (CharPropFlags::READ, CharProperty::Read),
        (CharPropFlags::WRITE, CharProperty::Write),
        (CharPropFlags::WRITE_WITHOUT_RESPONSE, CharProperty::WriteWithoutResponse),
        (CharPropFlags::NOTIFY, CharProperty::Notify),
        (CharPropFlags::INDICATE, CharProperty::Indicate),
    ]
    .into_iter()
    .filter(|(flag, _)| flags.contains(*flag))
    .map(|(_, property)| property)
    .collect()
}

async fn describe(peripheral: &Peripheral) -> Option<DeviceInfo> {
    let props = peripheral.properties().await.ok().flatten()?;
    let mut info = DeviceInfo::ble(props.address.to_string(), props.local_name, props.rssi)
        .with_services(props.services);
    info.manufacturer_data = props.manufacturer_data;
    Some(info)
}

/// The live link to one peripheral
struct Link {
    peripheral: Peripheral,
    notifications: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

/// Transport for BLE peripherals on the first host adapter
pub struct BleTransport {
    runtime: Runtime,
    adapter: Adapter,
    /// Peripherals seen by scans, keyed by address
    known: Arc<Mutex<HashMap<String, Peripheral>>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    link: Mutex<Option<Link>>,
    subscribers: Arc<Mutex<HashMap<Uuid, DataCallback>>>,
    link_lost: Arc<Mutex<Option<Arc<dyn Fn() + Send + Sync>>>>,
    stats: Arc<Mutex<TransportStats>>,
    /// Bound on writes and on tearing down a failed connect
    write_timeout: Duration,
}

impl BleTransport {
    /// Open the first Bluetooth adapter of the host
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("devtk-ble")
            .enable_time()
            .build()?;

        let adapter = runtime.block_on(async {
            let manager = Manager::new().await.map_err(map_ble_error)?;
            let adapters = manager.adapters().await.map_err(map_ble_error)?;
            adapters.into_iter().next().ok_or_else(|| {
                DevtkError::transport(TransportErrorKind::DeviceAbsent, "No Bluetooth adapter found")
            })
        })?;

        if let Ok(info) = runtime.block_on(adapter.adapter_info()) {
            tracing::info!("[ble] Using adapter {}", info);
        }

        Ok(Self {
            runtime,
            adapter,
            known: Arc::new(Mutex::new(HashMap::new())),
            scan_task: Mutex::new(None),
            link: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            link_lost: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(TransportStats::default())),
            write_timeout: DeviceConfig::default().io_timeout(),
        })
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    fn with_timeout<F, T>(&self, timeout: Duration, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, btleplug::Error>>,
    {
        self.runtime.block_on(within(timeout, future))
    }

    fn peripheral(&self) -> Result<Peripheral> {
        lock(&self.link)
            .as_ref()
            .map(|link| link.peripheral.clone())
            .ok_or_else(|| DevtkError::transport(TransportErrorKind::LinkLost, "Not connected"))
    }

    fn characteristic(&self, characteristic: Option<Uuid>) -> Result<(Peripheral, Characteristic)> {
        let Some(uuid) = characteristic else {
            return Err(DevtkError::Configuration(
                "BLE operations need a characteristic".to_string(),
            ));
        };
        let peripheral = self.peripheral()?;
        let found = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| {
                DevtkError::transport(TransportErrorKind::Nack, format!("Unknown characteristic {}", uuid))
            })?;
        Ok((peripheral, found))
    }

    fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        if let Some(peripheral) = lock(&self.known).get(address) {
            return Ok(peripheral.clone());
        }
        let peripherals = self
            .runtime
            .block_on(self.adapter.peripherals())
            .map_err(map_ble_error)?;
        peripherals
            .into_iter()
            .find(|p| p.address().to_string() == address)
            .ok_or_else(|| {
                DevtkError::transport(TransportErrorKind::DeviceAbsent, format!("{} was not seen", address))
            })
    }

    /// Connect, discover services and start the notification and
    /// disconnect pumps
    fn open_link(&self, peripheral: Peripheral, timeout: Duration) -> Result<Link> {
        self.with_timeout(timeout, async {
            peripheral.connect().await?;
            peripheral.discover_services().await
        })?;

        let mut stream = self
            .runtime
            .block_on(peripheral.notifications())
            .map_err(map_ble_error)?;
        let subscribers = Arc::clone(&self.subscribers);
        let stats = Arc::clone(&self.stats);
        let notifications = self.runtime.spawn(async move {
            while let Some(notification) = stream.next().await {
                let callback = lock(&subscribers).get(&notification.uuid).cloned();
                if let Some(callback) = callback {
                    lock(&stats).record_notification(notification.value.len());
                    callback(&notification.value);
                }
            }
        });

        let mut events = match self.runtime.block_on(self.adapter.events()) {
            Ok(events) => events,
            Err(e) => {
                notifications.abort();
                return Err(map_ble_error(e));
            }
        };
        let id = peripheral.id();
        let link_lost = Arc::clone(&self.link_lost);
        let watcher = self.runtime.spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        tracing::warn!("[ble] Peripheral disconnected");
                        let callback = lock(&link_lost).clone();
                        if let Some(callback) = callback {
                            // Teardown blocks on this runtime, so it cannot run on a worker
                            let spawned = std::thread::Builder::new()
                                .name("devtk-ble-lost".to_string())
                                .spawn(move || callback());
                            if let Err(e) = spawned {
                                tracing::error!("[ble] Failed to report link loss: {}", e);
                            }
                        }
                        break;
                    }
                }
            }
        });

        Ok(Link {
            peripheral,
            notifications,
            watcher,
        })
    }

    fn drop_link(&self) -> Option<Peripheral> {
        let link = lock(&self.link).take()?;
        link.notifications.abort();
        link.watcher.abort();
        lock(&self.subscribers).clear();
        Some(link.peripheral)
    }
}

impl DeviceTransport for BleTransport {
    fn kind(&self) -> &'static str {
        "ble"
    }

    fn start_scan(&self, on_device: DeviceCallback) -> Result<()> {
        let mut events = self
            .runtime
            .block_on(self.adapter.events())
            .map_err(map_ble_error)?;
        self.runtime
            .block_on(self.adapter.start_scan(ScanFilter::default()))
            .map_err(map_ble_error)?;

        let adapter = self.adapter.clone();
        let known = Arc::clone(&self.known);
        let task = self.runtime.spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                if let Some(info) = describe(&peripheral).await {
                    lock(&known).insert(info.address.clone(), peripheral);
                    on_device(info);
                }
            }
        });

        if let Some(previous) = lock(&self.scan_task).replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<()> {
        if let Some(task) = lock(&self.scan_task).take() {
            task.abort();
        }
        self.runtime
            .block_on(self.adapter.stop_scan())
            .map_err(map_ble_error)
    }

    fn connect(&self, device: &DeviceInfo, timeout: Duration) -> Result<()> {
        let peripheral = self.find_peripheral(&device.address)?;
        let link = match self.open_link(peripheral.clone(), timeout) {
            Ok(link) => link,
            Err(e) => {
                // A timed out connect may still complete in the background
                let teardown = self.with_timeout(self.write_timeout, peripheral.disconnect());
                if let Err(teardown) = teardown {
                    tracing::debug!("[ble] Teardown after failed connect: {}", teardown);
                }
                return Err(e);
            }
        };

        tracing::info!("[ble] Connected to {}", device);
        *lock(&self.link) = Some(link);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let Some(peripheral) = self.drop_link() else {
            return Ok(());
        };
        let result = self
            .runtime
            .block_on(peripheral.disconnect())
            .map_err(map_ble_error);
        tracing::info!("[ble] Disconnected");
        result
    }

    fn is_connected(&self) -> bool {
        let Ok(peripheral) = self.peripheral() else {
            return false;
        };
        self.runtime
            .block_on(peripheral.is_connected())
            .unwrap_or(false)
    }

    fn services(&self) -> Result<Vec<ServiceInfo>> {
        let peripheral = self.peripheral()?;
        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| CharacteristicInfo::new(c.uuid, properties_of(c.properties)))
                    .collect(),
            })
            .collect())
    }

    fn read(&self, characteristic: Option<Uuid>, timeout: Duration) -> Result<Vec<u8>> {
        let (peripheral, target) = self.characteristic(characteristic)?;
        let start = Instant::now();
        let result = self.with_timeout(timeout, peripheral.read(&target));

        let elapsed = start.elapsed().as_micros().max(1) as u64;
        let mut stats = lock(&self.stats);
        match &result {
            Ok(bytes) => stats.record_read(elapsed, bytes.len()),
            Err(_) => stats.record_read_failure(),
        }
        result
    }

    fn write(&self, characteristic: Option<Uuid>, data: &[u8], with_response: bool) -> Result<()> {
        let (peripheral, target) = self.characteristic(characteristic)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        let start = Instant::now();
        let result = self.with_timeout(
            self.write_timeout,
            peripheral.write(&target, data, write_type),
        );

        let elapsed = start.elapsed().as_micros().max(1) as u64;
        let mut stats = lock(&self.stats);
        match &result {
            Ok(()) => stats.record_write(elapsed, data.len()),
            Err(_) => stats.record_write_failure(),
        }
        result
    }

    fn subscribe(&self, characteristic: Option<Uuid>, on_data: DataCallback) -> Result<()> {
        let (peripheral, target) = self.characteristic(characteristic)?;
        lock(&self.subscribers).insert(target.uuid, on_data);
        let result = self
            .runtime
            .block_on(peripheral.subscribe(&target))
            .map_err(map_ble_error);
        if result.is_err() {
            lock(&self.subscribers).remove(&target.uuid);
        }
        result
    }

    fn unsubscribe(&self, characteristic: Option<Uuid>) -> Result<()> {
        let (peripheral, target) = self.characteristic(characteristic)?;
        lock(&self.subscribers).remove(&target.uuid);
        self.runtime
            .block_on(peripheral.unsubscribe(&target))
            .map_err(map_ble_error)
    }

    fn on_link_lost(&self, callback: LinkLostCallback) {
        *lock(&self.link_lost) = Some(Arc::from(callback));
    }

    fn stats(&self) -> TransportStats {
        lock(&self.stats).clone()
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.scan_task).take() {
            task.abort();
        }
        if let Some(peripheral) = self.drop_link() {
            let _ = self.runtime.block_on(peripheral.disconnect());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_from_flags() {
        let props = properties_of(CharPropFlags::READ | CharPropFlags::NOTIFY);
        assert_eq!(props, vec![CharProperty::Read, CharProperty::Notify]);
        assert!(properties_of(CharPropFlags::empty()).is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let err = map_ble_error(btleplug::Error::DeviceNotFound);
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::DeviceAbsent));
        let err = map_ble_error(btleplug::Error::NotConnected);
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::LinkLost));
    }

    #[test]
    fn test_requests_are_bounded() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();

        let stalled = futures::future::pending::<std::result::Result<(), btleplug::Error>>();
        let err = runtime
            .block_on(within(Duration::from_millis(20), stalled))
            .unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));

        let refused = async { Err::<(), _>(btleplug::Error::NotConnected) };
        let err = runtime
            .block_on(within(Duration::from_secs(1), refused))
            .unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::LinkLost));
    }
}
