//! Device Session
//!
//! The connection state machine for one device. A session wraps a
//! [`DeviceTransport`] and guarantees that channel operations reach it only
//! while the link is up.
//!
//! # States
//!
//! ```text
//!              start_scan                 timeout / stop_scan
//! Disconnected ──────────► Scanning ─────────────────────────► Disconnected
//!      │                      │ connect (scan is stopped first)
//!      │ connect              ▼
//!      └──────────────────► Connecting ──fail──► Disconnected
//!                             │ ok
//!                             ▼
//!                          Connected ──disconnect / link lost──► Disconnecting ──► Disconnected
//! ```
//!
//! The state lives in an atomic cell, so [`DeviceSession::state`] and
//! [`DeviceSession::is_connected`] never block. Sessions are cheap to clone
//! and every clone drives the same state machine.

use crate::config::DeviceConfig;
use crate::device::transport::{DataCallback, DeviceTransport, TransportStats};
use crate::error::{DevtkError, ObjectKind, Result, TransportErrorKind};
use crate::types::{
    find_characteristic, CharProperty, ConnectionState, DeviceInfo, LineConfig, ServiceInfo,
};
use crossbeam_channel::{bounded, Sender};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use uuid::Uuid;

/// Called on every state transition
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Name of the scan timer thread
const SCAN_THREAD_NAME: &str = "devtk-scan";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One running scan
struct ActiveScan {
    active: Arc<AtomicBool>,
    stop_tx: Sender<()>,
}

struct SessionInner<T: DeviceTransport> {
    transport: T,
    config: DeviceConfig,
    state: AtomicU8,
    /// Serializes connect/disconnect so transitions never interleave.
    /// State callbacks never run while it is held.
    op_lock: Mutex<()>,
    /// Transitions not yet delivered to the state callbacks
    pending: Mutex<VecDeque<ConnectionState>>,
    /// Set while one thread is delivering `pending`
    delivering: AtomicBool,
    device: Mutex<Option<DeviceInfo>>,
    services: Mutex<Vec<ServiceInfo>>,
    found: Mutex<Vec<DeviceInfo>>,
    scan: Mutex<Option<ActiveScan>>,
    subscriptions: Mutex<HashMap<Option<Uuid>, Arc<AtomicBool>>>,
    callbacks: Mutex<Vec<StateCallback>>,
}

impl<T: DeviceTransport> SessionInner<T> {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            self.notify(previous, state);
        }
    }

    /// Move from `from` to `to` only if the state is still `from`
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            self.notify(from, to);
        }
        moved
    }

    /// Queue a transition for the callbacks; see [`Self::deliver`]
    fn notify(&self, from: ConnectionState, to: ConnectionState) {
        tracing::debug!("[{}] {} -> {}", self.transport.kind(), from, to);
        lock(&self.pending).push_back(to);
    }

    /// Run the state callbacks for every queued transition, in order.
    ///
    /// Must be called with no session lock held. A callback may call back
    /// into the session; transitions it causes are delivered by the same
    /// loop once it returns.
    fn deliver(&self) {
        loop {
            if self.delivering.swap(true, Ordering::SeqCst) {
                return;
            }
            loop {
                let next = lock(&self.pending).pop_front();
                let Some(state) = next else {
                    break;
                };
                let callbacks: Vec<StateCallback> = lock(&self.callbacks).clone();
                for callback in callbacks {
                    callback(state);
                }
            }
            self.delivering.store(false, Ordering::SeqCst);
            // A transition queued after the last pop but before the flag
            // cleared would otherwise wait for the next operation
            if lock(&self.pending).is_empty() {
                return;
            }
        }
    }

    /// End the current scan, if any. Returns whether one was running.
    fn end_scan(&self) -> bool {
        let Some(scan) = lock(&self.scan).take() else {
            return false;
        };
        let was_active = scan.active.swap(false, Ordering::SeqCst);
        let _ = scan.stop_tx.try_send(());

        if was_active {
            if let Err(e) = self.transport.stop_scan() {
                tracing::warn!("[{}] Failed to stop scan: {}", self.transport.kind(), e);
            }
        }
        self.transition(ConnectionState::Scanning, ConnectionState::Disconnected);
        was_active
    }

    /// Called by the scan timer once the timeout elapses
    fn scan_timed_out(&self, active: &Arc<AtomicBool>) {
        let mut slot = lock(&self.scan);
        let current = slot
            .as_ref()
            .is_some_and(|scan| Arc::ptr_eq(&scan.active, active));
        if !current {
            return;
        }
        *slot = None;
        drop(slot);

        if active.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.transport.stop_scan() {
                tracing::warn!("[{}] Failed to stop scan: {}", self.transport.kind(), e);
            }
            tracing::info!(
                "[{}] Scan finished, {} device(s) found",
                self.transport.kind(),
                lock(&self.found).len()
            );
        }
        self.transition(ConnectionState::Scanning, ConnectionState::Disconnected);
        self.deliver();
    }

    /// Flip every subscription flag, then unsubscribe
    fn cancel_subscriptions(&self) {
        let subscriptions: Vec<_> = lock(&self.subscriptions).drain().collect();
        for (characteristic, flag) in subscriptions {
            flag.store(false, Ordering::SeqCst);
            if let Err(e) = self.transport.unsubscribe(characteristic) {
                tracing::debug!(
                    "[{}] Unsubscribe during teardown failed: {}",
                    self.transport.kind(),
                    e
                );
            }
        }
    }

    /// Converge to Disconnected after the link dropped under us
    fn link_lost(&self) {
        if !self.transition(ConnectionState::Connected, ConnectionState::Disconnecting) {
            return;
        }
        tracing::warn!("[{}] Link lost", self.transport.kind());
        for flag in lock(&self.subscriptions).drain().map(|(_, flag)| flag) {
            flag.store(false, Ordering::SeqCst);
        }
        let _ = self.transport.disconnect();
        *lock(&self.device) = None;
        lock(&self.services).clear();
        self.set_state(ConnectionState::Disconnected);
        self.deliver();
    }

    /// Pass an error through, converging to Disconnected on link loss
    fn check_transport_error(&self, error: DevtkError) -> DevtkError {
        if error.transport_kind() == Some(TransportErrorKind::LinkLost) {
            self.link_lost();
        }
        error
    }
}

/// Connection state machine for one device
pub struct DeviceSession<T: DeviceTransport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: DeviceTransport> Clone for DeviceSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: DeviceTransport> std::fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("transport", &self.inner.transport.kind())
            .field("state", &self.inner.state())
            .field("device", &lock(&self.inner.device).as_ref().map(|d| d.address.clone()))
            .finish()
    }
}

impl<T: DeviceTransport + 'static> DeviceSession<T> {
    /// Create a session with default timeouts
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, DeviceConfig::default())
    }

    pub fn with_config(transport: T, config: DeviceConfig) -> Self {
        let inner = Arc::new(SessionInner {
            transport,
            config,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            op_lock: Mutex::new(()),
            pending: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            device: Mutex::new(None),
            services: Mutex::new(Vec::new()),
            found: Mutex::new(Vec::new()),
            scan: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
        });

        let weak: Weak<SessionInner<T>> = Arc::downgrade(&inner);
        inner.transport.on_link_lost(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.link_lost();
            }
        }));

        Self { inner }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Alias of [`DeviceSession::state`]
    pub fn get_status(&self) -> ConnectionState {
        self.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == ConnectionState::Scanning
    }

    /// The device the session is connected to
    pub fn device(&self) -> Option<DeviceInfo> {
        lock(&self.inner.device).clone()
    }

    /// Devices found by the latest scan, in discovery order
    pub fn found_devices(&self) -> Vec<DeviceInfo> {
        lock(&self.inner.found).clone()
    }

    /// Services of the connected device, as read on connect
    pub fn services(&self) -> Vec<ServiceInfo> {
        lock(&self.inner.services).clone()
    }

    /// Register a callback fired on every state transition.
    ///
    /// The callback runs on whichever thread performs the transition, after
    /// the operation released its locks, so it may call back into the
    /// session.
    pub fn on_state_change(&self, callback: impl Fn(ConnectionState) + Send + Sync + 'static) {
        lock(&self.inner.callbacks).push(Arc::new(callback));
    }

    pub fn stats(&self) -> TransportStats {
        self.inner.transport.stats()
    }

    /// Serial ports present on the host
    pub fn available_ports(&self) -> Result<Vec<DeviceInfo>> {
        self.inner.transport.available_ports()
    }

    fn state_error(&self, operation: &'static str) -> DevtkError {
        DevtkError::State {
            operation,
            state: self.state().to_string(),
        }
    }

    fn require_connected(&self, operation: &'static str) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(self.state_error(operation))
        }
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    /// Scan for `timeout`, calling `on_device` once per new device.
    ///
    /// Results of the previous scan are cleared. The state returns to
    /// Disconnected when the timeout elapses or [`stop_scan`](Self::stop_scan)
    /// is called.
    pub fn start_scan(
        &self,
        timeout: Duration,
        on_device: impl Fn(DeviceInfo) + Send + Sync + 'static,
    ) -> Result<()> {
        let result = self.begin_scan(timeout, on_device);
        self.inner.deliver();
        result
    }

    fn begin_scan(
        &self,
        timeout: Duration,
        on_device: impl Fn(DeviceInfo) + Send + Sync + 'static,
    ) -> Result<()> {
        let inner = &self.inner;
        let active = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        {
            // Registered under the operation lock so a concurrent connect
            // always finds the scan it has to end
            let _op = lock(&inner.op_lock);
            if !inner.transition(ConnectionState::Disconnected, ConnectionState::Scanning) {
                return Err(self.state_error("start a scan"));
            }
            lock(&inner.found).clear();
            *lock(&inner.scan) = Some(ActiveScan {
                active: Arc::clone(&active),
                stop_tx,
            });
        }

        let weak = Arc::downgrade(inner);
        let scan_flag = Arc::clone(&active);
        let result = inner.transport.start_scan(Box::new(move |device: DeviceInfo| {
            if !scan_flag.load(Ordering::SeqCst) {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let is_new = {
                let mut found = lock(&inner.found);
                match found.iter_mut().find(|d| d.address == device.address) {
                    Some(known) => {
                        *known = device.clone();
                        false
                    }
                    None => {
                        found.push(device.clone());
                        true
                    }
                }
            };
            if is_new && scan_flag.load(Ordering::SeqCst) {
                tracing::debug!("[{}] Found {}", inner.transport.kind(), device);
                on_device(device);
            }
        }));

        if let Err(e) = result {
            tracing::error!("[{}] Failed to start scan: {}", inner.transport.kind(), e);
            {
                let mut slot = lock(&inner.scan);
                if slot.as_ref().is_some_and(|scan| Arc::ptr_eq(&scan.active, &active)) {
                    *slot = None;
                }
            }
            active.store(false, Ordering::SeqCst);
            inner.transition(ConnectionState::Scanning, ConnectionState::Disconnected);
            return Err(e);
        }

        if !active.load(Ordering::SeqCst) {
            // Ended while the transport was starting; it may have missed the stop
            tracing::debug!("[{}] Scan ended before it started", inner.transport.kind());
            if let Err(e) = inner.transport.stop_scan() {
                tracing::warn!("[{}] Failed to stop scan: {}", inner.transport.kind(), e);
            }
            return Ok(());
        }

        tracing::info!(
            "[{}] Scanning for {:?}",
            inner.transport.kind(),
            timeout
        );

        let weak = Arc::downgrade(inner);
        let spawned = std::thread::Builder::new()
            .name(SCAN_THREAD_NAME.to_string())
            .spawn(move || {
                // Either the timeout elapses or stop_scan wakes us early
                let _ = stop_rx.recv_timeout(timeout);
                if let Some(inner) = weak.upgrade() {
                    inner.scan_timed_out(&active);
                }
            });

        if let Err(e) = spawned {
            self.inner.end_scan();
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop the running scan; later discoveries are ignored
    pub fn stop_scan(&self) -> Result<()> {
        if self.inner.end_scan() {
            tracing::info!("[{}] Scan stopped", self.inner.transport.kind());
        }
        self.inner.deliver();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Connect to `device`.
    ///
    /// A running scan is stopped first. Connecting again to the connected
    /// device is a no-op.
    pub fn connect(&self, device: &DeviceInfo) -> Result<()> {
        let result = self.connect_locked(device);
        self.inner.deliver();
        result
    }

    fn connect_locked(&self, device: &DeviceInfo) -> Result<()> {
        let inner = &self.inner;
        let _op = lock(&inner.op_lock);

        match inner.state() {
            ConnectionState::Connected => {
                let same = lock(&inner.device)
                    .as_ref()
                    .is_some_and(|d| d.address == device.address);
                return if same {
                    tracing::debug!("[{}] Already connected to {}", inner.transport.kind(), device);
                    Ok(())
                } else {
                    Err(DevtkError::State {
                        operation: "connect to another device",
                        state: format!("Connected to {}", self.device().map(|d| d.address).unwrap_or_default()),
                    })
                };
            }
            ConnectionState::Scanning => {
                tracing::debug!("[{}] Stopping scan before connecting", inner.transport.kind());
                inner.end_scan();
            }
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting | ConnectionState::Disconnecting => {
                return Err(self.state_error("connect"));
            }
        }

        // The scan timer only ever moves to Disconnected, so this fails only
        // if another thread left Disconnected without the operation lock
        if !inner.transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
            return Err(self.state_error("connect"));
        }
        tracing::info!("[{}] Connecting to {}", inner.transport.kind(), device);

        if let Err(e) = inner.transport.connect(device, inner.config.connect_timeout()) {
            tracing::error!("[{}] Failed to connect to {}: {}", inner.transport.kind(), device, e);
            inner.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        let services = match inner.transport.services() {
            Ok(services) => services,
            Err(e) => {
                tracing::warn!("[{}] Could not list services: {}", inner.transport.kind(), e);
                Vec::new()
            }
        };
        *lock(&inner.services) = services;
        *lock(&inner.device) = Some(device.clone());
        inner.set_state(ConnectionState::Connected);
        tracing::info!("[{}] Connected to {}", inner.transport.kind(), device);
        Ok(())
    }

    /// Tear everything down; safe from any state
    pub fn disconnect(&self) -> Result<()> {
        self.disconnect_locked();
        self.inner.deliver();
        Ok(())
    }

    fn disconnect_locked(&self) {
        let inner = &self.inner;
        let _op = lock(&inner.op_lock);

        inner.end_scan();

        if inner.state() == ConnectionState::Disconnected && lock(&inner.device).is_none() {
            return;
        }

        inner.set_state(ConnectionState::Disconnecting);
        inner.cancel_subscriptions();
        if let Err(e) = inner.transport.disconnect() {
            tracing::warn!("[{}] Disconnect reported an error: {}", inner.transport.kind(), e);
        }
        *lock(&inner.device) = None;
        lock(&inner.services).clear();
        inner.set_state(ConnectionState::Disconnected);
        tracing::info!("[{}] Disconnected", inner.transport.kind());
    }

    /// Open a serial port
    pub fn open(&self, port: &str, line: LineConfig) -> Result<()> {
        self.connect(&DeviceInfo::serial(port, line))
    }

    /// Close the serial port
    pub fn close(&self) -> Result<()> {
        self.disconnect()
    }

    // ------------------------------------------------------------------
    // Channel operations
    // ------------------------------------------------------------------

    fn check_property(&self, uuid: &Uuid, property: CharProperty) -> Result<()> {
        let services = lock(&self.inner.services);
        let characteristic = find_characteristic(&services, uuid)
            .ok_or_else(|| DevtkError::not_found(ObjectKind::Characteristic, uuid))?;
        if !characteristic.supports(property) {
            return Err(DevtkError::Configuration(format!(
                "Characteristic {} does not support {:?}",
                uuid, property
            )));
        }
        Ok(())
    }

    pub fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.require_connected("read a characteristic")?;
        self.check_property(&uuid, CharProperty::Read)?;
        self.read_from(Some(uuid))
    }

    pub fn write_characteristic(&self, uuid: Uuid, data: &[u8], with_response: bool) -> Result<()> {
        self.require_connected("write a characteristic")?;
        let property = if with_response {
            CharProperty::Write
        } else {
            CharProperty::WriteWithoutResponse
        };
        self.check_property(&uuid, property)?;
        self.write_to(Some(uuid), data, with_response)
    }

    /// Read pending bytes from a stream link
    pub fn read(&self) -> Result<Vec<u8>> {
        self.require_connected("read")?;
        self.read_from(None)
    }

    /// Write bytes to a stream link
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.require_connected("write")?;
        self.write_to(None, data, true)
    }

    fn read_from(&self, characteristic: Option<Uuid>) -> Result<Vec<u8>> {
        let inner = &self.inner;
        inner
            .transport
            .read(characteristic, inner.config.io_timeout())
            .map_err(|e| inner.check_transport_error(e))
    }

    fn write_to(&self, characteristic: Option<Uuid>, data: &[u8], with_response: bool) -> Result<()> {
        let inner = &self.inner;
        inner
            .transport
            .write(characteristic, data, with_response)
            .map_err(|e| inner.check_transport_error(e))
    }

    /// Deliver notifications of `uuid` to `callback` on the transport's thread
    pub fn start_notifications(
        &self,
        uuid: Uuid,
        callback: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Result<()> {
        self.require_connected("start notifications")?;
        {
            let services = lock(&self.inner.services);
            let characteristic = find_characteristic(&services, &uuid)
                .ok_or_else(|| DevtkError::not_found(ObjectKind::Characteristic, uuid))?;
            if !characteristic.can_notify() {
                return Err(DevtkError::Configuration(format!(
                    "Characteristic {} does not support notifications",
                    uuid
                )));
            }
        }
        self.subscribe(Some(uuid), Arc::new(callback))
    }

    /// Stop notifications of `uuid`; a no-op when not subscribed
    pub fn stop_notifications(&self, uuid: Uuid) -> Result<()> {
        self.unsubscribe(Some(uuid))
    }

    /// Deliver incoming bytes of a stream link to `callback`
    pub fn start_stream(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) -> Result<()> {
        self.require_connected("start streaming")?;
        self.subscribe(None, Arc::new(callback))
    }

    pub fn stop_stream(&self) -> Result<()> {
        self.unsubscribe(None)
    }

    fn subscribe(&self, key: Option<Uuid>, callback: DataCallback) -> Result<()> {
        let inner = &self.inner;
        let flag = Arc::new(AtomicBool::new(true));
        {
            let mut subscriptions = lock(&inner.subscriptions);
            if subscriptions.contains_key(&key) {
                return Err(DevtkError::Configuration(format!(
                    "Already subscribed to {}",
                    key.map_or_else(|| "the stream".to_string(), |u| u.to_string())
                )));
            }
            subscriptions.insert(key, Arc::clone(&flag));
        }

        let gate = Arc::clone(&flag);
        let gated: DataCallback = Arc::new(move |data: &[u8]| {
            if gate.load(Ordering::SeqCst) {
                callback(data);
            }
        });

        if let Err(e) = inner.transport.subscribe(key, gated) {
            flag.store(false, Ordering::SeqCst);
            lock(&inner.subscriptions).remove(&key);
            return Err(inner.check_transport_error(e));
        }
        tracing::debug!("[{}] Subscribed to {:?}", inner.transport.kind(), key);
        Ok(())
    }

    fn unsubscribe(&self, key: Option<Uuid>) -> Result<()> {
        let inner = &self.inner;
        let Some(flag) = lock(&inner.subscriptions).remove(&key) else {
            return Ok(());
        };
        flag.store(false, Ordering::SeqCst);

        if !self.is_connected() {
            return Ok(());
        }
        inner
            .transport
            .unsubscribe(key)
            .map_err(|e| inner.check_transport_error(e))
    }
}

impl<T: DeviceTransport> Drop for SessionInner<T> {
    fn drop(&mut self) {
        if let Some(scan) = self.scan.get_mut().ok().and_then(Option::take) {
            scan.active.store(false, Ordering::SeqCst);
            let _ = scan.stop_tx.try_send(());
            let _ = self.transport.stop_scan();
        }
        if self.transport.is_connected() {
            let _ = self.transport.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockDevice, MockTransport, SAMPLE_CHAR_UUID};
    use crate::error::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    fn session_with(devices: &[&str]) -> DeviceSession<MockTransport> {
        let mut transport = MockTransport::new()
            .with_read_delay(0)
            .with_advertise_interval(Duration::from_millis(5))
            .with_stream_interval(Duration::from_millis(5));
        for address in devices {
            transport = transport.with_device(MockDevice::ble(*address, format!("Dev {}", address)));
        }
        DeviceSession::new(transport)
    }

    #[test]
    fn test_starts_disconnected() {
        let session = session_with(&[]);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.get_status(), ConnectionState::Disconnected);
        assert!(!session.is_connected());
        assert!(session.device().is_none());
    }

    #[test]
    fn test_connect_is_idempotent_for_same_device() {
        let session = session_with(&["AA", "BB"]);
        let aa = DeviceInfo::ble("AA", None, None);
        session.connect(&aa).unwrap();
        session.connect(&aa).unwrap();
        assert!(session.is_connected());
        assert!(!session.services().is_empty());

        let err = session.connect(&DeviceInfo::ble("BB", None, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(session.device().unwrap().address, "AA");
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let session = session_with(&[]);
        let err = session.connect(&DeviceInfo::ble("ZZ", None, None)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_callbacks_see_every_transition() {
        let session = session_with(&["AA"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.on_state_change(move |state| lock(&sink).push(state));

        session.connect(&DeviceInfo::ble("AA", None, None)).unwrap();
        session.disconnect().unwrap();

        assert_eq!(
            *lock(&seen),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[test]
    fn test_callback_may_reenter_the_session() {
        let session = session_with(&["AA"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reentrant = session.clone();
        session.on_state_change(move |state| {
            lock(&sink).push(state);
            if state == ConnectionState::Connected {
                reentrant.disconnect().unwrap();
            }
        });

        let (done_tx, done_rx) = bounded(1);
        let worker = session.clone();
        std::thread::spawn(move || {
            let _ = done_tx.send(worker.connect(&DeviceInfo::ble("AA", None, None)));
        });

        let result = done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("connect returned");
        assert!(result.is_ok());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            *lock(&seen),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[test]
    fn test_racing_scan_never_survives_connect() {
        for _ in 0..50 {
            let session = session_with(&["AA"]);
            let scanner = session.clone();
            let scan = std::thread::spawn(move || {
                scanner.start_scan(Duration::from_secs(10), |_| {})
            });
            session.connect(&DeviceInfo::ble("AA", None, None)).unwrap();
            let scanned = scan.join().unwrap();

            assert!(session.is_connected());
            assert!(!session.transport().is_scanning());
            if let Err(e) = scanned {
                assert_eq!(e.kind(), ErrorKind::State);
            }
            session.disconnect().unwrap();
        }
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let session = session_with(&["AA"]);
        session.disconnect().unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.start_scan(Duration::from_secs(10), |_| {}).unwrap();
        session.disconnect().unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_scan_deduplicates_and_connect_stops_scan() {
        let session = session_with(&["AA", "BB"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        session
            .start_scan(Duration::from_secs(10), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(session.is_scanning());

        // Both devices re-advertise every few ms
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.found_devices().len(), 2);

        let err = session.start_scan(Duration::from_secs(1), |_| {}).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        let device = session.found_devices()[0].clone();
        session.connect(&device).unwrap();
        assert!(session.is_connected());
        assert!(!session.transport().is_scanning());
    }

    #[test]
    fn test_stop_scan_is_immediate() {
        let session = session_with(&["AA"]);
        session.start_scan(Duration::from_secs(10), |_| {}).unwrap();
        session.stop_scan().unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        // Stopping again is harmless
        session.stop_scan().unwrap();
    }

    #[test]
    fn test_characteristic_checks() {
        let session = session_with(&["AA"]);
        let err = session.read_characteristic(SAMPLE_CHAR_UUID).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        session.connect(&DeviceInfo::ble("AA", None, None)).unwrap();
        assert!(session.read_characteristic(SAMPLE_CHAR_UUID).is_ok());

        let err = session.read_characteristic(Uuid::nil()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = session
            .write_characteristic(SAMPLE_CHAR_UUID, &[1], true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_link_loss_converges_to_disconnected() {
        let session = session_with(&["AA"]);
        session.connect(&DeviceInfo::ble("AA", None, None)).unwrap();
        session.transport().simulate_link_loss();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.device().is_none());
    }

    #[test]
    fn test_notifications_stop_delivering() {
        let session = session_with(&["AA"]);
        session.connect(&DeviceInfo::ble("AA", None, None)).unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        session
            .start_notifications(SAMPLE_CHAR_UUID, move |data| {
                counter.fetch_add(data.len(), Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(
            session
                .start_notifications(SAMPLE_CHAR_UUID, |_| {})
                .unwrap_err()
                .kind(),
            ErrorKind::Configuration
        );

        std::thread::sleep(Duration::from_millis(50));
        session.stop_notifications(SAMPLE_CHAR_UUID).unwrap();
        // Let a chunk already past the gate finish
        std::thread::sleep(Duration::from_millis(10));
        let after_stop = received.load(Ordering::SeqCst);
        assert!(after_stop > 0);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(received.load(Ordering::SeqCst), after_stop);

        // Not subscribed any more
        session.stop_notifications(SAMPLE_CHAR_UUID).unwrap();
    }
}
