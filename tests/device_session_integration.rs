//! Integration tests for the device session state machine
//!
//! These tests validate:
//! - Channel operations are gated on the Connected state
//! - Transport failures stay distinct from state failures
//! - Scan lifecycle and deduplication
//! - Notification delivery into a plot manager

mod common;

use common::builders::{headless_config, MockTransportBuilder};
use common::mock_helpers::{permissive_transport, temperature_service, TEMPERATURE_UUID};
use common::wait_until;
use devtk_rs::device::mock::SAMPLE_CHAR_UUID;
use devtk_rs::device::{DeviceSession, MockDevice};
use devtk_rs::error::{DevtkError, ErrorKind, TransportErrorKind};
use devtk_rs::parse::LineParser;
use devtk_rs::plot::{ArtistData, Layout, Placement, PlotManager};
use devtk_rs::types::{ConnectionState, DeviceInfo, LineConfig};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[test]
fn test_read_characteristic_follows_connection_state() {
    let session = DeviceSession::new(MockTransportBuilder::new().ble("AA:01", "Thermo").build());

    // Disconnected: state error
    let err = session.read_characteristic(SAMPLE_CHAR_UUID).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    // Connected and reachable: ok
    session.connect(&DeviceInfo::ble("AA:01", None, None)).unwrap();
    let bytes = session.read_characteristic(SAMPLE_CHAR_UUID).unwrap();
    assert!(bytes.ends_with(b"\n"));

    // Connected but unreachable: transport error, still connected
    session.transport().set_reachable(false);
    let err = session.read_characteristic(SAMPLE_CHAR_UUID).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.is_retryable());
    assert!(session.is_connected());

    session.transport().set_reachable(true);
    assert!(session.read_characteristic(SAMPLE_CHAR_UUID).is_ok());
}

#[test]
#[serial]
fn test_scan_on_empty_environment() {
    let session = DeviceSession::new(MockTransportBuilder::new().build());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    session
        .start_scan(Duration::from_secs(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(session.state(), ConnectionState::Scanning);

    let back_to_idle = wait_until(Duration::from_secs(3), || {
        session.state() == ConnectionState::Disconnected
    });
    assert!(back_to_idle, "scan should end after its timeout");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(session.found_devices().is_empty());
}

#[test]
#[serial]
fn test_scan_timeout_ends_scan() {
    let session = DeviceSession::new(
        MockTransportBuilder::new()
            .ble("AA:01", "One")
            .ble("AA:02", "Two")
            .build(),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let start = Instant::now();
    session
        .start_scan(Duration::from_millis(200), move |device| {
            sink.lock().unwrap().push(device.address);
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || !session.is_scanning()));
    assert!(start.elapsed() >= Duration::from_millis(150));

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["AA:01".to_string(), "AA:02".to_string()]);
    assert!(!session.transport().is_scanning());
    assert_eq!(session.found_devices().len(), 2);
}

#[test]
fn test_unreachable_device_fails_connect() {
    let session = DeviceSession::new(
        MockTransportBuilder::new()
            .unreachable_ble("AA:09", "Far")
            .build(),
    );
    let err = session.connect(&DeviceInfo::ble("AA:09", None, None)).unwrap_err();
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[test]
fn test_open_close_serial_port() {
    let session = DeviceSession::new(
        MockTransportBuilder::new()
            .device(MockDevice::serial("/dev/ttyMOCK0", LineConfig::with_baud_rate(9600)))
            .build(),
    );
    let ports = session.available_ports().unwrap();
    assert_eq!(ports[0].address, "/dev/ttyMOCK0");

    session.open("/dev/ttyMOCK0", LineConfig::with_baud_rate(9600)).unwrap();
    assert!(session.is_connected());

    session.write(b"START\n").unwrap();
    assert_eq!(
        session.transport().written(),
        vec![(None, b"START\n".to_vec())]
    );
    assert!(!session.read().unwrap().is_empty());

    session.close().unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.write(b"x").unwrap_err().kind(), ErrorKind::State);
}

#[test]
fn test_link_lost_error_disconnects() {
    let session = DeviceSession::new(MockTransportBuilder::new().ble("AA:01", "Thermo").build());
    session.connect(&DeviceInfo::ble("AA:01", None, None)).unwrap();

    session.transport().inject_failure(TransportErrorKind::LinkLost);
    let err = session.read_characteristic(SAMPLE_CHAR_UUID).unwrap_err();
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::LinkLost));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[test]
fn test_scripted_transport_read() {
    let mut transport = permissive_transport();
    transport.expect_connect().times(1).returning(|_, _| Ok(()));
    transport
        .expect_services()
        .times(1)
        .returning(|| Ok(vec![temperature_service()]));
    transport
        .expect_read()
        .withf(|characteristic, _| *characteristic == Some(TEMPERATURE_UUID))
        .times(1)
        .returning(|_, _| Ok(vec![0x10, 0x27]));
    transport.expect_disconnect().times(1).returning(|| Ok(()));

    let session = DeviceSession::new(transport);
    session.connect(&DeviceInfo::ble("11:22", None, None)).unwrap();
    assert_eq!(session.read_characteristic(TEMPERATURE_UUID).unwrap(), vec![0x10, 0x27]);

    // Indicate-only characteristic cannot be written
    let err = session
        .write_characteristic(TEMPERATURE_UUID, &[1], true)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    session.disconnect().unwrap();
}

#[test]
fn test_scripted_transport_rejects_handshake() {
    let mut transport = permissive_transport();
    transport.expect_connect().times(1).returning(|_, _| {
        Err(DevtkError::transport(TransportErrorKind::Nack, "pairing refused"))
    });

    let session = DeviceSession::new(transport);
    let err = session.connect(&DeviceInfo::ble("11:22", None, None)).unwrap_err();
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Nack));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[test]
#[serial]
fn test_notifications_feed_plot_manager() {
    let mut plots = PlotManager::new(headless_config());
    let figure = plots.create_figure(Layout::single(), None).unwrap();
    let axis = plots.create_axis(figure, Placement::cell(0, 0)).unwrap();
    let line = plots.create_line_plot(axis, 16).unwrap();
    plots.show().unwrap();

    let session = DeviceSession::new(MockTransportBuilder::new().ble("AA:01", "Thermo").build());
    session.connect(&DeviceInfo::ble("AA:01", None, None)).unwrap();

    let handle = plots.handle();
    let parser = Mutex::new(LineParser::new());
    let delivered = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&delivered);
    session
        .start_notifications(SAMPLE_CHAR_UUID, move |chunk| {
            for sample in parser.lock().unwrap().feed(chunk) {
                handle.append_line_plot(line, vec![sample[1]]).unwrap();
                count.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || delivered.load(Ordering::SeqCst) >= 5));
    session.disconnect().unwrap();
    // Let a chunk already past the gate finish
    std::thread::sleep(Duration::from_millis(20));
    let total = delivered.load(Ordering::SeqCst);

    plots.stop().unwrap();
    let surface = plots.snapshot().unwrap();
    let ArtistData::Line(values) = &surface.artist(line).unwrap().data else {
        panic!("expected line data");
    };
    let filled = values.iter().filter(|v| v.is_finite()).count();
    assert_eq!(filled, total.min(16));
}
