//! # devtk-rs: Device Acquisition and Live Plotting
//!
//! Acquire streaming data from BLE peripherals or serial ports and render it
//! live on a dedicated plotting thread, without ever blocking the
//! acquisition path.
//!
//! ## Architecture
//!
//! - **Device**: [`DeviceSession`] is the connection state machine over a
//!   [`DeviceTransport`] (mock, serial or BLE). Notification callbacks run on
//!   transport threads.
//! - **Plot**: [`PlotManager`] owns the rendering thread. Producers talk to it
//!   through a cloneable [`PlotHandle`] that queues structural commands and
//!   data updates on two FIFO channels.
//! - **Rendering**: each tick drains the command queue, then the data queue,
//!   and applies both to the [`PlotSurface`] which eframe/egui_plot draw.
//! - **Communication**: Crossbeam channels and atomic flags only; the surface
//!   is never shared.
//!
//! ## Example
//!
//! ```ignore
//! use devtk_rs::{
//!     config::PlotConfig,
//!     device::{DeviceSession, MockDevice, MockTransport},
//!     types::LineConfig,
//!     parse::LineParser,
//!     plot::{Layout, Placement, PlotManager},
//! };
//! use std::sync::Mutex;
//!
//! let mut plots = PlotManager::new(PlotConfig::default());
//! let figure = plots.create_figure(Layout::single(), None)?;
//! let axis = plots.create_axis(figure, Placement::cell(0, 0))?;
//! let line = plots.create_line_plot(axis, 200)?;
//! plots.show()?;
//!
//! let port = MockDevice::serial("/dev/ttyMOCK0", LineConfig::default());
//! let session = DeviceSession::new(MockTransport::new().with_device(port));
//! session.open("/dev/ttyMOCK0", LineConfig::default())?;
//!
//! let handle = plots.handle();
//! let parser = Mutex::new(LineParser::new());
//! session.start_stream(move |chunk| {
//!     for sample in parser.lock().unwrap().feed(chunk) {
//!         let _ = handle.append_line_plot(line, vec![sample[1]]);
//!     }
//! })?;
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod parse;
pub mod plot;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use device::{DeviceSession, DeviceTransport, MockTransport};
pub use error::{DevtkError, ErrorKind, Result, ResultExt};
pub use parse::LineParser;
pub use plot::{PlotHandle, PlotManager, PlotSurface};
pub use types::{ConnectionState, DeviceInfo, LineConfig};
