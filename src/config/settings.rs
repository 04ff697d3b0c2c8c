//! Configuration sections
//!
//! Each section groups the settings of one subsystem. Every field has a
//! serde default so partial configuration files load cleanly.
//!
//! # Main Types
//!
//! - [`PlotConfig`] - Rendering backend, frame rate cap, window geometry
//! - [`DeviceConfig`] - Scan/connect/I/O timeouts and default serial line
//! - [`LoggingConfig`] - Log filter and optional rolling log directory

use crate::types::LineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for a device scan in milliseconds
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for a connection handshake in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for a single read/write in milliseconds
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 1_000;

/// Default bound on waiting for the rendering thread in milliseconds
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Default tick interval when no frame rate cap is set, in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 10;

/// Default capacity of the rendering loop's error report queue
pub const DEFAULT_ERROR_QUEUE_CAPACITY: usize = 256;

/// Which renderer the plot manager drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    /// Native window through eframe/egui_plot
    #[default]
    Window,
    /// No window; the surface is maintained in memory only
    Headless,
}

/// Plot manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Renderer to use
    #[serde(default)]
    pub backend: RenderBackend,

    /// Maximum frames per second (None = render every tick)
    #[serde(default)]
    pub fps: Option<u32>,

    /// Title prefix of figure windows
    #[serde(default = "default_window_title")]
    pub window_title: String,

    /// Default figure size in points
    #[serde(default = "default_figure_size")]
    pub default_figure_size: [f32; 2],

    /// How long `stop()` waits for the rendering thread
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Tick interval of the headless renderer
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Capacity of the error report queue
    #[serde(default = "default_error_queue_capacity")]
    pub error_queue_capacity: usize,
}

fn default_window_title() -> String {
    "devtk".to_string()
}

fn default_figure_size() -> [f32; 2] {
    [800.0, 600.0]
}

fn default_stop_timeout_ms() -> u64 {
    DEFAULT_STOP_TIMEOUT_MS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_error_queue_capacity() -> usize {
    DEFAULT_ERROR_QUEUE_CAPACITY
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            backend: RenderBackend::Window,
            fps: None,
            window_title: default_window_title(),
            default_figure_size: default_figure_size(),
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            error_queue_capacity: DEFAULT_ERROR_QUEUE_CAPACITY,
        }
    }
}

impl PlotConfig {
    /// Headless configuration, used by tests and unattended runs
    pub fn headless() -> Self {
        Self {
            backend: RenderBackend::Headless,
            tick_interval_ms: 1,
            ..Default::default()
        }
    }

    /// Minimum time between two rendered frames
    pub fn frame_interval(&self) -> Option<Duration> {
        self.fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_micros(1_000_000 / fps as u64))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Device session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Default scan duration
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,

    /// Connection handshake timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Single read/write timeout
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Serial line settings used when none are given
    #[serde(default)]
    pub line: LineConfig,
}

fn default_scan_timeout_ms() -> u64 {
    DEFAULT_SCAN_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            line: LineConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Directory for daily rolling log files (None = stderr only)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_filter() -> String {
    "info,devtk_rs=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            log_dir: None,
        }
    }
}
