//! devtk - live plot of a device stream
//!
//! Usage: `devtk [PORT [BAUD]]`
//!
//! With a port, samples are read from that serial port. Without one, a
//! simulated device streams a sine wave. Every line of the stream is
//! `time,value`; the value is plotted on a rolling line and the latest
//! sample is shown as text below it.

use anyhow::Context;
use devtk_rs::{
    config::Config,
    device::{DeviceSession, DeviceTransport, MockDataPattern, MockDevice, MockTransport},
    parse::LineParser,
    plot::{ArtistSpec, FigureSpec, Placement, PlotManager},
    types::LineConfig,
};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Samples kept on the rolling line
const WINDOW: usize = 500;

const MOCK_PORT: &str = "mock0";

fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let (file_layer, guard) = match &config.logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "devtk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn main() -> anyhow::Result<()> {
    let config = Config::load_or_default();
    let _log_guard = init_logging(&config);

    let mut args = std::env::args().skip(1);
    let port = args.next();
    let line = match args.next() {
        Some(baud) => LineConfig {
            baud_rate: baud.parse().with_context(|| format!("Invalid baud rate '{}'", baud))?,
            ..config.device.line
        },
        None => config.device.line,
    };

    match port {
        #[cfg(feature = "serial")]
        Some(port) => {
            let session = DeviceSession::with_config(
                devtk_rs::device::SerialTransport::new(),
                config.device.clone(),
            );
            run(&config, session, &port, line)
        }
        #[cfg(not(feature = "serial"))]
        Some(port) => anyhow::bail!("Cannot open {}: built without the `serial` feature", port),
        None => {
            tracing::info!("No port given, streaming from a simulated device");
            let transport = MockTransport::new()
                .with_pattern(MockDataPattern::Sine {
                    frequency: 0.5,
                    amplitude: 10.0,
                    offset: 0.0,
                })
                .with_device(MockDevice::serial(MOCK_PORT, line));
            let session = DeviceSession::with_config(transport, config.device.clone());
            run(&config, session, MOCK_PORT, line)
        }
    }
}

fn run<T: DeviceTransport + 'static>(
    config: &Config,
    session: DeviceSession<T>,
    port: &str,
    line: LineConfig,
) -> anyhow::Result<()> {
    let mut plots = PlotManager::new(config.plot.clone());

    let handles = plots.add_figure_and_artists(
        FigureSpec::grid(2, 1).with_title(format!("devtk - {}", port)),
        vec![
            (
                Placement::cell(0, 0),
                vec![ArtistSpec::line(WINDOW).with_label("value")],
            ),
            (Placement::cell(1, 0), vec![ArtistSpec::text([0.0, 0.0], "waiting for data")]),
        ],
    )?;
    let value_axis = handles.axes[0].0;
    let trace = handles.axes[0].1[0];
    let latest = handles.axes[1].1[0];
    plots.modify_axis_with(
        value_axis,
        [
            ("title", serde_json::json!(port)),
            ("xlabel", serde_json::json!("sample")),
            ("legend", serde_json::json!(true)),
        ],
    )?;
    plots.show()?;

    session
        .open(port, line)
        .with_context(|| format!("Failed to open {}", port))?;

    let handle = plots.handle();
    let parser = Mutex::new(LineParser::new());
    session.start_stream(move |chunk| {
        let samples = match parser.lock() {
            Ok(mut parser) => parser.feed(chunk),
            Err(_) => return,
        };
        let Some(last) = samples.last() else {
            return;
        };
        let values: Vec<f64> = samples.iter().filter_map(|s| s.last().copied()).collect();
        let _ = handle.append_line_plot(trace, values);
        let text = last
            .iter()
            .map(|v| format!("{:.3}", v))
            .collect::<Vec<_>>()
            .join("  ");
        let _ = handle.update_text(latest, text, None);
    })?;

    while plots.is_alive() && plots.is_shown() {
        std::thread::sleep(Duration::from_millis(100));
        for error in plots.take_errors() {
            tracing::warn!("Plot error: {}", error);
        }
    }

    tracing::info!("Shutting down...");
    session.close()?;
    plots.stop()?;
    Ok(())
}
