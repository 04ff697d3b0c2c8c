//! Plot Manager
//!
//! Owns the rendering thread and the producing side of the plot queues.
//!
//! # Architecture
//!
//! ```text
//! producer threads                       rendering thread ("devtk-plot")
//! ┌──────────────┐  commands (FIFO)     ┌───────────────────────────┐
//! │ PlotManager  │ ───────────────────► │ PlotWorker::tick()        │
//! │ PlotHandle(s)│  data (FIFO)         │   └─► PlotSurface         │
//! │              │ ───────────────────► │ renderer (window/headless)│
//! └──────────────┘ ◄─── error reports ─ └───────────────────────────┘
//! ```
//!
//! Identifiers are allocated on the producing side, so `create_*` returns
//! immediately and the object exists after the next tick. Liveness and
//! visibility are atomic flags that any thread can read.
//!
//! # Example
//!
//! ```ignore
//! use devtk_rs::config::PlotConfig;
//! use devtk_rs::plot::{Layout, PlotManager, Placement, DataPayload};
//!
//! let mut manager = PlotManager::new(PlotConfig::default());
//! manager.show()?;
//! let fig = manager.create_figure(Layout::new(2, 1), None)?;
//! let ax = manager.create_axis(fig, Placement::cell(0, 0))?;
//! let line = manager.create_line_plot(ax, 100)?;
//! manager.add_data(line, DataPayload::LineAppend(vec![0.5]))?;
//! manager.stop()?;
//! ```

use crate::config::PlotConfig;
use crate::error::{DevtkError, Result};
use crate::plot::artist::{Artist, ArtistSpec, DataPayload, ImageBuffer};
use crate::plot::channel::{plot_channel, PlotReceiver, PlotSender};
use crate::plot::command::{DataUpdate, PlotCommand};
use crate::plot::id::{ArtistId, AxisId, FigureId, IdAllocator};
use crate::plot::layout::{AxisOptions, FigureSpec, Layout, Placement};
use crate::plot::render;
use crate::plot::surface::{FigureHandles, PlotSurface};
use crate::plot::worker::{ManagerState, PlotShared, PlotWorker};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Name of the rendering thread
pub const PLOT_THREAD_NAME: &str = "devtk-plot";

/// Poll interval while waiting for the rendering thread to exit
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Marks the loop as exited when the rendering thread ends, even by panic
struct ExitGuard(Arc<PlotShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.mark_exited();
    }
}

/// Cloneable producing side of a plot manager.
///
/// Safe to move into device callbacks: every method only allocates an
/// identifier and queues a message.
#[derive(Debug, Clone)]
pub struct PlotHandle {
    ids: Arc<IdAllocator>,
    sender: PlotSender,
    shared: Arc<PlotShared>,
}

impl PlotHandle {
    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.shared.state() {
            state @ (ManagerState::Stopping | ManagerState::Stopped) => Err(DevtkError::State {
                operation,
                state: format!("the plot manager is {}", state),
            }),
            _ => Ok(()),
        }
    }

    fn send(&self, operation: &'static str, cmd: PlotCommand) -> Result<()> {
        self.ensure_open(operation)?;
        self.sender.send_command(cmd)?;
        self.shared.wake();
        Ok(())
    }

    // --- Figures and axes ---

    /// Create a figure with a `rows x cols` grid
    pub fn create_figure(&self, layout: Layout, size: Option<[f32; 2]>) -> Result<FigureId> {
        self.create_figure_from(FigureSpec {
            layout,
            size,
            title: None,
        })
    }

    pub fn create_figure_from(&self, spec: FigureSpec) -> Result<FigureId> {
        spec.layout.validate()?;
        let id = self.ids.figure();
        self.send("create a figure", PlotCommand::CreateFigure { id, spec })?;
        Ok(id)
    }

    /// Create an axis.
    ///
    /// Empty or unrepresentable placements fail here. Conflicts with the
    /// figure's grid or its other axes are reported by the rendering loop.
    pub fn create_axis(&self, figure: FigureId, placement: Placement) -> Result<AxisId> {
        placement.validate()?;
        let id = self.ids.axis();
        self.send(
            "create an axis",
            PlotCommand::CreateAxis {
                id,
                figure,
                placement,
            },
        )?;
        Ok(id)
    }

    pub fn modify_axis(&self, axis: AxisId, options: AxisOptions) -> Result<()> {
        options.validate()?;
        self.send("modify an axis", PlotCommand::ModifyAxis { axis, options })
    }

    /// String-keyed axis options; an unknown key fails here and nothing is queued
    pub fn modify_axis_with<K, I>(&self, axis: AxisId, pairs: I) -> Result<()>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let options = AxisOptions::from_pairs(pairs)?;
        self.modify_axis(axis, options)
    }

    // --- Artists ---

    pub fn create_artist(&self, axis: AxisId, spec: ArtistSpec) -> Result<ArtistId> {
        Artist::from_spec(ArtistId(0), axis, spec.clone())?;
        let id = self.ids.artist();
        self.send("create an artist", PlotCommand::CreateArtist { id, axis, spec })?;
        Ok(id)
    }

    pub fn create_line_plot(&self, axis: AxisId, size: usize) -> Result<ArtistId> {
        self.create_artist(axis, ArtistSpec::line(size))
    }

    pub fn create_scatter_plot(&self, axis: AxisId, num_points: usize) -> Result<ArtistId> {
        self.create_artist(axis, ArtistSpec::scatter(num_points))
    }

    pub fn create_bar_plot(&self, axis: AxisId, num_bars: usize) -> Result<ArtistId> {
        self.create_artist(axis, ArtistSpec::bar(num_bars))
    }

    pub fn create_image_plot(
        &self,
        axis: AxisId,
        shape: (usize, usize),
        colorbar: bool,
    ) -> Result<ArtistId> {
        self.create_artist(
            axis,
            ArtistSpec::image(shape.0, shape.1).with_colorbar(colorbar),
        )
    }

    pub fn create_text(
        &self,
        axis: AxisId,
        position: [f64; 2],
        text: impl Into<String>,
    ) -> Result<ArtistId> {
        self.create_artist(axis, ArtistSpec::text(position, text))
    }

    /// Composite: create an artist with its initial payload
    pub fn add_artist(&self, axis: AxisId, spec: ArtistSpec) -> Result<ArtistId> {
        self.create_artist(axis, spec)
    }

    /// Composite: queue a figure, its axes and their artists.
    ///
    /// Each part is checked before it is queued. The first failing part
    /// stops the call; parts queued before it stay queued.
    pub fn add_figure_and_artists(
        &self,
        figure: FigureSpec,
        axes: Vec<(Placement, Vec<ArtistSpec>)>,
    ) -> Result<FigureHandles> {
        let layout = figure.layout;
        let figure_id = self.create_figure_from(figure)?;
        let mut handles = FigureHandles {
            figure: figure_id,
            axes: Vec::with_capacity(axes.len()),
        };
        let mut placed: Vec<Placement> = Vec::with_capacity(axes.len());

        for (placement, artists) in axes {
            if !placement.fits(&layout) {
                return Err(DevtkError::Configuration(format!(
                    "Axis at {:?} does not fit the {}x{} grid of {}",
                    placement, layout.rows, layout.cols, figure_id
                )));
            }
            if placed.iter().any(|p| p.overlaps(&placement)) {
                return Err(DevtkError::Configuration(format!(
                    "Axis at {:?} overlaps another axis of {}",
                    placement, figure_id
                )));
            }
            placed.push(placement);

            let axis_id = self.create_axis(figure_id, placement)?;
            let mut ids = Vec::with_capacity(artists.len());
            for spec in artists {
                ids.push(self.create_artist(axis_id, spec)?);
            }
            handles.axes.push((axis_id, ids));
        }
        Ok(handles)
    }

    // --- Data ---

    /// Queue new values for an artist
    pub fn add_data(&self, artist: ArtistId, payload: DataPayload) -> Result<()> {
        self.ensure_open("add data")?;
        self.sender.send_data(DataUpdate::new(artist, payload))
    }

    /// Queue several updates in order
    pub fn add_data_batch(
        &self,
        updates: impl IntoIterator<Item = (ArtistId, DataPayload)>,
    ) -> Result<()> {
        self.ensure_open("add data")?;
        self.sender.send_data_batch(
            updates
                .into_iter()
                .map(|(artist, payload)| DataUpdate::new(artist, payload)),
        )
    }

    pub fn update_line_plot(&self, artist: ArtistId, values: Vec<f64>) -> Result<()> {
        self.add_data(artist, DataPayload::Line(values))
    }

    pub fn append_line_plot(&self, artist: ArtistId, values: Vec<f64>) -> Result<()> {
        self.add_data(artist, DataPayload::LineAppend(values))
    }

    pub fn update_scatter_plot(&self, artist: ArtistId, points: Vec<[f64; 2]>) -> Result<()> {
        self.add_data(artist, DataPayload::Scatter(points))
    }

    pub fn append_scatter_plot(&self, artist: ArtistId, points: Vec<[f64; 2]>) -> Result<()> {
        self.add_data(artist, DataPayload::ScatterAppend(points))
    }

    pub fn update_bar_plot(&self, artist: ArtistId, heights: Vec<f64>) -> Result<()> {
        self.add_data(artist, DataPayload::Bar(heights))
    }

    pub fn update_image_plot(&self, artist: ArtistId, image: ImageBuffer) -> Result<()> {
        self.add_data(artist, DataPayload::Image(image))
    }

    pub fn update_text(
        &self,
        artist: ArtistId,
        text: impl Into<String>,
        position: Option<[f64; 2]>,
    ) -> Result<()> {
        self.add_data(
            artist,
            DataPayload::Text {
                position,
                text: text.into(),
            },
        )
    }

    // --- Status ---

    /// Whether the rendering thread is running
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Whether the figures are on screen
    pub fn is_shown(&self) -> bool {
        self.shared.is_shown()
    }

    pub fn state(&self) -> ManagerState {
        self.shared.state()
    }

    /// Number of queued (commands, data updates)
    pub fn pending(&self) -> (usize, usize) {
        self.sender.pending()
    }
}

/// Runs the rendering loop on its own thread
pub struct PlotManager {
    config: PlotConfig,
    handle: PlotHandle,
    receiver: Option<PlotReceiver>,
    reports_tx: Sender<DevtkError>,
    reports_rx: Receiver<DevtkError>,
    thread: Option<JoinHandle<PlotSurface>>,
    snapshot: Option<PlotSurface>,
}

impl PlotManager {
    pub fn new(config: PlotConfig) -> Self {
        let (sender, receiver) = plot_channel();
        let (reports_tx, reports_rx) = bounded(config.error_queue_capacity.max(1));
        Self {
            config,
            handle: PlotHandle {
                ids: Arc::new(IdAllocator::new()),
                sender,
                shared: Arc::new(PlotShared::default()),
            },
            receiver: Some(receiver),
            reports_tx,
            reports_rx,
            thread: None,
            snapshot: None,
        }
    }

    /// A cloneable producing handle for other threads
    pub fn handle(&self) -> PlotHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &PlotConfig {
        &self.config
    }

    /// Start the rendering thread, or re-show hidden figures if it is running
    pub fn show(&mut self) -> Result<()> {
        match self.handle.state() {
            ManagerState::NotStarted => self.spawn(),
            ManagerState::Running => self.handle.send("show", PlotCommand::Show),
            state => Err(DevtkError::State {
                operation: "show",
                state: format!("the plot manager is {}", state),
            }),
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let receiver = self.receiver.take().ok_or_else(|| DevtkError::State {
            operation: "show",
            state: "the rendering loop already ran".to_string(),
        })?;

        let shared = Arc::clone(&self.handle.shared);
        let worker = PlotWorker::new(receiver, self.reports_tx.clone(), Arc::clone(&shared));
        let config = self.config.clone();

        shared.set_alive(true);
        shared.set_shown(true);
        shared.set_state(ManagerState::Running);

        let thread_shared = Arc::clone(&shared);
        let spawned = std::thread::Builder::new()
            .name(PLOT_THREAD_NAME.to_string())
            .spawn(move || {
                let _exit = ExitGuard(thread_shared);
                render::run(&config, worker)
            });

        match spawned {
            Ok(thread) => {
                tracing::info!("Plot manager started ({:?} renderer)", self.config.backend);
                self.thread = Some(thread);
                Ok(())
            }
            Err(e) => {
                shared.mark_exited();
                tracing::error!("Failed to spawn plot thread: {}", e);
                Err(e.into())
            }
        }
    }

    /// Hide every figure; the loop keeps draining
    pub fn close(&self) -> Result<()> {
        self.handle.send("close", PlotCommand::Close)
    }

    /// Stop the rendering loop and wait for it, bounded by the stop timeout.
    ///
    /// Idempotent and safe after the user closed the window. The final
    /// surface is kept for [`PlotManager::snapshot`].
    pub fn stop(&mut self) -> Result<()> {
        let shared = Arc::clone(&self.handle.shared);

        let Some(thread) = self.thread.take() else {
            if shared.state() != ManagerState::Stopped {
                shared.set_state(ManagerState::Stopped);
                shared.set_shown(false);
                tracing::debug!("Plot manager stopped before it was shown");
            }
            return Ok(());
        };

        shared.transition(ManagerState::Running, ManagerState::Stopping);
        shared.request_stop();

        let timeout = self.config.stop_timeout();
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() && Instant::now() < deadline {
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }

        if thread.is_finished() {
            match thread.join() {
                Ok(surface) => self.snapshot = Some(surface),
                Err(_) => tracing::error!("Plot thread panicked"),
            }
            tracing::info!("Plot manager stopped");
        } else {
            tracing::warn!(
                "Plot thread did not exit within {:?}; it will be abandoned",
                timeout
            );
            self.thread = Some(thread);
        }

        shared.set_state(ManagerState::Stopped);
        shared.set_shown(false);
        Ok(())
    }

    /// Errors reported by the rendering loop since the last call
    pub fn take_errors(&self) -> Vec<DevtkError> {
        self.reports_rx.try_iter().collect()
    }

    /// Error reports lost because the report queue was full
    pub fn dropped_reports(&self) -> u64 {
        self.handle.shared.dropped_reports()
    }

    /// Final surface, available once `stop()` has joined the thread
    pub fn snapshot(&self) -> Option<&PlotSurface> {
        self.snapshot.as_ref()
    }

    pub fn take_snapshot(&mut self) -> Option<PlotSurface> {
        self.snapshot.take()
    }
}

impl Deref for PlotManager {
    type Target = PlotHandle;

    fn deref(&self) -> &PlotHandle {
        &self.handle
    }
}

impl Drop for PlotManager {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Failed to stop plot manager on drop: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for PlotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotManager")
            .field("state", &self.handle.state())
            .field("backend", &self.config.backend)
            .finish()
    }
}
