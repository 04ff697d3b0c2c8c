//! Plot Worker
//!
//! The part of the rendering loop that does not depend on a toolkit. Every
//! renderer calls [`PlotWorker::tick`] once per iteration, then draws the
//! surface it owns.
//!
//! # Drain discipline
//!
//! Each tick:
//!
//! 1. takes a snapshot of the data queue,
//! 2. drains and applies every queued command,
//! 3. validates the snapshot, coalesces it and applies it.
//!
//! A bad queued item never stops the loop: the error is logged and forwarded
//! on the bounded report channel.

use crate::error::{DevtkError, Result, ResultExt};
use crate::plot::channel::PlotReceiver;
use crate::plot::command::{coalesce, DataUpdate, PlotCommand};
use crate::plot::surface::PlotSurface;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Upper bound on drain passes when the loop exits
const FINAL_DRAIN_PASSES: usize = 8;

/// Lifecycle state of a plot manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ManagerState {
    #[default]
    NotStarted = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ManagerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ManagerState::Running,
            2 => ManagerState::Stopping,
            3 => ManagerState::Stopped,
            _ => ManagerState::NotStarted,
        }
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerState::NotStarted => write!(f, "not started"),
            ManagerState::Running => write!(f, "running"),
            ManagerState::Stopping => write!(f, "stopping"),
            ManagerState::Stopped => write!(f, "stopped"),
        }
    }
}

type Waker = Box<dyn Fn() + Send + Sync>;

/// Flags shared between the manager, its handles and the rendering thread
#[derive(Default)]
pub struct PlotShared {
    state: AtomicU8,
    alive: AtomicBool,
    shown: AtomicBool,
    stop_requested: AtomicBool,
    dropped_reports: AtomicU64,
    waker: Mutex<Option<Waker>>,
}

impl std::fmt::Debug for PlotShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlotShared")
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .field("shown", &self.is_shown())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

impl PlotShared {
    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ManagerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Move from `from` to `to` only if the state is still `from`
    pub(crate) fn transition(&self, from: ManagerState, to: ManagerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn is_shown(&self) -> bool {
        self.shown.load(Ordering::SeqCst)
    }

    pub(crate) fn set_shown(&self, shown: bool) {
        self.shown.store(shown, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Number of error reports dropped because the report queue was full
    pub fn dropped_reports(&self) -> u64 {
        self.dropped_reports.load(Ordering::Relaxed)
    }

    /// Register a callback that makes the renderer run a tick soon
    pub(crate) fn set_waker(&self, waker: Waker) {
        if let Ok(mut slot) = self.waker.lock() {
            *slot = Some(waker);
        }
    }

    pub(crate) fn clear_waker(&self) {
        if let Ok(mut slot) = self.waker.lock() {
            *slot = None;
        }
    }

    /// Nudge the renderer; a no-op for renderers that poll
    pub(crate) fn wake(&self) {
        if let Ok(slot) = self.waker.lock() {
            if let Some(wake) = slot.as_ref() {
                wake();
            }
        }
    }

    /// Mark the rendering loop as finished
    pub(crate) fn mark_exited(&self) {
        self.clear_waker();
        self.set_shown(false);
        self.set_alive(false);
        self.set_state(ManagerState::Stopped);
    }
}

/// Counters kept by the worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub ticks: u64,
    pub commands_applied: u64,
    pub updates_applied: u64,
    /// Updates skipped because a later update replaced them
    pub updates_coalesced: u64,
    pub errors: u64,
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Something on the surface changed
    pub changed: bool,
    /// Every producer is gone
    pub disconnected: bool,
}

/// Applies queued work to the surface it owns
pub struct PlotWorker {
    receiver: PlotReceiver,
    surface: PlotSurface,
    reports: Sender<DevtkError>,
    shared: Arc<PlotShared>,
    stats: WorkerStats,
}

impl PlotWorker {
    pub fn new(
        receiver: PlotReceiver,
        reports: Sender<DevtkError>,
        shared: Arc<PlotShared>,
    ) -> Self {
        Self {
            receiver,
            surface: PlotSurface::new(),
            reports,
            shared,
            stats: WorkerStats::default(),
        }
    }

    pub fn surface(&self) -> &PlotSurface {
        &self.surface
    }

    pub(crate) fn surface_mut(&mut self) -> &mut PlotSurface {
        &mut self.surface
    }

    pub fn shared(&self) -> &PlotShared {
        &self.shared
    }

    pub(crate) fn shared_arc(&self) -> Arc<PlotShared> {
        Arc::clone(&self.shared)
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Run one drain cycle
    pub fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;

        let data = self.receiver.snapshot_data();
        let drain = self.receiver.drain_commands();
        let mut changed = false;

        for cmd in drain.commands {
            let name = cmd.name();
            let shown = match cmd {
                PlotCommand::Show => Some(true),
                PlotCommand::Close => Some(false),
                _ => None,
            };
            match self
                .surface
                .apply(cmd)
                .with_context(|| format!("Failed to apply {}", name))
            {
                Ok(()) => {
                    self.stats.commands_applied += 1;
                    changed = true;
                    if let Some(shown) = shown {
                        self.shared.set_shown(shown);
                    }
                    tracing::debug!("Applied {}", name);
                }
                Err(e) => self.report(e),
            }
        }

        if !data.is_empty() {
            changed |= self.apply_data(data) > 0;
        }

        TickOutcome {
            changed,
            disconnected: drain.disconnected,
        }
    }

    /// Drain until both queues are empty; used once before exiting
    pub fn final_drain(&mut self) {
        for _ in 0..FINAL_DRAIN_PASSES {
            self.tick();
            if self.receiver.is_empty() {
                break;
            }
        }
    }

    fn apply_data(&mut self, data: Vec<DataUpdate>) -> usize {
        // Commands for this snapshot are already applied, so an update that
        // fails validation now fails the same way in sequence.
        let mut valid = Vec::with_capacity(data.len());
        for update in data {
            match self.surface.check(update.artist, &update.payload) {
                Ok(()) => valid.push(update),
                Err(e) => self.report(e),
            }
        }

        let before = valid.len();
        let updates = coalesce(valid);
        self.stats.updates_coalesced += (before - updates.len()) as u64;

        let mut applied = 0;
        for update in updates {
            match self.surface.apply_update(update) {
                Ok(()) => applied += 1,
                Err(e) => self.report(e),
            }
        }
        self.stats.updates_applied += applied as u64;
        applied
    }

    /// Log an error and forward it without blocking
    pub(crate) fn report(&mut self, error: DevtkError) {
        self.stats.errors += 1;
        tracing::warn!("Plot loop: {}", error);
        if self.reports.try_send(error).is_err() {
            self.shared.dropped_reports.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Forward an error that came from the renderer itself
    pub(crate) fn report_result(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.report(e);
        }
    }

    /// Give the surface back once the loop is done
    pub fn into_surface(self) -> PlotSurface {
        self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::artist::{ArtistSpec, DataPayload};
    use crate::plot::channel::{plot_channel, PlotSender};
    use crate::plot::id::{ArtistId, AxisId, FigureId};
    use crate::plot::layout::{FigureSpec, Placement};
    use crossbeam_channel::{bounded, Receiver};

    fn worker(capacity: usize) -> (PlotWorker, PlotSender, Receiver<DevtkError>) {
        let (tx, rx) = plot_channel();
        let (report_tx, report_rx) = bounded(capacity);
        let shared = Arc::new(PlotShared::default());
        (PlotWorker::new(rx, report_tx, shared), tx, report_rx)
    }

    fn create_line(tx: &PlotSender, size: usize) {
        tx.send_command(PlotCommand::CreateFigure {
            id: FigureId(1),
            spec: FigureSpec::default(),
        })
        .unwrap();
        tx.send_command(PlotCommand::CreateAxis {
            id: AxisId(2),
            figure: FigureId(1),
            placement: Placement::cell(0, 0),
        })
        .unwrap();
        tx.send_command(PlotCommand::CreateArtist {
            id: ArtistId(3),
            axis: AxisId(2),
            spec: ArtistSpec::line(size),
        })
        .unwrap();
    }

    #[test]
    fn test_create_then_data_in_one_tick() {
        let (mut worker, tx, _reports) = worker(8);
        create_line(&tx, 2);
        tx.send_data(DataUpdate::new(ArtistId(3), DataPayload::Line(vec![1.0, 2.0])))
            .unwrap();

        let outcome = worker.tick();
        assert!(outcome.changed);
        assert_eq!(worker.stats().commands_applied, 3);
        assert_eq!(worker.stats().updates_applied, 1);
    }

    #[test]
    fn test_bad_update_reported_and_loop_continues() {
        let (mut worker, tx, reports) = worker(8);
        create_line(&tx, 2);
        tx.send_data(DataUpdate::new(ArtistId(3), DataPayload::Line(vec![1.0, 2.0])))
            .unwrap();
        tx.send_data(DataUpdate::new(ArtistId(3), DataPayload::Line(vec![1.0])))
            .unwrap();
        tx.send_data(DataUpdate::new(ArtistId(77), DataPayload::Bar(vec![1.0])))
            .unwrap();

        worker.tick();
        let errors: Vec<_> = reports.try_iter().collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(worker.stats().updates_applied, 1);
        assert_eq!(worker.stats().updates_coalesced, 0);
    }

    #[test]
    fn test_reports_dropped_when_full() {
        let (mut worker, tx, _reports) = worker(1);
        for _ in 0..3 {
            tx.send_command(PlotCommand::CreateAxis {
                id: AxisId(9),
                figure: FigureId(404),
                placement: Placement::cell(0, 0),
            })
            .unwrap();
        }
        worker.tick();
        assert_eq!(worker.stats().errors, 3);
        assert_eq!(worker.shared().dropped_reports(), 2);
    }

    #[test]
    fn test_disconnect_detected() {
        let (mut worker, tx, _reports) = worker(1);
        drop(tx);
        assert!(worker.tick().disconnected);
    }

    #[test]
    fn test_state_transitions() {
        let shared = PlotShared::default();
        assert_eq!(shared.state(), ManagerState::NotStarted);
        assert!(shared.transition(ManagerState::NotStarted, ManagerState::Running));
        assert!(!shared.transition(ManagerState::NotStarted, ManagerState::Running));
        shared.mark_exited();
        assert_eq!(shared.state(), ManagerState::Stopped);
        assert!(!shared.is_alive());
    }
}
