//! Renderer without a window.
//!
//! Keeps the surface up to date at the configured rate. Used by tests,
//! unattended acquisition runs and as the fallback when no display is
//! available.

use crate::config::PlotConfig;
use crate::plot::render::{loop_interval, FramePacer};
use crate::plot::surface::PlotSurface;
use crate::plot::worker::PlotWorker;

pub fn run(config: &PlotConfig, mut worker: PlotWorker) -> PlotSurface {
    tracing::info!("Headless plot loop started");
    let mut pacer = FramePacer::new(loop_interval(config));

    while !worker.shared().stop_requested() {
        let outcome = worker.tick();
        if outcome.disconnected {
            tracing::info!("All plot handles dropped, leaving plot loop");
            break;
        }
        pacer.wait();
    }

    worker.final_drain();
    let stats = worker.stats();
    tracing::info!(
        ticks = stats.ticks,
        commands = stats.commands_applied,
        updates = stats.updates_applied,
        coalesced = stats.updates_coalesced,
        errors = stats.errors,
        "Headless plot loop stopped"
    );
    worker.into_surface()
}
